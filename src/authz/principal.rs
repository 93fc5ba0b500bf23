use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::jwt::SessionClaims;

/// Role carried in a session token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    User,
    Guest,
    /// Any role name not known to the service, passed through to the policy
    Custom(String),
}

impl Role {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_uppercase().as_str() {
            super::roles::ADMIN => Role::Admin,
            super::roles::USER => Role::User,
            super::roles::GUEST => Role::Guest,
            _ => Role::Custom(name.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => super::roles::ADMIN,
            Role::User => super::roles::USER,
            Role::Guest => super::roles::GUEST,
            Role::Custom(name) => name,
        }
    }

    /// Strongest of a user's assigned role names; users without roles are guests.
    pub fn primary<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let roles: Vec<Role> = names.into_iter().map(Role::parse).collect();
        [Role::Admin, Role::User, Role::Guest]
            .into_iter()
            .find(|known| roles.contains(known))
            .or_else(|| roles.into_iter().next())
            .unwrap_or(Role::Guest)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Role {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Role::parse(&name))
    }
}

/// The authenticated principal, rebuilt from the access token on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: Uuid,
    pub role: Role,
    pub department: Option<String>,
}

impl Subject {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self {
            id,
            role,
            department: None,
        }
    }

    pub fn with_department(mut self, department: Option<String>) -> Self {
        self.department = department;
        self
    }

    pub fn from_claims(claims: &SessionClaims) -> Self {
        Self::new(claims.sub, Role::parse(&claims.role)).with_department(claims.department.clone())
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.role.as_str().eq_ignore_ascii_case(name.trim())
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
