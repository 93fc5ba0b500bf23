use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::row_parsers::parse_uuid;
use crate::errors::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub profile_image_url: Option<String>,
    pub is_active: bool,
    pub roles: Vec<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub profile_image_url: Option<String>,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const USER_COLUMNS: &str = "id, username, email, password_hash, full_name, phone, department, profile_image_url, is_active, last_login_at, created_at, updated_at";

impl DbUser {
    /// Roles are loaded separately from `user_roles`.
    pub fn into_user(self, roles: Vec<String>) -> Result<User, AppError> {
        Ok(User {
            id: parse_uuid(&self.id)?,
            username: self.username,
            email: self.email,
            full_name: self.full_name,
            phone: self.phone,
            department: self.department,
            profile_image_url: self.profile_image_url,
            is_active: self.is_active,
            roles,
            last_login_at: self.last_login_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    #[schema(example = "ada")]
    pub username: String,
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
    #[schema(example = "Ada Lovelace")]
    pub full_name: String,
    pub phone: Option<String>,
    pub department: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Username or email
    #[schema(example = "ada")]
    pub username: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[schema(example = "bearer")]
    pub token_type: &'static str,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ProfileUpdateRequest {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub role: Option<String>,
}
