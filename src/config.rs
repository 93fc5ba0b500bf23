use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;

use crate::errors::AppError;

/// Where policy decisions come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
    /// HTTP decision service (OPA-compatible)
    Remote,
    /// Built-in role policy, for development and tests
    Local,
}

/// Which attendance statuses may transition to CHECKED_IN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInGuard {
    /// Only REGISTERED records may check in
    Registered,
    /// Any record that is not CANCELLED may (re-)check in
    Unguarded,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub jwt_secret: Vec<u8>,
    pub jwt_algorithm: Algorithm,
    pub access_token_ttl: chrono::Duration,
    pub refresh_token_ttl: chrono::Duration,
    pub policy_mode: PolicyMode,
    pub opa_url: String,
    pub opa_policy_path: String,
    pub policy_timeout: Duration,
    pub check_in_guard: CheckInGuard,
    pub cors_origins: Vec<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, AppError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| AppError::configuration("JWT_SECRET not set"))?;
        if secret.is_empty() {
            return Err(AppError::configuration("JWT_SECRET must not be empty"));
        }

        let jwt_algorithm = match env_or("JWT_ALGORITHM", "HS256").to_uppercase().as_str() {
            "HS256" => Algorithm::HS256,
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            other => {
                return Err(AppError::configuration(format!(
                    "JWT_ALGORITHM must be one of HS256, HS384, HS512 (got {other})"
                )))
            }
        };

        let access_minutes: i64 = env_parse("ACCESS_TOKEN_EXPIRE_MINUTES", 15)?;
        let refresh_days: i64 = env_parse("REFRESH_TOKEN_EXPIRE_DAYS", 7)?;
        let timeout_secs: u64 = env_parse("POLICY_TIMEOUT_SECS", 5)?;

        let policy_mode = match env_or("POLICY_MODE", "remote").to_lowercase().as_str() {
            "remote" => PolicyMode::Remote,
            "local" => PolicyMode::Local,
            other => {
                return Err(AppError::configuration(format!(
                    "POLICY_MODE must be 'remote' or 'local' (got {other})"
                )))
            }
        };

        let check_in_guard = match env_or("CHECKIN_GUARD", "registered").to_lowercase().as_str() {
            "registered" => CheckInGuard::Registered,
            "unguarded" => CheckInGuard::Unguarded,
            other => {
                return Err(AppError::configuration(format!(
                    "CHECKIN_GUARD must be 'registered' or 'unguarded' (got {other})"
                )))
            }
        };

        let cors_origins = env_or("CORS_ORIGINS", "")
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            jwt_secret: secret.into_bytes(),
            jwt_algorithm,
            access_token_ttl: chrono::Duration::minutes(access_minutes),
            refresh_token_ttl: chrono::Duration::days(refresh_days),
            policy_mode,
            opa_url: env_or("OPA_URL", "http://localhost:8181"),
            opa_policy_path: env_or("OPA_POLICY_PATH", "/v1/data/casecheck/authz"),
            policy_timeout: Duration::from_secs(timeout_secs),
            check_in_guard,
            cors_origins,
        })
    }

    /// Settings with defaults and the given secret, without touching the environment.
    pub fn with_secret(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            jwt_secret: secret.into(),
            jwt_algorithm: Algorithm::HS256,
            access_token_ttl: chrono::Duration::minutes(15),
            refresh_token_ttl: chrono::Duration::days(7),
            policy_mode: PolicyMode::Local,
            opa_url: "http://localhost:8181".to_string(),
            opa_policy_path: "/v1/data/casecheck/authz".to_string(),
            policy_timeout: Duration::from_secs(5),
            check_in_guard: CheckInGuard::Registered,
            cors_origins: Vec::new(),
        }
    }

    pub fn policy_endpoint(&self) -> String {
        format!(
            "{}{}",
            self.opa_url.trim_end_matches('/'),
            self.opa_policy_path
        )
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::configuration(format!("{key} must be a valid number"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_endpoint_joins_without_double_slash() {
        let mut settings = Settings::with_secret("s");
        settings.opa_url = "http://opa:8181/".to_string();
        assert_eq!(settings.policy_endpoint(), "http://opa:8181/v1/data/casecheck/authz");
    }
}
