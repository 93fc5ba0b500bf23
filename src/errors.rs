use std::sync::OnceLock;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

pub type AppResult<T> = Result<T, AppError>;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {message}")]
    Forbidden { message: String, reasons: Vec<String> },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Business-rule violation carrying its own machine-readable code.
    #[error("{message}")]
    Rule {
        status: StatusCode,
        code: &'static str,
        message: String,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("token error: {0}")]
    Token(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
            reasons: Vec::new(),
        }
    }

    pub fn denied(message: impl Into<String>, reasons: Vec<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
            reasons,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn rule(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self::Rule {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn token(err: impl Into<String>) -> Self {
        Self::Token(err.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Rule { status, .. } => *status,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Token(_) => StatusCode::UNAUTHORIZED,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden { .. } => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::BadRequest(_) => "VALIDATION_ERROR",
            AppError::Rule { code, .. } => *code,
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Token(_) => "INVALID_TOKEN",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn is_internal(&self) -> bool {
        matches!(
            self,
            AppError::Configuration(_) | AppError::Database(_) | AppError::Internal(_)
        )
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::bad_request(rejection.body_text())
    }
}

/// Whether internal error detail is rendered to clients (`APP_DEBUG`).
fn expose_internal_detail() -> bool {
    static DEBUG: OnceLock<bool> = OnceLock::new();
    *DEBUG.get_or_init(|| {
        matches!(
            std::env::var("APP_DEBUG").unwrap_or_default().to_lowercase().as_str(),
            "1" | "true" | "yes"
        )
    })
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    details: Value,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: ErrorBody,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let message = if self.is_internal() {
            tracing::error!(error = ?self, "request failed with internal error");
            if expose_internal_detail() {
                match &self {
                    AppError::Database(err) => format!("database error: {err}"),
                    other => other.to_string(),
                }
            } else {
                "internal server error".to_string()
            }
        } else {
            self.to_string()
        };

        let details = match &self {
            AppError::Forbidden { reasons, .. } if !reasons.is_empty() => {
                serde_json::json!({ "reasons": reasons })
            }
            _ => Value::Object(serde_json::Map::new()),
        };

        let payload = ErrorResponse {
            success: false,
            error: ErrorBody {
                code,
                message,
                details,
            },
        };

        (status, Json(payload)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}
