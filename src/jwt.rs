use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{PolicyContext, Subject};
use crate::config::Settings;
use crate::errors::AppError;
use crate::models::attendance::CodeType;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,
    #[error("token is not valid yet")]
    NotYetValid,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("expected a {expected} token")]
    WrongType { expected: &'static str },
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(msg) => AppError::internal(msg),
            other => AppError::token(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// Claims of access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// Claims embedded in a QR check-in/check-out code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrClaims {
    pub event_id: Uuid,
    pub activity_id: Uuid,
    #[serde(default)]
    pub gate_id: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(rename = "type")]
    pub code_type: CodeType,
    pub jti: String,
    pub nbf: i64,
    pub exp: i64,
}

/// Signs and verifies every token the service hands out.
#[derive(Debug, Clone)]
pub struct TokenCodec {
    secret: Arc<Vec<u8>>,
    algorithm: Algorithm,
    access_ttl: chrono::Duration,
    refresh_ttl: chrono::Duration,
}

impl TokenCodec {
    pub fn new(settings: &Settings) -> Self {
        Self {
            secret: Arc::new(settings.jwt_secret.clone()),
            algorithm: settings.jwt_algorithm,
            access_ttl: settings.access_token_ttl,
            refresh_ttl: settings.refresh_token_ttl,
        }
    }

    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl.num_seconds()
    }

    pub fn encode<C: Serialize>(&self, claims: &C) -> Result<String, TokenError> {
        jsonwebtoken::encode(
            &Header::new(self.algorithm),
            claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|err| TokenError::Signing(err.to_string()))
    }

    /// Verifies signature, algorithm and not-before, and expiry unless
    /// `verify_expiry` is false. Skipping expiry is only for routing lookups;
    /// the operation consuming the token must decode it again with expiry on.
    pub fn decode<C: DeserializeOwned>(&self, token: &str, verify_expiry: bool) -> Result<C, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.validate_exp = verify_expiry;
        validation.validate_nbf = verify_expiry;

        jsonwebtoken::decode::<C>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::ImmatureSignature => TokenError::NotYetValid,
                _ => TokenError::Malformed(err.to_string()),
            })
    }

    pub fn issue(&self, subject: &Subject, token_type: TokenType) -> Result<String, TokenError> {
        let now = Utc::now();
        let ttl = match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };

        let claims = SessionClaims {
            sub: subject.id,
            role: subject.role.as_str().to_string(),
            department: subject.department.clone(),
            token_type,
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        self.encode(&claims)
    }

    /// Full verification of a session token of the given type.
    pub fn verify_session(&self, token: &str, expected: TokenType) -> Result<SessionClaims, TokenError> {
        let claims: SessionClaims = self.decode(token, true)?;
        if claims.token_type != expected {
            return Err(TokenError::WrongType {
                expected: expected.as_str(),
            });
        }
        Ok(claims)
    }

    pub fn issue_qr(
        &self,
        activity_id: Uuid,
        gate_id: Option<String>,
        session_token: Option<String>,
        code_type: CodeType,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> Result<(QrClaims, String), TokenError> {
        let claims = QrClaims {
            event_id: activity_id,
            activity_id,
            gate_id,
            session_token,
            code_type,
            jti: crate::utils::random_token(16),
            nbf: valid_from.timestamp(),
            exp: valid_until.timestamp(),
        };

        let token = self.encode(&claims)?;
        Ok((claims, token))
    }

    pub fn verify_qr(&self, token: &str) -> Result<QrClaims, TokenError> {
        self.decode(token, true)
    }

    /// Signature-only decode used to route a resource lookup.
    pub fn peek_qr(&self, token: &str) -> Result<QrClaims, TokenError> {
        self.decode(token, false)
    }
}

pub fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for Subject {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<PolicyContext>() {
            return Ok(ctx.subject.clone());
        }

        let token = bearer_token(parts).ok_or_else(|| AppError::unauthorized("Authorization header missing"))?;
        let claims = state
            .tokens
            .verify_session(token, TokenType::Access)
            .map_err(|err| AppError::unauthorized(err.to_string()))?;

        Ok(Subject::from_claims(&claims))
    }
}
