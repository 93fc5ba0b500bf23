//! Policy enforcement point: every non-public request is authenticated,
//! described as `{subject, action, resource, context}` and sent to the
//! decision point exactly once before it may reach a handler.

use std::convert::Infallible;

use axum::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::action::{derive_action, resource_type, under_prefix};
use super::context::{self, client_ip};
use super::decision::{Decision, PolicyInput};
use super::principal::Subject;
use crate::app::AppState;
use crate::errors::AppError;
use crate::events::{self, AuditEntry, AuditStatus, RequestContext};
use crate::jwt::{bearer_token, TokenType};

pub const PUBLIC_PREFIXES: &[&str] = &[
    "/v1/auth/login",
    "/v1/auth/register",
    "/v1/auth/refresh",
    "/v1/auth/logout",
    "/health",
    "/docs",
    "/api-docs",
    "/openapi.json",
];

const MAX_INSPECTED_BODY: usize = 1024 * 1024;

/// Attached to the request once the decision point allowed it.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    pub subject: Subject,
    pub action: String,
    pub decision: Decision,
    pub request: RequestContext,
}

enum Outcome {
    Skip,
    Unauthenticated(String),
    Denied { subject: Subject, action: String, decision: Decision, request: RequestContext },
    Allowed(PolicyContext),
}

pub fn is_public(path: &str) -> bool {
    PUBLIC_PREFIXES.iter().any(|prefix| under_prefix(path, prefix))
}

fn authenticate(state: &AppState, parts: &Parts) -> Result<Subject, String> {
    let token = bearer_token(parts).ok_or_else(|| "missing bearer token".to_string())?;
    state
        .tokens
        .verify_session(token, TokenType::Access)
        .map(|claims| Subject::from_claims(&claims))
        .map_err(|err| err.to_string())
}

async fn assess(state: &AppState, parts: &Parts, body: &[u8]) -> Result<Outcome, AppError> {
    if parts.method == Method::OPTIONS || is_public(parts.uri.path()) {
        return Ok(Outcome::Skip);
    }

    let subject = match authenticate(state, parts) {
        Ok(subject) => subject,
        Err(reason) => return Ok(Outcome::Unauthenticated(reason)),
    };

    let action = derive_action(&parts.method, parts.uri.path());
    let resolved = context::resolve(state, &subject, parts, body).await?;
    let input = PolicyInput::new(subject.clone(), action.clone())
        .with_resource(resolved.resource)
        .with_context(resolved.context);

    let decision = state.policy.evaluate(&input).await;

    if decision.allow {
        Ok(Outcome::Allowed(PolicyContext {
            subject,
            action,
            decision,
            request: resolved.request,
        }))
    } else {
        Ok(Outcome::Denied {
            subject,
            action,
            decision,
            request: resolved.request,
        })
    }
}

pub async fn enforce(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();

    let (inspected, body) = if context::needs_body(&parts.method, parts.uri.path()) {
        match axum::body::to_bytes(body, MAX_INSPECTED_BODY).await {
            Ok(bytes) => (bytes.clone(), Body::from(bytes)),
            Err(_) => return AppError::bad_request("request body too large").into_response(),
        }
    } else {
        (Bytes::new(), body)
    };

    let outcome = match assess(&state, &parts, &inspected).await {
        Ok(outcome) => outcome,
        Err(err) => return err.into_response(),
    };

    match outcome {
        Outcome::Skip => next.run(Request::from_parts(parts, body)).await,
        Outcome::Unauthenticated(reason) => {
            tracing::debug!(path = %parts.uri.path(), reason = %reason, "unauthenticated request");
            AppError::unauthorized("Not authenticated").into_response()
        }
        Outcome::Denied {
            subject,
            action,
            decision,
            request,
        } => {
            if decision.upstream_failure {
                tracing::error!(
                    user_id = %subject.id,
                    action = %action,
                    "policy decision unavailable, request denied"
                );
            } else {
                tracing::info!(
                    user_id = %subject.id,
                    action = %action,
                    reasons = ?decision.reasons,
                    "request denied by policy"
                );
            }

            let entry = AuditEntry::new(action.clone(), resource_type(parts.uri.path()))
                .actor(Some(subject.id))
                .context(&request)
                .failed(AuditStatus::Denied, decision.reasons.join("; "));
            events::record_best_effort(&state.pool, entry).await;

            AppError::denied("Permission denied", decision.reasons).into_response()
        }
        Outcome::Allowed(policy) => {
            tracing::debug!(user_id = %policy.subject.id, action = %policy.action, "request allowed");
            parts.extensions.insert(policy);
            next.run(Request::from_parts(parts, body)).await
        }
    }
}

/// Request metadata for audit entries, preferring what the PEP resolved.
#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<PolicyContext>()
            .map(|policy| policy.request.clone())
            .unwrap_or_else(|| client_ip(parts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_prefixes() {
        assert!(is_public("/v1/auth/login"));
        assert!(is_public("/health"));
        assert!(is_public("/api-docs/openapi.json"));
        assert!(!is_public("/v1/auth/me"));
        assert!(!is_public("/v1/activities"));
        assert!(is_public("/docs/"));
        assert!(!is_public("/healthz"));
        assert!(!is_public("/docsfoo"));
        assert!(!is_public("/v1/auth/registerx"));
    }
}
