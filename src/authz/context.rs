//! Resource snapshot and ambient context for a policy decision.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::http::Method;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::action::resource_type;
use super::principal::Subject;
use crate::app::AppState;
use crate::errors::AppError;
use crate::events::RequestContext;
use crate::models::attendance::AttendanceStatus;
use crate::services::{activity, attendance};

const ACTIVITIES: &str = "/v1/activities";
const USERS: &str = "/v1/users";
const ATTENDANCE_BY_ACTIVITY: &str = "/v1/attendance/activity";
const QR_CODE: &str = "/v1/attendance/qr-code";
const CHECK_IN: &str = "/v1/attendance/check-in";
const CHECK_OUT: &str = "/v1/attendance/check-out";
const REGISTER: &str = "/v1/attendance/register";

#[derive(Debug, Clone)]
pub struct ResolvedContext {
    pub resource: Value,
    pub context: Value,
    pub request: RequestContext,
}

/// Only attendance writes carry the ids the lookup needs in their body.
pub fn needs_body(method: &Method, path: &str) -> bool {
    method == Method::POST && path.starts_with("/v1/attendance/")
}

fn first_segment_after<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    path.strip_prefix(prefix)?
        .strip_prefix('/')?
        .split('/')
        .next()
        .filter(|segment| !segment.is_empty())
}

fn is_check_route(path: &str) -> bool {
    path == CHECK_IN || path == CHECK_OUT
}

pub fn client_ip(parts: &Parts) -> RequestContext {
    let ctx = RequestContext::from_headers(&parts.headers);
    if ctx.ip.is_some() {
        return ctx;
    }
    match parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => ctx.with_ip(addr.ip().to_string()),
        None => ctx,
    }
}

/// Activity the request targets, if any. QR payloads are decoded with the
/// signature checked but not the validity window: the id only routes the
/// lookup, the consuming handler verifies the token in full.
fn target_activity(state: &AppState, method: &Method, path: &str, body: Option<&Value>) -> Option<Uuid> {
    let from_body = |key: &str| body.and_then(|b| b.get(key)).and_then(Value::as_str);
    let peek = |token: &str| state.tokens.peek_qr(token).ok().map(|claims| claims.activity_id);

    if let Some(id) = first_segment_after(path, ACTIVITIES) {
        return Uuid::parse_str(id).ok();
    }
    if let Some(id) = first_segment_after(path, ATTENDANCE_BY_ACTIVITY) {
        return Uuid::parse_str(id).ok();
    }
    if is_check_route(path) {
        return from_body("qr_code").and_then(peek);
    }
    if let Some(code) = first_segment_after(path, QR_CODE) {
        return peek(code);
    }
    if path == REGISTER || (path == QR_CODE && method == Method::POST) {
        return from_body("activity_id").and_then(|id| Uuid::parse_str(id).ok());
    }
    None
}

pub async fn resolve(
    state: &AppState,
    subject: &Subject,
    parts: &Parts,
    body: &[u8],
) -> Result<ResolvedContext, AppError> {
    let path = parts.uri.path().trim_end_matches('/');
    let body_json: Option<Value> = if body.is_empty() {
        None
    } else {
        serde_json::from_slice(body).ok()
    };

    let activity_id = target_activity(state, &parts.method, path, body_json.as_ref());

    let resource = match activity_id {
        Some(id) => match activity::find(&state.pool, id).await? {
            Some(found) => found.policy_snapshot(),
            None => json!({ "type": "activity", "id": id }),
        },
        None => match first_segment_after(path, USERS).filter(|s| *s != "me") {
            Some(id) => json!({ "type": "user", "id": id }),
            None => json!({ "type": resource_type(path) }),
        },
    };

    let request = client_ip(parts);
    let mut context = Map::new();
    context.insert(
        "timestamp".into(),
        parts
            .headers
            .get("x-request-time")
            .and_then(|v| v.to_str().ok())
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
    );
    context.insert("ip_address".into(), json!(request.ip));
    context.insert("user_agent".into(), json!(request.user_agent));

    if is_check_route(path) {
        let status = match activity_id {
            Some(id) => attendance::status_for(&state.pool, id, subject.id).await?,
            None => None,
        };
        let is_registered = matches!(status, Some(s) if s != AttendanceStatus::Cancelled);
        context.insert("is_registered".into(), Value::Bool(is_registered));
        context.insert(
            "is_checked_in".into(),
            Value::Bool(status == Some(AttendanceStatus::CheckedIn)),
        );
        // false when the signature check failed; the handler reports the bad code
        context.insert("qr_readable".into(), Value::Bool(activity_id.is_some()));
    }

    Ok(ResolvedContext {
        resource,
        context: Value::Object(context),
        request,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_after_prefix() {
        assert_eq!(first_segment_after("/v1/activities/abc/submit", ACTIVITIES), Some("abc"));
        assert_eq!(first_segment_after("/v1/activities", ACTIVITIES), None);
        assert_eq!(first_segment_after("/v1/activitiesx/abc", ACTIVITIES), None);
        assert_eq!(first_segment_after("/v1/attendance/activity/xyz/stats", ATTENDANCE_BY_ACTIVITY), Some("xyz"));
    }

    #[test]
    fn only_attendance_posts_are_buffered() {
        assert!(needs_body(&Method::POST, "/v1/attendance/check-in"));
        assert!(!needs_body(&Method::GET, "/v1/attendance/activity/x"));
        assert!(!needs_body(&Method::POST, "/v1/activities"));
    }
}
