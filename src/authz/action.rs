//! Mapping of `(method, path)` to the abstract action name sent to the
//! decision point. Rules are evaluated first-match-wins; the generic
//! `<resource>:<verb>` rule applies only when none matches.

use axum::http::Method;

/// Route prefix -> resource type; the longest matching prefix wins.
pub const RESOURCE_PREFIXES: &[(&str, &str)] = &[
    ("/v1/activities", "activity"),
    ("/v1/attendance", "attendance"),
    ("/v1/users", "user"),
];

const UNKNOWN_RESOURCE: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodMatch {
    Any,
    Get,
    Post,
    /// PUT or PATCH
    Update,
}

impl MethodMatch {
    fn matches(&self, method: &Method) -> bool {
        match self {
            MethodMatch::Any => true,
            MethodMatch::Get => method == Method::GET,
            MethodMatch::Post => method == Method::POST,
            MethodMatch::Update => method == Method::PUT || method == Method::PATCH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMatch {
    /// Whole path equals the given one
    Exact(&'static str),
    /// Some path segment equals the given one
    Segment(&'static str),
    /// A segment equals `segment` and the path lies under `prefix`
    SegmentUnder { prefix: &'static str, segment: &'static str },
    /// Path equals or lies under the prefix
    Prefix(&'static str),
}

impl PathMatch {
    fn matches(&self, path: &str) -> bool {
        match self {
            PathMatch::Exact(expected) => path == *expected,
            PathMatch::Segment(segment) => path.split('/').any(|s| s == *segment),
            PathMatch::SegmentUnder { prefix, segment } => {
                under_prefix(path, prefix) && path.split('/').any(|s| s == *segment)
            }
            PathMatch::Prefix(prefix) => under_prefix(path, prefix),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionName {
    /// Fixed action name, e.g. `attendance:checkin`
    Fixed(&'static str),
    /// `<resource>:<verb>` with the resource taken from the path prefix
    OnResource(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionRule {
    pub method: MethodMatch,
    pub path: PathMatch,
    pub action: ActionName,
}

const fn rule(method: MethodMatch, path: PathMatch, action: ActionName) -> ActionRule {
    ActionRule { method, path, action }
}

/// Most specific first.
pub const ACTION_RULES: &[ActionRule] = &[
    rule(MethodMatch::Get, PathMatch::Exact("/v1/users/me"), ActionName::Fixed("user:read_self")),
    rule(MethodMatch::Update, PathMatch::Exact("/v1/users/me"), ActionName::Fixed("user:update_self")),
    rule(MethodMatch::Get, PathMatch::Exact("/v1/users"), ActionName::Fixed("user:list")),
    rule(MethodMatch::Get, PathMatch::Exact("/v1/activities"), ActionName::Fixed("activity:list")),
    rule(MethodMatch::Get, PathMatch::Exact("/v1/activities/types"), ActionName::Fixed("activity:list_types")),
    rule(MethodMatch::Get, PathMatch::Exact("/v1/activities/pending"), ActionName::Fixed("activity:list_pending")),
    rule(MethodMatch::Any, PathMatch::Segment("submit"), ActionName::OnResource("submit")),
    rule(MethodMatch::Any, PathMatch::Segment("start"), ActionName::OnResource("start")),
    rule(MethodMatch::Any, PathMatch::Segment("complete"), ActionName::OnResource("complete")),
    rule(MethodMatch::Any, PathMatch::Segment("approve"), ActionName::OnResource("approve")),
    rule(MethodMatch::Any, PathMatch::Segment("reject"), ActionName::OnResource("reject")),
    rule(MethodMatch::Any, PathMatch::Segment("check-in"), ActionName::Fixed("attendance:checkin")),
    rule(MethodMatch::Any, PathMatch::Segment("check-out"), ActionName::Fixed("attendance:checkout")),
    rule(
        MethodMatch::Any,
        PathMatch::SegmentUnder { prefix: "/v1/attendance", segment: "register" },
        ActionName::Fixed("attendance:register"),
    ),
    rule(MethodMatch::Post, PathMatch::Segment("qr-code"), ActionName::Fixed("attendance:generate_qr")),
    rule(MethodMatch::Get, PathMatch::Segment("qr-code"), ActionName::Fixed("attendance:validate_qr")),
    rule(MethodMatch::Get, PathMatch::Prefix("/v1/attendance/activity"), ActionName::Fixed("attendance:view")),
];

pub(crate) fn under_prefix(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

pub fn resource_type(path: &str) -> &'static str {
    let path = normalize(path);
    RESOURCE_PREFIXES
        .iter()
        .filter(|(prefix, _)| under_prefix(path, prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, resource)| *resource)
        .unwrap_or(UNKNOWN_RESOURCE)
}

pub fn method_verb(method: &Method) -> &'static str {
    match method.as_str() {
        "POST" => "create",
        "PUT" | "PATCH" => "update",
        "DELETE" => "delete",
        _ => "read",
    }
}

pub fn derive_action(method: &Method, path: &str) -> String {
    let path = normalize(path);
    let matched = ACTION_RULES
        .iter()
        .find(|rule| rule.method.matches(method) && rule.path.matches(path));

    match matched.map(|rule| rule.action) {
        Some(ActionName::Fixed(name)) => name.to_string(),
        Some(ActionName::OnResource(verb)) => format!("{}:{}", resource_type(path), verb),
        None => format!("{}:{}", resource_type(path), method_verb(method)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(method: Method, path: &str) -> String {
        derive_action(&method, path)
    }

    #[test]
    fn exact_paths_take_precedence() {
        assert_eq!(action(Method::GET, "/v1/users/me"), "user:read_self");
        assert_eq!(action(Method::PATCH, "/v1/users/me"), "user:update_self");
        assert_eq!(action(Method::GET, "/v1/users"), "user:list");
        assert_eq!(action(Method::GET, "/v1/activities/"), "activity:list");
        assert_eq!(action(Method::GET, "/v1/activities/types"), "activity:list_types");
        assert_eq!(action(Method::GET, "/v1/activities/pending"), "activity:list_pending");
    }

    #[test]
    fn generic_rule_uses_method_verb() {
        let id = "5f1c1a8e-0000-4000-8000-000000000001";
        assert_eq!(action(Method::POST, "/v1/activities"), "activity:create");
        assert_eq!(action(Method::GET, &format!("/v1/activities/{id}")), "activity:read");
        assert_eq!(action(Method::PUT, &format!("/v1/activities/{id}")), "activity:update");
        assert_eq!(action(Method::DELETE, &format!("/v1/activities/{id}")), "activity:delete");
        assert_eq!(action(Method::GET, &format!("/v1/users/{id}")), "user:read");
        assert_eq!(action(Method::GET, "/v1/other"), "unknown:read");
    }

    #[test]
    fn workflow_overrides() {
        let base = "/v1/activities/5f1c1a8e-0000-4000-8000-000000000001";
        assert_eq!(action(Method::POST, &format!("{base}/submit")), "activity:submit");
        assert_eq!(action(Method::POST, &format!("{base}/approve")), "activity:approve");
        assert_eq!(action(Method::POST, &format!("{base}/reject")), "activity:reject");
        assert_eq!(action(Method::POST, &format!("{base}/start")), "activity:start");
        assert_eq!(action(Method::POST, &format!("{base}/complete")), "activity:complete");
        assert_eq!(action(Method::GET, &format!("{base}/participants")), "activity:read");
    }

    #[test]
    fn attendance_overrides() {
        assert_eq!(action(Method::POST, "/v1/attendance/check-in"), "attendance:checkin");
        assert_eq!(action(Method::POST, "/v1/attendance/check-out"), "attendance:checkout");
        assert_eq!(action(Method::POST, "/v1/attendance/register"), "attendance:register");
        assert_eq!(action(Method::POST, "/v1/attendance/qr-code"), "attendance:generate_qr");
        assert_eq!(action(Method::GET, "/v1/attendance/qr-code/abc.def.ghi"), "attendance:validate_qr");
        assert_eq!(action(Method::GET, "/v1/attendance/activity/x"), "attendance:view");
        assert_eq!(action(Method::GET, "/v1/attendance/activity/x/stats"), "attendance:view");
    }

    #[test]
    fn register_outside_attendance_is_generic() {
        assert_eq!(action(Method::POST, "/v1/auth/register"), "unknown:create");
    }

    #[test]
    fn prefixes_respect_segment_boundaries() {
        assert_eq!(resource_type("/v1/usersx"), "unknown");
        assert_eq!(resource_type("/v1/users"), "user");
        assert_eq!(resource_type("/v1/attendance/activity/1"), "attendance");
    }
}
