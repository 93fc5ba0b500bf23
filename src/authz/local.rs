use async_trait::async_trait;
use serde_json::Value;

use super::decision::{Decision, PolicyDecisionPoint, PolicyInput};
use super::principal::Role;

/// Built-in role policy used when no remote decision service is configured.
///
/// Evaluation order:
/// 1. ADMIN -> allow
/// 2. GUEST -> read-only catalogue actions
/// 3. USER -> self-service, open actions, creator-scoped actions,
///    attendance actions gated on registration state
/// 4. deny
#[derive(Debug, Clone, Default)]
pub struct LocalPolicy;

const GUEST_ACTIONS: &[&str] = &[
    "activity:read",
    "activity:list",
    "activity:list_types",
    "user:read_self",
];

const USER_OPEN_ACTIONS: &[&str] = &[
    "user:read_self",
    "user:update_self",
    "activity:create",
    "activity:read",
    "activity:list",
    "activity:list_types",
    "attendance:register",
    "attendance:validate_qr",
];

const CREATOR_ACTIONS: &[&str] = &[
    "activity:update",
    "activity:submit",
    "activity:delete",
    "activity:start",
    "activity:complete",
    "attendance:generate_qr",
    "attendance:view",
];

impl LocalPolicy {
    pub fn new() -> Self {
        Self
    }

    fn is_creator(input: &PolicyInput) -> bool {
        let subject_id = input.subject.id.to_string();
        input
            .resource
            .get("creator_id")
            .and_then(Value::as_str)
            .map(|creator| creator == subject_id)
            .unwrap_or(false)
    }

    fn context_flag(input: &PolicyInput, key: &str) -> bool {
        input.context.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// A code that fails its signature check carries no activity to judge
    /// against, so it is passed on and rejected by the consuming handler.
    fn unreadable_qr(input: &PolicyInput) -> bool {
        input.context.get("qr_readable").and_then(Value::as_bool) == Some(false)
    }

    fn decide_user(input: &PolicyInput) -> Decision {
        let action = input.action.as_str();

        if USER_OPEN_ACTIONS.contains(&action) {
            return Decision::allow();
        }

        if CREATOR_ACTIONS.contains(&action) {
            return if Self::is_creator(input) {
                Decision::allow()
            } else {
                Decision::deny(format!("only the activity creator may perform {action}"))
            };
        }

        match action {
            "attendance:checkin" | "attendance:checkout" if Self::unreadable_qr(input) => Decision::allow(),
            "attendance:checkin" if Self::context_flag(input, "is_registered") => Decision::allow(),
            "attendance:checkin" => Decision::deny("user is not registered for this activity"),
            "attendance:checkout" if Self::context_flag(input, "is_checked_in") => Decision::allow(),
            "attendance:checkout" => Decision::deny("user is not checked in to this activity"),
            "activity:approve" | "activity:reject" | "activity:list_pending" => {
                Decision::deny(format!("{action} requires the ADMIN role"))
            }
            _ => Decision::deny(format!("no rule allows {action} for role USER")),
        }
    }
}

#[async_trait]
impl PolicyDecisionPoint for LocalPolicy {
    async fn evaluate(&self, input: &PolicyInput) -> Decision {
        let decision = match &input.subject.role {
            Role::Admin => Decision::allow(),
            Role::Guest if GUEST_ACTIONS.contains(&input.action.as_str()) => Decision::allow(),
            Role::Guest => Decision::deny(format!("role GUEST may not perform {}", input.action)),
            Role::User => Self::decide_user(input),
            Role::Custom(name) => Decision::deny(format!("no policy defined for role {name}")),
        };

        tracing::debug!(
            user_id = %input.subject.id,
            action = %input.action,
            allow = decision.allow,
            "local policy decision"
        );
        decision
    }
}
