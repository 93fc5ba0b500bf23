use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Outcome recorded with every audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditStatus {
    Success,
    Failure,
    /// Refused by the policy decision point before reaching a handler
    Denied,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Failure => "FAILURE",
            AuditStatus::Denied => "DENIED",
        }
    }
}

/// Entities that can appear as the resource of an audit entry.
pub trait Auditable: Serialize + Send + Sync {
    /// Resource type column, e.g. "activity"
    fn resource_type() -> &'static str;

    fn resource_id(&self) -> Uuid;

    /// Value stored in `old_values` / `new_values`.
    fn audit_snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
