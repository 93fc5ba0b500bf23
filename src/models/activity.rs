use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::row_parsers::{parse_enum, parse_opt_uuid, parse_uuid};
use crate::errors::AppError;
use crate::events::Auditable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityStatus {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid status transition from {from} to {to}")]
pub struct TransitionError {
    pub from: ActivityStatus,
    pub to: ActivityStatus,
}

impl ActivityStatus {
    pub const ALL: [ActivityStatus; 7] = [
        ActivityStatus::Draft,
        ActivityStatus::PendingApproval,
        ActivityStatus::Approved,
        ActivityStatus::Rejected,
        ActivityStatus::InProgress,
        ActivityStatus::Completed,
        ActivityStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Draft => "DRAFT",
            ActivityStatus::PendingApproval => "PENDING_APPROVAL",
            ActivityStatus::Approved => "APPROVED",
            ActivityStatus::Rejected => "REJECTED",
            ActivityStatus::InProgress => "IN_PROGRESS",
            ActivityStatus::Completed => "COMPLETED",
            ActivityStatus::Cancelled => "CANCELLED",
        }
    }

    /// Transition table of the activity case lifecycle.
    pub fn allowed_targets(&self) -> &'static [ActivityStatus] {
        match self {
            ActivityStatus::Draft => &[ActivityStatus::PendingApproval, ActivityStatus::Cancelled],
            ActivityStatus::PendingApproval => &[ActivityStatus::Approved, ActivityStatus::Rejected],
            ActivityStatus::Approved => &[ActivityStatus::InProgress, ActivityStatus::Cancelled],
            ActivityStatus::InProgress => &[ActivityStatus::Completed],
            ActivityStatus::Rejected | ActivityStatus::Completed | ActivityStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: ActivityStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn transition_to(self, target: ActivityStatus) -> Result<ActivityStatus, TransitionError> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(TransitionError { from: self, to: target })
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_targets().is_empty()
    }

    /// Registration and check-in are only open in these states.
    pub fn is_open_for_attendance(&self) -> bool {
        matches!(self, ActivityStatus::Approved | ActivityStatus::InProgress)
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActivityStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown activity status '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(RiskLevel::Low),
            "MEDIUM" => Ok(RiskLevel::Medium),
            "HIGH" => Ok(RiskLevel::High),
            "CRITICAL" => Ok(RiskLevel::Critical),
            other => Err(format!("unknown risk level '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ActivityCase {
    pub id: Uuid,
    #[schema(example = "C-0001")]
    pub case_number: String,
    pub title: String,
    pub description: String,
    pub activity_type_id: Uuid,
    pub status: ActivityStatus,
    pub risk_level: RiskLevel,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub location: String,
    pub venue_details: Option<String>,
    pub max_participants: i64,
    pub current_participants: i64,
    pub creator_id: Uuid,
    pub approved_by_id: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by_id: Option<Uuid>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActivityCase {
    /// Minimal projection handed to the policy decision point.
    pub fn policy_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "activity",
            "id": self.id,
            "creator_id": self.creator_id,
            "status": self.status,
            "risk_level": self.risk_level,
        })
    }
}

impl Auditable for ActivityCase {
    fn resource_type() -> &'static str {
        "activity"
    }

    fn resource_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbActivityCase {
    pub id: String,
    pub case_number: String,
    pub title: String,
    pub description: String,
    pub activity_type_id: String,
    pub status: String,
    pub risk_level: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub location: String,
    pub venue_details: Option<String>,
    pub max_participants: i64,
    pub current_participants: i64,
    pub creator_id: String,
    pub approved_by_id: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by_id: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const ACTIVITY_COLUMNS: &str = "id, case_number, title, description, activity_type_id, status, risk_level, start_date, end_date, location, venue_details, max_participants, current_participants, creator_id, approved_by_id, approved_at, rejected_by_id, rejected_at, rejection_reason, created_at, updated_at";

impl TryFrom<DbActivityCase> for ActivityCase {
    type Error = AppError;

    fn try_from(value: DbActivityCase) -> Result<Self, Self::Error> {
        Ok(ActivityCase {
            id: parse_uuid(&value.id)?,
            case_number: value.case_number,
            title: value.title,
            description: value.description,
            activity_type_id: parse_uuid(&value.activity_type_id)?,
            status: parse_enum(&value.status)?,
            risk_level: parse_enum(&value.risk_level)?,
            start_date: value.start_date,
            end_date: value.end_date,
            location: value.location,
            venue_details: value.venue_details,
            max_participants: value.max_participants,
            current_participants: value.current_participants,
            creator_id: parse_uuid(&value.creator_id)?,
            approved_by_id: parse_opt_uuid(value.approved_by_id.as_deref())?,
            approved_at: value.approved_at,
            rejected_by_id: parse_opt_uuid(value.rejected_by_id.as_deref())?,
            rejected_at: value.rejected_at,
            rejection_reason: value.rejection_reason,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ActivityType {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub requires_approval: bool,
    pub default_risk_level: RiskLevel,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbActivityType {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub requires_approval: bool,
    pub default_risk_level: String,
}

impl TryFrom<DbActivityType> for ActivityType {
    type Error = AppError;

    fn try_from(value: DbActivityType) -> Result<Self, Self::Error> {
        Ok(ActivityType {
            id: parse_uuid(&value.id)?,
            name: value.name,
            description: value.description,
            requires_approval: value.requires_approval,
            default_risk_level: parse_enum(&value.default_risk_level)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ActivityCreateRequest {
    #[schema(example = "Mountain Hiking Trip")]
    pub title: String,
    #[schema(example = "A guided hiking trip to the nearby mountains")]
    pub description: String,
    pub activity_type_id: Option<Uuid>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[schema(example = "Mountain Trail Park")]
    pub location: String,
    pub venue_details: Option<String>,
    #[schema(example = 30)]
    pub max_participants: i64,
    pub risk_level: Option<RiskLevel>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ActivityUpdateRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub venue_details: Option<String>,
    pub max_participants: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ApprovalRequest {
    #[schema(example = "Approved with recommendation to bring extra safety equipment")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RejectionRequest {
    #[schema(example = "Risk level too high without proper safety measures in place")]
    pub reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<ActivityStatus>,
    pub creator_id: Option<Uuid>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Participant {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub email: String,
}
