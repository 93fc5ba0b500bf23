use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::row_parsers::{parse_enum, parse_uuid};
use crate::errors::AppError;
use crate::models::activity::ActivityStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowAction {
    Submitted,
    Approved,
    Rejected,
    RevisionRequested,
    Cancelled,
}

impl WorkflowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowAction::Submitted => "SUBMITTED",
            WorkflowAction::Approved => "APPROVED",
            WorkflowAction::Rejected => "REJECTED",
            WorkflowAction::RevisionRequested => "REVISION_REQUESTED",
            WorkflowAction::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for WorkflowAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBMITTED" => Ok(WorkflowAction::Submitted),
            "APPROVED" => Ok(WorkflowAction::Approved),
            "REJECTED" => Ok(WorkflowAction::Rejected),
            "REVISION_REQUESTED" => Ok(WorkflowAction::RevisionRequested),
            "CANCELLED" => Ok(WorkflowAction::Cancelled),
            other => Err(format!("unknown workflow action '{other}'")),
        }
    }
}

/// Append-only history entry for an activity decision.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApprovalWorkflowEntry {
    pub id: Uuid,
    pub activity_id: Uuid,
    pub action: WorkflowAction,
    pub actor_id: Uuid,
    pub comment: Option<String>,
    pub action_at: DateTime<Utc>,
    pub previous_status: Option<ActivityStatus>,
    pub new_status: Option<ActivityStatus>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbApprovalWorkflowEntry {
    pub id: String,
    pub activity_id: String,
    pub action: String,
    pub actor_id: String,
    pub comment: Option<String>,
    pub action_at: DateTime<Utc>,
    pub previous_status: Option<String>,
    pub new_status: Option<String>,
}

impl TryFrom<DbApprovalWorkflowEntry> for ApprovalWorkflowEntry {
    type Error = AppError;

    fn try_from(value: DbApprovalWorkflowEntry) -> Result<Self, Self::Error> {
        Ok(ApprovalWorkflowEntry {
            id: parse_uuid(&value.id)?,
            activity_id: parse_uuid(&value.activity_id)?,
            action: parse_enum(&value.action)?,
            actor_id: parse_uuid(&value.actor_id)?,
            comment: value.comment,
            action_at: value.action_at,
            previous_status: value.previous_status.as_deref().map(parse_enum).transpose()?,
            new_status: value.new_status.as_deref().map(parse_enum).transpose()?,
        })
    }
}
