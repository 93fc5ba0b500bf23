use axum::http::StatusCode;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::activity::{self, append_workflow};
use crate::authz::Subject;
use crate::errors::AppError;
use crate::events::{self, AuditEntry, AuditStatus, RequestContext};
use crate::models::activity::{ActivityCase, ActivityStatus};
use crate::models::approval::WorkflowAction;
use crate::utils::utc_now;

pub const MIN_REJECTION_REASON: usize = 10;

#[derive(thiserror::Error, Debug)]
pub enum ApprovalError {
    #[error("Activity not found")]
    NotFound,
    #[error("Activity is not pending approval")]
    NotPending,
    #[error("Separation of Duties: Cannot approve or reject your own activity")]
    SelfApprovalForbidden,
    #[error("Rejection reason must be at least {MIN_REJECTION_REASON} characters")]
    ReasonTooShort,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    App(#[from] AppError),
}

impl From<ApprovalError> for AppError {
    fn from(err: ApprovalError) -> Self {
        match err {
            ApprovalError::NotFound => AppError::not_found(err.to_string()),
            ApprovalError::NotPending => AppError::rule(StatusCode::BAD_REQUEST, "NOT_PENDING", err.to_string()),
            ApprovalError::SelfApprovalForbidden => AppError::rule(
                StatusCode::FORBIDDEN,
                "SELF_APPROVAL_FORBIDDEN",
                err.to_string(),
            ),
            ApprovalError::ReasonTooShort => AppError::bad_request(err.to_string()),
            ApprovalError::Database(e) => AppError::Database(e),
            ApprovalError::App(e) => e,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Approve { comment: Option<String> },
    Reject { reason: String },
}

impl Verdict {
    fn target(&self) -> ActivityStatus {
        match self {
            Verdict::Approve { .. } => ActivityStatus::Approved,
            Verdict::Reject { .. } => ActivityStatus::Rejected,
        }
    }

    fn audit_action(&self) -> &'static str {
        match self {
            Verdict::Approve { .. } => "activity:approve",
            Verdict::Reject { .. } => "activity:reject",
        }
    }

    fn workflow_action(&self) -> WorkflowAction {
        match self {
            Verdict::Approve { .. } => WorkflowAction::Approved,
            Verdict::Reject { .. } => WorkflowAction::Rejected,
        }
    }

    fn comment(&self) -> Option<&str> {
        match self {
            Verdict::Approve { comment } => comment.as_deref(),
            Verdict::Reject { reason } => Some(reason),
        }
    }
}

/// Pending state first, then separation of duties.
pub fn check_preconditions(activity: &ActivityCase, actor_id: Uuid) -> Result<(), ApprovalError> {
    if activity.status != ActivityStatus::PendingApproval {
        return Err(ApprovalError::NotPending);
    }
    if activity.creator_id == actor_id {
        return Err(ApprovalError::SelfApprovalForbidden);
    }
    Ok(())
}

async fn decide_inner(
    pool: &SqlitePool,
    activity_id: Uuid,
    actor: &Subject,
    verdict: &Verdict,
    ctx: &RequestContext,
) -> Result<ActivityCase, ApprovalError> {
    if let Verdict::Reject { reason } = verdict {
        if reason.trim().chars().count() < MIN_REJECTION_REASON {
            return Err(ApprovalError::ReasonTooShort);
        }
    }

    let current = activity::find(pool, activity_id).await?.ok_or(ApprovalError::NotFound)?;
    check_preconditions(&current, actor.id)?;

    let now = utc_now();
    let mut tx = pool.begin().await?;

    let updated = match verdict {
        Verdict::Approve { .. } => sqlx::query(
            "UPDATE activity_cases SET status = ?, approved_by_id = ?, approved_at = ?, updated_at = ? \
             WHERE id = ? AND status = ? AND creator_id <> ?",
        )
        .bind(ActivityStatus::Approved.as_str())
        .bind(actor.id.to_string())
        .bind(now)
        .bind(now)
        .bind(activity_id.to_string())
        .bind(ActivityStatus::PendingApproval.as_str())
        .bind(actor.id.to_string())
        .execute(&mut *tx)
        .await?,
        Verdict::Reject { reason } => sqlx::query(
            "UPDATE activity_cases SET status = ?, rejected_by_id = ?, rejected_at = ?, rejection_reason = ?, updated_at = ? \
             WHERE id = ? AND status = ? AND creator_id <> ?",
        )
        .bind(ActivityStatus::Rejected.as_str())
        .bind(actor.id.to_string())
        .bind(now)
        .bind(reason.trim())
        .bind(now)
        .bind(activity_id.to_string())
        .bind(ActivityStatus::PendingApproval.as_str())
        .bind(actor.id.to_string())
        .execute(&mut *tx)
        .await?,
    };

    if updated.rows_affected() != 1 {
        // lost the race to another decision
        return Err(ApprovalError::NotPending);
    }

    append_workflow(
        &mut tx,
        activity_id,
        verdict.workflow_action(),
        actor.id,
        verdict.comment(),
        ActivityStatus::PendingApproval,
        verdict.target(),
        now,
    )
    .await?;

    let activity = activity::find_in(&mut tx, activity_id)
        .await?
        .ok_or(ApprovalError::NotFound)?;
    let entry = AuditEntry::change(verdict.audit_action(), actor.id, &activity, Some(&current)).context(ctx);
    events::append(&mut tx, &entry).await?;
    tx.commit().await?;

    Ok(activity)
}

/// Approve or reject a pending case. Refused attempts are recorded in the
/// audit trail with status FAILURE.
pub async fn decide(
    pool: &SqlitePool,
    activity_id: Uuid,
    actor: &Subject,
    verdict: Verdict,
    ctx: &RequestContext,
) -> Result<ActivityCase, ApprovalError> {
    match decide_inner(pool, activity_id, actor, &verdict, ctx).await {
        Ok(activity) => {
            tracing::info!(
                activity_id = %activity_id,
                user_id = %actor.id,
                action = verdict.audit_action(),
                "approval decision recorded"
            );
            Ok(activity)
        }
        Err(err) => {
            if matches!(
                err,
                ApprovalError::NotPending | ApprovalError::SelfApprovalForbidden | ApprovalError::ReasonTooShort
            ) {
                let entry = AuditEntry::new(verdict.audit_action(), "activity")
                    .actor(Some(actor.id))
                    .resource(activity_id)
                    .context(ctx)
                    .failed(AuditStatus::Failure, err.to_string());
                events::record_best_effort(pool, entry).await;
            }
            Err(err)
        }
    }
}

pub async fn approve(
    pool: &SqlitePool,
    activity_id: Uuid,
    actor: &Subject,
    comment: Option<String>,
    ctx: &RequestContext,
) -> Result<ActivityCase, ApprovalError> {
    decide(pool, activity_id, actor, Verdict::Approve { comment }, ctx).await
}

pub async fn reject(
    pool: &SqlitePool,
    activity_id: Uuid,
    actor: &Subject,
    reason: String,
    ctx: &RequestContext,
) -> Result<ActivityCase, ApprovalError> {
    decide(pool, activity_id, actor, Verdict::Reject { reason }, ctx).await
}
