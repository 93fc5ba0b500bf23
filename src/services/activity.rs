use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::authz::Subject;
use crate::db::counters::next_case_number;
use crate::errors::AppError;
use crate::events::{self, AuditEntry, RequestContext};
use crate::models::activity::{
    ActivityCase, ActivityCreateRequest, ActivityListQuery, ActivityStatus, ActivityType, ActivityUpdateRequest,
    DbActivityCase, DbActivityType, Participant, TransitionError, ACTIVITY_COLUMNS,
};
use crate::models::approval::{ApprovalWorkflowEntry, DbApprovalWorkflowEntry, WorkflowAction};
use crate::models::response::page_window;
use crate::utils::utc_now;

#[derive(thiserror::Error, Debug)]
pub enum ActivityError {
    #[error("Activity not found")]
    NotFound,
    #[error("Only the creator can {0} this activity")]
    NotCreator(&'static str),
    #[error("Only the creator or an administrator can {0} this activity")]
    NotCreatorOrAdmin(&'static str),
    #[error("Only DRAFT activities can be updated")]
    NotDraft,
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("{0}")]
    Validation(String),
    #[error("Activity was modified concurrently, retry the request")]
    Concurrent,
    #[error("No activity types available")]
    NoActivityTypes,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    App(#[from] AppError),
}

impl From<ActivityError> for AppError {
    fn from(err: ActivityError) -> Self {
        match err {
            ActivityError::NotFound => AppError::not_found(err.to_string()),
            ActivityError::NotCreator(_) | ActivityError::NotCreatorOrAdmin(_) => AppError::forbidden(err.to_string()),
            ActivityError::NotDraft => AppError::rule(StatusCode::BAD_REQUEST, "INVALID_STATUS", err.to_string()),
            ActivityError::Transition(_) => {
                AppError::rule(StatusCode::BAD_REQUEST, "INVALID_TRANSITION", err.to_string())
            }
            ActivityError::Validation(msg) => AppError::bad_request(msg),
            ActivityError::Concurrent => AppError::conflict(err.to_string()),
            ActivityError::NoActivityTypes => AppError::internal(err.to_string()),
            ActivityError::Database(e) => AppError::Database(e),
            ActivityError::App(e) => e,
        }
    }
}

/// Lifecycle operations that move a case along the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Submit,
    Start,
    Complete,
    Cancel,
}

impl Lifecycle {
    pub fn target(&self) -> ActivityStatus {
        match self {
            Lifecycle::Submit => ActivityStatus::PendingApproval,
            Lifecycle::Start => ActivityStatus::InProgress,
            Lifecycle::Complete => ActivityStatus::Completed,
            Lifecycle::Cancel => ActivityStatus::Cancelled,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Lifecycle::Submit => "submit",
            Lifecycle::Start => "start",
            Lifecycle::Complete => "complete",
            Lifecycle::Cancel => "delete",
        }
    }

    fn audit_action(&self) -> &'static str {
        match self {
            Lifecycle::Submit => "activity:submit",
            Lifecycle::Start => "activity:start",
            Lifecycle::Complete => "activity:complete",
            Lifecycle::Cancel => "activity:delete",
        }
    }

    fn workflow_action(&self) -> Option<WorkflowAction> {
        match self {
            Lifecycle::Submit => Some(WorkflowAction::Submitted),
            Lifecycle::Cancel => Some(WorkflowAction::Cancelled),
            Lifecycle::Start | Lifecycle::Complete => None,
        }
    }

    /// Submit is creator-only; the rest also admit administrators.
    fn check_actor(&self, activity: &ActivityCase, actor: &Subject) -> Result<(), ActivityError> {
        let is_creator = activity.creator_id == actor.id;
        match self {
            Lifecycle::Submit if !is_creator => Err(ActivityError::NotCreator(self.verb())),
            _ if !is_creator && !actor.is_admin() => Err(ActivityError::NotCreatorOrAdmin(self.verb())),
            _ => Ok(()),
        }
    }
}

fn validate_dates(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), ActivityError> {
    if end <= start {
        return Err(ActivityError::Validation("end_date must be after start_date".into()));
    }
    Ok(())
}

fn validate_len(field: &str, value: &str, min: usize, max: Option<usize>) -> Result<(), ActivityError> {
    let len = value.trim().chars().count();
    if len < min {
        return Err(ActivityError::Validation(format!("{field} must be at least {min} characters")));
    }
    if let Some(max) = max {
        if len > max {
            return Err(ActivityError::Validation(format!("{field} must be at most {max} characters")));
        }
    }
    Ok(())
}

fn validate_capacity(max_participants: i64) -> Result<(), ActivityError> {
    if !(1..=10_000).contains(&max_participants) {
        return Err(ActivityError::Validation(
            "max_participants must be between 1 and 10000".into(),
        ));
    }
    Ok(())
}

pub async fn find(pool: &SqlitePool, id: Uuid) -> Result<Option<ActivityCase>, AppError> {
    let mut conn = pool.acquire().await?;
    find_in(&mut conn, id).await
}

pub async fn find_in(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<ActivityCase>, AppError> {
    let row = sqlx::query_as::<_, DbActivityCase>(&format!(
        "SELECT {ACTIVITY_COLUMNS} FROM activity_cases WHERE id = ?"
    ))
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(ActivityCase::try_from).transpose()
}

pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<ActivityCase, ActivityError> {
    find(pool, id).await?.ok_or(ActivityError::NotFound)
}

/// Requested type, or the first type by name when it is missing or unknown.
async fn resolve_type(conn: &mut SqliteConnection, requested: Option<Uuid>) -> Result<ActivityType, ActivityError> {
    if let Some(id) = requested {
        let found = sqlx::query_as::<_, DbActivityType>(
            "SELECT id, name, description, requires_approval, default_risk_level FROM activity_types WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
        if let Some(row) = found {
            return Ok(ActivityType::try_from(row)?);
        }
    }

    let first = sqlx::query_as::<_, DbActivityType>(
        "SELECT id, name, description, requires_approval, default_risk_level FROM activity_types ORDER BY name LIMIT 1",
    )
    .fetch_optional(&mut *conn)
    .await?;

    match first {
        Some(row) => Ok(ActivityType::try_from(row)?),
        None => Err(ActivityError::NoActivityTypes),
    }
}

pub async fn create(
    pool: &SqlitePool,
    creator: &Subject,
    req: ActivityCreateRequest,
    ctx: &RequestContext,
) -> Result<ActivityCase, ActivityError> {
    validate_len("title", &req.title, 5, Some(200))?;
    validate_len("description", &req.description, 10, None)?;
    validate_len("location", &req.location, 3, Some(200))?;
    validate_capacity(req.max_participants)?;
    validate_dates(req.start_date, req.end_date)?;

    let now = utc_now();
    let id = Uuid::new_v4();
    let mut tx = pool.begin().await?;

    // the sequence bump is the first write and serialises concurrent creates
    let case_number = next_case_number(&mut tx).await?;
    let activity_type = resolve_type(&mut tx, req.activity_type_id).await?;
    let risk_level = req.risk_level.unwrap_or(activity_type.default_risk_level);

    sqlx::query(
        r#"
        INSERT INTO activity_cases (id, case_number, title, description, activity_type_id, status, risk_level, start_date, end_date, location, venue_details, max_participants, current_participants, creator_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(&case_number)
    .bind(req.title.trim())
    .bind(req.description.trim())
    .bind(activity_type.id.to_string())
    .bind(ActivityStatus::Draft.as_str())
    .bind(risk_level.as_str())
    .bind(req.start_date)
    .bind(req.end_date)
    .bind(req.location.trim())
    .bind(&req.venue_details)
    .bind(req.max_participants)
    .bind(creator.id.to_string())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let activity = find_in(&mut tx, id).await?.ok_or(ActivityError::NotFound)?;
    let entry = AuditEntry::change("activity:create", creator.id, &activity, None).context(ctx);
    events::append(&mut tx, &entry).await?;
    tx.commit().await?;

    tracing::info!(activity_id = %id, case_number = %case_number, creator_id = %creator.id, "activity created");
    Ok(activity)
}

pub async fn update(
    pool: &SqlitePool,
    id: Uuid,
    actor: &Subject,
    req: ActivityUpdateRequest,
    ctx: &RequestContext,
) -> Result<ActivityCase, ActivityError> {
    let current = get(pool, id).await?;

    if current.status != ActivityStatus::Draft {
        return Err(ActivityError::NotDraft);
    }
    if current.creator_id != actor.id {
        return Err(ActivityError::NotCreator("update"));
    }

    if let Some(title) = &req.title {
        validate_len("title", title, 5, Some(200))?;
    }
    if let Some(description) = &req.description {
        validate_len("description", description, 10, None)?;
    }
    if let Some(location) = &req.location {
        validate_len("location", location, 3, Some(200))?;
    }

    // partial updates are checked against the unchanged counterpart
    let start_date = req.start_date.unwrap_or(current.start_date);
    let end_date = req.end_date.unwrap_or(current.end_date);
    validate_dates(start_date, end_date)?;

    let max_participants = req.max_participants.unwrap_or(current.max_participants);
    validate_capacity(max_participants)?;
    if max_participants < current.current_participants {
        return Err(ActivityError::Validation(
            "max_participants cannot be less than current participants".into(),
        ));
    }

    let mut tx = pool.begin().await?;
    let updated = sqlx::query(
        r#"
        UPDATE activity_cases
        SET title = ?, description = ?, start_date = ?, end_date = ?, location = ?, venue_details = ?, max_participants = ?, updated_at = ?
        WHERE id = ? AND status = ? AND current_participants <= ?
        "#,
    )
    .bind(req.title.as_deref().map(str::trim).unwrap_or(&current.title))
    .bind(req.description.as_deref().map(str::trim).unwrap_or(&current.description))
    .bind(start_date)
    .bind(end_date)
    .bind(req.location.as_deref().map(str::trim).unwrap_or(&current.location))
    .bind(req.venue_details.as_deref().or(current.venue_details.as_deref()))
    .bind(max_participants)
    .bind(utc_now())
    .bind(id.to_string())
    .bind(ActivityStatus::Draft.as_str())
    .bind(max_participants)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() != 1 {
        return Err(ActivityError::Concurrent);
    }

    let activity = find_in(&mut tx, id).await?.ok_or(ActivityError::NotFound)?;
    let entry = AuditEntry::change("activity:update", actor.id, &activity, Some(&current)).context(ctx);
    events::append(&mut tx, &entry).await?;
    tx.commit().await?;

    Ok(activity)
}

/// Compare-and-set on the status column; `false` when another writer got there first.
pub(crate) async fn set_status(
    conn: &mut SqliteConnection,
    id: Uuid,
    from: ActivityStatus,
    to: ActivityStatus,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE activity_cases SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
        .bind(to.as_str())
        .bind(now)
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

pub(crate) async fn append_workflow(
    conn: &mut SqliteConnection,
    activity_id: Uuid,
    action: WorkflowAction,
    actor_id: Uuid,
    comment: Option<&str>,
    previous: ActivityStatus,
    next: ActivityStatus,
    at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO approval_workflows (id, activity_id, action, actor_id, comment, action_at, previous_status, new_status)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(activity_id.to_string())
    .bind(action.as_str())
    .bind(actor_id.to_string())
    .bind(comment)
    .bind(at)
    .bind(previous.as_str())
    .bind(next.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn transition(
    pool: &SqlitePool,
    id: Uuid,
    actor: &Subject,
    op: Lifecycle,
    ctx: &RequestContext,
) -> Result<ActivityCase, ActivityError> {
    let current = get(pool, id).await?;
    op.check_actor(&current, actor)?;
    let target = current.status.transition_to(op.target())?;

    let now = utc_now();
    let mut tx = pool.begin().await?;
    if !set_status(&mut tx, id, current.status, target, now).await? {
        return Err(ActivityError::Concurrent);
    }

    if let Some(action) = op.workflow_action() {
        append_workflow(&mut tx, id, action, actor.id, None, current.status, target, now).await?;
    }

    let activity = find_in(&mut tx, id).await?.ok_or(ActivityError::NotFound)?;
    let entry = AuditEntry::change(op.audit_action(), actor.id, &activity, Some(&current)).context(ctx);
    events::append(&mut tx, &entry).await?;
    tx.commit().await?;

    tracing::info!(
        activity_id = %id,
        user_id = %actor.id,
        from = %current.status,
        to = %target,
        "activity status changed"
    );
    Ok(activity)
}

fn push_filters<'a>(builder: &mut QueryBuilder<'a, Sqlite>, query: &'a ActivityListQuery) {
    builder.push(" WHERE 1 = 1");
    if let Some(status) = query.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(creator_id) = query.creator_id {
        builder.push(" AND creator_id = ").push_bind(creator_id.to_string());
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{search}%");
        builder
            .push(" AND (title LIKE ")
            .push_bind(pattern.clone())
            .push(" OR description LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub async fn list(pool: &SqlitePool, query: &ActivityListQuery) -> Result<(Vec<ActivityCase>, i64, i64, i64), AppError> {
    let (page, per_page, offset) = page_window(query.page, query.per_page);

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM activity_cases");
    push_filters(&mut count, query);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {ACTIVITY_COLUMNS} FROM activity_cases"));
    push_filters(&mut select, query);
    select
        .push(" ORDER BY created_at DESC, case_number DESC LIMIT ")
        .push_bind(per_page)
        .push(" OFFSET ")
        .push_bind(offset);

    let rows: Vec<DbActivityCase> = select.build_query_as().fetch_all(pool).await?;
    let items = rows
        .into_iter()
        .map(ActivityCase::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok((items, total, page, per_page))
}

pub async fn list_pending(
    pool: &SqlitePool,
    page: Option<i64>,
    per_page: Option<i64>,
) -> Result<(Vec<ActivityCase>, i64, i64, i64), AppError> {
    let query = ActivityListQuery {
        page,
        per_page,
        status: Some(ActivityStatus::PendingApproval),
        ..Default::default()
    };
    list(pool, &query).await
}

pub async fn list_types(pool: &SqlitePool) -> Result<Vec<ActivityType>, AppError> {
    let rows = sqlx::query_as::<_, DbActivityType>(
        "SELECT id, name, description, requires_approval, default_risk_level FROM activity_types ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ActivityType::try_from).collect()
}

pub async fn participants(pool: &SqlitePool, id: Uuid) -> Result<Vec<Participant>, ActivityError> {
    get(pool, id).await?;

    let rows: Vec<(String, String, String, String)> = sqlx::query_as(
        r#"
        SELECT u.id, u.username, u.full_name, u.email
        FROM attendance_records a
        JOIN users u ON u.id = a.user_id
        WHERE a.activity_id = ?
        ORDER BY a.registered_at, u.username
        "#,
    )
    .bind(id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(user_id, username, full_name, email)| -> Result<Participant, ActivityError> {
            Ok(Participant {
                id: crate::db::row_parsers::parse_uuid(&user_id)?,
                username,
                full_name,
                email,
            })
        })
        .collect()
}

pub async fn history(pool: &SqlitePool, id: Uuid) -> Result<Vec<ApprovalWorkflowEntry>, ActivityError> {
    get(pool, id).await?;

    let rows = sqlx::query_as::<_, DbApprovalWorkflowEntry>(
        r#"
        SELECT id, activity_id, action, actor_id, comment, action_at, previous_status, new_status
        FROM approval_workflows
        WHERE activity_id = ?
        ORDER BY rowid
        "#,
    )
    .bind(id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(ApprovalWorkflowEntry::try_from)
        .collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::Role;
    use chrono::Duration;

    fn activity(creator: Uuid, status: ActivityStatus) -> ActivityCase {
        let now = Utc::now();
        ActivityCase {
            id: Uuid::new_v4(),
            case_number: "C-0001".into(),
            title: "Hiking".into(),
            description: "A long walk".into(),
            activity_type_id: Uuid::new_v4(),
            status,
            risk_level: crate::models::activity::RiskLevel::Low,
            start_date: now,
            end_date: now + Duration::hours(2),
            location: "Park".into(),
            venue_details: None,
            max_participants: 10,
            current_participants: 0,
            creator_id: creator,
            approved_by_id: None,
            approved_at: None,
            rejected_by_id: None,
            rejected_at: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn submit_is_creator_only_even_for_admins() {
        let creator = Uuid::new_v4();
        let case = activity(creator, ActivityStatus::Draft);
        let admin = Subject::new(Uuid::new_v4(), Role::Admin);

        assert!(matches!(
            Lifecycle::Submit.check_actor(&case, &admin),
            Err(ActivityError::NotCreator("submit"))
        ));
        assert!(Lifecycle::Cancel.check_actor(&case, &admin).is_ok());
        assert!(Lifecycle::Submit
            .check_actor(&case, &Subject::new(creator, Role::User))
            .is_ok());
    }

    #[test]
    fn strangers_cannot_start_or_complete() {
        let case = activity(Uuid::new_v4(), ActivityStatus::Approved);
        let stranger = Subject::new(Uuid::new_v4(), Role::User);
        assert!(Lifecycle::Start.check_actor(&case, &stranger).is_err());
        assert!(Lifecycle::Complete.check_actor(&case, &stranger).is_err());
    }

    #[test]
    fn date_and_length_rules() {
        let now = Utc::now();
        assert!(validate_dates(now, now).is_err());
        assert!(validate_dates(now, now + Duration::seconds(1)).is_ok());
        assert!(validate_len("title", "abcd", 5, Some(200)).is_err());
        assert!(validate_len("title", "  abcde  ", 5, Some(200)).is_ok());
        assert!(validate_capacity(0).is_err());
        assert!(validate_capacity(10_001).is_err());
    }

    #[test]
    fn errors_map_to_status_codes() {
        let transition = ActivityStatus::Completed
            .transition_to(ActivityStatus::Cancelled)
            .unwrap_err();
        assert_eq!(AppError::from(ActivityError::from(transition)).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::from(ActivityError::NotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::from(ActivityError::NotCreator("update")).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::from(ActivityError::Concurrent).status(), StatusCode::CONFLICT);
    }
}
