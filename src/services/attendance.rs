use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::activity;
use crate::authz::Subject;
use crate::config::CheckInGuard;
use crate::db::counters::{increment_if_below, BoundedCounter, Increment};
use crate::errors::AppError;
use crate::events::{self, AuditEntry, RequestContext};
use crate::jwt::{QrClaims, TokenCodec, TokenError};
use crate::models::attendance::{
    AttendanceRecord, AttendanceSession, AttendanceStats, AttendanceStatus, CheckInRequest, CodeType,
    DbAttendanceRecord, DbQrCode, QrCode, QrCodeCreateRequest, RegistrationRequest, ATTENDANCE_COLUMNS,
    QR_COLUMNS,
};
use crate::utils::{random_token, utc_now};

const DEFAULT_QR_WINDOW_HOURS: i64 = 2;

#[derive(thiserror::Error, Debug)]
pub enum AttendanceError {
    #[error("Activity not found")]
    ActivityNotFound,
    #[error("Activity is not open for registration")]
    NotOpenForRegistration,
    #[error("Already registered for this activity")]
    AlreadyRegistered,
    #[error("Activity is full")]
    ActivityFull,
    #[error("Only the creator or an administrator can generate QR codes for this activity")]
    NotAuthorized,
    #[error("{0}")]
    Validation(String),
    #[error("QR code not found")]
    QrNotFound,
    #[error("QR code has expired")]
    QrExpired,
    #[error("QR code is not valid yet")]
    QrNotYetValid,
    #[error("Invalid QR code")]
    InvalidQr,
    #[error("QR code is inactive")]
    Inactive,
    #[error("QR code cannot be used for {0}")]
    WrongCodeType(&'static str),
    #[error("Gate session has expired")]
    SessionExpired,
    #[error("Activity is not open for attendance")]
    NotOpenForAttendance,
    #[error("Attendance record not found")]
    RecordNotFound,
    #[error("Cannot check in from status {0}")]
    CannotCheckIn(AttendanceStatus),
    #[error("Not checked in")]
    NotCheckedIn,
    #[error("QR code usage limit reached")]
    UsageExhausted,
    #[error("Attendance record was modified concurrently, retry the request")]
    Concurrent,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    App(#[from] AppError),
}

impl From<TokenError> for AttendanceError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AttendanceError::QrExpired,
            TokenError::NotYetValid => AttendanceError::QrNotYetValid,
            TokenError::Signing(msg) => AttendanceError::App(AppError::internal(msg)),
            TokenError::Malformed(_) | TokenError::WrongType { .. } => AttendanceError::InvalidQr,
        }
    }
}

impl From<AttendanceError> for AppError {
    fn from(err: AttendanceError) -> Self {
        let rule = |code: &'static str, err: &AttendanceError| {
            AppError::rule(StatusCode::BAD_REQUEST, code, err.to_string())
        };
        match err {
            AttendanceError::ActivityNotFound | AttendanceError::QrNotFound | AttendanceError::RecordNotFound => {
                AppError::not_found(err.to_string())
            }
            AttendanceError::AlreadyRegistered | AttendanceError::Concurrent => AppError::conflict(err.to_string()),
            AttendanceError::NotAuthorized => AppError::forbidden(err.to_string()),
            AttendanceError::NotOpenForRegistration => rule("NOT_OPEN_FOR_REGISTRATION", &err),
            AttendanceError::ActivityFull => rule("ACTIVITY_FULL", &err),
            AttendanceError::QrExpired => rule("QR_EXPIRED", &err),
            AttendanceError::QrNotYetValid => rule("QR_NOT_YET_VALID", &err),
            AttendanceError::InvalidQr => rule("INVALID_QR_CODE", &err),
            AttendanceError::Inactive => rule("QR_INACTIVE", &err),
            AttendanceError::WrongCodeType(_) => rule("WRONG_CODE_TYPE", &err),
            AttendanceError::SessionExpired => rule("SESSION_EXPIRED", &err),
            AttendanceError::NotOpenForAttendance => rule("NOT_OPEN_FOR_ATTENDANCE", &err),
            AttendanceError::CannotCheckIn(_) => rule("INVALID_STATUS", &err),
            AttendanceError::NotCheckedIn => rule("NOT_CHECKED_IN", &err),
            AttendanceError::UsageExhausted => rule("USAGE_EXHAUSTED", &err),
            AttendanceError::Validation(msg) => AppError::bad_request(msg),
            AttendanceError::Database(e) => AppError::Database(e),
            AttendanceError::App(e) => e,
        }
    }
}

/// QR redemption direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redemption {
    CheckIn,
    CheckOut,
}

impl Redemption {
    fn code_type(&self) -> CodeType {
        match self {
            Redemption::CheckIn => CodeType::CheckIn,
            Redemption::CheckOut => CodeType::CheckOut,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Redemption::CheckIn => "check-in",
            Redemption::CheckOut => "check-out",
        }
    }

    fn audit_action(&self) -> &'static str {
        match self {
            Redemption::CheckIn => "attendance:checkin",
            Redemption::CheckOut => "attendance:checkout",
        }
    }

    fn target(&self) -> AttendanceStatus {
        match self {
            Redemption::CheckIn => AttendanceStatus::CheckedIn,
            Redemption::CheckOut => AttendanceStatus::CheckedOut,
        }
    }

    /// Statuses a record may be in for this redemption to apply.
    pub fn allowed_from(&self, guard: CheckInGuard) -> &'static [AttendanceStatus] {
        match (self, guard) {
            (Redemption::CheckIn, CheckInGuard::Registered) => &[AttendanceStatus::Registered],
            (Redemption::CheckIn, CheckInGuard::Unguarded) => &[
                AttendanceStatus::Registered,
                AttendanceStatus::CheckedIn,
                AttendanceStatus::CheckedOut,
                AttendanceStatus::Absent,
            ],
            (Redemption::CheckOut, _) => &[AttendanceStatus::CheckedIn],
        }
    }

    fn guard_error(&self, current: AttendanceStatus) -> AttendanceError {
        match self {
            Redemption::CheckIn => AttendanceError::CannotCheckIn(current),
            Redemption::CheckOut => AttendanceError::NotCheckedIn,
        }
    }
}

async fn find_record(
    conn: &mut SqliteConnection,
    activity_id: Uuid,
    user_id: Uuid,
) -> Result<Option<AttendanceRecord>, AppError> {
    let row = sqlx::query_as::<_, DbAttendanceRecord>(&format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendance_records WHERE activity_id = ? AND user_id = ?"
    ))
    .bind(activity_id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(AttendanceRecord::try_from).transpose()
}

async fn find_record_by_id(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<AttendanceRecord>, AppError> {
    let row = sqlx::query_as::<_, DbAttendanceRecord>(&format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendance_records WHERE id = ?"
    ))
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(AttendanceRecord::try_from).transpose()
}

async fn find_qr(conn: &mut SqliteConnection, code: &str) -> Result<Option<QrCode>, AppError> {
    let row = sqlx::query_as::<_, DbQrCode>(&format!("SELECT {QR_COLUMNS} FROM qr_codes WHERE code = ?"))
        .bind(code)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(QrCode::try_from).transpose()
}

/// Attendance status of `user_id` for `activity_id`, if registered at all.
pub async fn status_for(
    pool: &SqlitePool,
    activity_id: Uuid,
    user_id: Uuid,
) -> Result<Option<AttendanceStatus>, AppError> {
    let mut conn = pool.acquire().await?;
    Ok(find_record(&mut conn, activity_id, user_id).await?.map(|record| record.status))
}

/// Register `user` for an activity. The participant counter is bumped first
/// so the whole check runs under the write lock; any failure rolls it back.
pub async fn register(
    pool: &SqlitePool,
    user: &Subject,
    req: RegistrationRequest,
    ctx: &RequestContext,
) -> Result<AttendanceRecord, AttendanceError> {
    let mut tx = pool.begin().await?;

    let seat = increment_if_below(&mut tx, BoundedCounter::Participants, &req.activity_id.to_string()).await?;

    let activity = activity::find_in(&mut tx, req.activity_id)
        .await?
        .ok_or(AttendanceError::ActivityNotFound)?;
    if !activity.status.is_open_for_attendance() {
        return Err(AttendanceError::NotOpenForRegistration);
    }
    if find_record(&mut tx, req.activity_id, user.id).await?.is_some() {
        return Err(AttendanceError::AlreadyRegistered);
    }
    if seat == Increment::AtCeiling {
        return Err(AttendanceError::ActivityFull);
    }

    let now = utc_now();
    let id = Uuid::new_v4();
    let inserted = sqlx::query(
        r#"
        INSERT INTO attendance_records (id, activity_id, user_id, status, registered_at, notes, location_verified, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(req.activity_id.to_string())
    .bind(user.id.to_string())
    .bind(AttendanceStatus::Registered.as_str())
    .bind(now)
    .bind(req.notes.as_deref())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await;

    match inserted {
        Ok(_) => {}
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            return Err(AttendanceError::AlreadyRegistered);
        }
        Err(err) => return Err(err.into()),
    }

    let record = find_record_by_id(&mut tx, id)
        .await?
        .ok_or(AttendanceError::RecordNotFound)?;
    let entry = AuditEntry::change("attendance:register", user.id, &record, None).context(ctx);
    events::append(&mut tx, &entry).await?;
    tx.commit().await?;

    tracing::info!(activity_id = %req.activity_id, user_id = %user.id, "user registered for activity");
    Ok(record)
}

fn qr_window(
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), AttendanceError> {
    let from = valid_from.unwrap_or(now);
    let until = valid_until.unwrap_or(from + Duration::hours(DEFAULT_QR_WINDOW_HOURS));
    if until <= from {
        return Err(AttendanceError::Validation("valid_until must be after valid_from".into()));
    }
    Ok((from, until))
}

/// Issue a signed QR code. A gate id binds the code to a fresh gate session
/// that expires with the code.
pub async fn generate_qr(
    pool: &SqlitePool,
    tokens: &TokenCodec,
    issuer: &Subject,
    req: QrCodeCreateRequest,
    ctx: &RequestContext,
) -> Result<QrCode, AttendanceError> {
    let activity = activity::find(pool, req.activity_id)
        .await?
        .ok_or(AttendanceError::ActivityNotFound)?;
    if activity.creator_id != issuer.id && !issuer.is_admin() {
        return Err(AttendanceError::NotAuthorized);
    }
    if matches!(req.max_uses, Some(max) if max < 1) {
        return Err(AttendanceError::Validation("max_uses must be at least 1".into()));
    }

    let now = utc_now();
    let (valid_from, valid_until) = qr_window(req.valid_from, req.valid_until, now)?;
    let gate_id = req.gate_id.map(|g| g.trim().to_string()).filter(|g| !g.is_empty());

    let mut tx = pool.begin().await?;

    let session_token = match &gate_id {
        Some(gate) => {
            let token = random_token(16);
            sqlx::query(
                "INSERT INTO attendance_sessions (id, activity_id, gate_id, session_token, expires_at, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(req.activity_id.to_string())
            .bind(gate)
            .bind(&token)
            .bind(valid_until)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            Some(token)
        }
        None => None,
    };

    let (claims, code) = tokens.issue_qr(
        req.activity_id,
        gate_id.clone(),
        session_token.clone(),
        req.code_type,
        valid_from,
        valid_until,
    )?;

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO qr_codes (id, activity_id, code, gate_id, session_token, valid_from, valid_until, is_active, max_uses, current_uses, code_type, generated_by_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, 0, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(req.activity_id.to_string())
    .bind(&code)
    .bind(gate_id.as_deref())
    .bind(session_token.as_deref())
    .bind(valid_from)
    .bind(valid_until)
    .bind(req.max_uses)
    .bind(claims.code_type.as_str())
    .bind(issuer.id.to_string())
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let qr = find_qr(&mut tx, &code).await?.ok_or(AttendanceError::QrNotFound)?;
    let entry = AuditEntry::change("attendance:generate_qr", issuer.id, &qr, None).context(ctx);
    events::append(&mut tx, &entry).await?;
    tx.commit().await?;

    tracing::info!(
        activity_id = %req.activity_id,
        qr_id = %id,
        jti = %claims.jti,
        "QR code generated"
    );
    Ok(qr)
}

/// Persisted, correctly signed, inside its window and active.
pub async fn validate_qr(pool: &SqlitePool, tokens: &TokenCodec, code: &str) -> Result<QrCode, AttendanceError> {
    let mut conn = pool.acquire().await?;
    let qr = find_qr(&mut conn, code).await?.ok_or(AttendanceError::QrNotFound)?;
    tokens.verify_qr(code)?;
    if !qr.is_active {
        return Err(AttendanceError::Inactive);
    }
    Ok(qr)
}

async fn gate_session_live(
    conn: &mut SqliteConnection,
    session_token: &str,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let session = sqlx::query_as::<_, AttendanceSession>(
        "SELECT id, activity_id, gate_id, session_token, expires_at, created_at FROM attendance_sessions WHERE session_token = ?",
    )
    .bind(session_token)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(matches!(session, Some(s) if s.expires_at > now))
}

/// Everything a redemption has to satisfy, read inside its write transaction.
async fn check_redemption(
    conn: &mut SqliteConnection,
    claims: &QrClaims,
    user: &Subject,
    code: &str,
    op: Redemption,
    guard: CheckInGuard,
    now: DateTime<Utc>,
) -> Result<AttendanceRecord, AttendanceError> {
    let qr = find_qr(conn, code).await?.ok_or(AttendanceError::QrNotFound)?;
    if !qr.is_active {
        return Err(AttendanceError::Inactive);
    }
    if !qr.code_type.admits(op.code_type()) {
        return Err(AttendanceError::WrongCodeType(op.label()));
    }
    if let Some(session_token) = &qr.session_token {
        if !gate_session_live(conn, session_token, now).await? {
            return Err(AttendanceError::SessionExpired);
        }
    }

    let activity = activity::find_in(conn, claims.activity_id)
        .await?
        .ok_or(AttendanceError::ActivityNotFound)?;
    if !activity.status.is_open_for_attendance() {
        return Err(AttendanceError::NotOpenForAttendance);
    }

    let record = find_record(conn, claims.activity_id, user.id)
        .await?
        .ok_or(AttendanceError::RecordNotFound)?;
    if !op.allowed_from(guard).contains(&record.status) {
        return Err(op.guard_error(record.status));
    }

    Ok(record)
}

async fn redeem(
    pool: &SqlitePool,
    tokens: &TokenCodec,
    guard: CheckInGuard,
    user: &Subject,
    req: CheckInRequest,
    op: Redemption,
    ctx: &RequestContext,
) -> Result<AttendanceRecord, AttendanceError> {
    let now = utc_now();
    let claims = tokens.verify_qr(&req.qr_code)?;

    // usage bump first: the checks below then run under the write lock
    let mut tx = pool.begin().await?;
    let usage = increment_if_below(&mut tx, BoundedCounter::QrUses, &req.qr_code).await?;
    let record = check_redemption(&mut tx, &claims, user, &req.qr_code, op, guard, now).await?;
    if usage == Increment::AtCeiling {
        return Err(AttendanceError::UsageExhausted);
    }

    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE attendance_records SET status = ");
    builder.push_bind(op.target().as_str());
    match op {
        Redemption::CheckIn => {
            builder.push(", checked_in_at = ").push_bind(now);
            builder.push(", qr_code_used = ").push_bind(req.qr_code.as_str());
            builder.push(", check_in_method = 'QR', check_in_gate_id = ").push_bind(claims.gate_id.as_deref());
        }
        Redemption::CheckOut => {
            builder.push(", checked_out_at = ").push_bind(now);
        }
    }
    if let Some(notes) = req.notes.as_deref() {
        builder.push(", notes = ").push_bind(notes);
    }
    builder.push(", updated_at = ").push_bind(now);
    builder.push(" WHERE id = ").push_bind(record.id.to_string());
    builder.push(" AND status IN (");
    let mut allowed = builder.separated(", ");
    for status in op.allowed_from(guard) {
        allowed.push_bind(status.as_str());
    }
    builder.push(")");

    if builder.build().execute(&mut *tx).await?.rows_affected() != 1 {
        return Err(AttendanceError::Concurrent);
    }

    let updated = find_record_by_id(&mut tx, record.id)
        .await?
        .ok_or(AttendanceError::RecordNotFound)?;
    let entry = AuditEntry::change(op.audit_action(), user.id, &updated, Some(&record)).context(ctx);
    events::append(&mut tx, &entry).await?;
    tx.commit().await?;

    tracing::info!(
        activity_id = %claims.activity_id,
        user_id = %user.id,
        gate_id = ?claims.gate_id,
        "attendance {}",
        op.label()
    );
    Ok(updated)
}

pub async fn check_in(
    pool: &SqlitePool,
    tokens: &TokenCodec,
    guard: CheckInGuard,
    user: &Subject,
    req: CheckInRequest,
    ctx: &RequestContext,
) -> Result<AttendanceRecord, AttendanceError> {
    redeem(pool, tokens, guard, user, req, Redemption::CheckIn, ctx).await
}

pub async fn check_out(
    pool: &SqlitePool,
    tokens: &TokenCodec,
    user: &Subject,
    req: CheckInRequest,
    ctx: &RequestContext,
) -> Result<AttendanceRecord, AttendanceError> {
    redeem(pool, tokens, CheckInGuard::Registered, user, req, Redemption::CheckOut, ctx).await
}

pub async fn records(pool: &SqlitePool, activity_id: Uuid) -> Result<Vec<AttendanceRecord>, AttendanceError> {
    if activity::find(pool, activity_id).await?.is_none() {
        return Err(AttendanceError::ActivityNotFound);
    }

    let rows = sqlx::query_as::<_, DbAttendanceRecord>(&format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendance_records WHERE activity_id = ? ORDER BY registered_at"
    ))
    .bind(activity_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| AttendanceRecord::try_from(row).map_err(AttendanceError::from))
        .collect()
}

pub async fn stats(pool: &SqlitePool, activity_id: Uuid) -> Result<AttendanceStats, AttendanceError> {
    if activity::find(pool, activity_id).await?.is_none() {
        return Err(AttendanceError::ActivityNotFound);
    }

    let counts: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM attendance_records WHERE activity_id = ? GROUP BY status",
    )
    .bind(activity_id.to_string())
    .fetch_all(pool)
    .await?;

    let count = |status: AttendanceStatus| {
        counts
            .iter()
            .find(|(name, _)| name == status.as_str())
            .map(|(_, n)| *n)
            .unwrap_or(0)
    };
    let total: i64 = counts.iter().map(|(_, n)| n).sum();

    Ok(AttendanceStats::new(
        activity_id,
        total,
        count(AttendanceStatus::CheckedIn),
        count(AttendanceStatus::CheckedOut),
        count(AttendanceStatus::Absent),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_guard_only_admits_registered() {
        let allowed = Redemption::CheckIn.allowed_from(CheckInGuard::Registered);
        assert_eq!(allowed, &[AttendanceStatus::Registered]);
    }

    #[test]
    fn unguarded_check_in_still_excludes_cancelled() {
        let allowed = Redemption::CheckIn.allowed_from(CheckInGuard::Unguarded);
        assert!(allowed.contains(&AttendanceStatus::CheckedOut));
        assert!(!allowed.contains(&AttendanceStatus::Cancelled));
    }

    #[test]
    fn check_out_requires_checked_in_under_any_guard() {
        for guard in [CheckInGuard::Registered, CheckInGuard::Unguarded] {
            assert_eq!(Redemption::CheckOut.allowed_from(guard), &[AttendanceStatus::CheckedIn]);
        }
    }

    #[test]
    fn qr_window_defaults_to_two_hours() {
        let now = Utc::now();
        let (from, until) = qr_window(None, None, now).unwrap();
        assert_eq!(from, now);
        assert_eq!(until - from, Duration::hours(2));
        assert!(qr_window(Some(now), Some(now), now).is_err());
    }

    #[test]
    fn token_failures_are_rule_errors_not_auth_errors() {
        let expired = AppError::from(AttendanceError::from(TokenError::Expired));
        assert_eq!(expired.status(), StatusCode::BAD_REQUEST);
        assert_eq!(expired.code(), "QR_EXPIRED");

        let malformed = AppError::from(AttendanceError::from(TokenError::Malformed("bad".into())));
        assert_eq!(malformed.code(), "INVALID_QR_CODE");
    }

    #[test]
    fn duplicate_registration_is_a_conflict() {
        let err = AppError::from(AttendanceError::AlreadyRegistered);
        assert_eq!(err.status(), StatusCode::CONFLICT);
        let full = AppError::from(AttendanceError::ActivityFull);
        assert_eq!(full.status(), StatusCode::BAD_REQUEST);
        assert_eq!(full.code(), "ACTIVITY_FULL");
    }
}
