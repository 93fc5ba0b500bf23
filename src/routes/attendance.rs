use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use super::extract::{AppJson, AppPath};
use crate::app::AppState;
use crate::authz::Subject;
use crate::errors::AppResult;
use crate::events::RequestContext;
use crate::models::attendance::{
    AttendanceRecord, AttendanceStats, CheckInRequest, QrCode, QrCodeCreateRequest, RegistrationRequest,
};
use crate::models::response::SuccessResponse;
use crate::services::attendance;

type Created<T> = AppResult<(StatusCode, Json<SuccessResponse<T>>)>;

#[utoipa::path(
    post,
    path = "/v1/attendance/register",
    tag = "Attendance",
    request_body = RegistrationRequest,
    responses(
        (status = 201, description = "Registered", body = AttendanceRecord),
        (status = 400, description = "Activity full or not open for registration"),
        (status = 409, description = "Already registered")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    subject: Subject,
    ctx: RequestContext,
    AppJson(payload): AppJson<RegistrationRequest>,
) -> Created<AttendanceRecord> {
    let record = attendance::register(&state.pool, &subject, payload, &ctx).await?;
    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::new(record).with_message("Successfully registered for activity")),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/attendance/check-in",
    tag = "Attendance",
    request_body = CheckInRequest,
    responses(
        (status = 200, description = "Checked in", body = AttendanceRecord),
        (status = 400, description = "QR code expired, invalid or exhausted"),
        (status = 404, description = "No registration for this activity")
    )
)]
pub async fn check_in(
    State(state): State<AppState>,
    subject: Subject,
    ctx: RequestContext,
    AppJson(payload): AppJson<CheckInRequest>,
) -> AppResult<Json<SuccessResponse<AttendanceRecord>>> {
    let record = attendance::check_in(
        &state.pool,
        &state.tokens,
        state.settings.check_in_guard,
        &subject,
        payload,
        &ctx,
    )
    .await?;
    Ok(Json(SuccessResponse::new(record).with_message("Successfully checked in")))
}

#[utoipa::path(
    post,
    path = "/v1/attendance/check-out",
    tag = "Attendance",
    request_body = CheckInRequest,
    responses(
        (status = 200, description = "Checked out", body = AttendanceRecord),
        (status = 400, description = "Not checked in, or QR code unusable")
    )
)]
pub async fn check_out(
    State(state): State<AppState>,
    subject: Subject,
    ctx: RequestContext,
    AppJson(payload): AppJson<CheckInRequest>,
) -> AppResult<Json<SuccessResponse<AttendanceRecord>>> {
    let record = attendance::check_out(&state.pool, &state.tokens, &subject, payload, &ctx).await?;
    Ok(Json(SuccessResponse::new(record).with_message("Successfully checked out")))
}

#[utoipa::path(
    get,
    path = "/v1/attendance/activity/{id}",
    tag = "Attendance",
    params(("id" = Uuid, Path, description = "Activity id")),
    responses((status = 200, description = "Attendance records", body = [AttendanceRecord]))
)]
pub async fn records(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<SuccessResponse<Vec<AttendanceRecord>>>> {
    Ok(Json(SuccessResponse::new(attendance::records(&state.pool, id).await?)))
}

#[utoipa::path(
    get,
    path = "/v1/attendance/activity/{id}/stats",
    tag = "Attendance",
    params(("id" = Uuid, Path, description = "Activity id")),
    responses((status = 200, description = "Attendance statistics", body = AttendanceStats))
)]
pub async fn stats(State(state): State<AppState>, AppPath(id): AppPath<Uuid>) -> AppResult<Json<SuccessResponse<AttendanceStats>>> {
    Ok(Json(SuccessResponse::new(attendance::stats(&state.pool, id).await?)))
}

#[utoipa::path(
    post,
    path = "/v1/attendance/qr-code",
    tag = "Attendance",
    request_body = QrCodeCreateRequest,
    responses(
        (status = 201, description = "QR code generated", body = QrCode),
        (status = 403, description = "Not the creator or an administrator")
    )
)]
pub async fn create_qr(
    State(state): State<AppState>,
    subject: Subject,
    ctx: RequestContext,
    AppJson(payload): AppJson<QrCodeCreateRequest>,
) -> Created<QrCode> {
    let qr = attendance::generate_qr(&state.pool, &state.tokens, &subject, payload, &ctx).await?;
    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::new(qr).with_message("QR code generated")),
    ))
}

#[utoipa::path(
    get,
    path = "/v1/attendance/qr-code/{code}",
    tag = "Attendance",
    params(("code" = String, Path, description = "Signed QR token")),
    responses(
        (status = 200, description = "QR code is valid", body = QrCode),
        (status = 400, description = "Expired or inactive"),
        (status = 404, description = "Unknown QR code")
    )
)]
pub async fn validate_qr(State(state): State<AppState>, AppPath(code): AppPath<String>) -> AppResult<Json<SuccessResponse<QrCode>>> {
    let qr = attendance::validate_qr(&state.pool, &state.tokens, &code).await?;
    Ok(Json(SuccessResponse::new(qr).with_message("QR code is valid")))
}
