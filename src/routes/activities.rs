use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use super::extract::{AppJson, AppPath, AppQuery};
use crate::app::AppState;
use crate::authz::Subject;
use crate::errors::AppResult;
use crate::events::RequestContext;
use crate::models::activity::{
    ActivityCase, ActivityCreateRequest, ActivityListQuery, ActivityType, ActivityUpdateRequest, ApprovalRequest,
    Participant, RejectionRequest,
};
use crate::models::approval::ApprovalWorkflowEntry;
use crate::models::response::{PaginatedResponse, PaginationMeta, SuccessResponse};
use crate::services::activity::{self, Lifecycle};
use crate::services::approval;

type Single<T> = AppResult<Json<SuccessResponse<T>>>;

#[utoipa::path(
    post,
    path = "/v1/activities",
    tag = "Activities",
    request_body = ActivityCreateRequest,
    responses(
        (status = 201, description = "Activity created in DRAFT", body = ActivityCase),
        (status = 400, description = "Validation failed")
    )
)]
pub async fn create(
    State(state): State<AppState>,
    subject: Subject,
    ctx: RequestContext,
    AppJson(payload): AppJson<ActivityCreateRequest>,
) -> AppResult<(StatusCode, Json<SuccessResponse<ActivityCase>>)> {
    let created = activity::create(&state.pool, &subject, payload, &ctx).await?;
    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::new(created).with_message("Activity created successfully")),
    ))
}

#[utoipa::path(
    get,
    path = "/v1/activities",
    tag = "Activities",
    params(
        ("page" = Option<i64>, Query, description = "Page number, from 1"),
        ("per_page" = Option<i64>, Query, description = "Page size, at most 100"),
        ("status" = Option<String>, Query, description = "Status filter, e.g. APPROVED"),
        ("creator_id" = Option<Uuid>, Query, description = "Creator filter"),
        ("search" = Option<String>, Query, description = "Matches title or description")
    ),
    responses((status = 200, description = "Activities", body = [ActivityCase]))
)]
pub async fn list(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ActivityListQuery>,
) -> AppResult<Json<PaginatedResponse<ActivityCase>>> {
    let (items, total, page, per_page) = activity::list(&state.pool, &query).await?;
    Ok(Json(PaginatedResponse::new(items, PaginationMeta::new(page, per_page, total))))
}

#[utoipa::path(
    get,
    path = "/v1/activities/types",
    tag = "Activities",
    responses((status = 200, description = "Activity types", body = [ActivityType]))
)]
pub async fn types(State(state): State<AppState>) -> Single<Vec<ActivityType>> {
    Ok(Json(SuccessResponse::new(activity::list_types(&state.pool).await?)))
}

#[utoipa::path(
    get,
    path = "/v1/activities/pending",
    tag = "Activities",
    params(
        ("page" = Option<i64>, Query, description = "Page number, from 1"),
        ("per_page" = Option<i64>, Query, description = "Page size, at most 100")
    ),
    responses((status = 200, description = "Activities awaiting approval", body = [ActivityCase]))
)]
pub async fn pending(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ActivityListQuery>,
) -> AppResult<Json<PaginatedResponse<ActivityCase>>> {
    let (items, total, page, per_page) = activity::list_pending(&state.pool, query.page, query.per_page).await?;
    Ok(Json(PaginatedResponse::new(items, PaginationMeta::new(page, per_page, total))))
}

#[utoipa::path(
    get,
    path = "/v1/activities/{id}",
    tag = "Activities",
    params(("id" = Uuid, Path, description = "Activity id")),
    responses(
        (status = 200, description = "Activity", body = ActivityCase),
        (status = 404, description = "Activity not found")
    )
)]
pub async fn get_activity(State(state): State<AppState>, AppPath(id): AppPath<Uuid>) -> Single<ActivityCase> {
    Ok(Json(SuccessResponse::new(activity::get(&state.pool, id).await?)))
}

#[utoipa::path(
    put,
    path = "/v1/activities/{id}",
    tag = "Activities",
    params(("id" = Uuid, Path, description = "Activity id")),
    request_body = ActivityUpdateRequest,
    responses(
        (status = 200, description = "Activity updated", body = ActivityCase),
        (status = 400, description = "Not a DRAFT, or validation failed"),
        (status = 403, description = "Not the creator")
    )
)]
pub async fn update(
    State(state): State<AppState>,
    subject: Subject,
    ctx: RequestContext,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<ActivityUpdateRequest>,
) -> Single<ActivityCase> {
    let updated = activity::update(&state.pool, id, &subject, payload, &ctx).await?;
    Ok(Json(SuccessResponse::new(updated).with_message("Activity updated successfully")))
}

#[utoipa::path(
    delete,
    path = "/v1/activities/{id}",
    tag = "Activities",
    params(("id" = Uuid, Path, description = "Activity id")),
    responses(
        (status = 200, description = "Activity cancelled", body = ActivityCase),
        (status = 400, description = "Activity cannot be cancelled from its current status")
    )
)]
pub async fn cancel(
    State(state): State<AppState>,
    subject: Subject,
    ctx: RequestContext,
    AppPath(id): AppPath<Uuid>,
) -> Single<ActivityCase> {
    let cancelled = activity::transition(&state.pool, id, &subject, Lifecycle::Cancel, &ctx).await?;
    Ok(Json(SuccessResponse::new(cancelled).with_message("Activity cancelled")))
}

async fn lifecycle(
    state: &AppState,
    subject: &Subject,
    ctx: &RequestContext,
    id: Uuid,
    op: Lifecycle,
    message: &str,
) -> Single<ActivityCase> {
    let activity = activity::transition(&state.pool, id, subject, op, ctx).await?;
    Ok(Json(SuccessResponse::new(activity).with_message(message)))
}

#[utoipa::path(
    post,
    path = "/v1/activities/{id}/submit",
    tag = "Activities",
    params(("id" = Uuid, Path, description = "Activity id")),
    responses(
        (status = 200, description = "Submitted for approval", body = ActivityCase),
        (status = 400, description = "Invalid transition")
    )
)]
pub async fn submit(
    State(state): State<AppState>,
    subject: Subject,
    ctx: RequestContext,
    AppPath(id): AppPath<Uuid>,
) -> Single<ActivityCase> {
    lifecycle(&state, &subject, &ctx, id, Lifecycle::Submit, "Activity submitted for approval").await
}

#[utoipa::path(
    post,
    path = "/v1/activities/{id}/start",
    tag = "Activities",
    params(("id" = Uuid, Path, description = "Activity id")),
    responses((status = 200, description = "Activity in progress", body = ActivityCase))
)]
pub async fn start(
    State(state): State<AppState>,
    subject: Subject,
    ctx: RequestContext,
    AppPath(id): AppPath<Uuid>,
) -> Single<ActivityCase> {
    lifecycle(&state, &subject, &ctx, id, Lifecycle::Start, "Activity started").await
}

#[utoipa::path(
    post,
    path = "/v1/activities/{id}/complete",
    tag = "Activities",
    params(("id" = Uuid, Path, description = "Activity id")),
    responses((status = 200, description = "Activity completed", body = ActivityCase))
)]
pub async fn complete(
    State(state): State<AppState>,
    subject: Subject,
    ctx: RequestContext,
    AppPath(id): AppPath<Uuid>,
) -> Single<ActivityCase> {
    lifecycle(&state, &subject, &ctx, id, Lifecycle::Complete, "Activity completed").await
}

#[utoipa::path(
    post,
    path = "/v1/activities/{id}/approve",
    tag = "Activities",
    params(("id" = Uuid, Path, description = "Activity id")),
    request_body = ApprovalRequest,
    responses(
        (status = 200, description = "Activity approved", body = ActivityCase),
        (status = 400, description = "Not pending approval"),
        (status = 403, description = "Self-approval or policy denial")
    )
)]
pub async fn approve(
    State(state): State<AppState>,
    subject: Subject,
    ctx: RequestContext,
    AppPath(id): AppPath<Uuid>,
    payload: Option<AppJson<ApprovalRequest>>,
) -> Single<ActivityCase> {
    let comment = payload.and_then(|AppJson(body)| body.comment);
    let approved = approval::approve(&state.pool, id, &subject, comment, &ctx).await?;
    Ok(Json(SuccessResponse::new(approved).with_message("Activity approved")))
}

#[utoipa::path(
    post,
    path = "/v1/activities/{id}/reject",
    tag = "Activities",
    params(("id" = Uuid, Path, description = "Activity id")),
    request_body = RejectionRequest,
    responses(
        (status = 200, description = "Activity rejected", body = ActivityCase),
        (status = 400, description = "Not pending approval, or reason too short"),
        (status = 403, description = "Self-rejection or policy denial")
    )
)]
pub async fn reject(
    State(state): State<AppState>,
    subject: Subject,
    ctx: RequestContext,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<RejectionRequest>,
) -> Single<ActivityCase> {
    let rejected = approval::reject(&state.pool, id, &subject, payload.reason, &ctx).await?;
    Ok(Json(SuccessResponse::new(rejected).with_message("Activity rejected")))
}

#[utoipa::path(
    get,
    path = "/v1/activities/{id}/participants",
    tag = "Activities",
    params(("id" = Uuid, Path, description = "Activity id")),
    responses((status = 200, description = "Registered participants", body = [Participant]))
)]
pub async fn participants(State(state): State<AppState>, AppPath(id): AppPath<Uuid>) -> Single<Vec<Participant>> {
    Ok(Json(SuccessResponse::new(activity::participants(&state.pool, id).await?)))
}

#[utoipa::path(
    get,
    path = "/v1/activities/{id}/history",
    tag = "Activities",
    params(("id" = Uuid, Path, description = "Activity id")),
    responses((status = 200, description = "Approval workflow, oldest first", body = [ApprovalWorkflowEntry]))
)]
pub async fn history(State(state): State<AppState>, AppPath(id): AppPath<Uuid>) -> Single<Vec<ApprovalWorkflowEntry>> {
    Ok(Json(SuccessResponse::new(activity::history(&state.pool, id).await?)))
}
