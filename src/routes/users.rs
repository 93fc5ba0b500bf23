use axum::extract::State;
use axum::Json;
use uuid::Uuid;

use super::extract::{AppJson, AppPath, AppQuery};
use crate::app::AppState;
use crate::authz::Subject;
use crate::errors::AppResult;
use crate::models::response::{PaginatedResponse, PaginationMeta, SuccessResponse};
use crate::models::user::{ProfileUpdateRequest, User, UserListQuery};
use crate::services::users;

#[utoipa::path(
    get,
    path = "/v1/users/me",
    tag = "Users",
    responses((status = 200, description = "Current user", body = User))
)]
pub async fn me(State(state): State<AppState>, subject: Subject) -> AppResult<Json<SuccessResponse<User>>> {
    let user = users::get(&state.pool, subject.id).await?;
    Ok(Json(SuccessResponse::new(user)))
}

#[utoipa::path(
    put,
    path = "/v1/users/me",
    tag = "Users",
    request_body = ProfileUpdateRequest,
    responses((status = 200, description = "Profile updated", body = User))
)]
pub async fn update_me(
    State(state): State<AppState>,
    subject: Subject,
    AppJson(payload): AppJson<ProfileUpdateRequest>,
) -> AppResult<Json<SuccessResponse<User>>> {
    let user = users::update_profile(&state.pool, subject.id, payload).await?;
    Ok(Json(SuccessResponse::new(user).with_message("Profile updated")))
}

#[utoipa::path(
    get,
    path = "/v1/users",
    tag = "Users",
    params(
        ("page" = Option<i64>, Query, description = "Page number, from 1"),
        ("per_page" = Option<i64>, Query, description = "Page size, at most 100"),
        ("search" = Option<String>, Query, description = "Matches username, email or full name"),
        ("role" = Option<String>, Query, description = "Role name filter")
    ),
    responses((status = 200, description = "Users", body = [User]))
)]
pub async fn list(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<UserListQuery>,
) -> AppResult<Json<PaginatedResponse<User>>> {
    let (items, total, page, per_page) = users::list(&state.pool, &query).await?;
    Ok(Json(PaginatedResponse::new(items, PaginationMeta::new(page, per_page, total))))
}

#[utoipa::path(
    get,
    path = "/v1/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = User),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user(State(state): State<AppState>, AppPath(id): AppPath<Uuid>) -> AppResult<Json<SuccessResponse<User>>> {
    let user = users::get(&state.pool, id).await?;
    Ok(Json(SuccessResponse::new(user)))
}
