use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use super::extract::AppJson;
use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::jwt::TokenType;
use crate::models::response::SuccessResponse;
use crate::models::user::{LoginRequest, RefreshRequest, RegisterRequest, TokenPair, User};
use crate::services::users;
use crate::utils::{verify_password, verify_unknown_account};

const INVALID_CREDENTIALS: &str = "Incorrect username or password";

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = User),
        (status = 400, description = "Invalid input, or username/email already registered")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<SuccessResponse<User>>)> {
    let user = users::register(&state.pool, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::new(user).with_message("User registered successfully")),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = TokenPair),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account is inactive")
    )
)]
pub async fn login(State(state): State<AppState>, AppJson(payload): AppJson<LoginRequest>) -> AppResult<Json<TokenPair>> {
    let Some(row) = users::find_credentials(&state.pool, payload.username.trim()).await? else {
        verify_unknown_account(&payload.password);
        tracing::info!(login = %payload.username, "failed login attempt");
        return Err(AppError::unauthorized(INVALID_CREDENTIALS));
    };

    if !verify_password(&payload.password, &row.password_hash)? {
        tracing::info!(login = %payload.username, "failed login attempt");
        return Err(AppError::unauthorized(INVALID_CREDENTIALS));
    }
    if !row.is_active {
        return Err(AppError::forbidden("User account is inactive"));
    }

    let user = users::user_from_row(&state.pool, row).await?;
    users::touch_login(&state.pool, user.id).await?;

    let subject = users::subject_for(&user);
    let access_token = state.tokens.issue(&subject, TokenType::Access)?;
    let refresh_token = state.tokens.issue(&subject, TokenType::Refresh)?;

    tracing::info!(user_id = %user.id, role = %subject.role, "user logged in");
    Ok(Json(TokenPair {
        access_token,
        refresh_token: Some(refresh_token),
        token_type: "bearer",
        expires_in: state.tokens.access_ttl_seconds(),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    tag = "Auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token", body = TokenPair),
        (status = 401, description = "Invalid refresh token")
    )
)]
pub async fn refresh(State(state): State<AppState>, AppJson(payload): AppJson<RefreshRequest>) -> AppResult<Json<TokenPair>> {
    let claims = state
        .tokens
        .verify_session(&payload.refresh_token, TokenType::Refresh)
        .map_err(|_| AppError::unauthorized("Invalid refresh token"))?;

    let user = users::find(&state.pool, claims.sub)
        .await?
        .filter(|user| user.is_active)
        .ok_or_else(|| AppError::unauthorized("User not found or inactive"))?;

    let access_token = state.tokens.issue(&users::subject_for(&user), TokenType::Access)?;
    Ok(Json(TokenPair {
        access_token,
        refresh_token: None,
        token_type: "bearer",
        expires_in: state.tokens.access_ttl_seconds(),
    }))
}

/// Tokens are stateless; clients drop them.
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    tag = "Auth",
    responses((status = 200, description = "Logout acknowledged"))
)]
pub async fn logout() -> Json<SuccessResponse<()>> {
    Json(SuccessResponse::new(()).with_message("Successfully logged out"))
}
