use axum::extract::State;
use axum::Json;
use serde::Serialize;
use sqlx::query_scalar;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::config::PolicyMode;
use crate::errors::AppResult;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub db_ok: bool,
    pub db_error: Option<String>,
    /// `remote` or `local`
    pub policy_mode: &'static str,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses((status = 200, description = "Health check", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    let db_check = query_scalar::<_, i64>("SELECT 1").fetch_one(&state.pool).await;
    let policy_mode = match state.settings.policy_mode {
        PolicyMode::Remote => "remote",
        PolicyMode::Local => "local",
    };

    Ok(Json(match db_check {
        Ok(_) => HealthResponse { status: "ok", db_ok: true, db_error: None, policy_mode },
        Err(e) => HealthResponse { status: "degraded", db_ok: false, db_error: Some(e.to_string()), policy_mode },
    }))
}
