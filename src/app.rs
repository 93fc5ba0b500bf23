use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{self, LocalPolicy, OpaClient, PolicyDecisionPoint};
use crate::config::{PolicyMode, Settings};
use crate::docs;
use crate::errors::AppError;
use crate::jwt::TokenCodec;
use crate::routes::{activities, attendance, auth, health, users};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub tokens: Arc<TokenCodec>,
    pub policy: Arc<dyn PolicyDecisionPoint>,
    pub settings: Arc<Settings>,
}

impl AppState {
    /// State with the decision point selected by `settings.policy_mode`.
    pub fn new(pool: SqlitePool, settings: Settings) -> Result<Self, AppError> {
        let policy: Arc<dyn PolicyDecisionPoint> = match settings.policy_mode {
            PolicyMode::Remote => {
                let client = OpaClient::new(settings.policy_endpoint(), settings.policy_timeout)
                    .map_err(|err| AppError::configuration(format!("failed to build policy client: {err}")))?;
                tracing::info!(endpoint = %client.endpoint(), "using remote policy decision point");
                Arc::new(client)
            }
            PolicyMode::Local => {
                tracing::info!("using local role policy");
                Arc::new(LocalPolicy::new())
            }
        };

        Ok(Self::with_policy(pool, settings, policy))
    }

    pub fn with_policy(pool: SqlitePool, settings: Settings, policy: Arc<dyn PolicyDecisionPoint>) -> Self {
        Self {
            pool,
            tokens: Arc::new(TokenCodec::new(&settings)),
            policy,
            settings: Arc::new(settings),
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let settings = Settings::from_env()?;
    let state = AppState::new(pool, settings)?;
    router(state)
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let origins: Vec<HeaderValue> = settings
        .cors_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(origins)
    }
}

/// Full application: `/v1` API behind the enforcement layer, health and docs.
pub fn router(state: AppState) -> Result<Router, AppError> {
    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout));

    let user_routes = Router::new()
        .route("/", get(users::list))
        .route("/me", get(users::me).put(users::update_me))
        .route("/:id", get(users::get_user));

    let activity_routes = Router::new()
        .route("/", get(activities::list).post(activities::create))
        .route("/types", get(activities::types))
        .route("/pending", get(activities::pending))
        .route(
            "/:id",
            get(activities::get_activity)
                .put(activities::update)
                .delete(activities::cancel),
        )
        .route("/:id/submit", post(activities::submit))
        .route("/:id/approve", post(activities::approve))
        .route("/:id/reject", post(activities::reject))
        .route("/:id/start", post(activities::start))
        .route("/:id/complete", post(activities::complete))
        .route("/:id/participants", get(activities::participants))
        .route("/:id/history", get(activities::history));

    let attendance_routes = Router::new()
        .route("/register", post(attendance::register))
        .route("/check-in", post(attendance::check_in))
        .route("/check-out", post(attendance::check_out))
        .route("/activity/:id", get(attendance::records))
        .route("/activity/:id/stats", get(attendance::stats))
        .route("/qr-code", post(attendance::create_qr))
        .route("/qr-code/:code", get(attendance::validate_qr));

    let v1 = Router::new()
        .nest("/auth", auth_routes)
        .nest("/users", user_routes)
        .nest("/activities", activity_routes)
        .nest("/attendance", attendance_routes);

    let port = std::env::var("APP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8000);
    let openapi = docs::build_openapi(port)?;

    let cors = cors_layer(&state.settings);
    let router = Router::new()
        .route("/health", get(health::health))
        .nest("/v1", v1)
        .with_state(state.clone())
        .merge(docs::swagger_routes(openapi)?)
        .layer(middleware::from_fn_with_state(state, authz::enforce))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
