mod common;

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use axum::http::StatusCode;
use casecheck::authz::{Decision, PolicyDecisionPoint, PolicyInput};
use casecheck::config::Settings;
use casecheck::{router, AppState};
use serde_json::json;

use common::{seed_user, send, TEST_SECRET};

/// Denies everything with a fixed reason.
struct DenyAll;

#[async_trait]
impl PolicyDecisionPoint for DenyAll {
    async fn evaluate(&self, _input: &PolicyInput) -> Decision {
        Decision::deny("closed for maintenance")
    }
}

/// Allows everything and keeps every input it was asked about.
#[derive(Default)]
struct Recording {
    seen: Mutex<Vec<PolicyInput>>,
}

impl Recording {
    fn inputs(&self) -> Vec<PolicyInput> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PolicyDecisionPoint for Recording {
    async fn evaluate(&self, input: &PolicyInput) -> Decision {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(input.clone());
        }
        Decision::allow()
    }
}

fn app_with(pool: sqlx::SqlitePool, policy: Arc<dyn PolicyDecisionPoint>) -> Result<axum::Router> {
    let state = AppState::with_policy(pool, Settings::with_secret(TEST_SECRET), policy);
    Ok(router(state)?)
}

#[tokio::test]
async fn unauthenticated_requests_never_reach_the_policy() -> Result<()> {
    let db = common::test_db().await?;
    let recording = Arc::new(Recording::default());
    let app = app_with(db.pool.clone(), recording.clone())?;

    let (status, body) = send(&app, "GET", "/v1/activities", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let (status, _) = send(&app, "GET", "/health", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", "/api-docs/openapi.json", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "POST", "/v1/auth/login", None, Some(json!({ "username": "x", "password": "y" }))).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert!(recording.inputs().is_empty());
    Ok(())
}

#[tokio::test]
async fn denials_carry_reasons_and_are_audited() -> Result<()> {
    let db = common::test_db().await?;
    let app = app_with(db.pool.clone(), Arc::new(DenyAll))?;
    let (user_id, token) = seed_user(&db.pool, "blocked", "ADMIN").await?;

    let (status, body) = send(&app, "GET", "/v1/activities/types", Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
    assert_eq!(body["error"]["details"]["reasons"], json!(["closed for maintenance"]));

    let (action, status, message): (String, String, Option<String>) =
        sqlx::query_as("SELECT action, status, error_message FROM audit_logs WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_one(&db.pool)
            .await?;
    assert_eq!(action, "activity:list_types");
    assert_eq!(status, "DENIED");
    assert_eq!(message.as_deref(), Some("closed for maintenance"));

    Ok(())
}

#[tokio::test]
async fn decision_input_describes_the_request() -> Result<()> {
    let db = common::test_db().await?;
    let recording = Arc::new(Recording::default());
    let app = app_with(db.pool.clone(), recording.clone())?;
    let (creator_id, creator) = seed_user(&db.pool, "owner", "USER").await?;

    let (status, created) = send(&app, "POST", "/v1/activities", Some(&creator), Some(common::activity_body(4))).await?;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["data"]["id"].as_str().unwrap_or_default().to_string();

    let (status, _) = send(&app, "POST", &format!("/v1/activities/{id}/submit"), Some(&creator), None).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        "POST",
        "/v1/attendance/register",
        Some(&creator),
        Some(json!({ "activity_id": id })),
    )
    .await?;
    // the stub allowed it; the service still refuses a pending activity
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let inputs = recording.inputs();
    assert_eq!(inputs.len(), 3, "one decision per request");

    assert_eq!(inputs[0].action, "activity:create");
    assert_eq!(inputs[0].subject.id, creator_id);
    assert_eq!(inputs[0].resource["type"], "activity");

    assert_eq!(inputs[1].action, "activity:submit");
    assert_eq!(inputs[1].resource["id"], id);
    assert_eq!(inputs[1].resource["creator_id"], creator_id.to_string());
    assert_eq!(inputs[1].resource["status"], "DRAFT");

    assert_eq!(inputs[2].action, "attendance:register");
    assert_eq!(inputs[2].resource["id"], id);
    assert_eq!(inputs[2].resource["status"], "PENDING_APPROVAL");
    assert!(inputs[2].context.get("ip_address").is_some());

    Ok(())
}

#[tokio::test]
async fn check_routes_carry_registration_context() -> Result<()> {
    let db = common::test_db().await?;
    let recording = Arc::new(Recording::default());
    let app = app_with(db.pool.clone(), recording.clone())?;
    let (_, token) = seed_user(&db.pool, "walker", "USER").await?;

    let (status, body) = send(&app, "POST", "/v1/attendance/check-in", Some(&token), Some(json!({ "qr_code": "garbage" }))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_QR_CODE");

    let inputs = recording.inputs();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].action, "attendance:checkin");
    assert_eq!(inputs[0].context["is_registered"], false);
    assert_eq!(inputs[0].context["is_checked_in"], false);

    Ok(())
}
