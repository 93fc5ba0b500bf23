mod common;

use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use common::{seed_user, send};

async fn send_raw(app: &Router, uri: &str, token: Option<&str>, raw: &'static str) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }

    let response = app.clone().oneshot(builder.body(Body::from(raw))?).await?;
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), 1 << 20).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}

fn assert_validation_envelope(status: StatusCode, body: &Value) {
    assert_eq!(status, StatusCode::BAD_REQUEST, "unexpected body: {body}");
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(body["error"]["message"].as_str().is_some_and(|m| !m.is_empty()));
}

#[tokio::test]
async fn broken_json_gets_the_error_envelope() -> Result<()> {
    let (db, app) = common::test_app().await?;
    let (_, kim) = seed_user(&db.pool, "kim", "USER").await?;

    let (status, body) = send_raw(&app, "/v1/auth/login", None, "{bad json").await?;
    assert_validation_envelope(status, &body);

    let (status, body) = send_raw(&app, "/v1/attendance/register", Some(&kim), "{bad json").await?;
    assert_validation_envelope(status, &body);

    Ok(())
}

#[tokio::test]
async fn mistyped_fields_are_bad_requests() -> Result<()> {
    let (db, app) = common::test_app().await?;
    let (_, lee) = seed_user(&db.pool, "lee", "USER").await?;

    let (status, body) = send(
        &app,
        "POST",
        "/v1/attendance/register",
        Some(&lee),
        Some(json!({ "activity_id": "not-a-uuid" })),
    )
    .await?;
    assert_validation_envelope(status, &body);

    let (status, body) = send(&app, "POST", "/v1/activities", Some(&lee), Some(json!({ "title": 42 }))).await?;
    assert_validation_envelope(status, &body);

    Ok(())
}

#[tokio::test]
async fn bad_path_and_query_values_are_bad_requests() -> Result<()> {
    let (db, app) = common::test_app().await?;
    let (_, max) = seed_user(&db.pool, "max", "USER").await?;

    let (status, body) = send(&app, "GET", "/v1/activities/xyz", Some(&max), None).await?;
    assert_validation_envelope(status, &body);

    let (status, body) = send(&app, "GET", "/v1/activities?page=abc", Some(&max), None).await?;
    assert_validation_envelope(status, &body);

    Ok(())
}
