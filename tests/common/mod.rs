#![allow(dead_code)]

use std::path::Path;

use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use casecheck::authz::{Role, Subject};
use casecheck::config::Settings;
use casecheck::jwt::{TokenCodec, TokenType};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const TEST_SECRET: &str = "test-secret";

/// Holds the temp dir so the database outlives the test body.
pub struct TestDb {
    pub dir: TempDir,
    pub pool: SqlitePool,
}

pub async fn test_db() -> Result<TestDb> {
    let dir = tempfile::tempdir()?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("test.db"))
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    Ok(TestDb { dir, pool })
}

/// Router wired the way the server wires it, with the local role policy.
pub async fn test_app() -> Result<(TestDb, Router)> {
    let db = test_db().await?;
    std::env::set_var("JWT_SECRET", TEST_SECRET);
    std::env::set_var("POLICY_MODE", "local");
    let app = casecheck::create_app(db.pool.clone()).await?;
    Ok((db, app))
}

pub fn codec() -> TokenCodec {
    TokenCodec::new(&Settings::with_secret(TEST_SECRET))
}

/// Insert a user row directly (skipping password hashing) and return an access token.
pub async fn seed_user(pool: &SqlitePool, username: &str, role: &str) -> Result<(Uuid, String)> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO users (id, username, email, password_hash, full_name, is_active, created_at, updated_at) VALUES (?, ?, ?, 'unused', ?, 1, ?, ?)",
    )
    .bind(id.to_string())
    .bind(username)
    .bind(format!("{username}@example.com"))
    .bind(format!("{username} test"))
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    sqlx::query("INSERT INTO user_roles (user_id, role_id, assigned_at) SELECT ?, id, ? FROM roles WHERE name = ?")
        .bind(id.to_string())
        .bind(now)
        .bind(role)
        .execute(pool)
        .await?;

    let token = codec().issue(&Subject::new(id, Role::parse(role)), TokenType::Access)?;
    Ok((id, token))
}

pub async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), 10_485_760).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    Ok((status, value))
}

pub fn activity_body(max_participants: i64) -> Value {
    let start = Utc::now() + Duration::days(1);
    json!({
        "title": "Community clean-up",
        "description": "Neighbourhood clean-up with the facilities team",
        "start_date": start,
        "end_date": start + Duration::hours(3),
        "location": "Main square",
        "max_participants": max_participants
    })
}

/// Create as `creator`, submit, and approve as `approver`; returns the activity id.
pub async fn approved_activity(app: &Router, creator: &str, approver: &str, max_participants: i64) -> Result<String> {
    let (status, created) = send(app, "POST", "/v1/activities", Some(creator), Some(activity_body(max_participants))).await?;
    assert_eq!(status, StatusCode::CREATED, "create failed: {created}");
    let id = created["data"]["id"].as_str().unwrap_or_default().to_string();

    let (status, body) = send(app, "POST", &format!("/v1/activities/{id}/submit"), Some(creator), None).await?;
    assert_eq!(status, StatusCode::OK, "submit failed: {body}");

    let (status, body) = send(app, "POST", &format!("/v1/activities/{id}/approve"), Some(approver), Some(json!({}))).await?;
    assert_eq!(status, StatusCode::OK, "approve failed: {body}");

    Ok(id)
}
