mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

use common::{activity_body, seed_user, send};

#[tokio::test]
async fn submit_and_approve_with_separation_of_duties() -> Result<()> {
    let (db, app) = common::test_app().await?;
    let (creator_id, creator) = seed_user(&db.pool, "lead_admin", "ADMIN").await?;
    let (approver_id, approver) = seed_user(&db.pool, "second_admin", "ADMIN").await?;

    let (status, created) = send(&app, "POST", "/v1/activities", Some(&creator), Some(activity_body(20))).await?;
    assert_eq!(status, StatusCode::CREATED, "create failed: {created}");
    assert_eq!(created["data"]["case_number"], "C-0001");
    assert_eq!(created["data"]["status"], "DRAFT");
    assert_eq!(created["data"]["current_participants"], 0);
    let id = created["data"]["id"].as_str().unwrap_or_default().to_string();

    let (status, submitted) = send(&app, "POST", &format!("/v1/activities/{id}/submit"), Some(&creator), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(submitted["data"]["status"], "PENDING_APPROVAL");

    // an administrator who created the case still cannot approve it
    let (status, body) = send(&app, "POST", &format!("/v1/activities/{id}/approve"), Some(&creator), Some(json!({}))).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "SELF_APPROVAL_FORBIDDEN");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/v1/activities/{id}/approve"),
        Some(&approver),
        Some(json!({ "comment": "Looks safe" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "approve failed: {body}");
    assert_eq!(body["data"]["status"], "APPROVED");
    assert_eq!(body["data"]["approved_by_id"], approver_id.to_string());
    assert!(body["data"]["approved_at"].is_string());

    let (status, history) = send(&app, "GET", &format!("/v1/activities/{id}/history"), Some(&creator), None).await?;
    assert_eq!(status, StatusCode::OK);
    let actions: Vec<&str> = history["data"]
        .as_array()
        .map(|entries| entries.iter().filter_map(|e| e["action"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(actions, vec!["SUBMITTED", "APPROVED"]);
    assert_eq!(history["data"][1]["comment"], "Looks safe");
    assert_eq!(history["data"][1]["previous_status"], "PENDING_APPROVAL");

    // approving twice
    let (status, body) = send(&app, "POST", &format!("/v1/activities/{id}/approve"), Some(&approver), Some(json!({}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "NOT_PENDING");

    // both refused attempts left a FAILURE entry
    let failures: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM audit_logs WHERE action = 'activity:approve' AND status = 'FAILURE' AND resource_id = ?",
    )
    .bind(&id)
    .fetch_one(&db.pool)
    .await?;
    assert_eq!(failures, 2);

    let self_attempt: Option<String> = sqlx::query_scalar(
        "SELECT error_message FROM audit_logs WHERE status = 'FAILURE' AND user_id = ? ORDER BY rowid LIMIT 1",
    )
    .bind(creator_id.to_string())
    .fetch_optional(&db.pool)
    .await?;
    assert!(self_attempt.unwrap_or_default().contains("Separation of Duties"));

    Ok(())
}

#[tokio::test]
async fn plain_users_cannot_approve() -> Result<()> {
    let (db, app) = common::test_app().await?;
    let (_, creator) = seed_user(&db.pool, "creator", "USER").await?;
    let (_, other) = seed_user(&db.pool, "colleague", "USER").await?;

    let (_, created) = send(&app, "POST", "/v1/activities", Some(&creator), Some(activity_body(5))).await?;
    let id = created["data"]["id"].as_str().unwrap_or_default().to_string();
    send(&app, "POST", &format!("/v1/activities/{id}/submit"), Some(&creator), None).await?;

    let (status, body) = send(&app, "POST", &format!("/v1/activities/{id}/approve"), Some(&other), Some(json!({}))).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
    assert_eq!(body["error"]["details"]["reasons"][0], "activity:approve requires the ADMIN role");

    // only the creator may submit or edit
    let (status, _) = send(&app, "PUT", &format!("/v1/activities/{id}"), Some(&other), Some(json!({ "title": "Hijacked title" }))).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, "GET", "/v1/activities/pending", Some(&other), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn invalid_transitions_and_rejection() -> Result<()> {
    let (db, app) = common::test_app().await?;
    let (_, creator) = seed_user(&db.pool, "planner", "USER").await?;
    let (admin_id, admin) = seed_user(&db.pool, "reviewer", "ADMIN").await?;

    let (_, created) = send(&app, "POST", "/v1/activities", Some(&creator), Some(activity_body(10))).await?;
    let id = created["data"]["id"].as_str().unwrap_or_default().to_string();

    let (status, body) = send(&app, "POST", &format!("/v1/activities/{id}/complete"), Some(&creator), None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

    // drafts are editable
    let (status, body) = send(
        &app,
        "PUT",
        &format!("/v1/activities/{id}"),
        Some(&creator),
        Some(json!({ "location": "East annex" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "update failed: {body}");
    assert_eq!(body["data"]["location"], "East annex");

    send(&app, "POST", &format!("/v1/activities/{id}/submit"), Some(&creator), None).await?;

    // submitted cases are frozen
    let (status, body) = send(&app, "PUT", &format!("/v1/activities/{id}"), Some(&creator), Some(json!({ "location": "Roof" }))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_STATUS");

    let (status, pending) = send(&app, "GET", "/v1/activities/pending", Some(&admin), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending["pagination"]["total"], 1);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/v1/activities/{id}/reject"),
        Some(&admin),
        Some(json!({ "reason": "too short" })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/v1/activities/{id}/reject"),
        Some(&admin),
        Some(json!({ "reason": "Venue has no fire exit plan on file" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "reject failed: {body}");
    assert_eq!(body["data"]["status"], "REJECTED");
    assert_eq!(body["data"]["rejected_by_id"], admin_id.to_string());
    assert_eq!(body["data"]["rejection_reason"], "Venue has no fire exit plan on file");

    // rejection is terminal
    let (status, body) = send(&app, "DELETE", &format!("/v1/activities/{id}"), Some(&creator), None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

    Ok(())
}

#[tokio::test]
async fn listing_and_validation() -> Result<()> {
    let (db, app) = common::test_app().await?;
    let (creator_id, creator) = seed_user(&db.pool, "lister", "USER").await?;
    let (_, guest) = seed_user(&db.pool, "visitor", "GUEST").await?;

    let mut bad = activity_body(10);
    bad["end_date"] = bad["start_date"].clone();
    let (status, _) = send(&app, "POST", "/v1/activities", Some(&creator), Some(bad)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "POST", "/v1/activities", Some(&creator), Some(activity_body(0))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    for _ in 0..3 {
        let (status, _) = send(&app, "POST", "/v1/activities", Some(&creator), Some(activity_body(10))).await?;
        assert_eq!(status, StatusCode::CREATED);
    }

    // failed creates do not consume case numbers
    let (status, page) = send(&app, "GET", "/v1/activities?per_page=2&status=DRAFT", Some(&guest), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["pagination"]["total"], 3);
    assert_eq!(page["pagination"]["has_next"], true);
    assert_eq!(page["data"].as_array().map(Vec::len), Some(2));

    let numbers: Vec<String> = sqlx::query_scalar("SELECT case_number FROM activity_cases ORDER BY case_number")
        .fetch_all(&db.pool)
        .await?;
    assert_eq!(numbers, vec!["C-0001", "C-0002", "C-0003"]);

    let (status, mine) = send(&app, "GET", &format!("/v1/activities?creator_id={creator_id}"), Some(&guest), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine["pagination"]["total"], 3);

    let (status, types) = send(&app, "GET", "/v1/activities/types", Some(&guest), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(types["data"].as_array().map(Vec::len), Some(4));

    // guests are read-only
    let (status, _) = send(&app, "POST", "/v1/activities", Some(&guest), Some(activity_body(10))).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}
