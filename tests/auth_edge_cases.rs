mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn auth_edge_cases() -> Result<()> {
    let (db, app) = common::test_app().await?;

    // 1. Register with short password
    let short = json!({
        "username": "shorty",
        "email": "short@example.com",
        "password": "short",
        "full_name": "Short Pass"
    });
    let (status, _) = common::send(&app, "POST", "/v1/auth/register", None, Some(short)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "Should fail with bad request for short password");

    // 2. Register with valid user
    let valid = json!({
        "username": "valid_user",
        "email": "valid@example.com",
        "password": "password123",
        "full_name": "Valid User"
    });
    let (status, body) = common::send(&app, "POST", "/v1/auth/register", None, Some(valid.clone())).await?;
    assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
    assert_eq!(body["data"]["roles"], json!(["USER"]));
    assert!(body["data"].get("password_hash").is_none());

    // 3. Same username again
    let (status, body) = common::send(&app, "POST", "/v1/auth/register", None, Some(valid)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap_or_default().contains("Username already registered"));

    // 4. Wrong password, unknown user
    let wrong = json!({ "username": "valid_user", "password": "wrongpassword" });
    let (status, body) = common::send(&app, "POST", "/v1/auth/login", None, Some(wrong)).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "Should fail with unauthorized for wrong password");
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let unknown = json!({ "username": "nobody", "password": "password123" });
    let (status, _) = common::send(&app, "POST", "/v1/auth/login", None, Some(unknown)).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // 5. Login by email works and yields both tokens
    let by_email = json!({ "username": "valid@example.com", "password": "password123" });
    let (status, tokens) = common::send(&app, "POST", "/v1/auth/login", None, Some(by_email)).await?;
    assert_eq!(status, StatusCode::OK, "login failed: {tokens}");
    assert_eq!(tokens["token_type"], "bearer");
    let access = tokens["access_token"].as_str().unwrap_or_default().to_string();
    let refresh = tokens["refresh_token"].as_str().unwrap_or_default().to_string();
    assert!(!access.is_empty() && !refresh.is_empty());

    // 6. Protected route with and without a token
    let (status, _) = common::send(&app, "GET", "/v1/users/me", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = common::send(&app, "GET", "/v1/users/me", Some("not-a-jwt"), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, me) = common::send(&app, "GET", "/v1/users/me", Some(&access), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["data"]["username"], "valid_user");
    assert!(me["data"]["last_login_at"].is_string());

    // 7. A refresh token is not an access token, and vice versa
    let (status, _) = common::send(&app, "GET", "/v1/users/me", Some(&refresh), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = common::send(&app, "POST", "/v1/auth/refresh", None, Some(json!({ "refresh_token": access }))).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, renewed) = common::send(&app, "POST", "/v1/auth/refresh", None, Some(json!({ "refresh_token": refresh }))).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(renewed["access_token"].is_string());
    assert!(renewed.get("refresh_token").is_none());

    // 8. Inactive accounts cannot log in
    sqlx::query("UPDATE users SET is_active = 0 WHERE username = ?")
        .bind("valid_user")
        .execute(&db.pool)
        .await?;
    let login = json!({ "username": "valid_user", "password": "password123" });
    let (status, _) = common::send(&app, "POST", "/v1/auth/login", None, Some(login)).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn profile_update_and_user_admin() -> Result<()> {
    let (db, app) = common::test_app().await?;
    let (user_id, user) = common::seed_user(&db.pool, "alice", "USER").await?;
    let (_, admin) = common::seed_user(&db.pool, "root", "ADMIN").await?;

    let (status, body) = common::send(
        &app,
        "PUT",
        "/v1/users/me",
        Some(&user),
        Some(json!({ "full_name": "Alice Liddell", "department": "Facilities" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "update failed: {body}");
    assert_eq!(body["data"]["full_name"], "Alice Liddell");
    assert_eq!(body["data"]["department"], "Facilities");

    // listing users is an administrator action
    let (status, _) = common::send(&app, "GET", "/v1/users", Some(&user), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, list) = common::send(&app, "GET", "/v1/users?role=USER", Some(&admin), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["pagination"]["total"], 1);
    assert_eq!(list["data"][0]["id"], user_id.to_string());

    let (status, _) = common::send(&app, "GET", &format!("/v1/users/{user_id}"), Some(&admin), None).await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn racing_registrations_for_one_username() -> Result<()> {
    let (db, app) = common::test_app().await?;

    let mut handles = Vec::new();
    for i in 0..6 {
        let app = app.clone();
        let body = json!({
            "username": "contested",
            "email": format!("contested{i}@example.com"),
            "password": "password123",
            "full_name": "Contested Name"
        });
        handles.push(tokio::spawn(async move {
            common::send(&app, "POST", "/v1/auth/register", None, Some(body)).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        let (status, body) = handle.await??;
        match status {
            StatusCode::CREATED => created += 1,
            StatusCode::BAD_REQUEST => {
                let message = body["error"]["message"].as_str().unwrap_or_default();
                assert!(message.contains("Username already registered"), "unexpected body: {body}");
            }
            other => panic!("unexpected response {other}: {body}"),
        }
    }
    assert_eq!(created, 1);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = 'contested'")
        .fetch_one(&db.pool)
        .await?;
    assert_eq!(count, 1);

    Ok(())
}
