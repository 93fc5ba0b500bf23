use serde_json::Value;

#[test]
fn openapi_describes_activity_cases() -> anyhow::Result<()> {
    // Build the OpenAPI document the same way the server does
    let doc = casecheck::docs::build_openapi(8000)?;
    let v = serde_json::to_value(&doc)?;

    let props = v
        .get("components")
        .and_then(|c| c.get("schemas"))
        .and_then(|s| s.get("ActivityCase"))
        .and_then(|t| t.get("properties"))
        .and_then(Value::as_object)
        .expect("components.schemas.ActivityCase.properties must exist");

    let keys = ["case_number", "status", "risk_level", "max_participants", "current_participants", "creator_id"];
    for k in &keys {
        assert!(props.contains_key(*k), "OpenAPI ActivityCase schema missing '{}'", k);
    }

    let paths = v.get("paths").and_then(Value::as_object).expect("paths must exist");
    for path in [
        "/v1/activities/{id}/approve",
        "/v1/activities/{id}/reject",
        "/v1/attendance/check-in",
        "/v1/attendance/qr-code/{code}",
    ] {
        assert!(paths.contains_key(path), "OpenAPI document missing {}", path);
    }

    assert!(v["components"]["securitySchemes"]["bearerAuth"].is_object());
    Ok(())
}
