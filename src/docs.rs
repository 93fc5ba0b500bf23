use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::authz::is_public;
use crate::models;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::auth::register,
		routes::auth::login,
		routes::auth::refresh,
		routes::auth::logout,
		routes::users::me,
		routes::users::update_me,
		routes::users::list,
		routes::users::get_user,
		routes::activities::create,
		routes::activities::list,
		routes::activities::types,
		routes::activities::pending,
		routes::activities::get_activity,
		routes::activities::update,
		routes::activities::cancel,
		routes::activities::submit,
		routes::activities::start,
		routes::activities::complete,
		routes::activities::approve,
		routes::activities::reject,
		routes::activities::participants,
		routes::activities::history,
		routes::attendance::register,
		routes::attendance::check_in,
		routes::attendance::check_out,
		routes::attendance::records,
		routes::attendance::stats,
		routes::attendance::create_qr,
		routes::attendance::validate_qr
	),
	components(
		schemas(
			routes::health::HealthResponse,
			models::user::User,
			models::user::RegisterRequest,
			models::user::LoginRequest,
			models::user::RefreshRequest,
			models::user::TokenPair,
			models::user::ProfileUpdateRequest,
			models::activity::ActivityCase,
			models::activity::ActivityStatus,
			models::activity::RiskLevel,
			models::activity::ActivityType,
			models::activity::ActivityCreateRequest,
			models::activity::ActivityUpdateRequest,
			models::activity::ApprovalRequest,
			models::activity::RejectionRequest,
			models::activity::Participant,
			models::approval::ApprovalWorkflowEntry,
			models::approval::WorkflowAction,
			models::attendance::AttendanceRecord,
			models::attendance::AttendanceStatus,
			models::attendance::AttendanceStats,
			models::attendance::CodeType,
			models::attendance::QrCode,
			models::attendance::QrCodeCreateRequest,
			models::attendance::RegistrationRequest,
			models::attendance::CheckInRequest,
			models::response::PaginationMeta
		)
	),
	tags(
		(name = "Health", description = "Service health"),
		(name = "Auth", description = "Registration, login and token refresh"),
		(name = "Users", description = "Profiles and user administration"),
		(name = "Activities", description = "Activity cases and their approval workflow"),
		(name = "Attendance", description = "Registration, QR codes and check-in/check-out")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(&ApiDoc::openapi())?;

	ensure_security_components(&mut doc);
	ensure_global_security(&mut doc);
	mark_public_operations(&mut doc);
	ensure_servers(&mut doc, port);

	Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.persist_authorization(true);

	let doc_json = Arc::new(serde_json::to_value(&doc)?);

	let json_route = get(move || {
		let doc_json = Arc::clone(&doc_json);
		async move { Json((*doc_json).clone()) }
	});

	Ok(Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config)))
}

fn object_entry<'a>(parent: &'a mut Value, key: &str) -> Option<&'a mut Map<String, Value>> {
	parent
		.as_object_mut()?
		.entry(key)
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
}

fn ensure_security_components(doc: &mut Value) {
	let Some(components) = object_entry(doc, "components") else {
		return;
	};
	let schemes = components
		.entry("securitySchemes")
		.or_insert_with(|| Value::Object(Map::new()));

	if let Some(schemes) = schemes.as_object_mut() {
		schemes.insert(
			"bearerAuth".to_string(),
			json!({
				"type": "http",
				"scheme": "bearer",
				"bearerFormat": "JWT"
			}),
		);
	}
}

fn ensure_global_security(doc: &mut Value) {
	if let Some(root) = doc.as_object_mut() {
		root.entry("security").or_insert_with(|| json!([{ "bearerAuth": [] }]));
	}
}

/// Operations the enforcement layer lets through unauthenticated get an empty requirement.
fn mark_public_operations(doc: &mut Value) {
	let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) else {
		return;
	};

	for (path, item) in paths.iter_mut() {
		if !is_public(path) {
			continue;
		}
		if let Some(operations) = item.as_object_mut() {
			for operation in operations.values_mut().filter_map(Value::as_object_mut) {
				operation.insert("security".to_string(), json!([]));
			}
		}
	}
}

fn ensure_servers(doc: &mut Value, port: u16) {
	let tls_enabled = std::env::var("TLS_CERT_PATH").is_ok() && std::env::var("TLS_KEY_PATH").is_ok();
	let scheme = if tls_enabled { "https" } else { "http" };
	let server_url = format!("{}://localhost:{}", scheme, port);

	match doc.get_mut("servers") {
		Some(Value::Array(arr)) => {
			let has = arr.iter().any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				arr.push(json!({ "url": server_url }));
			}
		}
		_ => {
			doc["servers"] = json!([{ "url": server_url }]);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn public_operations_have_no_security_requirement() {
		let doc = serde_json::to_value(build_openapi(8000).unwrap()).unwrap();
		let login = &doc["paths"]["/v1/auth/login"]["post"];
		assert_eq!(login["security"], json!([]));
		assert!(doc["paths"]["/v1/activities"]["get"].get("security").is_none());
		assert_eq!(doc["servers"][0]["url"], "http://localhost:8000");
	}
}
