use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::principal::Subject;

pub const FAIL_CLOSED_REASON: &str = "policy evaluation failed - defaulting to deny";

/// The `{subject, action, resource, context}` tuple sent to the decision point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyInput {
    pub subject: Subject,
    pub action: String,
    pub resource: Value,
    pub context: Value,
}

impl PolicyInput {
    pub fn new(subject: Subject, action: impl Into<String>) -> Self {
        Self {
            subject,
            action: action.into(),
            resource: Value::Object(Map::new()),
            context: Value::Object(Map::new()),
        }
    }

    pub fn with_resource(mut self, resource: Value) -> Self {
        self.resource = resource;
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub allow: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub obligations: Option<Value>,
    /// Set when no decision could be obtained and the deny is synthetic.
    #[serde(skip)]
    pub upstream_failure: bool,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allow: true,
            reasons: Vec::new(),
            obligations: None,
            upstream_failure: false,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            reasons: vec![reason.into()],
            obligations: None,
            upstream_failure: false,
        }
    }

    pub fn fail_closed() -> Self {
        Self {
            upstream_failure: true,
            ..Self::deny(FAIL_CLOSED_REASON)
        }
    }
}

/// Anything that can turn a [`PolicyInput`] into a [`Decision`].
///
/// Implementations never return an error: failure to decide is a deny.
#[async_trait]
pub trait PolicyDecisionPoint: Send + Sync {
    async fn evaluate(&self, input: &PolicyInput) -> Decision;

    /// Each input is decided on its own; one failure does not affect the rest.
    async fn evaluate_batch(&self, inputs: &[PolicyInput]) -> Vec<Decision> {
        let mut decisions = Vec::with_capacity(inputs.len());
        for input in inputs {
            decisions.push(self.evaluate(input).await);
        }
        decisions
    }
}

#[derive(Serialize)]
struct OpaRequest<'a> {
    input: &'a PolicyInput,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OpaResult {
    Bare(bool),
    Structured {
        #[serde(default)]
        allow: bool,
        #[serde(default)]
        reasons: Vec<String>,
        #[serde(default)]
        obligations: Option<Value>,
    },
}

#[derive(Deserialize)]
struct OpaResponse {
    #[serde(default)]
    result: Option<OpaResult>,
}

/// HTTP client for an OPA-compatible decision endpoint.
#[derive(Debug, Clone)]
pub struct OpaClient {
    http: reqwest::Client,
    endpoint: String,
}

impl OpaClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn query(&self, input: &PolicyInput) -> Result<Decision, reqwest::Error> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&OpaRequest { input })
            .send()
            .await?
            .error_for_status()?;

        let body: OpaResponse = response.json().await?;
        Ok(match body.result {
            Some(OpaResult::Bare(allow)) => Decision {
                allow,
                ..Decision::allow()
            },
            Some(OpaResult::Structured {
                allow,
                reasons,
                obligations,
            }) => Decision {
                allow,
                reasons,
                obligations,
                upstream_failure: false,
            },
            // undefined document: the policy has no opinion
            None => Decision::deny("policy returned no result"),
        })
    }
}

#[async_trait]
impl PolicyDecisionPoint for OpaClient {
    async fn evaluate(&self, input: &PolicyInput) -> Decision {
        match self.query(input).await {
            Ok(decision) => decision,
            Err(err) => {
                tracing::error!(
                    endpoint = %self.endpoint,
                    action = %input.action,
                    error = %err,
                    "policy evaluation failed"
                );
                Decision::fail_closed()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::Role;
    use uuid::Uuid;

    #[test]
    fn request_body_wraps_input() {
        let input = PolicyInput::new(Subject::new(Uuid::nil(), Role::User), "activity:read")
            .with_resource(serde_json::json!({"id": "a"}));
        let body = serde_json::to_value(OpaRequest { input: &input }).unwrap();

        assert_eq!(body["input"]["action"], "activity:read");
        assert_eq!(body["input"]["subject"]["role"], "USER");
        assert_eq!(body["input"]["resource"]["id"], "a");
        assert!(body["input"]["context"].is_object());
    }

    #[test]
    fn result_shapes_parse() {
        let bare: OpaResponse = serde_json::from_str(r#"{"result": true}"#).unwrap();
        assert!(matches!(bare.result, Some(OpaResult::Bare(true))));

        let structured: OpaResponse =
            serde_json::from_str(r#"{"result": {"allow": false, "reasons": ["nope"]}}"#).unwrap();
        match structured.result {
            Some(OpaResult::Structured { allow, reasons, obligations }) => {
                assert!(!allow);
                assert_eq!(reasons, vec!["nope".to_string()]);
                assert!(obligations.is_none());
            }
            _ => panic!("expected structured result"),
        }

        let missing: OpaResponse = serde_json::from_str("{}").unwrap();
        assert!(missing.result.is_none());
    }

    #[test]
    fn fail_closed_is_a_deny_with_reason() {
        let decision = Decision::fail_closed();
        assert!(!decision.allow);
        assert!(decision.upstream_failure);
        assert_eq!(decision.reasons, vec![FAIL_CLOSED_REASON.to_string()]);
    }
}
