//! Structured values exchanged with the backend.
//!
//! Targets, payloads and responder results are opaque JSON mappings; this
//! crate never validates their contents. The only invariants enforced here are
//! the bookkeeping totals on [`AggregateResponse`] and the shape of
//! [`AuthenticatePayload`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque structured mapping used for targets, payloads and responder results
pub type JsonMap = Map<String, Value>;

/// The unit returned by one responder
pub type ResponsePayload = JsonMap;

const FAKE_RESPONDER_PREFIX: &str = "fake-responder-";

/// Sequential responder reference used when no real backend assigns one.
///
/// `index` is zero-based; the first responder is `fake-responder-1`.
pub fn fake_responder_ref(index: usize) -> String {
    format!("{FAKE_RESPONDER_PREFIX}{}", index + 1)
}

/// The unit sent with every emitted event and delivered to every matched handler.
///
/// Target and payload are independent and both optional on the wire; an
/// absent side deserializes to an empty mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetAndPayload {
    /// Routing information, for example `{"organizationId": "..."}`
    #[serde(default)]
    pub target: JsonMap,
    /// Event-specific body
    #[serde(default)]
    pub payload: JsonMap,
}

impl TargetAndPayload {
    /// Create an empty target and payload
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the target mapping
    pub fn with_target(mut self, target: JsonMap) -> Self {
        self.target = target;
        self
    }

    /// Replace the payload mapping
    pub fn with_payload(mut self, payload: JsonMap) -> Self {
        self.payload = payload;
        self
    }

    /// Whether both sides are empty
    pub fn is_empty(&self) -> bool {
        self.target.is_empty() && self.payload.is_empty()
    }
}

/// The outcome contributed by one responder to an aggregate reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleResponse {
    /// Identifies the responder; unique within one aggregate
    pub responder_ref: String,
    /// Handler-level errors, opaque to the client
    #[serde(default)]
    pub errors: Vec<Value>,
    /// The responder's result payload
    #[serde(default)]
    pub payload: ResponsePayload,
}

impl SingleResponse {
    /// A successful response carrying `payload`
    pub fn success(responder_ref: impl Into<String>, payload: ResponsePayload) -> Self {
        Self {
            responder_ref: responder_ref.into(),
            errors: Vec::new(),
            payload,
        }
    }

    /// A failed response carrying `errors` and an empty payload
    pub fn failure(responder_ref: impl Into<String>, errors: Vec<Value>) -> Self {
        Self {
            responder_ref: responder_ref.into(),
            errors,
            payload: ResponsePayload::new(),
        }
    }

    /// Whether this responder reported any error
    pub fn is_error(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Summary of every responder that answered one emitted event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResponse {
    /// Distinct handler registrations that matched the event
    pub total_contracts: usize,
    /// Number of entries in `responses`
    pub total_responses: usize,
    /// Sum of every responder's error count
    pub total_errors: usize,
    /// Per-responder outcomes in backend-assigned order
    #[serde(default)]
    pub responses: Vec<SingleResponse>,
}

impl AggregateResponse {
    /// Build an aggregate from responder outcomes, computing every total.
    ///
    /// Each response counts as one matched contract.
    pub fn from_responses(responses: Vec<SingleResponse>) -> Self {
        let total_errors = responses.iter().map(|r| r.errors.len()).sum();
        Self {
            total_contracts: responses.len(),
            total_responses: responses.len(),
            total_errors,
            responses,
        }
    }

    /// Build an error-free aggregate from bare payloads.
    ///
    /// Responders are named `fake-responder-1`, `fake-responder-2`, ... in order.
    pub fn from_payloads(payloads: Vec<ResponsePayload>) -> Self {
        let responses = payloads
            .into_iter()
            .enumerate()
            .map(|(index, payload)| SingleResponse::success(fake_responder_ref(index), payload))
            .collect();
        Self::from_responses(responses)
    }

    /// Check the bookkeeping totals against the responses actually carried
    pub fn is_consistent(&self) -> bool {
        let error_count: usize = self.responses.iter().map(|r| r.errors.len()).sum();
        self.total_responses == self.responses.len() && self.total_errors == error_count
    }

    /// Responses that reported at least one error
    pub fn failed_responses(&self) -> impl Iterator<Item = &SingleResponse> {
        self.responses.iter().filter(|r| r.is_error())
    }

    /// Consume the aggregate, keeping only the payloads in order
    pub fn into_payloads(self) -> Vec<ResponsePayload> {
        self.responses.into_iter().map(|r| r.payload).collect()
    }
}

/// Why a set of credentials cannot form an [`AuthenticatePayload`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthPayloadError {
    /// Neither a token nor skill credentials were supplied
    #[error("Authentication requires a token or a skill id and api key")]
    Empty,

    /// Both a token and skill credentials were supplied
    #[error("Authentication accepts a token or skill credentials, not both")]
    Ambiguous,

    /// Only one half of the skill credentials was supplied
    #[error("Skill authentication requires both a skill id and an api key")]
    IncompleteSkill,
}

/// Identity assertion sent to the backend.
///
/// The two forms are mutually exclusive. Secrets are redacted from the
/// `Debug` output so payloads can be logged safely.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthenticatePayload {
    /// A previously issued session token
    Token {
        /// The token value
        token: String,
    },
    /// Skill credentials
    Skill {
        /// The skill identifier
        #[serde(rename = "skillId")]
        skill_id: String,
        /// The skill's api key
        #[serde(rename = "apiKey")]
        api_key: String,
    },
}

impl AuthenticatePayload {
    /// Authenticate with a session token
    pub fn token(token: impl Into<String>) -> Result<Self, AuthPayloadError> {
        Self::from_parts(Some(token.into()), None, None)
    }

    /// Authenticate as a skill
    pub fn skill(
        skill_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, AuthPayloadError> {
        Self::from_parts(None, Some(skill_id.into()), Some(api_key.into()))
    }

    /// Build a payload from optional parts, enforcing mutual exclusion.
    ///
    /// Empty strings count as absent.
    pub fn from_parts(
        token: Option<String>,
        skill_id: Option<String>,
        api_key: Option<String>,
    ) -> Result<Self, AuthPayloadError> {
        let token = token.filter(|t| !t.is_empty());
        let skill_id = skill_id.filter(|s| !s.is_empty());
        let api_key = api_key.filter(|k| !k.is_empty());

        match (token, skill_id, api_key) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => Err(AuthPayloadError::Ambiguous),
            (Some(token), None, None) => Ok(Self::Token { token }),
            (None, Some(skill_id), Some(api_key)) => Ok(Self::Skill { skill_id, api_key }),
            (None, None, None) => Err(AuthPayloadError::Empty),
            (None, _, _) => Err(AuthPayloadError::IncompleteSkill),
        }
    }

    /// Re-check the invariants on a payload that was built directly
    pub fn validate(&self) -> Result<(), AuthPayloadError> {
        match self {
            Self::Token { token } if token.is_empty() => Err(AuthPayloadError::Empty),
            Self::Skill { skill_id, api_key } if skill_id.is_empty() && api_key.is_empty() => {
                Err(AuthPayloadError::Empty)
            }
            Self::Skill { skill_id, api_key } if skill_id.is_empty() || api_key.is_empty() => {
                Err(AuthPayloadError::IncompleteSkill)
            }
            _ => Ok(()),
        }
    }

    /// The payload mapping sent with the authenticate event
    pub fn to_payload(&self) -> JsonMap {
        let mut map = JsonMap::new();
        match self {
            Self::Token { token } => {
                map.insert("token".to_string(), Value::String(token.clone()));
            }
            Self::Skill { skill_id, api_key } => {
                map.insert("skillId".to_string(), Value::String(skill_id.clone()));
                map.insert("apiKey".to_string(), Value::String(api_key.clone()));
            }
        }
        map
    }

    /// Short label for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::Skill { .. } => "skill",
        }
    }
}

impl fmt::Debug for AuthenticatePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token { .. } => f.debug_struct("Token").field("token", &"<redacted>").finish(),
            Self::Skill { skill_id, .. } => f
                .debug_struct("Skill")
                .field("skill_id", skill_id)
                .field("api_key", &"<redacted>")
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn map(value: Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_single_payload_aggregate() {
        let actual = AggregateResponse::from_payloads(vec![map(json!({"Hello": "World"}))]);

        let expected = AggregateResponse {
            total_contracts: 1,
            total_responses: 1,
            total_errors: 0,
            responses: vec![SingleResponse {
                responder_ref: "fake-responder-1".to_string(),
                errors: vec![],
                payload: map(json!({"Hello": "World"})),
            }],
        };

        assert_eq!(actual, expected);
    }

    #[test]
    fn test_two_payload_aggregate_numbers_responders_in_order() {
        let actual = AggregateResponse::from_payloads(vec![
            map(json!({"First": "Response"})),
            map(json!({"Second": "Response", "Number": 42})),
        ]);

        assert_eq!(actual.total_contracts, 2);
        assert_eq!(actual.total_responses, 2);
        assert_eq!(actual.total_errors, 0);
        assert_eq!(actual.responses[0].responder_ref, "fake-responder-1");
        assert_eq!(actual.responses[1].responder_ref, "fake-responder-2");
        assert_eq!(actual.responses[1].payload["Number"], json!(42));
    }

    #[test]
    fn test_aggregate_counts_errors_across_responders() {
        let aggregate = AggregateResponse::from_responses(vec![
            SingleResponse::success("a", JsonMap::new()),
            SingleResponse::failure("b", vec![json!({"code": "ONE"}), json!({"code": "TWO"})]),
            SingleResponse::failure("c", vec![json!("three")]),
        ]);

        assert_eq!(aggregate.total_errors, 3);
        assert!(aggregate.is_consistent());
        let failed: Vec<_> = aggregate.failed_responses().map(|r| r.responder_ref.as_str()).collect();
        assert_eq!(failed, vec!["b", "c"]);
    }

    #[test]
    fn test_inconsistent_totals_detected() {
        let mut aggregate = AggregateResponse::from_payloads(vec![JsonMap::new()]);
        aggregate.total_responses = 3;
        assert!(!aggregate.is_consistent());

        let mut aggregate = AggregateResponse::from_payloads(vec![JsonMap::new()]);
        aggregate.total_errors = 1;
        assert!(!aggregate.is_consistent());
    }

    #[test]
    fn test_aggregate_wire_format_is_camel_case() {
        let aggregate = AggregateResponse::from_payloads(vec![map(json!({"ok": true}))]);
        let value = serde_json::to_value(&aggregate).unwrap();

        assert_eq!(value["totalContracts"], json!(1));
        assert_eq!(value["totalResponses"], json!(1));
        assert_eq!(value["totalErrors"], json!(0));
        assert_eq!(value["responses"][0]["responderRef"], json!("fake-responder-1"));
    }

    #[test]
    fn test_target_and_payload_defaults_missing_sides() {
        let parsed: TargetAndPayload =
            serde_json::from_value(json!({"payload": {"message": "hi"}})).unwrap();
        assert!(parsed.target.is_empty());
        assert_eq!(parsed.payload["message"], json!("hi"));

        let empty: TargetAndPayload = serde_json::from_value(json!({})).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_authenticate_payload_forms() {
        let token = AuthenticatePayload::token("abc").unwrap();
        assert_eq!(token.to_payload(), map(json!({"token": "abc"})));
        assert_eq!(token.kind(), "token");

        let skill = AuthenticatePayload::skill("skill-1", "key-1").unwrap();
        assert_eq!(
            skill.to_payload(),
            map(json!({"skillId": "skill-1", "apiKey": "key-1"}))
        );
        assert_eq!(skill.kind(), "skill");
    }

    #[test]
    fn test_authenticate_payload_rejects_bad_combinations() {
        assert_eq!(
            AuthenticatePayload::from_parts(None, None, None),
            Err(AuthPayloadError::Empty)
        );
        assert_eq!(
            AuthenticatePayload::from_parts(Some(String::new()), Some(String::new()), None),
            Err(AuthPayloadError::Empty)
        );
        assert_eq!(
            AuthenticatePayload::from_parts(
                Some("t".to_string()),
                Some("s".to_string()),
                Some("k".to_string())
            ),
            Err(AuthPayloadError::Ambiguous)
        );
        assert_eq!(
            AuthenticatePayload::from_parts(None, Some("s".to_string()), None),
            Err(AuthPayloadError::IncompleteSkill)
        );
    }

    #[test]
    fn test_authenticate_payload_validate_direct_construction() {
        let payload = AuthenticatePayload::Skill {
            skill_id: "s".to_string(),
            api_key: String::new(),
        };
        assert_eq!(payload.validate(), Err(AuthPayloadError::IncompleteSkill));

        let payload = AuthenticatePayload::Token {
            token: String::new(),
        };
        assert_eq!(payload.validate(), Err(AuthPayloadError::Empty));
    }

    #[test]
    fn test_authenticate_payload_debug_redacts_secrets() {
        let token = AuthenticatePayload::token("super-secret").unwrap();
        let skill = AuthenticatePayload::skill("skill-1", "hidden-key").unwrap();

        assert!(!format!("{token:?}").contains("super-secret"));
        let rendered = format!("{skill:?}");
        assert!(rendered.contains("skill-1"));
        assert!(!rendered.contains("hidden-key"));
    }

    #[test]
    fn test_authenticate_payload_deserializes_both_forms() {
        let token: AuthenticatePayload = serde_json::from_value(json!({"token": "t"})).unwrap();
        assert_eq!(token, AuthenticatePayload::token("t").unwrap());

        let skill: AuthenticatePayload =
            serde_json::from_value(json!({"skillId": "s", "apiKey": "k"})).unwrap();
        assert_eq!(skill, AuthenticatePayload::skill("s", "k").unwrap());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Aggregates built from responder outcomes always satisfy the totals invariants.
        #[test]
        fn prop_from_responses_is_consistent(error_counts in proptest::collection::vec(0usize..4, 0..12)) {
            let responses: Vec<_> = error_counts
                .iter()
                .enumerate()
                .map(|(i, count)| {
                    let errors = (0..*count).map(|n| json!(n)).collect();
                    SingleResponse { responder_ref: fake_responder_ref(i), errors, payload: JsonMap::new() }
                })
                .collect();

            let aggregate = AggregateResponse::from_responses(responses);

            prop_assert!(aggregate.is_consistent());
            prop_assert_eq!(aggregate.total_responses, error_counts.len());
            prop_assert_eq!(aggregate.total_contracts, aggregate.total_responses);
            prop_assert_eq!(aggregate.total_errors, error_counts.iter().sum::<usize>());
        }
    }
}
