//! Bridge wire envelopes.
//!
//! Request: `{ "id": string, "method": string, "params": any }`
//!
//! Response: `{ "id": string, "result": any }` or `{ "id": string, "error": string }`.
//! Exactly one of `result` / `error` is present. A decoded response carrying
//! both or neither is rejected.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Error text sent for calls cut short by shutdown. Reserved: only
/// [`BridgeResponse::closed`] puts it on the wire.
pub const BRIDGE_CLOSED: &str = "bridge closed";

/// Prefix given to an ordinary error whose text equals [`BRIDGE_CLOSED`].
pub const RESERVED_ERROR_PREFIX: &str = "handler failed: ";

/// Error text sent when an id is reused while its first call is in flight.
pub const DUPLICATE_REQUEST_ID: &str = "duplicate request id";

/// One call crossing the bridge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
    /// Correlation id, unique among the sender's outstanding calls.
    pub id: String,
    /// Handler registry key.
    pub method: String,
    /// Opaque payload handed to the handler. Absent decodes as `null`.
    #[serde(default)]
    pub params: Value,
}

impl BridgeRequest {
    /// Build a request.
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Success or failure of one call.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Handler result.
    Result(Value),
    /// Error message.
    Error(String),
}

/// The reply matching a [`BridgeRequest`] by `id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireResponse", into = "WireResponse")]
pub struct BridgeResponse {
    /// Echo of the request id.
    pub id: String,
    /// Result XOR error.
    pub outcome: Outcome,
}

impl BridgeResponse {
    /// Successful reply.
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            outcome: Outcome::Result(result),
        }
    }

    /// Error reply. A message equal to [`BRIDGE_CLOSED`] is sent with
    /// [`RESERVED_ERROR_PREFIX`] so the caller never reads it as shutdown.
    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message == BRIDGE_CLOSED {
            message.insert_str(0, RESERVED_ERROR_PREFIX);
        }
        Self {
            id: id.into(),
            outcome: Outcome::Error(message),
        }
    }

    /// Reply for a call cut short by shutdown.
    pub fn closed(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outcome: Outcome::Error(BRIDGE_CLOSED.to_owned()),
        }
    }

    /// Whether this is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct WireResponse {
    id: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Treats an explicit `null` as present so `{"result": null}` is a result.
fn present<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(d).map(Some)
}

impl TryFrom<WireResponse> for BridgeResponse {
    type Error = String;

    fn try_from(wire: WireResponse) -> Result<Self, Self::Error> {
        let outcome = match (wire.result, wire.error) {
            (Some(result), None) => Outcome::Result(result),
            (None, Some(error)) => Outcome::Error(error),
            (Some(_), Some(_)) => {
                return Err(format!("response {} carries both result and error", wire.id));
            }
            (None, None) => {
                return Err(format!("response {} carries neither result nor error", wire.id));
            }
        };
        Ok(Self {
            id: wire.id,
            outcome,
        })
    }
}

impl From<BridgeResponse> for WireResponse {
    fn from(r: BridgeResponse) -> Self {
        match r.outcome {
            Outcome::Result(result) => Self {
                id: r.id,
                result: Some(result),
                error: None,
            },
            Outcome::Error(error) => Self {
                id: r.id,
                result: None,
                error: Some(error),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn result_response_shape() {
        let r = BridgeResponse::ok("1", json!({"echoed": {"x": 1}}));
        insta::assert_json_snapshot!(r, @r###"
        {
          "id": "1",
          "result": {
            "echoed": {
              "x": 1
            }
          }
        }
        "###);
    }

    #[test]
    fn error_response_shape() {
        let r = BridgeResponse::error("2", "unknown method: doesNotExist");
        assert!(r.is_error());
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            json!({"id": "2", "error": "unknown method: doesNotExist"})
        );
    }

    #[test]
    fn only_closed_sends_the_shutdown_text() {
        assert_eq!(BridgeResponse::closed("1").outcome, Outcome::Error(BRIDGE_CLOSED.into()));
        assert_eq!(
            BridgeResponse::error("2", BRIDGE_CLOSED).outcome,
            Outcome::Error("handler failed: bridge closed".into())
        );
        assert_eq!(
            BridgeResponse::error("3", "bridge closed early").outcome,
            Outcome::Error("bridge closed early".into())
        );
    }

    #[test]
    fn null_result_is_a_result() {
        let r: BridgeResponse = serde_json::from_str(r#"{"id":"1","result":null}"#).unwrap();
        assert_eq!(r.outcome, Outcome::Result(Value::Null));
        assert!(!r.is_error());
        assert_eq!(serde_json::to_string(&r).unwrap(), r#"{"id":"1","result":null}"#);
    }

    #[test]
    fn both_result_and_error_rejected() {
        let err = serde_json::from_str::<BridgeResponse>(r#"{"id":"1","result":1,"error":"x"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("both"));
    }

    #[test]
    fn neither_result_nor_error_rejected() {
        let err = serde_json::from_str::<BridgeResponse>(r#"{"id":"1"}"#).unwrap_err();
        assert!(err.to_string().contains("neither"));
    }

    #[test]
    fn missing_params_decode_as_null() {
        let r: BridgeRequest = serde_json::from_str(r#"{"id":"1","method":"echo"}"#).unwrap();
        assert_eq!(r.params, Value::Null);
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-z\\n\"]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn encoded_response_is_single_line_with_one_outcome(
            id in "[a-z0-9-]{1,16}",
            value in arb_value(),
            as_error in any::<bool>(),
        ) {
            let response = if as_error {
                BridgeResponse::error(id, "failed\nwith newline")
            } else {
                BridgeResponse::ok(id, value)
            };
            let line = serde_json::to_string(&response).unwrap();
            prop_assert!(!line.contains('\n'));
            let raw: Value = serde_json::from_str(&line).unwrap();
            let obj = raw.as_object().unwrap();
            prop_assert!(obj.contains_key("result") ^ obj.contains_key("error"));
            let back: BridgeResponse = serde_json::from_str(&line).unwrap();
            prop_assert_eq!(back, response);
        }
    }
}
