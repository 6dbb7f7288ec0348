use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};
use thiserror::Error;

/// Discriminator carried in the `type` field of every envelope.
///
/// Strings the bridge does not understand decode to [`MessageType::Unknown`]
/// so that a foreign envelope is rejected by validation instead of failing
/// to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    Request,
    Response,
    Event,
    Heartbeat,
    HeartbeatResponse,
    #[serde(other)]
    Unknown,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Event => "event",
            MessageType::Heartbeat => "heartbeat",
            MessageType::HeartbeatResponse => "heartbeat-response",
            MessageType::Unknown => "unknown",
        }
    }

    /// Parses a wire `type` string; anything unrecognized is `Unknown`.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "request" => MessageType::Request,
            "response" => MessageType::Response,
            "event" => MessageType::Event,
            "heartbeat" => MessageType::Heartbeat,
            "heartbeat-response" => MessageType::HeartbeatResponse,
            _ => MessageType::Unknown,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical message exchanged between two bridges.
///
/// Which optional fields are required depends on [`Envelope::kind`]; see
/// [`Envelope::validate`]. Envelopes are never mutated after they are sent:
/// every reply is a freshly built envelope.
///
/// # Examples
///
/// ```
/// use crosswin_core::{Envelope, MessageType};
/// use serde_json::json;
///
/// let env = Envelope::request("orders", "msg-1", "lookup", json!({"id": 7}));
/// assert_eq!(env.kind, MessageType::Request);
/// assert!(env.validate().is_ok());
///
/// let wire = serde_json::to_value(&env).unwrap();
/// assert_eq!(wire["type"], "request");
/// assert_eq!(wire["eventName"], "lookup");
/// assert_eq!(wire["messageId"], "msg-1");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Partition key; envelopes from another namespace are invisible
    pub namespace: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Heartbeat sequence number; any JSON number is accepted inbound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter: Option<Number>,
}

/// Reasons an inbound envelope is rejected before dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("namespace mismatch: expected {expected}, got {actual}")]
    NamespaceMismatch { expected: String, actual: String },

    #[error("{kind} envelope is missing required field `{field}`")]
    MissingField {
        kind: MessageType,
        field: &'static str,
    },

    #[error("unknown message type")]
    UnknownType,
}

impl Envelope {
    fn bare(namespace: impl Into<String>, kind: MessageType) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            message_id: None,
            event_name: None,
            params: None,
            counter: None,
        }
    }

    pub fn request(
        namespace: impl Into<String>,
        message_id: impl Into<String>,
        event_name: impl Into<String>,
        params: Value,
    ) -> Self {
        Self {
            message_id: Some(message_id.into()),
            event_name: Some(event_name.into()),
            params: Some(params),
            ..Self::bare(namespace, MessageType::Request)
        }
    }

    pub fn response(
        namespace: impl Into<String>,
        message_id: impl Into<String>,
        params: Value,
    ) -> Self {
        Self {
            message_id: Some(message_id.into()),
            params: Some(params),
            ..Self::bare(namespace, MessageType::Response)
        }
    }

    pub fn event(
        namespace: impl Into<String>,
        message_id: impl Into<String>,
        event_name: impl Into<String>,
        params: Value,
    ) -> Self {
        Self {
            message_id: Some(message_id.into()),
            event_name: Some(event_name.into()),
            params: Some(params),
            ..Self::bare(namespace, MessageType::Event)
        }
    }

    pub fn heartbeat(
        namespace: impl Into<String>,
        message_id: impl Into<String>,
        counter: u64,
    ) -> Self {
        Self {
            message_id: Some(message_id.into()),
            counter: Some(Number::from(counter)),
            ..Self::bare(namespace, MessageType::Heartbeat)
        }
    }

    /// Echo of a heartbeat; `counter` is returned exactly as received.
    pub fn heartbeat_response(namespace: impl Into<String>, counter: Number) -> Self {
        Self {
            counter: Some(counter),
            ..Self::bare(namespace, MessageType::HeartbeatResponse)
        }
    }

    /// Reads an inbound JSON object without judging it.
    ///
    /// Only `namespace` and `type` must be strings; without them the payload
    /// is not an envelope at all. Every other field is kept when it has the
    /// expected JSON type and dropped otherwise, so a stray field never
    /// costs a message its delivery. Whether the fields a type needs are
    /// present is left to [`Envelope::validate`].
    pub fn from_value(raw: &Value) -> Option<Self> {
        let obj = raw.as_object()?;
        let namespace = obj.get("namespace")?.as_str()?;
        let kind = MessageType::from_wire(obj.get("type")?.as_str()?);
        Some(Self {
            message_id: string_field(obj, "messageId"),
            event_name: string_field(obj, "eventName"),
            params: obj.get("params").cloned(),
            counter: match obj.get("counter") {
                Some(Value::Number(n)) => Some(n.clone()),
                _ => None,
            },
            ..Self::bare(namespace, kind)
        })
    }

    /// Checks the per-type required fields.
    ///
    /// | type | required |
    /// |---|---|
    /// | request | `eventName`, `messageId` |
    /// | response | `messageId` |
    /// | event | `eventName` |
    /// | heartbeat, heartbeat-response | `counter` |
    ///
    /// A field of the wrong JSON type was already dropped by
    /// [`Envelope::from_value`], so it counts as missing here.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let missing = |field| ValidationError::MissingField {
            kind: self.kind,
            field,
        };
        match self.kind {
            MessageType::Request => {
                self.event_name.as_ref().ok_or_else(|| missing("eventName"))?;
                self.message_id.as_ref().ok_or_else(|| missing("messageId"))?;
            }
            MessageType::Response => {
                self.message_id.as_ref().ok_or_else(|| missing("messageId"))?;
            }
            MessageType::Event => {
                self.event_name.as_ref().ok_or_else(|| missing("eventName"))?;
            }
            MessageType::Heartbeat | MessageType::HeartbeatResponse => {
                self.counter.as_ref().ok_or_else(|| missing("counter"))?;
            }
            MessageType::Unknown => return Err(ValidationError::UnknownType),
        }
        Ok(())
    }

    /// Namespace check followed by [`Envelope::validate`].
    pub fn validate_for(&self, namespace: &str) -> Result<(), ValidationError> {
        if self.namespace != namespace {
            return Err(ValidationError::NamespaceMismatch {
                expected: namespace.to_string(),
                actual: self.namespace.clone(),
            });
        }
        self.validate()
    }

    /// `params`, or JSON `null` when absent.
    pub fn params_or_null(&self) -> Value {
        self.params.clone().unwrap_or(Value::Null)
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Status payloads a responder sends when no regular result is available.
pub mod status {
    use super::*;

    pub const UNHANDLED: &str = "unhandled";
    pub const ERROR: &str = "error";
    pub const NO_HANDLER: &str = "no_handler";

    /// The handler ran but produced nothing.
    pub fn unhandled() -> Value {
        json!({ "status": UNHANDLED })
    }

    /// The handler failed with `message`.
    pub fn error(message: impl Into<String>) -> Value {
        json!({ "status": ERROR, "message": message.into() })
    }

    /// No handler is registered for `event_name`.
    pub fn no_handler(event_name: &str) -> Value {
        json!({ "status": NO_HANDLER, "eventName": event_name })
    }
}
