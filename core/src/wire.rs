// Transport adapter: logical envelopes <-> raw channel payloads
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::Envelope;

/// Reserved keys of the page-event host envelope.
pub mod keys {
    pub const PAGE_ID: &str = "pageId";
    pub const TYPE: &str = "type";
    pub const CONTENT: &str = "content";
    /// Value of `type` on every page-event envelope
    pub const INVOKE_CUSTOM_EVENT: &str = "invokeCustomEvent";
}

/// Namespace assumed when a page-event envelope carries no `pageId`.
pub const DEFAULT_PAGE_ID: &str = "default";

/// Wire format applied to every envelope crossing the raw channel.
///
/// `Plain` posts the logical envelope as-is. `PageEvent` wraps it for host
/// platforms that only relay `{pageId, type: "invokeCustomEvent", content}`
/// messages, using the namespace as the page id.
///
/// # Examples
///
/// ```
/// use crosswin_core::{Envelope, MessageFormat};
/// use serde_json::json;
///
/// let env = Envelope::event("billing", "m-1", "saved", json!({"ok": true}));
/// let wire = MessageFormat::PageEvent.encode(&env).unwrap();
/// assert_eq!(wire["pageId"], "billing");
/// assert_eq!(wire["type"], "invokeCustomEvent");
///
/// let back = MessageFormat::PageEvent.decode(&wire).unwrap();
/// assert_eq!(back, env);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    #[default]
    Plain,
    PageEvent,
}

impl MessageFormat {
    /// Converts an outbound logical envelope into its wire payload.
    pub fn encode(self, envelope: &Envelope) -> serde_json::Result<Value> {
        let logical = serde_json::to_value(envelope)?;
        Ok(match self {
            MessageFormat::Plain => logical,
            MessageFormat::PageEvent => {
                let mut outer = Map::with_capacity(3);
                outer.insert(
                    keys::PAGE_ID.into(),
                    Value::String(envelope.namespace.clone()),
                );
                outer.insert(
                    keys::TYPE.into(),
                    Value::String(keys::INVOKE_CUSTOM_EVENT.into()),
                );
                outer.insert(keys::CONTENT.into(), logical);
                Value::Object(outer)
            }
        })
    }

    /// Converts an inbound wire payload back into a logical envelope.
    ///
    /// Returns `None` when the payload is not an envelope at all (see
    /// [`Envelope::from_value`]); such payloads are dropped by the router.
    /// For `PageEvent` the namespace is taken from `pageId` and written over
    /// whatever `content` carried.
    pub fn decode(self, raw: &Value) -> Option<Envelope> {
        match self {
            MessageFormat::Plain => Envelope::from_value(raw),
            MessageFormat::PageEvent => {
                let outer = raw.as_object()?;
                let mut content = outer.get(keys::CONTENT)?.as_object()?.clone();
                let page_id = outer
                    .get(keys::PAGE_ID)
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_PAGE_ID);
                content.insert("namespace".into(), Value::String(page_id.to_string()));
                Envelope::from_value(&Value::Object(content))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_decode_rejects_non_objects() {
        assert!(MessageFormat::Plain.decode(&json!("hello")).is_none());
        assert!(MessageFormat::Plain.decode(&json!(42)).is_none());
        assert!(MessageFormat::Plain.decode(&Value::Null).is_none());
    }

    #[test]
    fn page_event_missing_page_id_falls_back_to_default() {
        let raw = json!({
            "type": "invokeCustomEvent",
            "content": {"type": "event", "eventName": "tick", "namespace": "ignored"}
        });
        let env = MessageFormat::PageEvent.decode(&raw).unwrap();
        assert_eq!(env.namespace, DEFAULT_PAGE_ID);
        assert_eq!(env.event_name.as_deref(), Some("tick"));
    }

    #[test]
    fn page_event_without_content_is_dropped() {
        let raw = json!({"pageId": "a", "type": "invokeCustomEvent"});
        assert!(MessageFormat::PageEvent.decode(&raw).is_none());
    }
}
