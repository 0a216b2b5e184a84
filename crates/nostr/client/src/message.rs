//! Nostr relay message types.
//!
//! This module implements the relay protocol messages as specified in NIP-01:
//! - Client to Relay: EVENT, REQ, CLOSE
//! - Relay to Client: EVENT, OK, EOSE, CLOSED, NOTICE, COUNT
//!
//! [`RelayMessage::from_json`] is strict. [`RelayMessage::decode`] is what the
//! session uses: anything it can't make sense of becomes
//! [`RelayMessage::Unrecognized`] so one bad frame never ends a session.

use nostr::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur when parsing relay messages.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(String),
}

/// Messages sent from client to relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Publish an event: ["EVENT", <event JSON>]
    Event(Event),

    /// Subscribe to events: ["REQ", <subscription_id>, <filter1>, <filter2>, ...]
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },

    /// Close a subscription: ["CLOSE", <subscription_id>]
    Close { subscription_id: String },
}

impl ClientMessage {
    pub fn req(subscription_id: impl Into<String>, filter: Filter) -> Self {
        ClientMessage::Req {
            subscription_id: subscription_id.into(),
            filters: vec![filter],
        }
    }

    pub fn close(subscription_id: impl Into<String>) -> Self {
        ClientMessage::Close {
            subscription_id: subscription_id.into(),
        }
    }

    /// Serialize to JSON array for sending to relay.
    pub fn to_json(&self) -> Result<String, MessageError> {
        let value = match self {
            ClientMessage::Event(event) => {
                serde_json::json!(["EVENT", event])
            }
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut arr: Vec<Value> = vec![
                    Value::String("REQ".to_string()),
                    Value::String(subscription_id.clone()),
                ];
                for filter in filters {
                    arr.push(serde_json::to_value(filter)?);
                }
                Value::Array(arr)
            }
            ClientMessage::Close { subscription_id } => {
                serde_json::json!(["CLOSE", subscription_id])
            }
        };
        Ok(value.to_string())
    }

    /// Parse a client message. Mostly useful to relays and test doubles.
    pub fn from_json(json: &str) -> Result<Self, MessageError> {
        let arr = parse_array(json)?;
        let msg_type = message_type(&arr)?;

        match msg_type {
            "EVENT" => {
                let event = arr
                    .get(1)
                    .ok_or_else(|| MessageError::MissingField("event".to_string()))?;
                Ok(ClientMessage::Event(serde_json::from_value(event.clone())?))
            }
            "REQ" => {
                let subscription_id = string_at(&arr, 1, "subscription_id")?;
                let filters = arr[2..]
                    .iter()
                    .map(|f| serde_json::from_value(f.clone()))
                    .collect::<Result<Vec<Filter>, _>>()?;
                Ok(ClientMessage::Req {
                    subscription_id,
                    filters,
                })
            }
            "CLOSE" => Ok(ClientMessage::Close {
                subscription_id: string_at(&arr, 1, "subscription_id")?,
            }),
            other => Err(MessageError::UnknownType(other.to_string())),
        }
    }
}

/// Discriminant of a [`RelayMessage`], used to say which frames a pending
/// request is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Event,
    Ok,
    Eose,
    Closed,
    Notice,
    Count,
    Unrecognized,
}

/// Messages sent from relay to client.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// Event matching a subscription: ["EVENT", <subscription_id>, <event JSON>]
    Event {
        subscription_id: String,
        event: Event,
    },

    /// Command result: ["OK", <event_id>, <true|false>, <message>]
    Ok {
        event_id: String,
        success: bool,
        message: String,
    },

    /// End of stored events: ["EOSE", <subscription_id>]
    Eose { subscription_id: String },

    /// Subscription closed by relay: ["CLOSED", <subscription_id>, <message>]
    Closed {
        subscription_id: String,
        message: String,
    },

    /// Human-readable notice: ["NOTICE", <message>]
    Notice { message: String },

    /// Count response (NIP-45): ["COUNT", <subscription_id>, <n> | {"count": <n>}]
    ///
    /// `count` is `None` when the payload is neither shape.
    Count {
        subscription_id: String,
        count: Option<u64>,
    },

    /// Anything else the relay sent.
    Unrecognized { raw: String, reason: String },
}

impl RelayMessage {
    /// Parse a JSON message from the relay.
    pub fn from_json(json: &str) -> Result<Self, MessageError> {
        let arr = parse_array(json)?;
        let msg_type = message_type(&arr)?;

        match msg_type {
            "EVENT" => {
                let subscription_id = string_at(&arr, 1, "subscription_id")?;
                let event = arr
                    .get(2)
                    .ok_or_else(|| MessageError::MissingField("event".to_string()))?;
                Ok(RelayMessage::Event {
                    subscription_id,
                    event: serde_json::from_value(event.clone())?,
                })
            }
            "OK" => {
                let event_id = string_at(&arr, 1, "event_id")?;
                let success = arr
                    .get(2)
                    .ok_or_else(|| MessageError::MissingField("success".to_string()))?
                    .as_bool()
                    .ok_or_else(|| {
                        MessageError::InvalidFormat("success not a boolean".to_string())
                    })?;
                let message = arr.get(3).and_then(Value::as_str).unwrap_or("").to_string();
                Ok(RelayMessage::Ok {
                    event_id,
                    success,
                    message,
                })
            }
            "EOSE" => Ok(RelayMessage::Eose {
                subscription_id: string_at(&arr, 1, "subscription_id")?,
            }),
            "CLOSED" => {
                let subscription_id = string_at(&arr, 1, "subscription_id")?;
                let message = arr.get(2).and_then(Value::as_str).unwrap_or("").to_string();
                Ok(RelayMessage::Closed {
                    subscription_id,
                    message,
                })
            }
            "NOTICE" => Ok(RelayMessage::Notice {
                message: string_at(&arr, 1, "message")?,
            }),
            "COUNT" => {
                let subscription_id = string_at(&arr, 1, "subscription_id")?;
                let payload = arr
                    .get(2)
                    .ok_or_else(|| MessageError::MissingField("count".to_string()))?;
                Ok(RelayMessage::Count {
                    subscription_id,
                    count: count_payload(payload),
                })
            }
            other => Err(MessageError::UnknownType(other.to_string())),
        }
    }

    /// Parse a relay frame, never failing.
    pub fn decode(json: &str) -> Self {
        match Self::from_json(json) {
            Ok(msg) => msg,
            Err(e) => RelayMessage::Unrecognized {
                raw: json.to_string(),
                reason: e.to_string(),
            },
        }
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            RelayMessage::Event { .. } => FrameKind::Event,
            RelayMessage::Ok { .. } => FrameKind::Ok,
            RelayMessage::Eose { .. } => FrameKind::Eose,
            RelayMessage::Closed { .. } => FrameKind::Closed,
            RelayMessage::Notice { .. } => FrameKind::Notice,
            RelayMessage::Count { .. } => FrameKind::Count,
            RelayMessage::Unrecognized { .. } => FrameKind::Unrecognized,
        }
    }

    /// The id this frame correlates on: the subscription id, or the event id for `OK`.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            RelayMessage::Event {
                subscription_id, ..
            }
            | RelayMessage::Eose { subscription_id }
            | RelayMessage::Closed {
                subscription_id, ..
            }
            | RelayMessage::Count {
                subscription_id, ..
            } => Some(subscription_id),
            RelayMessage::Ok { event_id, .. } => Some(event_id),
            RelayMessage::Notice { .. } | RelayMessage::Unrecognized { .. } => None,
        }
    }
}

fn parse_array(json: &str) -> Result<Vec<Value>, MessageError> {
    let arr: Vec<Value> =
        serde_json::from_str(json).map_err(|e| MessageError::InvalidFormat(e.to_string()))?;
    if arr.is_empty() {
        return Err(MessageError::InvalidFormat("empty array".to_string()));
    }
    Ok(arr)
}

fn message_type(arr: &[Value]) -> Result<&str, MessageError> {
    arr[0]
        .as_str()
        .ok_or_else(|| MessageError::InvalidFormat("first element not a string".to_string()))
}

fn string_at(arr: &[Value], index: usize, field: &str) -> Result<String, MessageError> {
    arr.get(index)
        .ok_or_else(|| MessageError::MissingField(field.to_string()))?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| MessageError::InvalidFormat(format!("{} not a string", field)))
}

// Relays disagree on the shape: some send a bare number, some `{"count": n}`.
fn count_payload(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => count_number(n),
        Value::Object(obj) => match obj.get("count") {
            Some(Value::Number(n)) => count_number(n),
            _ => None,
        },
        _ => None,
    }
}

// Some relays serialize counts as floats (`5.0`).
fn count_number(n: &serde_json::Number) -> Option<u64> {
    n.as_u64().or_else(|| {
        n.as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f as u64)
    })
}

/// Filter for subscription requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Event IDs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    /// Authors (pubkeys)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,

    /// Event kinds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,

    /// Events since timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    /// Events until timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,

    /// Maximum number of events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    /// Generic tag queries keyed with the leading `#` (e.g. `#d`, `#p`)
    #[serde(flatten, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, Vec<String>>,
}

impl Filter {
    /// Create a new empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(mut self, ids: Vec<String>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.authors = Some(authors);
        self
    }

    pub fn kinds(mut self, kinds: Vec<u16>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    pub fn until(mut self, timestamp: u64) -> Self {
        self.until = Some(timestamp);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Add a tag filter. The key should be the tag letter (e.g., "d", "p").
    pub fn tag(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.tags.insert(format!("#{}", key.into()), values);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_event() -> Event {
        Event {
            id: "abc123".to_string(),
            pubkey: "pubkey123".to_string(),
            created_at: 1234567890,
            kind: 1,
            tags: vec![],
            content: "Hello".to_string(),
            sig: "sig123".to_string(),
        }
    }

    #[test]
    fn test_client_message_event() {
        let json = ClientMessage::Event(sample_event()).to_json().unwrap();
        assert_eq!(
            json,
            r#"["EVENT",{"id":"abc123","pubkey":"pubkey123","created_at":1234567890,"kind":1,"tags":[],"content":"Hello","sig":"sig123"}]"#
        );
    }

    #[test]
    fn test_client_message_req() {
        let msg = ClientMessage::req("count-1", Filter::new().kinds(vec![1]).limit(10));
        assert_eq!(msg.to_json().unwrap(), r#"["REQ","count-1",{"kinds":[1],"limit":10}]"#);
    }

    #[test]
    fn test_client_message_close() {
        assert_eq!(
            ClientMessage::close("sub1").to_json().unwrap(),
            r#"["CLOSE","sub1"]"#
        );
    }

    #[test]
    fn test_client_message_from_json() {
        let msg = ClientMessage::from_json(r##"["REQ","sub1",{"kinds":[1]},{"#d":["whitelist"]}]"##)
            .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Req {
                subscription_id: "sub1".to_string(),
                filters: vec![
                    Filter::new().kinds(vec![1]),
                    Filter::new().tag("d", vec!["whitelist".to_string()]),
                ],
            }
        );

        assert_eq!(
            ClientMessage::from_json(r#"["CLOSE","sub1"]"#).unwrap(),
            ClientMessage::close("sub1")
        );
        assert!(ClientMessage::from_json(r#"["OK","x",true,""]"#).is_err());
    }

    #[test]
    fn test_relay_message_event() {
        let json = r#"["EVENT","sub1",{"id":"abc","pubkey":"pk","created_at":123,"kind":1,"tags":[],"content":"Hello","sig":"sig"}]"#;
        match RelayMessage::from_json(json).unwrap() {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                assert_eq!(subscription_id, "sub1");
                assert_eq!(event.id, "abc");
                assert_eq!(event.content, "Hello");
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_relay_message_ok() {
        assert_eq!(
            RelayMessage::from_json(r#"["OK","event123",true,""]"#).unwrap(),
            RelayMessage::Ok {
                event_id: "event123".to_string(),
                success: true,
                message: String::new(),
            }
        );

        match RelayMessage::from_json(r#"["OK","event123",false,"blocked: not on whitelist"]"#)
            .unwrap()
        {
            RelayMessage::Ok {
                success, message, ..
            } => {
                assert!(!success);
                assert_eq!(message, "blocked: not on whitelist");
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_relay_message_ok_without_message() {
        match RelayMessage::from_json(r#"["OK","event123",false]"#).unwrap() {
            RelayMessage::Ok { message, .. } => assert_eq!(message, ""),
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_relay_message_eose_closed_notice() {
        assert_eq!(
            RelayMessage::from_json(r#"["EOSE","sub1"]"#).unwrap(),
            RelayMessage::Eose {
                subscription_id: "sub1".to_string()
            }
        );
        assert_eq!(
            RelayMessage::from_json(r#"["CLOSED","sub1","error: too many subscriptions"]"#)
                .unwrap(),
            RelayMessage::Closed {
                subscription_id: "sub1".to_string(),
                message: "error: too many subscriptions".to_string(),
            }
        );
        assert_eq!(
            RelayMessage::from_json(r#"["NOTICE","rate limited"]"#).unwrap(),
            RelayMessage::Notice {
                message: "rate limited".to_string()
            }
        );
    }

    #[test]
    fn test_relay_message_count_shapes() {
        let count = |json: &str| match RelayMessage::from_json(json).unwrap() {
            RelayMessage::Count { count, .. } => count,
            other => panic!("wrong message type: {:?}", other),
        };

        assert_eq!(count(r#"["COUNT","c1",{"count":42}]"#), Some(42));
        assert_eq!(count(r#"["COUNT","c1",42]"#), Some(42));
        assert_eq!(count(r#"["COUNT","c1","42"]"#), None);
        assert_eq!(count(r#"["COUNT","c1",{"approximate":true}]"#), None);
        assert_eq!(count(r#"["COUNT","c1",5.0]"#), Some(5));
        assert_eq!(count(r#"["COUNT","c1",{"count":7.0}]"#), Some(7));
        assert_eq!(count(r#"["COUNT","c1",-1]"#), None);
        assert_eq!(count(r#"["COUNT","c1",-2.0]"#), None);
    }

    #[test]
    fn test_decode_never_fails() {
        for raw in [
            "not valid json",
            "{}",
            "[]",
            "[1,2,3]",
            r#"["UNKNOWN"]"#,
            r#"["EVENT","sub1"]"#,
            r#"["OK","id","yes",""]"#,
            r#"["EOSE"]"#,
            r#"["COUNT","c1"]"#,
        ] {
            match RelayMessage::decode(raw) {
                RelayMessage::Unrecognized { raw: kept, reason } => {
                    assert_eq!(kept, raw);
                    assert!(!reason.is_empty());
                }
                other => panic!("{} decoded as {:?}", raw, other),
            }
        }
    }

    #[test]
    fn test_correlation_id() {
        assert_eq!(
            RelayMessage::decode(r#"["OK","evt",true,""]"#).correlation_id(),
            Some("evt")
        );
        assert_eq!(
            RelayMessage::decode(r#"["COUNT","count-1",3]"#).correlation_id(),
            Some("count-1")
        );
        assert_eq!(RelayMessage::decode(r#"["NOTICE","hi"]"#).correlation_id(), None);
        assert_eq!(RelayMessage::decode("garbage").correlation_id(), None);
    }

    #[test]
    fn test_kind() {
        assert_eq!(RelayMessage::decode(r#"["EOSE","s"]"#).kind(), FrameKind::Eose);
        assert_eq!(RelayMessage::decode("garbage").kind(), FrameKind::Unrecognized);
    }

    #[test]
    fn test_filter_serialization() {
        let filter = Filter::new().kinds(vec![1]).limit(10);
        assert_eq!(
            serde_json::to_string(&filter).unwrap(),
            r#"{"kinds":[1],"limit":10}"#
        );

        let filter = Filter::new().tag("d", vec!["whitelist".to_string()]);
        assert_eq!(
            serde_json::to_string(&filter).unwrap(),
            r##"{"#d":["whitelist"]}"##
        );
    }
}
