// Shared data types used across crates.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A published message after the broker has stamped it.
///
/// The broker sets `topic` and `timestamp` at publish time and mints an id
/// when the client supplied an empty one. Stamped messages are immutable and
/// shared by reference across the replay ring and every subscriber queue;
/// consumers must treat them as read-only.
///
/// ```
/// use courier_common::Message;
///
/// let msg: Message = serde_json::from_str(
///     r#"{"id":"m1","payload":{"x":1},"topic":"orders","timestamp":"2024-01-01T00:00:00Z"}"#,
/// ).expect("decode");
/// assert_eq!(msg.topic, "orders");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub payload: serde_json::Value,
    pub topic: String,
    pub timestamp: DateTime<Utc>,
}

/// Client-supplied portion of a publish request, before stamping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Draft {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_timestamp_round_trips_as_rfc3339() {
        let msg = Message {
            id: "m1".to_string(),
            payload: serde_json::json!({"temp": 21}),
            topic: "sensors".to_string(),
            timestamp: "2024-06-01T12:30:00Z".parse().expect("timestamp"),
        };
        let encoded = serde_json::to_string(&msg).expect("encode");
        assert!(encoded.contains("2024-06-01T12:30:00Z"));
        let decoded: Message = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn draft_payload_defaults_to_null() {
        let draft: Draft = serde_json::from_str(r#"{"id":"m1"}"#).expect("decode");
        assert_eq!(draft.id, "m1");
        assert!(draft.payload.is_null());
    }
}
