// JSON control envelopes carried in frame payloads.
//
// Requests flow client -> server, responses server -> client. Both sides are
// tagged by a "type" field so unknown types fail decoding rather than being
// silently ignored; the session layer maps that failure to BAD_REQUEST.
use bytes::Bytes;
use chrono::{DateTime, Utc};
use courier_common::{Draft, Message};
use serde::{Deserialize, Serialize};

use crate::{Frame, Result};

/// Client -> server request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Session establishment; must be the first frame on a connection.
    /// The token is the opaque principal identifier handed down by the
    /// authenticating layer in front of the broker.
    Connect {
        token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Subscribe {
        topic: String,
        #[serde(default)]
        last_n: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Unsubscribe {
        topic: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Publish {
        topic: String,
        message: Draft,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl Request {
    pub fn decode(frame: &Frame) -> Result<Self> {
        Ok(serde_json::from_slice(&frame.payload)?)
    }

    pub fn encode(&self) -> Result<Frame> {
        Frame::new(0, Bytes::from(serde_json::to_vec(self)?))
    }
}

/// Server -> client response envelope. `ts` is stamped when the envelope is
/// built, not when it hits the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Connected {
        client_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        ts: DateTime<Utc>,
    },
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        status: String,
        ts: DateTime<Utc>,
    },
    Event {
        topic: String,
        message: Message,
        ts: DateTime<Utc>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        ts: DateTime<Utc>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        error: ErrorDetail,
        ts: DateTime<Utc>,
    },
}

impl Response {
    pub fn connected(client_id: impl Into<String>, request_id: Option<String>) -> Self {
        Self::Connected {
            client_id: client_id.into(),
            request_id,
            ts: Utc::now(),
        }
    }

    pub fn ack(request_id: Option<String>, topic: Option<String>) -> Self {
        Self::Ack {
            request_id,
            topic,
            status: "ok".to_string(),
            ts: Utc::now(),
        }
    }

    pub fn event(message: &Message) -> Self {
        Self::Event {
            topic: message.topic.clone(),
            message: message.clone(),
            ts: Utc::now(),
        }
    }

    pub fn pong(request_id: Option<String>) -> Self {
        Self::Pong {
            request_id,
            ts: Utc::now(),
        }
    }

    pub fn error(request_id: Option<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            request_id,
            error: ErrorDetail {
                code,
                message: message.into(),
            },
            ts: Utc::now(),
        }
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        Ok(serde_json::from_slice(&frame.payload)?)
    }

    pub fn encode(&self) -> Result<Frame> {
        Frame::new(0, Bytes::from(serde_json::to_vec(self)?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
}

/// Wire error codes. The set is closed; broker-side conditions without a
/// dedicated code surface as `Internal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    TopicNotFound,
    Unauthorized,
    SlowConsumer,
    Internal,
}
