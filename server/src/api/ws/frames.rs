//! WebSocket frame types
//!
//! Inbound frames are parsed in stages so each failure mode maps to its
//! own error code: non-JSON text (`INVALID_JSON`), JSON without a `type`
//! field (`INVALID_MESSAGE`), an unknown `type` (`UNKNOWN_MESSAGE_TYPE`)
//! and per-field validation failures (`VALIDATION_ERROR`). None of these
//! terminate the session.

use serde::Serialize;
use serde_json::{Value, json};

use crate::broker::Envelope;
use crate::core::constants::{MAX_REPLAY_REQUEST, TOPIC_NAME_MAX_LEN};

/// A parsed client request frame
#[derive(Debug, PartialEq)]
pub enum InboundFrame {
    Subscribe { topic: String, last_n: u32 },
    Unsubscribe { topic: String },
    Publish { topic: String, data: Value },
    Ping,
}

/// A frame-level error, reported back to the client as an `error` frame
#[derive(Debug, PartialEq)]
pub struct FrameError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl FrameError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    fn validation(field: &str, problem: &str) -> Self {
        Self {
            code: "VALIDATION_ERROR",
            message: "Invalid message format".to_string(),
            details: Some(json!({
                "errors": [{ "field": field, "message": problem }]
            })),
        }
    }
}

impl InboundFrame {
    /// Parse one text frame from a client.
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|_| FrameError::new("INVALID_JSON", "Message must be valid JSON"))?;

        let Some(object) = value.as_object() else {
            return Err(FrameError::new(
                "INVALID_MESSAGE",
                "Message must have a 'type' field",
            ));
        };
        let Some(kind) = object.get("type").and_then(Value::as_str) else {
            return Err(FrameError::new(
                "INVALID_MESSAGE",
                "Message must have a 'type' field",
            ));
        };

        match kind {
            "subscribe" => {
                let topic = require_topic(object)?;
                let last_n = match object.get("last_n") {
                    None | Some(Value::Null) => 0,
                    Some(v) => v
                        .as_u64()
                        .filter(|&n| n <= u64::from(MAX_REPLAY_REQUEST))
                        .ok_or_else(|| {
                            FrameError::validation(
                                "last_n",
                                "must be an integer between 0 and 1000",
                            )
                        })? as u32,
                };
                Ok(Self::Subscribe { topic, last_n })
            }
            "unsubscribe" => Ok(Self::Unsubscribe {
                topic: require_topic(object)?,
            }),
            "publish" => {
                let topic = require_topic(object)?;
                let data = object
                    .get("data")
                    .cloned()
                    .ok_or_else(|| FrameError::validation("data", "field is required"))?;
                Ok(Self::Publish { topic, data })
            }
            "ping" => Ok(Self::Ping),
            other => Err(FrameError::new(
                "UNKNOWN_MESSAGE_TYPE",
                format!("Unknown message type: {}", other),
            )),
        }
    }
}

fn require_topic(object: &serde_json::Map<String, Value>) -> Result<String, FrameError> {
    let topic = object
        .get("topic")
        .and_then(Value::as_str)
        .ok_or_else(|| FrameError::validation("topic", "field is required"))?;
    if topic.is_empty() || topic.len() > TOPIC_NAME_MAX_LEN {
        return Err(FrameError::validation(
            "topic",
            "length must be between 1 and 255",
        ));
    }
    Ok(topic.to_string())
}

/// A server frame on its way to the client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Info {
        message: String,
    },
    Ack {
        request_type: &'static str,
        topic: Option<String>,
        message: String,
    },
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    Pong,
    Event {
        topic: String,
        data: Value,
        message_id: String,
    },
}

impl OutboundFrame {
    pub fn ack(request_type: &'static str, topic: &str, message: impl Into<String>) -> Self {
        Self::Ack {
            request_type,
            topic: Some(topic.to_string()),
            message: message.into(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn event(envelope: &Envelope) -> Self {
        Self::Event {
            topic: envelope.topic.clone(),
            data: envelope.data.clone(),
            message_id: envelope.message_id.clone(),
        }
    }
}

impl From<FrameError> for OutboundFrame {
    fn from(err: FrameError) -> Self {
        Self::Error {
            code: err.code.to_string(),
            message: err.message,
            details: err.details,
        }
    }
}
