//! WebSocket frame schema.
//!
//! Every frame on the wire is a JSON object
//! `{"type": ..., "topic"?: ..., "data"?: ..., "error"?: ...}`.
//! Clients send `subscribe`, `unsubscribe` and `broadcast`; the server sends
//! `data`, `ephemeral`, `ack`, `error` and `artifact_reload`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Frame type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Client subscribes to a topic
    Subscribe,
    /// Client leaves a topic
    Unsubscribe,
    /// Published payload for a topic
    Data,
    /// Relayed signal that skips its originator
    Ephemeral,
    /// Acknowledges a subscribe/unsubscribe
    Ack,
    /// Protocol error for the client's own frame
    Error,
    /// Client asks the server to relay an ephemeral signal
    Broadcast,
    /// Global notice that a new artifact is live
    ArtifactReload,
}

impl FrameKind {
    /// Wire name of the frame type
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Data => "data",
            Self::Ephemeral => "ephemeral",
            Self::Ack => "ack",
            Self::Error => "error",
            Self::Broadcast => "broadcast",
            Self::ArtifactReload => "artifact_reload",
        }
    }
}

/// Server-produced frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame type
    #[serde(rename = "type")]
    pub kind: FrameKind,
    /// Topic, when the frame is scoped to one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error message for `error` frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Frame {
    /// Acknowledge a subscribe or unsubscribe
    #[must_use]
    pub fn ack(action: FrameKind, topic: &str) -> Self {
        Self {
            kind: FrameKind::Ack,
            topic: Some(topic.to_string()),
            data: Some(Value::String(action.as_str().to_string())),
            error: None,
        }
    }

    /// Report a protocol error to the sender
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Error,
            topic: None,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Encode to the wire form
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be serialized
    pub fn encode(&self) -> Result<OutboundFrame, serde_json::Error> {
        Envelope {
            kind: self.kind,
            topic: self.topic.as_deref(),
            data: self.data.as_ref(),
            error: self.error.as_deref(),
        }
        .encode()
    }
}

/// Borrowing twin of [`Frame`], so publishing never clones the payload.
#[derive(Debug, Serialize)]
pub(crate) struct Envelope<'a> {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a str>,
}

impl<'a> Envelope<'a> {
    pub(crate) fn new(kind: FrameKind, topic: Option<&'a str>, data: &'a Value) -> Self {
        Self {
            kind,
            topic,
            data: Some(data),
            error: None,
        }
    }

    pub(crate) fn encode(&self) -> Result<OutboundFrame, serde_json::Error> {
        serde_json::to_string(self).map(|text| OutboundFrame(Arc::from(text)))
    }
}

/// An encoded frame, shared by every client queue it is delivered to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame(Arc<str>);

impl OutboundFrame {
    /// The JSON text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Protocol errors for inbound frames
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Frame text is not JSON
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// Frame has no `type`
    #[error("missing message type")]
    MissingType,

    /// `type` is not one a client may send
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Frame type needs a topic
    #[error("{0} requires a topic")]
    MissingTopic(&'static str),

    /// Binary frames are not part of the protocol
    #[error("binary frames are not supported")]
    BinaryFrame,

    /// Frame exceeds the configured size limit
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge {
        /// Received size
        size: usize,
        /// Configured limit
        limit: usize,
    },
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// A decoded client request
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    /// Join a topic
    Subscribe {
        /// Topic
        topic: String,
    },
    /// Leave a topic
    Unsubscribe {
        /// Topic
        topic: String,
    },
    /// Relay `data` to the other subscribers of `topic`
    Broadcast {
        /// Topic
        topic: String,
        /// Payload, `null` when absent
        data: Value,
    },
}

impl ClientCommand {
    /// Decode a client text frame
    ///
    /// # Errors
    ///
    /// Returns error if the text is not a valid client frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let frame: InboundFrame =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        let kind = frame.kind.ok_or(ProtocolError::MissingType)?;
        let topic = frame.topic.filter(|t| !t.is_empty());

        match kind.as_str() {
            "subscribe" => Ok(Self::Subscribe {
                topic: topic.ok_or(ProtocolError::MissingTopic("subscribe"))?,
            }),
            "unsubscribe" => Ok(Self::Unsubscribe {
                topic: topic.ok_or(ProtocolError::MissingTopic("unsubscribe"))?,
            }),
            "broadcast" => Ok(Self::Broadcast {
                topic: topic.ok_or(ProtocolError::MissingTopic("broadcast"))?,
                data: frame.data.unwrap_or(Value::Null),
            }),
            _ => Err(ProtocolError::UnknownType(kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(frame: &OutboundFrame) -> Value {
        serde_json::from_str(frame.as_str()).unwrap()
    }

    #[test]
    fn test_decode_subscribe() {
        let cmd = ClientCommand::decode(r#"{"type":"subscribe","topic":"Post:create"}"#).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::Subscribe {
                topic: "Post:create".to_string()
            }
        );
    }

    #[test]
    fn test_decode_broadcast_without_data() {
        let cmd = ClientCommand::decode(r#"{"type":"broadcast","topic":"Feed:1"}"#).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::Broadcast {
                topic: "Feed:1".to_string(),
                data: Value::Null
            }
        );
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            ClientCommand::decode("not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert_eq!(
            ClientCommand::decode(r#"{"topic":"x"}"#),
            Err(ProtocolError::MissingType)
        );
        assert_eq!(
            ClientCommand::decode(r#"{"type":"shout","topic":"x"}"#),
            Err(ProtocolError::UnknownType("shout".to_string()))
        );
        assert_eq!(
            ClientCommand::decode(r#"{"type":"data","topic":"x"}"#),
            Err(ProtocolError::UnknownType("data".to_string()))
        );
        assert_eq!(
            ClientCommand::decode(r#"{"type":"subscribe","topic":""}"#),
            Err(ProtocolError::MissingTopic("subscribe"))
        );
    }

    #[test]
    fn test_ack_frame_shape() {
        let frame = Frame::ack(FrameKind::Subscribe, "Post:create").encode().unwrap();
        assert_eq!(
            parse(&frame),
            json!({"type": "ack", "topic": "Post:create", "data": "subscribe"})
        );
    }

    #[test]
    fn test_error_frame_shape() {
        let frame = Frame::error("unknown message type: shout").encode().unwrap();
        assert_eq!(
            parse(&frame),
            json!({"type": "error", "error": "unknown message type: shout"})
        );
    }

    #[test]
    fn test_envelope_matches_frame() {
        let payload = json!({"id": 1});
        let borrowed = Envelope::new(FrameKind::Data, Some("Post:create"), &payload)
            .encode()
            .unwrap();
        let owned = Frame {
            kind: FrameKind::Data,
            topic: Some("Post:create".to_string()),
            data: Some(payload),
            error: None,
        }
        .encode()
        .unwrap();
        assert_eq!(borrowed, owned);
    }

    #[test]
    fn test_artifact_reload_wire_name() {
        let payload = json!({"generation": 2});
        let frame = Envelope::new(FrameKind::ArtifactReload, None, &payload)
            .encode()
            .unwrap();
        assert_eq!(parse(&frame)["type"], json!("artifact_reload"));
    }

    proptest::proptest! {
        #[test]
        fn test_decode_never_panics(text in ".{0,256}") {
            let _ = ClientCommand::decode(&text);
        }
    }
}
