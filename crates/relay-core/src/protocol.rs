//! Wire protocol.
//!
//! Every frame is a JSON envelope `{"event": <name>, "data": <payload>}`.
//!
//! | Event | Direction | Payload |
//! |-------|-----------|---------|
//! | `register` | client → relay | `"alice"` or `{"userId": "alice"}` |
//! | `send_message` | client → relay | `{"from", "to", "message"}` |
//! | `receive_message` | relay → client | `{"from", "message", "timestamp"}` |
//!
//! Decoding is strict about shape and lenient about nothing else: unknown
//! events, missing fields, and non-string values are all [`ProtocolError`]s.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};
use crate::ids::UserId;

#[derive(Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
enum RawEvent {
    Register(RawRegister),
    SendMessage(RawSendMessage),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRegister {
    Bare(String),
    Object {
        #[serde(rename = "userId")]
        user_id: String,
    },
}

#[derive(Deserialize)]
struct RawSendMessage {
    from: String,
    to: String,
    message: String,
}

/// A validated client → relay event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    /// Bind the sending connection to this identity.
    Register(UserId),
    /// Forward a message to another identity.
    SendMessage(ChatMessage),
}

impl InboundEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Register(_) => "register",
            Self::SendMessage(_) => "send_message",
        }
    }
}

/// A message addressed from one identity to another.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    /// Sender identity as claimed by the client.
    pub from: UserId,
    /// Recipient identity.
    pub to: UserId,
    /// Opaque message body.
    pub message: String,
}

/// Decode a single inbound text frame.
pub fn decode_frame(text: &str) -> Result<InboundEvent> {
    let raw: RawEvent = serde_json::from_str(text)?;
    match raw {
        RawEvent::Register(RawRegister::Bare(user_id) | RawRegister::Object { user_id }) => {
            Ok(InboundEvent::Register(UserId::parse(user_id)?))
        }
        RawEvent::SendMessage(RawSendMessage { from, to, message }) => {
            Ok(InboundEvent::SendMessage(ChatMessage {
                from: UserId::parse(from)?,
                to: UserId::parse(to)?,
                message,
            }))
        }
    }
}

/// A relay → client event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// A message relayed from another identity.
    ReceiveMessage(ReceivedMessage),
}

/// Payload of a `receive_message` frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    /// Sender identity, copied from the inbound `from`.
    pub from: UserId,
    /// Message body.
    pub message: String,
    /// ISO-8601 UTC time the relay forwarded the message.
    pub timestamp: String,
}

impl ReceivedMessage {
    /// Build the recipient's view of `msg`, stamped at `at`.
    pub fn from_chat(msg: ChatMessage, at: DateTime<Utc>) -> Self {
        Self {
            from: msg.from,
            message: msg.message,
            timestamp: format_timestamp(at),
        }
    }
}

/// Serialize an outbound event to its JSON frame.
pub fn encode_frame(event: &OutboundEvent) -> std::result::Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}

/// Millisecond-precision RFC 3339 with a `Z` suffix.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
