use std::fmt;

use chrono::{DateTime, Utc};
use common::{Message, MessageId, Metadata};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    MessagingError, Result,
    headers::{COMMAND_NAME, COMMAND_REPLY_CHANNEL, OUTCOME_FAILURE, OUTCOME_SUCCESS, REPLY_OUTCOME},
};

/// What an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Event,
    Command,
    Reply,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Event => write!(f, "event"),
            MessageKind::Command => write!(f, "command"),
            MessageKind::Reply => write!(f, "reply"),
        }
    }
}

/// Outcome reported by a reply's `REPLY_OUTCOME` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    Success,
    Failure,
}

impl ReplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyOutcome::Success => OUTCOME_SUCCESS,
            ReplyOutcome::Failure => OUTCOME_FAILURE,
        }
    }
}

/// Typed, in-process form of a message.
///
/// The payload is held as JSON so that name and payload round-trip through
/// the wire [`Message`] without loss; handlers decode it into their own
/// types with [`Envelope::decode`].
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub id: MessageId,
    pub kind: MessageKind,
    pub name: String,
    pub payload: Value,
    pub metadata: Metadata,
    pub occurred_at: DateTime<Utc>,
}

/// The serialized body stored in `Message::data`.
#[derive(Serialize, Deserialize)]
struct Body {
    kind: MessageKind,
    payload: Value,
    occurred_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(kind: MessageKind, name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: MessageId::new(),
            kind,
            name: name.into(),
            payload,
            metadata: Metadata::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        Self::new(MessageKind::Event, name, payload)
    }

    /// Creates a command; the `COMMAND_NAME` header is set to `name`.
    pub fn command(name: impl Into<String>, payload: Value) -> Self {
        let mut envelope = Self::new(MessageKind::Command, name, payload);
        envelope
            .metadata
            .set(COMMAND_NAME, envelope.name.clone());
        envelope
    }

    pub fn reply(name: impl Into<String>, payload: Value) -> Self {
        Self::new(MessageKind::Reply, name, payload)
    }

    /// Serializes a typed payload into a new envelope.
    pub fn encode<T: Serialize>(kind: MessageKind, name: impl Into<String>, payload: &T) -> Result<Self> {
        let payload = serde_json::to_value(payload)?;
        Ok(match kind {
            MessageKind::Command => Self::command(name, payload),
            _ => Self::new(kind, name, payload),
        })
    }

    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = id;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.set(key, value);
        self
    }

    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    /// Decodes the payload into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Subject the reply to this command should go to, if any.
    pub fn reply_channel(&self) -> Option<&str> {
        self.metadata.get_str(COMMAND_REPLY_CHANNEL)
    }

    /// Outcome of a reply, if the header is present and recognised.
    pub fn outcome(&self) -> Option<ReplyOutcome> {
        match self.metadata.get_str(REPLY_OUTCOME)? {
            OUTCOME_SUCCESS => Some(ReplyOutcome::Success),
            OUTCOME_FAILURE => Some(ReplyOutcome::Failure),
            _ => None,
        }
    }

    /// Fails with `UnexpectedKind` unless this envelope is of `expected` kind.
    pub fn expect_kind(&self, expected: MessageKind) -> Result<()> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(MessagingError::UnexpectedKind {
                expected,
                actual: self.kind,
            })
        }
    }

    /// Converts to a wire message routed to `subject`.
    pub fn to_message(&self, subject: impl Into<String>) -> Result<Message> {
        let body = Body {
            kind: self.kind,
            payload: self.payload.clone(),
            occurred_at: self.occurred_at,
        };
        Ok(Message::new(
            self.id.clone(),
            self.name.clone(),
            subject,
            serde_json::to_vec(&body)?,
            self.metadata.clone(),
        ))
    }

    /// Rebuilds an envelope from a wire message.
    pub fn from_message(message: &Message) -> Result<Self> {
        let body: Body = serde_json::from_slice(&message.data)?;
        Ok(Self {
            id: message.id.clone(),
            kind: body.kind,
            name: message.name.clone(),
            payload: body.payload,
            metadata: message.metadata.clone(),
            occurred_at: body.occurred_at,
        })
    }
}
