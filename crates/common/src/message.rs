use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Metadata, MessageId};

/// A message as it travels through the outbox, the broker and the inbox.
///
/// `data` is opaque to everything below the messaging layer; it holds the
/// serialized envelope body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Globally unique id, preserved across redeliveries.
    pub id: MessageId,

    /// Type discriminator (e.g. "depot.ShoppingListCreated").
    pub name: String,

    /// Routing key the message is published under.
    pub subject: String,

    /// Serialized body.
    pub data: Vec<u8>,

    pub metadata: Metadata,

    /// When the producer handed the message over for delivery.
    pub sent_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        id: MessageId,
        name: impl Into<String>,
        subject: impl Into<String>,
        data: Vec<u8>,
        metadata: Metadata,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            subject: subject.into(),
            data,
            metadata,
            sent_at: Utc::now(),
        }
    }

    /// Returns a copy of this message routed to another subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }
}
