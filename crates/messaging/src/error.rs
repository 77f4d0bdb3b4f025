use event_store::EventStoreError;
use thiserror::Error;

use crate::envelope::MessageKind;

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("Store error: {0}")]
    Store(#[from] EventStoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Expected {expected} message, received {actual}")]
    UnexpectedKind {
        expected: MessageKind,
        actual: MessageKind,
    },

    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    #[error("Publish to {subject} failed: {reason}")]
    Publish { subject: String, reason: String },
}

pub type Result<T> = std::result::Result<T, MessagingError>;
