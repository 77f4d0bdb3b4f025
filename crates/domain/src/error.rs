//! Domain error types.

use event_store::EventStoreError;
use messaging::MessagingError;
use thiserror::Error;

/// Errors that can occur while loading or saving aggregates.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Publishing recorded events failed.
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored event does not decode to the event it is named as.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}

impl DomainError {
    /// Returns true when a save lost an optimistic concurrency race.
    ///
    /// The caller should reload the aggregate and retry the command.
    pub fn is_conflict(&self) -> bool {
        match self {
            DomainError::EventStore(err) => err.is_conflict(),
            DomainError::Messaging(MessagingError::Store(err)) => err.is_conflict(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;
