use common::MessageId;
use thiserror::Error;

use crate::{AggregateId, Version};

/// Errors that can occur when interacting with the persistence layer.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// A concurrency conflict occurred when appending events.
    /// The expected version did not match the actual version.
    #[error(
        "Concurrency conflict for {aggregate_name} {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_name: String,
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// A message with this id was already recorded in the outbox or inbox.
    #[error("Duplicate message: {0}")]
    DuplicateMessage(MessageId),

    /// A row that must exist was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The events handed to an append do not form a valid batch.
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// Returns true for an optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EventStoreError::ConcurrencyConflict { .. })
    }

    /// Returns true when an outbox or inbox insert hit an existing id.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, EventStoreError::DuplicateMessage(_))
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
