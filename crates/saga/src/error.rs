//! Saga error types.

use event_store::EventStoreError;
use messaging::{BoxError, MessagingError};
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    #[error("Store error: {0}")]
    Store(#[from] EventStoreError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A reply named a saga instance that was never started.
    #[error("Saga '{saga_name}' instance '{id}' not found")]
    NotFound { saga_name: String, id: String },

    /// A step action could not build its command.
    #[error("Action of step '{step}' failed: {source}")]
    Action {
        step: String,
        #[source]
        source: BoxError,
    },

    /// A reply handler rejected the reply.
    #[error("Handler for reply '{reply}' of step '{step}' failed: {source}")]
    ReplyHandler {
        step: String,
        reply: String,
        #[source]
        source: BoxError,
    },
}

pub type Result<T> = std::result::Result<T, SagaError>;
