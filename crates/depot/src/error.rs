//! Depot error types.

use domain::DomainError;
use event_store::EventStoreError;
use messaging::MessagingError;
use thiserror::Error;

use crate::shopping_list::ShoppingListStatus;

/// Errors returned by the shopping list service.
#[derive(Debug, Error)]
pub enum DepotError {
    /// The command was malformed.
    #[error("Invalid shopping list: {0}")]
    Validation(String),

    #[error("Shopping list not found: {0}")]
    NotFound(String),

    #[error("Shopping list already exists: {0}")]
    AlreadyExists(String),

    /// The list's status does not allow the requested change.
    #[error("Shopping list {id} cannot be {action} while {status}")]
    InvalidStatus {
        id: String,
        status: ShoppingListStatus,
        action: &'static str,
    },

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Store error: {0}")]
    Store(#[from] EventStoreError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DepotError {
    /// True for errors caused by the command itself rather than by
    /// infrastructure. Retrying such a command cannot succeed.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            DepotError::Validation(_)
                | DepotError::NotFound(_)
                | DepotError::AlreadyExists(_)
                | DepotError::InvalidStatus { .. }
        )
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            DepotError::Domain(err) => err.is_conflict(),
            DepotError::Store(err) => err.is_conflict(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DepotError>;
