//! Shared types for the messaging infrastructure: identifiers, metadata, the
//! wire message, and decorator composition.

pub mod message;
pub mod metadata;
pub mod middleware;
pub mod types;

pub use message::Message;
pub use metadata::Metadata;
pub use middleware::{Middleware, chain};
pub use types::{AggregateId, MessageId};
