//! Messaging on top of the persistence contracts.
//!
//! - [`Envelope`] is the typed form of an event, command or reply.
//! - [`MessagePublisher`] / [`MessageSubscriber`] abstract the broker;
//!   [`InMemoryBroker`] implements both with consumer groups, manual
//!   acknowledgement and bounded redelivery.
//! - [`OutboxPublisher`] and [`OutboxProcessor`] bridge a database
//!   transaction to the broker; [`InboxHandler`] deduplicates consumption.
//! - [`EventDispatcher`] and [`CommandDispatcher`] route envelopes to
//!   handlers by name; command outcomes become replies.

pub mod broker;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod headers;
pub mod inbox;
pub mod outbox;
pub mod stream;
pub mod transactional;

pub use broker::InMemoryBroker;
pub use config::{AckMode, SubscriberConfig};
pub use dispatch::{
    CommandDispatcher, CommandHandler, CommandOutcome, EventDispatcher, EventHandler, reply_for,
};
pub use envelope::{Envelope, MessageKind, ReplyOutcome};
pub use error::{MessagingError, Result};
pub use inbox::{InboxHandler, inbox_middleware};
pub use outbox::{OutboxConfig, OutboxProcessor, OutboxPublisher};
pub use stream::{
    AckDecision, BoxError, Delivery, MessageHandler, MessagePublisher, MessageSubscriber,
    Subscription,
};
pub use transactional::{
    DirectPublisher, TransactionalHandler, TxHandlerMiddleware, TxMessageHandler,
    TxMessagePublisher,
};
