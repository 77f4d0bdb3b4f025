//! Event-sourced aggregates.
//!
//! - [`Aggregate`] and [`DomainEvent`] describe a domain model's state and
//!   events; [`AggregateRoot`] carries identity, version and pending events.
//! - [`AggregateStore`] implementations load and save roots inside a
//!   database transaction: [`EventSourcedStore`] is the base store,
//!   [`SnapshottingStore`] and [`EventPublishingStore`] wrap it.
//! - [`AggregateRepository`] is what command handlers use.

pub mod aggregate;
pub mod error;
pub mod publishing;
pub mod repository;
pub mod root;
pub mod snapshot;
pub mod store;

pub use aggregate::{
    AGGREGATE_ID, AGGREGATE_NAME, AGGREGATE_VERSION, Aggregate, DomainEvent, PendingEvent,
    aggregate_metadata,
};
pub use error::{DomainError, Result};
pub use publishing::EventPublishingStore;
pub use repository::AggregateRepository;
pub use root::AggregateRoot;
pub use snapshot::{SnapshotPolicy, SnapshottingStore};
pub use store::{AggregateStore, EventSourcedStore, StoreMiddleware};
