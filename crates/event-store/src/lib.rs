//! Persistence contracts for event-driven services.
//!
//! Everything a service persists goes through one [`Database`] transaction:
//! the aggregate event log, snapshots, outbox rows, inbox rows and saga
//! instances. Two implementations are provided: [`MemoryDatabase`] for tests
//! and single-process use, and [`PostgresDatabase`] backed by `sqlx`.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod snapshot;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, Version};
pub use memory::{MemoryDatabase, MemoryTx};
pub use postgres::{PgTx, PostgresDatabase, PostgresTables};
pub use snapshot::Snapshot;
pub use store::{
    Database, EventStore, InboxStore, OutboxStore, SagaRecord, SagaStore, SnapshotStore,
};
