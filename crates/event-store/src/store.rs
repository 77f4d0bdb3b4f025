use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Message, MessageId};
use serde::{Deserialize, Serialize};

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Snapshot, Version};

/// A database that hands out request-scoped transactions.
///
/// Every store operation takes the transaction explicitly, so an aggregate
/// append, its outbox rows, an inbox row and a saga update can all commit or
/// roll back together.
#[async_trait]
pub trait Database: Send + Sync + 'static {
    /// The transaction type threaded through store calls.
    type Tx: Send + 'static;

    async fn begin(&self) -> Result<Self::Tx>;

    async fn commit(&self, tx: Self::Tx) -> Result<()>;

    async fn rollback(&self, tx: Self::Tx) -> Result<()>;
}

/// Append-only, version-checked event log.
#[async_trait]
pub trait EventStore<Tx: Send>: Send + Sync {
    /// Appends events to one aggregate's stream.
    ///
    /// Fails with `ConcurrencyConflict` unless the stream is currently at
    /// `expected_version` and the events are numbered `expected_version + 1`
    /// onwards. Returns the stream version after the append.
    async fn append(
        &self,
        tx: &mut Tx,
        events: Vec<EventEnvelope>,
        expected_version: Version,
    ) -> Result<Version>;

    /// Loads the events of one aggregate with a version greater than
    /// `after`, in version order.
    async fn load_events(
        &self,
        tx: &mut Tx,
        aggregate_name: &str,
        aggregate_id: &AggregateId,
        after: Version,
    ) -> Result<Vec<EventEnvelope>>;
}

/// Latest-snapshot-per-aggregate storage.
#[async_trait]
pub trait SnapshotStore<Tx: Send>: Send + Sync {
    async fn get_snapshot(
        &self,
        tx: &mut Tx,
        aggregate_name: &str,
        aggregate_id: &AggregateId,
    ) -> Result<Option<Snapshot>>;

    /// Saves a snapshot, replacing any previous one for the aggregate.
    async fn save_snapshot(&self, tx: &mut Tx, snapshot: Snapshot) -> Result<()>;
}

/// Transactional outbox table.
#[async_trait]
pub trait OutboxStore<Tx: Send>: Send + Sync {
    /// Inserts a message. Returns `DuplicateMessage` if the id is already
    /// recorded; the transaction stays usable either way.
    async fn save(&self, tx: &mut Tx, message: &Message) -> Result<()>;

    /// Returns up to `limit` unpublished messages, oldest first.
    async fn find_unpublished(&self, tx: &mut Tx, limit: usize) -> Result<Vec<Message>>;

    async fn mark_published(&self, tx: &mut Tx, ids: &[MessageId]) -> Result<()>;
}

/// Idempotent-consumer inbox table.
#[async_trait]
pub trait InboxStore<Tx: Send>: Send + Sync {
    /// Records a consumed message. Returns `DuplicateMessage` if the id was
    /// already recorded.
    async fn save(&self, tx: &mut Tx, message: &Message, received_at: DateTime<Utc>)
    -> Result<()>;
}

/// Persisted form of a saga instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaRecord {
    pub saga_name: String,
    pub id: String,
    pub data: serde_json::Value,
    pub step: i64,
    pub done: bool,
    pub compensating: bool,
}

/// Saga instance storage keyed by `(saga_name, id)`.
#[async_trait]
pub trait SagaStore<Tx: Send>: Send + Sync {
    async fn load(&self, tx: &mut Tx, saga_name: &str, id: &str) -> Result<Option<SagaRecord>>;

    /// Inserts or replaces the record.
    async fn save(&self, tx: &mut Tx, record: &SagaRecord) -> Result<()>;
}

/// Checks that a batch targets a single aggregate and continues its stream
/// from `expected_version` without gaps.
pub fn validate_events_for_append(events: &[EventEnvelope], expected_version: Version) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty event list".to_string(),
        ));
    };

    let mut next_version = expected_version;
    for event in events {
        if event.aggregate_id != first.aggregate_id
            || event.aggregate_name != first.aggregate_name
        {
            return Err(EventStoreError::InvalidAppend(
                "all events must belong to the same aggregate".to_string(),
            ));
        }

        next_version = next_version.next();
        if event.version != next_version {
            return Err(EventStoreError::InvalidAppend(format!(
                "event versions must be sequential: expected {}, got {}",
                next_version, event.version
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, version: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .event_name("Incremented")
            .aggregate_id(AggregateId::from(id))
            .aggregate_name("Counter")
            .version(Version::new(version))
            .build()
            .unwrap()
    }

    #[test]
    fn accepts_batch_continuing_the_stream() {
        let events = vec![event("c-1", 3), event("c-1", 4)];
        assert!(validate_events_for_append(&events, Version::new(2)).is_ok());
    }

    #[test]
    fn rejects_empty_batches() {
        assert!(validate_events_for_append(&[], Version::initial()).is_err());
    }

    #[test]
    fn rejects_gaps_and_mixed_aggregates() {
        let gap = vec![event("c-1", 1), event("c-1", 3)];
        assert!(validate_events_for_append(&gap, Version::initial()).is_err());

        let mixed = vec![event("c-1", 1), event("c-2", 2)];
        assert!(validate_events_for_append(&mixed, Version::initial()).is_err());
    }
}
