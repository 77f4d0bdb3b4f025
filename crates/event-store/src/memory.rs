use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Message, MessageId};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Snapshot, Version,
    store::{
        Database, EventStore, InboxStore, OutboxStore, SagaRecord, SagaStore, SnapshotStore,
        validate_events_for_append,
    },
};

#[derive(Debug, Clone)]
struct OutboxRow {
    message: Message,
    published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct InboxRow {
    message: Message,
    received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    events: Vec<EventEnvelope>,
    snapshots: HashMap<(String, AggregateId), Snapshot>,
    outbox: Vec<OutboxRow>,
    inbox: Vec<InboxRow>,
    sagas: HashMap<(String, String), SagaRecord>,
    documents: HashMap<(String, String), serde_json::Value>,
}

/// In-memory database implementing every store contract.
///
/// Transactions are serializable: `begin` takes an exclusive lock on all
/// tables and keeps a checkpoint, so a transaction that is rolled back or
/// dropped without commit leaves no trace. Do not begin a second
/// transaction from a task that already holds one.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    tables: Arc<Mutex<Tables>>,
}

/// A transaction on a [`MemoryDatabase`].
pub struct MemoryTx {
    tables: OwnedMutexGuard<Tables>,
    checkpoint: Option<Tables>,
}

impl MemoryTx {
    /// Stores a JSON document under `(collection, key)`. Used for read
    /// models that must change atomically with the inbox.
    pub fn put_document(
        &mut self,
        collection: impl Into<String>,
        key: impl Into<String>,
        document: serde_json::Value,
    ) {
        self.tables
            .documents
            .insert((collection.into(), key.into()), document);
    }

    pub fn get_document(&self, collection: &str, key: &str) -> Option<serde_json::Value> {
        self.tables
            .documents
            .get(&(collection.to_string(), key.to_string()))
            .cloned()
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if let Some(checkpoint) = self.checkpoint.take() {
            *self.tables = checkpoint;
        }
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of committed events.
    pub async fn event_count(&self) -> usize {
        self.tables.lock().await.events.len()
    }

    /// Returns the committed events of one aggregate in version order.
    pub async fn events_for(&self, aggregate_name: &str, aggregate_id: &AggregateId) -> Vec<EventEnvelope> {
        let tables = self.tables.lock().await;
        let mut events: Vec<_> = tables
            .events
            .iter()
            .filter(|e| e.aggregate_name == aggregate_name && &e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        events
    }

    pub async fn snapshot_for(&self, aggregate_name: &str, aggregate_id: &AggregateId) -> Option<Snapshot> {
        let tables = self.tables.lock().await;
        tables
            .snapshots
            .get(&(aggregate_name.to_string(), aggregate_id.clone()))
            .cloned()
    }

    /// Returns every outbox row with its publication time.
    pub async fn outbox(&self) -> Vec<(Message, Option<DateTime<Utc>>)> {
        let tables = self.tables.lock().await;
        tables
            .outbox
            .iter()
            .map(|row| (row.message.clone(), row.published_at))
            .collect()
    }

    pub async fn unpublished_count(&self) -> usize {
        let tables = self.tables.lock().await;
        tables
            .outbox
            .iter()
            .filter(|row| row.published_at.is_none())
            .count()
    }

    /// Returns the ids recorded in the inbox, in arrival order.
    pub async fn inbox_ids(&self) -> Vec<MessageId> {
        let tables = self.tables.lock().await;
        tables.inbox.iter().map(|row| row.message.id.clone()).collect()
    }

    /// Returns every inbox row with its arrival time.
    pub async fn inbox(&self) -> Vec<(Message, DateTime<Utc>)> {
        let tables = self.tables.lock().await;
        tables
            .inbox
            .iter()
            .map(|row| (row.message.clone(), row.received_at))
            .collect()
    }

    pub async fn saga(&self, saga_name: &str, id: &str) -> Option<SagaRecord> {
        let tables = self.tables.lock().await;
        tables
            .sagas
            .get(&(saga_name.to_string(), id.to_string()))
            .cloned()
    }

    pub async fn document(&self, collection: &str, key: &str) -> Option<serde_json::Value> {
        let tables = self.tables.lock().await;
        tables
            .documents
            .get(&(collection.to_string(), key.to_string()))
            .cloned()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        let tables = self.tables.clone().lock_owned().await;
        let checkpoint = tables.clone();
        Ok(MemoryTx {
            tables,
            checkpoint: Some(checkpoint),
        })
    }

    async fn commit(&self, mut tx: MemoryTx) -> Result<()> {
        tx.checkpoint = None;
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> Result<()> {
        drop(tx);
        Ok(())
    }
}

#[async_trait]
impl EventStore<MemoryTx> for MemoryDatabase {
    async fn append(
        &self,
        tx: &mut MemoryTx,
        events: Vec<EventEnvelope>,
        expected_version: Version,
    ) -> Result<Version> {
        validate_events_for_append(&events, expected_version)?;

        let first = &events[0];
        let current_version = tx
            .tables
            .events
            .iter()
            .filter(|e| e.aggregate_name == first.aggregate_name && e.aggregate_id == first.aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(Version::initial());

        if current_version != expected_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_name: first.aggregate_name.clone(),
                aggregate_id: first.aggregate_id.clone(),
                expected: expected_version,
                actual: current_version,
            });
        }

        let last_version = expected_version.advance(events.len());
        tx.tables.events.extend(events);

        Ok(last_version)
    }

    async fn load_events(
        &self,
        tx: &mut MemoryTx,
        aggregate_name: &str,
        aggregate_id: &AggregateId,
        after: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let mut events: Vec<_> = tx
            .tables
            .events
            .iter()
            .filter(|e| {
                e.aggregate_name == aggregate_name
                    && &e.aggregate_id == aggregate_id
                    && e.version > after
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }
}

#[async_trait]
impl SnapshotStore<MemoryTx> for MemoryDatabase {
    async fn get_snapshot(
        &self,
        tx: &mut MemoryTx,
        aggregate_name: &str,
        aggregate_id: &AggregateId,
    ) -> Result<Option<Snapshot>> {
        Ok(tx
            .tables
            .snapshots
            .get(&(aggregate_name.to_string(), aggregate_id.clone()))
            .cloned())
    }

    async fn save_snapshot(&self, tx: &mut MemoryTx, snapshot: Snapshot) -> Result<()> {
        let key = (snapshot.aggregate_name.clone(), snapshot.aggregate_id.clone());
        tx.tables.snapshots.insert(key, snapshot);
        Ok(())
    }
}

#[async_trait]
impl OutboxStore<MemoryTx> for MemoryDatabase {
    async fn save(&self, tx: &mut MemoryTx, message: &Message) -> Result<()> {
        if tx.tables.outbox.iter().any(|row| row.message.id == message.id) {
            return Err(EventStoreError::DuplicateMessage(message.id.clone()));
        }

        tx.tables.outbox.push(OutboxRow {
            message: message.clone(),
            published_at: None,
        });
        Ok(())
    }

    async fn find_unpublished(&self, tx: &mut MemoryTx, limit: usize) -> Result<Vec<Message>> {
        let mut rows: Vec<&OutboxRow> = tx
            .tables
            .outbox
            .iter()
            .filter(|row| row.published_at.is_none())
            .collect();
        // Stable sort keeps insertion order for equal timestamps
        rows.sort_by_key(|row| row.message.sent_at);

        Ok(rows
            .into_iter()
            .take(limit)
            .map(|row| row.message.clone())
            .collect())
    }

    async fn mark_published(&self, tx: &mut MemoryTx, ids: &[MessageId]) -> Result<()> {
        let now = Utc::now();
        for row in tx.tables.outbox.iter_mut() {
            if row.published_at.is_none() && ids.contains(&row.message.id) {
                row.published_at = Some(now);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl InboxStore<MemoryTx> for MemoryDatabase {
    async fn save(
        &self,
        tx: &mut MemoryTx,
        message: &Message,
        received_at: DateTime<Utc>,
    ) -> Result<()> {
        if tx.tables.inbox.iter().any(|row| row.message.id == message.id) {
            return Err(EventStoreError::DuplicateMessage(message.id.clone()));
        }

        tx.tables.inbox.push(InboxRow {
            message: message.clone(),
            received_at,
        });
        Ok(())
    }
}

#[async_trait]
impl SagaStore<MemoryTx> for MemoryDatabase {
    async fn load(&self, tx: &mut MemoryTx, saga_name: &str, id: &str) -> Result<Option<SagaRecord>> {
        Ok(tx
            .tables
            .sagas
            .get(&(saga_name.to_string(), id.to_string()))
            .cloned())
    }

    async fn save(&self, tx: &mut MemoryTx, record: &SagaRecord) -> Result<()> {
        tx.tables.sagas.insert(
            (record.saga_name.clone(), record.id.clone()),
            record.clone(),
        );
        Ok(())
    }
}
