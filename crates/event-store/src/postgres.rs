use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Message, Metadata, MessageId};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Snapshot, Version,
    store::{
        Database, EventStore, InboxStore, OutboxStore, SagaRecord, SagaStore, SnapshotStore,
        validate_events_for_append,
    },
};

/// A PostgreSQL transaction.
pub type PgTx = Transaction<'static, Postgres>;

/// Name of the unique constraint guarding `(stream_name, stream_id, stream_version)`.
const STREAM_VERSION_CONSTRAINT: &str = "unique_stream_version";

/// Table names used by [`PostgresDatabase`].
///
/// The defaults match `migrations/`. Services sharing one database put their
/// tables in their own schema with [`PostgresTables::in_schema`].
#[derive(Debug, Clone)]
pub struct PostgresTables {
    pub events: String,
    pub snapshots: String,
    pub outbox: String,
    pub inbox: String,
    pub sagas: String,
}

impl PostgresTables {
    /// Prefixes every table name with `schema.`.
    pub fn in_schema(schema: &str) -> Self {
        let defaults = Self::default();
        Self {
            events: format!("{schema}.{}", defaults.events),
            snapshots: format!("{schema}.{}", defaults.snapshots),
            outbox: format!("{schema}.{}", defaults.outbox),
            inbox: format!("{schema}.{}", defaults.inbox),
            sagas: format!("{schema}.{}", defaults.sagas),
        }
    }
}

impl Default for PostgresTables {
    fn default() -> Self {
        Self {
            events: "events".to_string(),
            snapshots: "snapshots".to_string(),
            outbox: "outbox".to_string(),
            inbox: "inbox".to_string(),
            sagas: "sagas".to_string(),
        }
    }
}

/// PostgreSQL-backed implementation of every store contract.
#[derive(Clone)]
pub struct PostgresDatabase {
    pool: PgPool,
    tables: PostgresTables,
}

impl PostgresDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self::with_tables(pool, PostgresTables::default())
    }

    pub fn with_tables(pool: PgPool, tables: PostgresTables) -> Self {
        Self { pool, tables }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        let metadata: Metadata = serde_json::from_value(row.try_get("metadata")?)?;

        Ok(EventEnvelope {
            event_id: MessageId::from(row.try_get::<String, _>("event_id")?),
            event_name: row.try_get("event_name")?,
            aggregate_id: AggregateId::from(row.try_get::<String, _>("stream_id")?),
            aggregate_name: row.try_get("stream_name")?,
            version: Version::new(row.try_get("stream_version")?),
            occurred_at: row.try_get("occurred_at")?,
            payload: row.try_get("event_data")?,
            metadata,
        })
    }

    fn row_to_message(row: PgRow) -> Result<Message> {
        let metadata: Metadata = serde_json::from_value(row.try_get("metadata")?)?;

        Ok(Message {
            id: MessageId::from(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            subject: row.try_get("subject")?,
            data: row.try_get("data")?,
            metadata,
            sent_at: row.try_get("sent_at")?,
        })
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: PgTx) -> Result<()> {
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self, tx: PgTx) -> Result<()> {
        tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl EventStore<PgTx> for PostgresDatabase {
    async fn append(
        &self,
        tx: &mut PgTx,
        events: Vec<EventEnvelope>,
        expected_version: Version,
    ) -> Result<Version> {
        validate_events_for_append(&events, expected_version)?;

        let aggregate_name = events[0].aggregate_name.clone();
        let aggregate_id = events[0].aggregate_id.clone();

        let current_version: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT MAX(stream_version) FROM {} WHERE stream_name = $1 AND stream_id = $2",
            self.tables.events
        ))
        .bind(&aggregate_name)
        .bind(aggregate_id.as_str())
        .fetch_one(&mut **tx)
        .await?;

        let actual = Version::new(current_version.unwrap_or(0));
        if actual != expected_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_name,
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }

        let query = format!(
            r#"
            INSERT INTO {} (stream_id, stream_name, stream_version, event_id, event_name, event_data, metadata, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
            self.tables.events
        );

        let mut last_version = expected_version;
        for event in &events {
            sqlx::query(&query)
                .bind(event.aggregate_id.as_str())
                .bind(&event.aggregate_name)
                .bind(event.version.as_i64())
                .bind(event.event_id.as_str())
                .bind(&event.event_name)
                .bind(&event.payload)
                .bind(serde_json::to_value(&event.metadata)?)
                .bind(event.occurred_at)
                .execute(&mut **tx)
                .await
                .map_err(|e| {
                    // A concurrent writer committed the same version first
                    if let sqlx::Error::Database(ref db_err) = e
                        && db_err.constraint() == Some(STREAM_VERSION_CONSTRAINT)
                    {
                        return EventStoreError::ConcurrencyConflict {
                            aggregate_name: aggregate_name.clone(),
                            aggregate_id: aggregate_id.clone(),
                            expected: expected_version,
                            actual: event.version,
                        };
                    }
                    EventStoreError::Database(e)
                })?;

            last_version = event.version;
        }

        Ok(last_version)
    }

    async fn load_events(
        &self,
        tx: &mut PgTx,
        aggregate_name: &str,
        aggregate_id: &AggregateId,
        after: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT stream_id, stream_name, stream_version, event_id, event_name, event_data, metadata, occurred_at
            FROM {}
            WHERE stream_name = $1 AND stream_id = $2 AND stream_version > $3
            ORDER BY stream_version ASC
            "#,
            self.tables.events
        ))
        .bind(aggregate_name)
        .bind(aggregate_id.as_str())
        .bind(after.as_i64())
        .fetch_all(&mut **tx)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }
}

#[async_trait]
impl SnapshotStore<PgTx> for PostgresDatabase {
    async fn get_snapshot(
        &self,
        tx: &mut PgTx,
        aggregate_name: &str,
        aggregate_id: &AggregateId,
    ) -> Result<Option<Snapshot>> {
        let row: Option<PgRow> = sqlx::query(&format!(
            r#"
            SELECT stream_version, snapshot_name, snapshot_data, updated_at
            FROM {}
            WHERE stream_name = $1 AND stream_id = $2
            "#,
            self.tables.snapshots
        ))
        .bind(aggregate_name)
        .bind(aggregate_id.as_str())
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some(row) => Ok(Some(Snapshot {
                aggregate_id: aggregate_id.clone(),
                aggregate_name: aggregate_name.to_string(),
                snapshot_name: row.try_get("snapshot_name")?,
                version: Version::new(row.try_get("stream_version")?),
                taken_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
                state: row.try_get("snapshot_data")?,
            })),
            None => Ok(None),
        }
    }

    async fn save_snapshot(&self, tx: &mut PgTx, snapshot: Snapshot) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (stream_id, stream_name, stream_version, snapshot_name, snapshot_data, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (stream_id, stream_name) DO UPDATE SET
                stream_version = EXCLUDED.stream_version,
                snapshot_name = EXCLUDED.snapshot_name,
                snapshot_data = EXCLUDED.snapshot_data,
                updated_at = EXCLUDED.updated_at
            "#,
            self.tables.snapshots
        ))
        .bind(snapshot.aggregate_id.as_str())
        .bind(&snapshot.aggregate_name)
        .bind(snapshot.version.as_i64())
        .bind(&snapshot.snapshot_name)
        .bind(&snapshot.state)
        .bind(snapshot.taken_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl OutboxStore<PgTx> for PostgresDatabase {
    async fn save(&self, tx: &mut PgTx, message: &Message) -> Result<()> {
        // ON CONFLICT keeps the transaction usable after a duplicate
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, name, subject, data, metadata, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
            self.tables.outbox
        ))
        .bind(message.id.as_str())
        .bind(&message.name)
        .bind(&message.subject)
        .bind(&message.data)
        .bind(serde_json::to_value(&message.metadata)?)
        .bind(message.sent_at)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EventStoreError::DuplicateMessage(message.id.clone()));
        }
        Ok(())
    }

    async fn find_unpublished(&self, tx: &mut PgTx, limit: usize) -> Result<Vec<Message>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT id, name, subject, data, metadata, sent_at
            FROM {}
            WHERE published_at IS NULL
            ORDER BY sent_at ASC, id ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
            self.tables.outbox
        ))
        .bind(limit as i64)
        .fetch_all(&mut **tx)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn mark_published(&self, tx: &mut PgTx, ids: &[MessageId]) -> Result<()> {
        let ids: Vec<String> = ids.iter().map(|id| id.as_str().to_string()).collect();

        sqlx::query(&format!(
            "UPDATE {} SET published_at = CURRENT_TIMESTAMP WHERE id = ANY($1)",
            self.tables.outbox
        ))
        .bind(&ids)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl InboxStore<PgTx> for PostgresDatabase {
    async fn save(
        &self,
        tx: &mut PgTx,
        message: &Message,
        received_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, name, subject, data, metadata, sent_at, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
            self.tables.inbox
        ))
        .bind(message.id.as_str())
        .bind(&message.name)
        .bind(&message.subject)
        .bind(&message.data)
        .bind(serde_json::to_value(&message.metadata)?)
        .bind(message.sent_at)
        .bind(received_at)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EventStoreError::DuplicateMessage(message.id.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl SagaStore<PgTx> for PostgresDatabase {
    async fn load(&self, tx: &mut PgTx, saga_name: &str, id: &str) -> Result<Option<SagaRecord>> {
        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT data, step, done, compensating FROM {} WHERE name = $1 AND id = $2",
            self.tables.sagas
        ))
        .bind(saga_name)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some(row) => Ok(Some(SagaRecord {
                saga_name: saga_name.to_string(),
                id: id.to_string(),
                data: row.try_get("data")?,
                step: row.try_get("step")?,
                done: row.try_get("done")?,
                compensating: row.try_get("compensating")?,
            })),
            None => Ok(None),
        }
    }

    async fn save(&self, tx: &mut PgTx, record: &SagaRecord) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (name, id, data, step, done, compensating, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, CURRENT_TIMESTAMP)
            ON CONFLICT (name, id) DO UPDATE SET
                data = EXCLUDED.data,
                step = EXCLUDED.step,
                done = EXCLUDED.done,
                compensating = EXCLUDED.compensating,
                updated_at = EXCLUDED.updated_at
            "#,
            self.tables.sagas
        ))
        .bind(&record.saga_name)
        .bind(&record.id)
        .bind(&record.data)
        .bind(record.step)
        .bind(record.done)
        .bind(record.compensating)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}
