//! Transactional outbox.
//!
//! [`OutboxPublisher`] records messages in the caller's transaction instead
//! of sending them; [`OutboxProcessor`] later moves committed rows to the
//! broker. A crash between publish and mark means the batch is published
//! again, which the consumers' inbox absorbs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Message, MessageId};
use event_store::{Database, EventStoreError, OutboxStore};
use tokio_util::sync::CancellationToken;

use crate::{MessagePublisher, Result, TxMessagePublisher};

/// Saves messages to the outbox table as part of the caller's transaction.
pub struct OutboxPublisher<Tx: Send> {
    store: Arc<dyn OutboxStore<Tx>>,
}

impl<Tx: Send + 'static> OutboxPublisher<Tx> {
    pub fn new(store: Arc<dyn OutboxStore<Tx>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<Tx: Send + 'static> TxMessagePublisher<Tx> for OutboxPublisher<Tx> {
    async fn publish(&self, tx: &mut Tx, subject: &str, message: Message) -> Result<()> {
        let message = message.with_subject(subject);

        match self.store.save(tx, &message).await {
            Ok(()) => Ok(()),
            Err(EventStoreError::DuplicateMessage(id)) => {
                tracing::debug!(message_id = %id, "message already in outbox");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Outbox processor settings.
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Maximum rows fetched per batch.
    pub batch_size: usize,
    /// Sleep between polls when the outbox is empty or a batch failed.
    pub polling_interval: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            polling_interval: Duration::from_millis(500),
        }
    }
}

/// Publishes committed outbox rows and marks them published.
pub struct OutboxProcessor<D> {
    db: Arc<D>,
    publisher: Arc<dyn MessagePublisher>,
    config: OutboxConfig,
}

impl<D> OutboxProcessor<D>
where
    D: Database + OutboxStore<<D as Database>::Tx>,
{
    pub fn new(db: Arc<D>, publisher: Arc<dyn MessagePublisher>, config: OutboxConfig) -> Self {
        Self {
            db,
            publisher,
            config,
        }
    }

    /// Publishes one batch; returns how many messages were published.
    ///
    /// Rows are locked for the duration of the batch. If any publish fails
    /// the whole batch is rolled back and stays unpublished.
    #[tracing::instrument(skip(self))]
    pub async fn process_batch(&self) -> Result<usize> {
        let mut tx = self.db.begin().await?;
        let messages = self
            .db
            .find_unpublished(&mut tx, self.config.batch_size)
            .await?;

        if messages.is_empty() {
            self.db.rollback(tx).await?;
            return Ok(0);
        }

        for message in &messages {
            if let Err(err) = self
                .publisher
                .publish(&message.subject, message.clone())
                .await
            {
                metrics::counter!("outbox_publish_failures_total").increment(1);
                if let Err(rollback_err) = self.db.rollback(tx).await {
                    tracing::warn!(error = %rollback_err, "outbox rollback failed");
                }
                return Err(err);
            }
        }

        let ids: Vec<MessageId> = messages.iter().map(|m| m.id.clone()).collect();
        self.db.mark_published(&mut tx, &ids).await?;
        self.db.commit(tx).await?;

        metrics::counter!("outbox_messages_published_total").increment(ids.len() as u64);
        tracing::debug!(count = ids.len(), "published outbox batch");

        Ok(ids.len())
    }

    /// Polls until `shutdown` is cancelled.
    ///
    /// A full or partial batch is followed immediately by the next poll, so
    /// a backlog drains without waiting; an empty or failed poll waits one
    /// polling interval.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            batch_size = self.config.batch_size,
            polling_interval_ms = self.config.polling_interval.as_millis() as u64,
            "outbox processor started"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.process_batch().await {
                Ok(count) if count > 0 => continue,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "outbox batch failed");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.polling_interval) => {}
            }
        }

        tracing::info!("outbox processor stopped");
    }
}
