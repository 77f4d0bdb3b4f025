//! Outbox processor polling behaviour against the in-memory database.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Message, MessageId, Metadata};
use event_store::{Database, MemoryDatabase, MemoryTx, OutboxStore};
use messaging::{
    InMemoryBroker, MessageSubscriber, OutboxConfig, OutboxProcessor, OutboxPublisher,
    SubscriberConfig, TxMessagePublisher,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Records the size of every batch the processor fetches.
#[derive(Clone, Default)]
struct CountingDatabase {
    inner: MemoryDatabase,
    fetches: Arc<Mutex<Vec<usize>>>,
}

impl CountingDatabase {
    async fn fetches(&self) -> Vec<usize> {
        self.fetches.lock().await.clone()
    }
}

#[async_trait]
impl Database for CountingDatabase {
    type Tx = MemoryTx;

    async fn begin(&self) -> event_store::Result<MemoryTx> {
        self.inner.begin().await
    }

    async fn commit(&self, tx: MemoryTx) -> event_store::Result<()> {
        self.inner.commit(tx).await
    }

    async fn rollback(&self, tx: MemoryTx) -> event_store::Result<()> {
        self.inner.rollback(tx).await
    }
}

#[async_trait]
impl OutboxStore<MemoryTx> for CountingDatabase {
    async fn save(&self, tx: &mut MemoryTx, message: &Message) -> event_store::Result<()> {
        OutboxStore::save(&self.inner, tx, message).await
    }

    async fn find_unpublished(
        &self,
        tx: &mut MemoryTx,
        limit: usize,
    ) -> event_store::Result<Vec<Message>> {
        let batch = self.inner.find_unpublished(tx, limit).await?;
        self.fetches.lock().await.push(batch.len());
        Ok(batch)
    }

    async fn mark_published(&self, tx: &mut MemoryTx, ids: &[MessageId]) -> event_store::Result<()> {
        self.inner.mark_published(tx, ids).await
    }
}

async fn seed(db: &Arc<CountingDatabase>, count: usize) {
    let publisher = OutboxPublisher::<MemoryTx>::new(db.clone());
    let mut tx = db.begin().await.unwrap();
    for i in 0..count {
        let message = Message::new(
            MessageId::from(format!("m-{i:03}")),
            "depot.ShoppingListCreated",
            "",
            b"{}".to_vec(),
            Metadata::new(),
        );
        publisher.publish(&mut tx, "depot.events", message).await.unwrap();
    }
    db.commit(tx).await.unwrap();
}

async fn wait_for_fetches(db: &CountingDatabase, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while db.fetches().await.len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("processor did not poll in time");
}

#[tokio::test]
async fn backlog_drains_without_waiting_between_full_batches() {
    let db = Arc::new(CountingDatabase::default());
    let broker = InMemoryBroker::new();
    seed(&db, 120).await;

    let processor = Arc::new(OutboxProcessor::new(
        db.clone(),
        Arc::new(broker.clone()),
        OutboxConfig {
            batch_size: 50,
            polling_interval: Duration::from_secs(60),
        },
    ));
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let processor = processor.clone();
        let shutdown = shutdown.clone();
        async move { processor.run(shutdown).await }
    });

    wait_for_fetches(&db, 4).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Three fetches drain the backlog, the fourth finds nothing and the
    // processor then sleeps out its polling interval.
    assert_eq!(db.fetches().await, vec![50, 50, 20, 0]);
    assert_eq!(broker.published().await.len(), 120);
    assert_eq!(db.inner.unpublished_count().await, 0);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("processor did not stop")
        .unwrap();
}

#[tokio::test]
async fn messages_published_in_order_reach_subscribers() {
    let db = Arc::new(CountingDatabase::default());
    let broker = InMemoryBroker::new();
    seed(&db, 3).await;

    let received = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(Recorder(received.clone()));
    broker
        .subscribe("depot.events", handler, SubscriberConfig::new())
        .await
        .unwrap();

    let processor = OutboxProcessor::new(db.clone(), Arc::new(broker.clone()), OutboxConfig::default());
    assert_eq!(processor.process_batch().await.unwrap(), 3);

    tokio::time::timeout(Duration::from_secs(5), broker.wait_until_idle())
        .await
        .unwrap();

    assert_eq!(
        *received.lock().await,
        vec![
            MessageId::from("m-000"),
            MessageId::from("m-001"),
            MessageId::from("m-002")
        ]
    );
}

struct Recorder(Arc<Mutex<Vec<MessageId>>>);

#[async_trait]
impl messaging::MessageHandler for Recorder {
    async fn handle(&self, delivery: &messaging::Delivery) -> Result<(), messaging::BoxError> {
        self.0.lock().await.push(delivery.message().id.clone());
        Ok(())
    }
}
