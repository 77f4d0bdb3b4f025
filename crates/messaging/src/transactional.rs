use std::sync::Arc;

use async_trait::async_trait;
use common::{Message, Middleware, chain};
use event_store::Database;

use crate::{BoxError, Delivery, MessageHandler, MessagePublisher, Result};

/// Handles a delivery inside a caller-owned database transaction.
#[async_trait]
pub trait TxMessageHandler<Tx: Send>: Send + Sync {
    async fn handle(&self, tx: &mut Tx, delivery: &Delivery) -> std::result::Result<(), BoxError>;
}

/// Decorator over a transactional handler (for example the inbox).
pub type TxHandlerMiddleware<Tx> = Middleware<Arc<dyn TxMessageHandler<Tx>>>;

/// Publishes a message as part of a caller-owned transaction.
#[async_trait]
pub trait TxMessagePublisher<Tx: Send>: Send + Sync {
    async fn publish(&self, tx: &mut Tx, subject: &str, message: Message) -> Result<()>;
}

/// Runs a [`TxMessageHandler`] in a fresh transaction per delivery.
///
/// The transaction commits when the handler succeeds and rolls back when it
/// fails, so an inbox row written by the handler chain disappears together
/// with the failed work and the redelivery is processed again.
pub struct TransactionalHandler<D: Database> {
    db: Arc<D>,
    handler: Arc<dyn TxMessageHandler<D::Tx>>,
}

impl<D: Database> TransactionalHandler<D> {
    /// Wraps `handler` with `middlewares` (first outermost) and binds it to
    /// `db`.
    pub fn new(
        db: Arc<D>,
        handler: Arc<dyn TxMessageHandler<D::Tx>>,
        middlewares: impl IntoIterator<Item = TxHandlerMiddleware<D::Tx>>,
    ) -> Self {
        Self {
            db,
            handler: chain(handler, middlewares),
        }
    }
}

#[async_trait]
impl<D: Database> MessageHandler for TransactionalHandler<D> {
    async fn handle(&self, delivery: &Delivery) -> std::result::Result<(), BoxError> {
        let mut tx = self.db.begin().await?;

        match self.handler.handle(&mut tx, delivery).await {
            Ok(()) => {
                self.db.commit(tx).await?;
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = self.db.rollback(tx).await {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

/// Publishes straight to the broker, ignoring the transaction.
///
/// Publication is not atomic with the caller's writes; use
/// [`OutboxPublisher`](crate::OutboxPublisher) when it must be.
#[derive(Clone)]
pub struct DirectPublisher {
    publisher: Arc<dyn MessagePublisher>,
}

impl DirectPublisher {
    pub fn new(publisher: Arc<dyn MessagePublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl<Tx: Send + 'static> TxMessagePublisher<Tx> for DirectPublisher {
    async fn publish(&self, _tx: &mut Tx, subject: &str, message: Message) -> Result<()> {
        self.publisher.publish(subject, message).await
    }
}
