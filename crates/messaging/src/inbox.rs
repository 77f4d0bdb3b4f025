use std::sync::Arc;

use async_trait::async_trait;
use event_store::{EventStoreError, InboxStore};

use crate::{BoxError, Delivery, TxHandlerMiddleware, TxMessageHandler};

/// Idempotent-consumer decorator.
///
/// Records the message id in the inbox before running the wrapped handler.
/// If the id is already recorded the delivery is a redelivery of handled
/// work: it succeeds without calling the handler, so the broker acks it.
pub struct InboxHandler<Tx: Send> {
    store: Arc<dyn InboxStore<Tx>>,
    next: Arc<dyn TxMessageHandler<Tx>>,
}

impl<Tx: Send + 'static> InboxHandler<Tx> {
    pub fn new(store: Arc<dyn InboxStore<Tx>>, next: Arc<dyn TxMessageHandler<Tx>>) -> Self {
        Self { store, next }
    }
}

#[async_trait]
impl<Tx: Send + 'static> TxMessageHandler<Tx> for InboxHandler<Tx> {
    async fn handle(&self, tx: &mut Tx, delivery: &Delivery) -> Result<(), BoxError> {
        let message = delivery.message();

        match self.store.save(tx, message, delivery.received_at()).await {
            Ok(()) => {}
            Err(EventStoreError::DuplicateMessage(id)) => {
                tracing::debug!(message_id = %id, "message already handled");
                metrics::counter!("inbox_duplicates_total").increment(1);
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        self.next.handle(tx, delivery).await
    }
}

/// Middleware form of [`InboxHandler`].
pub fn inbox_middleware<Tx: Send + 'static>(
    store: Arc<dyn InboxStore<Tx>>,
) -> TxHandlerMiddleware<Tx> {
    Box::new(move |next| Arc::new(InboxHandler::new(store, next)))
}
