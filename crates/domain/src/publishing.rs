use std::sync::Arc;

use async_trait::async_trait;
use messaging::{Envelope, TxMessagePublisher};

use crate::{
    Aggregate, AggregateRoot, AggregateStore, DomainEvent, Result, StoreMiddleware,
    aggregate::aggregate_metadata,
};

/// Store middleware that publishes an aggregate's newly saved events.
///
/// Publishing goes through a [`TxMessagePublisher`] in the save's own
/// transaction; with an outbox publisher the events and their outbox rows
/// commit or roll back together. Each message keeps its event's id.
pub struct EventPublishingStore<A: Aggregate, Tx: Send> {
    next: Arc<dyn AggregateStore<A, Tx>>,
    publisher: Arc<dyn TxMessagePublisher<Tx>>,
    subject: String,
}

impl<A: Aggregate, Tx: Send + 'static> EventPublishingStore<A, Tx> {
    pub fn new(
        next: Arc<dyn AggregateStore<A, Tx>>,
        publisher: Arc<dyn TxMessagePublisher<Tx>>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            next,
            publisher,
            subject: subject.into(),
        }
    }

    /// Middleware form, for `AggregateRepository::new`.
    pub fn middleware(
        publisher: Arc<dyn TxMessagePublisher<Tx>>,
        subject: impl Into<String>,
    ) -> StoreMiddleware<A, Tx> {
        let subject = subject.into();
        Box::new(move |next| Arc::new(Self::new(next, publisher, subject)))
    }
}

#[async_trait]
impl<A: Aggregate, Tx: Send + 'static> AggregateStore<A, Tx> for EventPublishingStore<A, Tx> {
    async fn load(&self, tx: &mut Tx, root: &mut AggregateRoot<A>) -> Result<()> {
        self.next.load(tx, root).await
    }

    async fn save(&self, tx: &mut Tx, root: &AggregateRoot<A>) -> Result<()> {
        self.next.save(tx, root).await?;

        let mut version = root.version();
        for pending in root.pending() {
            version = version.next();

            let mut envelope = Envelope::event(pending.event.event_name(), pending.event.to_payload()?)
                .with_id(pending.id.clone())
                .with_occurred_at(pending.occurred_at);
            envelope.metadata = aggregate_metadata(root.id(), A::aggregate_name(), version);

            let message = envelope.to_message(self.subject.as_str())?;
            self.publisher.publish(tx, &self.subject, message).await?;
        }

        tracing::debug!(
            aggregate_id = %root.id(),
            count = root.pending().len(),
            subject = %self.subject,
            "published aggregate events"
        );

        Ok(())
    }
}
