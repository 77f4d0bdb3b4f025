//! Aggregate stores.
//!
//! [`EventSourcedStore`] is the base store; the other stores in this crate
//! are middleware that wrap it. `AggregateRepository::new(base, [a, b])`
//! produces `a(b(base))`.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use common::Middleware;
use event_store::{EventEnvelope, EventStore};

use crate::{
    Aggregate, AggregateRoot, DomainEvent, Result,
    aggregate::aggregate_metadata,
};

/// Loads and saves aggregates inside a caller-owned transaction.
#[async_trait]
pub trait AggregateStore<A: Aggregate, Tx: Send>: Send + Sync {
    /// Hydrates `root`, whose id is already set, from storage.
    async fn load(&self, tx: &mut Tx, root: &mut AggregateRoot<A>) -> Result<()>;

    /// Persists the pending events of `root`. The root is left unchanged;
    /// committing its events is the caller's job.
    async fn save(&self, tx: &mut Tx, root: &AggregateRoot<A>) -> Result<()>;
}

/// Decorator over an aggregate store.
pub type StoreMiddleware<A, Tx> = Middleware<Arc<dyn AggregateStore<A, Tx>>>;

/// Persists aggregates as event streams.
pub struct EventSourcedStore<A, Tx: Send> {
    events: Arc<dyn EventStore<Tx>>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A: Aggregate, Tx: Send + 'static> EventSourcedStore<A, Tx> {
    pub fn new(events: Arc<dyn EventStore<Tx>>) -> Self {
        Self {
            events,
            _aggregate: PhantomData,
        }
    }

    fn envelopes(root: &AggregateRoot<A>) -> Result<Vec<EventEnvelope>> {
        let mut version = root.version();
        let mut envelopes = Vec::with_capacity(root.pending().len());

        for pending in root.pending() {
            version = version.next();
            let envelope = EventEnvelope::builder()
                .event_id(pending.id.clone())
                .event_name(pending.event.event_name())
                .aggregate_id(root.id().clone())
                .aggregate_name(A::aggregate_name())
                .version(version)
                .occurred_at(pending.occurred_at)
                .payload(pending.event.to_payload()?)
                .metadata(aggregate_metadata(root.id(), A::aggregate_name(), version))
                .build()?;
            envelopes.push(envelope);
        }

        Ok(envelopes)
    }
}

#[async_trait]
impl<A: Aggregate, Tx: Send + 'static> AggregateStore<A, Tx> for EventSourcedStore<A, Tx> {
    async fn load(&self, tx: &mut Tx, root: &mut AggregateRoot<A>) -> Result<()> {
        let events = self
            .events
            .load_events(tx, A::aggregate_name(), root.id(), root.version())
            .await?;

        for envelope in events {
            let event = A::Event::from_payload(&envelope.event_name, envelope.payload)?;
            root.replay(&event, envelope.version);
        }

        Ok(())
    }

    async fn save(&self, tx: &mut Tx, root: &AggregateRoot<A>) -> Result<()> {
        let envelopes = Self::envelopes(root)?;
        self.events.append(tx, envelopes, root.version()).await?;
        Ok(())
    }
}
