use std::sync::Arc;

use common::{AggregateId, chain};

use crate::{Aggregate, AggregateRoot, AggregateStore, Result, StoreMiddleware};

/// Loads and saves aggregates through a chain of aggregate stores.
pub struct AggregateRepository<A: Aggregate, Tx: Send> {
    store: Arc<dyn AggregateStore<A, Tx>>,
}

impl<A: Aggregate, Tx: Send + 'static> Clone for AggregateRepository<A, Tx> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<A: Aggregate, Tx: Send + 'static> AggregateRepository<A, Tx> {
    /// Wraps `store` with `middlewares`, first in the list outermost.
    pub fn new(
        store: Arc<dyn AggregateStore<A, Tx>>,
        middlewares: impl IntoIterator<Item = StoreMiddleware<A, Tx>>,
    ) -> Self {
        Self {
            store: chain(store, middlewares),
        }
    }

    /// Loads an aggregate. An id with no history yields an empty aggregate
    /// at version 0.
    #[tracing::instrument(skip(self, tx), fields(aggregate_name = A::aggregate_name()))]
    pub async fn load(&self, tx: &mut Tx, id: AggregateId) -> Result<AggregateRoot<A>> {
        let mut root = AggregateRoot::new(id);
        self.store.load(tx, &mut root).await?;
        Ok(root)
    }

    /// Saves the aggregate's pending events.
    ///
    /// Does nothing when there are none. Otherwise applies any pending
    /// events not yet applied, persists them with an optimistic version
    /// check and commits them on the root. On a version conflict the root
    /// is left untouched and the error is returned; reload and retry.
    #[tracing::instrument(
        skip(self, tx, root),
        fields(aggregate_name = A::aggregate_name(), aggregate_id = %root.id())
    )]
    pub async fn save(&self, tx: &mut Tx, root: &mut AggregateRoot<A>) -> Result<()> {
        if !root.has_pending() {
            return Ok(());
        }

        root.apply_pending();

        if let Err(err) = self.store.save(tx, root).await {
            if err.is_conflict() {
                metrics::counter!("aggregate_conflicts_total").increment(1);
                tracing::warn!(
                    expected_version = %root.version(),
                    "aggregate save lost a concurrency race"
                );
            }
            return Err(err);
        }

        root.commit_events();
        metrics::counter!("aggregate_saves_total").increment(1);

        Ok(())
    }
}
