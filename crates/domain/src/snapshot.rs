use std::sync::Arc;

use async_trait::async_trait;
use event_store::{Snapshot, SnapshotStore, Version};
use serde::{Serialize, de::DeserializeOwned};

use crate::{Aggregate, AggregateRoot, AggregateStore, Result, StoreMiddleware};

/// When to take a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPolicy {
    /// Snapshot every `interval` events.
    pub interval: usize,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self { interval: 3 }
    }
}

impl SnapshotPolicy {
    pub fn every(interval: usize) -> Self {
        Self { interval }
    }

    /// Whether a save of `pending_changes` events ending at
    /// `pending_version` crosses an interval boundary.
    pub fn should_snapshot(&self, pending_version: Version, pending_changes: usize) -> bool {
        if self.interval == 0 || pending_changes == 0 {
            return false;
        }

        let version = pending_version.as_i64().max(0) as usize;
        let interval = self.interval;

        version >= interval
            && (pending_changes >= interval
                || version % interval < pending_changes
                || version % interval == 0)
    }
}

/// Store middleware that restores from and periodically writes snapshots.
///
/// On load the latest snapshot is applied first, if its snapshot name
/// matches the aggregate's, and only later events are replayed. On save a
/// snapshot of the post-save state is written when the policy says so.
pub struct SnapshottingStore<A: Aggregate, Tx: Send> {
    next: Arc<dyn AggregateStore<A, Tx>>,
    snapshots: Arc<dyn SnapshotStore<Tx>>,
    policy: SnapshotPolicy,
}

impl<A, Tx> SnapshottingStore<A, Tx>
where
    A: Aggregate + Serialize + DeserializeOwned,
    Tx: Send + 'static,
{
    pub fn new(
        next: Arc<dyn AggregateStore<A, Tx>>,
        snapshots: Arc<dyn SnapshotStore<Tx>>,
        policy: SnapshotPolicy,
    ) -> Self {
        Self {
            next,
            snapshots,
            policy,
        }
    }

    /// Middleware form, for `AggregateRepository::new`.
    pub fn middleware(
        snapshots: Arc<dyn SnapshotStore<Tx>>,
        policy: SnapshotPolicy,
    ) -> StoreMiddleware<A, Tx> {
        Box::new(move |next| Arc::new(Self::new(next, snapshots, policy)))
    }
}

#[async_trait]
impl<A, Tx> AggregateStore<A, Tx> for SnapshottingStore<A, Tx>
where
    A: Aggregate + Serialize + DeserializeOwned,
    Tx: Send + 'static,
{
    async fn load(&self, tx: &mut Tx, root: &mut AggregateRoot<A>) -> Result<()> {
        if let Some(snapshot) = self
            .snapshots
            .get_snapshot(tx, A::aggregate_name(), root.id())
            .await?
        {
            if snapshot.snapshot_name == A::snapshot_name() {
                let version = snapshot.version;
                root.restore(snapshot.into_state()?, version);
            } else {
                tracing::debug!(
                    aggregate_id = %root.id(),
                    snapshot_name = %snapshot.snapshot_name,
                    "ignoring snapshot with a different layout"
                );
            }
        }

        self.next.load(tx, root).await
    }

    async fn save(&self, tx: &mut Tx, root: &AggregateRoot<A>) -> Result<()> {
        self.next.save(tx, root).await?;

        let pending_version = root.pending_version();
        if !self
            .policy
            .should_snapshot(pending_version, root.pending().len())
        {
            return Ok(());
        }

        let snapshot = Snapshot::from_state(
            root.id().clone(),
            A::aggregate_name(),
            A::snapshot_name(),
            pending_version,
            root.state(),
        )?;
        self.snapshots.save_snapshot(tx, snapshot).await?;

        metrics::counter!("snapshots_saved_total").increment(1);
        tracing::debug!(aggregate_id = %root.id(), version = %pending_version, "snapshot saved");

        Ok(())
    }
}
