use chrono::Utc;
use common::{AggregateId, MessageId};
use event_store::Version;

use crate::aggregate::{Aggregate, PendingEvent};

/// An aggregate instance: identity, committed version, state, and the
/// events recorded since it was loaded.
///
/// `pending_version() == version() + pending().len()` always holds.
#[derive(Debug, Clone)]
pub struct AggregateRoot<A: Aggregate> {
    id: AggregateId,
    version: Version,
    state: A,
    pending: Vec<PendingEvent<A::Event>>,
    /// How many pending events have already been applied to `state`.
    applied: usize,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// An empty aggregate at version 0.
    pub fn new(id: impl Into<AggregateId>) -> Self {
        Self {
            id: id.into(),
            version: Version::initial(),
            state: A::default(),
            pending: Vec::new(),
            applied: 0,
        }
    }

    pub fn id(&self) -> &AggregateId {
        &self.id
    }

    /// Number of committed events.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn pending_version(&self) -> Version {
        self.version.advance(self.pending.len())
    }

    pub fn pending(&self) -> &[PendingEvent<A::Event>] {
        &self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    /// True while nothing has been committed or recorded.
    pub fn is_new(&self) -> bool {
        self.version == Version::initial() && self.pending.is_empty()
    }

    /// Records an event and applies it immediately, so command logic that
    /// follows sees the new state.
    pub fn record(&mut self, event: A::Event) {
        self.add_event(event);
        self.apply_pending();
    }

    /// Records an event without applying it; it is applied on save.
    pub fn add_event(&mut self, event: A::Event) {
        self.pending.push(PendingEvent {
            id: MessageId::new(),
            event,
            occurred_at: Utc::now(),
        });
    }

    /// Applies every pending event not yet applied to the state.
    pub fn apply_pending(&mut self) {
        for pending in &self.pending[self.applied..] {
            self.state.apply(&pending.event);
        }
        self.applied = self.pending.len();
    }

    /// Marks pending events as committed.
    pub fn commit_events(&mut self) {
        self.version = self.pending_version();
        self.pending.clear();
        self.applied = 0;
    }

    /// Replaces the state with a snapshot taken at `version`.
    pub(crate) fn restore(&mut self, state: A, version: Version) {
        self.state = state;
        self.version = version;
    }

    /// Applies a committed event loaded from the store.
    pub(crate) fn replay(&mut self, event: &A::Event, version: Version) {
        self.state.apply(event);
        self.version = version;
    }
}
