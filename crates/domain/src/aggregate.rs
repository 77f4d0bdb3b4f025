//! Core aggregate and domain event traits.

use chrono::{DateTime, Utc};
use common::{AggregateId, MessageId, Metadata};
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::DomainError;

/// Metadata key holding the id of the aggregate that recorded an event.
pub const AGGREGATE_ID: &str = "aggregate-id";
/// Metadata key holding the aggregate's name.
pub const AGGREGATE_NAME: &str = "aggregate-name";
/// Metadata key holding the version the event was recorded at.
pub const AGGREGATE_VERSION: &str = "aggregate-version";

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
///
/// The default payload codec serializes the whole event; enums are expected
/// to use an adjacently tagged representation so the variant survives.
pub trait DomainEvent:
    Serialize + DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static
{
    /// Returns the event name used on the wire (e.g. "depot.ShoppingListCreated").
    fn event_name(&self) -> &'static str;

    fn to_payload(&self) -> Result<Value, DomainError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decodes a stored payload, checking that it matches `name`.
    fn from_payload(name: &str, payload: Value) -> Result<Self, DomainError> {
        let event: Self = serde_json::from_value(payload)?;
        if event.event_name() != name {
            return Err(DomainError::UnknownEvent(name.to_string()));
        }
        Ok(event)
    }
}

/// Trait for aggregate state in an event-sourced system.
///
/// The state is rebuilt by replaying events through [`Aggregate::apply`],
/// which must be pure and deterministic and must not fail: events are facts
/// that have already happened. Identity, version and pending events live in
/// [`AggregateRoot`](crate::AggregateRoot), not in the state.
pub trait Aggregate: Default + Send + Sync + 'static {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Stream name in the event store (e.g. "depot.ShoppingList").
    fn aggregate_name() -> &'static str;

    /// Name of the snapshot layout. Change it when the state's serialized
    /// form changes so old snapshots are ignored.
    fn snapshot_name() -> &'static str {
        Self::aggregate_name()
    }

    /// Applies an event to the state.
    fn apply(&mut self, event: &Self::Event);
}

/// An event recorded on an aggregate but not yet committed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent<E> {
    pub id: MessageId,
    pub event: E,
    pub occurred_at: DateTime<Utc>,
}

/// Metadata stamped on every event recorded by an aggregate.
pub fn aggregate_metadata(
    aggregate_id: &AggregateId,
    aggregate_name: &str,
    version: Version,
) -> Metadata {
    Metadata::new()
        .with(AGGREGATE_ID, aggregate_id.as_str())
        .with(AGGREGATE_NAME, aggregate_name)
        .with(AGGREGATE_VERSION, version.as_i64())
}
