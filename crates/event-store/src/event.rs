use chrono::{DateTime, Utc};
use common::{Metadata, MessageId};
use serde::{Deserialize, Serialize};

use crate::{AggregateId, EventStoreError, Result};

/// Version number of an aggregate's event stream.
///
/// Version 0 is an aggregate with no committed events; the first event is
/// version 1 and every following event increments by one, without gaps.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Version of an aggregate with no events.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Version of the first event.
    pub fn first() -> Self {
        Self(1)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns this version advanced by `count` events.
    pub fn advance(&self, count: usize) -> Self {
        Self(self.0 + count as i64)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// A committed (or about to be committed) event in an aggregate's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier; reused as the outbox message id.
    pub event_id: MessageId,

    /// The type name of the event (e.g. "depot.ShoppingListCreated").
    pub event_name: String,

    pub aggregate_id: AggregateId,

    /// The type name of the aggregate (e.g. "depot.ShoppingList").
    pub aggregate_name: String,

    /// The version of the aggregate after this event.
    pub version: Version,

    pub occurred_at: DateTime<Utc>,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    pub metadata: Metadata,
}

impl EventEnvelope {
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }
}

/// Builder for constructing event envelopes.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<MessageId>,
    event_name: Option<String>,
    aggregate_id: Option<AggregateId>,
    aggregate_name: Option<String>,
    version: Option<Version>,
    occurred_at: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
    metadata: Metadata,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: MessageId) -> Self {
        self.event_id = Some(id);
        self
    }

    pub fn event_name(mut self, name: impl Into<String>) -> Self {
        self.event_name = Some(name.into());
        self
    }

    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    pub fn aggregate_name(mut self, name: impl Into<String>) -> Self {
        self.aggregate_name = Some(name.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Sets the occurrence time. If not set, the current time will be used.
    pub fn occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Builds the event envelope, failing if a required field is missing.
    pub fn build(self) -> Result<EventEnvelope> {
        let missing = |field: &str| EventStoreError::InvalidAppend(format!("{field} is required"));

        Ok(EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_name: self.event_name.ok_or_else(|| missing("event_name"))?,
            aggregate_id: self.aggregate_id.ok_or_else(|| missing("aggregate_id"))?,
            aggregate_name: self.aggregate_name.ok_or_else(|| missing("aggregate_name"))?,
            version: self.version.ok_or_else(|| missing("version"))?,
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
            payload: self.payload.unwrap_or(serde_json::Value::Null),
            metadata: self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering() {
        let v1 = Version::new(1);
        let v2 = Version::new(2);
        assert!(v1 < v2);
        assert_eq!(v1.next(), v2);
        assert_eq!(Version::initial().advance(3), Version::new(3));
    }

    #[test]
    fn event_envelope_builder() {
        let payload = serde_json::json!({"items": 2});

        let envelope = EventEnvelope::builder()
            .event_name("depot.ShoppingListCreated")
            .aggregate_id(AggregateId::from("sl-1"))
            .aggregate_name("depot.ShoppingList")
            .version(Version::first())
            .payload(payload.clone())
            .metadata(Metadata::new().with("traceparent", "00-abc-01"))
            .build()
            .unwrap();

        assert_eq!(envelope.event_name, "depot.ShoppingListCreated");
        assert_eq!(envelope.aggregate_id.as_str(), "sl-1");
        assert_eq!(envelope.version, Version::first());
        assert_eq!(envelope.payload, payload);
        assert_eq!(envelope.metadata.get_str("traceparent"), Some("00-abc-01"));
    }

    #[test]
    fn event_envelope_builder_reports_missing_fields() {
        let result = EventEnvelope::builder().event_name("Something").build();
        assert!(matches!(result, Err(EventStoreError::InvalidAppend(_))));
    }
}
