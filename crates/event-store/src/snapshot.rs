use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AggregateId, Version};

/// A snapshot of an aggregate's state at a specific version.
///
/// One snapshot is kept per aggregate; saving replaces the previous one. The
/// `snapshot_name` identifies the state layout, so a loader can ignore a
/// snapshot written by an older layout and fall back to full replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub aggregate_id: AggregateId,

    pub aggregate_name: String,

    pub snapshot_name: String,

    /// The version of the aggregate at the time of the snapshot.
    pub version: Version,

    pub taken_at: DateTime<Utc>,

    /// The serialized aggregate state.
    pub state: serde_json::Value,
}

impl Snapshot {
    /// Creates a snapshot from a serializable state.
    pub fn from_state<T: Serialize>(
        aggregate_id: AggregateId,
        aggregate_name: impl Into<String>,
        snapshot_name: impl Into<String>,
        version: Version,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            aggregate_id,
            aggregate_name: aggregate_name.into(),
            snapshot_name: snapshot_name.into(),
            version,
            taken_at: Utc::now(),
            state: serde_json::to_value(state)?,
        })
    }

    /// Deserializes the snapshot state into a concrete type.
    pub fn into_state<T: for<'de> Deserialize<'de>>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state)
    }
}
