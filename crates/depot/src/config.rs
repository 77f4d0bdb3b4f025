//! Service configuration loaded from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use domain::SnapshotPolicy;
use messaging::OutboxConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `DATABASE_URL`: PostgreSQL connection string (default: unset, in-memory database)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `METRICS_ADDR`: Prometheus listener address (default: `0.0.0.0:9000`)
/// - `OUTBOX_BATCH_SIZE`: rows published per outbox poll (default: `50`)
/// - `OUTBOX_POLL_INTERVAL_MS`: idle wait between outbox polls (default: `500`)
/// - `SNAPSHOT_INTERVAL`: events between aggregate snapshots (default: `3`)
/// - `SERVICE_NAME`: subject prefix (default: `"depot"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_addr: SocketAddr,
    pub outbox_batch_size: usize,
    pub outbox_poll_interval: Duration,
    pub snapshot_interval: usize,
    pub service_name: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from `lookup`; unset or unparsable values fall
    /// back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            metrics_addr: lookup("METRICS_ADDR")
                .and_then(|a| a.parse().ok())
                .unwrap_or(defaults.metrics_addr),
            outbox_batch_size: lookup("OUTBOX_BATCH_SIZE")
                .and_then(|n| n.parse().ok())
                .unwrap_or(defaults.outbox_batch_size),
            outbox_poll_interval: lookup("OUTBOX_POLL_INTERVAL_MS")
                .and_then(|ms| ms.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.outbox_poll_interval),
            snapshot_interval: lookup("SNAPSHOT_INTERVAL")
                .and_then(|n| n.parse().ok())
                .unwrap_or(defaults.snapshot_interval),
            service_name: lookup("SERVICE_NAME").unwrap_or(defaults.service_name),
        }
    }

    pub fn outbox(&self) -> OutboxConfig {
        OutboxConfig {
            batch_size: self.outbox_batch_size,
            polling_interval: self.outbox_poll_interval,
        }
    }

    pub fn snapshot_policy(&self) -> SnapshotPolicy {
        SnapshotPolicy::every(self.snapshot_interval)
    }

    /// Subject the service's integration events are published on.
    pub fn events_subject(&self) -> String {
        format!("{}.events", self.service_name)
    }

    /// Subject the service receives commands on.
    pub fn commands_subject(&self) -> String {
        format!("{}.commands", self.service_name)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            outbox_batch_size: 50,
            outbox_poll_interval: Duration::from_millis(500),
            snapshot_interval: 3,
            service_name: "depot".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = from_pairs(&[]);
        assert_eq!(config.database_url, None);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.metrics_addr.to_string(), "0.0.0.0:9000");
        assert_eq!(config.outbox_batch_size, 50);
        assert_eq!(config.outbox_poll_interval, Duration::from_millis(500));
        assert_eq!(config.snapshot_interval, 3);
        assert_eq!(config.service_name, "depot");
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("DATABASE_URL", "postgres://localhost/depot"),
            ("LOG_FORMAT", "json"),
            ("METRICS_ADDR", "127.0.0.1:9100"),
            ("OUTBOX_BATCH_SIZE", "10"),
            ("OUTBOX_POLL_INTERVAL_MS", "25"),
            ("SNAPSHOT_INTERVAL", "5"),
            ("SERVICE_NAME", "depot-eu"),
        ]);

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/depot"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.metrics_addr.port(), 9100);
        assert_eq!(config.outbox().batch_size, 10);
        assert_eq!(config.outbox().polling_interval, Duration::from_millis(25));
        assert_eq!(config.snapshot_policy(), SnapshotPolicy::every(5));
        assert_eq!(config.events_subject(), "depot-eu.events");
        assert_eq!(config.commands_subject(), "depot-eu.commands");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("DATABASE_URL", ""),
            ("METRICS_ADDR", "not-an-address"),
            ("OUTBOX_BATCH_SIZE", "many"),
        ]);

        assert_eq!(config.database_url, None);
        assert_eq!(config.metrics_addr.port(), 9000);
        assert_eq!(config.outbox_batch_size, 50);
    }
}
