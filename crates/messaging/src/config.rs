use std::time::Duration;

/// How a subscriber acknowledges deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Acknowledged on receipt; handler errors are logged and dropped.
    Auto,
    /// Acknowledged from the handler's result; errors and timeouts redeliver.
    #[default]
    Manual,
}

/// Subscription options.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Message names this subscriber handles. Empty accepts everything;
    /// other names are acknowledged without invoking the handler.
    pub message_filter: Vec<String>,

    /// Consumer group. Subscribers sharing a group compete for deliveries;
    /// without a group every subscriber receives every message.
    pub group: Option<String>,

    pub ack_mode: AckMode,

    /// How long a manual-ack handler may run before the delivery is
    /// considered lost and redelivered.
    pub ack_wait: Duration,

    /// Redeliveries allowed after the first attempt before a message is
    /// dead-lettered.
    pub max_redeliver: u32,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            message_filter: Vec::new(),
            group: None,
            ack_mode: AckMode::Manual,
            ack_wait: Duration::from_secs(30),
            max_redeliver: 5,
        }
    }
}

impl SubscriberConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_filter<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.message_filter = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }

    pub fn ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    pub fn max_redeliver(mut self, max_redeliver: u32) -> Self {
        self.max_redeliver = max_redeliver;
        self
    }

    /// Whether a message with this name passes the filter.
    pub fn accepts(&self, name: &str) -> bool {
        self.message_filter.is_empty() || self.message_filter.iter().any(|n| n == name)
    }
}
