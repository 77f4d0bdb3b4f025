use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::Message;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{Result, SubscriberConfig};

/// Error type returned by handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// Processed; do not deliver again.
    Ack,
    /// Not processed; deliver again if attempts remain.
    NAck,
    /// Never deliver again.
    Kill,
}

const UNDECIDED: u8 = 0;

impl AckDecision {
    fn to_u8(self) -> u8 {
        match self {
            AckDecision::Ack => 1,
            AckDecision::NAck => 2,
            AckDecision::Kill => 3,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(AckDecision::Ack),
            2 => Some(AckDecision::NAck),
            3 => Some(AckDecision::Kill),
            _ => None,
        }
    }
}

/// One delivery of a message to a subscriber.
///
/// The first call to [`ack`](Delivery::ack), [`nack`](Delivery::nack) or
/// [`kill`](Delivery::kill) settles the delivery; later calls are ignored.
/// Clones share the decision.
#[derive(Debug, Clone)]
pub struct Delivery {
    message: Message,
    received_at: DateTime<Utc>,
    attempt: u32,
    decision: Arc<AtomicU8>,
}

impl Delivery {
    pub fn new(message: Message, attempt: u32) -> Self {
        Self {
            message,
            received_at: Utc::now(),
            attempt,
            decision: Arc::new(AtomicU8::new(UNDECIDED)),
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// 1 for the first delivery, incremented on every redelivery.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn ack(&self) -> bool {
        self.settle(AckDecision::Ack)
    }

    pub fn nack(&self) -> bool {
        self.settle(AckDecision::NAck)
    }

    pub fn kill(&self) -> bool {
        self.settle(AckDecision::Kill)
    }

    pub fn decision(&self) -> Option<AckDecision> {
        AckDecision::from_u8(self.decision.load(Ordering::Acquire))
    }

    /// Returns true if this call settled the delivery.
    fn settle(&self, decision: AckDecision) -> bool {
        self.decision
            .compare_exchange(
                UNDECIDED,
                decision.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// The next attempt of the same message, undecided.
    pub(crate) fn redelivery(&self) -> Self {
        Self::new(self.message.clone(), self.attempt + 1)
    }
}

/// Handles deliveries from a subscription.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> std::result::Result<(), BoxError>;
}

/// Publishes messages to the broker.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, subject: &str, message: Message) -> Result<()>;
}

/// Subscribes handlers to subjects.
#[async_trait]
pub trait MessageSubscriber: Send + Sync {
    async fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn MessageHandler>,
        config: SubscriberConfig,
    ) -> Result<Subscription>;
}

/// A running subscription. Dropping it leaves the consumer running; call
/// [`unsubscribe`](Subscription::unsubscribe) to stop it.
#[derive(Debug)]
pub struct Subscription {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(token: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { token, task }
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the consumer and waits for an in-progress delivery to settle.
    pub async fn unsubscribe(self) {
        self.token.cancel();
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "subscription task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{MessageId, Metadata};

    fn delivery() -> Delivery {
        Delivery::new(
            Message::new(MessageId::new(), "x", "s", Vec::new(), Metadata::new()),
            1,
        )
    }

    #[test]
    fn first_settlement_wins() {
        let delivery = delivery();
        assert_eq!(delivery.decision(), None);

        assert!(delivery.nack());
        assert!(!delivery.ack());
        assert!(!delivery.clone().kill());
        assert_eq!(delivery.decision(), Some(AckDecision::NAck));
    }

    #[test]
    fn redelivery_is_undecided_and_counts_attempts() {
        let first = delivery();
        first.nack();

        let second = first.redelivery();
        assert_eq!(second.attempt(), 2);
        assert_eq!(second.decision(), None);
        assert_eq!(second.message().id, first.message().id);
    }
}
