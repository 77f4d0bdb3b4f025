//! In-process broker.
//!
//! Subjects hold consumer groups; each group owns one queue that its members
//! compete for, so a message published to a subject reaches every group once.
//! Manual-ack deliveries that fail, time out, or are nacked are requeued to
//! the same group until the redelivery limit is reached, then dead-lettered.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use common::Message;
use tokio::sync::{Mutex, Notify, RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    AckDecision, AckMode, Delivery, MessageHandler, MessagePublisher, MessageSubscriber,
    MessagingError, Result, SubscriberConfig, Subscription,
};

struct ConsumerGroup {
    name: String,
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: Mutex<mpsc::UnboundedReceiver<Delivery>>,
}

impl ConsumerGroup {
    fn new(name: String) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            name,
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

#[derive(Default)]
struct BrokerState {
    subjects: RwLock<HashMap<String, Vec<Arc<ConsumerGroup>>>>,
    published: RwLock<Vec<Message>>,
    dead_letters: RwLock<Vec<Message>>,
    in_flight: AtomicUsize,
    idle: Notify,
    next_consumer: AtomicU64,
    fail_on_publish: AtomicBool,
}

/// A broker living in the current process.
///
/// Cloning is cheap; clones share state.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message accepted by `publish`, in order.
    pub async fn published(&self) -> Vec<Message> {
        self.state.published.read().await.clone()
    }

    /// Messages that were killed or ran out of redeliveries.
    pub async fn dead_letters(&self) -> Vec<Message> {
        self.state.dead_letters.read().await.clone()
    }

    /// Makes `publish` fail (for testing retry paths).
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.state.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    /// Waits until every queued delivery has been settled.
    ///
    /// Deliveries queued for a group with no running consumers never
    /// settle, so callers should bound this with a timeout.
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.state.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn enqueue(&self, group: &ConsumerGroup, delivery: Delivery) {
        self.state.in_flight.fetch_add(1, Ordering::SeqCst);
        if group.sender.send(delivery).is_err() {
            self.settled();
        }
    }

    fn settled(&self) {
        if self.state.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.state.idle.notify_waiters();
        }
    }

    async fn dead_letter(&self, message: Message) {
        metrics::counter!("broker_dead_letters_total").increment(1);
        self.state.dead_letters.write().await.push(message);
    }

    async fn group_for(&self, subject: &str, name: String) -> Arc<ConsumerGroup> {
        let mut subjects = self.state.subjects.write().await;
        let groups = subjects.entry(subject.to_string()).or_default();

        if let Some(group) = groups.iter().find(|g| g.name == name) {
            return Arc::clone(group);
        }

        let group = Arc::new(ConsumerGroup::new(name));
        groups.push(Arc::clone(&group));
        group
    }
}

#[async_trait]
impl MessagePublisher for InMemoryBroker {
    async fn publish(&self, subject: &str, message: Message) -> Result<()> {
        if self.state.fail_on_publish.load(Ordering::SeqCst) {
            return Err(MessagingError::Publish {
                subject: subject.to_string(),
                reason: "broker unavailable".to_string(),
            });
        }

        let message = message.with_subject(subject);
        self.state.published.write().await.push(message.clone());

        let groups = self
            .state
            .subjects
            .read()
            .await
            .get(subject)
            .cloned()
            .unwrap_or_default();

        tracing::trace!(
            subject,
            message_id = %message.id,
            groups = groups.len(),
            "published message"
        );

        for group in groups {
            self.enqueue(&group, Delivery::new(message.clone(), 1));
        }

        Ok(())
    }
}

#[async_trait]
impl MessageSubscriber for InMemoryBroker {
    async fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn MessageHandler>,
        config: SubscriberConfig,
    ) -> Result<Subscription> {
        let group_name = match &config.group {
            Some(group) => group.clone(),
            None => format!(
                "_consumer.{}",
                self.state.next_consumer.fetch_add(1, Ordering::SeqCst)
            ),
        };
        let group = self.group_for(subject, group_name).await;

        tracing::debug!(subject, group = %group.name, "subscribed");

        let consumer = Consumer {
            broker: self.clone(),
            subject: subject.to_string(),
            group,
            handler,
            config,
        };
        let token = CancellationToken::new();
        let task = tokio::spawn(consumer.run(token.clone()));

        Ok(Subscription::new(token, task))
    }
}

struct Consumer {
    broker: InMemoryBroker,
    subject: String,
    group: Arc<ConsumerGroup>,
    handler: Arc<dyn MessageHandler>,
    config: SubscriberConfig,
}

impl Consumer {
    async fn run(self, token: CancellationToken) {
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => break,
                delivery = self.next_delivery() => delivery,
            };

            match next {
                Some(delivery) => self.process(delivery).await,
                None => break,
            }
        }
        tracing::debug!(subject = %self.subject, group = %self.group.name, "consumer stopped");
    }

    async fn next_delivery(&self) -> Option<Delivery> {
        self.group.receiver.lock().await.recv().await
    }

    async fn process(&self, delivery: Delivery) {
        let message = delivery.message();

        if !self.config.accepts(&message.name) {
            delivery.ack();
            self.broker.settled();
            return;
        }

        match self.config.ack_mode {
            AckMode::Auto => {
                delivery.ack();
                if let Err(err) = self.handler.handle(&delivery).await {
                    tracing::warn!(
                        subject = %self.subject,
                        message_id = %message.id,
                        error = %err,
                        "handler failed on auto-ack delivery"
                    );
                }
            }
            AckMode::Manual => {
                let decision = self.handle_manual(&delivery).await;
                self.settle_manual(&delivery, decision).await;
            }
        }

        self.broker.settled();
    }

    async fn handle_manual(&self, delivery: &Delivery) -> AckDecision {
        let handler = Arc::clone(&self.handler);
        let task_delivery = delivery.clone();
        let mut task = tokio::spawn(async move { handler.handle(&task_delivery).await });

        match tokio::time::timeout(self.config.ack_wait, &mut task).await {
            Ok(Ok(Ok(()))) => {
                delivery.ack();
            }
            Ok(Ok(Err(err))) => {
                tracing::warn!(
                    subject = %self.subject,
                    message_id = %delivery.message().id,
                    attempt = delivery.attempt(),
                    error = %err,
                    "handler failed"
                );
                delivery.nack();
            }
            Ok(Err(join_err)) => {
                tracing::error!(
                    subject = %self.subject,
                    message_id = %delivery.message().id,
                    error = %join_err,
                    "handler panicked"
                );
                delivery.nack();
            }
            Err(_) => {
                tracing::warn!(
                    subject = %self.subject,
                    message_id = %delivery.message().id,
                    ack_wait_ms = self.config.ack_wait.as_millis() as u64,
                    "ack wait elapsed"
                );
                delivery.nack();
            }
        }

        delivery.decision().unwrap_or(AckDecision::NAck)
    }

    async fn settle_manual(&self, delivery: &Delivery, decision: AckDecision) {
        match decision {
            AckDecision::Ack => {}
            AckDecision::NAck if delivery.attempt() <= self.config.max_redeliver => {
                metrics::counter!("broker_redeliveries_total").increment(1);
                self.broker.enqueue(&self.group, delivery.redelivery());
            }
            AckDecision::NAck | AckDecision::Kill => {
                tracing::warn!(
                    subject = %self.subject,
                    message_id = %delivery.message().id,
                    attempts = delivery.attempt(),
                    ?decision,
                    "message dead-lettered"
                );
                self.broker.dead_letter(delivery.message().clone()).await;
            }
        }
    }
}
