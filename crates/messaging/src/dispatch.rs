//! Name-keyed routing of event and command envelopes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    BoxError, Delivery, Envelope, MessageKind, ReplyOutcome, TxMessageHandler, TxMessagePublisher,
    headers::{COMMAND_NAME, COMMAND_REPLY_CHANNEL, FAILURE_REPLY, REPLY_COMMAND_ID, REPLY_OUTCOME, SUCCESS_REPLY},
};

/// Handles one kind of event.
#[async_trait]
pub trait EventHandler<Tx: Send>: Send + Sync {
    async fn handle_event(&self, tx: &mut Tx, event: &Envelope) -> Result<(), BoxError>;
}

/// Routes event envelopes to every handler registered for their name.
///
/// Events without a registered handler are acknowledged and ignored.
pub struct EventDispatcher<Tx: Send> {
    handlers: HashMap<String, Vec<Arc<dyn EventHandler<Tx>>>>,
}

impl<Tx: Send + 'static> EventDispatcher<Tx> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(mut self, name: impl Into<String>, handler: Arc<dyn EventHandler<Tx>>) -> Self {
        self.handlers.entry(name.into()).or_default().push(handler);
        self
    }

    /// Registered event names, usable as a subscriber filter.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn dispatch(&self, tx: &mut Tx, event: &Envelope) -> Result<(), BoxError> {
        let Some(handlers) = self.handlers.get(&event.name) else {
            tracing::trace!(event_name = %event.name, "no handler registered");
            return Ok(());
        };

        for handler in handlers {
            handler.handle_event(tx, event).await?;
        }
        Ok(())
    }
}

impl<Tx: Send + 'static> Default for EventDispatcher<Tx> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<Tx: Send + 'static> TxMessageHandler<Tx> for EventDispatcher<Tx> {
    async fn handle(&self, tx: &mut Tx, delivery: &Delivery) -> Result<(), BoxError> {
        let event = Envelope::from_message(delivery.message())?;
        event.expect_kind(MessageKind::Event)?;
        self.dispatch(tx, &event).await
    }
}

/// Result of handling a command.
///
/// Both variants produce a reply when the command names a reply channel.
/// A business rejection is a `Failure`, not an error: returning `Err` from a
/// [`CommandHandler`] means the command could not be processed at all, so
/// the transaction rolls back and the delivery is retried.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Handled; optionally with a custom reply (default `am.Success`).
    Success(Option<Envelope>),
    /// Rejected; optionally with a custom reply (default `am.Failure`).
    Failure(Option<Envelope>),
}

impl CommandOutcome {
    pub fn success() -> Self {
        CommandOutcome::Success(None)
    }

    pub fn failure() -> Self {
        CommandOutcome::Failure(None)
    }
}

/// Handles one kind of command.
#[async_trait]
pub trait CommandHandler<Tx: Send>: Send + Sync {
    async fn handle_command(&self, tx: &mut Tx, command: &Envelope) -> Result<CommandOutcome, BoxError>;
}

/// Routes command envelopes to their handler and publishes the reply.
pub struct CommandDispatcher<Tx: Send> {
    handlers: HashMap<String, Arc<dyn CommandHandler<Tx>>>,
    publisher: Arc<dyn TxMessagePublisher<Tx>>,
}

impl<Tx: Send + 'static> CommandDispatcher<Tx> {
    /// Replies are published through `publisher`, inside the handler's
    /// transaction.
    pub fn new(publisher: Arc<dyn TxMessagePublisher<Tx>>) -> Self {
        Self {
            handlers: HashMap::new(),
            publisher,
        }
    }

    pub fn register(mut self, name: impl Into<String>, handler: Arc<dyn CommandHandler<Tx>>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn dispatch(&self, tx: &mut Tx, command: &Envelope) -> Result<(), BoxError> {
        let Some(handler) = self.handlers.get(&command.name) else {
            tracing::trace!(command_name = %command.name, "no handler registered");
            return Ok(());
        };

        let outcome = handler.handle_command(tx, command).await?;

        let Some(channel) = command.reply_channel() else {
            return Ok(());
        };

        let reply = reply_for(command, outcome);
        tracing::debug!(
            command_id = %command.id,
            reply_name = %reply.name,
            channel,
            "publishing reply"
        );
        self.publisher
            .publish(tx, channel, reply.to_message(channel)?)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl<Tx: Send + 'static> TxMessageHandler<Tx> for CommandDispatcher<Tx> {
    async fn handle(&self, tx: &mut Tx, delivery: &Delivery) -> Result<(), BoxError> {
        let command = Envelope::from_message(delivery.message())?;
        command.expect_kind(MessageKind::Command)?;
        self.dispatch(tx, &command).await
    }
}

/// Builds the reply to `command` for `outcome`.
///
/// The reply carries every header of the command except the command name
/// and reply channel (so saga correlation flows back), plus the outcome and
/// the id of the command it answers.
pub fn reply_for(command: &Envelope, outcome: CommandOutcome) -> Envelope {
    let (reply, outcome) = match outcome {
        CommandOutcome::Success(reply) => (
            reply.unwrap_or_else(|| Envelope::reply(SUCCESS_REPLY, Value::Null)),
            ReplyOutcome::Success,
        ),
        CommandOutcome::Failure(reply) => (
            reply.unwrap_or_else(|| Envelope::reply(FAILURE_REPLY, Value::Null)),
            ReplyOutcome::Failure,
        ),
    };

    let mut reply = Envelope {
        kind: MessageKind::Reply,
        ..reply
    };
    for (key, value) in command.metadata.iter() {
        if key != COMMAND_NAME && key != COMMAND_REPLY_CHANNEL {
            reply.metadata.set(key.clone(), value.clone());
        }
    }
    reply.metadata.set(REPLY_OUTCOME, outcome.as_str());
    reply.metadata.set(REPLY_COMMAND_ID, command.id.as_str());
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DirectPublisher, InMemoryBroker, headers::SAGA_ID};
    use event_store::{Database, MemoryDatabase, MemoryTx};
    use serde_json::json;

    struct Approve;

    #[async_trait]
    impl CommandHandler<MemoryTx> for Approve {
        async fn handle_command(
            &self,
            _tx: &mut MemoryTx,
            command: &Envelope,
        ) -> Result<CommandOutcome, BoxError> {
            if command.payload["amount"].as_i64().unwrap_or(0) > 100 {
                return Ok(CommandOutcome::failure());
            }
            Ok(CommandOutcome::Success(Some(Envelope::reply(
                "payments.Approved",
                json!({ "approved": true }),
            ))))
        }
    }

    struct Broken;

    #[async_trait]
    impl CommandHandler<MemoryTx> for Broken {
        async fn handle_command(
            &self,
            _tx: &mut MemoryTx,
            _command: &Envelope,
        ) -> Result<CommandOutcome, BoxError> {
            Err("database unavailable".into())
        }
    }

    fn command(amount: i64) -> Envelope {
        Envelope::command("payments.Approve", json!({ "amount": amount }))
            .with_metadata(COMMAND_REPLY_CHANNEL, "cosec.replies")
            .with_metadata(SAGA_ID, "order-1")
    }

    fn dispatcher(broker: &InMemoryBroker) -> CommandDispatcher<MemoryTx> {
        CommandDispatcher::new(Arc::new(DirectPublisher::new(Arc::new(broker.clone()))))
            .register("payments.Approve", Arc::new(Approve))
            .register("payments.Broken", Arc::new(Broken))
    }

    #[test]
    fn reply_copies_correlation_headers() {
        let command = command(10);
        let reply = reply_for(&command, CommandOutcome::success());

        assert_eq!(reply.kind, MessageKind::Reply);
        assert_eq!(reply.name, SUCCESS_REPLY);
        assert_eq!(reply.metadata.get_str(SAGA_ID), Some("order-1"));
        assert_eq!(reply.metadata.get_str(REPLY_OUTCOME), Some("SUCCESS"));
        assert_eq!(reply.metadata.get_str(REPLY_COMMAND_ID), Some(command.id.as_str()));
        assert!(!reply.metadata.contains_key(COMMAND_NAME));
        assert!(!reply.metadata.contains_key(COMMAND_REPLY_CHANNEL));
    }

    #[tokio::test]
    async fn outcomes_are_published_as_replies() {
        let db = MemoryDatabase::new();
        let broker = InMemoryBroker::new();
        let dispatcher = dispatcher(&broker);

        let mut tx = db.begin().await.unwrap();
        dispatcher.dispatch(&mut tx, &command(10)).await.unwrap();
        dispatcher.dispatch(&mut tx, &command(500)).await.unwrap();
        db.commit(tx).await.unwrap();

        let replies: Vec<Envelope> = broker
            .published()
            .await
            .iter()
            .map(|m| Envelope::from_message(m).unwrap())
            .collect();

        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].name, "payments.Approved");
        assert_eq!(replies[0].outcome(), Some(ReplyOutcome::Success));
        assert_eq!(replies[1].name, FAILURE_REPLY);
        assert_eq!(replies[1].outcome(), Some(ReplyOutcome::Failure));
    }

    #[tokio::test]
    async fn handler_errors_propagate_without_reply() {
        let db = MemoryDatabase::new();
        let broker = InMemoryBroker::new();
        let dispatcher = dispatcher(&broker);

        let broken = Envelope::command("payments.Broken", Value::Null)
            .with_metadata(COMMAND_REPLY_CHANNEL, "cosec.replies");

        let mut tx = db.begin().await.unwrap();
        assert!(dispatcher.dispatch(&mut tx, &broken).await.is_err());
        assert!(broker.published().await.is_empty());
    }

    #[tokio::test]
    async fn commands_without_reply_channel_get_no_reply() {
        let db = MemoryDatabase::new();
        let broker = InMemoryBroker::new();
        let dispatcher = dispatcher(&broker);

        let mut tx = db.begin().await.unwrap();
        dispatcher
            .dispatch(&mut tx, &Envelope::command("payments.Approve", json!({ "amount": 1 })))
            .await
            .unwrap();
        dispatcher
            .dispatch(&mut tx, &Envelope::command("payments.Unknown", Value::Null))
            .await
            .unwrap();

        assert!(broker.published().await.is_empty());
    }

    struct CountEvents(std::sync::atomic::AtomicUsize);

    #[async_trait]
    impl EventHandler<MemoryTx> for CountEvents {
        async fn handle_event(&self, _tx: &mut MemoryTx, _event: &Envelope) -> Result<(), BoxError> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn events_reach_every_registered_handler() {
        let db = MemoryDatabase::new();
        let first = Arc::new(CountEvents(Default::default()));
        let second = Arc::new(CountEvents(Default::default()));
        let dispatcher = EventDispatcher::<MemoryTx>::new()
            .register("depot.ShoppingListCreated", first.clone())
            .register("depot.ShoppingListCreated", second.clone());

        let mut tx = db.begin().await.unwrap();
        let created = Envelope::event("depot.ShoppingListCreated", Value::Null);
        let delivery = Delivery::new(created.to_message("depot.events").unwrap(), 1);
        dispatcher.handle(&mut tx, &delivery).await.unwrap();

        let command = Envelope::command("depot.ShoppingListCreated", Value::Null);
        let delivery = Delivery::new(command.to_message("depot.events").unwrap(), 1);
        assert!(dispatcher.handle(&mut tx, &delivery).await.is_err());

        assert_eq!(first.0.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(second.0.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(dispatcher.names(), vec!["depot.ShoppingListCreated".to_string()]);
    }
}
