use std::sync::Arc;

use async_trait::async_trait;
use event_store::SagaStore;
use messaging::{
    BoxError, Delivery, Envelope, MessageKind, TxMessageHandler, TxMessagePublisher,
    headers::{COMMAND_NAME, COMMAND_REPLY_CHANNEL, SAGA_ID, SAGA_NAME},
};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    Result, SagaContext, SagaDefinition, SagaError, SagaRepository, StepCommand, StepDecision,
};

/// Drives the instances of one saga definition.
///
/// Every operation runs inside the caller's transaction: the saga row and
/// the commands it sends are written together, so publishing through an
/// outbox makes each transition atomic.
pub struct Orchestrator<T, Tx: Send> {
    definition: SagaDefinition<T>,
    repository: SagaRepository<T, Tx>,
    publisher: Arc<dyn TxMessagePublisher<Tx>>,
}

impl<T, Tx> Orchestrator<T, Tx>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    Tx: Send + 'static,
{
    pub fn new(
        definition: SagaDefinition<T>,
        store: Arc<dyn SagaStore<Tx>>,
        publisher: Arc<dyn TxMessagePublisher<Tx>>,
    ) -> Self {
        let repository = SagaRepository::new(definition.name(), store);
        Self {
            definition,
            repository,
            publisher,
        }
    }

    pub fn definition(&self) -> &SagaDefinition<T> {
        &self.definition
    }

    /// Creates instance `id` and sends the command of its first step.
    #[tracing::instrument(skip(self, tx, id, data), fields(saga_name = %self.definition.name()))]
    pub async fn start(&self, tx: &mut Tx, id: impl Into<String>, data: T) -> Result<SagaContext<T>> {
        let mut context = SagaContext::new(id, data);
        tracing::info!(saga_id = %context.id, "saga started");
        self.execute(tx, &mut context).await?;
        Ok(context)
    }

    /// Applies a reply to the instance it correlates to.
    ///
    /// Replies without saga headers, for another saga, or for an instance
    /// that is already done are dropped and `None` is returned.
    #[tracing::instrument(
        skip(self, tx, reply),
        fields(saga_name = %self.definition.name(), reply_name = %reply.name)
    )]
    pub async fn handle_reply(&self, tx: &mut Tx, reply: &Envelope) -> Result<Option<SagaContext<T>>> {
        let (Some(saga_id), Some(saga_name)) = (
            reply.metadata.get_str(SAGA_ID),
            reply.metadata.get_str(SAGA_NAME),
        ) else {
            tracing::debug!("dropping reply without saga headers");
            return Ok(None);
        };

        if saga_name != self.definition.name() {
            tracing::debug!(%saga_name, "dropping reply for another saga");
            return Ok(None);
        }

        let Some(mut context) = self.repository.load(tx, saga_id).await? else {
            return Err(SagaError::NotFound {
                saga_name: saga_name.to_string(),
                id: saga_id.to_string(),
            });
        };

        if context.done {
            tracing::debug!(%saga_id, "dropping reply for finished saga");
            return Ok(None);
        }

        metrics::counter!("saga_replies_total").increment(1);

        match self.decide(&mut context, reply)? {
            StepDecision::Advance => {}
            StepDecision::Compensate if context.compensating => {
                tracing::warn!(
                    %saga_id,
                    step = context.step,
                    "compensating step reported failure, continuing compensation"
                );
            }
            StepDecision::Compensate => {
                context.compensating = true;
                metrics::counter!("saga_compensations_total").increment(1);
                tracing::info!(%saga_id, step = context.step, "saga compensating");
            }
            StepDecision::Complete => {
                self.finish(tx, &mut context).await?;
                return Ok(Some(context));
            }
        }

        self.execute(tx, &mut context).await?;
        Ok(Some(context))
    }

    fn decide(&self, context: &mut SagaContext<T>, reply: &Envelope) -> Result<StepDecision> {
        let Some(step) = self.definition.step(context.step) else {
            return Ok(StepDecision::from_reply(reply));
        };

        match step.reply_handler(context.compensating, &reply.name) {
            Some(handler) => {
                handler(&mut context.data, reply).map_err(|source| SagaError::ReplyHandler {
                    step: step.name().to_string(),
                    reply: reply.name.clone(),
                    source,
                })
            }
            None => Ok(StepDecision::from_reply(reply)),
        }
    }

    /// Moves to the next step in the current direction that has an action
    /// and sends its command, or finishes the saga when none is left.
    async fn execute(&self, tx: &mut Tx, context: &mut SagaContext<T>) -> Result<()> {
        let direction = context.direction();
        let mut index = context.step + direction;

        while let Some(step) = self.definition.step(index) {
            if let Some(action) = step.action_for(context.compensating) {
                let command = action(&context.data).map_err(|source| SagaError::Action {
                    step: step.name().to_string(),
                    source,
                })?;
                context.step = index;
                self.send(tx, context, command).await?;
                self.repository.save(tx, context).await?;

                tracing::debug!(
                    saga_id = %context.id,
                    step = %step.name(),
                    compensating = context.compensating,
                    "saga step invoked"
                );
                return Ok(());
            }
            index += direction;
        }

        self.finish(tx, context).await
    }

    async fn finish(&self, tx: &mut Tx, context: &mut SagaContext<T>) -> Result<()> {
        context.done = true;
        self.repository.save(tx, context).await?;

        metrics::counter!("saga_completed_total", "state" => context.state().as_str()).increment(1);
        tracing::info!(saga_id = %context.id, state = %context.state(), "saga finished");
        Ok(())
    }

    async fn send(&self, tx: &mut Tx, context: &SagaContext<T>, step_command: StepCommand) -> Result<()> {
        let StepCommand {
            destination,
            mut command,
        } = step_command;

        command.kind = MessageKind::Command;
        command.metadata.set(COMMAND_NAME, command.name.clone());
        command
            .metadata
            .set(COMMAND_REPLY_CHANNEL, self.definition.reply_topic());
        command.metadata.set(SAGA_ID, context.id.clone());
        command.metadata.set(SAGA_NAME, self.definition.name());

        let message = command.to_message(destination.as_str())?;
        self.publisher.publish(tx, &destination, message).await?;
        Ok(())
    }
}

#[async_trait]
impl<T, Tx> TxMessageHandler<Tx> for Orchestrator<T, Tx>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    Tx: Send + 'static,
{
    async fn handle(&self, tx: &mut Tx, delivery: &Delivery) -> std::result::Result<(), BoxError> {
        let reply = Envelope::from_message(delivery.message())?;
        reply.expect_kind(MessageKind::Reply)?;
        self.handle_reply(tx, &reply).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SagaState, SagaStep};
    use common::Message;
    use event_store::{Database, MemoryDatabase, MemoryTx};
    use messaging::{CommandOutcome, DirectPublisher, InMemoryBroker, reply_for};
    use serde::Deserialize;
    use serde_json::{Value, json};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct OrderData {
        order_id: String,
        payment_id: Option<String>,
    }

    fn command(destination: &str, name: &str) -> StepCommand {
        StepCommand::new(destination, Envelope::command(name, Value::Null))
    }

    fn definition() -> SagaDefinition<OrderData> {
        SagaDefinition::new("ordering.CreateOrder", "ordering.replies")
            .add_step(
                SagaStep::new("reject_order")
                    .compensation(|_: &OrderData| Ok(command("ordering", "ordering.RejectOrder"))),
            )
            .add_step(
                SagaStep::new("reserve_stock")
                    .action(|_: &OrderData| Ok(command("stores", "stores.ReserveStock")))
                    .compensation(|_: &OrderData| Ok(command("stores", "stores.ReleaseStock"))),
            )
            .add_step(
                SagaStep::new("authorize_payment")
                    .action(|_: &OrderData| Ok(command("payments", "payments.Authorize")))
                    .compensation(|data: &OrderData| {
                        let payment_id = data.payment_id.clone().ok_or("no payment to refund")?;
                        Ok(StepCommand::new(
                            "payments",
                            Envelope::command("payments.Refund", json!({ "payment_id": payment_id })),
                        ))
                    })
                    .on_action_reply("payments.Authorized", |data: &mut OrderData, reply| {
                        data.payment_id = reply.payload["payment_id"].as_str().map(String::from);
                        Ok(StepDecision::Advance)
                    }),
            )
            .add_step(
                SagaStep::new("create_shipment")
                    .action(|_: &OrderData| Ok(command("shipping", "shipping.CreateShipment"))),
            )
            .add_step(
                SagaStep::new("approve_order")
                    .action(|_: &OrderData| Ok(command("ordering", "ordering.ApproveOrder"))),
            )
    }

    struct Harness {
        db: Arc<MemoryDatabase>,
        broker: InMemoryBroker,
        orchestrator: Orchestrator<OrderData, MemoryTx>,
    }

    impl Harness {
        fn new() -> Self {
            let db = Arc::new(MemoryDatabase::new());
            let broker = InMemoryBroker::new();
            let publisher = Arc::new(DirectPublisher::new(Arc::new(broker.clone())));
            let orchestrator =
                Orchestrator::<OrderData, MemoryTx>::new(definition(), db.clone(), publisher);
            Self {
                db,
                broker,
                orchestrator,
            }
        }

        async fn start(&self, id: &str) -> SagaContext<OrderData> {
            let mut tx = self.db.begin().await.unwrap();
            let context = self
                .orchestrator
                .start(
                    &mut tx,
                    id,
                    OrderData {
                        order_id: id.to_string(),
                        payment_id: None,
                    },
                )
                .await
                .unwrap();
            self.db.commit(tx).await.unwrap();
            context
        }

        async fn reply(&self, reply: &Envelope) -> Option<SagaContext<OrderData>> {
            let mut tx = self.db.begin().await.unwrap();
            let context = self.orchestrator.handle_reply(&mut tx, reply).await.unwrap();
            self.db.commit(tx).await.unwrap();
            context
        }

        async fn last_command(&self) -> Envelope {
            let published = self.broker.published().await;
            Envelope::from_message(published.last().unwrap()).unwrap()
        }

        async fn answer_last(&self, outcome: CommandOutcome) -> Option<SagaContext<OrderData>> {
            let command = self.last_command().await;
            self.reply(&reply_for(&command, outcome)).await
        }

        async fn command_names(&self) -> Vec<String> {
            self.broker
                .published()
                .await
                .into_iter()
                .map(|m: Message| m.name)
                .collect()
        }
    }

    #[tokio::test]
    async fn start_skips_compensation_only_steps_and_sends_correlated_command() {
        let harness = Harness::new();

        let context = harness.start("o-1").await;
        assert_eq!(context.step, 1);
        assert_eq!(context.state(), SagaState::Running);

        let command = harness.last_command().await;
        assert_eq!(command.name, "stores.ReserveStock");
        assert_eq!(command.kind, MessageKind::Command);
        assert_eq!(command.reply_channel(), Some("ordering.replies"));
        assert_eq!(command.metadata.get_str(SAGA_ID), Some("o-1"));
        assert_eq!(command.metadata.get_str(SAGA_NAME), Some("ordering.CreateOrder"));
        assert_eq!(command.metadata.get_str(COMMAND_NAME), Some("stores.ReserveStock"));

        let published = harness.broker.published().await;
        assert_eq!(published[0].subject, "stores");

        let record = harness.db.saga("ordering.CreateOrder", "o-1").await.unwrap();
        assert_eq!(record.step, 1);
        assert!(!record.done);
    }

    #[tokio::test]
    async fn successful_replies_run_every_forward_step() {
        let harness = Harness::new();
        harness.start("o-1").await;

        harness.answer_last(CommandOutcome::success()).await;
        let authorized = Envelope::reply("payments.Authorized", json!({ "payment_id": "pay-1" }));
        let context = harness
            .answer_last(CommandOutcome::Success(Some(authorized)))
            .await
            .unwrap();
        assert_eq!(context.data.payment_id.as_deref(), Some("pay-1"));

        harness.answer_last(CommandOutcome::success()).await;
        let context = harness.answer_last(CommandOutcome::success()).await.unwrap();

        assert!(context.done);
        assert_eq!(context.state(), SagaState::Completed);
        assert_eq!(
            harness.command_names().await,
            vec![
                "stores.ReserveStock",
                "payments.Authorize",
                "shipping.CreateShipment",
                "ordering.ApproveOrder",
            ]
        );

        let record = harness.db.saga("ordering.CreateOrder", "o-1").await.unwrap();
        assert!(record.done);
        assert!(!record.compensating);
        assert_eq!(record.data["payment_id"], "pay-1");
    }

    #[tokio::test]
    async fn failure_compensates_completed_steps_in_reverse() {
        let harness = Harness::new();
        harness.start("o-1").await;

        harness.answer_last(CommandOutcome::success()).await;
        let authorized = Envelope::reply("payments.Authorized", json!({ "payment_id": "pay-1" }));
        harness
            .answer_last(CommandOutcome::Success(Some(authorized)))
            .await;

        // Shipment fails: payment, stock, then the order are compensated.
        let context = harness.answer_last(CommandOutcome::failure()).await.unwrap();
        assert_eq!(context.state(), SagaState::Compensating);
        assert_eq!(context.step, 2);

        let refund = harness.last_command().await;
        assert_eq!(refund.name, "payments.Refund");
        assert_eq!(refund.payload, json!({ "payment_id": "pay-1" }));

        harness.answer_last(CommandOutcome::success()).await;
        harness.answer_last(CommandOutcome::success()).await;
        let context = harness.answer_last(CommandOutcome::success()).await.unwrap();

        assert!(context.done);
        assert_eq!(context.state(), SagaState::Compensated);
        assert_eq!(
            harness.command_names().await,
            vec![
                "stores.ReserveStock",
                "payments.Authorize",
                "shipping.CreateShipment",
                "payments.Refund",
                "stores.ReleaseStock",
                "ordering.RejectOrder",
            ]
        );

        // Nothing more happens once done.
        assert!(harness.answer_last(CommandOutcome::success()).await.is_none());
        assert_eq!(harness.command_names().await.len(), 6);
    }

    #[tokio::test]
    async fn failing_first_step_only_rejects_the_order() {
        let harness = Harness::new();
        harness.start("o-1").await;

        harness.answer_last(CommandOutcome::failure()).await;
        let context = harness.answer_last(CommandOutcome::success()).await.unwrap();

        assert_eq!(context.state(), SagaState::Compensated);
        assert_eq!(
            harness.command_names().await,
            vec!["stores.ReserveStock", "ordering.RejectOrder"]
        );
    }

    #[tokio::test]
    async fn failed_compensation_moves_on_to_the_previous_step() {
        let harness = Harness::new();
        harness.start("o-1").await;

        harness.answer_last(CommandOutcome::success()).await;
        harness.answer_last(CommandOutcome::failure()).await;
        let context = harness.answer_last(CommandOutcome::failure()).await.unwrap();

        assert_eq!(context.state(), SagaState::Compensating);
        assert_eq!(harness.last_command().await.name, "ordering.RejectOrder");
    }

    #[tokio::test]
    async fn uncorrelated_replies_are_dropped() {
        let harness = Harness::new();
        harness.start("o-1").await;

        let bare = Envelope::reply("am.Success", Value::Null);
        assert!(harness.reply(&bare).await.is_none());

        let foreign = reply_for(&harness.last_command().await, CommandOutcome::success())
            .with_metadata(SAGA_NAME, "baskets.Checkout");
        assert!(harness.reply(&foreign).await.is_none());

        assert_eq!(harness.command_names().await.len(), 1);
    }

    #[tokio::test]
    async fn reply_for_unknown_instance_is_an_error() {
        let harness = Harness::new();
        let reply = Envelope::reply("am.Success", Value::Null)
            .with_metadata(SAGA_ID, "missing")
            .with_metadata(SAGA_NAME, "ordering.CreateOrder");

        let mut tx = harness.db.begin().await.unwrap();
        let err = harness
            .orchestrator
            .handle_reply(&mut tx, &reply)
            .await
            .unwrap_err();
        harness.db.rollback(tx).await.unwrap();

        assert!(matches!(err, SagaError::NotFound { .. }));
    }

    #[tokio::test]
    async fn failing_action_leaves_no_trace() {
        let harness = Harness::new();
        harness.start("o-1").await;
        harness.answer_last(CommandOutcome::success()).await;
        // No payment id recorded, so the refund command cannot be built.
        harness.answer_last(CommandOutcome::success()).await;

        let command = harness.last_command().await;
        let mut tx = harness.db.begin().await.unwrap();
        let err = harness
            .orchestrator
            .handle_reply(&mut tx, &reply_for(&command, CommandOutcome::failure()))
            .await
            .unwrap_err();
        harness.db.rollback(tx).await.unwrap();

        assert!(matches!(err, SagaError::Action { ref step, .. } if step == "authorize_payment"));
        let record = harness.db.saga("ordering.CreateOrder", "o-1").await.unwrap();
        assert_eq!(record.step, 3);
        assert!(!record.compensating);
    }

    #[tokio::test]
    async fn publisher_failure_is_returned() {
        let harness = Harness::new();
        harness.broker.set_fail_on_publish(true);

        let mut tx = harness.db.begin().await.unwrap();
        let result = harness
            .orchestrator
            .start(&mut tx, "o-1", OrderData::default())
            .await;
        harness.db.rollback(tx).await.unwrap();

        assert!(matches!(result, Err(SagaError::Messaging(_))));
        assert!(harness.db.saga("ordering.CreateOrder", "o-1").await.is_none());
    }
}
