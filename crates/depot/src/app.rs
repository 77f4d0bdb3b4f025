//! Composition root.

use std::sync::Arc;

use domain::{
    AggregateRepository, AggregateStore, EventPublishingStore, EventSourcedStore,
    SnapshottingStore,
};
use event_store::{Database, EventStore, InboxStore, OutboxStore, SnapshotStore};
use messaging::{
    CommandDispatcher, EventDispatcher, EventHandler, MessagePublisher, MessageSubscriber, OutboxProcessor,
    OutboxPublisher, SubscriberConfig, Subscription, TransactionalHandler, TxMessagePublisher,
    inbox_middleware,
};
use tokio_util::sync::CancellationToken;

use crate::commands::{CANCEL_SHOPPING_LIST, COMPLETE_SHOPPING_LIST, CREATE_SHOPPING_LIST};
use crate::handlers::{
    CancelShoppingListHandler, CompleteShoppingListHandler, CreateShoppingListHandler,
};
use crate::shopping_list::{
    SHOPPING_LIST_CANCELED, SHOPPING_LIST_COMPLETED, SHOPPING_LIST_CREATED,
};
use crate::{Config, Result, ShoppingList, ShoppingListCache, ShoppingListProjector, ShoppingListService};

/// The wired depot service.
///
/// Construction is explicit and ordered leaves first: database, outbox
/// publisher, aggregate repository, application service, handlers and the
/// outbox processor.
pub struct Depot<D: Database> {
    config: Config,
    db: Arc<D>,
    service: ShoppingListService<D::Tx>,
    commands: Arc<CommandDispatcher<D::Tx>>,
    events: Arc<EventDispatcher<D::Tx>>,
    processor: OutboxProcessor<D>,
}

impl<D> Depot<D>
where
    D: Database
        + EventStore<D::Tx>
        + SnapshotStore<D::Tx>
        + OutboxStore<D::Tx>
        + InboxStore<D::Tx>,
{
    /// `publisher` is the broker the outbox processor forwards to; `cache`
    /// is the read model the projector maintains.
    pub fn build(
        config: Config,
        db: Arc<D>,
        publisher: Arc<dyn MessagePublisher>,
        cache: Arc<dyn ShoppingListCache<D::Tx>>,
    ) -> Self {
        let outbox: Arc<dyn TxMessagePublisher<D::Tx>> =
            Arc::new(OutboxPublisher::<D::Tx>::new(db.clone()));

        let store: Arc<dyn AggregateStore<ShoppingList, D::Tx>> =
            Arc::new(EventSourcedStore::<ShoppingList, D::Tx>::new(db.clone()));
        let repository = AggregateRepository::new(
            store,
            [
                EventPublishingStore::<ShoppingList, D::Tx>::middleware(
                    outbox.clone(),
                    config.events_subject(),
                ),
                SnapshottingStore::<ShoppingList, D::Tx>::middleware(
                    db.clone(),
                    config.snapshot_policy(),
                ),
            ],
        );
        let service = ShoppingListService::new(repository);

        let commands = CommandDispatcher::new(outbox)
            .register(
                CREATE_SHOPPING_LIST,
                Arc::new(CreateShoppingListHandler::new(service.clone())),
            )
            .register(
                CANCEL_SHOPPING_LIST,
                Arc::new(CancelShoppingListHandler::new(service.clone())),
            )
            .register(
                COMPLETE_SHOPPING_LIST,
                Arc::new(CompleteShoppingListHandler::new(service.clone())),
            );

        let projector: Arc<dyn EventHandler<D::Tx>> = Arc::new(ShoppingListProjector::new(cache));
        let events = EventDispatcher::new()
            .register(SHOPPING_LIST_CREATED, projector.clone())
            .register(SHOPPING_LIST_CANCELED, projector.clone())
            .register(SHOPPING_LIST_COMPLETED, projector);

        let processor = OutboxProcessor::new(db.clone(), publisher, config.outbox());

        Self {
            config,
            db,
            service,
            commands: Arc::new(commands),
            events: Arc::new(events),
            processor,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &Arc<D> {
        &self.db
    }

    pub fn service(&self) -> &ShoppingListService<D::Tx> {
        &self.service
    }

    pub fn processor(&self) -> &OutboxProcessor<D> {
        &self.processor
    }

    /// Subscribes the command handlers and the cache projector. Both run
    /// inside a transaction behind the inbox.
    pub async fn subscribe(&self, subscriber: &dyn MessageSubscriber) -> Result<Vec<Subscription>> {
        let service_name = &self.config.service_name;

        let commands = subscriber
            .subscribe(
                &self.config.commands_subject(),
                Arc::new(TransactionalHandler::new(
                    self.db.clone(),
                    self.commands.clone(),
                    [inbox_middleware(self.db.clone())],
                )),
                SubscriberConfig::new()
                    .message_filter(self.commands.names())
                    .group(format!("{service_name}-commands")),
            )
            .await?;

        let events = subscriber
            .subscribe(
                &self.config.events_subject(),
                Arc::new(TransactionalHandler::new(
                    self.db.clone(),
                    self.events.clone(),
                    [inbox_middleware(self.db.clone())],
                )),
                SubscriberConfig::new()
                    .message_filter(self.events.names())
                    .group(format!("{service_name}-shopping-lists-cache")),
            )
            .await?;

        tracing::info!(
            commands_subject = %self.config.commands_subject(),
            events_subject = %self.config.events_subject(),
            "depot subscribed"
        );
        Ok(vec![commands, events])
    }

    /// Subscribes and runs the outbox processor until `shutdown` fires, then
    /// stops the subscriptions.
    pub async fn run(&self, subscriber: &dyn MessageSubscriber, shutdown: CancellationToken) -> Result<()> {
        let subscriptions = self.subscribe(subscriber).await?;

        self.processor.run(shutdown).await;

        for subscription in subscriptions {
            subscription.unsubscribe().await;
        }
        tracing::info!("depot stopped");
        Ok(())
    }
}
