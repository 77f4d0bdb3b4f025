use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use domain::{AGGREGATE_ID, AGGREGATE_VERSION, DomainEvent};
use messaging::{BoxError, Envelope, EventHandler, MessagingError};

use crate::{ShoppingListCache, ShoppingListEvent, ShoppingListStatus, ShoppingListView};

/// Keeps the shopping list cache in step with the list's events.
///
/// Runs behind the inbox, so each event is applied at most once per
/// consumer. The cache merges by version, so a status change that
/// overtakes the creation is kept.
pub struct ShoppingListProjector<Tx: Send> {
    cache: Arc<dyn ShoppingListCache<Tx>>,
}

impl<Tx: Send + 'static> ShoppingListProjector<Tx> {
    pub fn new(cache: Arc<dyn ShoppingListCache<Tx>>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl<Tx: Send + 'static> EventHandler<Tx> for ShoppingListProjector<Tx> {
    async fn handle_event(&self, tx: &mut Tx, event: &Envelope) -> Result<(), BoxError> {
        let id = event
            .metadata
            .get_str(AGGREGATE_ID)
            .ok_or(MessagingError::MissingHeader(AGGREGATE_ID))?
            .to_string();
        let version = event
            .metadata
            .get(AGGREGATE_VERSION)
            .and_then(|v| v.as_i64())
            .ok_or(MessagingError::MissingHeader(AGGREGATE_VERSION))?;

        match ShoppingListEvent::from_payload(&event.name, event.payload.clone())? {
            ShoppingListEvent::ShoppingListCreated { order_id, items } => {
                let view = ShoppingListView {
                    id: id.clone(),
                    order_id,
                    status: ShoppingListStatus::Available,
                    items,
                    version,
                    updated_at: Utc::now(),
                };
                self.cache.add(tx, &view).await?;
            }
            ShoppingListEvent::ShoppingListCanceled => {
                self.cache
                    .update_status(tx, &id, ShoppingListStatus::Cancelled, version)
                    .await?;
            }
            ShoppingListEvent::ShoppingListCompleted => {
                self.cache
                    .update_status(tx, &id, ShoppingListStatus::Completed, version)
                    .await?;
            }
        }

        tracing::debug!(shopping_list_id = %id, event_name = %event.name, version, "cache updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use event_store::{Database, MemoryDatabase, MemoryTx};

    use super::*;
    use crate::{MemoryShoppingListCache, OrderItem};

    fn envelope(event: ShoppingListEvent, version: i64) -> Envelope {
        Envelope::event(event.event_name(), event.to_payload().unwrap())
            .with_metadata(AGGREGATE_ID, "sl-1")
            .with_metadata(AGGREGATE_VERSION, version)
    }

    #[tokio::test]
    async fn test_cancel_overtaking_creation_is_kept() {
        let db = MemoryDatabase::new();
        let cache = Arc::new(MemoryShoppingListCache::new());
        let projector = ShoppingListProjector::<MemoryTx>::new(cache.clone());
        let items = vec![OrderItem {
            store_id: "store-1".to_string(),
            product_id: "apples".to_string(),
            quantity: 3,
        }];

        let mut tx = db.begin().await.unwrap();
        projector
            .handle_event(&mut tx, &envelope(ShoppingListEvent::ShoppingListCanceled, 2))
            .await
            .unwrap();
        projector
            .handle_event(
                &mut tx,
                &envelope(
                    ShoppingListEvent::ShoppingListCreated {
                        order_id: "order-1".to_string(),
                        items: items.clone(),
                    },
                    1,
                ),
            )
            .await
            .unwrap();
        let view = cache.find(&mut tx, "sl-1").await.unwrap().unwrap();
        db.rollback(tx).await.unwrap();

        assert_eq!(view.status, ShoppingListStatus::Cancelled);
        assert_eq!(view.version, 2);
        assert_eq!(view.order_id, "order-1");
        assert_eq!(view.items, items);
    }

    #[tokio::test]
    async fn test_event_without_aggregate_headers_is_rejected() {
        let db = MemoryDatabase::new();
        let projector =
            ShoppingListProjector::<MemoryTx>::new(Arc::new(MemoryShoppingListCache::new()));
        let event = Envelope::event(
            ShoppingListEvent::ShoppingListCanceled.event_name(),
            ShoppingListEvent::ShoppingListCanceled.to_payload().unwrap(),
        );

        let mut tx = db.begin().await.unwrap();
        let result = projector.handle_event(&mut tx, &event).await;
        db.rollback(tx).await.unwrap();

        assert!(result.is_err());
    }
}
