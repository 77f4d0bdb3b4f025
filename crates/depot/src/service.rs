use common::AggregateId;
use domain::{AggregateRepository, AggregateRoot};

use crate::commands::{CancelShoppingList, CompleteShoppingList, CreateShoppingList};
use crate::{DepotError, Result, ShoppingList};

/// Application service for shopping lists.
///
/// Each operation loads the list, validates the change, records the event
/// and saves through the repository inside the caller's transaction.
pub struct ShoppingListService<Tx: Send> {
    repository: AggregateRepository<ShoppingList, Tx>,
}

impl<Tx: Send + 'static> Clone for ShoppingListService<Tx> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
        }
    }
}

impl<Tx: Send + 'static> ShoppingListService<Tx> {
    pub fn new(repository: AggregateRepository<ShoppingList, Tx>) -> Self {
        Self { repository }
    }

    /// Creates a shopping list and returns its id.
    #[tracing::instrument(skip(self, tx, command), fields(order_id = %command.order_id))]
    pub async fn create_shopping_list(
        &self,
        tx: &mut Tx,
        command: CreateShoppingList,
    ) -> Result<AggregateId> {
        let id = command
            .id
            .map(AggregateId::from)
            .unwrap_or_else(AggregateId::new);

        let mut list = self.repository.load(tx, id.clone()).await?;
        let event = list
            .state()
            .create(id.as_str(), &command.order_id, command.items)?;
        list.record(event);
        self.repository.save(tx, &mut list).await?;

        metrics::counter!("shopping_lists_created_total").increment(1);
        tracing::info!(shopping_list_id = %id, "shopping list created");
        Ok(id)
    }

    #[tracing::instrument(skip(self, tx))]
    pub async fn cancel_shopping_list(&self, tx: &mut Tx, command: CancelShoppingList) -> Result<()> {
        let mut list = self.repository.load(tx, AggregateId::from(command.id.as_str())).await?;
        let event = list.state().cancel(&command.id)?;
        list.record(event);
        self.repository.save(tx, &mut list).await?;

        tracing::info!(shopping_list_id = %command.id, "shopping list cancelled");
        Ok(())
    }

    #[tracing::instrument(skip(self, tx))]
    pub async fn complete_shopping_list(
        &self,
        tx: &mut Tx,
        command: CompleteShoppingList,
    ) -> Result<()> {
        let mut list = self.repository.load(tx, AggregateId::from(command.id.as_str())).await?;
        let event = list.state().complete(&command.id)?;
        list.record(event);
        self.repository.save(tx, &mut list).await?;

        tracing::info!(shopping_list_id = %command.id, "shopping list completed");
        Ok(())
    }

    /// Loads a list; `NotFound` if it was never created.
    pub async fn get_shopping_list(
        &self,
        tx: &mut Tx,
        id: &str,
    ) -> Result<AggregateRoot<ShoppingList>> {
        let list = self.repository.load(tx, AggregateId::from(id)).await?;
        if list.is_new() {
            return Err(DepotError::NotFound(id.to_string()));
        }
        Ok(list)
    }
}
