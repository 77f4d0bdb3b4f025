//! Command handlers that let other services drive shopping lists, for
//! example from a saga step.

use async_trait::async_trait;
use messaging::{BoxError, CommandHandler, CommandOutcome, Envelope, MessageKind};

use crate::commands::{
    CREATED_SHOPPING_LIST, CancelShoppingList, CompleteShoppingList, CreateShoppingList,
    CreatedShoppingList,
};
use crate::{Result, ShoppingListService};

/// Maps a service result to a command outcome.
///
/// Rejections become a `Failure` reply so a waiting saga can compensate;
/// anything else is an error and the delivery is retried.
fn outcome<T>(
    command: &Envelope,
    result: Result<T>,
    reply: impl FnOnce(T) -> std::result::Result<Option<Envelope>, BoxError>,
) -> std::result::Result<CommandOutcome, BoxError> {
    match result {
        Ok(value) => Ok(CommandOutcome::Success(reply(value)?)),
        Err(err) if err.is_rejection() => {
            tracing::warn!(command_name = %command.name, error = %err, "command rejected");
            Ok(CommandOutcome::failure())
        }
        Err(err) => Err(err.into()),
    }
}

pub struct CreateShoppingListHandler<Tx: Send> {
    service: ShoppingListService<Tx>,
}

impl<Tx: Send + 'static> CreateShoppingListHandler<Tx> {
    pub fn new(service: ShoppingListService<Tx>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<Tx: Send + 'static> CommandHandler<Tx> for CreateShoppingListHandler<Tx> {
    async fn handle_command(
        &self,
        tx: &mut Tx,
        command: &Envelope,
    ) -> std::result::Result<CommandOutcome, BoxError> {
        let payload: CreateShoppingList = command.decode()?;
        let result = self.service.create_shopping_list(tx, payload).await;

        outcome(command, result, |id| {
            let reply = Envelope::encode(
                MessageKind::Reply,
                CREATED_SHOPPING_LIST,
                &CreatedShoppingList { id: id.into_inner() },
            )?;
            Ok(Some(reply))
        })
    }
}

pub struct CancelShoppingListHandler<Tx: Send> {
    service: ShoppingListService<Tx>,
}

impl<Tx: Send + 'static> CancelShoppingListHandler<Tx> {
    pub fn new(service: ShoppingListService<Tx>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<Tx: Send + 'static> CommandHandler<Tx> for CancelShoppingListHandler<Tx> {
    async fn handle_command(
        &self,
        tx: &mut Tx,
        command: &Envelope,
    ) -> std::result::Result<CommandOutcome, BoxError> {
        let payload: CancelShoppingList = command.decode()?;
        let result = self.service.cancel_shopping_list(tx, payload).await;
        outcome(command, result, |()| Ok(None))
    }
}

pub struct CompleteShoppingListHandler<Tx: Send> {
    service: ShoppingListService<Tx>,
}

impl<Tx: Send + 'static> CompleteShoppingListHandler<Tx> {
    pub fn new(service: ShoppingListService<Tx>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<Tx: Send + 'static> CommandHandler<Tx> for CompleteShoppingListHandler<Tx> {
    async fn handle_command(
        &self,
        tx: &mut Tx,
        command: &Envelope,
    ) -> std::result::Result<CommandOutcome, BoxError> {
        let payload: CompleteShoppingList = command.decode()?;
        let result = self.service.complete_shopping_list(tx, payload).await;
        outcome(command, result, |()| Ok(None))
    }
}
