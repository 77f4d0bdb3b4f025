//! Shopping list aggregate.

use domain::{Aggregate, DomainEvent};
use serde::{Deserialize, Serialize};

use crate::{DepotError, Result};

pub const SHOPPING_LIST_CREATED: &str = "depot.ShoppingListCreated";
pub const SHOPPING_LIST_CANCELED: &str = "depot.ShoppingListCanceled";
pub const SHOPPING_LIST_COMPLETED: &str = "depot.ShoppingListCompleted";

/// An item to pick up from a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub store_id: String,
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShoppingListStatus {
    /// Not created yet.
    #[default]
    Unknown,
    Available,
    Completed,
    Cancelled,
}

impl ShoppingListStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShoppingListStatus::Unknown => "unknown",
            ShoppingListStatus::Available => "available",
            ShoppingListStatus::Completed => "completed",
            ShoppingListStatus::Cancelled => "cancelled",
        }
    }

    /// Parses a stored status; anything unrecognised is `Unknown`.
    pub fn parse(status: &str) -> Self {
        match status {
            "available" => ShoppingListStatus::Available,
            "completed" => ShoppingListStatus::Completed,
            "cancelled" => ShoppingListStatus::Cancelled,
            _ => ShoppingListStatus::Unknown,
        }
    }
}

impl std::fmt::Display for ShoppingListStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ShoppingListEvent {
    ShoppingListCreated {
        order_id: String,
        items: Vec<OrderItem>,
    },
    ShoppingListCanceled,
    ShoppingListCompleted,
}

impl DomainEvent for ShoppingListEvent {
    fn event_name(&self) -> &'static str {
        match self {
            ShoppingListEvent::ShoppingListCreated { .. } => SHOPPING_LIST_CREATED,
            ShoppingListEvent::ShoppingListCanceled => SHOPPING_LIST_CANCELED,
            ShoppingListEvent::ShoppingListCompleted => SHOPPING_LIST_COMPLETED,
        }
    }
}

/// State of a shopping list.
///
/// The decision methods validate a change against the current state and
/// return the event to record; they never mutate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShoppingList {
    pub order_id: String,
    pub items: Vec<OrderItem>,
    pub status: ShoppingListStatus,
}

impl ShoppingList {
    pub fn create(&self, id: &str, order_id: &str, items: Vec<OrderItem>) -> Result<ShoppingListEvent> {
        if self.status != ShoppingListStatus::Unknown {
            return Err(DepotError::AlreadyExists(id.to_string()));
        }
        if order_id.is_empty() {
            return Err(DepotError::Validation("an order id is required".to_string()));
        }
        if items.is_empty() {
            return Err(DepotError::Validation("at least one item is required".to_string()));
        }
        if let Some(item) = items.iter().find(|item| item.quantity == 0) {
            return Err(DepotError::Validation(format!(
                "product {} has a zero quantity",
                item.product_id
            )));
        }

        Ok(ShoppingListEvent::ShoppingListCreated {
            order_id: order_id.to_string(),
            items,
        })
    }

    pub fn cancel(&self, id: &str) -> Result<ShoppingListEvent> {
        self.require_available(id, "cancelled")?;
        Ok(ShoppingListEvent::ShoppingListCanceled)
    }

    pub fn complete(&self, id: &str) -> Result<ShoppingListEvent> {
        self.require_available(id, "completed")?;
        Ok(ShoppingListEvent::ShoppingListCompleted)
    }

    fn require_available(&self, id: &str, action: &'static str) -> Result<()> {
        match self.status {
            ShoppingListStatus::Available => Ok(()),
            ShoppingListStatus::Unknown => Err(DepotError::NotFound(id.to_string())),
            status => Err(DepotError::InvalidStatus {
                id: id.to_string(),
                status,
                action,
            }),
        }
    }
}

impl Aggregate for ShoppingList {
    type Event = ShoppingListEvent;

    fn aggregate_name() -> &'static str {
        "depot.ShoppingList"
    }

    fn snapshot_name() -> &'static str {
        "depot.ShoppingListV1"
    }

    fn apply(&mut self, event: &ShoppingListEvent) {
        match event {
            ShoppingListEvent::ShoppingListCreated { order_id, items } => {
                self.order_id = order_id.clone();
                self.items = items.clone();
                self.status = ShoppingListStatus::Available;
            }
            ShoppingListEvent::ShoppingListCanceled => {
                self.status = ShoppingListStatus::Cancelled;
            }
            ShoppingListEvent::ShoppingListCompleted => {
                self.status = ShoppingListStatus::Completed;
            }
        }
    }
}
