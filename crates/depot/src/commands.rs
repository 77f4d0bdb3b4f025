//! Command and reply payloads exchanged with other services.

use serde::{Deserialize, Serialize};

use crate::shopping_list::OrderItem;

pub const CREATE_SHOPPING_LIST: &str = "depot.CreateShoppingList";
pub const CANCEL_SHOPPING_LIST: &str = "depot.CancelShoppingList";
pub const COMPLETE_SHOPPING_LIST: &str = "depot.CompleteShoppingList";

/// Reply to `depot.CreateShoppingList`, carrying the new list's id.
pub const CREATED_SHOPPING_LIST: &str = "depot.CreatedShoppingList";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateShoppingList {
    /// Id for the new list; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub order_id: String,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelShoppingList {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteShoppingList {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedShoppingList {
    pub id: String,
}
