//! Depot: the shopping list service.
//!
//! Shopping lists are event-sourced aggregates. Their events go out through
//! the transactional outbox, other services drive them with commands (and
//! get replies, so a saga can use them as a step), and a projector keeps a
//! read-model cache behind the inbox.

pub mod app;
pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod handlers;
pub mod projector;
pub mod service;
pub mod shopping_list;

pub use app::Depot;
pub use cache::{MemoryShoppingListCache, PgShoppingListCache, ShoppingListCache, ShoppingListView};
pub use config::{Config, LogFormat};
pub use error::{DepotError, Result};
pub use handlers::{
    CancelShoppingListHandler, CompleteShoppingListHandler, CreateShoppingListHandler,
};
pub use projector::ShoppingListProjector;
pub use service::ShoppingListService;
pub use shopping_list::{OrderItem, ShoppingList, ShoppingListEvent, ShoppingListStatus};
