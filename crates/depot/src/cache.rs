//! Shopping list read model.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_store::{MemoryTx, PgTx};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::{OrderItem, Result, ShoppingListStatus};

/// Denormalized view of a shopping list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoppingListView {
    pub id: String,
    pub order_id: String,
    pub status: ShoppingListStatus,
    pub items: Vec<OrderItem>,
    /// Version of the last event applied to this view.
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// Read-model storage, written inside the consuming handler's transaction.
///
/// Writes carry the event version. Status and version only move forward, so
/// redelivered or reordered events never move a view backwards. A status
/// change for a list the cache has not seen yet leaves a placeholder that
/// the creation later fills in.
#[async_trait]
pub trait ShoppingListCache<Tx: Send>: Send + Sync {
    /// Records a created list. An existing view keeps its status and version
    /// when they are newer; its order id and items are filled in.
    async fn add(&self, tx: &mut Tx, view: &ShoppingListView) -> Result<()>;

    /// Moves the view to `status` unless it already reflects `version` or a
    /// later one.
    async fn update_status(
        &self,
        tx: &mut Tx,
        id: &str,
        status: ShoppingListStatus,
        version: i64,
    ) -> Result<()>;

    async fn find(&self, tx: &mut Tx, id: &str) -> Result<Option<ShoppingListView>>;
}

const COLLECTION: &str = "shopping_lists_cache";

/// A view for a list whose creation has not been projected yet.
fn placeholder(id: &str, status: ShoppingListStatus, version: i64) -> ShoppingListView {
    ShoppingListView {
        id: id.to_string(),
        order_id: String::new(),
        status,
        items: Vec::new(),
        version,
        updated_at: Utc::now(),
    }
}

/// Cache kept as documents in the in-memory database.
#[derive(Debug, Clone, Default)]
pub struct MemoryShoppingListCache;

impl MemoryShoppingListCache {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ShoppingListCache<MemoryTx> for MemoryShoppingListCache {
    async fn add(&self, tx: &mut MemoryTx, view: &ShoppingListView) -> Result<()> {
        let merged = match self.find(tx, &view.id).await? {
            Some(existing) if existing.version >= view.version => ShoppingListView {
                order_id: view.order_id.clone(),
                items: view.items.clone(),
                updated_at: Utc::now(),
                ..existing
            },
            _ => view.clone(),
        };
        tx.put_document(COLLECTION, view.id.clone(), serde_json::to_value(&merged)?);
        Ok(())
    }

    async fn update_status(
        &self,
        tx: &mut MemoryTx,
        id: &str,
        status: ShoppingListStatus,
        version: i64,
    ) -> Result<()> {
        let view = match self.find(tx, id).await? {
            Some(view) if view.version >= version => return Ok(()),
            Some(view) => ShoppingListView {
                status,
                version,
                updated_at: Utc::now(),
                ..view
            },
            None => placeholder(id, status, version),
        };

        tx.put_document(COLLECTION, id, serde_json::to_value(&view)?);
        Ok(())
    }

    async fn find(&self, tx: &mut MemoryTx, id: &str) -> Result<Option<ShoppingListView>> {
        match tx.get_document(COLLECTION, id) {
            Some(document) => Ok(Some(serde_json::from_value(document)?)),
            None => Ok(None),
        }
    }
}

/// Cache kept in the `shopping_lists_cache` table.
#[derive(Debug, Clone)]
pub struct PgShoppingListCache {
    table: String,
}

impl PgShoppingListCache {
    pub fn new() -> Self {
        Self::with_table(COLLECTION)
    }

    pub fn with_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }
}

impl Default for PgShoppingListCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShoppingListCache<PgTx> for PgShoppingListCache {
    async fn add(&self, tx: &mut PgTx, view: &ShoppingListView) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {table} AS cache (id, order_id, status, items, version, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                order_id = EXCLUDED.order_id,
                items = EXCLUDED.items,
                status = CASE WHEN cache.version < EXCLUDED.version
                    THEN EXCLUDED.status ELSE cache.status END,
                version = GREATEST(cache.version, EXCLUDED.version),
                updated_at = NOW()
            "#,
            table = self.table
        ))
        .bind(&view.id)
        .bind(&view.order_id)
        .bind(view.status.as_str())
        .bind(serde_json::to_value(&view.items)?)
        .bind(view.version)
        .bind(view.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn update_status(
        &self,
        tx: &mut PgTx,
        id: &str,
        status: ShoppingListStatus,
        version: i64,
    ) -> Result<()> {
        let view = placeholder(id, status, version);
        sqlx::query(&format!(
            r#"
            INSERT INTO {table} AS cache (id, order_id, status, items, version, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                version = EXCLUDED.version,
                updated_at = NOW()
            WHERE cache.version < EXCLUDED.version
            "#,
            table = self.table
        ))
        .bind(&view.id)
        .bind(&view.order_id)
        .bind(view.status.as_str())
        .bind(serde_json::to_value(&view.items)?)
        .bind(view.version)
        .bind(view.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn find(&self, tx: &mut PgTx, id: &str) -> Result<Option<ShoppingListView>> {
        let row = sqlx::query(&format!(
            "SELECT id, order_id, status, items, version, updated_at FROM {} WHERE id = $1",
            self.table
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(ShoppingListView {
            id: row.try_get("id")?,
            order_id: row.try_get("order_id")?,
            status: ShoppingListStatus::parse(row.try_get::<&str, _>("status")?),
            items: serde_json::from_value(row.try_get("items")?)?,
            version: row.try_get("version")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}
