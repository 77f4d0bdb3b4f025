//! Shopping list cache and depot wiring against PostgreSQL.
//!
//! Run with:
//!
//! ```bash
//! cargo test -p depot --test postgres_cache -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use depot::commands::{CancelShoppingList, CreateShoppingList};
use depot::{
    Config, Depot, OrderItem, PgShoppingListCache, ShoppingListCache, ShoppingListStatus,
    ShoppingListView,
};
use event_store::{Database, PostgresDatabase};
use messaging::InMemoryBroker;
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresDatabase::new(pool.clone())
                .run_migrations()
                .await
                .unwrap();
            pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_db() -> PostgresDatabase {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE events, snapshots, outbox, inbox, sagas, shopping_lists_cache",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresDatabase::new(pool)
}

fn items() -> Vec<OrderItem> {
    vec![OrderItem {
        store_id: "store-1".to_string(),
        product_id: "apples".to_string(),
        quantity: 6,
    }]
}

fn view(id: &str, version: i64) -> ShoppingListView {
    ShoppingListView {
        id: id.to_string(),
        order_id: "order-1".to_string(),
        status: ShoppingListStatus::Available,
        items: items(),
        version,
        updated_at: Utc::now(),
    }
}

#[tokio::test]
#[serial]
async fn test_cache_round_trip() {
    let db = get_test_db().await;
    let cache = PgShoppingListCache::new();

    let mut tx = db.begin().await.unwrap();
    cache.add(&mut tx, &view("sl-1", 1)).await.unwrap();
    db.commit(tx).await.unwrap();

    let mut tx = db.begin().await.unwrap();
    let found = cache.find(&mut tx, "sl-1").await.unwrap().unwrap();
    let missing = cache.find(&mut tx, "sl-2").await.unwrap();
    db.rollback(tx).await.unwrap();

    assert_eq!(found.order_id, "order-1");
    assert_eq!(found.status, ShoppingListStatus::Available);
    assert_eq!(found.items, items());
    assert_eq!(found.version, 1);
    assert!(missing.is_none());
}

#[tokio::test]
#[serial]
async fn test_cache_ignores_stale_writes() {
    let db = get_test_db().await;
    let cache = PgShoppingListCache::new();

    let mut tx = db.begin().await.unwrap();
    cache.add(&mut tx, &view("sl-1", 1)).await.unwrap();
    cache
        .update_status(&mut tx, "sl-1", ShoppingListStatus::Completed, 3)
        .await
        .unwrap();
    cache
        .update_status(&mut tx, "sl-1", ShoppingListStatus::Cancelled, 2)
        .await
        .unwrap();
    cache.add(&mut tx, &view("sl-1", 1)).await.unwrap();
    db.commit(tx).await.unwrap();

    let mut tx = db.begin().await.unwrap();
    let found = cache.find(&mut tx, "sl-1").await.unwrap().unwrap();
    db.rollback(tx).await.unwrap();

    assert_eq!(found.status, ShoppingListStatus::Completed);
    assert_eq!(found.version, 3);
}

#[tokio::test]
#[serial]
async fn test_cache_keeps_status_change_ahead_of_creation() {
    let db = get_test_db().await;
    let cache = PgShoppingListCache::new();

    let mut tx = db.begin().await.unwrap();
    cache
        .update_status(&mut tx, "sl-1", ShoppingListStatus::Cancelled, 2)
        .await
        .unwrap();
    db.commit(tx).await.unwrap();

    let mut tx = db.begin().await.unwrap();
    cache.add(&mut tx, &view("sl-1", 1)).await.unwrap();
    db.commit(tx).await.unwrap();

    let mut tx = db.begin().await.unwrap();
    let found = cache.find(&mut tx, "sl-1").await.unwrap().unwrap();
    db.rollback(tx).await.unwrap();

    assert_eq!(found.status, ShoppingListStatus::Cancelled);
    assert_eq!(found.version, 2);
    assert_eq!(found.order_id, "order-1");
    assert_eq!(found.items, items());
}

#[tokio::test]
#[serial]
async fn test_cache_write_rolls_back_with_the_transaction() {
    let db = get_test_db().await;
    let cache = PgShoppingListCache::new();

    let mut tx = db.begin().await.unwrap();
    cache.add(&mut tx, &view("sl-1", 1)).await.unwrap();
    db.rollback(tx).await.unwrap();

    let mut tx = db.begin().await.unwrap();
    assert!(cache.find(&mut tx, "sl-1").await.unwrap().is_none());
    db.rollback(tx).await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_depot_projects_into_postgres() {
    let db = Arc::new(get_test_db().await);
    let broker = InMemoryBroker::new();
    let depot = Depot::build(
        Config {
            outbox_poll_interval: Duration::from_millis(10),
            ..Config::default()
        },
        db.clone(),
        Arc::new(broker.clone()),
        Arc::new(PgShoppingListCache::new()),
    );
    let subscriptions = depot.subscribe(&broker).await.unwrap();

    let mut tx = db.begin().await.unwrap();
    let id = depot
        .service()
        .create_shopping_list(
            &mut tx,
            CreateShoppingList {
                id: None,
                order_id: "order-7".to_string(),
                items: items(),
            },
        )
        .await
        .unwrap();
    db.commit(tx).await.unwrap();

    let mut tx = db.begin().await.unwrap();
    depot
        .service()
        .cancel_shopping_list(
            &mut tx,
            CancelShoppingList {
                id: id.as_str().to_string(),
            },
        )
        .await
        .unwrap();
    db.commit(tx).await.unwrap();

    assert_eq!(depot.processor().process_batch().await.unwrap(), 2);
    broker.wait_until_idle().await;

    let cache = PgShoppingListCache::new();
    let mut tx = db.begin().await.unwrap();
    let found = cache.find(&mut tx, id.as_str()).await.unwrap().unwrap();
    db.rollback(tx).await.unwrap();

    assert_eq!(found.order_id, "order-7");
    assert_eq!(found.status, ShoppingListStatus::Cancelled);
    assert_eq!(found.version, 2);

    for subscription in subscriptions {
        subscription.unsubscribe().await;
    }
}
