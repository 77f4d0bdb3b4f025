//! Depot service entry point.

use std::sync::Arc;

use depot::{Config, Depot, LogFormat, MemoryShoppingListCache, PgShoppingListCache};
use event_store::{MemoryDatabase, PostgresDatabase};
use messaging::InMemoryBroker;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = config.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

#[tokio::main]
async fn main() {
    // 1. Configuration and tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Prometheus exporter with its own HTTP listener
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(config.metrics_addr)
        .install()
        .expect("failed to install Prometheus exporter");
    tracing::info!(addr = %config.metrics_addr, "metrics listener started");

    // 3. Shutdown on SIGINT/SIGTERM
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });

    // 4. Wire and run against the configured database
    let broker = InMemoryBroker::new();
    let result = match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to PostgreSQL");
            let db = Arc::new(PostgresDatabase::new(pool));
            db.run_migrations().await.expect("failed to run migrations");
            tracing::info!("using PostgreSQL");

            let depot = Depot::build(
                config,
                db,
                Arc::new(broker.clone()),
                Arc::new(PgShoppingListCache::new()),
            );
            depot.run(&broker, shutdown).await
        }
        None => {
            tracing::info!("DATABASE_URL not set, using the in-memory database");
            let depot = Depot::build(
                config,
                Arc::new(MemoryDatabase::new()),
                Arc::new(broker.clone()),
                Arc::new(MemoryShoppingListCache::new()),
            );
            depot.run(&broker, shutdown).await
        }
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "depot failed");
        std::process::exit(1);
    }
    tracing::info!("depot shut down gracefully");
}
