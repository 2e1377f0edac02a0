use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_common::SnowflakeGenerator;
use relay_server::config::{Config, StorageBackend};
use relay_server::store::memory::MemoryStore;
use relay_server::store::postgres::PgStore;
use relay_server::store::{MembershipStore, MessageLog, RetryPolicy};
use relay_server::AppState;

/// Snowflake worker id of this relay instance.
const WORKER_ID: u16 = 1;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;
    let snowflake = Arc::new(SnowflakeGenerator::new(WORKER_ID));

    let (membership, messages): (Arc<dyn MembershipStore>, Arc<dyn MessageLog>) =
        match config.storage {
            StorageBackend::Postgres => {
                let database_url = config.database_url.as_deref().unwrap_or_default();
                let retry =
                    RetryPolicy::new(config.storage_retry_attempts, config.storage_retry_backoff);
                let db = match relay_server::db::pool::connect(database_url, retry).await {
                    Ok(db) => db,
                    Err(err) => {
                        tracing::error!(error = %err, "database unreachable, giving up");
                        std::process::exit(1);
                    }
                };
                let store = Arc::new(PgStore::new(db, snowflake));
                (store.clone() as Arc<dyn MembershipStore>, store as Arc<dyn MessageLog>)
            }
            StorageBackend::Memory => {
                tracing::warn!("using in-memory storage; nothing survives a restart");
                let store = Arc::new(MemoryStore::new(snowflake));
                (store.clone() as Arc<dyn MembershipStore>, store as Arc<dyn MessageLog>)
            }
        };

    tracing::info!(
        storage = ?config.storage,
        mailbox_capacity = config.mailbox_capacity,
        heartbeat_interval_ms = config.heartbeat_interval.as_millis() as u64,
        "relay-server configured"
    );

    let state = AppState::new(config, membership, messages);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(relay_server::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "relay-server listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
