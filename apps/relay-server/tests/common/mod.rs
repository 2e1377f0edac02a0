#![allow(dead_code)]

pub mod faults;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use relay_common::SnowflakeGenerator;
use relay_server::config::{Config, StorageBackend};
use relay_server::gateway::events::ChatMessage;
use relay_server::store::memory::MemoryStore;
use relay_server::store::{MembershipStore, MessageLog};
use relay_server::AppState;

/// Configuration with fast retries and a short server heartbeat so tests
/// never sit in a backoff or idle wait for long.
pub fn test_config() -> Config {
    Config {
        storage: StorageBackend::Memory,
        mailbox_capacity: 64,
        outbound_heartbeat: Duration::from_millis(200),
        storage_retry_attempts: 3,
        storage_retry_backoff: Duration::from_millis(1),
        ..Config::default()
    }
}

/// Build an AppState backed by an in-memory store. The store handle is
/// returned too so tests can inspect the log or simulate an outage.
pub fn test_state_with(config: Config) -> (AppState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new(Arc::new(SnowflakeGenerator::new(0))));
    let state = AppState::new(config, store.clone(), store.clone());
    (state, store)
}

/// Build an AppState whose membership writes or log appends go through the
/// given fault wrappers. Seed through the returned store, not the state.
pub fn faulty_state(
    membership: Option<faults::WriteFault>,
    log: Option<faults::WriteFault>,
) -> (AppState, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new(Arc::new(SnowflakeGenerator::new(0))));
    let membership = match membership {
        Some(fault) => Arc::new(faults::FaultyMembership {
            inner: store.clone(),
            fault,
        }) as Arc<dyn MembershipStore>,
        None => store.clone() as Arc<dyn MembershipStore>,
    };
    let log = match log {
        Some(fault) => Arc::new(faults::FaultyLog {
            inner: store.clone(),
            fault,
        }) as Arc<dyn MessageLog>,
        None => store.clone() as Arc<dyn MessageLog>,
    };
    let state = AppState::new(test_config(), membership, log);
    (state, store)
}

pub fn test_state() -> (AppState, Arc<MemoryStore>) {
    test_state_with(test_config())
}

pub fn test_app() -> (Router, AppState, Arc<MemoryStore>) {
    let (state, store) = test_state();
    let app = relay_server::routes::router().with_state(state.clone());
    (app, state, store)
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background until the test's runtime shuts down.
pub async fn start_server(config: Config) -> (SocketAddr, AppState, Arc<MemoryStore>) {
    let (state, store) = test_state_with(config);
    let app = relay_server::routes::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state, store)
}

/// Insert a user directly. The hash is never verified by these tests.
pub async fn seed_user(state: &AppState, username: &str) {
    state
        .storage
        .create_user(username, "$argon2id$unused")
        .await
        .expect("seed user");
}

/// Create a group owned by `creator` (who must exist) and return its id.
pub async fn seed_group(state: &AppState, creator: &str, name: &str) -> i64 {
    state
        .storage
        .create_group(creator, name)
        .await
        .expect("seed group")
        .id
}

pub async fn seed_member(state: &AppState, username: &str, group_id: i64) {
    state
        .storage
        .add_member(username, group_id)
        .await
        .expect("seed member");
}

pub fn contents(messages: &[ChatMessage]) -> Vec<&str> {
    messages.iter().map(|m| m.content.as_str()).collect()
}
