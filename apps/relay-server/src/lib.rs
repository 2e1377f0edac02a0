pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod routes;
pub mod store;

use std::sync::Arc;

use config::Config;
use gateway::fanout::BroadcastAuthority;
use gateway::registry::SessionRegistry;
use store::{MembershipStore, MessageLog, RetryPolicy, Storage};

/// Shared application state available to all route handlers and chat streams.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub sessions: Arc<SessionRegistry>,
    pub authority: BroadcastAuthority,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire the registry and broadcast authority around the given stores.
    /// Every storage call made through the state uses the configured retry
    /// policy.
    pub fn new(
        config: Config,
        membership: Arc<dyn MembershipStore>,
        messages: Arc<dyn MessageLog>,
    ) -> Self {
        let retry = RetryPolicy::new(config.storage_retry_attempts, config.storage_retry_backoff);
        let storage = Storage::new(membership, messages, retry);
        let sessions = Arc::new(SessionRegistry::new(config.mailbox_capacity));
        let authority = BroadcastAuthority::new(storage.clone(), Arc::clone(&sessions));

        Self {
            storage,
            sessions,
            authority,
            config: Arc::new(config),
        }
    }
}
