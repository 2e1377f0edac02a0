//! Persistence collaborators: the membership store and the message log.
//!
//! Both are trait objects so the relay runs against Postgres in production
//! and an in-memory store in development and tests. [`Storage`] bundles them
//! with the retry policy every caller goes through.

pub mod memory;
pub mod postgres;
pub mod retry;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::gateway::events::MessageType;

pub use retry::RetryPolicy;

/// Failure of a storage operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached (pool checkout failed, connection dropped).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("{0} not found")]
    NotFound(String),

    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Whether retrying the same operation can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub id: i64,
    pub name: String,
    pub creator: String,
}

/// A message as recorded in the log. `created_at` is assigned by storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: i64,
    pub group_id: i64,
    pub sender: String,
    pub content: String,
    pub kind: MessageType,
    pub created_at: DateTime<Utc>,
}

/// Users, groups, and who belongs to which group.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Fails with `Conflict` if the username is taken.
    async fn create_user(&self, username: &str, password_hash: &str)
        -> Result<UserRecord, StoreError>;

    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Creates the group and makes `creator` its first member atomically.
    async fn create_group(&self, creator: &str, name: &str) -> Result<GroupRecord, StoreError>;

    async fn find_group(&self, group_id: i64) -> Result<Option<GroupRecord>, StoreError>;

    async fn is_member(&self, username: &str, group_id: i64) -> Result<bool, StoreError>;

    async fn members_of(&self, group_id: i64) -> Result<BTreeSet<String>, StoreError>;

    /// Fails with `Conflict` if the user already belongs to the group.
    async fn add_member(&self, username: &str, group_id: i64) -> Result<(), StoreError>;

    /// Returns whether a membership row was removed.
    async fn remove_member(&self, username: &str, group_id: i64) -> Result<bool, StoreError>;

    async fn groups_of(&self, username: &str) -> Result<Vec<GroupRecord>, StoreError>;
}

/// Append-only per-group history.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// A fresh id for the next message. Allocated once per message, before
    /// any attempt to write it.
    fn next_message_id(&self) -> i64;

    /// Durably records one message in a single transaction. Appending an id
    /// that is already recorded writes nothing and returns the recorded row.
    async fn append(
        &self,
        id: i64,
        group_id: i64,
        sender: &str,
        content: &str,
        kind: MessageType,
    ) -> Result<StoredMessage, StoreError>;

    /// All messages of a group, oldest first.
    async fn history(&self, group_id: i64) -> Result<Vec<StoredMessage>, StoreError>;
}

/// The storage handles shared by every connection, with retries applied.
#[derive(Clone)]
pub struct Storage {
    membership: Arc<dyn MembershipStore>,
    messages: Arc<dyn MessageLog>,
    retry: RetryPolicy,
}

impl Storage {
    pub fn new(
        membership: Arc<dyn MembershipStore>,
        messages: Arc<dyn MessageLog>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            membership,
            messages,
            retry,
        }
    }

    pub async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<UserRecord, StoreError> {
        self.retry
            .run("create_user", || {
                self.membership.create_user(username, password_hash)
            })
            .await
    }

    pub async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        self.retry
            .run("find_user", || self.membership.find_user(username))
            .await
    }

    pub async fn create_group(&self, creator: &str, name: &str) -> Result<GroupRecord, StoreError> {
        self.retry
            .run("create_group", || self.membership.create_group(creator, name))
            .await
    }

    pub async fn find_group(&self, group_id: i64) -> Result<Option<GroupRecord>, StoreError> {
        self.retry
            .run("find_group", || self.membership.find_group(group_id))
            .await
    }

    pub async fn is_member(&self, username: &str, group_id: i64) -> Result<bool, StoreError> {
        self.retry
            .run("is_member", || self.membership.is_member(username, group_id))
            .await
    }

    pub async fn members_of(&self, group_id: i64) -> Result<BTreeSet<String>, StoreError> {
        self.retry
            .run("members_of", || self.membership.members_of(group_id))
            .await
    }

    /// A `Conflict` on a retry means an earlier attempt committed before its
    /// connection dropped, so it counts as success.
    pub async fn add_member(&self, username: &str, group_id: i64) -> Result<(), StoreError> {
        let attempts = AtomicU32::new(0);
        let result = self
            .retry
            .run("add_member", || {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.membership.add_member(username, group_id)
            })
            .await;
        match result {
            Err(StoreError::Conflict(_)) if attempts.load(Ordering::Relaxed) > 1 => {
                tracing::warn!(%username, group_id, "membership already written by an earlier attempt");
                Ok(())
            }
            other => other,
        }
    }

    pub async fn remove_member(&self, username: &str, group_id: i64) -> Result<bool, StoreError> {
        self.retry
            .run("remove_member", || self.membership.remove_member(username, group_id))
            .await
    }

    pub async fn groups_of(&self, username: &str) -> Result<Vec<GroupRecord>, StoreError> {
        self.retry
            .run("groups_of", || self.membership.groups_of(username))
            .await
    }

    pub async fn append_message(
        &self,
        group_id: i64,
        sender: &str,
        content: &str,
        kind: MessageType,
    ) -> Result<StoredMessage, StoreError> {
        let id = self.messages.next_message_id();
        self.retry
            .run("append_message", || {
                self.messages.append(id, group_id, sender, content, kind)
            })
            .await
    }

    pub async fn history(&self, group_id: i64) -> Result<Vec<StoredMessage>, StoreError> {
        self.retry
            .run("history", || self.messages.history(group_id))
            .await
    }
}
