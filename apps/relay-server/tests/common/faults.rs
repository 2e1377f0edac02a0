//! Store wrappers that lose writes the way a flaky backend does, for the
//! persist-before-notify paths `simulate_outage` cannot reach.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use relay_server::gateway::events::MessageType;
use relay_server::store::memory::MemoryStore;
use relay_server::store::{
    GroupRecord, MembershipStore, MessageLog, StoreError, StoredMessage, UserRecord,
};

/// Which writes fail, and whether each failed write still lands.
pub struct WriteFault {
    remaining: AtomicU32,
    commit_first: bool,
}

impl WriteFault {
    /// Every write fails and nothing is written.
    pub fn always() -> Self {
        Self {
            remaining: AtomicU32::new(u32::MAX),
            commit_first: false,
        }
    }

    /// The first write commits, then its connection drops before the reply.
    pub fn lost_reply_once() -> Self {
        Self {
            remaining: AtomicU32::new(1),
            commit_first: true,
        }
    }

    fn trips(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn error() -> StoreError {
        StoreError::Unavailable("connection dropped".to_string())
    }
}

/// Delegates to a [`MemoryStore`], except `add_member`.
pub struct FaultyMembership {
    pub inner: Arc<MemoryStore>,
    pub fault: WriteFault,
}

#[async_trait]
impl MembershipStore for FaultyMembership {
    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<UserRecord, StoreError> {
        self.inner.create_user(username, password_hash).await
    }

    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        self.inner.find_user(username).await
    }

    async fn create_group(&self, creator: &str, name: &str) -> Result<GroupRecord, StoreError> {
        self.inner.create_group(creator, name).await
    }

    async fn find_group(&self, group_id: i64) -> Result<Option<GroupRecord>, StoreError> {
        self.inner.find_group(group_id).await
    }

    async fn is_member(&self, username: &str, group_id: i64) -> Result<bool, StoreError> {
        self.inner.is_member(username, group_id).await
    }

    async fn members_of(&self, group_id: i64) -> Result<BTreeSet<String>, StoreError> {
        self.inner.members_of(group_id).await
    }

    async fn add_member(&self, username: &str, group_id: i64) -> Result<(), StoreError> {
        if !self.fault.trips() {
            return self.inner.add_member(username, group_id).await;
        }
        if self.fault.commit_first {
            self.inner.add_member(username, group_id).await?;
        }
        Err(WriteFault::error())
    }

    async fn remove_member(&self, username: &str, group_id: i64) -> Result<bool, StoreError> {
        self.inner.remove_member(username, group_id).await
    }

    async fn groups_of(&self, username: &str) -> Result<Vec<GroupRecord>, StoreError> {
        self.inner.groups_of(username).await
    }
}

/// Delegates to a [`MemoryStore`], except `append`.
pub struct FaultyLog {
    pub inner: Arc<MemoryStore>,
    pub fault: WriteFault,
}

#[async_trait]
impl MessageLog for FaultyLog {
    fn next_message_id(&self) -> i64 {
        self.inner.next_message_id()
    }

    async fn append(
        &self,
        id: i64,
        group_id: i64,
        sender: &str,
        content: &str,
        kind: MessageType,
    ) -> Result<StoredMessage, StoreError> {
        if !self.fault.trips() {
            return self.inner.append(id, group_id, sender, content, kind).await;
        }
        if self.fault.commit_first {
            self.inner.append(id, group_id, sender, content, kind).await?;
        }
        Err(WriteFault::error())
    }

    async fn history(&self, group_id: i64) -> Result<Vec<StoredMessage>, StoreError> {
        self.inner.history(group_id).await
    }
}
