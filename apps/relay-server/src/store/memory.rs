//! In-memory implementation of both storage traits.
//!
//! Used for development (`RELAY_STORAGE=memory`) and tests. Supports
//! simulating a backend outage so retry and abort paths can be exercised.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use relay_common::SnowflakeGenerator;

use super::{GroupRecord, MembershipStore, MessageLog, StoreError, StoredMessage, UserRecord};
use crate::gateway::events::MessageType;

#[derive(Default)]
struct Tables {
    users: HashMap<String, UserRecord>,
    groups: BTreeMap<i64, GroupRecord>,
    /// group id -> member usernames
    members: HashMap<i64, BTreeSet<String>>,
    messages: Vec<StoredMessage>,
    next_user_id: i64,
    next_group_id: i64,
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
    snowflake: Arc<SnowflakeGenerator>,
    /// Number of upcoming operations that fail as if the backend were down.
    outage: AtomicU32,
}

impl MemoryStore {
    pub fn new(snowflake: Arc<SnowflakeGenerator>) -> Self {
        Self {
            tables: Mutex::new(Tables {
                next_user_id: 1,
                next_group_id: 1,
                ..Tables::default()
            }),
            snowflake,
            outage: AtomicU32::new(0),
        }
    }

    /// Make the next `operations` calls fail with `StoreError::Unavailable`.
    pub fn simulate_outage(&self, operations: u32) {
        self.outage.store(operations, Ordering::SeqCst);
    }

    /// Total number of messages appended across all groups.
    pub fn message_count(&self) -> usize {
        self.tables.lock().messages.len()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        let took = self
            .outage
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match took {
            Ok(_) => Err(StoreError::Unavailable("simulated outage".to_string())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<UserRecord, StoreError> {
        self.check_available()?;
        let mut t = self.tables.lock();
        if t.users.contains_key(username) {
            return Err(StoreError::Conflict(format!("username {username} is taken")));
        }
        let user = UserRecord {
            id: t.next_user_id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
        };
        t.next_user_id += 1;
        t.users.insert(username.to_string(), user.clone());
        Ok(user)
    }

    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        self.check_available()?;
        Ok(self.tables.lock().users.get(username).cloned())
    }

    async fn create_group(&self, creator: &str, name: &str) -> Result<GroupRecord, StoreError> {
        self.check_available()?;
        let mut t = self.tables.lock();
        if !t.users.contains_key(creator) {
            return Err(StoreError::NotFound("user".to_string()));
        }
        let group = GroupRecord {
            id: t.next_group_id,
            name: name.to_string(),
            creator: creator.to_string(),
        };
        t.next_group_id += 1;
        t.groups.insert(group.id, group.clone());
        t.members
            .entry(group.id)
            .or_default()
            .insert(creator.to_string());
        Ok(group)
    }

    async fn find_group(&self, group_id: i64) -> Result<Option<GroupRecord>, StoreError> {
        self.check_available()?;
        Ok(self.tables.lock().groups.get(&group_id).cloned())
    }

    async fn is_member(&self, username: &str, group_id: i64) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self
            .tables
            .lock()
            .members
            .get(&group_id)
            .is_some_and(|m| m.contains(username)))
    }

    async fn members_of(&self, group_id: i64) -> Result<BTreeSet<String>, StoreError> {
        self.check_available()?;
        Ok(self
            .tables
            .lock()
            .members
            .get(&group_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_member(&self, username: &str, group_id: i64) -> Result<(), StoreError> {
        self.check_available()?;
        let mut t = self.tables.lock();
        if !t.users.contains_key(username) {
            return Err(StoreError::NotFound("user".to_string()));
        }
        if !t.groups.contains_key(&group_id) {
            return Err(StoreError::NotFound("group".to_string()));
        }
        if !t.members.entry(group_id).or_default().insert(username.to_string()) {
            return Err(StoreError::Conflict(format!(
                "{username} already belongs to group {group_id}"
            )));
        }
        Ok(())
    }

    async fn remove_member(&self, username: &str, group_id: i64) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self
            .tables
            .lock()
            .members
            .get_mut(&group_id)
            .is_some_and(|m| m.remove(username)))
    }

    async fn groups_of(&self, username: &str) -> Result<Vec<GroupRecord>, StoreError> {
        self.check_available()?;
        let t = self.tables.lock();
        Ok(t.groups
            .values()
            .filter(|g| t.members.get(&g.id).is_some_and(|m| m.contains(username)))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MessageLog for MemoryStore {
    fn next_message_id(&self) -> i64 {
        self.snowflake.generate()
    }

    async fn append(
        &self,
        id: i64,
        group_id: i64,
        sender: &str,
        content: &str,
        kind: MessageType,
    ) -> Result<StoredMessage, StoreError> {
        self.check_available()?;
        let mut t = self.tables.lock();
        if let Some(existing) = t.messages.iter().find(|m| m.id == id) {
            return Ok(existing.clone());
        }
        if !t.users.contains_key(sender) {
            return Err(StoreError::NotFound("user".to_string()));
        }
        if !t.groups.contains_key(&group_id) {
            return Err(StoreError::NotFound("group".to_string()));
        }
        let record = StoredMessage {
            id,
            group_id,
            sender: sender.to_string(),
            content: content.to_string(),
            kind,
            created_at: Utc::now(),
        };
        t.messages.push(record.clone());
        Ok(record)
    }

    async fn history(&self, group_id: i64) -> Result<Vec<StoredMessage>, StoreError> {
        self.check_available()?;
        Ok(self
            .tables
            .lock()
            .messages
            .iter()
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect())
    }
}
