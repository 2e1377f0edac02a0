//! Session registry: one bounded outbound mailbox per connected user.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::events::ChatMessage;

/// Pending outbound messages for one connection.
///
/// Any connection may push (multi-producer); only the owning connection
/// drains (single consumer). Delivery is best effort: when full, the oldest
/// entry is evicted so a slow reader never blocks a broadcaster.
pub struct Mailbox {
    username: String,
    connection_id: String,
    capacity: usize,
    queue: Mutex<VecDeque<ChatMessage>>,
    live: AtomicBool,
    notify: Notify,
}

impl Mailbox {
    fn new(username: String, connection_id: String, capacity: usize) -> Self {
        Self {
            username,
            connection_id,
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::new()),
            live: AtomicBool::new(true),
            notify: Notify::new(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// False once the mailbox was replaced by a newer connection or released.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue a message. Returns false if the mailbox is no longer live.
    pub fn push(&self, message: ChatMessage) -> bool {
        if !self.is_live() {
            return false;
        }
        let evicted = {
            let mut queue = self.queue.lock();
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(message);
            evicted
        };
        if let Some(old) = evicted {
            tracing::warn!(
                username = %self.username,
                connection_id = %self.connection_id,
                capacity = self.capacity,
                dropped_sender = %old.sender,
                "mailbox full, evicted oldest message"
            );
        }
        self.notify.notify_one();
        true
    }

    /// Take everything queued, oldest first. Never blocks on producers for
    /// longer than one push.
    pub fn drain(&self) -> Vec<ChatMessage> {
        self.queue.lock().drain(..).collect()
    }

    /// Resolves once a message was pushed or the mailbox was closed since
    /// the last call.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Mark not-live and discard anything still queued.
    fn close(&self) {
        self.live.store(false, Ordering::Release);
        self.queue.lock().clear();
        self.notify.notify_one();
    }
}

/// Shared registry of connected users.
///
/// Uses `DashMap` for shard-level concurrency; each mailbox guards its queue
/// with its own `parking_lot::Mutex`. No lock is held across an await point
/// and no shard lock is held while a mailbox is locked.
pub struct SessionRegistry {
    mailboxes: DashMap<String, Arc<Mailbox>>,
    capacity: usize,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            mailboxes: DashMap::new(),
            capacity,
        }
    }

    /// Create the mailbox for `username`, replacing any existing one.
    ///
    /// The replaced mailbox is closed: its queued messages are dropped and
    /// its connection sees it go not-live.
    pub fn register(&self, username: &str, connection_id: &str) -> Arc<Mailbox> {
        let mailbox = Arc::new(Mailbox::new(
            username.to_string(),
            connection_id.to_string(),
            self.capacity,
        ));
        if let Some(previous) = self
            .mailboxes
            .insert(username.to_string(), Arc::clone(&mailbox))
        {
            tracing::info!(
                %username,
                old_connection_id = %previous.connection_id,
                new_connection_id = %connection_id,
                discarded = previous.len(),
                "session replaced by newer connection"
            );
            previous.close();
        }
        mailbox
    }

    /// Remove whatever mailbox `username` has. No-op if absent.
    pub fn unregister(&self, username: &str) -> bool {
        match self.mailboxes.remove(username) {
            Some((_, mailbox)) => {
                mailbox.close();
                true
            }
            None => false,
        }
    }

    /// Remove `mailbox` only if it is still the one registered for
    /// `username`. Cleanup of a replaced connection must not remove its
    /// successor. Idempotent.
    pub fn release(&self, username: &str, mailbox: &Arc<Mailbox>) -> bool {
        mailbox.close();
        self.mailboxes
            .remove_if(username, |_, current| Arc::ptr_eq(current, mailbox))
            .is_some()
    }

    pub fn mailbox(&self, username: &str) -> Option<Arc<Mailbox>> {
        self.mailboxes.get(username).map(|entry| Arc::clone(entry.value()))
    }

    /// Queue `message` for `username`. Returns false (and drops the message)
    /// when the user is not connected.
    pub fn enqueue(&self, username: &str, message: ChatMessage) -> bool {
        match self.mailbox(username) {
            Some(mailbox) => mailbox.push(message),
            None => false,
        }
    }

    /// Everything currently queued for `username`, oldest first.
    pub fn drain(&self, username: &str) -> Vec<ChatMessage> {
        self.mailbox(username)
            .map(|mailbox| mailbox.drain())
            .unwrap_or_default()
    }

    /// Queue `message` for every connected user. Returns how many mailboxes
    /// accepted it.
    pub fn broadcast(&self, message: &ChatMessage) -> usize {
        let targets: Vec<Arc<Mailbox>> = self
            .mailboxes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        targets
            .iter()
            .filter(|mailbox| mailbox.push(message.clone()))
            .count()
    }

    pub fn is_online(&self, username: &str) -> bool {
        self.mailboxes.contains_key(username)
    }

    /// Connected usernames, sorted.
    pub fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.mailboxes.iter().map(|e| e.key().clone()).collect();
        users.sort();
        users
    }

    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }
}
