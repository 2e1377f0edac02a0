//! Per-connection state machine: UNIDENTIFIED → ACTIVE → TERMINATED.
//!
//! Transport independent. The WebSocket loop in `server.rs` feeds inbound
//! messages in and writes whatever comes back out.

use std::sync::Arc;

use relay_common::id::{prefix, prefixed_ulid};

use super::events::{ChatMessage, MessageType, SYSTEM_SENDER};
use super::fanout::{BroadcastAuthority, RouteOutcome};
use super::registry::Mailbox;

enum ConnectionState {
    /// No mailbox yet; the first message with a sender identifies.
    Unidentified,
    Active {
        username: String,
        mailbox: Arc<Mailbox>,
    },
    Terminated,
}

pub struct StreamHandler {
    connection_id: String,
    authority: BroadcastAuthority,
    state: ConnectionState,
}

impl StreamHandler {
    pub fn new(authority: BroadcastAuthority) -> Self {
        Self {
            connection_id: prefixed_ulid(prefix::CONNECTION),
            authority,
            state: ConnectionState::Unidentified,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn username(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Active { username, .. } => Some(username),
            _ => None,
        }
    }

    pub fn mailbox(&self) -> Option<&Arc<Mailbox>> {
        match &self.state {
            ConnectionState::Active { mailbox, .. } => Some(mailbox),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ConnectionState::Active { .. })
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, ConnectionState::Terminated)
    }

    /// Whether a newer connection for the same user took over the mailbox.
    pub fn is_replaced(&self) -> bool {
        self.mailbox().is_some_and(|mailbox| !mailbox.is_live())
    }

    /// Process one inbound message and return what must be written back,
    /// oldest first.
    pub async fn handle_inbound(&mut self, mut message: ChatMessage) -> Vec<ChatMessage> {
        if self.is_terminated() {
            return Vec::new();
        }
        if matches!(self.state, ConnectionState::Unidentified) && !self.identify(&message.sender) {
            return Vec::new();
        }

        if self.is_replaced() {
            self.terminate();
            return Vec::new();
        }

        let username = self.username().unwrap_or_default().to_string();
        if message.sender != username && message.sender != SYSTEM_SENDER {
            tracing::debug!(
                connection_id = %self.connection_id,
                %username,
                claimed = %message.sender,
                "re-attributing message to connection identity"
            );
            message.sender = username;
        }
        // Timestamps are assigned on persistence only.
        message.timestamp = None;

        match message.kind {
            MessageType::Heartbeat => {
                tracing::trace!(connection_id = %self.connection_id, "heartbeat");
            }
            MessageType::Group if message.content.is_empty() => {}
            MessageType::Group => {
                let outcome = self.authority.authorize_and_route(&message).await;
                if let RouteOutcome::Dropped(reason) = outcome {
                    tracing::debug!(connection_id = %self.connection_id, ?reason, "inbound message dropped");
                }
            }
        }

        self.drain()
    }

    /// Everything queued for this connection, oldest first.
    pub fn drain(&self) -> Vec<ChatMessage> {
        self.mailbox().map(|mailbox| mailbox.drain()).unwrap_or_default()
    }

    /// Release the mailbox. Safe to call any number of times, from any exit
    /// path; also runs on drop.
    pub fn terminate(&mut self) -> bool {
        let previous = std::mem::replace(&mut self.state, ConnectionState::Terminated);
        match previous {
            ConnectionState::Active { username, mailbox } => {
                let released = self.authority.sessions().release(&username, &mailbox);
                tracing::info!(
                    connection_id = %self.connection_id,
                    %username,
                    released,
                    "chat session ended"
                );
                released
            }
            _ => false,
        }
    }

    fn identify(&mut self, sender: &str) -> bool {
        let sender = sender.trim();
        if sender.is_empty() || sender == SYSTEM_SENDER {
            tracing::debug!(
                connection_id = %self.connection_id,
                %sender,
                "ignoring message that cannot identify the connection"
            );
            return false;
        }

        let mailbox = self
            .authority
            .sessions()
            .register(sender, &self.connection_id);
        mailbox.push(ChatMessage::connected());
        mailbox.push(ChatMessage::update_groups());

        tracing::info!(
            connection_id = %self.connection_id,
            username = %sender,
            online = self.authority.sessions().len(),
            "chat session established"
        );

        self.state = ConnectionState::Active {
            username: sender.to_string(),
            mailbox,
        };
        true
    }
}

impl Drop for StreamHandler {
    fn drop(&mut self) {
        self.terminate();
    }
}
