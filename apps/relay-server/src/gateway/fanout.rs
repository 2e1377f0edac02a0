//! Group broadcast authority: decides whether a chat message may be
//! persisted and which mailboxes receive it, and originates system
//! notifications.
//!
//! A message is only ever enqueued after the message log accepted it, and
//! delivery uses the membership snapshot taken right after persistence.
//! Failures on the streaming path are logged and dropped; the stream has no
//! error channel.

use std::sync::Arc;

use thiserror::Error;

use super::events::{ChatMessage, MessageType};
use super::registry::SessionRegistry;
use crate::store::{Storage, StoreError};

/// Why an inbound message was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Heartbeat,
    EmptyContent,
    UnknownSender,
    InvalidGroup,
    NotMember,
    StorageFailure,
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A `System` message, queued for everyone online and not persisted.
    SystemBroadcast { reached: usize },
    /// Persisted, then queued for these online members.
    Delivered {
        message_id: i64,
        recipients: Vec<String>,
    },
    Dropped(DropReason),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InviteError {
    #[error("Group not found")]
    GroupNotFound,
    #[error("You are not a member of this group")]
    InviterNotMember,
    #[error("User not found")]
    UnknownInvitee,
    #[error("User is already a member of this group")]
    AlreadyMember,
    #[error("Failed to invite user: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteOutcome {
    pub group_name: String,
    /// The invitee was online and got the invitation live.
    pub invitee_notified: bool,
    /// Other online members told about the join.
    pub members_notified: usize,
}

#[derive(Clone)]
pub struct BroadcastAuthority {
    storage: Storage,
    sessions: Arc<SessionRegistry>,
}

impl BroadcastAuthority {
    pub fn new(storage: Storage, sessions: Arc<SessionRegistry>) -> Self {
        Self { storage, sessions }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Authorize, persist, and fan out one inbound chat message.
    pub async fn authorize_and_route(&self, message: &ChatMessage) -> RouteOutcome {
        if message.kind == MessageType::Heartbeat {
            return RouteOutcome::Dropped(DropReason::Heartbeat);
        }
        if message.content.is_empty() {
            return RouteOutcome::Dropped(DropReason::EmptyContent);
        }

        if message.is_from_system() {
            let relayed = ChatMessage::system(message.content.as_str(), message.group_id.as_str());
            let reached = self.announce_message(&relayed);
            return RouteOutcome::SystemBroadcast { reached };
        }

        let sender = message.sender.as_str();
        match self.storage.find_user(sender).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!(%sender, "dropping message from unknown sender");
                return RouteOutcome::Dropped(DropReason::UnknownSender);
            }
            Err(err) => {
                tracing::error!(%sender, error = %err, "sender lookup failed, dropping message");
                return RouteOutcome::Dropped(DropReason::StorageFailure);
            }
        }

        let Ok(group_id) = message.group_id.trim().parse::<i64>() else {
            tracing::warn!(%sender, group_id = %message.group_id, "dropping message with invalid group id");
            return RouteOutcome::Dropped(DropReason::InvalidGroup);
        };

        match self.storage.is_member(sender, group_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(%sender, group_id, "dropping message from non-member");
                return RouteOutcome::Dropped(DropReason::NotMember);
            }
            Err(err) => {
                tracing::error!(%sender, group_id, error = %err, "membership check failed, dropping message");
                return RouteOutcome::Dropped(DropReason::StorageFailure);
            }
        }

        let stored = match self
            .storage
            .append_message(group_id, sender, &message.content, MessageType::Group)
            .await
        {
            Ok(stored) => stored,
            Err(err) => {
                tracing::error!(%sender, group_id, error = %err, "failed to persist message, not broadcasting");
                return RouteOutcome::Dropped(DropReason::StorageFailure);
            }
        };

        let members = match self.storage.members_of(group_id).await {
            Ok(members) => members,
            Err(err) => {
                // Already durable; members replay it from history.
                tracing::error!(
                    message_id = stored.id,
                    group_id,
                    error = %err,
                    "membership snapshot failed, message persisted but not delivered live"
                );
                return RouteOutcome::Delivered {
                    message_id: stored.id,
                    recipients: Vec::new(),
                };
            }
        };

        let outgoing = ChatMessage {
            sender: stored.sender.clone(),
            content: stored.content.clone(),
            kind: MessageType::Group,
            group_id: group_id.to_string(),
            timestamp: Some(stored.created_at.timestamp()),
        };

        let recipients: Vec<String> = members
            .into_iter()
            .filter(|member| member != sender)
            .filter(|member| self.sessions.enqueue(member, outgoing.clone()))
            .collect();

        tracing::debug!(
            message_id = stored.id,
            group_id,
            %sender,
            recipients = recipients.len(),
            "group message delivered"
        );

        RouteOutcome::Delivered {
            message_id: stored.id,
            recipients,
        }
    }

    /// Add `invitee` to the group on behalf of `inviter`, then notify.
    ///
    /// Notifications go out only after the membership row committed. The
    /// invitee (if online) gets a personal notice and a group-list refresh;
    /// every other online member is told who joined.
    pub async fn invite_user(
        &self,
        group_id: i64,
        inviter: &str,
        invitee: &str,
    ) -> Result<InviteOutcome, InviteError> {
        let group = self
            .storage
            .find_group(group_id)
            .await?
            .ok_or(InviteError::GroupNotFound)?;

        if !self.storage.is_member(inviter, group_id).await? {
            return Err(InviteError::InviterNotMember);
        }
        if self.storage.find_user(invitee).await?.is_none() {
            return Err(InviteError::UnknownInvitee);
        }
        if self.storage.is_member(invitee, group_id).await? {
            return Err(InviteError::AlreadyMember);
        }

        match self.storage.add_member(invitee, group_id).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(InviteError::AlreadyMember),
            Err(err) => {
                tracing::error!(group_id, %inviter, %invitee, error = %err, "invite membership write failed");
                return Err(err.into());
            }
        }

        tracing::info!(group_id, %inviter, %invitee, "user added to group by invite");

        let gid = group_id.to_string();
        let invitee_notified = self.sessions.enqueue(
            invitee,
            ChatMessage::system(
                format!("You have been invited to group '{}' by {inviter}", group.name),
                gid.as_str(),
            ),
        );
        if invitee_notified {
            self.sessions.enqueue(invitee, ChatMessage::update_groups());
        }

        let members_notified = match self.storage.members_of(group_id).await {
            Ok(members) => {
                let joined = ChatMessage::system(
                    format!("{invitee} has joined the group '{}'", group.name),
                    gid.as_str(),
                );
                members
                    .iter()
                    .filter(|member| member.as_str() != invitee)
                    .filter(|member| self.sessions.enqueue(member, joined.clone()))
                    .count()
            }
            Err(err) => {
                tracing::warn!(group_id, error = %err, "could not load members for join notice");
                0
            }
        };

        Ok(InviteOutcome {
            group_name: group.name,
            invitee_notified,
            members_notified,
        })
    }

    /// Server-originated announcement to everyone online. Not persisted.
    pub fn announce(&self, content: &str) -> usize {
        self.announce_message(&ChatMessage::system(content, ""))
    }

    fn announce_message(&self, message: &ChatMessage) -> usize {
        let reached = self.sessions.broadcast(message);
        tracing::info!(reached, "system message broadcast");
        reached
    }
}
