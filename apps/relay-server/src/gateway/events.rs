//! Wire format of the duplex chat stream.
//!
//! Every WebSocket text frame, in either direction, is one JSON-encoded
//! [`ChatMessage`].

use serde::{Deserialize, Serialize};

/// Sender identity of every server-originated message.
pub const SYSTEM_SENDER: &str = "System";

/// Content that tells a client to re-fetch its group list.
pub const UPDATE_GROUPS: &str = "UPDATE_GROUPS";

/// Content of the acknowledgement queued when a connection identifies.
pub const CONNECTED: &str = "Connected to chat server";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    #[default]
    Group,
    /// Keepalive only. Never authorized, persisted, or broadcast.
    Heartbeat,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, rename = "type")]
    pub kind: MessageType,
    /// Numeric group id as a string. Empty for heartbeats and system-wide messages.
    #[serde(default)]
    pub group_id: String,
    /// Unix seconds, set from the message log when a message was persisted.
    /// Never read from clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl ChatMessage {
    /// A group chat message as a client would send it.
    pub fn group(sender: impl Into<String>, group_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
            kind: MessageType::Group,
            group_id: group_id.into(),
            timestamp: None,
        }
    }

    pub fn heartbeat(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            kind: MessageType::Heartbeat,
            ..Self::default()
        }
    }

    /// A server notification. `group_id` is empty for notifications that
    /// are not about one group.
    pub fn system(content: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self::group(SYSTEM_SENDER, group_id, content)
    }

    /// The idle-guard heartbeat the server emits.
    pub fn system_heartbeat() -> Self {
        Self::heartbeat(SYSTEM_SENDER)
    }

    pub fn connected() -> Self {
        Self::system(CONNECTED, "")
    }

    pub fn update_groups() -> Self {
        Self::system(UPDATE_GROUPS, "")
    }

    pub fn is_heartbeat(&self) -> bool {
        self.kind == MessageType::Heartbeat
    }

    pub fn is_from_system(&self) -> bool {
        self.sender == SYSTEM_SENDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_frame_with_missing_fields() {
        let msg: ChatMessage = serde_json::from_str(r#"{"sender":"alice","type":"HEARTBEAT"}"#).unwrap();
        assert_eq!(msg.sender, "alice");
        assert!(msg.is_heartbeat());
        assert!(msg.content.is_empty());
        assert!(msg.group_id.is_empty());
    }

    #[test]
    fn type_defaults_to_group() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"sender":"alice","content":"hi","group_id":"1"}"#).unwrap();
        assert_eq!(msg.kind, MessageType::Group);
    }

    #[test]
    fn serializes_type_in_wire_case_and_omits_missing_timestamp() {
        let json = serde_json::to_value(ChatMessage::update_groups()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "sender": "System",
                "content": "UPDATE_GROUPS",
                "type": "GROUP",
                "group_id": "",
            })
        );
    }

    #[test]
    fn system_heartbeat_is_empty_keepalive() {
        let hb = ChatMessage::system_heartbeat();
        assert!(hb.is_heartbeat());
        assert!(hb.is_from_system());
        assert!(hb.content.is_empty());
    }
}
