use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, MessageStatus};

/// Events sent over the WebSocket gateway.
///
/// Wire format is a flat JSON object tagged by `type`, e.g.
/// `{"type":"status","user_id":"…","username":"ayse","is_online":true}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Server confirms the socket is registered
    Ready { user_id: Uuid, username: String },

    /// A user came online or went offline
    Status {
        user_id: Uuid,
        username: String,
        is_online: bool,
    },

    /// A freshly relayed message
    Message {
        message_id: Uuid,
        sender_id: Uuid,
        receiver_id: Uuid,
        encrypted_content: String,
        status: MessageStatus,
        created_at: DateTime<Utc>,
    },

    /// Reply to a client `ping` frame
    Pong,
}

impl GatewayEvent {
    /// Build a message event for `message`, carrying `encrypted_content`
    /// (which may differ from the stored ciphertext, e.g. the sender echo).
    pub fn message(message: &Message, encrypted_content: String) -> Self {
        Self::Message {
            message_id: message.id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            encrypted_content,
            status: message.status(),
            created_at: message.created_at,
        }
    }
}

/// Frames sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Application-level keepalive
    Ping,
}
