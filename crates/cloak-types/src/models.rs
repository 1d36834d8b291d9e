use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    /// Mirror of socket presence kept for directory queries.
    /// Routing decisions use the connection registry, never this flag.
    pub is_online: bool,
    pub created_at: DateTime<Utc>,
}

/// A relayed message as persisted by the server.
/// `encrypted_content` is always keyed to the receiver, never the sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub encrypted_content: String,
    pub is_delivered: bool,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn status(&self) -> MessageStatus {
        MessageStatus::from_flags(self.is_delivered, self.is_read)
    }
}

/// Delivery status, derived from the two stored flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn from_flags(is_delivered: bool, is_read: bool) -> Self {
        if is_read {
            Self::Read
        } else if is_delivered {
            Self::Delivered
        } else {
            Self::Sent
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_derived_from_flags() {
        assert_eq!(MessageStatus::from_flags(false, false), MessageStatus::Sent);
        assert_eq!(MessageStatus::from_flags(true, false), MessageStatus::Delivered);
        assert_eq!(MessageStatus::from_flags(true, true), MessageStatus::Read);
        // read wins even if a row were somehow missing the delivered flag
        assert_eq!(MessageStatus::from_flags(false, true), MessageStatus::Read);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&MessageStatus::Delivered).unwrap();
        assert_eq!(json, "\"delivered\"");
        assert_eq!(MessageStatus::Read.to_string(), "read");
    }
}
