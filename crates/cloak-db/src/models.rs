//! Database row types. These map directly to SQLite rows and stay distinct
//! from the cloak-types models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub key_credential: String,
    pub is_online: bool,
    pub created_at: String,
}

/// A directory entry as seen by one viewer.
pub struct UserListRow {
    pub id: String,
    pub username: String,
    pub is_online: bool,
    pub unread_count: u32,
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub encrypted_content: String,
    pub is_delivered: bool,
    pub is_read: bool,
    pub created_at: String,
}
