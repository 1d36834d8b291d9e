//! Collaborator interfaces the relay flows consume, and their SQLite
//! implementation.

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use tracing::warn;
use uuid::Uuid;

use cloak_crypto::Key;
use cloak_db::Database;
use cloak_db::models::{MessageRow, UserRow};
use cloak_types::models::{Message, User};

pub trait KeyStore: Send + Sync + 'static {
    fn get_user(&self, user_id: Uuid) -> Result<Option<User>>;

    /// `None` when the user has no usable key credential.
    fn get_user_key(&self, user_id: Uuid) -> Result<Option<Key>>;
}

pub trait MessageStore: Send + Sync + 'static {
    /// Persist a new row with `is_read = false`. Assigns id and timestamp.
    fn create_message(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        encrypted_content: &str,
        delivered: bool,
    ) -> Result<Message>;

    /// Both directions of a conversation, oldest first.
    fn fetch_messages_between(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>>;

    fn mark_messages_read_and_delivered(&self, ids: &[Uuid]) -> Result<()>;
}

impl KeyStore for Database {
    fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        Ok(self.get_user_by_id(&user_id.to_string())?.map(user_from_row))
    }

    fn get_user_key(&self, user_id: Uuid) -> Result<Option<Key>> {
        let credential = self.get_key_credential(&user_id.to_string())?;
        Ok(credential
            .filter(|c| !c.trim_matches('\0').is_empty())
            .map(|c| Key::from_credential(&c)))
    }
}

impl MessageStore for Database {
    fn create_message(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        encrypted_content: &str,
        delivered: bool,
    ) -> Result<Message> {
        let id = Uuid::new_v4();
        // Stored with microsecond precision
        let created_at = Utc::now().trunc_subsecs(6);

        self.insert_message(
            &id.to_string(),
            &sender_id.to_string(),
            &receiver_id.to_string(),
            encrypted_content,
            delivered,
            &created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        )?;

        Ok(Message {
            id,
            sender_id,
            receiver_id,
            encrypted_content: encrypted_content.to_string(),
            is_delivered: delivered,
            is_read: false,
            created_at,
        })
    }

    fn fetch_messages_between(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>> {
        let rows = self.get_messages_between(&a.to_string(), &b.to_string())?;
        Ok(rows.into_iter().filter_map(message_from_row).collect())
    }

    fn mark_messages_read_and_delivered(&self, ids: &[Uuid]) -> Result<()> {
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        Database::mark_messages_read_and_delivered(self, &ids)?;
        Ok(())
    }
}

pub(crate) fn user_from_row(row: UserRow) -> User {
    User {
        id: row.id.parse().unwrap_or_else(|e| {
            warn!("Corrupt user id '{}': {}", row.id, e);
            Uuid::default()
        }),
        created_at: parse_timestamp(&row.created_at),
        username: row.username,
        is_online: row.is_online,
    }
}

/// Rows whose ids do not parse are skipped: a message we cannot address
/// cannot be marked read or relayed.
fn message_from_row(row: MessageRow) -> Option<Message> {
    let parse = |field: &str, value: &str| match value.parse::<Uuid>() {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Corrupt {} '{}' on message '{}': {}", field, value, row.id, e);
            None
        }
    };

    Some(Message {
        id: parse("id", &row.id)?,
        sender_id: parse("sender_id", &row.sender_id)?,
        receiver_id: parse("receiver_id", &row.receiver_id)?,
        created_at: parse_timestamp(&row.created_at),
        encrypted_content: row.encrypted_content,
        is_delivered: row.is_delivered,
        is_read: row.is_read,
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') default is "YYYY-MM-DD HH:MM:SS" without timezone.
            // Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_comes_from_stored_credential() {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        db.create_user(&id.to_string(), "ayse", "sender88", b"png").unwrap();

        assert_eq!(db.get_user_key(id).unwrap(), Some(Key::from_credential("sender88")));
        assert_eq!(db.get_user_key(Uuid::new_v4()).unwrap(), None);

        let user = db.get_user(id).unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.username, "ayse");
    }

    #[test]
    fn blank_credential_has_no_key() {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        db.create_user(&id.to_string(), "ayse", "\0\0\0\0\0\0\0\0", b"png").unwrap();
        assert_eq!(db.get_user_key(id).unwrap(), None);
    }

    #[test]
    fn created_messages_read_back_identically() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        db.create_user(&a.to_string(), "ayse", "sender88", b"png").unwrap();
        db.create_user(&b.to_string(), "bora", "receive8", b"png").unwrap();

        let first = db.create_message(a, b, "c1", false).unwrap();
        let second = db.create_message(b, a, "c2", true).unwrap();

        let fetched = db.fetch_messages_between(a, b).unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].id, first.id);
        assert_eq!(fetched[0].created_at, first.created_at);
        assert_eq!(fetched[1].id, second.id);
        assert!(fetched[1].is_delivered && !fetched[1].is_read);

        MessageStore::mark_messages_read_and_delivered(&db, &[first.id]).unwrap();
        let fetched = db.fetch_messages_between(b, a).unwrap();
        assert!(fetched[0].is_read && fetched[0].is_delivered);
    }

    #[test]
    fn sqlite_default_timestamps_parse() {
        let ts = parse_timestamp("2026-03-01 12:30:00");
        assert_eq!(ts.to_rfc3339(), "2026-03-01T12:30:00+00:00");
    }
}
