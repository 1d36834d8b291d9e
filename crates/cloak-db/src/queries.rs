use crate::Database;
use crate::models::{MessageRow, UserListRow, UserRow};
use anyhow::Result;
use rusqlite::{Connection, Row};

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        key_credential: &str,
        stego_image: &[u8],
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, key_credential, stego_image) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, username, key_credential, stego_image],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// The stored key credential, or `None` if the user does not exist.
    pub fn get_key_credential(&self, id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT key_credential FROM users WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn get_stego_image(&self, id: &str) -> Result<Option<Vec<u8>>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT stego_image FROM users WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()
        })
    }

    /// Update the mirrored presence flag. Returns false if the user is unknown.
    pub fn set_user_online(&self, id: &str, online: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET is_online = ?2 WHERE id = ?1",
                rusqlite::params![id, online],
            )?;
            Ok(changed > 0)
        })
    }

    /// All users with the number of messages each has sent `viewer_id`
    /// that `viewer_id` has not read yet.
    pub fn list_users(&self, viewer_id: &str) -> Result<Vec<UserListRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.is_online,
                        (SELECT COUNT(*) FROM messages m
                          WHERE m.sender_id = u.id AND m.receiver_id = ?1 AND m.is_read = 0)
                 FROM users u
                 ORDER BY u.username",
            )?;

            let rows = stmt
                .query_map([viewer_id], |row| {
                    Ok(UserListRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        is_online: row.get(2)?,
                        unread_count: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        sender_id: &str,
        receiver_id: &str,
        encrypted_content: &str,
        is_delivered: bool,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, encrypted_content, is_delivered, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                rusqlite::params![id, sender_id, receiver_id, encrypted_content, is_delivered, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, sender_id, receiver_id, encrypted_content, is_delivered, is_read, created_at
                 FROM messages WHERE id = ?1",
                [id],
                message_from_row,
            )
            .optional()
        })
    }

    /// Every message exchanged between `a` and `b`, oldest first.
    pub fn get_messages_between(&self, a: &str, b: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, encrypted_content, is_delivered, is_read, created_at
                 FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC, rowid ASC",
            )?;

            let rows = stmt
                .query_map([a, b], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Set `is_read` and `is_delivered` on every listed message in one
    /// statement. Flags only ever move to true. Returns the rows touched.
    pub fn mark_messages_read_and_delivered(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "UPDATE messages SET is_read = 1, is_delivered = 1 WHERE id IN ({})",
                placeholders.join(", ")
            );

            let params: Vec<&dyn rusqlite::types::ToSql> = ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            Ok(conn.execute(&sql, params.as_slice())?)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is always one of our own literals, never user input.
    let sql = format!(
        "SELECT id, username, key_credential, is_online, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    stmt.query_row([value], |row| {
        Ok(UserRow {
            id: row.get(0)?,
            username: row.get(1)?,
            key_credential: row.get(2)?,
            is_online: row.get(3)?,
            created_at: row.get(4)?,
        })
    })
    .optional()
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        encrypted_content: row.get(3)?,
        is_delivered: row.get(4)?,
        is_read: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
