pub mod migrations;
pub mod models;
pub mod queries;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// The user and message store. One connection, shared behind a mutex;
/// every query takes the lock for its whole duration.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("opening database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::init(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Fresh private database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_databases_enforce_foreign_keys() {
        let db = Database::open_in_memory().unwrap();
        let err = db.insert_message("m", "ghost", "nobody", "c", false, "2026-01-01T00:00:00Z");
        assert!(err.is_err());
    }

    #[test]
    fn file_database_reopens_with_data() {
        let path = std::env::temp_dir().join(format!("cloak-db-{}.db", std::process::id()));
        {
            let db = Database::open(&path).unwrap();
            db.create_user("a", "ayse", "sender88", b"png").unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert!(db.get_user_by_id("a").unwrap().is_some());

        drop(db);
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }
}
