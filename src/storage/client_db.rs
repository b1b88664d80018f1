use rusqlite::{Connection, OptionalExtension, Result as SqlResult, params};
use std::path::Path;

use super::models::StoredSession;

const DARK_MODE_KEY: &str = "dark_mode";

/// Local client state: the persisted sign-in and UI preferences.
pub struct ClientDatabase {
    conn: Connection,
}

impl ClientDatabase {
    /// Open (or create) the database file at `path`
    pub fn with_path<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> SqlResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqlResult<Self> {
        let client_db = Self { conn };
        client_db.init_schema()?;
        Ok(client_db)
    }

    fn init_schema(&self) -> SqlResult<()> {
        // Session table (single row)
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS session (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                uid TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS preferences (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    // ========== Session ==========

    /// Save the signed-in user (replace if exists)
    pub fn save_session(&self, uid: &str, refresh_token: &str) -> SqlResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO session (id, uid, refresh_token, updated_at)
             VALUES (1, ?1, ?2, strftime('%s', 'now'))",
            params![uid, refresh_token],
        )?;
        Ok(())
    }

    pub fn load_session(&self) -> SqlResult<Option<StoredSession>> {
        self.conn
            .query_row(
                "SELECT uid, refresh_token, updated_at FROM session WHERE id = 1",
                [],
                |row| {
                    Ok(StoredSession {
                        uid: row.get(0)?,
                        refresh_token: row.get(1)?,
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()
    }

    pub fn clear_session(&self) -> SqlResult<()> {
        self.conn.execute("DELETE FROM session", [])?;
        Ok(())
    }

    // ========== Preferences ==========

    pub fn set_preference(&self, key: &str, value: &str) -> SqlResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO preferences (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn preference(&self, key: &str) -> SqlResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
    }

    /// Dark mode is the default until the user picks otherwise.
    pub fn dark_mode(&self) -> SqlResult<bool> {
        Ok(self
            .preference(DARK_MODE_KEY)?
            .map(|value| value != "0")
            .unwrap_or(true))
    }

    pub fn set_dark_mode(&self, dark_mode: bool) -> SqlResult<()> {
        self.set_preference(DARK_MODE_KEY, if dark_mode { "1" } else { "0" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_round_trip_and_clear() {
        let db = ClientDatabase::in_memory().unwrap();
        assert_eq!(db.load_session().unwrap(), None);

        db.save_session("u1", "r1").unwrap();
        db.save_session("u2", "r2").unwrap();
        let session = db.load_session().unwrap().unwrap();
        assert_eq!(session.uid, "u2");
        assert_eq!(session.refresh_token, "r2");

        db.clear_session().unwrap();
        assert_eq!(db.load_session().unwrap(), None);
    }

    #[test]
    fn dark_mode_defaults_on_and_persists() {
        let db = ClientDatabase::in_memory().unwrap();
        assert!(db.dark_mode().unwrap());

        db.set_dark_mode(false).unwrap();
        assert!(!db.dark_mode().unwrap());
        assert_eq!(db.preference("dark_mode").unwrap().as_deref(), Some("0"));
    }
}
