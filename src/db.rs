use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::story::LocalStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    pub session_id: String,
    pub csrf_token: String,
    pub username: String,
    pub saved_at: String,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_blobs (
                namespace TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS session_credentials (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                session_id TEXT NOT NULL,
                csrf_token TEXT NOT NULL,
                username TEXT NOT NULL,
                saved_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn load_blob(&self, namespace: &str) -> Result<Option<String>> {
        let payload = self
            .conn
            .query_row(
                "SELECT payload FROM ledger_blobs WHERE namespace = ?1",
                params![namespace],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload)
    }

    pub fn store_blob(&self, namespace: &str, payload: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            r#"
            INSERT INTO ledger_blobs (namespace, payload, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(namespace) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
            params![namespace, payload, now],
        )?;
        Ok(())
    }

    pub fn save_credentials(
        &self,
        session_id: &str,
        csrf_token: &str,
        username: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            r#"
            INSERT INTO session_credentials (id, session_id, csrf_token, username, saved_at)
            VALUES (1, ?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                session_id = excluded.session_id,
                csrf_token = excluded.csrf_token,
                username = excluded.username,
                saved_at = excluded.saved_at
            "#,
            params![session_id, csrf_token, username, now],
        )?;
        Ok(())
    }

    pub fn credentials(&self) -> Result<Option<SessionCredentials>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, csrf_token, username, saved_at FROM session_credentials WHERE id = 1",
        )?;
        let mut rows = stmt.query([])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(SessionCredentials {
                session_id: row.get(0)?,
                csrf_token: row.get(1)?,
                username: row.get(2)?,
                saved_at: row.get(3)?,
            }));
        }
        Ok(None)
    }

    pub fn clear_credentials(&self) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM session_credentials WHERE id = 1", [])?;
        Ok(removed > 0)
    }
}

impl LocalStore for Database {
    fn read_blob(&self, namespace: &str) -> Result<Option<String>> {
        self.load_blob(namespace)
            .with_context(|| format!("failed to read ledger blob `{namespace}`"))
    }

    fn write_blob(&self, namespace: &str, payload: &str) -> Result<()> {
        self.store_blob(namespace, payload)
            .with_context(|| format!("failed to write ledger blob `{namespace}`"))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::story::{EpisodeId, LEDGER_NAMESPACE, LocalLedger, VisitLedger};

    #[test]
    fn blob_upsert_replaces_previous_payload() -> Result<()> {
        let db = Database::open_in_memory()?;
        db.migrate()?;
        assert_eq!(db.load_blob(LEDGER_NAMESPACE)?, None);

        db.store_blob(LEDGER_NAMESPACE, "{\"viewedEpisodes\":[\"a\"]}")?;
        db.store_blob(LEDGER_NAMESPACE, "{\"viewedEpisodes\":[\"a\",\"b\"]}")?;
        assert_eq!(
            db.load_blob(LEDGER_NAMESPACE)?.as_deref(),
            Some("{\"viewedEpisodes\":[\"a\",\"b\"]}")
        );
        Ok(())
    }

    #[test]
    fn anonymous_ledger_survives_reopening_the_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("hisubtory.db");
        let ledger =
            VisitLedger::from_parts([EpisodeId::from("ep-gbg-1")], Vec::<EpisodeId>::new());
        {
            let db = Database::open(&path)?;
            db.migrate()?;
            let mut local = LocalLedger::new(&db);
            assert!(local.save(&ledger).is_none());
        }

        let db = Database::open(&path)?;
        db.migrate()?;
        assert_eq!(LocalLedger::new(&db).load(), ledger);
        Ok(())
    }

    #[test]
    fn missing_table_degrades_instead_of_failing() -> Result<()> {
        let db = Database::open_in_memory()?;
        let mut local = LocalLedger::new(&db);
        assert_eq!(local.load(), VisitLedger::default());
        assert!(!local.is_persistent());
        Ok(())
    }

    #[test]
    fn credentials_keep_a_single_row() -> Result<()> {
        let db = Database::open_in_memory()?;
        db.migrate()?;
        assert_eq!(db.credentials()?, None);

        db.save_credentials("s1", "c1", "rider")?;
        db.save_credentials("s2", "c2", "rider")?;
        let stored = db.credentials()?.expect("credentials stored");
        assert_eq!(stored.session_id, "s2");
        assert_eq!(stored.csrf_token, "c2");

        assert!(db.clear_credentials()?);
        assert!(!db.clear_credentials()?);
        assert_eq!(db.credentials()?, None);
        Ok(())
    }
}
