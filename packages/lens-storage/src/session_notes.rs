//! `session.db` — a small key/value note pad scoped to one working session.
//!
//! Supplements the graph store with free-form context an agent wants to
//! carry between tool calls (a running summary, a scratch TODO list) that
//! doesn't belong in the code graph itself.

use crate::error::Result;
use crate::schema::SESSION_SCHEMA;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;

pub struct SessionNotes {
    path: PathBuf,
}

impl SessionNotes {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SESSION_SCHEMA)?;
        Ok(conn)
    }

    pub fn set(&self, key: &str, value: &str, updated_at: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO session_notes (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, updated_at],
        )?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let conn = self.open()?;
        conn.query_row(
            "SELECT value FROM session_notes WHERE key = ?1",
            params![key],
            |r| r.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute("DELETE FROM session_notes WHERE key = ?1", params![key])?;
        Ok(())
    }

    pub fn all(&self) -> Result<Vec<(String, String)>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT key, value FROM session_notes ORDER BY key ASC")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn set_then_get() {
        let dir = tempdir().unwrap();
        let notes = SessionNotes::new(dir.path().join("session.db"));
        notes.set("summary", "refactoring auth", "2026-01-01T00:00:00Z").unwrap();
        assert_eq!(
            notes.get("summary").unwrap(),
            Some("refactoring auth".to_string())
        );
    }

    #[test]
    fn delete_removes_key() {
        let dir = tempdir().unwrap();
        let notes = SessionNotes::new(dir.path().join("session.db"));
        notes.set("todo", "write tests", "2026-01-01T00:00:00Z").unwrap();
        notes.delete("todo").unwrap();
        assert_eq!(notes.get("todo").unwrap(), None);
    }

    #[test]
    fn all_returns_sorted_entries() {
        let dir = tempdir().unwrap();
        let notes = SessionNotes::new(dir.path().join("session.db"));
        notes.set("b", "2", "2026-01-01T00:00:00Z").unwrap();
        notes.set("a", "1", "2026-01-01T00:00:00Z").unwrap();
        let all = notes.all().unwrap();
        assert_eq!(all, vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]);
    }
}
