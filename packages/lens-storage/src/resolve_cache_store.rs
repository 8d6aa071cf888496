//! `resolve_cache.db` — memoizes resolver output keyed by `(resolver, input_hash)`.
//!
//! Callers hash whatever they fed a resolver (a call-site snippet, a route
//! table fragment, ...) and look the result up before re-running regex or
//! LSP-backed resolution.

use crate::error::Result;
use crate::schema::RESOLVE_CACHE_SCHEMA;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;

pub struct ResolveCacheStore {
    path: PathBuf,
}

impl ResolveCacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(RESOLVE_CACHE_SCHEMA)?;
        Ok(conn)
    }

    pub fn get(&self, resolver: &str, input_hash: &str) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let conn = self.open()?;
        conn.query_row(
            "SELECT result FROM resolve_cache WHERE resolver = ?1 AND input_hash = ?2",
            params![resolver, input_hash],
            |r| r.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn put(&self, resolver: &str, input_hash: &str, result: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO resolve_cache (resolver, input_hash, result) VALUES (?1, ?2, ?3)
             ON CONFLICT(resolver, input_hash) DO UPDATE SET result = excluded.result",
            params![resolver, input_hash, result],
        )?;
        Ok(())
    }

    /// Drop all cached entries for a resolver (used when its pattern table changes).
    pub fn invalidate(&self, resolver: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "DELETE FROM resolve_cache WHERE resolver = ?1",
            params![resolver],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_then_get_roundtrips() {
        let dir = tempdir().unwrap();
        let store = ResolveCacheStore::new(dir.path().join("resolve_cache.db"));
        store.put("api_mapper", "deadbeef", "POST /users").unwrap();
        assert_eq!(
            store.get("api_mapper", "deadbeef").unwrap(),
            Some("POST /users".to_string())
        );
    }

    #[test]
    fn get_on_missing_db_is_none() {
        let dir = tempdir().unwrap();
        let store = ResolveCacheStore::new(dir.path().join("resolve_cache.db"));
        assert_eq!(store.get("api_mapper", "x").unwrap(), None);
    }

    #[test]
    fn put_overwrites_existing_entry() {
        let dir = tempdir().unwrap();
        let store = ResolveCacheStore::new(dir.path().join("resolve_cache.db"));
        store.put("sql_mapper", "h1", "first").unwrap();
        store.put("sql_mapper", "h1", "second").unwrap();
        assert_eq!(
            store.get("sql_mapper", "h1").unwrap(),
            Some("second".to_string())
        );
    }

    #[test]
    fn invalidate_clears_only_named_resolver() {
        let dir = tempdir().unwrap();
        let store = ResolveCacheStore::new(dir.path().join("resolve_cache.db"));
        store.put("api_mapper", "h1", "a").unwrap();
        store.put("sql_mapper", "h1", "b").unwrap();
        store.invalidate("api_mapper").unwrap();
        assert_eq!(store.get("api_mapper", "h1").unwrap(), None);
        assert_eq!(store.get("sql_mapper", "h1").unwrap(), Some("b".to_string()));
    }
}
