//! `history.db` — append-only change log backing undo and blame-style queries.

use crate::error::Result;
use crate::model::{Change, ChangeAction};
use crate::schema::HISTORY_SCHEMA;
use rusqlite::{params, Connection};
use std::path::PathBuf;
use std::str::FromStr;

pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(HISTORY_SCHEMA)?;
        Ok(conn)
    }

    /// Append a change record, returning the assigned id.
    pub fn record(&self, change: &Change) -> Result<i64> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO changes (timestamp, node_id, action, old_source, new_source,
                old_hash, new_hash, affected_nodes, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                change.timestamp,
                change.node_id,
                change.action.as_str(),
                change.old_source,
                change.new_source,
                change.old_hash,
                change.new_hash,
                serde_json::to_string(&change.affected_nodes)?,
                change.description,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn for_node(&self, node_id: &str) -> Result<Vec<Change>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, node_id, action, old_source, new_source, old_hash,
                    new_hash, affected_nodes, description
             FROM changes WHERE node_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![node_id], row_to_change)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn recent(&self, limit: u32) -> Result<Vec<Change>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, node_id, action, old_source, new_source, old_hash,
                    new_hash, affected_nodes, description
             FROM changes ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_change)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Latest recorded change for a node, used by `undo`.
    pub fn last_for_node(&self, node_id: &str) -> Result<Option<Change>> {
        Ok(self.for_node(node_id)?.into_iter().last())
    }
}

fn row_to_change(r: &rusqlite::Row<'_>) -> rusqlite::Result<Change> {
    let action: String = r.get(3)?;
    let affected_raw: String = r.get(8)?;
    Ok(Change {
        id: r.get(0)?,
        timestamp: r.get(1)?,
        node_id: r.get(2)?,
        action: ChangeAction::from_str(&action)
            .unwrap_or(ChangeAction::Modified),
        old_source: r.get(4)?,
        new_source: r.get(5)?,
        old_hash: r.get(6)?,
        new_hash: r.get(7)?,
        affected_nodes: serde_json::from_str(&affected_raw).unwrap_or_default(),
        description: r.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_change(node_id: &str) -> Change {
        Change {
            id: 0,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            node_id: node_id.to_string(),
            action: ChangeAction::Modified,
            old_source: Some("old".to_string()),
            new_source: Some("new".to_string()),
            old_hash: "aaa".to_string(),
            new_hash: "bbb".to_string(),
            affected_nodes: vec!["a.caller".to_string()],
            description: "patch".to_string(),
        }
    }

    #[test]
    fn record_and_query_for_node() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.db"));
        store.record(&sample_change("a.f")).unwrap();
        store.record(&sample_change("b.g")).unwrap();

        let changes = store.for_node("a.f").unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].node_id, "a.f");
        assert_eq!(changes[0].affected_nodes, vec!["a.caller".to_string()]);
    }

    #[test]
    fn recent_orders_newest_first() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.db"));
        store.record(&sample_change("a.f")).unwrap();
        store.record(&sample_change("b.g")).unwrap();

        let changes = store.recent(10).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].node_id, "b.g");
    }

    #[test]
    fn last_for_node_on_empty_db_is_none() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.db"));
        assert!(store.last_for_node("missing").unwrap().is_none());
    }
}
