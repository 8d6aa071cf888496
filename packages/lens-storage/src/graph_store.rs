//! `graph.db` — nodes, edges, fingerprints, and precomputed class metrics.

use crate::error::{Result, StorageError};
use crate::model::{
    ChangeAction, ClassMetrics, Edge, EdgeConfidence, EdgeKind, EdgeSource, FileFingerprint, Node,
    NodeKind,
};
use crate::schema::GRAPH_SCHEMA;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Handle to the `graph.db` sidecar file. Opens a fresh connection per
/// operation (spec §5: "no connection is shared across threads").
pub struct GraphStore {
    path: PathBuf,
}

impl GraphStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(GRAPH_SCHEMA)?;
        Ok(conn)
    }

    /// Overwrite all nodes and edges (used by `full_sync`).
    pub fn save_graph(&self, nodes: &[Node], edges: &[Edge]) -> Result<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM nodes", [])?;
        tx.execute("DELETE FROM edges", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO nodes (id, kind, name, qualified_name, file_path, start_line,
                    end_line, source_code, docstring, signature, hash, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for n in nodes {
                stmt.execute(params![
                    n.id,
                    n.kind.as_str(),
                    n.name,
                    n.qualified_name,
                    n.file_path,
                    n.start_line,
                    n.end_line,
                    n.source_code,
                    n.docstring,
                    n.signature,
                    n.hash,
                    serde_json::to_string(&n.metadata)?,
                ])?;
            }
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO edges (id, from_node, to_node, kind, line_number, column_number,
                    confidence, source, untracked_reason, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for e in edges {
                stmt.execute(params![
                    e.id,
                    e.from_node,
                    e.to_node,
                    e.kind.as_str(),
                    e.line_number,
                    e.column,
                    e.confidence.as_str(),
                    source_as_str(e.source),
                    e.untracked_reason,
                    serde_json::to_string(&e.metadata)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove all nodes/edges belonging to `file_path` and any edge
    /// touching them, then insert freshly-parsed replacements.
    pub fn replace_file(
        &self,
        file_path: &str,
        new_nodes: &[Node],
        new_edges: &[Edge],
    ) -> Result<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let old_ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM nodes WHERE file_path = ?1")?;
            let rows = stmt.query_map(params![file_path], |r| r.get::<_, String>(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };
        tx.execute("DELETE FROM nodes WHERE file_path = ?1", params![file_path])?;
        for id in &old_ids {
            tx.execute(
                "DELETE FROM edges WHERE from_node = ?1 OR to_node = ?1",
                params![id],
            )?;
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO nodes (id, kind, name, qualified_name, file_path, start_line,
                    end_line, source_code, docstring, signature, hash, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for n in new_nodes {
                stmt.execute(params![
                    n.id,
                    n.kind.as_str(),
                    n.name,
                    n.qualified_name,
                    n.file_path,
                    n.start_line,
                    n.end_line,
                    n.source_code,
                    n.docstring,
                    n.signature,
                    n.hash,
                    serde_json::to_string(&n.metadata)?,
                ])?;
            }
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO edges (id, from_node, to_node, kind, line_number, column_number,
                    confidence, source, untracked_reason, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for e in new_edges {
                stmt.execute(params![
                    e.id,
                    e.from_node,
                    e.to_node,
                    e.kind.as_str(),
                    e.line_number,
                    e.column,
                    e.confidence.as_str(),
                    source_as_str(e.source),
                    e.untracked_reason,
                    serde_json::to_string(&e.metadata)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_graph(&self) -> Result<(Vec<Node>, Vec<Edge>)> {
        if !self.path.exists() {
            return Ok((Vec::new(), Vec::new()));
        }
        let conn = self.open()?;
        let nodes = {
            let mut stmt = conn.prepare(
                "SELECT id, kind, name, qualified_name, file_path, start_line, end_line,
                        source_code, docstring, signature, hash, metadata FROM nodes",
            )?;
            let rows = stmt.query_map([], |r| {
                let kind: String = r.get(1)?;
                let metadata: String = r.get(11)?;
                Ok((
                    r.get::<_, String>(0)?,
                    kind,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, i64>(5)?,
                    r.get::<_, i64>(6)?,
                    r.get::<_, String>(7)?,
                    r.get::<_, Option<String>>(8)?,
                    r.get::<_, Option<String>>(9)?,
                    r.get::<_, String>(10)?,
                    metadata,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (id, kind, name, qn, fp, sl, el, src, doc, sig, hash, meta) = row?;
                out.push(Node {
                    id,
                    kind: parse_node_kind(&kind)?,
                    name,
                    qualified_name: qn,
                    file_path: fp,
                    start_line: sl as u32,
                    end_line: el as u32,
                    source_code: src,
                    docstring: doc,
                    signature: sig,
                    hash,
                    metadata: serde_json::from_str(&meta)?,
                });
            }
            out
        };
        let edges = {
            let mut stmt = conn.prepare(
                "SELECT id, from_node, to_node, kind, line_number, column_number, confidence,
                        source, untracked_reason, metadata FROM edges",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, Option<i64>>(4)?,
                    r.get::<_, Option<i64>>(5)?,
                    r.get::<_, String>(6)?,
                    r.get::<_, String>(7)?,
                    r.get::<_, String>(8)?,
                    r.get::<_, String>(9)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (id, from_node, to_node, kind, line, col, conf, src, reason, meta) = row?;
                out.push(Edge {
                    id,
                    from_node,
                    to_node,
                    kind: parse_edge_kind(&kind)?,
                    line_number: line.map(|v| v as u32),
                    column: col.map(|v| v as u32),
                    confidence: parse_confidence(&conf)?,
                    source: parse_source(&src)?,
                    untracked_reason: reason,
                    metadata: serde_json::from_str(&meta)?,
                });
            }
            out
        };
        Ok((nodes, edges))
    }

    pub fn load_fingerprints(&self) -> Result<HashMap<String, FileFingerprint>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT relative_path, mtime_secs, size FROM fingerprints")?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
            ))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (path, mtime, size) = row?;
            out.insert(
                path,
                FileFingerprint {
                    mtime_secs: mtime,
                    size: size as u64,
                },
            );
        }
        Ok(out)
    }

    pub fn save_fingerprints(&self, fingerprints: &HashMap<String, FileFingerprint>) -> Result<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM fingerprints", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO fingerprints (relative_path, mtime_secs, size) VALUES (?1, ?2, ?3)",
            )?;
            for (path, fp) in fingerprints {
                stmt.execute(params![path, fp.mtime_secs, fp.size as i64])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn node_by_id(&self, id: &str) -> Result<Option<Node>> {
        let (nodes, _) = self.load_graph()?;
        Ok(nodes.into_iter().find(|n| n.id == id))
    }

    pub fn all_node_ids(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT id FROM nodes")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Overwrite the precomputed class-metrics table (spec §4.8: "class
    /// metrics... precomputed at sync; queries are O(1) reads").
    pub fn save_class_metrics(&self, metrics: &[ClassMetrics]) -> Result<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM class_metrics", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO class_metrics (node_id, method_count, line_count, public_methods,
                    private_methods, dependency_count, internal_calls, histogram, percentile_rank)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for m in metrics {
                stmt.execute(params![
                    m.node_id,
                    m.method_count,
                    m.line_count,
                    m.public_methods,
                    m.private_methods,
                    m.dependency_count,
                    m.internal_calls,
                    serde_json::to_string(&m.method_prefix_histogram)?,
                    m.percentile_rank,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_class_metrics(&self) -> Result<Vec<ClassMetrics>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT node_id, method_count, line_count, public_methods, private_methods,
                    dependency_count, internal_calls, histogram, percentile_rank
             FROM class_metrics",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, i64>(5)?,
                r.get::<_, i64>(6)?,
                r.get::<_, String>(7)?,
                r.get::<_, f64>(8)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (node_id, mc, lc, pub_m, priv_m, dep, internal, hist, pct) = row?;
            out.push(ClassMetrics {
                node_id,
                method_count: mc as u32,
                line_count: lc as u32,
                public_methods: pub_m as u32,
                private_methods: priv_m as u32,
                dependency_count: dep as u32,
                internal_calls: internal as u32,
                method_prefix_histogram: serde_json::from_str(&hist)?,
                percentile_rank: pct,
            });
        }
        Ok(out)
    }

    pub fn class_metrics_for(&self, node_id: &str) -> Result<Option<ClassMetrics>> {
        Ok(self
            .load_class_metrics()?
            .into_iter()
            .find(|m| m.node_id == node_id))
    }

    pub fn set_annotation(&self, node_id: &str, key: &str, value: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO annotations (node_id, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(node_id, key) DO UPDATE SET value = excluded.value",
            params![node_id, key, value],
        )?;
        Ok(())
    }

    pub fn get_annotation(&self, node_id: &str, key: &str) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let conn = self.open()?;
        conn.query_row(
            "SELECT value FROM annotations WHERE node_id = ?1 AND key = ?2",
            params![node_id, key],
            |r| r.get(0),
        )
        .optional()
        .map_err(StorageError::from)
    }
}

fn source_as_str(s: EdgeSource) -> &'static str {
    match s {
        EdgeSource::Static => "static",
        EdgeSource::Runtime => "runtime",
        EdgeSource::Both => "both",
    }
}

fn parse_node_kind(s: &str) -> Result<NodeKind> {
    Ok(match s {
        "module" => NodeKind::Module,
        "class" => NodeKind::Class,
        "function" => NodeKind::Function,
        "method" => NodeKind::Method,
        "block" => NodeKind::Block,
        "virtual" => NodeKind::Virtual,
        other => return Err(StorageError::database(format!("unknown node kind: {other}"))),
    })
}

fn parse_edge_kind(s: &str) -> Result<EdgeKind> {
    Ok(match s {
        "calls" => EdgeKind::Calls,
        "imports" => EdgeKind::Imports,
        "inherits" => EdgeKind::Inherits,
        "uses" => EdgeKind::Uses,
        "decorates" => EdgeKind::Decorates,
        "reads_table" => EdgeKind::ReadsTable,
        "writes_table" => EdgeKind::WritesTable,
        "migrates" => EdgeKind::Migrates,
        "calls_api" => EdgeKind::CallsApi,
        "calls_native" => EdgeKind::CallsNative,
        "depends_on" => EdgeKind::DependsOn,
        "uses_env" => EdgeKind::UsesEnv,
        other => return Err(StorageError::database(format!("unknown edge kind: {other}"))),
    })
}

fn parse_confidence(s: &str) -> Result<EdgeConfidence> {
    Ok(match s {
        "resolved" => EdgeConfidence::Resolved,
        "inferred" => EdgeConfidence::Inferred,
        "unresolved" => EdgeConfidence::Unresolved,
        "external" => EdgeConfidence::External,
        other => {
            return Err(StorageError::database(format!(
                "unknown edge confidence: {other}"
            )))
        }
    })
}

fn parse_source(s: &str) -> Result<EdgeSource> {
    Ok(match s {
        "static" => EdgeSource::Static,
        "runtime" => EdgeSource::Runtime,
        "both" => EdgeSource::Both,
        other => return Err(StorageError::database(format!("unknown edge source: {other}"))),
    })
}

/// Unused placeholder keeping `ChangeAction::from_str` reachable for the
/// history store's parsing helpers without duplicating the match here.
impl FromStr for ChangeAction {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "created" => ChangeAction::Created,
            "modified" => ChangeAction::Modified,
            "deleted" => ChangeAction::Deleted,
            other => {
                return Err(StorageError::database(format!(
                    "unknown change action: {other}"
                )))
            }
        })
    }
}

pub fn sidecar_path(lens_dir: impl AsRef<Path>, file_name: &str) -> PathBuf {
    lens_dir.as_ref().join(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_node(id: &str, file_path: &str) -> Node {
        Node::new(
            id,
            NodeKind::Function,
            id,
            id,
            file_path,
            1,
            3,
            format!("def {id}(): pass"),
        )
    }

    #[test]
    fn save_and_load_graph_roundtrip() {
        let dir = tempdir().unwrap();
        let store = GraphStore::new(dir.path().join("graph.db"));
        let nodes = vec![sample_node("a.f", "a.py"), sample_node("b.g", "b.py")];
        let edges = vec![Edge::new(
            "a.f->b.g#calls@1",
            "a.f",
            "b.g",
            EdgeKind::Calls,
            EdgeConfidence::Resolved,
            EdgeSource::Static,
        )
        .with_line(1)];
        store.save_graph(&nodes, &edges).unwrap();

        let (loaded_nodes, loaded_edges) = store.load_graph().unwrap();
        assert_eq!(loaded_nodes.len(), 2);
        assert_eq!(loaded_edges.len(), 1);
        assert_eq!(loaded_edges[0].kind, EdgeKind::Calls);
    }

    #[test]
    fn load_graph_on_missing_db_is_empty() {
        let dir = tempdir().unwrap();
        let store = GraphStore::new(dir.path().join("graph.db"));
        let (nodes, edges) = store.load_graph().unwrap();
        assert!(nodes.is_empty());
        assert!(edges.is_empty());
    }

    #[test]
    fn replace_file_drops_old_nodes_and_touching_edges() {
        let dir = tempdir().unwrap();
        let store = GraphStore::new(dir.path().join("graph.db"));
        let nodes = vec![sample_node("a.f", "a.py"), sample_node("b.g", "b.py")];
        let edges = vec![Edge::new(
            "e1", "a.f", "b.g", EdgeKind::Calls, EdgeConfidence::Resolved, EdgeSource::Static,
        )];
        store.save_graph(&nodes, &edges).unwrap();

        store
            .replace_file("a.py", &[sample_node("a.f2", "a.py")], &[])
            .unwrap();

        let (loaded_nodes, loaded_edges) = store.load_graph().unwrap();
        let ids: Vec<_> = loaded_nodes.iter().map(|n| n.id.as_str()).collect();
        assert!(ids.contains(&"a.f2"));
        assert!(!ids.contains(&"a.f"));
        assert!(ids.contains(&"b.g"));
        assert!(loaded_edges.is_empty());
    }

    #[test]
    fn fingerprints_roundtrip() {
        let dir = tempdir().unwrap();
        let store = GraphStore::new(dir.path().join("graph.db"));
        let mut fps = HashMap::new();
        fps.insert(
            "a.py".to_string(),
            FileFingerprint {
                mtime_secs: 100,
                size: 42,
            },
        );
        store.save_fingerprints(&fps).unwrap();
        let loaded = store.load_fingerprints().unwrap();
        assert_eq!(loaded.get("a.py").unwrap().size, 42);
    }

    #[test]
    fn annotation_upsert_overwrites() {
        let dir = tempdir().unwrap();
        let store = GraphStore::new(dir.path().join("graph.db"));
        store.set_annotation("a.f", "summary", "first").unwrap();
        store.set_annotation("a.f", "summary", "second").unwrap();
        assert_eq!(
            store.get_annotation("a.f", "summary").unwrap(),
            Some("second".to_string())
        );
    }

    #[test]
    fn class_metrics_roundtrip() {
        let dir = tempdir().unwrap();
        let store = GraphStore::new(dir.path().join("graph.db"));
        let mut histogram = HashMap::new();
        histogram.insert("get".to_string(), 2);
        let metrics = vec![ClassMetrics {
            node_id: "app.Foo".to_string(),
            method_count: 3,
            line_count: 40,
            public_methods: 2,
            private_methods: 1,
            dependency_count: 4,
            internal_calls: 1,
            method_prefix_histogram: histogram,
            percentile_rank: 75.0,
        }];
        store.save_class_metrics(&metrics).unwrap();

        let loaded = store.load_class_metrics().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].node_id, "app.Foo");
        assert_eq!(loaded[0].method_prefix_histogram.get("get"), Some(&2));

        let one = store.class_metrics_for("app.Foo").unwrap().unwrap();
        assert_eq!(one.percentile_rank, 75.0);
    }

    #[test]
    fn class_metrics_overwritten_on_resave() {
        let dir = tempdir().unwrap();
        let store = GraphStore::new(dir.path().join("graph.db"));
        store
            .save_class_metrics(&[ClassMetrics {
                node_id: "app.Foo".to_string(),
                method_count: 1,
                ..Default::default()
            }])
            .unwrap();
        store.save_class_metrics(&[]).unwrap();
        assert!(store.load_class_metrics().unwrap().is_empty());
    }
}
