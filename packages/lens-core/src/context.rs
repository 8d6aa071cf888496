//! `LensContext`: central session state for one project (spec §4.6).
//!
//! Owns the sidecar paths, a lazily-materialized in-memory graph
//! (invalidated on every mutation), the registered language parsers, and
//! the session's patch buffer. Mirrors the original `LensContext`'s
//! responsibilities one-for-one, generalized from a single Python parser
//! to the full parser registry.

use crate::errors::{LensError, Result};
use crate::fsutil::relative_normalized;
use crate::graph::CodeGraph;
use crate::mutation::PatchBuffer;
use crate::normalizer::{normalize_edges, SuffixIndex};
use crate::parser::{parse_project, python::PythonParser, tsx::TsxParser, LanguageParser};
use crate::resolver;
use lens_storage::{FileFingerprint, Node, Sidecar, SyncResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

pub struct LensContext {
    pub project_root: PathBuf,
    pub sidecar: Sidecar,
    parsers: Vec<Box<dyn LanguageParser>>,
    graph: Option<CodeGraph>,
    pub patch_buffer: PatchBuffer,
}

impl LensContext {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let sidecar = Sidecar::new(&project_root);
        Self {
            project_root,
            sidecar,
            parsers: vec![Box::new(PythonParser::new()), Box::new(TsxParser::new())],
            graph: None,
            patch_buffer: PatchBuffer::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.sidecar.exists() && self.sidecar.graph_db_exists()
    }

    fn require_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(LensError::not_initialized(self.project_root.display().to_string()))
        }
    }

    /// Build (or return the cached) in-memory graph, loading from the
    /// graph store on first access (spec §4.6 "lazy graph materialization").
    pub fn graph(&mut self) -> Result<&CodeGraph> {
        if self.graph.is_none() {
            let store = self.sidecar.graph_store();
            let (nodes, edges) = store.load_graph()?;
            self.graph = Some(CodeGraph::build(nodes, edges));
        }
        Ok(self.graph.as_ref().expect("just populated"))
    }

    /// Drop the cached graph. Called after any mutation so the next
    /// read rebuilds from the freshly-persisted store.
    pub fn invalidate_graph(&mut self) {
        self.graph = None;
    }

    /// Surgically reparse a single file: drop its old nodes/edges, parse
    /// it fresh (if it still exists), and persist (spec §4.6).
    pub fn reparse_file(&mut self, file_path: &Path) -> Result<()> {
        let rel_path = relative_normalized(&self.project_root, file_path);
        let store = self.sidecar.graph_store();

        let (new_nodes, new_edges) = if file_path.exists() {
            let ext = file_path.extension().and_then(|e| e.to_str()).map(|e| format!(".{e}"));
            let parser = ext.as_deref().and_then(|ext| {
                self.parsers.iter().find(|p| p.file_extensions().contains(&ext))
            });
            match parser {
                Some(parser) => parser.parse_file(file_path, &self.project_root).unwrap_or_default(),
                None => (Vec::new(), Vec::new()),
            }
        } else {
            (Vec::new(), Vec::new())
        };

        store.replace_file(&rel_path, new_nodes, new_edges)?;
        self.invalidate_graph();
        Ok(())
    }

    /// Full reparse of the project, diffed by node hash against the
    /// previous graph (spec §4.6, §8 property: repeated full_sync is a
    /// no-op when nothing changed on disk).
    pub fn full_sync(&mut self) -> Result<SyncResult> {
        let store = self.sidecar.graph_store();
        let (old_nodes, _old_edges) = store.load_graph()?;
        let old_index: HashMap<&str, &Node> = old_nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        let (parsed_nodes, parsed_edges) = parse_project(&self.project_root, &self.parsers);
        let (resolver_nodes, resolver_edges) = resolver::run_all(&parsed_nodes, &self.project_root);

        let mut new_nodes = parsed_nodes;
        new_nodes.extend(resolver_nodes);
        let mut new_edges = parsed_edges;
        new_edges.extend(resolver_edges);
        let new_edges = normalize_edges(&new_nodes, new_edges);

        let new_index: HashMap<&str, &Node> = new_nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        let added: Vec<Node> = new_nodes
            .iter()
            .filter(|n| !old_index.contains_key(n.id.as_str()))
            .cloned()
            .collect();
        let deleted: Vec<Node> = old_nodes
            .iter()
            .filter(|n| !new_index.contains_key(n.id.as_str()))
            .cloned()
            .collect();
        let modified: Vec<Node> = new_nodes
            .iter()
            .filter(|n| old_index.get(n.id.as_str()).map(|old| old.hash != n.hash).unwrap_or(false))
            .cloned()
            .collect();

        store.save_graph(&new_nodes, &new_edges)?;
        self.refresh_fingerprints()?;

        let built_graph = CodeGraph::build(new_nodes, new_edges);
        let metrics = crate::quality::compute_class_metrics(&built_graph);
        store.save_class_metrics(&metrics)?;
        self.graph = Some(built_graph);

        Ok(SyncResult { added, modified, deleted })
    }

    /// Entry points (spec §4.5) expanded through the live graph, then
    /// handed to [`CodeGraph::dead_code`] (spec §4.4) — the wiring
    /// between the entry registry and the graph engine's dead-code pass.
    pub fn dead_code(&mut self) -> Result<Vec<String>> {
        self.require_initialized()?;
        let graph = self.graph()?;
        let nodes: Vec<Node> = graph.all_nodes().cloned().collect();
        let edges = graph.all_edges().to_vec();
        let entries = crate::entrypoints::collect_entry_points(&nodes);
        let entries = crate::entrypoints::expand_entry_points(&nodes, &edges, entries);
        let entries: Vec<String> = entries.into_iter().collect();
        Ok(self.graph()?.dead_code(&entries))
    }

    /// Compare current file mtimes/sizes against the stored fingerprints;
    /// reparse only the files that changed, or fall back to a full sync
    /// if fingerprints are missing entirely (spec §4.6 `ensure_synced`).
    pub fn ensure_synced(&mut self) -> Result<SyncResult> {
        let store = self.sidecar.graph_store();
        let stored = store.load_fingerprints()?;
        if stored.is_empty() {
            return self.full_sync();
        }

        let current = self.current_fingerprints();
        let mut changed_files = Vec::new();
        for (path, fingerprint) in &current {
            match stored.get(path) {
                Some(old) if old == fingerprint => {}
                _ => changed_files.push(path.clone()),
            }
        }
        for path in stored.keys() {
            if !current.contains_key(path) {
                changed_files.push(path.clone());
            }
        }

        if changed_files.is_empty() {
            return Ok(SyncResult::default());
        }

        for rel in &changed_files {
            self.reparse_file(&self.project_root.join(rel))?;
        }
        self.refresh_fingerprints()?;
        Ok(SyncResult::default())
    }

    fn current_fingerprints(&self) -> HashMap<String, FileFingerprint> {
        let mut map = HashMap::new();
        for file in crate::fsutil::walk_project(&self.project_root) {
            let Ok(meta) = std::fs::metadata(&file) else { continue };
            let mtime_secs = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            let rel = relative_normalized(&self.project_root, &file);
            map.insert(rel, FileFingerprint { mtime_secs, size: meta.len() });
        }
        map
    }

    fn refresh_fingerprints(&self) -> Result<()> {
        let fingerprints = self.current_fingerprints();
        self.sidecar.graph_store().save_fingerprints(&fingerprints)?;
        Ok(())
    }

    /// Resolve a possibly-partial node id: exact match against the live
    /// graph first, then a unique suffix match (used by every operation
    /// that takes a node id).
    pub fn resolve_node_id(&mut self, reference: &str) -> Result<String> {
        self.require_initialized()?;
        let graph = self.graph()?;
        if graph.contains(reference) {
            return Ok(reference.to_string());
        }
        let all_nodes: Vec<Node> = graph.structure("", u32::MAX, usize::MAX, 0).into_iter().cloned().collect();
        match SuffixIndex::build(&all_nodes).resolve(reference) {
            Some(id) => Ok(id),
            None => Err(LensError::node_not_found(reference, Vec::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn is_initialized_false_before_sidecar_exists() {
        let dir = tempdir().unwrap();
        let ctx = LensContext::new(dir.path());
        assert!(!ctx.is_initialized());
    }

    #[test]
    fn full_sync_discovers_added_nodes() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "def f():\n    pass\n").unwrap();
        let mut ctx = LensContext::new(dir.path());
        ctx.sidecar.ensure_dir().unwrap();
        let result = ctx.full_sync().unwrap();
        assert!(result.added.iter().any(|n| n.id == "a.f"));
    }

    #[test]
    fn full_sync_twice_with_no_changes_has_no_diff() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "def f():\n    pass\n").unwrap();
        let mut ctx = LensContext::new(dir.path());
        ctx.sidecar.ensure_dir().unwrap();
        ctx.full_sync().unwrap();
        let second = ctx.full_sync().unwrap();
        assert!(second.added.is_empty());
        assert!(second.modified.is_empty());
        assert!(second.deleted.is_empty());
    }

    #[test]
    fn reparse_file_drops_nodes_for_deleted_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.py");
        fs::write(&file, "def f():\n    pass\n").unwrap();
        let mut ctx = LensContext::new(dir.path());
        ctx.sidecar.ensure_dir().unwrap();
        ctx.full_sync().unwrap();
        fs::remove_file(&file).unwrap();
        ctx.reparse_file(&file).unwrap();
        let graph = ctx.graph().unwrap();
        assert!(!graph.contains("a.f"));
    }
}
