//! Parser plane: per-language extraction of nodes and edges from source
//! files, plus the project-wide walking driver (spec §4.1).

pub mod python;
pub mod tsx;

use crate::fsutil::{relative_normalized, walk_project};
use lens_storage::{Edge, EdgeConfidence, Node};
use std::collections::HashMap;
use std::path::Path;

/// Capability contract every language parser implements. `lens-core` is
/// otherwise language-agnostic and drives parsing entirely through this
/// trait (spec §9: "duck-typed pluggable pieces... defined by explicit
/// capability sets").
pub trait LanguageParser {
    /// Extensions this parser claims, including the leading dot (`.py`).
    fn file_extensions(&self) -> &'static [&'static str];

    /// Parse one file into its nodes and edges. Any error here is caught
    /// by the driver and logged-and-skipped — a single bad file never
    /// aborts the project parse (spec §4.1 per-file failure policy).
    fn parse_file(&self, file_path: &Path, root_path: &Path) -> anyhow::Result<(Vec<Node>, Vec<Edge>)>;

    /// Optional second pass once the whole project's nodes are known —
    /// the injection point for LSP-backed deep resolution (R6). Default:
    /// no-op, edges pass through unchanged.
    fn resolve_edges(&self, _nodes: &[Node], edges: Vec<Edge>) -> Vec<Edge> {
        edges
    }
}

/// Fast, file-local name resolver: maps local identifiers to qualified
/// names from import statements, covering the large majority of calls
/// without a deep resolver (spec §4.1, §9).
#[derive(Debug, Default, Clone)]
pub struct ImportTable {
    names: HashMap<String, String>,
    star_imports: Vec<String>,
}

impl ImportTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_import(&mut self, module: &str, name: &str, alias: Option<&str>) {
        let local = alias.unwrap_or(name).to_string();
        let qualified = if module.is_empty() {
            name.to_string()
        } else {
            format!("{module}.{name}")
        };
        self.names.insert(local, qualified);
    }

    pub fn add_module_import(&mut self, module: &str, alias: Option<&str>) {
        let local = alias.unwrap_or(module).to_string();
        self.names.insert(local, module.to_string());
    }

    pub fn add_star_import(&mut self, module: &str) {
        self.star_imports.push(module.to_string());
    }

    /// Resolve `name` via the exact import map first, then a star import
    /// (inferred confidence, since the real origin is ambiguous).
    pub fn resolve(&self, name: &str) -> Option<(String, EdgeConfidence)> {
        if let Some(qualified) = self.names.get(name) {
            return Some((qualified.clone(), EdgeConfidence::Resolved));
        }
        self.star_imports
            .first()
            .map(|module| (format!("{module}.{name}"), EdgeConfidence::Inferred))
    }
}

/// Convert a file path to a dotted module id relative to `root` (spec §6:
/// "module id from relative path with `__init__` stripped").
pub fn module_id_from_path(file_path: &Path, root_path: &Path) -> String {
    let rel = relative_normalized(root_path, file_path);
    let without_ext = rel.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(&rel);
    let mut parts: Vec<&str> = without_ext.split('/').collect();
    if parts.last() == Some(&"__init__") || parts.last() == Some(&"index") {
        parts.pop();
    }
    if parts.is_empty() {
        without_ext.rsplit('/').next().unwrap_or(without_ext).to_string()
    } else {
        parts.join(".")
    }
}

/// Walk the project and parse every file whose extension a registered
/// parser claims, in deterministic order, dispatching per extension and
/// never aborting on a single file's failure (spec §4.1).
pub fn parse_project(root: &Path, parsers: &[Box<dyn LanguageParser>]) -> (Vec<Node>, Vec<Edge>) {
    let mut ext_map: HashMap<&str, &dyn LanguageParser> = HashMap::new();
    for parser in parsers {
        for ext in parser.file_extensions() {
            ext_map.insert(ext, parser.as_ref());
        }
    }

    let mut nodes = Vec::new();
    let mut edges_by_parser: HashMap<*const (), Vec<Edge>> = HashMap::new();
    let mut node_ranges_by_parser: HashMap<*const (), Vec<Node>> = HashMap::new();

    for file in walk_project(root) {
        let Some(ext) = file.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let dotted_ext = format!(".{ext}");
        let Some(&parser) = ext_map.get(dotted_ext.as_str()) else {
            continue;
        };
        match parser.parse_file(&file, root) {
            Ok((file_nodes, file_edges)) => {
                let key = parser as *const dyn LanguageParser as *const ();
                node_ranges_by_parser
                    .entry(key)
                    .or_default()
                    .extend(file_nodes.clone());
                nodes.extend(file_nodes);
                edges_by_parser.entry(key).or_default().extend(file_edges);
            }
            Err(err) => {
                tracing::warn!(file = %file.display(), error = %err, "failed to parse file, skipping");
            }
        }
    }

    let mut edges = Vec::new();
    for parser in parsers {
        let key = parser.as_ref() as *const dyn LanguageParser as *const ();
        if let Some(parser_edges) = edges_by_parser.remove(&key) {
            let parser_nodes = node_ranges_by_parser.remove(&key).unwrap_or_default();
            edges.extend(parser.resolve_edges(&parser_nodes, parser_edges));
        }
    }

    (nodes, edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn module_id_strips_init_and_extension() {
        let root = PathBuf::from("/proj");
        let file = PathBuf::from("/proj/app/__init__.py");
        assert_eq!(module_id_from_path(&file, &root), "app");
    }

    #[test]
    fn module_id_joins_nested_dirs_with_dots() {
        let root = PathBuf::from("/proj");
        let file = PathBuf::from("/proj/app/models/user.py");
        assert_eq!(module_id_from_path(&file, &root), "app.models.user");
    }

    #[test]
    fn import_table_resolves_aliased_import() {
        let mut table = ImportTable::new();
        table.add_import("app.models", "User", Some("U"));
        assert_eq!(
            table.resolve("U"),
            Some(("app.models.User".to_string(), EdgeConfidence::Resolved))
        );
    }

    #[test]
    fn import_table_falls_back_to_star_import_as_inferred() {
        let mut table = ImportTable::new();
        table.add_star_import("app.utils");
        assert_eq!(
            table.resolve("helper"),
            Some(("app.utils.helper".to_string(), EdgeConfidence::Inferred))
        );
    }

    #[test]
    fn import_table_unknown_name_resolves_to_none() {
        let table = ImportTable::new();
        assert_eq!(table.resolve("whatever"), None);
    }
}
