//! Data model: nodes, edges, and the other records that flow through the
//! graph construction and mutation pipeline.
//!
//! This is the single source of truth for the wire format — both the
//! in-memory graph engine (`lens-core`) and the SQLite stores in this
//! crate serialize/deserialize exactly these types.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Kind of a code-graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Module,
    Class,
    Function,
    Method,
    Block,
    /// Synthetic infrastructure node (service, table, env var, CI job, ...).
    Virtual,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Module => "module",
            NodeKind::Class => "class",
            NodeKind::Function => "function",
            NodeKind::Method => "method",
            NodeKind::Block => "block",
            NodeKind::Virtual => "virtual",
        }
    }

    /// Whether this node kind participates in dead-code reachability
    /// (spec §4.4: only code-typed nodes are ever reported as dead).
    pub fn is_code(&self) -> bool {
        matches!(
            self,
            NodeKind::Function | NodeKind::Method | NodeKind::Class
        )
    }
}

/// Kind of relationship between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Calls,
    Imports,
    Inherits,
    Uses,
    Decorates,
    ReadsTable,
    WritesTable,
    Migrates,
    CallsApi,
    CallsNative,
    DependsOn,
    UsesEnv,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Calls => "calls",
            EdgeKind::Imports => "imports",
            EdgeKind::Inherits => "inherits",
            EdgeKind::Uses => "uses",
            EdgeKind::Decorates => "decorates",
            EdgeKind::ReadsTable => "reads_table",
            EdgeKind::WritesTable => "writes_table",
            EdgeKind::Migrates => "migrates",
            EdgeKind::CallsApi => "calls_api",
            EdgeKind::CallsNative => "calls_native",
            EdgeKind::DependsOn => "depends_on",
            EdgeKind::UsesEnv => "uses_env",
        }
    }
}

/// Provenance quality of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeConfidence {
    Resolved,
    Inferred,
    Unresolved,
    External,
}

impl EdgeConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeConfidence::Resolved => "resolved",
            EdgeConfidence::Inferred => "inferred",
            EdgeConfidence::Unresolved => "unresolved",
            EdgeConfidence::External => "external",
        }
    }

    /// Confidence ordering used to enforce spec invariant 5
    /// ("confidence monotonically improves... never regresses").
    pub fn rank(&self) -> u8 {
        match self {
            EdgeConfidence::Unresolved => 0,
            EdgeConfidence::External => 0,
            EdgeConfidence::Inferred => 1,
            EdgeConfidence::Resolved => 2,
        }
    }
}

/// How an edge was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeSource {
    Static,
    Runtime,
    Both,
}

/// A code unit or synthetic entity in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub name: String,
    pub qualified_name: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub source_code: String,
    #[serde(default)]
    pub docstring: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Node {
    pub fn new(
        id: impl Into<String>,
        kind: NodeKind,
        name: impl Into<String>,
        qualified_name: impl Into<String>,
        file_path: impl Into<String>,
        start_line: u32,
        end_line: u32,
        source_code: impl Into<String>,
    ) -> Self {
        let source_code = source_code.into();
        let hash = compute_hash(&source_code);
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            qualified_name: qualified_name.into(),
            file_path: normalize_path(&file_path.into()),
            start_line,
            end_line,
            source_code,
            docstring: None,
            signature: None,
            hash,
            metadata: HashMap::new(),
        }
    }

    /// Recompute `hash` from the current `source_code` (spec invariant 3).
    pub fn recompute_hash(&mut self) {
        self.hash = compute_hash(&self.source_code);
    }

    pub fn with_docstring(mut self, docstring: impl Into<String>) -> Self {
        self.docstring = Some(docstring.into());
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// SHA-256 hash of `source_code`, hex-encoded (spec invariant 3).
pub fn compute_hash(source_code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_code.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Normalize a path to forward slashes, relative form (spec invariant 2).
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// A typed, directed relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from_node: String,
    pub to_node: String,
    pub kind: EdgeKind,
    #[serde(default)]
    pub line_number: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
    pub confidence: EdgeConfidence,
    pub source: EdgeSource,
    #[serde(default)]
    pub untracked_reason: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Edge {
    pub fn new(
        id: impl Into<String>,
        from_node: impl Into<String>,
        to_node: impl Into<String>,
        kind: EdgeKind,
        confidence: EdgeConfidence,
        source: EdgeSource,
    ) -> Self {
        Self {
            id: id.into(),
            from_node: from_node.into(),
            to_node: to_node.into(),
            kind,
            line_number: None,
            column: None,
            confidence,
            source,
            untracked_reason: String::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line_number = Some(line);
        self
    }

    pub fn with_column(mut self, column: u32) -> Self {
        self.column = Some(column);
        self
    }

    pub fn unresolved(mut self, reason: impl Into<String>) -> Self {
        self.confidence = EdgeConfidence::Unresolved;
        self.untracked_reason = reason.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Stable edge id derived from its endpoints and kind.
    pub fn derive_id(from_node: &str, to_node: &str, kind: EdgeKind, line: Option<u32>) -> String {
        format!(
            "{}->{}#{}@{}",
            from_node,
            to_node,
            kind.as_str(),
            line.map(|l| l.to_string()).unwrap_or_default()
        )
    }
}

/// A recorded change to the graph (history store row).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: i64,
    pub timestamp: String,
    pub node_id: String,
    pub action: ChangeAction,
    #[serde(default)]
    pub old_source: Option<String>,
    #[serde(default)]
    pub new_source: Option<String>,
    #[serde(default)]
    pub old_hash: String,
    #[serde(default)]
    pub new_hash: String,
    #[serde(default)]
    pub affected_nodes: Vec<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Created,
    Modified,
    Deleted,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Created => "created",
            ChangeAction::Modified => "modified",
            ChangeAction::Deleted => "deleted",
        }
    }
}

/// A pending replacement of a line range in a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub start_line: u32,
    pub end_line: u32,
    pub new_source: String,
    #[serde(default)]
    pub node_id: String,
}

/// Result of name resolution against the import table / suffix index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub node_id: Option<String>,
    pub confidence: EdgeConfidence,
    #[serde(default)]
    pub untracked_reason: String,
}

/// Per-file call-resolution analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub file_path: String,
    pub total_calls: u32,
    pub resolved_calls: u32,
    pub untracked_calls: u32,
    pub confidence: f64,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl FileAnalysis {
    pub fn new(file_path: impl Into<String>, total_calls: u32, resolved_calls: u32) -> Self {
        let untracked_calls = total_calls.saturating_sub(resolved_calls);
        let confidence = if total_calls == 0 {
            1.0
        } else {
            resolved_calls as f64 / total_calls as f64
        };
        Self {
            file_path: file_path.into(),
            total_calls,
            resolved_calls,
            untracked_calls,
            confidence,
            issues: Vec::new(),
        }
    }
}

/// Precomputed per-class metrics (spec §4.8), refreshed on every sync so
/// reads stay O(1) instead of re-walking the graph per query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub node_id: String,
    pub method_count: u32,
    pub line_count: u32,
    pub public_methods: u32,
    pub private_methods: u32,
    pub dependency_count: u32,
    pub internal_calls: u32,
    /// Count of methods per naming-prefix bucket (`get_`, `is_`, `_`, ...).
    #[serde(default)]
    pub method_prefix_histogram: HashMap<String, u32>,
    /// This class's percentile rank (0-100) by `method_count` among all
    /// classes in the project.
    pub percentile_rank: f64,
}

/// Overall health report for a project's code graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectHealth {
    pub total_nodes: u32,
    pub total_edges: u32,
    pub resolved_edges: u32,
    pub untracked_edges: u32,
    pub overall_confidence: f64,
    #[serde(default)]
    pub dirty_files: Vec<FileAnalysis>,
    #[serde(default)]
    pub clean_files: Vec<FileAnalysis>,
    #[serde(default)]
    pub has_exec: Vec<String>,
    #[serde(default)]
    pub has_monkey_patching: Vec<String>,
    #[serde(default)]
    pub has_circular_imports: Vec<String>,
    #[serde(default)]
    pub has_star_imports: Vec<String>,
}

/// Result of syncing the graph with the filesystem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub added: Vec<Node>,
    pub modified: Vec<Node>,
    pub deleted: Vec<Node>,
}

/// A candidate string-literal occurrence that a rename did not touch
/// automatically and that a human should review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameReviewItem {
    pub file_path: String,
    pub line: u32,
    pub snippet: String,
}

/// Result of a cross-project rename operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenameResult {
    pub success: bool,
    pub files_modified: u32,
    pub references_updated: u32,
    #[serde(default)]
    pub needs_review: Vec<RenameReviewItem>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Filesystem fingerprint used to decide reparse-vs-full-sync (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub mtime_secs: i64,
    pub size: u64,
}

/// Structured response envelope returned by every core operation (spec §7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LensResponse<T> {
    pub ok: bool,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub affected: Vec<String>,
    #[serde(default)]
    pub diff: Option<String>,
}

impl<T> LensResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            warnings: Vec::new(),
            affected: Vec::new(),
            diff: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
            warnings: Vec::new(),
            affected: Vec::new(),
            diff: None,
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn with_affected(mut self, affected: Vec<String>) -> Self {
        self.affected = affected;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_hash_matches_source() {
        let node = Node::new(
            "models.User",
            NodeKind::Class,
            "User",
            "models.User",
            "models.py",
            1,
            5,
            "class User:\n    pass\n",
        );
        assert_eq!(node.hash, compute_hash(&node.source_code));
    }

    #[test]
    fn node_path_normalizes_backslashes() {
        let node = Node::new(
            "pkg.mod",
            NodeKind::Module,
            "mod",
            "pkg.mod",
            "pkg\\mod.py",
            1,
            1,
            "",
        );
        assert_eq!(node.file_path, "pkg/mod.py");
    }

    #[test]
    fn edge_confidence_rank_orders_resolved_above_inferred() {
        assert!(EdgeConfidence::Resolved.rank() > EdgeConfidence::Inferred.rank());
        assert!(EdgeConfidence::Inferred.rank() > EdgeConfidence::Unresolved.rank());
    }

    #[test]
    fn node_kind_is_code_excludes_modules_and_blocks() {
        assert!(NodeKind::Function.is_code());
        assert!(NodeKind::Method.is_code());
        assert!(NodeKind::Class.is_code());
        assert!(!NodeKind::Module.is_code());
        assert!(!NodeKind::Block.is_code());
        assert!(!NodeKind::Virtual.is_code());
    }

    #[test]
    fn file_analysis_confidence_ratio() {
        let fa = FileAnalysis::new("a.py", 10, 8);
        assert_eq!(fa.untracked_calls, 2);
        assert!((fa.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn file_analysis_empty_file_has_full_confidence() {
        let fa = FileAnalysis::new("empty.py", 0, 0);
        assert_eq!(fa.confidence, 1.0);
    }

    #[test]
    fn lens_response_ok_roundtrip_json() {
        let resp = LensResponse::ok(42).with_warnings(vec!["careful".into()]);
        let json = serde_json::to_string(&resp).unwrap();
        let back: LensResponse<i32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data, Some(42));
        assert_eq!(back.warnings, vec!["careful".to_string()]);
    }

    #[test]
    fn node_serde_roundtrip_preserves_metadata() {
        let node = Node::new(
            "a.b",
            NodeKind::Function,
            "b",
            "a.b",
            "a.py",
            1,
            2,
            "def b(): pass",
        )
        .with_metadata("is_async", serde_json::Value::Bool(false));
        let json = serde_json::to_string(&node).unwrap();
        let back: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
    }
}
