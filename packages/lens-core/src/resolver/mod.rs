//! C5: the resolver plane. Six cross-cutting mappers that each add edges
//! (and, for infrastructure that has no AST home, virtual nodes) the
//! parser plane alone cannot see: HTTP routes (R1), SQL/ORM access (R2),
//! environment & infrastructure wiring (R3), native/FFI bridges (R4), CI
//! pipelines (R5), and an optional deep LSP-backed pass (R6).
//!
//! Every mapper is a pure function over the already-parsed node set plus
//! a filesystem re-read of the files it cares about (the same split the
//! original Python resolvers use: the parser plane owns the AST, the
//! resolver plane owns cross-cutting regex/config scans). `run_all` is
//! the orchestration point `LensContext::full_sync` calls once per
//! project sync.

pub mod api_mapper;
pub mod ci_mapper;
pub mod ffi_mapper;
pub mod infra_mapper;
pub mod lsp;
pub mod sql_mapper;

use lens_storage::{Edge, Node, NodeKind};
use std::path::Path;

/// Run every resolver over the freshly-parsed node/edge set and return
/// the virtual nodes and extra edges they contribute. Parser-plane edges
/// pass through untouched; resolvers only ever add.
pub fn run_all(nodes: &[Node], root: &Path) -> (Vec<Node>, Vec<Edge>) {
    let mut extra_nodes = Vec::new();
    let mut extra_edges = Vec::new();

    let (n, e) = api_mapper::resolve(nodes, root);
    extra_nodes.extend(n);
    extra_edges.extend(e);

    let (n, e) = sql_mapper::resolve(nodes, root);
    extra_nodes.extend(n);
    extra_edges.extend(e);

    let (n, e) = infra_mapper::resolve(nodes, root);
    extra_nodes.extend(n);
    extra_edges.extend(e);

    let (n, e) = ffi_mapper::resolve(nodes, root);
    extra_nodes.extend(n);
    extra_edges.extend(e);

    let (n, e) = ci_mapper::resolve(nodes, root);
    extra_nodes.extend(n);
    extra_edges.extend(e);

    let e = lsp::DefaultLspClient.resolve_deep(nodes, Vec::new());
    extra_edges.extend(e);

    (extra_nodes, extra_edges)
}

/// Best existing node to attribute a file-level relationship to: the
/// file's module node if the parser produced one, else the earliest
/// (by source position) node still in that file. Infra/CI mappers
/// usually have their own synthetic node to serve as source instead;
/// this is for the ones that attach to a real code node (R1, R2, R4).
pub(crate) fn nearest_node_for_file(nodes: &[Node], rel_path: &str) -> Option<String> {
    nodes
        .iter()
        .find(|n| n.file_path == rel_path && n.kind == NodeKind::Module)
        .or_else(|| {
            nodes
                .iter()
                .filter(|n| n.file_path == rel_path)
                .min_by_key(|n| n.start_line)
        })
        .map(|n| n.id.clone())
}

/// Whether a relative path names a test file/directory, by the same
/// conventions every mapper below excludes test code from its scan
/// (spec §4.3 Non-goal: resolvers don't attribute fixtures as routes/
/// call sites/bridges).
pub(crate) fn is_test_path(rel_path: &str) -> bool {
    let lower = rel_path.to_ascii_lowercase();
    lower.contains("__tests__")
        || lower.contains("/test_")
        || lower.starts_with("test_")
        || lower.ends_with(".test.ts")
        || lower.ends_with(".test.tsx")
        || lower.ends_with(".test.js")
        || lower.ends_with(".spec.ts")
        || lower.ends_with(".spec.js")
        || lower.split('/').any(|seg| seg == "tests" || seg == "test")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_test_path_matches_common_conventions() {
        assert!(is_test_path("app/test_models.py"));
        assert!(is_test_path("src/__tests__/foo.test.ts"));
        assert!(!is_test_path("app/models.py"));
    }
}
