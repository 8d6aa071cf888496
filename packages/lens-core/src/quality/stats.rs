//! Per-file call-resolution stats and the project-wide `ProjectHealth`
//! rollup (spec §9 design notes / original `stats.py`, supplemented per
//! `SPEC_FULL.md`). Feeds the "graph confidence" bucket of `vibecheck`
//! (spec §4.8) and is exposed standalone as a diagnostic query.

use crate::graph::CodeGraph;
use lens_storage::{EdgeKind, FileAnalysis, NodeKind, ProjectHealth};
use std::collections::HashMap;

/// Source-level call-resolution confidence, grouped by file.
pub fn file_analysis(graph: &CodeGraph) -> Vec<FileAnalysis> {
    let mut by_file: HashMap<&str, (u32, u32)> = HashMap::new();
    for edge in graph.all_edges() {
        if edge.kind != EdgeKind::Calls {
            continue;
        }
        let Some(from) = graph.node(&edge.from_node) else { continue };
        let entry = by_file.entry(from.file_path.as_str()).or_insert((0, 0));
        entry.0 += 1;
        if edge.confidence == lens_storage::EdgeConfidence::Resolved {
            entry.1 += 1;
        }
    }
    let mut out: Vec<FileAnalysis> = by_file
        .into_iter()
        .map(|(file, (total, resolved))| FileAnalysis::new(file, total, resolved))
        .collect();
    out.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    out
}

/// Substrings whose presence in a module's source marks it as using
/// dynamic dispatch the static pass can't see through (`stats.py`'s
/// `has_exec`/`has_monkey_patching` detection).
const EXEC_MARKERS: &[&str] = &["eval(", "exec(", "compile("];
const MONKEY_PATCH_MARKERS: &[&str] = &["setattr(", "__class__ =", ".__dict__["];
const STAR_IMPORT_MARKERS: &[&str] = &["import *"];

/// Project-wide health rollup: confidence ratio plus the four dynamic-
/// construct flags the original `stats.py` surfaced as extra vibecheck
/// penalty inputs (`SPEC_FULL.md`'s "supplemented features").
pub fn project_health(graph: &CodeGraph) -> ProjectHealth {
    let analyses = file_analysis(graph);
    let total_edges = graph.edge_count() as u32;
    let resolved_edges = graph
        .all_edges()
        .iter()
        .filter(|e| e.confidence == lens_storage::EdgeConfidence::Resolved)
        .count() as u32;
    let untracked_edges = graph
        .all_edges()
        .iter()
        .filter(|e| e.confidence == lens_storage::EdgeConfidence::Unresolved)
        .count() as u32;

    let mut dirty_files = Vec::new();
    let mut clean_files = Vec::new();
    for analysis in analyses {
        if analysis.confidence >= 0.999 {
            clean_files.push(analysis);
        } else {
            dirty_files.push(analysis);
        }
    }

    let mut has_exec = Vec::new();
    let mut has_monkey_patching = Vec::new();
    let mut has_star_imports = Vec::new();
    for node in graph.all_nodes() {
        if node.kind != NodeKind::Module {
            continue;
        }
        if EXEC_MARKERS.iter().any(|m| node.source_code.contains(m)) {
            has_exec.push(node.file_path.clone());
        }
        if MONKEY_PATCH_MARKERS.iter().any(|m| node.source_code.contains(m)) {
            has_monkey_patching.push(node.file_path.clone());
        }
        if STAR_IMPORT_MARKERS.iter().any(|m| node.source_code.contains(m)) {
            has_star_imports.push(node.file_path.clone());
        }
    }
    has_exec.sort();
    has_monkey_patching.sort();
    has_star_imports.sort();

    let has_circular_imports: Vec<String> = graph
        .circular_imports()
        .into_iter()
        .map(|cycle| cycle.join(" -> "))
        .collect();

    let overall_confidence = if total_edges == 0 {
        1.0
    } else {
        resolved_edges as f64 / total_edges as f64
    };

    ProjectHealth {
        total_nodes: graph.node_count() as u32,
        total_edges,
        resolved_edges,
        untracked_edges,
        overall_confidence,
        dirty_files,
        clean_files,
        has_exec,
        has_monkey_patching,
        has_circular_imports,
        has_star_imports,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_storage::{Edge, EdgeConfidence, EdgeSource, Node};

    fn module(id: &str, file: &str, source: &str) -> Node {
        Node::new(id, NodeKind::Module, id, id, file, 1, 10, source)
    }

    fn func(id: &str, file: &str) -> Node {
        Node::new(id, NodeKind::Function, id, id, file, 1, 2, "")
    }

    #[test]
    fn file_analysis_buckets_calls_by_caller_file() {
        let nodes = vec![func("a.f", "a.py"), func("b.g", "b.py")];
        let edges = vec![Edge::new(
            "e1",
            "a.f",
            "b.g",
            EdgeKind::Calls,
            EdgeConfidence::Resolved,
            EdgeSource::Static,
        )];
        let graph = CodeGraph::build(nodes, edges);
        let analyses = file_analysis(&graph);
        assert_eq!(analyses.len(), 1);
        assert_eq!(analyses[0].file_path, "a.py");
        assert_eq!(analyses[0].total_calls, 1);
        assert_eq!(analyses[0].resolved_calls, 1);
    }

    #[test]
    fn project_health_flags_exec_usage() {
        let nodes = vec![module("app", "app.py", "eval('1+1')\n")];
        let graph = CodeGraph::build(nodes, vec![]);
        let health = project_health(&graph);
        assert_eq!(health.has_exec, vec!["app.py".to_string()]);
    }

    #[test]
    fn project_health_with_no_edges_has_full_confidence() {
        let nodes = vec![module("app", "app.py", "pass\n")];
        let graph = CodeGraph::build(nodes, vec![]);
        let health = project_health(&graph);
        assert_eq!(health.overall_confidence, 1.0);
    }
}
