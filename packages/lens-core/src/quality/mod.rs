//! C10: architecture and quality tooling (spec §4.8).
//!
//! Everything here reads the graph; nothing here ever mutates it —
//! "quality tools never mutate" (spec §4.7 error/failure semantics).
//! `compute_class_metrics`/`compute_project_metrics`/`compute_components`
//! are pure functions over a [`CodeGraph`] so they're usable without a
//! session; `arch_check` and `vibecheck` need the session because they
//! read `.lens/arch_rules.json` and the precomputed class-metrics table.

pub mod stats;

use crate::context::LensContext;
use crate::errors::Result;
use crate::graph::CodeGraph;
use crate::mutation::matches_pattern;
use lens_storage::{ArchRule, ClassMetrics, EdgeKind, Node, NodeKind};
use std::collections::{HashMap, HashSet};

/// Aggregate method-count distribution across every class in the
/// project (spec §4.8 "project metrics").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectMetrics {
    pub total_classes: u32,
    pub avg_methods: f64,
    pub median_methods: f64,
    pub min_methods: u32,
    pub max_methods: u32,
    pub p90_methods: f64,
    pub p95_methods: f64,
}

/// A directory-based cluster of nodes, with its cohesion score and the
/// split between nodes other clusters reach (`public_api`) and nodes
/// only this cluster uses (`internal`) (spec §4.8 "components").
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub name: String,
    pub node_ids: Vec<String>,
    pub cohesion: f64,
    pub public_api: Vec<String>,
    pub internal: Vec<String>,
}

/// A single architecture-rule failure (spec §4.8 `arch_check`).
#[derive(Debug, Clone, PartialEq)]
pub struct ArchViolation {
    pub rule_id: String,
    pub message: String,
}

/// The six weighted inputs to `vibecheck`'s aggregate score (spec §4.8).
/// Each field is already scaled into the score's point budget — summing
/// the three positive fields and subtracting the three penalties
/// against a 50-point baseline is what `vibecheck` does to land in
/// [0, 100].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VibecheckBreakdown {
    pub test_coverage: f64,
    pub documentation: f64,
    pub graph_confidence: f64,
    pub dead_code_penalty: f64,
    pub circular_import_penalty: f64,
    pub arch_violation_penalty: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VibecheckResult {
    pub score: u32,
    pub grade: char,
    pub breakdown: VibecheckBreakdown,
}

fn methods_of<'a>(graph: &'a CodeGraph, class_id: &str) -> Vec<&'a Node> {
    graph
        .all_nodes()
        .filter(|n| {
            n.kind == NodeKind::Method
                && n.id
                    .rsplit_once('.')
                    .map(|(parent, _)| parent == class_id)
                    .unwrap_or(false)
        })
        .collect()
}

/// Bucket a method name into a naming-convention prefix for the
/// histogram (spec §4.8 "method-prefix histogram"): `get_foo` -> `get`,
/// `__init__` -> `dunder`, a name with no separator buckets under
/// itself.
fn method_prefix(name: &str) -> String {
    if name.starts_with("__") {
        return "dunder".to_string();
    }
    match name.find('_') {
        Some(idx) if idx > 0 => name[..idx].to_string(),
        _ => name.to_string(),
    }
}

fn percentile_rank(sorted_counts: &[u32], value: u32) -> f64 {
    if sorted_counts.is_empty() {
        return 0.0;
    }
    let at_or_below = sorted_counts.iter().filter(|&&v| v <= value).count();
    (at_or_below as f64 / sorted_counts.len() as f64) * 100.0
}

/// Precompute per-class metrics for every class node in the graph (spec
/// §4.8): method/line counts, public/private split, a naming-prefix
/// histogram, outgoing dependency count, self-contained call count, and
/// this class's percentile rank by method count.
pub fn compute_class_metrics(graph: &CodeGraph) -> Vec<ClassMetrics> {
    let classes: Vec<&Node> = graph.all_nodes().filter(|n| n.kind == NodeKind::Class).collect();
    let mut counts: Vec<u32> = classes
        .iter()
        .map(|c| methods_of(graph, &c.id).len() as u32)
        .collect();
    counts.sort_unstable();

    let mut out = Vec::new();
    for class in &classes {
        let methods = methods_of(graph, &class.id);
        let method_ids: HashSet<&str> = methods.iter().map(|m| m.id.as_str()).collect();

        let mut public_methods = 0u32;
        let mut private_methods = 0u32;
        let mut histogram: HashMap<String, u32> = HashMap::new();
        for method in &methods {
            if method.name.starts_with('_') {
                private_methods += 1;
            } else {
                public_methods += 1;
            }
            *histogram.entry(method_prefix(&method.name)).or_insert(0) += 1;
        }

        let mut dependency_targets: HashSet<&str> = HashSet::new();
        let mut internal_calls = 0u32;
        for edge in graph.all_edges() {
            if !matches!(
                edge.kind,
                EdgeKind::Calls | EdgeKind::Uses | EdgeKind::Inherits | EdgeKind::DependsOn
            ) {
                continue;
            }
            let from_in_class = edge.from_node == class.id || method_ids.contains(edge.from_node.as_str());
            if !from_in_class {
                continue;
            }
            let to_in_class = edge.to_node == class.id || method_ids.contains(edge.to_node.as_str());
            if to_in_class {
                internal_calls += 1;
            } else {
                dependency_targets.insert(edge.to_node.as_str());
            }
        }

        let method_count = methods.len() as u32;
        out.push(ClassMetrics {
            node_id: class.id.clone(),
            method_count,
            line_count: class.end_line.saturating_sub(class.start_line) + 1,
            public_methods,
            private_methods,
            dependency_count: dependency_targets.len() as u32,
            internal_calls,
            method_prefix_histogram: histogram,
            percentile_rank: percentile_rank(&counts, method_count),
        });
    }
    out.sort_by(|a, b| a.node_id.cmp(&b.node_id));
    out
}

fn percentile(sorted: &[u32], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo] as f64
    } else {
        let frac = rank - lo as f64;
        sorted[lo] as f64 * (1.0 - frac) + sorted[hi] as f64 * frac
    }
}

/// Roll per-class metrics up into project-wide method-count statistics
/// (spec §4.8 "project metrics").
pub fn compute_project_metrics(class_metrics: &[ClassMetrics]) -> ProjectMetrics {
    if class_metrics.is_empty() {
        return ProjectMetrics::default();
    }
    let mut counts: Vec<u32> = class_metrics.iter().map(|m| m.method_count).collect();
    counts.sort_unstable();
    let sum: u64 = counts.iter().map(|&c| c as u64).sum();
    ProjectMetrics {
        total_classes: counts.len() as u32,
        avg_methods: sum as f64 / counts.len() as f64,
        median_methods: percentile(&counts, 50.0),
        min_methods: counts[0],
        max_methods: counts[counts.len() - 1],
        p90_methods: percentile(&counts, 90.0),
        p95_methods: percentile(&counts, 95.0),
    }
}

fn directory_of(file_path: &str) -> String {
    match file_path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => ".".to_string(),
    }
}

/// Cluster nodes by the directory of their source file and measure each
/// cluster's cohesion (internal edges over internal+external) and the
/// split between its public API (nodes reached from outside the
/// cluster) and purely internal nodes (spec §4.8 "components").
pub fn compute_components(graph: &CodeGraph) -> Vec<Component> {
    let mut by_dir: HashMap<String, Vec<&Node>> = HashMap::new();
    for node in graph.all_nodes() {
        if node.kind == NodeKind::Virtual {
            continue;
        }
        by_dir.entry(directory_of(&node.file_path)).or_default().push(node);
    }

    let mut components = Vec::new();
    for (name, nodes) in by_dir {
        let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let mut internal_edges = 0u32;
        let mut external_edges = 0u32;
        let mut public_api: HashSet<String> = HashSet::new();
        for edge in graph.all_edges() {
            let from_in = ids.contains(edge.from_node.as_str());
            let to_in = ids.contains(edge.to_node.as_str());
            if from_in && to_in {
                internal_edges += 1;
            } else if from_in != to_in {
                external_edges += 1;
                if to_in {
                    public_api.insert(edge.to_node.clone());
                }
            }
        }
        let cohesion = if internal_edges + external_edges == 0 {
            1.0
        } else {
            internal_edges as f64 / (internal_edges + external_edges) as f64
        };

        let mut node_ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
        node_ids.sort();
        let internal: Vec<String> = node_ids
            .iter()
            .filter(|id| !public_api.contains(id.as_str()))
            .cloned()
            .collect();
        let mut public_api: Vec<String> = public_api.into_iter().collect();
        public_api.sort();

        components.push(Component { name, node_ids, cohesion, public_api, internal });
    }
    components.sort_by(|a, b| a.name.cmp(&b.name));
    components
}

/// Run every rule in `arch_rules.json` against the whole project and
/// return every violation (spec §4.8 `arch_check`), reusing the same
/// glob-matching as the single-node check mutations run proactively.
pub fn arch_check(ctx: &mut LensContext) -> Result<Vec<ArchViolation>> {
    let rules = ctx.sidecar.load_arch_rules()?.rules;
    if rules.is_empty() {
        return Ok(Vec::new());
    }

    let class_metrics = compute_class_metrics(ctx.graph()?);
    let method_counts: HashMap<&str, u32> =
        class_metrics.iter().map(|m| (m.node_id.as_str(), m.method_count)).collect();

    let graph = ctx.graph()?;
    let mut violations = Vec::new();
    for rule in &rules {
        match rule {
            ArchRule::NoDependency { id, from_prefix, to_prefix, reason } => {
                for edge in graph.all_edges() {
                    if matches_pattern(from_prefix, &edge.from_node) && matches_pattern(to_prefix, &edge.to_node) {
                        let why = if reason.is_empty() { String::new() } else { format!(": {reason}") };
                        violations.push(ArchViolation {
                            rule_id: id.clone(),
                            message: format!("{} -> {}{}", edge.from_node, edge.to_node, why),
                        });
                    }
                }
            }
            ArchRule::MaxClassMethods { id, class_prefix, max_methods } => {
                for (&class_id, &count) in &method_counts {
                    if matches_pattern(class_prefix, class_id) && count > *max_methods {
                        violations.push(ArchViolation {
                            rule_id: id.clone(),
                            message: format!("{class_id} has {count} methods (max {max_methods})"),
                        });
                    }
                }
            }
            ArchRule::RequiredTest { id, prefix } => {
                for node in graph.all_nodes() {
                    if !matches!(node.kind, NodeKind::Function | NodeKind::Method) {
                        continue;
                    }
                    if !matches_pattern(prefix, &node.id) {
                        continue;
                    }
                    let covered = graph
                        .impact_zone(&node.id, 8)
                        .iter()
                        .any(|lvl| lvl.node_id.contains("test"));
                    if !covered {
                        violations.push(ArchViolation {
                            rule_id: id.clone(),
                            message: format!("{} has no covering test", node.id),
                        });
                    }
                }
            }
            ArchRule::NoCircularImports { id, prefix } => {
                for cycle in graph.circular_imports() {
                    if cycle.iter().any(|n| matches_pattern(prefix, n)) {
                        violations.push(ArchViolation {
                            rule_id: id.clone(),
                            message: format!("cycle: {}", cycle.join(" -> ")),
                        });
                    }
                }
            }
        }
    }
    violations.sort_by(|a, b| (&a.rule_id, &a.message).cmp(&(&b.rule_id, &b.message)));
    Ok(violations)
}

/// Precomputed class metrics for the current project, read straight
/// from the sidecar table `full_sync` populates rather than recomputed
/// from the live graph (spec §4.8: "precomputed at sync; queries are
/// O(1) reads").
pub fn class_metrics(ctx: &mut LensContext) -> Result<Vec<ClassMetrics>> {
    Ok(ctx.sidecar.graph_store().load_class_metrics()?)
}

pub fn project_metrics(ctx: &mut LensContext) -> Result<ProjectMetrics> {
    Ok(compute_project_metrics(&class_metrics(ctx)?))
}

pub fn components(ctx: &mut LensContext) -> Result<Vec<Component>> {
    Ok(compute_components(ctx.graph()?))
}

pub fn project_health(ctx: &mut LensContext) -> Result<lens_storage::ProjectHealth> {
    Ok(stats::project_health(ctx.graph()?))
}

const GRADE_BANDS: &[(u32, char)] = &[(90, 'A'), (80, 'B'), (70, 'C'), (60, 'D')];

fn letter_grade(score: u32) -> char {
    GRADE_BANDS
        .iter()
        .find(|(threshold, _)| score >= *threshold)
        .map(|(_, grade)| *grade)
        .unwrap_or('F')
}

/// Aggregate 0-100 quality score with letter grade (spec §4.8
/// "vibecheck"). Starts from a 50-point baseline; the three positive
/// components (test coverage, documentation, graph confidence) can add
/// up to 50 more, the three penalties can subtract up to 50 — an
/// unresolved Open Question in spec §9 left the exact combining formula
/// implicit, this is the resolution recorded in `DESIGN.md`.
pub fn vibecheck(ctx: &mut LensContext) -> Result<VibecheckResult> {
    let nodes: Vec<Node> = ctx.graph()?.all_nodes().cloned().collect();
    let code_nodes: Vec<&Node> = nodes.iter().filter(|n| n.kind.is_code()).collect();

    // spec §4.8: prefer runtime pytest-cov data (`coverage.json` <= 5 min
    // old) over the static call-graph heuristic when it's available.
    let fresh_coverage = ctx.sidecar.load_coverage_if_fresh(std::time::Duration::from_secs(300)).ok().flatten();
    let test_coverage = if let Some(report) = fresh_coverage {
        (report.totals.percent_covered / 100.0) * 25.0
    } else {
        let test_covered = code_nodes.iter().filter(|n| ctx_contains_test_caller(ctx, &n.id)).count();
        if code_nodes.is_empty() {
            25.0
        } else {
            (test_covered as f64 / code_nodes.len() as f64) * 25.0
        }
    };

    let documented = code_nodes
        .iter()
        .filter(|n| n.docstring.as_ref().map(|d| !d.trim().is_empty()).unwrap_or(false))
        .count();
    let documentation = if code_nodes.is_empty() {
        10.0
    } else {
        (documented as f64 / code_nodes.len() as f64) * 10.0
    };

    let graph = ctx.graph()?;
    let internal_edges: Vec<_> = graph
        .all_edges()
        .iter()
        .filter(|e| e.confidence != lens_storage::EdgeConfidence::External)
        .collect();
    let resolved = internal_edges
        .iter()
        .filter(|e| e.confidence == lens_storage::EdgeConfidence::Resolved)
        .count();
    let graph_confidence = if internal_edges.is_empty() {
        15.0
    } else {
        (resolved as f64 / internal_edges.len() as f64) * 15.0
    };

    let total_code = code_nodes.len().max(1);
    let cycle_count = graph.circular_imports().len();
    let circular_import_penalty = (cycle_count as f64 * 5.0).min(15.0);

    let dead = ctx.dead_code()?;
    let dead_pct = (dead.len() as f64 / total_code as f64) * 100.0;
    let dead_code_penalty = dead_pct.min(20.0);

    let violations = arch_check(ctx)?.len();
    let arch_violation_penalty = (violations as f64 * 3.0).min(15.0);

    let raw = 50.0 + test_coverage + documentation + graph_confidence
        - dead_code_penalty
        - circular_import_penalty
        - arch_violation_penalty;
    let score = raw.clamp(0.0, 100.0).round() as u32;

    Ok(VibecheckResult {
        score,
        grade: letter_grade(score),
        breakdown: VibecheckBreakdown {
            test_coverage,
            documentation,
            graph_confidence,
            dead_code_penalty,
            circular_import_penalty,
            arch_violation_penalty,
        },
    })
}

fn ctx_contains_test_caller(ctx: &mut LensContext, node_id: &str) -> bool {
    match ctx.graph() {
        Ok(graph) => graph.impact_zone(node_id, 8).iter().any(|lvl| lvl.node_id.contains("test")),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_storage::{Edge, EdgeConfidence, EdgeSource};

    fn class(id: &str) -> Node {
        Node::new(id, NodeKind::Class, id, id, "a.py", 1, 20, "class X: pass")
    }

    fn method(id: &str, name: &str) -> Node {
        Node::new(id, NodeKind::Method, name, id, "a.py", 2, 3, "def m(self): pass")
    }

    #[test]
    fn class_metrics_counts_public_and_private_methods() {
        let nodes = vec![
            class("a.Foo"),
            method("a.Foo.bar", "bar"),
            method("a.Foo._hidden", "_hidden"),
        ];
        let graph = CodeGraph::build(nodes, vec![]);
        let metrics = compute_class_metrics(&graph);
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].method_count, 2);
        assert_eq!(metrics[0].public_methods, 1);
        assert_eq!(metrics[0].private_methods, 1);
    }

    #[test]
    fn class_metrics_counts_internal_vs_external_calls() {
        let nodes = vec![
            class("a.Foo"),
            method("a.Foo.bar", "bar"),
            method("a.Foo.baz", "baz"),
            Node::new("b.Other", NodeKind::Function, "Other", "b.Other", "b.py", 1, 2, ""),
        ];
        let edges = vec![
            Edge::new("e1", "a.Foo.bar", "a.Foo.baz", EdgeKind::Calls, EdgeConfidence::Resolved, EdgeSource::Static),
            Edge::new("e2", "a.Foo.bar", "b.Other", EdgeKind::Calls, EdgeConfidence::Resolved, EdgeSource::Static),
        ];
        let graph = CodeGraph::build(nodes, edges);
        let metrics = compute_class_metrics(&graph);
        assert_eq!(metrics[0].internal_calls, 1);
        assert_eq!(metrics[0].dependency_count, 1);
    }

    #[test]
    fn project_metrics_computes_min_max_avg() {
        let metrics = vec![
            ClassMetrics { node_id: "a".into(), method_count: 2, ..Default::default() },
            ClassMetrics { node_id: "b".into(), method_count: 8, ..Default::default() },
        ];
        let project = compute_project_metrics(&metrics);
        assert_eq!(project.total_classes, 2);
        assert_eq!(project.min_methods, 2);
        assert_eq!(project.max_methods, 8);
        assert_eq!(project.avg_methods, 5.0);
    }

    #[test]
    fn project_metrics_empty_is_default() {
        assert_eq!(compute_project_metrics(&[]), ProjectMetrics::default());
    }

    #[test]
    fn components_groups_by_directory_and_tracks_public_api() {
        let inside = Node::new("pkg.a.f", NodeKind::Function, "f", "pkg.a.f", "pkg/a.py", 1, 2, "");
        let outside = Node::new("other.g", NodeKind::Function, "g", "other.g", "other.py", 1, 2, "");
        let edge = Edge::new("e1", "other.g", "pkg.a.f", EdgeKind::Calls, EdgeConfidence::Resolved, EdgeSource::Static);
        let graph = CodeGraph::build(vec![inside, outside], vec![edge]);
        let components = compute_components(&graph);
        let pkg = components.iter().find(|c| c.name == "pkg").unwrap();
        assert!(pkg.public_api.contains(&"pkg.a.f".to_string()));
        assert_eq!(pkg.cohesion, 0.0);
    }

    #[test]
    fn letter_grade_bands() {
        assert_eq!(letter_grade(95), 'A');
        assert_eq!(letter_grade(85), 'B');
        assert_eq!(letter_grade(72), 'C');
        assert_eq!(letter_grade(61), 'D');
        assert_eq!(letter_grade(40), 'F');
    }

    #[test]
    fn vibecheck_prefers_fresh_coverage_json_over_the_static_heuristic() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def f():\n    pass\n").unwrap();
        let mut ctx = crate::context::LensContext::new(dir.path());
        ctx.sidecar.ensure_dir().unwrap();
        ctx.full_sync().unwrap();
        std::fs::write(ctx.sidecar.coverage_path(), r#"{"totals": {"percent_covered": 80.0}}"#).unwrap();

        let result = vibecheck(&mut ctx).unwrap();
        assert_eq!(result.breakdown.test_coverage, 20.0);
    }
}
