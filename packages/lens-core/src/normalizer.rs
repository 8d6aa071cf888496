//! Suffix index: resolves a partially-qualified edge endpoint (e.g. an
//! import naming only `User` where the graph knows `app.models.User`) to
//! a unique node id, or leaves it alone when ambiguous.

use lens_storage::{Edge, EdgeConfidence, Node};
use std::collections::HashMap;

/// Well-known leading segments that mark a reference as external to the
/// project rather than unresolved within it.
const KNOWN_EXTERNAL_PREFIXES: &[&str] = &[
    "os", "sys", "re", "json", "typing", "collections", "itertools", "functools", "pathlib",
    "asyncio", "logging", "datetime", "unittest", "abc", "dataclasses", "enum", "io", "math",
    "random", "subprocess", "threading", "requests", "numpy", "pandas", "django", "flask",
    "fastapi", "pydantic", "sqlalchemy", "pytest", "react", "react-dom", "next", "express",
    "lodash", "axios", "vue", "@angular", "rxjs",
];

/// Maps every proper dotted suffix of a node id to that id, `None` on
/// collision (spec §4.2). e.g. `app.models.User` contributes the keys
/// `models.User` and `User` (not the full id itself, which is exact-matched
/// separately).
#[derive(Debug, Default, Clone)]
pub struct SuffixIndex {
    full_ids: std::collections::HashSet<String>,
    suffixes: HashMap<String, Option<String>>,
}

impl SuffixIndex {
    pub fn build(nodes: &[Node]) -> Self {
        let mut index = SuffixIndex::default();
        for node in nodes {
            index.full_ids.insert(node.id.clone());
            let parts: Vec<&str> = node.id.split('.').collect();
            for start in 1..parts.len() {
                let suffix = parts[start..].join(".");
                index.insert_suffix(suffix, &node.id);
            }
        }
        index
    }

    fn insert_suffix(&mut self, suffix: String, full_id: &str) {
        match self.suffixes.get_mut(&suffix) {
            None => {
                self.suffixes.insert(suffix, Some(full_id.to_string()));
            }
            Some(slot) => {
                if slot.as_deref() != Some(full_id) {
                    *slot = None;
                }
            }
        }
    }

    /// Resolve a reference to a node id: exact match first, then a unique
    /// suffix match. Returns `None` on no match or ambiguity.
    pub fn resolve(&self, reference: &str) -> Option<String> {
        if self.full_ids.contains(reference) {
            return Some(reference.to_string());
        }
        self.suffixes.get(reference).and_then(|slot| slot.clone())
    }

    /// Whether `reference`'s leading dotted segment names a known external
    /// package/module rather than something unresolved in-project.
    pub fn is_external(reference: &str) -> bool {
        let head = reference.split('.').next().unwrap_or(reference);
        KNOWN_EXTERNAL_PREFIXES.contains(&head)
    }

    pub fn len(&self) -> usize {
        self.suffixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }
}

/// Bulk pass run once per `full_sync` (spec §4.2): every edge whose
/// target is not yet a full node id is re-resolved against the freshly
/// built suffix index. A resolved unique suffix upgrades the edge to
/// `Inferred` (parser-plane-local resolution, e.g. an import table, still
/// outranks this and is left untouched); an unresolvable reference is
/// tagged `External` when it names a known third-party package, or left
/// `Unresolved` with a reason otherwise (spec invariant 5: confidence
/// only ever improves, never regresses, within a parse generation).
pub fn normalize_edges(nodes: &[Node], edges: Vec<Edge>) -> Vec<Edge> {
    let index = SuffixIndex::build(nodes);
    edges
        .into_iter()
        .map(|mut edge| {
            if edge.confidence == EdgeConfidence::Resolved {
                return edge;
            }
            match index.resolve(&edge.to_node) {
                Some(resolved) => {
                    edge.to_node = resolved;
                    if edge.confidence.rank() < EdgeConfidence::Inferred.rank() {
                        edge.confidence = EdgeConfidence::Inferred;
                    }
                }
                None if SuffixIndex::is_external(&edge.to_node) => {
                    edge.confidence = EdgeConfidence::External;
                }
                None => {
                    if edge.untracked_reason.is_empty() {
                        edge.untracked_reason = format!("no node found for '{}'", edge.to_node);
                    }
                }
            }
            edge
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_storage::NodeKind;

    fn node(id: &str) -> Node {
        Node::new(id, NodeKind::Function, "f", id, "a.py", 1, 2, "")
    }

    #[test]
    fn resolves_unique_suffix() {
        let idx = SuffixIndex::build(&[node("app.models.User")]);
        assert_eq!(idx.resolve("User").as_deref(), Some("app.models.User"));
        assert_eq!(
            idx.resolve("models.User").as_deref(),
            Some("app.models.User")
        );
    }

    #[test]
    fn exact_full_id_always_resolves() {
        let idx = SuffixIndex::build(&[node("app.models.User")]);
        assert_eq!(
            idx.resolve("app.models.User").as_deref(),
            Some("app.models.User")
        );
    }

    #[test]
    fn ambiguous_suffix_resolves_to_none() {
        let idx = SuffixIndex::build(&[node("app.a.User"), node("app.b.User")]);
        assert_eq!(idx.resolve("User"), None);
    }

    #[test]
    fn unknown_reference_resolves_to_none() {
        let idx = SuffixIndex::build(&[node("app.models.User")]);
        assert_eq!(idx.resolve("Nonexistent"), None);
    }

    #[test]
    fn building_twice_from_same_nodes_is_idempotent() {
        let nodes = vec![node("app.models.User"), node("app.views.handler")];
        let first = SuffixIndex::build(&nodes);
        let second = SuffixIndex::build(&nodes);
        assert_eq!(first.len(), second.len());
        assert_eq!(first.resolve("User"), second.resolve("User"));
    }

    #[test]
    fn is_external_matches_known_stdlib_and_framework_prefixes() {
        assert!(SuffixIndex::is_external("os.path.join"));
        assert!(SuffixIndex::is_external("react.useState"));
        assert!(!SuffixIndex::is_external("app.models.User"));
    }

    fn edge(to: &str, confidence: EdgeConfidence) -> Edge {
        use lens_storage::{EdgeKind, EdgeSource};
        Edge::new("e", "caller", to, EdgeKind::Calls, confidence, EdgeSource::Static)
    }

    #[test]
    fn normalize_edges_upgrades_unique_suffix_to_inferred() {
        let nodes = vec![node("app.models.User")];
        let edges = vec![edge("User", EdgeConfidence::Unresolved)];
        let normalized = normalize_edges(&nodes, edges);
        assert_eq!(normalized[0].to_node, "app.models.User");
        assert_eq!(normalized[0].confidence, EdgeConfidence::Inferred);
    }

    #[test]
    fn normalize_edges_marks_known_external_reference() {
        let nodes = vec![node("app.models.User")];
        let edges = vec![edge("os.path.join", EdgeConfidence::Unresolved)];
        let normalized = normalize_edges(&nodes, edges);
        assert_eq!(normalized[0].confidence, EdgeConfidence::External);
    }

    #[test]
    fn normalize_edges_leaves_resolved_edges_untouched() {
        let nodes = vec![node("app.models.User"), node("app.other.User")];
        let edges = vec![edge("app.models.User", EdgeConfidence::Resolved)];
        let normalized = normalize_edges(&nodes, edges);
        assert_eq!(normalized[0].to_node, "app.models.User");
        assert_eq!(normalized[0].confidence, EdgeConfidence::Resolved);
    }
}
