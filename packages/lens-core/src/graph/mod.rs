//! In-memory code graph: impact analysis, dead-code detection, path
//! finding, cycle detection, and the `structure` browse operation
//! (spec §4.4). Backed by `petgraph`, rebuilt from the node/edge lists
//! the storage layer hands back on `ensure_synced`.

use lens_storage::{Edge, EdgeKind, Node, NodeKind};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet, VecDeque};

/// Read-only view over the current node/edge set, rebuilt whenever the
/// session mutates the graph (spec §5: "read-only between mutations").
pub struct CodeGraph {
    graph: DiGraph<String, EdgeKind>,
    index_of: HashMap<String, NodeIndex>,
    nodes: HashMap<String, Node>,
    edges: Vec<Edge>,
}

/// A single level of an impact zone or dependency tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeLevel {
    pub node_id: String,
    pub depth: u32,
    pub via: Option<EdgeKind>,
}

impl CodeGraph {
    pub fn build(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();
        let mut node_map = HashMap::new();
        for node in nodes {
            let idx = graph.add_node(node.id.clone());
            index_of.insert(node.id.clone(), idx);
            node_map.insert(node.id.clone(), node);
        }
        for edge in &edges {
            if let (Some(&from), Some(&to)) =
                (index_of.get(&edge.from_node), index_of.get(&edge.to_node))
            {
                graph.add_edge(from, to, edge.kind);
            }
        }
        Self {
            graph,
            index_of,
            nodes: node_map,
            edges,
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index_of.contains_key(id)
    }

    /// Nodes that (transitively, up to `depth`) reach `node_id` along
    /// reversed edges — "what breaks if I change this" (spec §4.4,
    /// property: impact_zone = depth-bounded reverse-graph ancestors).
    pub fn impact_zone(&self, node_id: &str, depth: u32) -> Vec<TreeLevel> {
        let Some(&start) = self.index_of.get(node_id) else {
            return Vec::new();
        };
        let mut visited = HashSet::new();
        visited.insert(start);
        let mut queue = VecDeque::new();
        queue.push_back((start, 0u32));
        let mut result = Vec::new();
        while let Some((current, d)) = queue.pop_front() {
            if d >= depth {
                continue;
            }
            for edge in self.graph.edges_directed(current, petgraph::Direction::Incoming) {
                let src = edge.source();
                if visited.insert(src) {
                    let id = self.graph[src].clone();
                    result.push(TreeLevel {
                        node_id: id,
                        depth: d + 1,
                        via: Some(*edge.weight()),
                    });
                    queue.push_back((src, d + 1));
                }
            }
        }
        result
    }

    /// Nodes that `node_id` depends on, forward along edges, up to
    /// `max_depth` (spec §4.4 dependency_tree).
    pub fn dependency_tree(&self, node_id: &str, max_depth: u32) -> Vec<TreeLevel> {
        let Some(&start) = self.index_of.get(node_id) else {
            return Vec::new();
        };
        let mut visited = HashSet::new();
        visited.insert(start);
        let mut queue = VecDeque::new();
        queue.push_back((start, 0u32));
        let mut result = Vec::new();
        while let Some((current, d)) = queue.pop_front() {
            if d >= max_depth {
                continue;
            }
            for edge in self.graph.edges_directed(current, petgraph::Direction::Outgoing) {
                let dst = edge.target();
                if visited.insert(dst) {
                    let id = self.graph[dst].clone();
                    result.push(TreeLevel {
                        node_id: id,
                        depth: d + 1,
                        via: Some(*edge.weight()),
                    });
                    queue.push_back((dst, d + 1));
                }
            }
        }
        result
    }

    /// Code nodes unreachable from any declared entry point (spec §4.4).
    /// `entry_points` are node ids known to be live roots (main blocks,
    /// tests, route handlers, ...).
    pub fn dead_code(&self, entry_points: &[String]) -> Vec<String> {
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::new();
        for entry in entry_points {
            if let Some(&idx) = self.index_of.get(entry) {
                if reachable.insert(idx) {
                    queue.push_back(idx);
                }
            }
        }
        while let Some(current) = queue.pop_front() {
            for edge in self.graph.edges_directed(current, petgraph::Direction::Outgoing) {
                let dst = edge.target();
                if reachable.insert(dst) {
                    queue.push_back(dst);
                }
            }
        }
        let mut dead: Vec<String> = self
            .nodes
            .values()
            .filter(|node| node.kind.is_code())
            .filter(|node| {
                let idx = self.index_of[&node.id];
                !reachable.contains(&idx)
            })
            .map(|node| node.id.clone())
            .collect();
        dead.sort();
        dead
    }

    /// Shortest directed path from `from` to `to`, as a node-id sequence.
    pub fn path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let &start = self.index_of.get(from)?;
        let &goal = self.index_of.get(to)?;
        let mut visited = HashSet::new();
        visited.insert(start);
        let mut queue = VecDeque::new();
        queue.push_back(start);
        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        while let Some(current) = queue.pop_front() {
            if current == goal {
                let mut path = vec![self.graph[current].clone()];
                let mut cursor = current;
                while let Some(&p) = parent.get(&cursor) {
                    path.push(self.graph[p].clone());
                    cursor = p;
                }
                path.reverse();
                return Some(path);
            }
            for edge in self.graph.edges_directed(current, petgraph::Direction::Outgoing) {
                let dst = edge.target();
                if visited.insert(dst) {
                    parent.insert(dst, current);
                    queue.push_back(dst);
                }
            }
        }
        None
    }

    /// All simple cycles of length >= 2 restricted to `imports` edges
    /// (spec §4.4 circular_imports).
    pub fn circular_imports(&self) -> Vec<Vec<String>> {
        let import_graph = self.graph.filter_map(
            |idx, weight| Some(self.graph[idx].clone()).and(Some(weight.clone())),
            |_, weight| (*weight == EdgeKind::Imports).then_some(*weight),
        );
        let mut cycles = Vec::new();
        let mut seen_cycle_keys = HashSet::new();
        for start in import_graph.node_indices() {
            let mut stack = vec![(start, vec![start])];
            while let Some((current, path)) = stack.pop() {
                for edge in import_graph.edges_directed(current, petgraph::Direction::Outgoing) {
                    let next = edge.target();
                    if next == start && path.len() >= 2 {
                        let ids: Vec<String> =
                            path.iter().map(|&i| import_graph[i].clone()).collect();
                        let mut key = ids.clone();
                        key.sort();
                        if seen_cycle_keys.insert(key) {
                            cycles.push(ids);
                        }
                    } else if !path.contains(&next) && path.len() < 32 {
                        let mut next_path = path.clone();
                        next_path.push(next);
                        stack.push((next, next_path));
                    }
                }
            }
        }
        cycles
    }

    /// Browse mode for `structure` (spec §4.4): directory/module summary,
    /// compact member list, or full node dump.
    pub fn structure(&self, path_prefix: &str, max_depth: u32, limit: usize, offset: usize) -> Vec<&Node> {
        let mut matches: Vec<&Node> = self
            .nodes
            .values()
            .filter(|node| node.file_path.starts_with(path_prefix))
            .filter(|node| node.kind != NodeKind::Block || max_depth >= 3)
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        matches.into_iter().skip(offset).take(limit).collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// All nodes currently in the graph, for whole-project queries
    /// (class metrics, components, vibecheck) that can't be framed as a
    /// single-node traversal.
    pub fn all_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn all_edges(&self) -> &[Edge] {
        &self.edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_storage::{EdgeConfidence, EdgeSource};

    fn node(id: &str) -> Node {
        Node::new(id, NodeKind::Function, id, id, "a.py", 1, 2, "")
    }

    fn edge(from: &str, to: &str, kind: EdgeKind) -> Edge {
        Edge::new(
            Edge::derive_id(from, to, kind, None),
            from,
            to,
            kind,
            EdgeConfidence::Resolved,
            EdgeSource::Static,
        )
    }

    #[test]
    fn impact_zone_finds_reverse_ancestors_within_depth() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let edges = vec![edge("a", "b", EdgeKind::Calls), edge("b", "c", EdgeKind::Calls)];
        let graph = CodeGraph::build(nodes, edges);
        let zone = graph.impact_zone("c", 2);
        let ids: HashSet<_> = zone.iter().map(|l| l.node_id.clone()).collect();
        assert!(ids.contains("b"));
        assert!(ids.contains("a"));
    }

    #[test]
    fn impact_zone_respects_depth_bound() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let edges = vec![edge("a", "b", EdgeKind::Calls), edge("b", "c", EdgeKind::Calls)];
        let graph = CodeGraph::build(nodes, edges);
        let zone = graph.impact_zone("c", 1);
        assert_eq!(zone.len(), 1);
        assert_eq!(zone[0].node_id, "b");
    }

    #[test]
    fn dead_code_excludes_reachable_nodes() {
        let nodes = vec![node("main"), node("used"), node("dead")];
        let edges = vec![edge("main", "used", EdgeKind::Calls)];
        let graph = CodeGraph::build(nodes, edges);
        let dead = graph.dead_code(&["main".to_string()]);
        assert_eq!(dead, vec!["dead".to_string()]);
    }

    #[test]
    fn dead_code_intersected_with_descendants_of_entries_is_empty() {
        let nodes = vec![node("main"), node("used")];
        let edges = vec![edge("main", "used", EdgeKind::Calls)];
        let graph = CodeGraph::build(nodes, edges);
        let dead: HashSet<_> = graph.dead_code(&["main".to_string()]).into_iter().collect();
        let reachable: HashSet<_> = graph
            .dependency_tree("main", 10)
            .into_iter()
            .map(|l| l.node_id)
            .collect();
        assert!(dead.is_disjoint(&reachable));
    }

    #[test]
    fn path_finds_shortest_directed_route() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let edges = vec![edge("a", "b", EdgeKind::Calls), edge("b", "c", EdgeKind::Calls)];
        let graph = CodeGraph::build(nodes, edges);
        assert_eq!(
            graph.path("a", "c"),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn path_returns_none_when_unreachable() {
        let nodes = vec![node("a"), node("b")];
        let graph = CodeGraph::build(nodes, vec![]);
        assert_eq!(graph.path("a", "b"), None);
    }

    #[test]
    fn circular_imports_detects_two_node_cycle() {
        let nodes = vec![node("a"), node("b")];
        let edges = vec![
            edge("a", "b", EdgeKind::Imports),
            edge("b", "a", EdgeKind::Imports),
        ];
        let graph = CodeGraph::build(nodes, edges);
        let cycles = graph.circular_imports();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 2);
    }

    #[test]
    fn circular_imports_ignores_non_import_edges() {
        let nodes = vec![node("a"), node("b")];
        let edges = vec![edge("a", "b", EdgeKind::Calls), edge("b", "a", EdgeKind::Calls)];
        let graph = CodeGraph::build(nodes, edges);
        assert!(graph.circular_imports().is_empty());
    }
}
