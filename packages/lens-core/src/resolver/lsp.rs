//! R6: the optional deep-resolution contract (spec §4.3, scoped down to
//! a trait plus a no-op default). A real implementation would shell out
//! to `pyright`/`tsserver` over JSON-RPC the way the teacher's resolver
//! plane leaves a seam for a second, slower pass after the fast
//! import-table resolution; that binary integration is out of scope
//! here, so the only thing this module commits to is the seam itself.

use lens_storage::{Edge, Node};

/// A resolver that can refine the fast-path edges the parser plane and
/// the other five mappers already produced, given an external language
/// server. `resolve_deep` receives the edges produced so far and returns
/// the edges it wants to add — it never removes or downgrades an edge
/// (spec invariant 5: confidence only improves within a generation).
pub trait LspClient {
    fn resolve_deep(&self, nodes: &[Node], edges: Vec<Edge>) -> Vec<Edge>;
}

/// No language server wired up: passes nothing through. Swapping in a
/// real `pyright`/`tsserver` client only requires implementing
/// [`LspClient`] and registering it in place of this default.
pub struct DefaultLspClient;

impl LspClient for DefaultLspClient {
    fn resolve_deep(&self, _nodes: &[Node], _edges: Vec<Edge>) -> Vec<Edge> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_client_adds_nothing() {
        let client = DefaultLspClient;
        assert!(client.resolve_deep(&[], Vec::new()).is_empty());
    }
}
