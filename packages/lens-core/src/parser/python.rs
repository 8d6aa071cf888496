//! Python parser: tree-sitter-backed extraction of modules, classes,
//! functions/methods, blocks, imports, calls, inheritance and decorator
//! edges (spec §4.1). Grounded on the original AST visitor's scope-stack
//! and import-table design, re-expressed over a tree-sitter CST.

use super::{module_id_from_path, ImportTable, LanguageParser};
use crate::shared::ScopeStack;
use anyhow::{anyhow, Context};
use lens_storage::{compute_hash, Edge, EdgeConfidence, EdgeKind, EdgeSource, Node, NodeKind};
use std::cell::Cell;
use std::path::Path;
use tree_sitter::{Node as TsNode, Parser, Tree};

/// Built-ins whose presence makes a call target fundamentally dynamic —
/// never guessed at, always emitted unresolved (spec §4.1, §9).
const DYNAMIC_CALL_NAMES: &[&str] = &["exec", "eval", "globals", "locals", "getattr", "setattr", "delattr"];

pub struct PythonParser;

impl PythonParser {
    pub fn new() -> Self {
        Self
    }

    fn parse_tree(source: &str) -> anyhow::Result<Tree> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::language())
            .context("loading python grammar")?;
        parser
            .parse(source, None)
            .ok_or_else(|| anyhow!("tree-sitter produced no parse tree"))
    }
}

impl Default for PythonParser {
    fn default() -> Self {
        Self::new()
    }
}

fn text<'a>(node: TsNode, src: &'a [u8]) -> &'a str {
    node.utf8_text(src).unwrap_or("")
}

fn source_segment(lines: &[&str], start_line: u32, end_line: u32) -> String {
    let start = start_line.saturating_sub(1) as usize;
    let end = (end_line as usize).min(lines.len());
    lines[start..end].join("\n")
}

/// Resolve a (possibly dotted) attribute/identifier expression to a plain
/// dotted-name string, the way the original's `_resolve_name_from_ast` did.
fn dotted_name(node: TsNode, src: &[u8]) -> Option<String> {
    match node.kind() {
        "identifier" => Some(text(node, src).to_string()),
        "attribute" => {
            let object = node.child_by_field_name("object")?;
            let attr = node.child_by_field_name("attribute")?;
            let base = dotted_name(object, src);
            match base {
                Some(base) => Some(format!("{base}.{}", text(attr, src))),
                None => Some(text(attr, src).to_string()),
            }
        }
        "call" => dotted_name(node.child_by_field_name("function")?, src),
        _ => None,
    }
}

struct Visitor<'a> {
    src: &'a [u8],
    lines: Vec<&'a str>,
    module_id: String,
    file_path: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    import_table: ImportTable,
    scope: ScopeStack,
    class_depth: u32,
    claimed_lines: std::collections::HashSet<u32>,
    edge_seq: Cell<u64>,
}

impl<'a> Visitor<'a> {
    fn next_edge_id(&self, prefix: &str) -> String {
        let n = self.edge_seq.get();
        self.edge_seq.set(n + 1);
        format!("{prefix}#{n}")
    }

    fn claim(&mut self, start: u32, end: u32) {
        for line in start..=end {
            self.claimed_lines.insert(line);
        }
    }

    fn line_of(&self, node: TsNode) -> u32 {
        node.start_position().row as u32 + 1
    }

    fn end_line_of(&self, node: TsNode) -> u32 {
        node.end_position().row as u32 + 1
    }

    fn visit_module_body(&mut self, module: TsNode) {
        let mut cursor = module.walk();
        let mut block_start: Option<u32> = None;
        let mut block_end: Option<u32> = None;
        let mut block_names: Vec<String> = Vec::new();
        let mut block_kind = "statements";

        let flush = |nodes: &mut Vec<Node>,
                     module_id: &str,
                     file_path: &str,
                     block_start: &mut Option<u32>,
                     block_end: &mut Option<u32>,
                     block_names: &mut Vec<String>,
                     block_kind: &mut &str,
                     lines: &[&str]| {
            if let (Some(start), Some(end)) = (*block_start, *block_end) {
                let name = if block_names.is_empty() {
                    format!("block_{start}")
                } else {
                    block_names.join(", ")
                };
                let id = format!("{module_id}._block_{start}");
                let source = source_segment(lines, start, end);
                nodes.push(
                    Node::new(id, NodeKind::Block, name.clone(), name, file_path, start, end, source)
                        .with_metadata("block_kind", serde_json::Value::String((*block_kind).to_string())),
                );
            }
            *block_start = None;
            *block_end = None;
            block_names.clear();
            *block_kind = "statements";
        };

        for child in module.children(&mut cursor) {
            match child.kind() {
                "import_statement" => {
                    flush(
                        &mut self.nodes,
                        &self.module_id,
                        &self.file_path,
                        &mut block_start,
                        &mut block_end,
                        &mut block_names,
                        &mut block_kind,
                        &self.lines,
                    );
                    self.visit_import(child);
                }
                "import_from_statement" => {
                    flush(
                        &mut self.nodes,
                        &self.module_id,
                        &self.file_path,
                        &mut block_start,
                        &mut block_end,
                        &mut block_names,
                        &mut block_kind,
                        &self.lines,
                    );
                    self.visit_import_from(child);
                }
                "class_definition" => {
                    flush(
                        &mut self.nodes,
                        &self.module_id,
                        &self.file_path,
                        &mut block_start,
                        &mut block_end,
                        &mut block_names,
                        &mut block_kind,
                        &self.lines,
                    );
                    self.visit_class(child, &[]);
                }
                "function_definition" => {
                    flush(
                        &mut self.nodes,
                        &self.module_id,
                        &self.file_path,
                        &mut block_start,
                        &mut block_end,
                        &mut block_names,
                        &mut block_kind,
                        &self.lines,
                    );
                    self.visit_function(child, &[]);
                }
                "decorated_definition" => {
                    flush(
                        &mut self.nodes,
                        &self.module_id,
                        &self.file_path,
                        &mut block_start,
                        &mut block_end,
                        &mut block_names,
                        &mut block_kind,
                        &self.lines,
                    );
                    self.visit_decorated(child);
                }
                _ => {
                    let start = self.line_of(child);
                    let end = self.end_line_of(child);
                    if (start..=end).any(|l| self.claimed_lines.contains(&l)) {
                        continue;
                    }
                    if block_start.is_none() {
                        block_start = Some(start);
                    }
                    block_end = Some(end);
                    if child.kind() == "expression_statement" {
                        if let Some(assign) = child.named_child(0) {
                            if assign.kind() == "assignment" {
                                if let Some(lhs) = assign.child_by_field_name("left") {
                                    if lhs.kind() == "identifier" {
                                        block_names.push(text(lhs, self.src).to_string());
                                        block_kind = "constants";
                                    }
                                }
                            }
                        }
                    }
                    if child.kind() == "if_statement" {
                        let cond_text = child
                            .child_by_field_name("condition")
                            .map(|c| text(c, self.src))
                            .unwrap_or("");
                        if cond_text.contains("__name__") {
                            block_kind = "main_guard";
                        } else {
                            block_kind = "conditional";
                        }
                    }
                }
            }
        }
        flush(
            &mut self.nodes,
            &self.module_id,
            &self.file_path,
            &mut block_start,
            &mut block_end,
            &mut block_names,
            &mut block_kind,
            &self.lines,
        );
    }

    fn visit_import(&mut self, node: TsNode) {
        let line = self.line_of(node);
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            let (module_name, alias) = match child.kind() {
                "dotted_name" => (text(child, self.src).to_string(), None),
                "aliased_import" => {
                    let name = child.child_by_field_name("name").map(|n| text(n, self.src).to_string());
                    let alias = child.child_by_field_name("alias").map(|n| text(n, self.src).to_string());
                    (name.unwrap_or_default(), alias)
                }
                _ => continue,
            };
            if module_name.is_empty() {
                continue;
            }
            self.import_table.add_module_import(&module_name, alias.as_deref());
            let id = self.next_edge_id("import");
            self.edges.push(
                Edge::new(id, &self.module_id, &module_name, EdgeKind::Imports, EdgeConfidence::Resolved, EdgeSource::Static)
                    .with_line(line),
            );
        }
    }

    fn visit_import_from(&mut self, node: TsNode) {
        let line = self.line_of(node);
        let module = node
            .child_by_field_name("module_name")
            .map(|n| text(n, self.src).to_string())
            .unwrap_or_default();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "wildcard_import" => self.import_table.add_star_import(&module),
                "dotted_name" | "identifier" => {
                    let name = text(child, self.src).to_string();
                    if name == module {
                        continue;
                    }
                    self.import_table.add_import(&module, &name, None);
                    let id = self.next_edge_id("import");
                    self.edges.push(
                        Edge::new(
                            id,
                            &self.module_id,
                            format!("{module}.{name}"),
                            EdgeKind::Imports,
                            EdgeConfidence::Resolved,
                            EdgeSource::Static,
                        )
                        .with_line(line),
                    );
                }
                "aliased_import" => {
                    let name = child.child_by_field_name("name").map(|n| text(n, self.src).to_string()).unwrap_or_default();
                    let alias = child.child_by_field_name("alias").map(|n| text(n, self.src).to_string());
                    self.import_table.add_import(&module, &name, alias.as_deref());
                    let id = self.next_edge_id("import");
                    self.edges.push(
                        Edge::new(
                            id,
                            &self.module_id,
                            format!("{module}.{name}"),
                            EdgeKind::Imports,
                            EdgeConfidence::Resolved,
                            EdgeSource::Static,
                        )
                        .with_line(line),
                    );
                }
                _ => {}
            }
        }
    }

    fn decorator_names(&self, decorators: &[TsNode]) -> Vec<String> {
        decorators
            .iter()
            .filter_map(|d| {
                let expr = d.named_child(0)?;
                dotted_name(expr, self.src)
            })
            .collect()
    }

    fn visit_decorated(&mut self, node: TsNode) {
        let mut decorators = Vec::new();
        let mut definition = None;
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "decorator" => decorators.push(child),
                "class_definition" => definition = Some((child, true)),
                "function_definition" => definition = Some((child, false)),
                _ => {}
            }
        }
        match definition {
            Some((def, true)) => self.visit_class(def, &decorators),
            Some((def, false)) => self.visit_function(def, &decorators),
            None => {}
        }
    }

    fn visit_class(&mut self, node: TsNode, decorators: &[TsNode]) {
        let Some(name_node) = node.child_by_field_name("name") else { return };
        let name = text(name_node, self.src).to_string();
        let node_id = self.scope.fqn_with(&name);
        let start = self.line_of(node);
        let end = self.end_line_of(node);
        let source = source_segment(&self.lines, start, end);
        let decorator_names = self.decorator_names(decorators);

        self.nodes.push(
            Node::new(node_id.clone(), NodeKind::Class, name, node_id.clone(), self.file_path.clone(), start, end, source)
                .with_metadata("decorators", serde_json::json!(decorator_names)),
        );
        self.claim(start, end);

        if let Some(superclasses) = node.child_by_field_name("superclasses") {
            let mut cursor = superclasses.walk();
            for base in superclasses.named_children(&mut cursor) {
                if let Some(base_name) = dotted_name(base, self.src) {
                    let resolved = self.import_table.resolve(&base_name);
                    let (target, confidence) = resolved.unwrap_or((base_name, EdgeConfidence::Inferred));
                    let id = self.next_edge_id("inherits");
                    self.edges.push(
                        Edge::new(id, &node_id, target, EdgeKind::Inherits, confidence, EdgeSource::Static).with_line(start),
                    );
                }
            }
        }

        for dec_name in &decorator_names {
            let resolved = self.import_table.resolve(dec_name);
            let (target, _confidence) = resolved.unwrap_or_else(|| (dec_name.clone(), EdgeConfidence::Inferred));
            let id = self.next_edge_id("decorates");
            self.edges.push(
                Edge::new(id, target, &node_id, EdgeKind::Decorates, EdgeConfidence::Inferred, EdgeSource::Static)
                    .with_line(start),
            );
        }

        self.scope.push(node_id);
        self.class_depth += 1;
        if let Some(body) = node.child_by_field_name("body") {
            self.visit_class_body(body);
        }
        self.class_depth -= 1;
        self.scope.pop();
    }

    fn visit_class_body(&mut self, body: TsNode) {
        let mut cursor = body.walk();
        for child in body.children(&mut cursor) {
            match child.kind() {
                "function_definition" => self.visit_function(child, &[]),
                "decorated_definition" => self.visit_decorated(child),
                "class_definition" => self.visit_class(child, &[]),
                _ => {}
            }
        }
    }

    fn visit_function(&mut self, node: TsNode, decorators: &[TsNode]) {
        let Some(name_node) = node.child_by_field_name("name") else { return };
        let name = text(name_node, self.src).to_string();
        let is_method = self.class_depth > 0;
        let kind = if is_method { NodeKind::Method } else { NodeKind::Function };
        let node_id = self.scope.fqn_with(&name);
        let start = self.line_of(node);
        let end = self.end_line_of(node);
        let source = source_segment(&self.lines, start, end);
        let is_async = node
            .prev_sibling()
            .map(|s| s.kind() == "async")
            .unwrap_or(false);
        let signature = self.function_signature(node, &name, is_async);
        let decorator_names = self.decorator_names(decorators);

        self.nodes.push(
            Node::new(node_id.clone(), kind, name, node_id.clone(), self.file_path.clone(), start, end, source)
                .with_signature(signature)
                .with_metadata("is_async", serde_json::Value::Bool(is_async))
                .with_metadata("decorators", serde_json::json!(decorator_names)),
        );
        self.claim(start, end);

        for dec_name in &decorator_names {
            let resolved = self.import_table.resolve(dec_name);
            let (target, _confidence) = resolved.unwrap_or_else(|| (dec_name.clone(), EdgeConfidence::Inferred));
            let id = self.next_edge_id("decorates");
            self.edges.push(
                Edge::new(id, target, &node_id, EdgeKind::Decorates, EdgeConfidence::Inferred, EdgeSource::Static)
                    .with_line(start),
            );
        }

        if let Some(body) = node.child_by_field_name("body") {
            self.extract_calls(body, &node_id);
        }

        self.scope.push(node_id);
        self.class_depth_guard(|v| {
            if let Some(body) = node.child_by_field_name("body") {
                v.visit_nested_defs(body);
            }
        });
        self.scope.pop();
    }

    fn class_depth_guard(&mut self, f: impl FnOnce(&mut Self)) {
        let saved = self.class_depth;
        self.class_depth = 0;
        f(self);
        self.class_depth = saved;
    }

    fn visit_nested_defs(&mut self, body: TsNode) {
        let mut cursor = body.walk();
        for child in body.children(&mut cursor) {
            match child.kind() {
                "function_definition" => self.visit_function(child, &[]),
                "decorated_definition" => self.visit_decorated(child),
                "class_definition" => self.visit_class(child, &[]),
                "block" | "if_statement" | "for_statement" | "while_statement" | "with_statement" | "try_statement" => {
                    self.visit_nested_defs(child);
                }
                _ => {}
            }
        }
    }

    fn function_signature(&self, node: TsNode, name: &str, is_async: bool) -> String {
        let params = node
            .child_by_field_name("parameters")
            .map(|p| text(p, self.src))
            .unwrap_or("()");
        let prefix = if is_async { "async " } else { "" };
        format!("{prefix}def {name}{params}")
    }

    /// Extract call edges from `body`, stopping at nested function/class
    /// boundaries so calls attribute to the innermost enclosing scope only.
    fn extract_calls(&mut self, body: TsNode, caller_id: &str) {
        let mut stack = vec![body];
        while let Some(current) = stack.pop() {
            let mut cursor = current.walk();
            for child in current.children(&mut cursor) {
                if matches!(child.kind(), "function_definition" | "class_definition" | "decorated_definition") {
                    continue;
                }
                if child.kind() == "call" {
                    self.emit_call(child, caller_id);
                }
                stack.push(child);
            }
        }
    }

    fn emit_call(&mut self, node: TsNode, caller_id: &str) {
        let Some(func) = node.child_by_field_name("function") else { return };
        let Some(call_name) = dotted_name(func, self.src) else { return };
        let line = self.line_of(node);

        if DYNAMIC_CALL_NAMES.contains(&call_name.as_str()) {
            let id = self.next_edge_id("calls");
            self.edges.push(
                Edge::new(id, caller_id, &call_name, EdgeKind::Calls, EdgeConfidence::Unresolved, EdgeSource::Static)
                    .with_line(line)
                    .unresolved(format!("dynamic_{call_name}")),
            );
            return;
        }

        let (target, confidence) = self
            .import_table
            .resolve(&call_name)
            .unwrap_or((call_name, EdgeConfidence::Inferred));
        let id = self.next_edge_id("calls");
        self.edges.push(Edge::new(id, caller_id, target, EdgeKind::Calls, confidence, EdgeSource::Static).with_line(line));
    }
}

impl LanguageParser for PythonParser {
    fn file_extensions(&self) -> &'static [&'static str] {
        &[".py"]
    }

    fn parse_file(&self, file_path: &Path, root_path: &Path) -> anyhow::Result<(Vec<Node>, Vec<Edge>)> {
        let source = std::fs::read_to_string(file_path)
            .with_context(|| format!("reading {}", file_path.display()))?;
        let tree = Self::parse_tree(&source)?;
        let root_ts = tree.root_node();
        if root_ts.has_error() {
            tracing::warn!(file = %file_path.display(), "python syntax error, skipping file");
            return Ok((Vec::new(), Vec::new()));
        }
        let lines: Vec<&str> = source.lines().collect();
        let module_id = module_id_from_path(file_path, root_path);
        let rel_path = crate::fsutil::relative_normalized(root_path, file_path);

        let module_source = source.clone();
        let module_node = Node::new(
            module_id.clone(),
            NodeKind::Module,
            file_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&module_id)
                .to_string(),
            module_id.clone(),
            rel_path.clone(),
            1,
            lines.len().max(1) as u32,
            module_source,
        )
        .with_metadata("encoding", serde_json::Value::String("utf-8".to_string()));

        let mut scope = ScopeStack::new();
        scope.push(module_id.clone());
        let mut visitor = Visitor {
            src: source.as_bytes(),
            lines,
            module_id: module_id.clone(),
            file_path: rel_path,
            nodes: Vec::new(),
            edges: Vec::new(),
            import_table: ImportTable::new(),
            scope,
            class_depth: 0,
            claimed_lines: std::collections::HashSet::new(),
            edge_seq: Cell::new(0),
        };
        visitor.visit_module_body(root_ts);

        let mut all_nodes = vec![module_node];
        all_nodes.extend(visitor.nodes);
        Ok((all_nodes, visitor.edges))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn parse(src: &str) -> (Vec<Node>, Vec<Edge>) {
        let dir = tempdir().unwrap();
        let file = dir.path().join("mod_a.py");
        fs::write(&file, src).unwrap();
        PythonParser::new().parse_file(&file, dir.path()).unwrap()
    }

    #[test]
    fn extracts_module_and_function_nodes() {
        let (nodes, _edges) = parse("def greet():\n    return 'hi'\n");
        assert!(nodes.iter().any(|n| n.kind == NodeKind::Module));
        assert!(nodes.iter().any(|n| n.id == "mod_a.greet" && n.kind == NodeKind::Function));
    }

    #[test]
    fn methods_are_distinguished_from_functions() {
        let (nodes, _edges) = parse("class Foo:\n    def bar(self):\n        pass\n");
        let method = nodes.iter().find(|n| n.id == "mod_a.Foo.bar").unwrap();
        assert_eq!(method.kind, NodeKind::Method);
    }

    #[test]
    fn resolves_call_through_import_table() {
        let (_nodes, edges) = parse("from app.utils import helper\ndef f():\n    helper()\n");
        let call = edges.iter().find(|e| e.kind == EdgeKind::Calls).unwrap();
        assert_eq!(call.to_node, "app.utils.helper");
        assert_eq!(call.confidence, EdgeConfidence::Resolved);
    }

    #[test]
    fn dynamic_call_is_unresolved_with_reason() {
        let (_nodes, edges) = parse("def f():\n    eval('1+1')\n");
        let call = edges.iter().find(|e| e.kind == EdgeKind::Calls).unwrap();
        assert_eq!(call.confidence, EdgeConfidence::Unresolved);
        assert_eq!(call.untracked_reason, "dynamic_eval");
    }

    #[test]
    fn inheritance_edge_uses_import_table() {
        let (_nodes, edges) = parse("from app.base import Base\nclass Foo(Base):\n    pass\n");
        let edge = edges.iter().find(|e| e.kind == EdgeKind::Inherits).unwrap();
        assert_eq!(edge.to_node, "app.base.Base");
    }

    #[test]
    fn top_level_constant_becomes_a_block_node() {
        let (nodes, _edges) = parse("VERSION = '1.0'\n");
        assert!(nodes.iter().any(|n| n.kind == NodeKind::Block));
    }

    #[test]
    fn syntax_error_returns_empty_instead_of_failing() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.py");
        fs::write(&file, "def f(:\n").unwrap();
        let (nodes, edges) = PythonParser::new().parse_file(&file, dir.path()).unwrap();
        assert!(nodes.is_empty());
        assert!(edges.is_empty());
    }
}
