//! TypeScript/TSX parser: tree-sitter-backed extraction of functions,
//! classes, methods, arrow-function components, and import/call edges
//! (spec §4.1). Mirrors the Python parser's scope-stack design; TSX has
//! no original-source counterpart in the retrieval pack (the project's
//! TypeScript support was an optional extra the original never shipped),
//! so this is built directly from the specification's per-language rules.

use super::{module_id_from_path, ImportTable, LanguageParser};
use crate::shared::ScopeStack;
use anyhow::{anyhow, Context};
use lens_storage::{Edge, EdgeConfidence, EdgeKind, EdgeSource, Node, NodeKind};
use std::cell::Cell;
use std::path::Path;
use tree_sitter::{Node as TsNode, Parser, Tree};

pub struct TsxParser;

impl TsxParser {
    pub fn new() -> Self {
        Self
    }

    fn parse_tree(source: &str) -> anyhow::Result<Tree> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_typescript::language_tsx())
            .context("loading tsx grammar")?;
        parser
            .parse(source, None)
            .ok_or_else(|| anyhow!("tree-sitter produced no parse tree"))
    }
}

impl Default for TsxParser {
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

fn is_pascal_case(name: &str) -> bool {
    name.chars().next().map(|c| c.is_ascii_uppercase()).unwrap_or(false)
}

fn contains_jsx(node: TsNode) -> bool {
    if matches!(node.kind(), "jsx_element" | "jsx_self_closing_element" | "jsx_fragment") {
        return true;
    }
    let mut cursor = node.walk();
    node.children(&mut cursor).any(contains_jsx)
}

fn call_callee_name(node: TsNode, src: &[u8]) -> Option<String> {
    match node.kind() {
        "identifier" => Some(text(node, src).to_string()),
        "member_expression" => {
            let object = node.child_by_field_name("object")?;
            let property = node.child_by_field_name("property")?;
            let base = call_callee_name(object, src);
            match base {
                Some(base) => Some(format!("{base}.{}", text(property, src))),
                None => Some(text(property, src).to_string()),
            }
        }
        "call_expression" => call_callee_name(node.child_by_field_name("function")?, src),
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
    in_class: bool,
    edge_seq: Cell<u64>,
}

impl<'a> Visitor<'a> {
    fn next_edge_id(&self, prefix: &str) -> String {
        let n = self.edge_seq.get();
        self.edge_seq.set(n + 1);
        format!("{prefix}#{n}")
    }

    fn line_of(&self, node: TsNode) -> u32 {
        node.start_position().row as u32 + 1
    }

    fn end_line_of(&self, node: TsNode) -> u32 {
        node.end_position().row as u32 + 1
    }

    fn walk(&mut self, node: TsNode) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "import_statement" => self.visit_import(child),
                "function_declaration" => self.visit_function(child, None),
                "class_declaration" => self.visit_class(child),
                "lexical_declaration" | "variable_declaration" => self.visit_variable_decl(child),
                _ => self.walk(child),
            }
        }
    }

    fn visit_import(&mut self, node: TsNode) {
        let line = self.line_of(node);
        let Some(source_node) = node.child_by_field_name("source") else { return };
        let module_raw = text(source_node, self.src);
        let module = module_raw.trim_matches(|c| c == '\'' || c == '"').to_string();

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() != "import_clause" {
                continue;
            }
            let mut clause_cursor = child.walk();
            for clause_child in child.children(&mut clause_cursor) {
                match clause_child.kind() {
                    "identifier" => {
                        let local = text(clause_child, self.src).to_string();
                        self.import_table.add_module_import(&module, Some(&local));
                    }
                    "named_imports" => {
                        let mut named_cursor = clause_child.walk();
                        for spec in clause_child.named_children(&mut named_cursor) {
                            if spec.kind() != "import_specifier" {
                                continue;
                            }
                            let name = spec
                                .child_by_field_name("name")
                                .map(|n| text(n, self.src).to_string())
                                .unwrap_or_default();
                            let alias = spec.child_by_field_name("alias").map(|n| text(n, self.src).to_string());
                            if name.is_empty() {
                                continue;
                            }
                            self.import_table.add_import(&module, &name, alias.as_deref());
                        }
                    }
                    "namespace_import" => {
                        self.import_table.add_star_import(&module);
                    }
                    _ => {}
                }
            }
        }

        let id = self.next_edge_id("import");
        self.edges.push(
            Edge::new(id, &self.module_id, module, EdgeKind::Imports, EdgeConfidence::Resolved, EdgeSource::Static)
                .with_line(line),
        );
    }

    fn visit_class(&mut self, node: TsNode) {
        let Some(name_node) = node.child_by_field_name("name") else { return };
        let name = text(name_node, self.src).to_string();
        let node_id = self.scope.fqn_with(&name);
        let start = self.line_of(node);
        let end = self.end_line_of(node);
        let source = source_segment(&self.lines, start, end);

        self.nodes.push(Node::new(node_id.clone(), NodeKind::Class, name, node_id.clone(), self.file_path.clone(), start, end, source));

        if let Some(heritage) = node.child_by_field_name("heritage") {
            let mut cursor = heritage.walk();
            for clause in heritage.children(&mut cursor) {
                let mut clause_cursor = clause.walk();
                for expr in clause.named_children(&mut clause_cursor) {
                    if let Some(base_name) = call_callee_name(expr, self.src) {
                        let (target, confidence) = self
                            .import_table
                            .resolve(&base_name)
                            .unwrap_or((base_name, EdgeConfidence::Inferred));
                        let id = self.next_edge_id("inherits");
                        self.edges.push(
                            Edge::new(id, &node_id, target, EdgeKind::Inherits, confidence, EdgeSource::Static).with_line(start),
                        );
                    }
                }
            }
        }

        self.scope.push(node_id.clone());
        self.in_class = true;
        if let Some(body) = node.child_by_field_name("body") {
            let mut cursor = body.walk();
            for member in body.children(&mut cursor) {
                if member.kind() == "method_definition" {
                    self.visit_function(member, None);
                }
            }
        }
        self.in_class = false;
        self.scope.pop();
    }

    /// A top-level `const Name = (...) => ...` or `function Name(...)` whose
    /// body returns JSX and whose name is PascalCase is a component (spec
    /// §4.1 "React component detection via PascalCase + JSX-return").
    fn visit_variable_decl(&mut self, node: TsNode) {
        let mut cursor = node.walk();
        for declarator in node.named_children(&mut cursor) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            let Some(name_node) = declarator.child_by_field_name("name") else { continue };
            let name = text(name_node, self.src).to_string();
            let Some(value) = declarator.child_by_field_name("value") else { continue };
            if matches!(value.kind(), "arrow_function" | "function_expression") {
                self.visit_function_like(value, &name);
            }
        }
    }

    fn visit_function(&mut self, node: TsNode, fallback_name: Option<&str>) {
        let name = node
            .child_by_field_name("name")
            .map(|n| text(n, self.src).to_string())
            .or_else(|| fallback_name.map(|s| s.to_string()))
            .unwrap_or_else(|| "anonymous".to_string());
        self.visit_function_like(node, &name);
    }

    fn visit_function_like(&mut self, node: TsNode, name: &str) {
        let node_id = self.scope.fqn_with(name);
        let start = self.line_of(node);
        let end = self.end_line_of(node);
        let source = source_segment(&self.lines, start, end);
        let is_component = is_pascal_case(name) && contains_jsx(node);
        let kind = if self.in_class { NodeKind::Method } else { NodeKind::Function };

        self.nodes.push(
            Node::new(node_id.clone(), kind, name.to_string(), node_id.clone(), self.file_path.clone(), start, end, source)
                .with_metadata("is_react_component", serde_json::Value::Bool(is_component)),
        );

        let body = node.child_by_field_name("body");
        if let Some(body) = body {
            self.extract_calls(body, &node_id);
        }

        self.scope.push(node_id);
        let saved_in_class = self.in_class;
        self.in_class = false;
        if let Some(body) = body {
            let mut cursor = body.walk();
            for child in body.children(&mut cursor) {
                if matches!(child.kind(), "function_declaration" | "class_declaration") {
                    self.walk_one(child);
                }
            }
        }
        self.in_class = saved_in_class;
        self.scope.pop();
    }

    fn walk_one(&mut self, node: TsNode) {
        match node.kind() {
            "function_declaration" => self.visit_function(node, None),
            "class_declaration" => self.visit_class(node),
            _ => {}
        }
    }

    fn extract_calls(&mut self, body: TsNode, caller_id: &str) {
        let mut stack = vec![body];
        while let Some(current) = stack.pop() {
            let mut cursor = current.walk();
            for child in current.children(&mut cursor) {
                if matches!(child.kind(), "function_declaration" | "class_declaration" | "arrow_function" | "function_expression") {
                    continue;
                }
                match child.kind() {
                    "call_expression" => self.emit_call(child, caller_id),
                    "jsx_opening_element" | "jsx_self_closing_element" => self.emit_jsx_usage(child, caller_id),
                    _ => {}
                }
                stack.push(child);
            }
        }
    }

    fn emit_call(&mut self, node: TsNode, caller_id: &str) {
        let Some(func) = node.child_by_field_name("function") else { return };
        let Some(call_name) = call_callee_name(func, self.src) else { return };
        let line = self.line_of(node);
        let (target, confidence) = self
            .import_table
            .resolve(&call_name)
            .unwrap_or((call_name, EdgeConfidence::Inferred));
        let id = self.next_edge_id("calls");
        self.edges.push(Edge::new(id, caller_id, target, EdgeKind::Calls, confidence, EdgeSource::Static).with_line(line));
    }

    /// A JSX usage of a PascalCase tag (`<Foo ... />` or `<Foo>...</Foo>`'s
    /// opening element) is a usage of that component (spec §4.1 "JSX
    /// element usages of such names produce `calls` edges"). Lowercase
    /// tags are plain DOM elements and are skipped.
    fn emit_jsx_usage(&mut self, node: TsNode, caller_id: &str) {
        let Some(name_node) = node.child_by_field_name("name") else { return };
        let tag = text(name_node, self.src);
        if !is_pascal_case(tag) {
            return;
        }
        let line = self.line_of(node);
        let (target, confidence) = self
            .import_table
            .resolve(tag)
            .unwrap_or((tag.to_string(), EdgeConfidence::Inferred));
        let id = self.next_edge_id("calls");
        self.edges.push(Edge::new(id, caller_id, target, EdgeKind::Calls, confidence, EdgeSource::Static).with_line(line));
    }
}

impl LanguageParser for TsxParser {
    fn file_extensions(&self) -> &'static [&'static str] {
        &[".ts", ".tsx", ".js", ".jsx"]
    }

    fn parse_file(&self, file_path: &Path, root_path: &Path) -> anyhow::Result<(Vec<Node>, Vec<Edge>)> {
        let source = std::fs::read_to_string(file_path)
            .with_context(|| format!("reading {}", file_path.display()))?;
        let tree = Self::parse_tree(&source)?;
        let root_ts = tree.root_node();
        if root_ts.has_error() {
            tracing::warn!(file = %file_path.display(), "tsx syntax error, attempting tolerant recovery");
        }

        let lines: Vec<&str> = source.lines().collect();
        let module_id = module_id_from_path(file_path, root_path);
        let rel_path = crate::fsutil::relative_normalized(root_path, file_path);

        let module_node = Node::new(
            module_id.clone(),
            NodeKind::Module,
            file_path.file_stem().and_then(|s| s.to_str()).unwrap_or(&module_id).to_string(),
            module_id.clone(),
            rel_path.clone(),
            1,
            lines.len().max(1) as u32,
            source.clone(),
        );

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
            in_class: false,
            edge_seq: Cell::new(0),
        };
        visitor.walk(root_ts);

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

    fn parse(src: &str, ext: &str) -> (Vec<Node>, Vec<Edge>) {
        let dir = tempdir().unwrap();
        let file = dir.path().join(format!("widget.{ext}"));
        fs::write(&file, src).unwrap();
        TsxParser::new().parse_file(&file, dir.path()).unwrap()
    }

    #[test]
    fn extracts_function_declaration() {
        let (nodes, _edges) = parse("function greet() {\n  return 1;\n}\n", "ts");
        assert!(nodes.iter().any(|n| n.id == "widget.greet" && n.kind == NodeKind::Function));
    }

    #[test]
    fn detects_react_component_by_pascal_case_and_jsx() {
        let (nodes, _edges) = parse("const Card = () => {\n  return <div>hi</div>;\n};\n", "tsx");
        let node = nodes.iter().find(|n| n.id == "widget.Card").unwrap();
        assert_eq!(node.metadata.get("is_react_component"), Some(&serde_json::Value::Bool(true)));
    }

    #[test]
    fn lowercase_function_returning_jsx_is_not_a_component() {
        let (nodes, _edges) = parse("const card = () => {\n  return <div>hi</div>;\n};\n", "tsx");
        let node = nodes.iter().find(|n| n.id == "widget.card").unwrap();
        assert_eq!(node.metadata.get("is_react_component"), Some(&serde_json::Value::Bool(false)));
    }

    #[test]
    fn resolves_call_through_named_import() {
        let (_nodes, edges) = parse("import { helper } from './utils';\nfunction f() {\n  helper();\n}\n", "ts");
        let call = edges.iter().find(|e| e.kind == EdgeKind::Calls).unwrap();
        assert_eq!(call.to_node, "./utils.helper");
    }

    #[test]
    fn jsx_usage_of_imported_component_emits_calls_edge() {
        let (_nodes, edges) = parse(
            "import { Card } from './card';\nfunction Page() {\n  return <Card title=\"hi\" />;\n}\n",
            "tsx",
        );
        let call = edges
            .iter()
            .find(|e| e.kind == EdgeKind::Calls && e.to_node == "./card.Card")
            .expect("jsx usage should emit a calls edge");
        assert_eq!(call.from_node, "widget.Page");
    }

    #[test]
    fn jsx_lowercase_tag_is_not_a_component_usage() {
        let (_nodes, edges) = parse("function Page() {\n  return <div>hi</div>;\n}\n", "tsx");
        assert!(!edges.iter().any(|e| e.kind == EdgeKind::Calls));
    }

    #[test]
    fn class_methods_are_kind_method() {
        let (nodes, _edges) = parse("class Widget {\n  render() {\n    return 1;\n  }\n}\n", "ts");
        let node = nodes.iter().find(|n| n.id == "widget.Widget.render").unwrap();
        assert_eq!(node.kind, NodeKind::Method);
    }
}
