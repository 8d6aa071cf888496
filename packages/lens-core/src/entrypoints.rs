//! Declarative entry-point pattern registry for dead-code detection
//! (spec §4.5). Entry points are reachability roots: anything not
//! reachable from one is a dead-code candidate.

use lens_storage::{EdgeKind, Node, NodeKind};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    Exact,
    Prefix,
    Suffix,
    Contains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckField {
    Name,
    FilePath,
    Source,
    Type,
}

/// A single declarative rule. Multiple `values` are OR-ed; the pattern
/// fires if any value matches via `op` against the node's `field`.
pub struct EntryPointPattern {
    pub category: &'static str,
    pub field: CheckField,
    pub op: MatchOp,
    pub values: &'static [&'static str],
    pub type_filter: Option<&'static [NodeKind]>,
}

macro_rules! pattern {
    ($category:expr, $field:expr, $op:expr, $values:expr) => {
        EntryPointPattern {
            category: $category,
            field: $field,
            op: $op,
            values: $values,
            type_filter: None,
        }
    };
    ($category:expr, $field:expr, $op:expr, $values:expr, $types:expr) => {
        EntryPointPattern {
            category: $category,
            field: $field,
            op: $op,
            values: $values,
            type_filter: Some($types),
        }
    };
}

pub static ENTRY_POINT_PATTERNS: &[EntryPointPattern] = &[
    pattern!("main", CheckField::Name, MatchOp::Exact, &["main", "__main__"]),
    pattern!("test", CheckField::Name, MatchOp::Prefix, &["test_"]),
    pattern!("test", CheckField::FilePath, MatchOp::Prefix, &["tests/"]),
    pattern!("structural", CheckField::Type, MatchOp::Exact, &["block"]),
    pattern!("structural", CheckField::Type, MatchOp::Exact, &["class"]),
    pattern!("cli", CheckField::Name, MatchOp::Exact, &["cli", "app", "run", "main_cli"]),
    pattern!("cli", CheckField::Name, MatchOp::Prefix, &["cmd_"]),
    pattern!("handler", CheckField::Name, MatchOp::Prefix, &["handle_"]),
    pattern!("handler", CheckField::Name, MatchOp::Exact, &["handle_tool_call"]),
    pattern!(
        "web",
        CheckField::Name,
        MatchOp::Contains,
        &["_handler", "_endpoint", "_view", "_route"],
        &[NodeKind::Function]
    ),
    pattern!(
        "web",
        CheckField::FilePath,
        MatchOp::Contains,
        &["/router", "/routes", "/views", "/api/", "router.py", "routes.py", "views.py", "endpoints.py"],
        &[NodeKind::Function]
    ),
    pattern!(
        "web",
        CheckField::Source,
        MatchOp::Contains,
        &[
            "@app.", "@router.", "@bp.", "@api.", "@route", "@get", "@post", "@put", "@delete",
            "@patch", "@websocket", "Depends("
        ],
        &[NodeKind::Function]
    ),
    pattern!(
        "web",
        CheckField::Source,
        MatchOp::Contains,
        &["@st.cache", "@st.experimental", "st.button(", "st.form("],
        &[NodeKind::Function]
    ),
    pattern!("web", CheckField::FilePath, MatchOp::Contains, &["frontend"], &[NodeKind::Function]),
    pattern!(
        "migration",
        CheckField::Name,
        MatchOp::Exact,
        &["upgrade", "downgrade", "run_migrations_online", "run_migrations_offline"]
    ),
    pattern!("migration", CheckField::FilePath, MatchOp::Contains, &["alembic"], &[NodeKind::Function]),
    pattern!("migration", CheckField::FilePath, MatchOp::Suffix, &["env.py"], &[NodeKind::Function]),
    pattern!("migration", CheckField::FilePath, MatchOp::Contains, &["/versions/", "/migrations/"], &[NodeKind::Function]),
    pattern!(
        "task_queue",
        CheckField::Source,
        MatchOp::Contains,
        &["@celery.task", "@app.task", "@shared_task", "@celery_app.task", "celery.Task"],
        &[NodeKind::Function]
    ),
    pattern!("task_queue", CheckField::Source, MatchOp::Contains, &["@job"], &[NodeKind::Function]),
    pattern!("pytest", CheckField::Source, MatchOp::Contains, &["@pytest.fixture"], &[NodeKind::Function]),
    pattern!("pytest", CheckField::FilePath, MatchOp::Suffix, &["conftest.py"], &[NodeKind::Function]),
    pattern!("django", CheckField::FilePath, MatchOp::Contains, &["/management/commands/"]),
    pattern!(
        "django",
        CheckField::Source,
        MatchOp::Contains,
        &["@receiver", "pre_save", "post_save", "pre_delete", "post_delete"],
        &[NodeKind::Function]
    ),
    pattern!("django", CheckField::FilePath, MatchOp::Contains, &["admin.py"], &[NodeKind::Class, NodeKind::Function]),
    pattern!(
        "sqlalchemy",
        CheckField::Source,
        MatchOp::Contains,
        &["@event.listens_for", "event.listen"],
        &[NodeKind::Function]
    ),
    pattern!(
        "dunder",
        CheckField::Name,
        MatchOp::Exact,
        &[
            "__init__", "__post_init__", "__new__", "__del__", "__repr__", "__str__", "__hash__",
            "__eq__", "__ne__", "__lt__", "__le__", "__gt__", "__ge__", "__len__", "__iter__",
            "__next__", "__getitem__", "__setitem__", "__contains__", "__call__", "__enter__",
            "__exit__", "__get__", "__set__", "__delete__", "from_dict", "to_dict"
        ],
        &[NodeKind::Method]
    ),
    pattern!("property", CheckField::Name, MatchOp::Prefix, &["is_", "has_", "get_", "set_"], &[NodeKind::Method]),
    pattern!("visitor", CheckField::Name, MatchOp::Prefix, &["visit_"]),
    pattern!("visitor", CheckField::Name, MatchOp::Exact, &["generic_visit"]),
    pattern!("helper", CheckField::Name, MatchOp::Prefix, &["_detect_", "_compute_"]),
    pattern!(
        "enum",
        CheckField::Name,
        MatchOp::Suffix,
        &["Enum", "Role", "Type", "Confidence", "Source"],
        &[NodeKind::Class]
    ),
    pattern!(
        "pydantic",
        CheckField::Source,
        MatchOp::Contains,
        &["@validator", "@field_validator", "@root_validator", "@model_validator"],
        &[NodeKind::Method]
    ),
    pattern!(
        "click",
        CheckField::Source,
        MatchOp::Contains,
        &["@click.command", "@click.group", "@app.command", "@typer.command"],
        &[NodeKind::Function]
    ),
];

fn field_value<'a>(field: CheckField, node: &'a Node) -> &'a str {
    match field {
        CheckField::Name => &node.name,
        CheckField::FilePath => &node.file_path,
        CheckField::Source => &node.source_code,
        CheckField::Type => node.kind.as_str(),
    }
}

fn check_op(op: MatchOp, value: &str, values: &[&str]) -> bool {
    match op {
        MatchOp::Exact => values.contains(&value),
        MatchOp::Prefix => values.iter().any(|v| value.starts_with(v)),
        MatchOp::Suffix => values.iter().any(|v| value.ends_with(v)),
        MatchOp::Contains => values.iter().any(|v| value.contains(v)),
    }
}

pub fn matches_pattern(pattern: &EntryPointPattern, node: &Node) -> bool {
    if let Some(types) = pattern.type_filter {
        if !types.contains(&node.kind) {
            return false;
        }
    }
    check_op(pattern.op, field_value(pattern.field, node), pattern.values)
}

/// Patterns that don't fit the declarative model: package-init top-level
/// functions and private (but not dunder) methods.
fn custom_predicate_matches(node: &Node) -> bool {
    let is_init_top_level = node.file_path.ends_with("__init__.py")
        && node.kind == NodeKind::Function
        && node.id.matches('.').count() == 1;
    let is_private_method = node.kind == NodeKind::Method
        && node.name.starts_with('_')
        && !node.name.starts_with("__");
    is_init_top_level || is_private_method
}

/// Apply all patterns in one pass, short-circuiting per node on first
/// match, falling back to the custom predicates (spec §4.5).
pub fn collect_entry_points(nodes: &[Node]) -> HashSet<String> {
    let mut entries = HashSet::new();
    for node in nodes {
        let declarative_hit = ENTRY_POINT_PATTERNS.iter().any(|p| matches_pattern(p, node));
        if declarative_hit || custom_predicate_matches(node) {
            entries.insert(node.id.clone());
        }
    }
    entries
}

/// Names exported via a module's `__all__` are entry points one level
/// deep (spec §4.5 expansion 2).
pub fn collect_public_api(nodes: &[Node]) -> HashSet<String> {
    let mut public_api = HashSet::new();
    for module in nodes.iter().filter(|n| n.kind == NodeKind::Module) {
        if !module.source_code.contains("__all__") {
            continue;
        }
        let prefix = format!("{}.", module.id);
        for other in nodes {
            if let Some(remainder) = other.id.strip_prefix(&prefix) {
                if !remainder.contains('.') {
                    public_api.insert(other.id.clone());
                }
            }
        }
    }
    public_api
}

/// The three graph-based expansions (spec §4.5): decorated targets,
/// methods of entry-point classes, and nested defs of entry-point
/// functions.
pub fn expand_entry_points(
    nodes: &[Node],
    edges: &[lens_storage::Edge],
    entries: HashSet<String>,
) -> HashSet<String> {
    let mut expanded = entries;

    for edge in edges {
        if edge.kind == EdgeKind::Decorates {
            expanded.insert(edge.to_node.clone());
        }
    }

    let class_entries: HashSet<&str> = nodes
        .iter()
        .filter(|n| n.kind == NodeKind::Class && expanded.contains(&n.id))
        .map(|n| n.id.as_str())
        .collect();
    for node in nodes.iter().filter(|n| n.kind == NodeKind::Method) {
        if let Some((class_id, _)) = node.id.rsplit_once('.') {
            if class_entries.contains(class_id) {
                expanded.insert(node.id.clone());
            }
        }
    }

    let function_entries: HashSet<&str> = nodes
        .iter()
        .filter(|n| n.kind == NodeKind::Function && expanded.contains(&n.id))
        .map(|n| n.id.as_str())
        .collect();
    for node in nodes.iter().filter(|n| matches!(n.kind, NodeKind::Function | NodeKind::Class)) {
        if let Some((parent_id, _)) = node.id.rsplit_once('.') {
            if function_entries.contains(parent_id) {
                expanded.insert(node.id.clone());
            }
        }
    }

    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_storage::{Edge, EdgeConfidence, EdgeSource};

    fn node(id: &str, kind: NodeKind, file_path: &str) -> Node {
        Node::new(id, kind, id.rsplit('.').next().unwrap(), id, file_path, 1, 2, "")
    }

    #[test]
    fn main_function_is_always_an_entry_point() {
        let nodes = vec![node("app.main", NodeKind::Function, "app.py")];
        assert!(collect_entry_points(&nodes).contains("app.main"));
    }

    #[test]
    fn test_prefixed_function_is_entry_point() {
        let nodes = vec![node("tests.test_foo", NodeKind::Function, "tests/test_foo.py")];
        assert!(collect_entry_points(&nodes).contains("tests.test_foo"));
    }

    #[test]
    fn ordinary_helper_is_not_an_entry_point() {
        let nodes = vec![node("app.util.compute", NodeKind::Function, "app/util.py")];
        assert!(!collect_entry_points(&nodes).contains("app.util.compute"));
    }

    #[test]
    fn private_method_custom_predicate_matches() {
        let nodes = vec![node("app.Foo._helper", NodeKind::Method, "app.py")];
        assert!(collect_entry_points(&nodes).contains("app.Foo._helper"));
    }

    #[test]
    fn dunder_method_is_entry_point() {
        let nodes = vec![node("app.Foo.__init__", NodeKind::Method, "app.py")];
        assert!(collect_entry_points(&nodes).contains("app.Foo.__init__"));
    }

    #[test]
    fn expand_entry_points_adds_methods_of_entry_classes() {
        let class = node("app.Foo", NodeKind::Class, "app.py");
        let method = node("app.Foo.bar", NodeKind::Method, "app.py");
        let nodes = vec![class, method];
        let mut entries = HashSet::new();
        entries.insert("app.Foo".to_string());
        let expanded = expand_entry_points(&nodes, &[], entries);
        assert!(expanded.contains("app.Foo.bar"));
    }

    #[test]
    fn expand_entry_points_follows_decorates_edges() {
        let nodes = vec![node("app.decorated", NodeKind::Function, "app.py")];
        let edge = Edge::new(
            "d1",
            "app.some_decorator",
            "app.decorated",
            EdgeKind::Decorates,
            EdgeConfidence::Inferred,
            EdgeSource::Static,
        );
        let expanded = expand_entry_points(&nodes, &[edge], HashSet::new());
        assert!(expanded.contains("app.decorated"));
    }

    #[test]
    fn public_api_via_dunder_all_is_collected() {
        let module = Node::new(
            "app.pkg",
            NodeKind::Module,
            "pkg",
            "app.pkg",
            "app/pkg/__init__.py",
            1,
            3,
            "__all__ = ['foo']\n",
        );
        let func = node("app.pkg.foo", NodeKind::Function, "app/pkg/foo.py");
        let public_api = collect_public_api(&[module, func]);
        assert!(public_api.contains("app.pkg.foo"));
    }
}
