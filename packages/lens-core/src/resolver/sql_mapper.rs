//! R2: SQL/ORM table access mapping (spec §4.3).
//!
//! Grounded on `resolvers/sql_mapper.py`: table discovery is restricted
//! to class nodes (a `__tablename__`/`tableName` assignment, a Django
//! `models.Model`/SQLAlchemy `Base`/`declarative_base()` subclass, or a
//! Supabase-style `.from('table')` call), and access sites are found by
//! tracking which local variable a model class was assigned to within a
//! function and then watching for that variable's `.query`/`.objects`/
//! `.select`/`.insert`/`.update`/`.delete` calls. A denylist of noise
//! words (`self`, `cls`, common builtins) keeps the variable tracker from
//! treating every assignment as a model alias. Django's canonical
//! `Model.objects.filter(...)`/`Model._default_manager.get(...)` forms
//! walk one dotted segment further back since the manager attribute, not
//! the model, is the regex's immediate receiver. Raw `.sql` files are
//! scanned separately for table references and emit `migrates` edges
//! from a synthetic `sql.<dotted-path>` node.

use super::nearest_node_for_file;
use crate::fsutil::{relative_normalized, walk_project};
use lens_storage::{Edge, EdgeConfidence, EdgeKind, EdgeSource, Node, NodeKind};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

const NOISE_WORDS: &[&str] = &[
    "self", "cls", "request", "response", "data", "result", "results", "item", "items", "obj",
    "value", "values", "args", "kwargs", "params", "config", "context", "logger", "session",
];

fn tablename_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r#"__tablename__\s*=\s*["'](\w+)["']|tableName\s*=\s*["'](\w+)["']"#).unwrap())
}

fn django_model_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r#"class\s+(\w+)\s*\([^)]*(?:models\.Model|Base)[^)]*\)"#).unwrap())
}

fn supabase_from_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r#"\.from\(\s*["'](\w+)["']\s*\)"#).unwrap())
}

fn model_assign_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r#"(?m)^\s*(\w+)\s*=\s*(\w+)\s*$"#).unwrap())
}

fn query_call_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new(r#"(\w+)\.(query|objects|select|insert|update|delete|save|filter|all|create)\("#).unwrap()
    })
}

fn execute_call_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new(r#"\.execute\(\s*[`"'](?:SELECT|INSERT|UPDATE|DELETE)[^`"']*\s+(?:FROM|INTO|TABLE)\s+(\w+)"#).unwrap()
    })
}

fn raw_sql_table_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new(r#"(?i)\b(?:FROM|INTO|UPDATE)\s+(\w+)|\b(?:CREATE|ALTER|DROP)\s+TABLE\s+(?:IF\s+(?:NOT\s+)?EXISTS\s+)?(\w+)"#)
            .unwrap()
    })
}

const NOISE_TABLES: &[&str] = &["dual", "information_schema", "pg_catalog", "sqlite_master"];

/// Django's `Model.objects.filter(...)`/`Model._default_manager.get(...)`
/// bind `receiver` to the manager attribute, one dotted segment short of
/// the model name. Walk back to the preceding identifier in that case.
fn real_receiver(text: &str, cap: &regex::Captures, receiver: &str) -> String {
    if receiver == "objects" || receiver == "_default_manager" {
        let start = cap.get(1).unwrap().start();
        let before = text[..start].trim_end_matches('.');
        let ident_start = before
            .rfind(|c: char| !c.is_alphanumeric() && c != '_')
            .map(|i| i + 1)
            .unwrap_or(0);
        let candidate = &before[ident_start..];
        if !candidate.is_empty() {
            return candidate.to_string();
        }
    }
    receiver.to_string()
}

/// `rel_path` (forward-slash, no leading `./`) to the `sql.<dotted-path>`
/// virtual-node id used for `.sql` migration files (spec §6).
fn sql_dotted_id(rel_path: &str) -> String {
    let stem = rel_path.strip_suffix(".sql").unwrap_or(rel_path);
    format!("sql.{}", stem.replace('/', "."))
}

#[derive(Clone, Copy, PartialEq)]
enum OpType {
    Read,
    Write,
}

fn op_type_for(verb: &str) -> OpType {
    match verb {
        "insert" | "update" | "delete" | "save" | "create" => OpType::Write,
        _ => OpType::Read,
    }
}

pub fn resolve(nodes: &[Node], root: &Path) -> (Vec<Node>, Vec<Edge>) {
    let mut out_nodes = Vec::new();
    let mut out_edges = Vec::new();
    let mut tables: HashSet<String> = HashSet::new();
    let mut seen: HashSet<(String, &'static str, String)> = HashSet::new();

    // Pass 1: table discovery, restricted to class-kind nodes.
    for node in nodes.iter().filter(|n| n.kind == NodeKind::Class) {
        // Only the head of the class body is trusted for `__tablename__`.
        let head = head_slice(&node.source_code, 200);
        let table = tablename_re()
            .captures(head)
            .map(|c| c.get(1).or(c.get(2)).unwrap().as_str().to_string())
            .or_else(|| django_model_re().captures(head).map(|c| to_snake_case(&c[1])));
        if let Some(table_name) = table {
            if tables.insert(table_name.clone()) {
                out_nodes.push(Node::new(
                    format!("db.table.{table_name}"),
                    NodeKind::Virtual,
                    &table_name,
                    format!("db.table.{table_name}"),
                    &node.file_path,
                    node.start_line,
                    node.start_line,
                    format!("table {table_name}"),
                ));
            }
        }
    }

    // Pass 2: per-file access-site scanning with a model-alias tracker.
    for file in walk_project(root) {
        let rel = relative_normalized(root, &file);
        if super::is_test_path(&rel) {
            continue;
        }
        let Some(ext) = file.extension().and_then(|e| e.to_str()) else { continue };
        if !matches!(ext, "py" | "ts" | "tsx" | "js" | "jsx") {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(&file) else { continue };
        let Some(caller) = nearest_node_for_file(nodes, &rel) else { continue };

        let class_names: HashSet<String> = nodes
            .iter()
            .filter(|n| n.file_path == rel && n.kind == NodeKind::Class)
            .map(|n| n.name.clone())
            .collect();

        let mut alias_to_table: HashMap<String, String> = HashMap::new();
        for cap in model_assign_re().captures_iter(&text) {
            let alias = cap[1].to_string();
            let rhs = cap[2].to_string();
            if NOISE_WORDS.contains(&alias.as_str()) {
                continue;
            }
            if class_names.contains(&rhs) {
                if let Some(table) = table_for_class(nodes, &rhs) {
                    alias_to_table.insert(alias, table);
                }
            }
        }

        for cap in query_call_re().captures_iter(&text) {
            let receiver = real_receiver(&text, &cap, &cap[1]);
            let verb = &cap[2];
            if NOISE_WORDS.contains(&receiver.as_str()) {
                continue;
            }
            let table = alias_to_table
                .get(&receiver)
                .cloned()
                .or_else(|| class_names.contains(&receiver).then(|| table_for_class(nodes, &receiver)).flatten())
                .or_else(|| {
                    let snake = to_snake_case(&receiver);
                    tables.contains(&snake).then_some(snake)
                });
            let Some(table) = table else { continue };
            push_access(&caller, &table, op_type_for(verb), &mut out_edges, &mut seen);
        }

        for cap in supabase_from_re().captures_iter(&text) {
            let table = cap[1].to_string();
            if tables.insert(table.clone()) {
                out_nodes.push(Node::new(
                    format!("db.table.{table}"),
                    NodeKind::Virtual,
                    &table,
                    format!("db.table.{table}"),
                    &rel,
                    1,
                    1,
                    format!("table {table}"),
                ));
            }
            push_access(&caller, &table, OpType::Read, &mut out_edges, &mut seen);
        }

        for cap in execute_call_re().captures_iter(&text) {
            let table = cap[1].to_string();
            if tables.insert(table.clone()) {
                out_nodes.push(Node::new(
                    format!("db.table.{table}"),
                    NodeKind::Virtual,
                    &table,
                    format!("db.table.{table}"),
                    &rel,
                    1,
                    1,
                    format!("table {table}"),
                ));
            }
            push_access(&caller, &table, OpType::Read, &mut out_edges, &mut seen);
        }
    }

    // Pass 3: raw `.sql` files (migrations/seed scripts) are not tied to
    // any parsed node, so each gets its own `sql.<dotted-path>` virtual
    // node carrying the tables it touches, with a `migrates` edge to each.
    for file in walk_project(root) {
        let rel = relative_normalized(root, &file);
        if file.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(&file) else { continue };
        let mut touched: Vec<String> = Vec::new();
        for cap in raw_sql_table_re().captures_iter(&text) {
            let table = cap.get(1).or(cap.get(2)).unwrap().as_str().to_lowercase();
            if NOISE_TABLES.contains(&table.as_str()) {
                continue;
            }
            if tables.insert(table.clone()) {
                out_nodes.push(Node::new(
                    format!("db.table.{table}"),
                    NodeKind::Virtual,
                    &table,
                    format!("db.table.{table}"),
                    &rel,
                    1,
                    1,
                    format!("table {table}"),
                ));
            }
            if !touched.contains(&table) {
                touched.push(table);
            }
        }
        if touched.is_empty() {
            continue;
        }
        let sql_id = sql_dotted_id(&rel);
        out_nodes.push(
            Node::new(sql_id.clone(), NodeKind::Virtual, &rel, sql_id.clone(), &rel, 1, 1, format!("sql file {rel}"))
                .with_metadata("tables", serde_json::json!(touched)),
        );
        for table in &touched {
            let target = format!("db.table.{table}");
            out_edges.push(Edge::new(
                Edge::derive_id(&sql_id, &target, EdgeKind::Migrates, None),
                sql_id.clone(),
                target,
                EdgeKind::Migrates,
                EdgeConfidence::Inferred,
                EdgeSource::Static,
            ));
        }
    }

    (out_nodes, out_edges)
}

fn table_for_class(nodes: &[Node], class_name: &str) -> Option<String> {
    let node = nodes.iter().find(|n| n.kind == NodeKind::Class && n.name == class_name)?;
    let head = head_slice(&node.source_code, 200);
    tablename_re()
        .captures(head)
        .map(|c| c.get(1).or(c.get(2)).unwrap().as_str().to_string())
        .or_else(|| Some(to_snake_case(class_name)))
}

fn push_access(
    caller: &str,
    table: &str,
    op: OpType,
    out_edges: &mut Vec<Edge>,
    seen: &mut HashSet<(String, &'static str, String)>,
) {
    let (kind, tag) = match op {
        OpType::Read => (EdgeKind::ReadsTable, "read"),
        OpType::Write => (EdgeKind::WritesTable, "write"),
    };
    let key = (caller.to_string(), tag, table.to_string());
    if !seen.insert(key) {
        return;
    }
    let target = format!("db.table.{table}");
    out_edges.push(Edge::new(
        Edge::derive_id(caller, &target, kind, None),
        caller.to_string(),
        target,
        kind,
        EdgeConfidence::Inferred,
        EdgeSource::Static,
    ));
}

/// A byte-safe prefix of `s` no longer than `max_bytes`.
fn head_slice(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::new();
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    if out.ends_with('y') {
        out.pop();
        out.push_str("ies");
    } else if !out.ends_with('s') {
        out.push('s');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn class_node(name: &str, source: &str, file: &str) -> Node {
        Node::new(name, NodeKind::Class, name, name, file, 1, 10, source)
    }

    #[test]
    fn to_snake_case_pluralizes_camel_class_names() {
        assert_eq!(to_snake_case("UserAccount"), "user_accounts");
        assert_eq!(to_snake_case("Category"), "categories");
    }

    #[test]
    fn resolve_discovers_tablename_and_tracks_alias_query() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("models.py"),
            "class User:\n    __tablename__ = \"users\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("service.py"),
            "from .models import User\n\ndef get_all():\n    model = User\n    model.query(\"x\")\n",
        )
        .unwrap();
        let nodes = vec![class_node("User", "class User:\n    __tablename__ = \"users\"\n", "models.py")];
        let (out_nodes, edges) = resolve(&nodes, dir.path());
        assert!(out_nodes.iter().any(|n| n.id == "db.table.users"));
        assert!(edges.iter().any(|e| e.kind == EdgeKind::ReadsTable && e.to_node == "db.table.users"));
    }

    #[test]
    fn resolve_detects_supabase_from_calls() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("db.ts"), "await supabase.from('orders').select('*');\n").unwrap();
        let (nodes, edges) = resolve(&[], dir.path());
        assert!(nodes.iter().any(|n| n.id == "db.table.orders"));
        assert!(edges.iter().any(|e| e.to_node == "db.table.orders"));
    }

    #[test]
    fn resolve_ignores_noise_word_receivers() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "self.query(\"x\")\n").unwrap();
        let (nodes, _edges) = resolve(&[], dir.path());
        assert!(nodes.is_empty());
    }

    #[test]
    fn resolve_walks_back_through_django_manager_to_the_model() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("models.py"),
            "class User:\n    __tablename__ = \"users\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("views.py"),
            "from .models import User\n\ndef get_active():\n    User.objects.filter(active=True)\n",
        )
        .unwrap();
        let nodes = vec![class_node("User", "class User:\n    __tablename__ = \"users\"\n", "models.py")];
        let (_out_nodes, edges) = resolve(&nodes, dir.path());
        assert!(edges.iter().any(|e| e.kind == EdgeKind::ReadsTable && e.to_node == "db.table.users"));
    }

    #[test]
    fn resolve_scans_raw_sql_files_and_emits_migrates_edges() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("001_init.sql"),
            "CREATE TABLE IF NOT EXISTS orders (id INTEGER);\nINSERT INTO orders VALUES (1);\n",
        )
        .unwrap();
        let (nodes, edges) = resolve(&[], dir.path());
        assert!(nodes.iter().any(|n| n.id == "db.table.orders"));
        let sql_node = nodes
            .iter()
            .find(|n| n.id == "sql.001_init")
            .expect("raw sql file should produce a sql.<dotted-path> node");
        assert_eq!(sql_node.metadata.get("tables").and_then(|v| v.as_array()).map(|a| a.len()), Some(1));
        assert!(edges.iter().any(|e| e.kind == EdgeKind::Migrates
            && e.from_node == "sql.001_init"
            && e.to_node == "db.table.orders"));
    }
}
