//! R1: HTTP route registration and call-site mapping (spec §4.3).
//!
//! Grounded on `resolvers/api_mapper.py`: a first pass collects every
//! route registration (Flask/FastAPI decorators, Express-style calls),
//! with router-prefix propagation for routers declared with a `prefix=`/
//! `url_prefix=` kwarg (`APIRouter`/`Blueprint`) and threaded through
//! `include_router(sub, prefix=...)` calls, including across files via
//! the same `from module import name` forms the parser's import table
//! understands; a second pass scans for outbound HTTP calls (`requests.*`,
//! `axios.*`, `fetch`) and matches their URL against the registry after
//! both sides run through the same path-normalization pipeline
//! (`${expr}`/`<param>`/`{param}` template forms, then `:name`, all
//! collapsed to `:param`, trailing slash stripped) with segment-wise
//! `:param`-wildcard matching. Test files are excluded.

use super::nearest_node_for_file;
use crate::fsutil::{relative_normalized, walk_project};
use lens_storage::{Edge, EdgeConfidence, EdgeKind, EdgeSource, Node, NodeKind};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

fn decorator_route_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new(r#"(?m)^\s*@(\w+)\.(get|post|put|delete|patch|route)\(\s*["']([^"']*)["']"#).unwrap()
    })
}

fn methods_kwarg_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r#"methods\s*=\s*\[([^\]]*)\]"#).unwrap())
}

fn express_route_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    // Receiver is constrained to known router/app identifiers so a bare
    // `axios.get(url)`/`client.get(url)` frontend call site (handled
    // separately by `call_site_re`) can never also register as a route.
    CELL.get_or_init(|| {
        Regex::new(r#"\b(app|router|\w*[Rr]outer|fastify|hono)\.(get|post|put|delete|patch|use|all)\(\s*["']([^"']*)["']"#).unwrap()
    })
}

/// `router = APIRouter(prefix="/api")` or `bp = Blueprint("name", __name__,
/// url_prefix="/api")` — either framework's router-construction kwarg.
fn router_decl_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r#"(\w+)\s*=\s*(?:APIRouter|Blueprint)\(([^)]*)\)"#).unwrap())
}

fn inline_prefix_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r#"(?:prefix|url_prefix)\s*=\s*["']([^"']+)["']"#).unwrap())
}

/// `app.include_router(sub)` or `app.include_router(sub, prefix="/x")` —
/// mounts a router under a parent, optionally adding another prefix
/// segment (spec §4.3 R1 "nested `include_router` inherits the parent's
/// `APIRouter` prefix").
fn include_router_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new(r#"(\w+)\.include_router\(\s*(\w+)(?:\s*,\s*prefix\s*=\s*["']([^"']+)["'])?"#).unwrap()
    })
}

/// `from pkg.routers.users import router [as users_router]` — enough of
/// an import form to follow a router variable across files when it is
/// included from somewhere other than its declaring module.
fn from_import_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r#"(?m)^\s*from\s+([\w.]+)\s+import\s+(\w+)(?:\s+as\s+(\w+))?"#).unwrap())
}

fn call_site_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new(r#"(?:requests|axios)\.(get|post|put|delete|patch)\(\s*[`"']([^`"']*)[`"']|fetch\(\s*[`"']([^`"']*)[`"']"#).unwrap()
    })
}

fn template_expr_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r#"\$\{[^}]*\}"#).unwrap())
}

fn brace_or_angle_param_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r#"\{[^}]*\}|<[^>]*>"#).unwrap())
}

fn colon_param_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r#":\w+"#).unwrap())
}

/// Collapse every templating convention for a path parameter to `:param`
/// and strip a trailing slash, so a registered route and a call-site URL
/// are comparable regardless of which framework's syntax produced them.
fn normalize_path(path: &str) -> String {
    let mut p = template_expr_re().replace_all(path, ":param").to_string();
    p = brace_or_angle_param_re().replace_all(&p, ":param").to_string();
    p = colon_param_re().replace_all(&p, ":param").to_string();
    if p.len() > 1 && p.ends_with('/') {
        p.pop();
    }
    p
}

fn segments_match(registered: &str, called: &str) -> bool {
    let r: Vec<&str> = registered.split('/').filter(|s| !s.is_empty()).collect();
    let c: Vec<&str> = called.split('/').filter(|s| !s.is_empty()).collect();
    if r.len() != c.len() {
        return false;
    }
    r.iter().zip(c.iter()).all(|(a, b)| *a == ":param" || a == b)
}

struct Route {
    node_id: String,
    method: String,
    path: String,
}

/// `(file, var)` identifies a router/blueprint variable uniquely across
/// the whole project, since the same local name (`router`) is reused in
/// every file that declares one.
type RouterKey = (String, String);

/// Resolve a local name imported via `from module import name [as alias]`
/// back to the `(file, name)` of the module that actually declares it, so
/// a router included from another file still finds its own prefix.
fn resolve_import_target(
    nodes: &[Node],
    import_map: &HashMap<RouterKey, (String, String)>,
    file: &str,
    local_name: &str,
) -> Option<RouterKey> {
    let (module_dotted, remote_name) = import_map.get(&(file.to_string(), local_name.to_string()))?;
    let module_file = nodes
        .iter()
        .find(|n| n.kind == NodeKind::Module && n.id == *module_dotted)
        .map(|n| n.file_path.clone())?;
    Some((module_file, remote_name.clone()))
}

/// Effective mount prefix for a declared router, walking up the
/// `include_router` chain (same-file or cross-file) to the root app. A
/// `visited` guard breaks any accidental include cycle.
fn effective_prefix(
    key: &RouterKey,
    own_prefix: &HashMap<RouterKey, String>,
    parent_of: &HashMap<RouterKey, (RouterKey, String)>,
    visited: &mut HashSet<RouterKey>,
) -> String {
    let own = own_prefix.get(key).cloned().unwrap_or_default();
    if !visited.insert(key.clone()) {
        return own;
    }
    match parent_of.get(key) {
        Some((parent_key, extra)) if own_prefix.contains_key(parent_key) => {
            let parent_total = effective_prefix(parent_key, own_prefix, parent_of, visited);
            format!("{parent_total}{extra}{own}")
        }
        Some((_, extra)) => format!("{extra}{own}"),
        None => own,
    }
}

pub fn resolve(nodes: &[Node], root: &Path) -> (Vec<Node>, Vec<Edge>) {
    let mut out_nodes = Vec::new();
    let mut out_edges = Vec::new();
    let mut routes: Vec<Route> = Vec::new();
    let mut seen_routes: std::collections::HashSet<String> = std::collections::HashSet::new();

    // Pass 0: collect every router/blueprint declaration, import alias,
    // and `include_router` mount across the whole project before any
    // route is finalized, since a router's effective prefix can depend
    // on how it's mounted in a file parsed later in this walk.
    let mut file_texts: HashMap<String, (String, String)> = HashMap::new(); // rel -> (ext, text)
    let mut own_prefix: HashMap<RouterKey, String> = HashMap::new();
    let mut import_map: HashMap<RouterKey, (String, String)> = HashMap::new();
    let mut raw_includes: Vec<(String, String, String, Option<String>)> = Vec::new(); // (file, parent_var, child_var, extra_prefix)

    for file in walk_project(root) {
        let rel = relative_normalized(root, &file);
        if super::is_test_path(&rel) {
            continue;
        }
        let Some(ext) = file.extension().and_then(|e| e.to_str()) else { continue };
        let Ok(text) = std::fs::read_to_string(&file) else { continue };

        if ext == "py" {
            for cap in router_decl_re().captures_iter(&text) {
                let var = cap[1].to_string();
                let args = &cap[2];
                let prefix = inline_prefix_re().captures(args).map(|m| m[1].to_string()).unwrap_or_default();
                own_prefix.insert((rel.clone(), var), prefix);
            }
            for cap in from_import_re().captures_iter(&text) {
                let module = cap[1].to_string();
                let name = cap[2].to_string();
                let local = cap.get(3).map(|m| m.as_str().to_string()).unwrap_or_else(|| name.clone());
                import_map.insert((rel.clone(), local), (module, name));
            }
            for cap in include_router_re().captures_iter(&text) {
                let parent_var = cap[1].to_string();
                let child_var = cap[2].to_string();
                let extra = cap.get(3).map(|m| m.as_str().to_string());
                raw_includes.push((rel.clone(), parent_var, child_var, extra));
            }
        }
        file_texts.insert(rel, (ext.to_string(), text));
    }

    // Resolve each include's child router to the (file, var) that actually
    // declares it — same-file if it's a local name, else via the import map.
    let mut parent_of: HashMap<RouterKey, (RouterKey, String)> = HashMap::new();
    for (file, parent_var, child_var, extra) in &raw_includes {
        let child_key = if own_prefix.contains_key(&(file.clone(), child_var.clone())) {
            Some((file.clone(), child_var.clone()))
        } else {
            resolve_import_target(nodes, &import_map, file, child_var)
        };
        let Some(child_key) = child_key else { continue };
        parent_of
            .entry(child_key)
            .or_insert_with(|| ((file.clone(), parent_var.clone()), extra.clone().unwrap_or_default()));
    }

    let mut total_prefix: HashMap<RouterKey, String> = HashMap::new();
    for key in own_prefix.keys() {
        let mut visited = HashSet::new();
        total_prefix.insert(key.clone(), effective_prefix(key, &own_prefix, &parent_of, &mut visited));
    }

    for (rel, (ext, text)) in &file_texts {
        if ext == "py" {
            for cap in decorator_route_re().captures_iter(text) {
                let receiver = &cap[1];
                let verb = &cap[2];
                let raw_path = &cap[3];
                let prefix = total_prefix.get(&(rel.clone(), receiver.to_string())).cloned().unwrap_or_default();
                let full_path = format!("{prefix}{raw_path}");
                let normalized = normalize_path(&full_path);

                let methods: Vec<String> = if verb == "route" {
                    let tail_start = cap.get(0).unwrap().end();
                    let tail_end = text[tail_start..].find('\n').map(|i| tail_start + i).unwrap_or(text.len());
                    let rest_of_line = &text[tail_start..tail_end];
                    match methods_kwarg_re().captures(rest_of_line) {
                        Some(m) => m[1].split(',').map(|s| s.trim().trim_matches('"').trim_matches('\'').to_ascii_uppercase()).collect(),
                        None => vec!["GET".to_string()],
                    }
                } else {
                    vec![verb.to_ascii_uppercase()]
                };

                let decorator_line = text[..cap.get(0).unwrap().start()].matches('\n').count() as u32 + 1;
                let handler = following_function(nodes, rel, decorator_line);

                for method in methods {
                    let route_id = format!("api.route.{method}.{normalized}");
                    if seen_routes.insert(route_id.clone()) {
                        out_nodes.push(Node::new(
                            &route_id,
                            NodeKind::Virtual,
                            &normalized,
                            &route_id,
                            rel,
                            decorator_line,
                            decorator_line,
                            format!("{method} {normalized}"),
                        ));
                        if let Some(handler_id) = &handler {
                            out_edges.push(Edge::new(
                                Edge::derive_id(&route_id, handler_id, EdgeKind::Uses, None),
                                route_id.clone(),
                                handler_id.clone(),
                                EdgeKind::Uses,
                                EdgeConfidence::Inferred,
                                EdgeSource::Static,
                            ));
                        }
                    }
                    routes.push(Route { node_id: route_id, method, path: normalized.clone() });
                }
            }
        } else if matches!(ext.as_str(), "ts" | "tsx" | "js" | "jsx") {
            for cap in express_route_re().captures_iter(text) {
                let verb = &cap[2];
                let raw_path = &cap[3];
                let normalized = normalize_path(raw_path);
                let method = if verb == "use" || verb == "all" { "ANY".to_string() } else { verb.to_ascii_uppercase() };
                let route_id = format!("api.route.{method}.{normalized}");
                if seen_routes.insert(route_id.clone()) {
                    let line = text[..cap.get(0).unwrap().start()].matches('\n').count() as u32 + 1;
                    out_nodes.push(Node::new(
                        &route_id,
                        NodeKind::Virtual,
                        &normalized,
                        &route_id,
                        rel,
                        line,
                        line,
                        format!("{method} {normalized}"),
                    ));
                }
                routes.push(Route { node_id: route_id, method, path: normalized });
            }
        }
    }

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

        for cap in call_site_re().captures_iter(&text) {
            let (method, url) = if let Some(m) = cap.get(1) {
                (m.as_str().to_ascii_uppercase(), cap.get(2).map(|m| m.as_str()).unwrap_or(""))
            } else {
                ("GET".to_string(), cap.get(3).map(|m| m.as_str()).unwrap_or(""))
            };
            let normalized = normalize_path(url);
            for route in &routes {
                if (route.method == method || route.method == "ANY") && segments_match(&route.path, &normalized) {
                    out_edges.push(Edge::new(
                        Edge::derive_id(&caller, &route.node_id, EdgeKind::CallsApi, None),
                        caller.clone(),
                        route.node_id.clone(),
                        EdgeKind::CallsApi,
                        EdgeConfidence::Inferred,
                        EdgeSource::Static,
                    ));
                }
            }
        }
    }

    (out_nodes, out_edges)
}

/// The nearest function/method node after a decorator line in the same
/// file — the handler the decorator attaches to.
fn following_function(nodes: &[Node], rel_path: &str, decorator_line: u32) -> Option<String> {
    nodes
        .iter()
        .filter(|n| n.file_path == rel_path && (n.kind == NodeKind::Function || n.kind == NodeKind::Method))
        .filter(|n| n.start_line >= decorator_line && n.start_line <= decorator_line + 5)
        .min_by_key(|n| n.start_line)
        .map(|n| n.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn normalize_path_collapses_param_conventions() {
        assert_eq!(normalize_path("/users/{id}/posts"), "/users/:param/posts");
        assert_eq!(normalize_path("/users/<int:id>/"), "/users/:param");
        assert_eq!(normalize_path("/users/:id"), "/users/:param");
    }

    #[test]
    fn segments_match_treats_param_as_wildcard() {
        assert!(segments_match("/users/:param", "/users/42"));
        assert!(!segments_match("/users/:param", "/users/42/extra"));
    }

    #[test]
    fn resolve_matches_fastapi_route_with_prefix_to_requests_call() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("routes.py"),
            "router = APIRouter(prefix=\"/api\")\n\n@router.get(\"/users/{id}\")\ndef get_user(id):\n    pass\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("client.py"),
            "def fetch_user(uid):\n    requests.get(f\"/api/users/{uid}\")\n",
        )
        .unwrap();
        let (nodes, edges) = resolve(&[], dir.path());
        assert!(nodes.iter().any(|n| n.id == "api.route.GET./api/users/:param"));
        assert!(edges.iter().any(|e| e.kind == EdgeKind::CallsApi));
    }

    #[test]
    fn resolve_matches_express_route() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("server.ts"),
            "app.get('/health', (req, res) => res.send('ok'));\n",
        )
        .unwrap();
        let (nodes, _edges) = resolve(&[], dir.path());
        assert!(nodes.iter().any(|n| n.id == "api.route.GET./health"));
    }

    #[test]
    fn express_regex_does_not_register_an_axios_call_site_as_a_route() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("client.ts"), "axios.get('/users');\n").unwrap();
        let (nodes, _edges) = resolve(&[], dir.path());
        assert!(nodes.is_empty());
    }

    #[test]
    fn resolve_applies_blueprint_url_prefix() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("bp.py"),
            "bp = Blueprint(\"users\", __name__, url_prefix=\"/users\")\n\n@bp.route(\"/profile\")\ndef profile():\n    pass\n",
        )
        .unwrap();
        let (nodes, _edges) = resolve(&[], dir.path());
        assert!(nodes.iter().any(|n| n.id == "api.route.GET./users/profile"));
    }

    #[test]
    fn resolve_propagates_prefix_through_cross_file_include_router() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("users.py"),
            "router = APIRouter()\n\n@router.get(\"/list\")\ndef list_users():\n    pass\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("main.py"),
            "from users import router as users_router\n\napp.include_router(users_router, prefix=\"/api/users\")\n",
        )
        .unwrap();
        let nodes = vec![Node::new("users", NodeKind::Module, "users", "users", "users.py", 1, 1, "")];
        let (out_nodes, _edges) = resolve(&nodes, dir.path());
        assert!(out_nodes.iter().any(|n| n.id == "api.route.GET./api/users/list"));
    }
}
