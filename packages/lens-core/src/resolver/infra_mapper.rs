//! R3: environment variables and infrastructure wiring (spec §4.3).
//!
//! Grounded on `resolvers/infra_mapper.py`: a hand-rolled, indentation-
//! based YAML subset reader for `docker-compose.yml` and Dockerfiles (not
//! a real YAML parser — this covers the 80% case the same way the
//! original does, rather than pulling in a YAML dependency the rest of
//! the stack doesn't otherwise need), plus regex scans for `os.environ`/
//! `os.getenv`/`process.env`/`import.meta.env` reads, Pydantic
//! `BaseSettings` field-to-env-var inference, and `.env` declarations.

use super::nearest_node_for_file;
use crate::fsutil::{relative_normalized, walk_project};
use lens_storage::{Edge, EdgeConfidence, EdgeKind, EdgeSource, Node, NodeKind};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

fn env_read_patterns() -> &'static [Regex; 5] {
    static CELL: OnceLock<[Regex; 5]> = OnceLock::new();
    CELL.get_or_init(|| {
        [
            Regex::new(r#"os\.environ\[\s*["']([A-Z_][A-Z0-9_]*)["']\s*\]"#).unwrap(),
            Regex::new(r#"os\.environ\.get\(\s*["']([A-Z_][A-Z0-9_]*)["']"#).unwrap(),
            Regex::new(r#"os\.getenv\(\s*["']([A-Z_][A-Z0-9_]*)["']"#).unwrap(),
            Regex::new(r#"process\.env\.([A-Z_][A-Z0-9_]*)"#).unwrap(),
            Regex::new(r#"(?:process\.env|import\.meta\.env)\[\s*["']([A-Z_][A-Z0-9_]*)["']\s*\]"#).unwrap(),
        ]
    })
}

/// `regex` has no lookbehind, so `environ.get(...)` not preceded by `os.`
/// is matched broadly here and the `os.` case is filtered out by the
/// caller inspecting the byte just before each match.
fn bare_environ_get() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r#"environ\.get\(\s*["']([A-Z_][A-Z0-9_]*)["']"#).unwrap())
}

fn import_meta_env() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r#"import\.meta\.env\.([A-Z_][A-Z0-9_]*)"#).unwrap())
}

fn dotenv_line() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r#"(?m)^(?:export\s+)?([A-Z][A-Z0-9_]*)\s*=\s*(.*)$"#).unwrap())
}

fn base_settings_class() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r#"class\s+(\w+)\s*\([^)]*BaseSettings[^)]*\)"#).unwrap())
}

fn settings_field() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new(r#"(?m)^\s+(\w+)\s*:\s*[\w\[\], ]+(?:=\s*Field\([^)]*env\s*=\s*["'](\w+)["'][^)]*\))?"#).unwrap()
    })
}

fn env_prefix_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r#"env_prefix\s*=\s*["'](\w*)["']"#).unwrap())
}

pub fn resolve(nodes: &[Node], root: &Path) -> (Vec<Node>, Vec<Edge>) {
    let mut out_nodes = Vec::new();
    let mut out_edges = Vec::new();
    let mut declared_envs: HashSet<String> = HashSet::new();
    let mut used_edges: HashSet<(String, String)> = HashSet::new();

    for file in walk_project(root) {
        let rel = relative_normalized(root, &file);
        let name = file.file_name().and_then(|n| n.to_str()).unwrap_or("");

        if name.starts_with("docker-compose") && (name.ends_with(".yml") || name.ends_with(".yaml")) {
            if let Ok(text) = std::fs::read_to_string(&file) {
                parse_compose_minimal(&text, &rel, &mut out_nodes, &mut out_edges, &mut used_edges);
            }
            continue;
        }
        if name == "Dockerfile" || name.starts_with("Dockerfile.") {
            if let Ok(text) = std::fs::read_to_string(&file) {
                parse_dockerfile(&text, &rel, &mut out_nodes, &mut out_edges);
            }
            continue;
        }
        if name == ".env" || name.starts_with(".env.") {
            if let Ok(text) = std::fs::read_to_string(&file) {
                for cap in dotenv_line().captures_iter(&text) {
                    let var = cap[1].to_string();
                    if declared_envs.insert(var.clone()) {
                        out_nodes.push(env_node(&var, &rel));
                    }
                }
            }
            continue;
        }

        let Some(ext) = file.extension().and_then(|e| e.to_str()) else { continue };
        if !matches!(ext, "py" | "ts" | "tsx" | "js" | "jsx") {
            continue;
        }
        if super::is_test_path(&rel) {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(&file) else { continue };
        let Some(caller) = nearest_node_for_file(nodes, &rel) else { continue };

        let mut names = Vec::new();
        for pattern in env_read_patterns() {
            for cap in pattern.captures_iter(&text) {
                names.push(cap[1].to_string());
            }
        }
        for cap in bare_environ_get().captures_iter(&text) {
            let whole = cap.get(0).unwrap();
            let preceding = &text[..whole.start()];
            if !preceding.ends_with("os.") {
                names.push(cap[1].to_string());
            }
        }
        for cap in import_meta_env().captures_iter(&text) {
            names.push(cap[1].to_string());
        }

        if let Some(settings_caps) = base_settings_class().captures(&text) {
            let prefix = env_prefix_re().captures(&text).map(|c| c[1].to_string()).unwrap_or_default();
            let _ = &settings_caps[1];
            for field_cap in settings_field().captures_iter(&text) {
                if let Some(explicit) = field_cap.get(2) {
                    names.push(explicit.as_str().to_string());
                } else {
                    let attr = &field_cap[1];
                    names.push(format!("{prefix}{}", attr.to_ascii_uppercase()));
                }
            }
        }

        for var in names {
            if declared_envs.insert(var.clone()) {
                out_nodes.push(env_node(&var, &rel));
            }
            let key = (caller.clone(), var.clone());
            if used_edges.insert(key) {
                let env_id = format!("env.{var}");
                out_edges.push(
                    Edge::new(
                        Edge::derive_id(&caller, &env_id, EdgeKind::UsesEnv, None),
                        caller.clone(),
                        env_id,
                        EdgeKind::UsesEnv,
                        EdgeConfidence::Resolved,
                        EdgeSource::Static,
                    ),
                );
            }
        }
    }

    (out_nodes, out_edges)
}

fn env_node(name: &str, declared_in: &str) -> Node {
    Node::new(
        format!("env.{name}"),
        NodeKind::Virtual,
        name,
        format!("env.{name}"),
        declared_in,
        1,
        1,
        format!("env var {name}"),
    )
}

/// Indentation-based subset reader for `services:`/`depends_on:` blocks;
/// not a full YAML parser, deliberately, matching the original's scope.
fn parse_compose_minimal(
    text: &str,
    rel_path: &str,
    out_nodes: &mut Vec<Node>,
    out_edges: &mut Vec<Edge>,
    seen: &mut HashSet<(String, String)>,
) {
    let lines: Vec<&str> = text.lines().collect();
    let mut in_services = false;
    let mut services_indent = 0usize;
    let mut current_service: Option<String> = None;
    let mut current_indent = 0usize;
    let mut in_depends_on = false;
    let mut in_environment = false;

    for raw_line in &lines {
        if raw_line.trim().is_empty() || raw_line.trim_start().starts_with('#') {
            continue;
        }
        let indent = raw_line.len() - raw_line.trim_start().len();
        let line = raw_line.trim_end();
        let trimmed = line.trim_start();

        if trimmed == "services:" {
            in_services = true;
            services_indent = indent;
            continue;
        }
        if !in_services {
            continue;
        }
        if indent <= services_indent && trimmed != "services:" {
            in_services = false;
            continue;
        }

        if indent == services_indent + 2 && trimmed.ends_with(':') {
            current_service = Some(trimmed.trim_end_matches(':').to_string());
            current_indent = indent;
            in_depends_on = false;
            in_environment = false;
            let id = format!("infra.service.{}", current_service.as_ref().unwrap());
            out_nodes.push(Node::new(
                &id,
                NodeKind::Virtual,
                current_service.as_ref().unwrap(),
                &id,
                rel_path,
                1,
                1,
                format!("docker-compose service {}", current_service.as_ref().unwrap()),
            ));
            continue;
        }

        let Some(service) = current_service.clone() else { continue };
        if indent <= current_indent {
            continue;
        }

        if trimmed == "depends_on:" {
            in_depends_on = true;
            in_environment = false;
            continue;
        }
        if trimmed == "environment:" {
            in_environment = true;
            in_depends_on = false;
            continue;
        }

        if in_depends_on {
            if let Some(dep) = trimmed.strip_prefix("- ") {
                let dep = dep.trim().trim_matches('"').trim_matches('\'');
                let from_id = format!("infra.service.{service}");
                let to_id = format!("infra.service.{dep}");
                if seen.insert((from_id.clone(), to_id.clone())) {
                    out_edges.push(Edge::new(
                        Edge::derive_id(&from_id, &to_id, EdgeKind::DependsOn, None),
                        from_id,
                        to_id,
                        EdgeKind::DependsOn,
                        EdgeConfidence::Resolved,
                        EdgeSource::Static,
                    ));
                }
            } else if let Some((dep, _)) = trimmed.split_once(':') {
                let dep = dep.trim();
                let from_id = format!("infra.service.{service}");
                let to_id = format!("infra.service.{dep}");
                if seen.insert((from_id.clone(), to_id.clone())) {
                    out_edges.push(Edge::new(
                        Edge::derive_id(&from_id, &to_id, EdgeKind::DependsOn, None),
                        from_id,
                        to_id,
                        EdgeKind::DependsOn,
                        EdgeConfidence::Resolved,
                        EdgeSource::Static,
                    ));
                }
            } else {
                in_depends_on = false;
            }
            continue;
        }

        if in_environment {
            let entry = trimmed.strip_prefix("- ").unwrap_or(trimmed);
            let key = entry.split('=').next().or_else(|| entry.split(':').next()).unwrap_or("").trim();
            if !key.is_empty() && key.chars().next().map(|c| c.is_ascii_uppercase() || c == '_').unwrap_or(false) {
                let from_id = format!("infra.service.{service}");
                let to_id = format!("env.{key}");
                if seen.insert((from_id.clone(), to_id.clone())) {
                    out_edges.push(Edge::new(
                        Edge::derive_id(&from_id, &to_id, EdgeKind::UsesEnv, None),
                        from_id,
                        to_id,
                        EdgeKind::UsesEnv,
                        EdgeConfidence::Resolved,
                        EdgeSource::Static,
                    ));
                }
            } else {
                in_environment = false;
            }
        }
    }
}

fn dockerfile_patterns() -> &'static (Regex, Regex, Regex, Regex, Regex) {
    static CELL: OnceLock<(Regex, Regex, Regex, Regex, Regex)> = OnceLock::new();
    CELL.get_or_init(|| {
        (
            Regex::new(r"(?im)^FROM\s+(\S+)(?:\s+AS\s+(\S+))?").unwrap(),
            Regex::new(r"(?im)^EXPOSE\s+(\d+)").unwrap(),
            Regex::new(r"(?im)^ENV\s+(\w+)[\s=]").unwrap(),
            Regex::new(r"(?im)^ARG\s+(\w+)").unwrap(),
            Regex::new(r"(?im)^COPY\s+--from=(\S+)").unwrap(),
        )
    })
}

fn parse_dockerfile(text: &str, rel_path: &str, out_nodes: &mut Vec<Node>, out_edges: &mut Vec<Edge>) {
    let (from_re, expose_re, env_re, arg_re, copy_from_re) = dockerfile_patterns();
    let image_id = format!("infra.dockerfile.{}", rel_path.replace('/', "."));
    let mut stage_names: Vec<String> = Vec::new();

    for cap in from_re.captures_iter(text) {
        if let Some(stage) = cap.get(2) {
            stage_names.push(stage.as_str().to_string());
        }
    }
    out_nodes.push(Node::new(
        &image_id,
        NodeKind::Virtual,
        rel_path,
        &image_id,
        rel_path,
        1,
        1,
        format!("Dockerfile at {rel_path}"),
    ));
    for stage in &stage_names {
        let stage_id = format!("{image_id}.{stage}");
        out_nodes.push(Node::new(
            &stage_id,
            NodeKind::Virtual,
            stage,
            &stage_id,
            rel_path,
            1,
            1,
            format!("Dockerfile build stage {stage}"),
        ));
    }
    for name in expose_re
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect::<Vec<_>>()
    {
        out_nodes.push(Node::new(
            format!("infra.port.{name}"),
            NodeKind::Virtual,
            &name,
            format!("infra.port.{name}"),
            rel_path,
            1,
            1,
            format!("exposed port {name}"),
        ));
    }
    for cap in env_re.captures_iter(text) {
        out_nodes.push(Node::new(
            format!("env.{}", &cap[1]),
            NodeKind::Virtual,
            &cap[1],
            format!("env.{}", &cap[1]),
            rel_path,
            1,
            1,
            format!("ENV {}", &cap[1]),
        ));
    }
    for cap in arg_re.captures_iter(text) {
        out_nodes.push(Node::new(
            format!("infra.buildarg.{}", &cap[1]),
            NodeKind::Virtual,
            &cap[1],
            format!("infra.buildarg.{}", &cap[1]),
            rel_path,
            1,
            1,
            format!("ARG {}", &cap[1]),
        ));
    }
    for cap in copy_from_re.captures_iter(text) {
        let stage = cap[1].to_string();
        if stage_names.contains(&stage) {
            let to_id = format!("{image_id}.{stage}");
            out_edges.push(Edge::new(
                Edge::derive_id(&image_id, &to_id, EdgeKind::DependsOn, None),
                image_id.clone(),
                to_id,
                EdgeKind::DependsOn,
                EdgeConfidence::Resolved,
                EdgeSource::Static,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn env_read_patterns_cover_python_and_js_forms() {
        let text = "os.environ['DATABASE_URL']\nos.getenv(\"SECRET\")\nprocess.env.API_KEY";
        let mut found = Vec::new();
        for pattern in env_read_patterns() {
            for cap in pattern.captures_iter(text) {
                found.push(cap[1].to_string());
            }
        }
        assert!(found.contains(&"DATABASE_URL".to_string()));
        assert!(found.contains(&"SECRET".to_string()));
        assert!(found.contains(&"API_KEY".to_string()));
    }

    #[test]
    fn resolve_picks_up_dotenv_declarations() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".env"), "DATABASE_URL=postgres://x\nexport DEBUG=1\n").unwrap();
        let (nodes, _edges) = resolve(&[], dir.path());
        let ids: Vec<_> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert!(ids.contains(&"env.DATABASE_URL"));
        assert!(ids.contains(&"env.DEBUG"));
    }

    #[test]
    fn resolve_builds_service_depends_on_from_compose() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("docker-compose.yml"),
            "services:\n  web:\n    image: app\n    depends_on:\n      - db\n  db:\n    image: postgres\n",
        )
        .unwrap();
        let (nodes, edges) = resolve(&[], dir.path());
        let ids: Vec<_> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert!(ids.contains(&"infra.service.web"));
        assert!(ids.contains(&"infra.service.db"));
        assert!(edges
            .iter()
            .any(|e| e.from_node == "infra.service.web" && e.to_node == "infra.service.db"));
    }

    #[test]
    fn parse_dockerfile_extracts_env_and_expose() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("Dockerfile"),
            "FROM python:3.11\nENV PORT=8000\nEXPOSE 8000\nARG BUILD_ID\n",
        )
        .unwrap();
        let (nodes, _edges) = resolve(&[], dir.path());
        let ids: Vec<_> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert!(ids.contains(&"env.PORT"));
        assert!(ids.contains(&"infra.port.8000"));
        assert!(ids.contains(&"infra.buildarg.BUILD_ID"));
    }

    #[test]
    fn parse_dockerfile_emits_stage_node_for_copy_from() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("Dockerfile"),
            "FROM golang:1.22 AS build\nRUN go build -o app\nFROM debian:stable\nCOPY --from=build /app /app\n",
        )
        .unwrap();
        let (nodes, edges) = resolve(&[], dir.path());
        let ids: Vec<_> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert!(ids.contains(&"infra.dockerfile.Dockerfile.build"));
        assert!(edges
            .iter()
            .any(|e| e.kind == EdgeKind::DependsOn
                && e.from_node == "infra.dockerfile.Dockerfile"
                && e.to_node == "infra.dockerfile.Dockerfile.build"));
    }
}
