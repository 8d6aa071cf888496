//! R5: CI pipeline mapping (spec §4.3).
//!
//! Grounded on `resolvers/ci_mapper.py`: the same indentation-based
//! minimal YAML reader `infra_mapper` uses, applied to
//! `.github/workflows/*.yml`. Produces a `module`-kind node per workflow,
//! a `block`-kind node per job, `depends_on` edges for `needs:` and for
//! `uses:` external actions, and `uses_env` edges for `${{ secrets.X }}`
//! and `${{ env.X }}` / `${{ vars.X }}` references.

use crate::fsutil::relative_normalized;
use lens_storage::{Edge, EdgeConfidence, EdgeKind, EdgeSource, Node, NodeKind};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

fn secret_ref() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r#"\$\{\{\s*secrets\.(\w+)\s*\}\}"#).unwrap())
}

fn var_ref() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r#"\$\{\{\s*(?:env|vars)\.(\w+)\s*\}\}"#).unwrap())
}

pub fn resolve(_nodes: &[Node], root: &Path) -> (Vec<Node>, Vec<Edge>) {
    let mut out_nodes = Vec::new();
    let mut out_edges = Vec::new();

    let workflows_dir = root.join(".github").join("workflows");
    if !workflows_dir.is_dir() {
        return (out_nodes, out_edges);
    }
    let Ok(entries) = std::fs::read_dir(&workflows_dir) else {
        return (out_nodes, out_edges);
    };
    let mut files: Vec<_> = entries.flatten().map(|e| e.path()).collect();
    files.sort();

    for file in files {
        let Some(ext) = file.extension().and_then(|e| e.to_str()) else { continue };
        if ext != "yml" && ext != "yaml" {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(&file) else { continue };
        let rel = relative_normalized(root, &file);
        parse_workflow_minimal(&text, &rel, &mut out_nodes, &mut out_edges);
    }

    (out_nodes, out_edges)
}

fn parse_workflow_minimal(text: &str, rel_path: &str, out_nodes: &mut Vec<Node>, out_edges: &mut Vec<Edge>) {
    let workflow_name = text
        .lines()
        .find_map(|l| l.trim_start().strip_prefix("name:"))
        .map(|v| v.trim().trim_matches('"').trim_matches('\'').to_string())
        .unwrap_or_else(|| {
            rel_path
                .rsplit('/')
                .next()
                .unwrap_or(rel_path)
                .trim_end_matches(".yml")
                .trim_end_matches(".yaml")
                .to_string()
        });
    let workflow_id = format!("ci.github.{}", workflow_name.replace(' ', "_"));
    out_nodes.push(Node::new(
        &workflow_id,
        NodeKind::Module,
        &workflow_name,
        &workflow_id,
        rel_path,
        1,
        text.lines().count() as u32,
        format!("GitHub Actions workflow {workflow_name}"),
    ));

    let lines: Vec<&str> = text.lines().collect();
    let mut in_jobs = false;
    let mut jobs_indent = 0usize;
    let mut current_job: Option<(String, usize)> = None;
    let mut in_needs = false;
    let mut in_steps = false;

    for raw in &lines {
        if raw.trim().is_empty() || raw.trim_start().starts_with('#') {
            continue;
        }
        let indent = raw.len() - raw.trim_start().len();
        let trimmed = raw.trim_end().trim_start();

        if trimmed == "jobs:" {
            in_jobs = true;
            jobs_indent = indent;
            continue;
        }
        if !in_jobs {
            continue;
        }
        if indent <= jobs_indent && trimmed != "jobs:" {
            in_jobs = false;
            continue;
        }

        if let Some((_, job_indent)) = &current_job {
            if indent == *job_indent && trimmed.ends_with(':') && !trimmed.starts_with('-') {
                current_job = None;
            }
        }

        if current_job.is_none() && indent == jobs_indent + 2 && trimmed.ends_with(':') {
            let job_name = trimmed.trim_end_matches(':').to_string();
            let job_id = format!("ci.github.{}.{job_name}", workflow_name.replace(' ', "_"));
            out_nodes.push(Node::new(
                &job_id,
                NodeKind::Block,
                &job_name,
                &job_id,
                rel_path,
                1,
                1,
                format!("job {job_name} in {workflow_name}"),
            ));
            current_job = Some((job_id, indent));
            in_needs = false;
            in_steps = false;
            continue;
        }

        let Some((job_id, job_indent)) = current_job.clone() else { continue };
        if indent <= job_indent {
            continue;
        }

        if trimmed == "needs:" {
            in_needs = true;
            in_steps = false;
            continue;
        }
        if trimmed.starts_with("needs:") && trimmed != "needs:" {
            let rest = trimmed.trim_start_matches("needs:").trim();
            for dep in parse_inline_list(rest) {
                push_needs_edge(&job_id, &dep, &workflow_name, out_edges);
            }
            continue;
        }
        if trimmed == "steps:" {
            in_steps = true;
            in_needs = false;
            continue;
        }

        if in_needs {
            if let Some(dep) = trimmed.strip_prefix("- ") {
                push_needs_edge(&job_id, dep.trim().trim_matches('"').trim_matches('\''), &workflow_name, out_edges);
                continue;
            } else {
                in_needs = false;
            }
        }

        if in_steps {
            if let Some(uses) = trimmed.strip_prefix("uses:").or_else(|| trimmed.strip_prefix("- uses:")) {
                let action = uses.trim().trim_matches('"').trim_matches('\'');
                let action_name = action.split('@').next().unwrap_or(action);
                let action_id = format!("ci.action.{action_name}");
                out_edges.push(Edge::new(
                    Edge::derive_id(&job_id, &action_id, EdgeKind::DependsOn, None),
                    job_id.clone(),
                    action_id,
                    EdgeKind::DependsOn,
                    EdgeConfidence::Inferred,
                    EdgeSource::Static,
                ));
            }
        }

        for cap in secret_ref().captures_iter(trimmed) {
            let secret_id = format!("env.secret.{}", &cap[1]);
            out_edges.push(Edge::new(
                Edge::derive_id(&job_id, &secret_id, EdgeKind::UsesEnv, None),
                job_id.clone(),
                secret_id,
                EdgeKind::UsesEnv,
                EdgeConfidence::Resolved,
                EdgeSource::Static,
            ));
        }
        for cap in var_ref().captures_iter(trimmed) {
            let var_id = format!("env.var.{}", &cap[1]);
            out_edges.push(Edge::new(
                Edge::derive_id(&job_id, &var_id, EdgeKind::UsesEnv, None),
                job_id.clone(),
                var_id,
                EdgeKind::UsesEnv,
                EdgeConfidence::Resolved,
                EdgeSource::Static,
            ));
        }
    }
}

fn push_needs_edge(job_id: &str, dep: &str, workflow_name: &str, out_edges: &mut Vec<Edge>) {
    if dep.is_empty() {
        return;
    }
    let dep_id = format!("ci.github.{}.{dep}", workflow_name.replace(' ', "_"));
    out_edges.push(Edge::new(
        Edge::derive_id(job_id, &dep_id, EdgeKind::DependsOn, None),
        job_id.to_string(),
        dep_id,
        EdgeKind::DependsOn,
        EdgeConfidence::Resolved,
        EdgeSource::Static,
    ));
}

fn parse_inline_list(rest: &str) -> Vec<String> {
    let rest = rest.trim_start_matches('[').trim_end_matches(']');
    rest.split(',')
        .map(|s| s.trim().trim_matches('"').trim_matches('\'').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn resolve_builds_workflow_and_job_nodes() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".github/workflows")).unwrap();
        fs::write(
            dir.path().join(".github/workflows/ci.yml"),
            "name: CI\non: [push]\njobs:\n  test:\n    runs-on: ubuntu-latest\n    steps:\n      - uses: actions/checkout@v4\n  deploy:\n    needs: [test]\n    runs-on: ubuntu-latest\n    steps:\n      - run: echo ${{ secrets.TOKEN }}\n",
        )
        .unwrap();
        let (nodes, edges) = resolve(&[], dir.path());
        let ids: Vec<_> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert!(ids.contains(&"ci.github.CI"));
        assert!(ids.contains(&"ci.github.CI.test"));
        assert!(ids.contains(&"ci.github.CI.deploy"));
        assert!(edges.iter().any(|e| e.kind == EdgeKind::DependsOn
            && e.from_node == "ci.github.CI.deploy"
            && e.to_node == "ci.github.CI.test"));
        assert!(edges.iter().any(|e| e.to_node == "env.secret.TOKEN"));
    }

    #[test]
    fn resolve_is_empty_without_workflows_dir() {
        let dir = tempdir().unwrap();
        let (nodes, edges) = resolve(&[], dir.path());
        assert!(nodes.is_empty());
        assert!(edges.is_empty());
    }
}
