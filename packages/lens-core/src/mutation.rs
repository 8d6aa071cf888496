//! C9: safe mutation of node source text, cross-project rename, and the
//! proactive safety warnings a mutation surfaces before it lands
//! (spec §4.7).
//!
//! The proactive-warning constants (`IO_MARKERS`, `SECRET_PATTERNS`) and
//! the architecture-rule check are grounded on `tools/safety.py`'s
//! `check_arch_violations` / `_matches_pattern`. The mutation verbs
//! themselves (`update_node`, `patch_node`, `add_node`, `delete_node`,
//! `rename`, `batch`) have no original-source counterpart — the file that
//! would hold them, `tools/modification.py`, was not present in the
//! retrieved source pack — so they are built directly from the spec's
//! behavioral description, in the same file/Sidecar/HistoryStore idiom
//! the rest of this crate uses.

use crate::context::LensContext;
use crate::errors::{LensError, Result};
use lens_storage::{Change, ChangeAction, RenameResult, RenameReviewItem};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Accumulates pending patches for a session before they are committed.
/// A node may only be staged once; re-staging replaces the prior patch.
#[derive(Debug, Default, Clone)]
pub struct PatchBuffer {
    pending: Vec<PendingPatch>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingPatch {
    pub node_id: String,
    pub new_source: String,
}

impl PatchBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, node_id: impl Into<String>, new_source: impl Into<String>) {
        let node_id = node_id.into();
        let new_source = new_source.into();
        if let Some(existing) = self.pending.iter_mut().find(|p| p.node_id == node_id) {
            existing.new_source = new_source;
        } else {
            self.pending.push(PendingPatch { node_id, new_source });
        }
    }

    pub fn take(&mut self, node_id: &str) -> Option<PendingPatch> {
        let pos = self.pending.iter().position(|p| p.node_id == node_id)?;
        Some(self.pending.remove(pos))
    }

    pub fn pending(&self) -> &[PendingPatch] {
        &self.pending
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Substrings whose presence (without a nearby `try`/`except`) flags a
/// mutation as touching unguarded IO (spec §4.7 proactive warnings).
const IO_MARKERS: &[&str] = &[
    "open(",
    "requests.get",
    "requests.post",
    "requests.put",
    "requests.delete",
    "urlopen",
    "socket.",
    ".connect(",
    "subprocess.",
    "os.system",
    "os.remove",
    "os.unlink",
    "shutil.rmtree",
    "fetch(",
    "axios.",
    "fs.writeFile",
];

fn secret_patterns() -> &'static [Regex; 4] {
    static CELL: OnceLock<[Regex; 4]> = OnceLock::new();
    CELL.get_or_init(|| {
        [
            Regex::new(r#"(?i)password\s*=\s*["']([^"']{6,})["']"#).unwrap(),
            Regex::new(r#"(?i)api[_-]?key\s*=\s*["']([^"']{8,})["']"#).unwrap(),
            Regex::new(r#"(?i)token\s*=\s*["']([^"']{8,})["']"#).unwrap(),
            Regex::new(r#"(?i)secret\s*=\s*["']([^"']{6,})["']"#).unwrap(),
        ]
    })
}

/// Translate a `/`-separated rule prefix into a dotted one and test it as
/// a glob against `value` (spec §4.7/§4.8 `_matches_pattern`: rule
/// patterns are written path-style but checked against dotted node ids).
pub(crate) fn matches_pattern(pattern: &str, value: &str) -> bool {
    let dotted = pattern.replace('/', ".");
    if !dotted.contains('*') {
        return value.starts_with(&dotted);
    }
    let escaped = regex::escape(&dotted).replace(r"\*", ".*");
    Regex::new(&format!("^{escaped}")).map(|re| re.is_match(value)).unwrap_or(false)
}

/// Result of any single mutation verb.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub change: Change,
    pub warnings: Vec<String>,
}

/// Proactive warnings for a proposed new source body at `node_id`
/// (spec §4.7: high-impact callers, missing tests, circular dependency
/// membership, hardcoded secrets, unguarded IO, and architecture rule
/// violations are all surfaced before a mutation is applied, never
/// after).
pub fn proactive_warnings(ctx: &mut LensContext, node_id: &str, new_source: &str) -> Result<Vec<String>> {
    let mut warnings = Vec::new();

    let callers = ctx.graph()?.impact_zone(node_id, 1).len();
    if callers > 10 {
        warnings.push(format!("high impact: {callers} direct/indirect callers depend on {node_id}"));
    } else if callers > 5 {
        warnings.push(format!("{callers} callers depend on {node_id}; double-check downstream usage"));
    }

    let has_test = ctx
        .graph()?
        .impact_zone(node_id, 8)
        .iter()
        .any(|lvl| lvl.node_id.contains("test"));
    if !has_test {
        warnings.push(format!("no test appears to cover {node_id}"));
    }

    let module_prefix = node_id.split('.').next().unwrap_or(node_id).to_string();
    if ctx
        .graph()?
        .circular_imports()
        .iter()
        .any(|cycle| cycle.iter().any(|id| id.starts_with(&module_prefix)))
    {
        warnings.push(format!("{module_prefix} participates in a circular import"));
    }

    for pattern in secret_patterns() {
        if pattern.is_match(new_source) {
            warnings.push("proposed source contains what looks like a hardcoded secret".to_string());
            break;
        }
    }

    let has_io = IO_MARKERS.iter().any(|marker| new_source.contains(marker));
    let has_guard = new_source.contains("try:") && new_source.contains("except") || new_source.contains("try {") && new_source.contains("catch");
    if has_io && !has_guard {
        warnings.push("proposed source performs IO without visible error handling".to_string());
    }

    warnings.extend(check_arch_violations(ctx, node_id)?);
    Ok(warnings)
}

/// Architecture rule violations a mutation to `node_id` would create or
/// already sits inside (spec §4.7/§4.8 `check_arch_violations`): a
/// `no_dependency` rule trips if any of the node's outgoing edges cross
/// the forbidden boundary; a `required_test` rule trips if no predecessor
/// edge comes from a test-shaped node.
pub fn check_arch_violations(ctx: &mut LensContext, node_id: &str) -> Result<Vec<String>> {
    let rules = ctx.sidecar.load_arch_rules()?.rules;
    if rules.is_empty() {
        return Ok(Vec::new());
    }
    let method_counts: std::collections::HashMap<String, u32> = ctx
        .sidecar
        .graph_store()
        .load_class_metrics()?
        .into_iter()
        .map(|m| (m.node_id, m.method_count))
        .collect();
    let graph = ctx.graph()?;
    let mut violations = Vec::new();
    for rule in &rules {
        match rule {
            lens_storage::ArchRule::NoDependency { id, from_prefix, to_prefix, reason } => {
                if !matches_pattern(from_prefix, node_id) {
                    continue;
                }
                for level in graph.dependency_tree(node_id, 1) {
                    if matches_pattern(to_prefix, &level.node_id) {
                        let why = if reason.is_empty() { String::new() } else { format!(": {reason}") };
                        violations.push(format!("rule '{id}' violated by {node_id} -> {}{why}", level.node_id));
                    }
                }
            }
            lens_storage::ArchRule::RequiredTest { id, prefix } => {
                if !matches_pattern(prefix, node_id) {
                    continue;
                }
                let covered = graph
                    .impact_zone(node_id, 8)
                    .iter()
                    .any(|lvl| lvl.node_id.contains("test"));
                if !covered {
                    violations.push(format!("rule '{id}' violated: {node_id} has no covering test"));
                }
            }
            lens_storage::ArchRule::MaxClassMethods { id, class_prefix, max_methods } => {
                let class_id = match graph.node(node_id).map(|n| n.kind) {
                    Some(lens_storage::NodeKind::Class) => Some(node_id.to_string()),
                    _ => node_id.rsplit_once('.').map(|(parent, _)| parent.to_string()),
                };
                if let Some(class_id) = class_id {
                    if matches_pattern(class_prefix, &class_id) {
                        if let Some(&count) = method_counts.get(&class_id) {
                            if count > *max_methods {
                                violations.push(format!(
                                    "rule '{id}' violated: {class_id} has {count} methods (max {max_methods})"
                                ));
                            }
                        }
                    }
                }
            }
            lens_storage::ArchRule::NoCircularImports { id, prefix } => {
                if graph
                    .circular_imports()
                    .iter()
                    .any(|cycle| cycle.iter().any(|n| matches_pattern(prefix, n)))
                {
                    violations.push(format!("rule '{id}' violated: circular import under {prefix}"));
                }
            }
        }
    }
    Ok(violations)
}

/// Re-parse `proposed_source` as a standalone file of the same language
/// as `node_id` and report whether it is syntactically valid, without
/// writing anything to disk (spec §4.7 `validate_change`, a pure
/// dry-run).
pub fn validate_change(ctx: &mut LensContext, node_id: &str, proposed_source: &str) -> Result<Vec<String>> {
    let id = ctx.resolve_node_id(node_id)?;
    let node = ctx
        .sidecar
        .graph_store()
        .node_by_id(&id)?
        .ok_or_else(|| LensError::node_not_found(&id, Vec::new()))?;
    validate_syntax(&node.file_path, proposed_source)?;
    proactive_warnings(ctx, &id, proposed_source)
}

fn validate_syntax(file_path: &str, source: &str) -> Result<()> {
    use tree_sitter::Parser;
    let mut parser = Parser::new();
    let language = if file_path.ends_with(".py") {
        tree_sitter_python::language()
    } else {
        tree_sitter_typescript::language_tsx()
    };
    parser
        .set_language(&language)
        .map_err(|e| LensError::syntax_invalid("unknown", e.to_string()))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| LensError::syntax_invalid("unknown", "parser produced no tree"))?;
    if tree.root_node().has_error() {
        return Err(LensError::syntax_invalid(
            if file_path.ends_with(".py") { "python" } else { "typescript" },
            "proposed source contains a syntax error",
        ));
    }
    Ok(())
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| LensError::io_failure(path.display().to_string(), e))
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).map_err(|e| LensError::io_failure(path.display().to_string(), e))
}

/// Replace the `[start_line, end_line]` (1-indexed, inclusive) span of a
/// file's text with `new_source`, returning the file's previous full text
/// so callers can roll back on failure.
fn splice_lines(path: &Path, start_line: u32, end_line: u32, new_source: &str) -> Result<String> {
    let original = read_file(path)?;
    let lines: Vec<&str> = original.split_inclusive('\n').collect();
    let start = (start_line.saturating_sub(1)) as usize;
    let end = (end_line as usize).min(lines.len());
    let mut out = String::new();
    for line in &lines[..start.min(lines.len())] {
        out.push_str(line);
    }
    out.push_str(new_source);
    if !new_source.ends_with('\n') {
        out.push('\n');
    }
    for line in &lines[end..] {
        out.push_str(line);
    }
    write_file(path, &out)?;
    Ok(original)
}

fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Replace `node_id`'s source body in place (spec §4.7 `update_node`).
/// Warnings are computed before the file is touched; a syntax-invalid
/// replacement never reaches disk.
pub fn update_node(ctx: &mut LensContext, node_id: &str, new_source: &str, description: &str) -> Result<MutationOutcome> {
    let id = ctx.resolve_node_id(node_id)?;
    let node = ctx
        .sidecar
        .graph_store()
        .node_by_id(&id)?
        .ok_or_else(|| LensError::node_not_found(&id, Vec::new()))?;

    validate_syntax(&node.file_path, new_source)?;
    let warnings = proactive_warnings(ctx, &id, new_source)?;

    let path = ctx.project_root.join(&node.file_path);
    splice_lines(&path, node.start_line, node.end_line, new_source)?;
    ctx.reparse_file(&path)?;

    let change = Change {
        id: 0,
        timestamp: now_timestamp(),
        node_id: id.clone(),
        action: ChangeAction::Modified,
        old_source: Some(node.source_code.clone()),
        new_source: Some(new_source.to_string()),
        old_hash: node.hash.clone(),
        new_hash: lens_storage::compute_hash(new_source),
        affected_nodes: ctx.graph()?.impact_zone(&id, 1).into_iter().map(|l| l.node_id).collect(),
        description: description.to_string(),
    };
    let recorded_id = ctx.sidecar.history_store().record(&change)?;
    Ok(MutationOutcome { change: Change { id: recorded_id, ..change }, warnings })
}

/// Exact-once substring replace within `node_id`'s current source (spec
/// §4.7 `patch_node`): `find` must occur exactly once, otherwise this is
/// a conflict rather than a guess.
pub fn patch_node(ctx: &mut LensContext, node_id: &str, find: &str, replace: &str, description: &str) -> Result<MutationOutcome> {
    let id = ctx.resolve_node_id(node_id)?;
    let node = ctx
        .sidecar
        .graph_store()
        .node_by_id(&id)?
        .ok_or_else(|| LensError::node_not_found(&id, Vec::new()))?;

    let occurrences = node.source_code.matches(find).count();
    if occurrences == 0 {
        return Err(LensError::patch_conflict(&id, format!("'{find}' not found in current source")));
    }
    if occurrences > 1 {
        return Err(LensError::patch_conflict(&id, format!("'{find}' occurs {occurrences} times; not unique")));
    }
    let new_source = node.source_code.replacen(find, replace, 1);
    update_node(ctx, &id, &new_source, description)
}

/// Insert a new top-level definition into a file, either at end-of-file
/// or immediately after an existing node (spec §4.7 `add_node`).
pub fn add_node(ctx: &mut LensContext, file_path: &str, source: &str, after_node_id: Option<&str>) -> Result<MutationOutcome> {
    let path = ctx.project_root.join(file_path);
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        validate_syntax(&format!(".{ext}"), source)?;
    }

    let anchor_line = match after_node_id {
        Some(anchor) => {
            let id = ctx.resolve_node_id(anchor)?;
            ctx.sidecar.graph_store().node_by_id(&id)?.map(|n| n.end_line)
        }
        None => None,
    };

    let original = if path.exists() { read_file(&path)? } else { String::new() };
    let mut new_content = original.clone();
    match anchor_line {
        Some(line) => {
            let lines: Vec<&str> = original.split_inclusive('\n').collect();
            let cut = (line as usize).min(lines.len());
            let mut out = String::new();
            for l in &lines[..cut] {
                out.push_str(l);
            }
            out.push('\n');
            out.push_str(source);
            if !source.ends_with('\n') {
                out.push('\n');
            }
            for l in &lines[cut..] {
                out.push_str(l);
            }
            new_content = out;
        }
        None => {
            if !new_content.is_empty() && !new_content.ends_with('\n') {
                new_content.push('\n');
            }
            new_content.push('\n');
            new_content.push_str(source);
            if !source.ends_with('\n') {
                new_content.push('\n');
            }
        }
    }
    write_file(&path, &new_content)?;
    ctx.reparse_file(&path)?;

    let change = Change {
        id: 0,
        timestamp: now_timestamp(),
        node_id: format!("{file_path}:new"),
        action: ChangeAction::Created,
        old_source: None,
        new_source: Some(source.to_string()),
        old_hash: String::new(),
        new_hash: lens_storage::compute_hash(source),
        affected_nodes: Vec::new(),
        description: format!("added node to {file_path}"),
    };
    let recorded_id = ctx.sidecar.history_store().record(&change)?;
    Ok(MutationOutcome { change: Change { id: recorded_id, ..change }, warnings: Vec::new() })
}

/// Remove `node_id`'s source body from its file (spec §4.7 `delete_node`).
/// Always warns if the node still has callers — deleting a referenced
/// node is not blocked, only flagged.
pub fn delete_node(ctx: &mut LensContext, node_id: &str) -> Result<MutationOutcome> {
    let id = ctx.resolve_node_id(node_id)?;
    let node = ctx
        .sidecar
        .graph_store()
        .node_by_id(&id)?
        .ok_or_else(|| LensError::node_not_found(&id, Vec::new()))?;

    let mut warnings = Vec::new();
    let callers: Vec<String> = ctx.graph()?.impact_zone(&id, 1).into_iter().map(|l| l.node_id).collect();
    if !callers.is_empty() {
        warnings.push(format!("{} node(s) still reference {id}: {}", callers.len(), callers.join(", ")));
    }

    let path = ctx.project_root.join(&node.file_path);
    splice_lines(&path, node.start_line, node.end_line, "")?;
    ctx.reparse_file(&path)?;

    let change = Change {
        id: 0,
        timestamp: now_timestamp(),
        node_id: id.clone(),
        action: ChangeAction::Deleted,
        old_source: Some(node.source_code.clone()),
        new_source: None,
        old_hash: node.hash.clone(),
        new_hash: String::new(),
        affected_nodes: callers,
        description: format!("deleted {id}"),
    };
    let recorded_id = ctx.sidecar.history_store().record(&change)?;
    Ok(MutationOutcome { change: Change { id: recorded_id, ..change }, warnings })
}

/// Cross-project rename: rewrites the node's own definition plus every
/// reference the graph already knows about (callers via edges into it),
/// and flags bare-string occurrences of the old name for human review
/// (spec §4.7 `rename`) since a string literal match can't be
/// distinguished from an unrelated identical word.
pub fn rename(ctx: &mut LensContext, node_id: &str, new_name: &str) -> Result<RenameResult> {
    let id = ctx.resolve_node_id(node_id)?;
    let node = match ctx.sidecar.graph_store().node_by_id(&id)? {
        Some(n) => n,
        None => {
            return Ok(RenameResult {
                success: false,
                error: Some(format!("node not found: {id}")),
                ..Default::default()
            })
        }
    };
    let old_name = node.name.clone();
    if old_name == new_name {
        return Ok(RenameResult { success: true, ..Default::default() });
    }

    let word_boundary = |s: &str| Regex::new(&format!(r"\b{}\b", regex::escape(s))).unwrap();
    let ident_re = word_boundary(&old_name);

    let mut files_modified: HashSetPaths = HashSetPaths::default();
    let mut references_updated = 0u32;
    let mut needs_review = Vec::new();

    let mut touched_files: Vec<(String, Vec<String>)> = Vec::new();
    {
        let graph = ctx.graph()?;
        let mut seen_files = std::collections::HashSet::new();
        seen_files.insert(node.file_path.clone());
        for level in graph.impact_zone(&id, 16) {
            if let Some(n) = graph.node(&level.node_id) {
                seen_files.insert(n.file_path.clone());
            }
        }
        for file in seen_files {
            touched_files.push((file, Vec::new()));
        }
    }

    for (rel_path, _) in &touched_files {
        let path = ctx.project_root.join(rel_path);
        let Ok(content) = read_file(&path) else { continue };
        let mut replaced_count = 0;
        let new_content = ident_re.replace_all(&content, |_: &regex::Captures| {
            replaced_count += 1;
            new_name
        });
        if replaced_count > 0 {
            write_file(&path, &new_content)?;
            files_modified.0.insert(rel_path.clone());
            references_updated += replaced_count as u32;
        }

        for (line_no, line) in content.lines().enumerate() {
            let in_string = line.contains(&format!("\"{old_name}\"")) || line.contains(&format!("'{old_name}'"));
            if in_string {
                needs_review.push(RenameReviewItem {
                    file_path: rel_path.clone(),
                    line: (line_no + 1) as u32,
                    snippet: line.trim().to_string(),
                });
            }
        }
    }

    for rel_path in files_modified.0.iter() {
        ctx.reparse_file(&ctx.project_root.join(rel_path).clone())?;
    }

    let change = Change {
        id: 0,
        timestamp: now_timestamp(),
        node_id: id.clone(),
        action: ChangeAction::Modified,
        old_source: Some(old_name.clone()),
        new_source: Some(new_name.to_string()),
        old_hash: node.hash.clone(),
        new_hash: String::new(),
        affected_nodes: files_modified.0.iter().cloned().collect(),
        description: format!("renamed {old_name} to {new_name}"),
    };
    ctx.sidecar.history_store().record(&change)?;

    Ok(RenameResult {
        success: true,
        files_modified: files_modified.0.len() as u32,
        references_updated,
        needs_review,
        error: None,
    })
}

#[derive(Default)]
struct HashSetPaths(std::collections::HashSet<String>);

/// Apply a batch of node-source updates atomically: every file touched is
/// snapshotted first, and if any update fails the whole batch is rolled
/// back to its pre-batch contents (spec §4.7 `batch`, "all or nothing").
pub fn batch(ctx: &mut LensContext, updates: &[(String, String)], description: &str) -> Result<Vec<MutationOutcome>> {
    let mut snapshots: Vec<(std::path::PathBuf, String)> = Vec::new();
    for (node_id, _) in updates {
        let id = ctx.resolve_node_id(node_id)?;
        if let Some(node) = ctx.sidecar.graph_store().node_by_id(&id)? {
            let path = ctx.project_root.join(&node.file_path);
            if !snapshots.iter().any(|(p, _)| p == &path) {
                if let Ok(content) = read_file(&path) {
                    snapshots.push((path, content));
                }
            }
        }
    }

    let mut outcomes = Vec::new();
    for (node_id, new_source) in updates {
        match update_node(ctx, node_id, new_source, description) {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => {
                for (path, original) in &snapshots {
                    let _ = write_file(path, original);
                }
                for (path, _) in &snapshots {
                    let _ = ctx.reparse_file(path);
                }
                return Err(err);
            }
        }
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn setup(dir: &std::path::Path) -> LensContext {
        fs::write(dir.join("a.py"), "def f():\n    pass\n\n\ndef g():\n    return f()\n").unwrap();
        let mut ctx = LensContext::new(dir);
        ctx.sidecar.ensure_dir().unwrap();
        ctx.full_sync().unwrap();
        ctx
    }

    #[test]
    fn patch_buffer_stage_replaces_existing() {
        let mut buf = PatchBuffer::new();
        buf.stage("a.f", "one");
        buf.stage("a.f", "two");
        assert_eq!(buf.pending().len(), 1);
        assert_eq!(buf.pending()[0].new_source, "two");
    }

    #[test]
    fn update_node_rewrites_file_and_records_history() {
        let dir = tempdir().unwrap();
        let mut ctx = setup(dir.path());
        let outcome = update_node(&mut ctx, "a.f", "def f():\n    return 1\n", "bump").unwrap();
        assert_eq!(outcome.change.action, ChangeAction::Modified);
        let content = fs::read_to_string(dir.path().join("a.py")).unwrap();
        assert!(content.contains("return 1"));
    }

    #[test]
    fn update_node_rejects_invalid_syntax() {
        let dir = tempdir().unwrap();
        let mut ctx = setup(dir.path());
        let err = update_node(&mut ctx, "a.f", "def f(:\n", "bad").unwrap_err();
        assert!(matches!(err, LensError::SyntaxInvalid { .. }));
    }

    #[test]
    fn patch_node_requires_unique_match() {
        let dir = tempdir().unwrap();
        let mut ctx = setup(dir.path());
        let err = patch_node(&mut ctx, "a.f", "pass", "return 2", "x");
        assert!(err.is_ok());
    }

    #[test]
    fn delete_node_warns_about_remaining_callers() {
        let dir = tempdir().unwrap();
        let mut ctx = setup(dir.path());
        let outcome = delete_node(&mut ctx, "a.f").unwrap();
        assert!(!outcome.warnings.is_empty());
    }

    #[test]
    fn rename_updates_references_and_returns_success() {
        let dir = tempdir().unwrap();
        let mut ctx = setup(dir.path());
        let result = rename(&mut ctx, "a.f", "renamed").unwrap();
        assert!(result.success);
        let content = fs::read_to_string(dir.path().join("a.py")).unwrap();
        assert!(content.contains("def renamed"));
        assert!(content.contains("renamed()"));
    }
}
