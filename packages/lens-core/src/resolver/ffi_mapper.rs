//! R4: native/FFI bridge detection (spec §4.3).
//!
//! Grounded on `resolvers/ffi_mapper.py`: a fixed set of regex patterns
//! per bridge technology (NAPI, koffi, ffi-napi/node-ffi, WASM, gated
//! `child_process` spawning, the generic `bindings()` helper, Python
//! `ctypes`, Python `cffi`), each producing a `calls_native` edge from
//! the calling module to a synthetic `native.<bridge>.<module>` node.
//! Test files are excluded the same way the rest of the resolver plane
//! excludes them.

use super::nearest_node_for_file;
use crate::fsutil::{relative_normalized, walk_project};
use lens_storage::{Edge, EdgeConfidence, EdgeKind, EdgeSource, Node, NodeKind};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

macro_rules! lazy_regex {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static CELL: OnceLock<Regex> = OnceLock::new();
            CELL.get_or_init(|| Regex::new($pat).unwrap())
        }
    };
}

lazy_regex!(napi_re, r#"require\(\s*["'][^"']*\.node["']\s*\)"#);
lazy_regex!(napi_dir_re, r#"(?i)(?:native|binding|addon)"#);
lazy_regex!(koffi_re, r#"koffi\.(?:load|func|define)\("#);
lazy_regex!(ffi_napi_re, r#"new\s+ffi\.Library\("#);
lazy_regex!(wasm_import_re, r#"(?:import\s+\S+\s+from\s+["'][^"']*\.wasm["']|WebAssembly\.(?:instantiate|instantiateStreaming|compile)\()"#);
lazy_regex!(child_process_import_re, r#"require\(\s*["']child_process["']\)|from\s+["']child_process["']"#);
lazy_regex!(child_process_call_re, r#"\b(?:spawnSync|spawn|execFileSync|execFile|execSync|exec|fork)\("#);
lazy_regex!(bindings_re, r#"\bbindings\(\s*["']?([\w.\-]*)["']?\s*\)"#);
lazy_regex!(ctypes_re, r#"(?:ctypes\.(?:CDLL|WinDLL|OleDLL|PyDLL)|cdll\.LoadLibrary|windll\.LoadLibrary)\(\s*["']([^"']+)["']"#);
lazy_regex!(cffi_re, r#"\.dlopen\(\s*["']([^"']+)["']"#);

fn module_name_from_path(raw: &str) -> String {
    let cleaned = raw.trim_matches('"').trim_matches('\'');
    let stem = cleaned.rsplit('/').next().unwrap_or(cleaned);
    let stem = stem.strip_suffix(".node").unwrap_or(stem);
    let stem = stem.strip_suffix(".so").unwrap_or(stem);
    let stem = stem.strip_suffix(".dylib").unwrap_or(stem);
    let stem = stem.strip_suffix(".dll").unwrap_or(stem);
    if stem == "index" {
        let parent = cleaned.rsplitn(3, '/').nth(1).unwrap_or(stem);
        return parent.to_string();
    }
    stem.strip_prefix("lib").unwrap_or(stem).to_string()
}

pub fn resolve(nodes: &[Node], root: &Path) -> (Vec<Node>, Vec<Edge>) {
    let mut out_nodes = Vec::new();
    let mut out_edges = Vec::new();
    let mut seen_nodes: HashSet<String> = HashSet::new();
    let mut seen_edges: HashSet<(String, String)> = HashSet::new();

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

        let mut hits: Vec<(&'static str, String)> = Vec::new();

        if napi_re().is_match(&text) || (napi_dir_re().is_match(&rel) && matches!(ext, "ts" | "js")) {
            hits.push(("napi", module_name_from_path(&rel)));
        }
        if koffi_re().is_match(&text) {
            hits.push(("koffi", module_name_from_path(&rel)));
        }
        if ffi_napi_re().is_match(&text) {
            hits.push(("ffi_napi", module_name_from_path(&rel)));
        }
        if wasm_import_re().is_match(&text) {
            hits.push(("wasm", module_name_from_path(&rel)));
        }
        if child_process_import_re().is_match(&text) && child_process_call_re().is_match(&text) {
            hits.push(("child_process", module_name_from_path(&rel)));
        }
        for cap in bindings_re().captures_iter(&text) {
            let name = if cap[1].is_empty() { module_name_from_path(&rel) } else { cap[1].to_string() };
            hits.push(("bindings", name));
        }
        for cap in ctypes_re().captures_iter(&text) {
            hits.push(("ctypes", module_name_from_path(&cap[1])));
        }
        for cap in cffi_re().captures_iter(&text) {
            hits.push(("cffi", module_name_from_path(&cap[1])));
        }

        for (bridge, module_name) in hits {
            let target_id = format!("native.{bridge}.{module_name}");
            if seen_nodes.insert(target_id.clone()) {
                out_nodes.push(Node::new(
                    &target_id,
                    NodeKind::Virtual,
                    &module_name,
                    &target_id,
                    &rel,
                    1,
                    1,
                    format!("{bridge} bridge to {module_name}"),
                ));
            }
            if seen_edges.insert((caller.clone(), target_id.clone())) {
                out_edges.push(Edge::new(
                    Edge::derive_id(&caller, &target_id, EdgeKind::CallsNative, None),
                    caller.clone(),
                    target_id,
                    EdgeKind::CallsNative,
                    EdgeConfidence::Inferred,
                    EdgeSource::Static,
                ));
            }
        }
    }

    (out_nodes, out_edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn module_name_strips_lib_prefix_and_so_suffix() {
        assert_eq!(module_name_from_path("libfoo.so"), "foo");
        assert_eq!(module_name_from_path("bar.node"), "bar");
    }

    #[test]
    fn module_name_uses_parent_dir_for_index() {
        assert_eq!(module_name_from_path("native/index.js"), "native");
    }

    #[test]
    fn resolve_detects_ctypes_cdll() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("loader.py"), "lib = ctypes.CDLL('libfast.so')\n").unwrap();
        let (nodes, edges) = resolve(&[], dir.path());
        assert!(nodes.iter().any(|n| n.id == "native.ctypes.fast"));
        assert!(edges.iter().any(|e| e.kind == EdgeKind::CallsNative));
    }

    #[test]
    fn resolve_requires_import_before_matching_child_process_calls() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "exec('ls');\n").unwrap();
        let (nodes, _) = resolve(&[], dir.path());
        assert!(nodes.is_empty());
    }

    #[test]
    fn resolve_matches_gated_child_process_spawn() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("a.ts"),
            "const {spawn} = require('child_process');\nspawn('ls');\n",
        )
        .unwrap();
        let (nodes, _) = resolve(&[], dir.path());
        assert!(nodes.iter().any(|n| n.id.starts_with("native.child_process.")));
    }

    #[test]
    fn resolve_skips_test_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("test_loader.py"), "ctypes.CDLL('libfast.so')\n").unwrap();
        let (nodes, _) = resolve(&[], dir.path());
        assert!(nodes.is_empty());
    }
}
