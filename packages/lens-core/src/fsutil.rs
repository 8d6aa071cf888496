//! Project tree walking: skip rules and path normalization shared by the
//! parser plane and the resolver plane.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const SKIP_DIRS: &[&str] = &[
    "__pycache__",
    ".git",
    ".lens",
    ".venv",
    "venv",
    "env",
    "node_modules",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    "dist",
    "build",
    ".eggs",
    ".tox",
    "site-packages",
    ".next",
    ".nuxt",
    ".output",
    "coverage",
    "htmlcov",
    ".nyc_output",
    "out",
];

const SKIP_SUFFIXES: &[&str] = &["-env", "-venv", "_env", "_venv"];

/// Whether a single path component should cause its whole subtree to be
/// skipped. `depth` is the component's distance from the project root
/// (0 = a top-level entry) — `lib/` is only skipped there; `src/lib/`
/// survives.
pub fn should_skip_dir(component: &str, depth: usize) -> bool {
    if SKIP_DIRS.contains(&component) {
        return true;
    }
    if SKIP_SUFFIXES.iter().any(|suffix| component.ends_with(suffix)) {
        return true;
    }
    if depth == 0 && component == "lib" {
        return true;
    }
    false
}

/// Normalize a path to forward slashes, relative to `root`.
pub fn relative_normalized(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

/// Walk `root`, applying the skip rules, yielding file paths in
/// deterministic (sorted) order so parse/resolve passes are reproducible.
pub fn walk_project(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root).sort_by_file_name().into_iter();
    for entry in walker.filter_entry(|entry| {
        if entry.depth() == 0 {
            return true;
        }
        let Some(name) = entry.file_name().to_str() else {
            return true;
        };
        if entry.file_type().is_dir() {
            let depth = entry.depth() - 1;
            !should_skip_dir(name, depth)
        } else {
            true
        }
    }) {
        let Ok(entry) = entry else { continue };
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn skip_dirs_matches_well_known_vendor_names() {
        assert!(should_skip_dir("node_modules", 1));
        assert!(should_skip_dir(".git", 0));
        assert!(should_skip_dir("my-env", 2));
        assert!(!should_skip_dir("src", 1));
    }

    #[test]
    fn lib_only_skipped_at_project_root() {
        assert!(should_skip_dir("lib", 0));
        assert!(!should_skip_dir("lib", 1));
    }

    #[test]
    fn relative_normalized_uses_forward_slashes() {
        let root = Path::new("/a/b");
        let path = Path::new("/a/b/c/d.py");
        assert_eq!(relative_normalized(root, path), "c/d.py");
    }

    #[test]
    fn walk_project_skips_vendor_dirs_and_sorts() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/junk.js"), "").unwrap();
        fs::write(dir.path().join("b.py"), "").unwrap();
        fs::write(dir.path().join("a.py"), "").unwrap();

        let files = walk_project(dir.path());
        let names: Vec<_> = files
            .iter()
            .map(|p| relative_normalized(dir.path(), p))
            .collect();
        assert_eq!(names, vec!["a.py".to_string(), "b.py".to_string()]);
    }
}
