//! Layout and plain-JSON files of the `.lens/` sidecar directory.
//!
//! `graph.db`, `history.db`, `resolve_cache.db`, and `session.db` are
//! SQLite files handled by the other store modules; `config.json` and
//! `arch_rules.json` are small hand-editable JSON documents read in full
//! on every access.

use crate::error::{Result, StorageError};
use crate::graph_store::GraphStore;
use crate::history_store::HistoryStore;
use crate::resolve_cache_store::ResolveCacheStore;
use crate::session_notes::SessionNotes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Paths and openers for every file under `.lens/`.
#[derive(Debug, Clone)]
pub struct Sidecar {
    root: PathBuf,
}

impl Sidecar {
    /// `root` is the project root; the sidecar directory is `root/.lens`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn lens_dir(&self) -> PathBuf {
        self.root.join(".lens")
    }

    pub fn exists(&self) -> bool {
        self.lens_dir().is_dir()
    }

    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(self.lens_dir())?;
        Ok(())
    }

    pub fn graph_db_exists(&self) -> bool {
        self.lens_dir().join("graph.db").is_file()
    }

    pub fn graph_store(&self) -> GraphStore {
        GraphStore::new(self.lens_dir().join("graph.db"))
    }

    pub fn history_store(&self) -> HistoryStore {
        HistoryStore::new(self.lens_dir().join("history.db"))
    }

    pub fn resolve_cache_store(&self) -> ResolveCacheStore {
        ResolveCacheStore::new(self.lens_dir().join("resolve_cache.db"))
    }

    pub fn session_notes(&self) -> SessionNotes {
        SessionNotes::new(self.lens_dir().join("session.db"))
    }

    pub fn config_path(&self) -> PathBuf {
        self.lens_dir().join("config.json")
    }

    pub fn arch_rules_path(&self) -> PathBuf {
        self.lens_dir().join("arch_rules.json")
    }

    pub fn coverage_path(&self) -> PathBuf {
        self.lens_dir().join("coverage.json")
    }

    pub fn load_config(&self) -> Result<Config> {
        read_json_or_default(&self.config_path())
    }

    pub fn save_config(&self, config: &Config) -> Result<()> {
        self.ensure_dir()?;
        write_json(&self.config_path(), config)
    }

    pub fn load_arch_rules(&self) -> Result<ArchRules> {
        read_json_or_default(&self.arch_rules_path())
    }

    pub fn save_arch_rules(&self, rules: &ArchRules) -> Result<()> {
        self.ensure_dir()?;
        write_json(&self.arch_rules_path(), rules)
    }

    /// Load `coverage.json` if it exists and was written within `max_age`
    /// (spec §4.8 vibecheck: "runtime pytest-cov data when fresh in cache
    /// or a `coverage.json` <= 5 min old, else static approximation").
    /// Returns `None` on a missing or stale file rather than an error —
    /// the caller falls back to the static heuristic.
    pub fn load_coverage_if_fresh(&self, max_age: std::time::Duration) -> Result<Option<CoverageReport>> {
        let path = self.coverage_path();
        let Ok(meta) = std::fs::metadata(&path) else {
            return Ok(None);
        };
        let Ok(modified) = meta.modified() else {
            return Ok(None);
        };
        let stale = std::time::SystemTime::now()
            .duration_since(modified)
            .map(|age| age > max_age)
            .unwrap_or(false);
        if stale {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        let report: CoverageReport =
            serde_json::from_str(&raw).map_err(|e| StorageError::config(format!("{}: {e}", path.display())))?;
        Ok(Some(report))
    }
}

/// A `coverage.json` document in the shape `coverage.py`/pytest-cov emit:
/// an overall percentage plus a per-file breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    #[serde(default)]
    pub totals: CoverageSummary,
    #[serde(default)]
    pub files: std::collections::HashMap<String, CoverageFileEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub percent_covered: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageFileEntry {
    pub summary: CoverageSummary,
}

/// `.lens/config.json` — skip rules and language selection for the
/// project scan. `skip_dirs` and `skip_suffixes` mirror the exact lists
/// in spec §6; `fsutil::should_skip_dir` is the canonical enforcement
/// point and does not read this struct directly — it is surfaced here so
/// a project can override the walk via `.lens/config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub skip_dirs: Vec<String>,
    /// Directory-name suffixes (not file suffixes) that mark a venv-like
    /// directory for skipping, e.g. `my-env`, `project_venv`.
    pub skip_suffixes: Vec<String>,
    pub languages: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            skip_dirs: vec![
                "__pycache__".into(),
                ".git".into(),
                ".lens".into(),
                ".venv".into(),
                "venv".into(),
                "env".into(),
                "node_modules".into(),
                ".mypy_cache".into(),
                ".pytest_cache".into(),
                ".ruff_cache".into(),
                "dist".into(),
                "build".into(),
                ".eggs".into(),
                ".tox".into(),
                "site-packages".into(),
                ".next".into(),
                ".nuxt".into(),
                ".output".into(),
                "coverage".into(),
                "htmlcov".into(),
                ".nyc_output".into(),
                "out".into(),
            ],
            skip_suffixes: vec!["-env".into(), "-venv".into(), "_env".into(), "_venv".into()],
            languages: vec!["python".into(), "typescript".into()],
        }
    }
}

/// `.lens/arch_rules.json` — user-declared architecture boundary rules,
/// checked by the quality module's `arch_check` (spec §4.8). Each rule
/// carries an opaque `id` so violations can be referenced stably.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchRules {
    pub rules: Vec<ArchRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArchRule {
    /// Forbids imports from one dotted-prefix area into another.
    NoDependency {
        id: String,
        from_prefix: String,
        to_prefix: String,
        #[serde(default)]
        reason: String,
    },
    /// Caps the number of methods a class in `class_prefix` may define.
    MaxClassMethods {
        id: String,
        class_prefix: String,
        max_methods: u32,
    },
    /// Requires every module under `prefix` to have a corresponding test.
    RequiredTest {
        id: String,
        prefix: String,
    },
    /// Forbids import cycles among modules under `prefix`.
    NoCircularImports {
        id: String,
        prefix: String,
    },
}

impl ArchRule {
    pub fn id(&self) -> &str {
        match self {
            ArchRule::NoDependency { id, .. }
            | ArchRule::MaxClassMethods { id, .. }
            | ArchRule::RequiredTest { id, .. }
            | ArchRule::NoCircularImports { id, .. } => id,
        }
    }
}

/// Backward-compatible alias retained for the simplest, most common rule
/// shape; `ArchRule::NoDependency` is the general form.
pub type ForbiddenImport = ArchRule;

fn read_json_or_default<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw)
        .map_err(|e| StorageError::config(format!("{}: {e}", path.display())))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let raw = serde_json::to_string_pretty(value)?;
    std::fs::write(path, raw)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn config_defaults_skip_common_noise_dirs() {
        let config = Config::default();
        assert!(config.skip_dirs.contains(&"node_modules".to_string()));
        assert!(config.skip_dirs.contains(&".lens".to_string()));
    }

    #[test]
    fn missing_config_file_yields_default() {
        let dir = tempdir().unwrap();
        let sidecar = Sidecar::new(dir.path());
        let config = sidecar.load_config().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn save_then_load_config_roundtrips() {
        let dir = tempdir().unwrap();
        let sidecar = Sidecar::new(dir.path());
        let mut config = Config::default();
        config.languages = vec!["python".to_string()];
        sidecar.save_config(&config).unwrap();

        let loaded = sidecar.load_config().unwrap();
        assert_eq!(loaded.languages, vec!["python".to_string()]);
    }

    #[test]
    fn arch_rules_roundtrip() {
        let dir = tempdir().unwrap();
        let sidecar = Sidecar::new(dir.path());
        let rules = ArchRules {
            rules: vec![ArchRule::NoDependency {
                id: "ui-no-db".to_string(),
                from_prefix: "app.ui".to_string(),
                to_prefix: "app.db".to_string(),
                reason: "UI must not import the data layer directly".to_string(),
            }],
        };
        sidecar.save_arch_rules(&rules).unwrap();
        let loaded = sidecar.load_arch_rules().unwrap();
        assert_eq!(loaded.rules.len(), 1);
        assert_eq!(loaded.rules[0].id(), "ui-no-db");
    }

    #[test]
    fn lens_dir_under_root() {
        let dir = tempdir().unwrap();
        let sidecar = Sidecar::new(dir.path());
        assert_eq!(sidecar.lens_dir(), dir.path().join(".lens"));
        assert!(!sidecar.exists());
    }
}
