//! Error types for lens-core.
//!
//! Mirrors the error kinds of the graph engine's design: most operations
//! never raise (per-file parse failures, resolver failures, and LSP
//! per-request errors are logged and absorbed into the pipeline). What
//! remains is surfaced here for the cases that genuinely cannot proceed:
//! a missing sidecar, an unknown node, a bad patch, or an IO failure.

use thiserror::Error;

/// Main error type for lens-core operations.
#[derive(Debug, Error)]
pub enum LensError {
    /// `.lens/` sidecar missing when a read/mutate operation runs.
    #[error("project not initialized: no .lens/ directory at {0}")]
    NotInitialized(String),

    /// Node id not found in the store. `hint` carries nearest matches.
    #[error("node not found: {id}{}", format_hint(.hint))]
    NodeNotFound { id: String, hint: Vec<String> },

    /// A suffix matched more than one node id.
    #[error("ambiguous node id '{suffix}': candidates {candidates:?}")]
    AmbiguousNodeId {
        suffix: String,
        candidates: Vec<String>,
    },

    /// Proposed source failed to parse.
    #[error("proposed source is not valid {language}: {reason}")]
    SyntaxInvalid { language: String, reason: String },

    /// A patch fragment was not unique, or was absent, in the node's source.
    #[error("patch conflict on {node_id}: {reason}")]
    PatchConflict { node_id: String, reason: String },

    /// Read/write/permission failure, with the offending path.
    #[error("IO failure at {path}: {source}")]
    IoFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// An external tool (LSP binary, git, test runner) was not found.
    #[error("external tool missing: {0}")]
    ExternalToolMissing(String),

    /// An external tool was found but failed.
    #[error("external tool failed: {0}")]
    ExternalToolFailure(String),

    /// An architecture rule tripped during validation.
    #[error("architecture rule violated: {0}")]
    RuleViolation(String),

    /// Storage-layer failure, wrapped from `lens-storage`.
    #[error("storage error: {0}")]
    Storage(#[from] lens_storage::StorageError),

    /// Catch-all IO error not already tied to a specific path.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_hint(hint: &[String]) -> String {
    if hint.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {})", hint.join(", "))
    }
}

impl LensError {
    pub fn not_initialized(project_root: impl Into<String>) -> Self {
        LensError::NotInitialized(project_root.into())
    }

    pub fn node_not_found(id: impl Into<String>, hint: Vec<String>) -> Self {
        LensError::NodeNotFound { id: id.into(), hint }
    }

    pub fn ambiguous(suffix: impl Into<String>, candidates: Vec<String>) -> Self {
        LensError::AmbiguousNodeId {
            suffix: suffix.into(),
            candidates,
        }
    }

    pub fn syntax_invalid(language: impl Into<String>, reason: impl Into<String>) -> Self {
        LensError::SyntaxInvalid {
            language: language.into(),
            reason: reason.into(),
        }
    }

    pub fn patch_conflict(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        LensError::PatchConflict {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    pub fn io_failure(path: impl Into<String>, source: std::io::Error) -> Self {
        LensError::IoFailure {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for lens-core operations.
pub type Result<T> = std::result::Result<T, LensError>;
