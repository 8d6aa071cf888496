//! Embedded storage for the lens code-graph engine.
//!
//! Everything a project's `.lens/` sidecar holds: the graph itself
//! (`graph.db`), the append-only change log (`history.db`), a memoization
//! cache for resolver output (`resolve_cache.db`), a session-scoped note
//! pad (`session.db`), and the plain-JSON `config.json`/`arch_rules.json`
//! files. [`model`] is the single source of truth for the wire format —
//! `lens-core`'s in-memory graph and these stores serialize the same
//! types.

pub mod error;
pub mod model;
pub mod schema;

#[cfg(feature = "sqlite")]
pub mod graph_store;
#[cfg(feature = "sqlite")]
pub mod history_store;
#[cfg(feature = "sqlite")]
pub mod resolve_cache_store;
#[cfg(feature = "sqlite")]
pub mod session_notes;
#[cfg(feature = "sqlite")]
pub mod sidecar;

pub use error::{ErrorKind, Result, StorageError};
pub use model::{
    Change, ChangeAction, ClassMetrics, Edge, EdgeConfidence, EdgeKind, EdgeSource, FileAnalysis,
    FileFingerprint, LensResponse, Node, NodeKind, Patch, ProjectHealth, RenameResult,
    RenameReviewItem, Resolution, SyncResult, compute_hash, normalize_path,
};

#[cfg(feature = "sqlite")]
pub use graph_store::GraphStore;
#[cfg(feature = "sqlite")]
pub use history_store::HistoryStore;
#[cfg(feature = "sqlite")]
pub use resolve_cache_store::ResolveCacheStore;
#[cfg(feature = "sqlite")]
pub use session_notes::SessionNotes;
#[cfg(feature = "sqlite")]
pub use sidecar::{ArchRule, ArchRules, Config, CoverageFileEntry, CoverageReport, CoverageSummary, ForbiddenImport, Sidecar};
