//! lens-core — parser plane, normalizer, resolver plane, graph engine, and
//! mutation/quality tooling for the lens code-graph intelligence system.
//!
//! The data model (`Node`, `Edge`, ...) lives in [`lens_storage::model`] so
//! that both this crate's in-memory graph and the SQLite stores serialize
//! exactly the same types; this crate re-exports what it needs from there.

pub mod context;
pub mod entrypoints;
pub mod errors;
pub mod fsutil;
pub mod graph;
pub mod mutation;
pub mod normalizer;
pub mod parser;
pub mod quality;
pub mod resolver;
pub mod shared;

pub use errors::{LensError, Result};

pub use lens_storage::{
    Change, ChangeAction, ClassMetrics, Edge, EdgeConfidence, EdgeKind, EdgeSource, FileAnalysis,
    LensResponse, Node, NodeKind, Patch, ProjectHealth, RenameResult, Resolution, SyncResult,
};
