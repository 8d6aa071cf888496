//! Shared utilities used across the parser plane, normalizer, and resolvers.

pub mod utils;

pub use utils::ScopeStack;
