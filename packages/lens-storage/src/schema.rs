//! SQL schema (DDL) for the three embedded stores.
//!
//! Each store opens its own file under `.lens/` in WAL mode (spec §5:
//! "opened with a write-ahead journal mode; opens occur on demand and
//! connections are closed after each atomic operation").

#[cfg(feature = "sqlite")]
pub const GRAPH_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    id              TEXT PRIMARY KEY,
    kind            TEXT NOT NULL,
    name            TEXT NOT NULL,
    qualified_name  TEXT NOT NULL,
    file_path       TEXT NOT NULL,
    start_line      INTEGER NOT NULL,
    end_line        INTEGER NOT NULL,
    source_code     TEXT NOT NULL,
    docstring       TEXT,
    signature       TEXT,
    hash            TEXT NOT NULL,
    metadata        TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_nodes_file_path ON nodes(file_path);
CREATE INDEX IF NOT EXISTS idx_nodes_kind ON nodes(kind);

CREATE TABLE IF NOT EXISTS edges (
    id                TEXT PRIMARY KEY,
    from_node         TEXT NOT NULL,
    to_node           TEXT NOT NULL,
    kind              TEXT NOT NULL,
    line_number       INTEGER,
    column_number     INTEGER,
    confidence        TEXT NOT NULL,
    source            TEXT NOT NULL,
    untracked_reason  TEXT NOT NULL DEFAULT '',
    metadata          TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_node);
CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_node);
CREATE INDEX IF NOT EXISTS idx_edges_kind ON edges(kind);

CREATE TABLE IF NOT EXISTS fingerprints (
    relative_path TEXT PRIMARY KEY,
    mtime_secs    INTEGER NOT NULL,
    size          INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS class_metrics (
    node_id            TEXT PRIMARY KEY,
    method_count       INTEGER NOT NULL,
    line_count         INTEGER NOT NULL,
    public_methods     INTEGER NOT NULL,
    private_methods    INTEGER NOT NULL,
    dependency_count   INTEGER NOT NULL,
    internal_calls     INTEGER NOT NULL,
    histogram          TEXT NOT NULL DEFAULT '{}',
    percentile_rank    REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS annotations (
    node_id  TEXT NOT NULL,
    key      TEXT NOT NULL,
    value    TEXT NOT NULL,
    PRIMARY KEY (node_id, key)
);
"#;

#[cfg(feature = "sqlite")]
pub const HISTORY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS changes (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp      TEXT NOT NULL,
    node_id        TEXT NOT NULL,
    action         TEXT NOT NULL,
    old_source     TEXT,
    new_source     TEXT,
    old_hash       TEXT NOT NULL DEFAULT '',
    new_hash       TEXT NOT NULL DEFAULT '',
    affected_nodes TEXT NOT NULL DEFAULT '[]',
    description    TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_changes_node_id ON changes(node_id);
"#;

#[cfg(feature = "sqlite")]
pub const RESOLVE_CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS resolve_cache (
    resolver    TEXT NOT NULL,
    input_hash  TEXT NOT NULL,
    result      TEXT NOT NULL,
    PRIMARY KEY (resolver, input_hash)
);
"#;

#[cfg(feature = "sqlite")]
pub const SESSION_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS session_notes (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;
