//! Database layer for SQLite storage.
//!
//! Provides connection management, schema creation and data-directory
//! resolution. Everything lives in a single database at
//! `<data_dir>/repograph.db`; graph rows are scoped by repository path.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Result, bail};
use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::errors::StoreError;

/// File name of the database inside the data directory.
pub const DB_FILE: &str = "repograph.db";

/// Environment variable overriding the data directory.
pub const HOME_ENV: &str = "REPOGRAPH_HOME";

// ---------------------------------------------------------------------------
// Schema SQL
// ---------------------------------------------------------------------------

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS repositories (
    path TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    added_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS repo_overrides (
    path TEXT PRIMARY KEY,
    overrides TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS nodes (
    id TEXT PRIMARY KEY,
    repo TEXT NOT NULL,
    kind TEXT NOT NULL,
    name TEXT NOT NULL,
    qualified_name TEXT NOT NULL,
    file TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    bases TEXT
);

CREATE TABLE IF NOT EXISTS edges (
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    kind TEXT NOT NULL,
    repo TEXT NOT NULL,
    owner TEXT NOT NULL,
    PRIMARY KEY (source, target, kind)
);

CREATE TABLE IF NOT EXISTS fingerprints (
    repo TEXT NOT NULL,
    path TEXT NOT NULL,
    hash TEXT NOT NULL,
    size INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    last_seen INTEGER NOT NULL,
    PRIMARY KEY (repo, path)
);

CREATE TABLE IF NOT EXISTS snapshots (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    repo TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    file_count INTEGER NOT NULL,
    node_count INTEGER NOT NULL,
    link_count INTEGER NOT NULL,
    new_files TEXT NOT NULL,
    changed_files TEXT NOT NULL,
    deleted_files TEXT NOT NULL,
    errors TEXT NOT NULL,
    cancelled INTEGER NOT NULL DEFAULT 0,
    graph TEXT NOT NULL
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_nodes_repo_file ON nodes(repo, file);
CREATE INDEX IF NOT EXISTS idx_nodes_repo_kind ON nodes(repo, kind);
CREATE INDEX IF NOT EXISTS idx_edges_repo_owner ON edges(repo, owner);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target);
CREATE INDEX IF NOT EXISTS idx_snapshots_repo ON snapshots(repo, seq);
"#;

// ---------------------------------------------------------------------------
// Connection management
// ---------------------------------------------------------------------------

/// Open (or create) the SQLite database at `path`, apply the schema, and set
/// pragmas suitable for concurrent access.
pub fn open(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            StoreError::Unavailable(format!("creating data directory {}: {e}", parent.display()))
        })?;
    }

    let conn = Connection::open(path)?;
    apply_pragmas(&conn)?;
    apply_schema(&conn)?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA busy_timeout = 5000;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Resolve the data directory: explicit flag, then `$REPOGRAPH_HOME`, then
/// `~/.repograph`.
pub fn resolve_data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    if let Ok(dir) = std::env::var(HOME_ENV)
        && !dir.is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    Ok(home_dir()?.join(".repograph"))
}

/// `<data_dir>/repograph.db`
pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DB_FILE)
}

/// Canonical string form of a repository path, used as its key everywhere.
pub fn repo_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Stable node id: first 16 bytes (hex) of SHA-256 over
/// `repo \0 path \0 kind:qualified_name`.
pub fn node_id(repo: &str, path: &str, kind: &str, qualified_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repo.as_bytes());
    hasher.update([0u8]);
    hasher.update(path.as_bytes());
    hasher.update([0u8]);
    hasher.update(kind.as_bytes());
    hasher.update(b":");
    hasher.update(qualified_name.as_bytes());
    let digest = hasher.finalize();
    hex_encode_short(&digest)
}

/// First 32 hex characters of a byte slice.
fn hex_encode_short(bytes: &[u8]) -> String {
    bytes.iter().take(16).map(|b| format!("{b:02x}")).collect()
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn home_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("HOME") {
        return Ok(PathBuf::from(home));
    }
    bail!("could not determine home directory ($HOME is not set)");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
