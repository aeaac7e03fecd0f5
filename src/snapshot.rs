//! Snapshot history: one immutable record per indexing run.
//!
//! Snapshots are append-only and listed newest first. Listing omits the
//! embedded graph; [`get`] and [`latest`] can include it.

use std::collections::BTreeSet;

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::errors::{FileError, StoreError};
use crate::types::Subgraph;

/// Paths reported by a run, by classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changes {
    pub new: Vec<String>,
    pub changed: Vec<String>,
    pub deleted: Vec<String>,
}

impl Changes {
    /// Classification of `path` in this run, if it was reported at all.
    pub fn status_of(&self, path: &str) -> Option<FileStatus> {
        if self.new.iter().any(|p| p == path) {
            Some(FileStatus::New)
        } else if self.changed.iter().any(|p| p == path) {
            Some(FileStatus::Changed)
        } else if self.deleted.iter().any(|p| p == path) {
            Some(FileStatus::Deleted)
        } else {
            None
        }
    }

    fn all_paths(&self) -> impl Iterator<Item = &String> {
        self.new.iter().chain(&self.changed).chain(&self.deleted)
    }
}

/// One indexing run's immutable record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub repository: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub file_count: usize,
    pub node_count: usize,
    pub link_count: usize,
    pub changes: Changes,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FileError>,
    #[serde(default)]
    pub cancelled: bool,
    /// The graph as of this run. `None` in listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_data: Option<Subgraph>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    New,
    Changed,
    Deleted,
}

/// A path whose classification differs between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub path: String,
    pub from: Option<FileStatus>,
    pub to: Option<FileStatus>,
}

/// Result of [`compare`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotDiff {
    pub from: String,
    pub to: String,
    pub file_count_delta: i64,
    pub node_count_delta: i64,
    pub link_count_delta: i64,
    pub status_changes: Vec<StatusChange>,
}

/// Compare two snapshots by their counts and change lists. Pure.
pub fn compare(from: &Snapshot, to: &Snapshot) -> SnapshotDiff {
    let delta = |a: usize, b: usize| b as i64 - a as i64;

    let paths: BTreeSet<&str> = from
        .changes
        .all_paths()
        .chain(to.changes.all_paths())
        .map(String::as_str)
        .collect();
    let status_changes = paths
        .into_iter()
        .filter_map(|path| {
            let before = from.changes.status_of(path);
            let after = to.changes.status_of(path);
            (before != after).then(|| StatusChange {
                path: path.to_string(),
                from: before,
                to: after,
            })
        })
        .collect();

    SnapshotDiff {
        from: from.id.clone(),
        to: to.id.clone(),
        file_count_delta: delta(from.file_count, to.file_count),
        node_count_delta: delta(from.node_count, to.node_count),
        link_count_delta: delta(from.link_count, to.link_count),
        status_changes,
    }
}

/// What the most recent run of a repository reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileHistory {
    pub last_indexed: Option<i64>,
    pub changes: Changes,
}

/// Latest snapshot's timestamp and change lists, or empty lists if the
/// repository was never indexed.
pub fn file_history(conn: &Connection, repo: &str) -> Result<FileHistory, StoreError> {
    Ok(match latest(conn, repo, false)? {
        Some(s) => FileHistory {
            last_indexed: Some(s.timestamp),
            changes: s.changes,
        },
        None => FileHistory::default(),
    })
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

pub fn insert(conn: &Connection, snapshot: &Snapshot) -> Result<(), StoreError> {
    let graph = match &snapshot.graph_data {
        Some(g) => serde_json::to_string(g)?,
        None => serde_json::to_string(&Subgraph::default())?,
    };
    conn.execute(
        "INSERT INTO snapshots
         (id, repo, created_at, file_count, node_count, link_count,
          new_files, changed_files, deleted_files, errors, cancelled, graph)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            snapshot.id,
            snapshot.repository,
            snapshot.timestamp,
            snapshot.file_count as i64,
            snapshot.node_count as i64,
            snapshot.link_count as i64,
            serde_json::to_string(&snapshot.changes.new)?,
            serde_json::to_string(&snapshot.changes.changed)?,
            serde_json::to_string(&snapshot.changes.deleted)?,
            serde_json::to_string(&snapshot.errors)?,
            snapshot.cancelled,
            graph,
        ],
    )?;
    Ok(())
}

const COLUMNS: &str = "id, repo, created_at, file_count, node_count, link_count, \
                       new_files, changed_files, deleted_files, errors, cancelled";

/// Raw row; JSON columns are decoded afterwards so decode failures surface
/// as [`StoreError::Encode`].
struct RawSnapshot {
    id: String,
    repo: String,
    created_at: i64,
    counts: [i64; 3],
    json: [String; 4],
    cancelled: bool,
    graph: Option<String>,
}

fn raw_row(row: &Row<'_>, with_graph: bool) -> rusqlite::Result<RawSnapshot> {
    Ok(RawSnapshot {
        id: row.get(0)?,
        repo: row.get(1)?,
        created_at: row.get(2)?,
        counts: [row.get(3)?, row.get(4)?, row.get(5)?],
        json: [row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?],
        cancelled: row.get(10)?,
        graph: if with_graph { Some(row.get(11)?) } else { None },
    })
}

impl RawSnapshot {
    fn decode(self) -> Result<Snapshot, StoreError> {
        let [new, changed, deleted, errors] = self.json;
        Ok(Snapshot {
            id: self.id,
            repository: self.repo,
            timestamp: self.created_at,
            file_count: self.counts[0] as usize,
            node_count: self.counts[1] as usize,
            link_count: self.counts[2] as usize,
            changes: Changes {
                new: serde_json::from_str(&new)?,
                changed: serde_json::from_str(&changed)?,
                deleted: serde_json::from_str(&deleted)?,
            },
            errors: serde_json::from_str(&errors)?,
            cancelled: self.cancelled,
            graph_data: match self.graph {
                Some(g) => Some(serde_json::from_str(&g)?),
                None => None,
            },
        })
    }
}

/// Snapshots of `repo`, newest first, without graph data.
pub fn list(conn: &Connection, repo: &str) -> Result<Vec<Snapshot>, StoreError> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {COLUMNS} FROM snapshots WHERE repo = ?1 ORDER BY seq DESC"
    ))?;
    let raws = stmt
        .query_map([repo], |row| raw_row(row, false))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raws.into_iter().map(RawSnapshot::decode).collect()
}

/// Most recent snapshot of `repo`.
pub fn latest(conn: &Connection, repo: &str, with_graph: bool) -> Result<Option<Snapshot>, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {COLUMNS}, graph FROM snapshots WHERE repo = ?1 ORDER BY seq DESC LIMIT 1"),
            [repo],
            |row| raw_row(row, with_graph),
        )
        .optional()?;
    raw.map(RawSnapshot::decode).transpose()
}

/// One snapshot by id, including graph data.
pub fn get(conn: &Connection, id: &str) -> Result<Option<Snapshot>, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {COLUMNS}, graph FROM snapshots WHERE id = ?1"),
            [id],
            |row| raw_row(row, true),
        )
        .optional()?;
    raw.map(RawSnapshot::decode).transpose()
}

pub fn count(conn: &Connection, repo: &str) -> Result<usize, StoreError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM snapshots WHERE repo = ?1",
        [repo],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}

pub fn delete_for_repo(conn: &Connection, repo: &str) -> Result<usize, StoreError> {
    Ok(conn.execute("DELETE FROM snapshots WHERE repo = ?1", [repo])?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
