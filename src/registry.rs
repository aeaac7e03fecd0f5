//! Repository registry: which repositories are known, their display names
//! and settings overrides, plus per-repository summaries.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::config::RepositoryOverrides;
use crate::db;
use crate::errors::{IndexError, StoreError};
use crate::snapshot;

/// A registered repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repository {
    pub path: String,
    pub display_name: String,
    pub added_at: i64,
}

/// A repository plus what its latest run reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositorySummary {
    #[serde(flatten)]
    pub repository: Repository,
    pub last_indexed: Option<i64>,
    pub file_count: usize,
    pub node_count: usize,
    pub link_count: usize,
    pub snapshot_count: usize,
    pub using_defaults: bool,
}

/// Canonical absolute form of a repository path. Fails when the path does
/// not exist or is not a directory.
pub fn canonical_repo_path(path: &Path) -> Result<PathBuf, IndexError> {
    let canonical = std::fs::canonicalize(path).map_err(|e| IndexError::InvalidPath {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !canonical.is_dir() {
        return Err(IndexError::InvalidPath {
            path: path.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }
    Ok(canonical)
}

fn default_display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| db::repo_key(path))
}

/// Register the repository at `path` (already canonical).
pub fn add(conn: &Connection, path: &Path, display_name: Option<&str>) -> Result<Repository, IndexError> {
    let key = db::repo_key(path);
    if get(conn, &key)?.is_some() {
        return Err(IndexError::AlreadyRegistered(path.to_path_buf()));
    }
    let repo = Repository {
        path: key,
        display_name: display_name
            .map(str::to_string)
            .unwrap_or_else(|| default_display_name(path)),
        added_at: db::now_millis(),
    };
    conn.execute(
        "INSERT INTO repositories (path, display_name, added_at) VALUES (?1, ?2, ?3)",
        params![repo.path, repo.display_name, repo.added_at],
    )
    .map_err(StoreError::from)?;
    tracing::info!(repo = %repo.path, name = %repo.display_name, "registered repository");
    Ok(repo)
}

/// Register `path` unless it already is. Returns the stored record.
pub fn ensure(conn: &Connection, path: &Path) -> Result<Repository, IndexError> {
    match get(conn, &db::repo_key(path))? {
        Some(repo) => Ok(repo),
        None => add(conn, path, None),
    }
}

pub fn get(conn: &Connection, key: &str) -> Result<Option<Repository>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT path, display_name, added_at FROM repositories WHERE path = ?1",
            [key],
            |row| {
                Ok(Repository {
                    path: row.get(0)?,
                    display_name: row.get(1)?,
                    added_at: row.get(2)?,
                })
            },
        )
        .optional()?)
}

/// Remove a repository with its snapshots, overrides, fingerprints and graph.
pub fn remove(conn: &Connection, key: &str) -> Result<(), IndexError> {
    if get(conn, key)?.is_none() {
        return Err(IndexError::NotFound(format!("repository {key}")));
    }
    let tx = conn.unchecked_transaction().map_err(StoreError::from)?;
    let snapshots = snapshot::delete_for_repo(&tx, key)?;
    for sql in [
        "DELETE FROM edges WHERE repo = ?1",
        "DELETE FROM nodes WHERE repo = ?1",
        "DELETE FROM fingerprints WHERE repo = ?1",
        "DELETE FROM repo_overrides WHERE path = ?1",
        "DELETE FROM repositories WHERE path = ?1",
    ] {
        tx.execute(sql, [key]).map_err(StoreError::from)?;
    }
    tx.commit().map_err(StoreError::from)?;
    tracing::info!(repo = %key, snapshots, "removed repository");
    Ok(())
}

/// Every registered repository with its latest counts, ordered by name.
pub fn list(conn: &Connection) -> Result<Vec<RepositorySummary>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT path, display_name, added_at FROM repositories ORDER BY display_name, path",
    )?;
    let repos = stmt
        .query_map([], |row| {
            Ok(Repository {
                path: row.get(0)?,
                display_name: row.get(1)?,
                added_at: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut out = Vec::with_capacity(repos.len());
    for repository in repos {
        let latest = snapshot::latest(conn, &repository.path, false)?;
        let using_defaults = load_overrides(conn, &repository.path)?.is_none_or(|o| o.is_empty());
        out.push(RepositorySummary {
            last_indexed: latest.as_ref().map(|s| s.timestamp),
            file_count: latest.as_ref().map_or(0, |s| s.file_count),
            node_count: latest.as_ref().map_or(0, |s| s.node_count),
            link_count: latest.as_ref().map_or(0, |s| s.link_count),
            snapshot_count: snapshot::count(conn, &repository.path)?,
            using_defaults,
            repository,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

pub fn load_overrides(conn: &Connection, key: &str) -> Result<Option<RepositoryOverrides>, StoreError> {
    let json: Option<String> = conn
        .query_row(
            "SELECT overrides FROM repo_overrides WHERE path = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(match json {
        Some(j) => Some(serde_json::from_str(&j)?),
        None => None,
    })
}

/// Merge `update` into the stored overrides; only fields set in `update`
/// change. Returns the stored result.
pub fn update_overrides(
    conn: &Connection,
    key: &str,
    update: RepositoryOverrides,
) -> Result<RepositoryOverrides, StoreError> {
    let mut overrides = load_overrides(conn, key)?.unwrap_or_default();
    overrides.merge(update);
    conn.execute(
        "INSERT OR REPLACE INTO repo_overrides (path, overrides, updated_at) VALUES (?1, ?2, ?3)",
        params![key, serde_json::to_string(&overrides)?, db::now_millis()],
    )?;
    Ok(overrides)
}

/// Drop all overrides so the repository uses the global defaults again.
pub fn clear_overrides(conn: &Connection, key: &str) -> Result<bool, StoreError> {
    Ok(conn.execute("DELETE FROM repo_overrides WHERE path = ?1", [key])? > 0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Changes, Snapshot};
    use tempfile::TempDir;

    fn conn() -> (TempDir, Connection) {
        let dir = TempDir::new().unwrap();
        let conn = db::open(&db::db_path(&dir.path().join("data"))).unwrap();
        (dir, conn)
    }

    #[test]
    fn add_uses_basename_as_default_name() {
        let (dir, conn) = conn();
        let repo_dir = dir.path().join("my-project");
        std::fs::create_dir(&repo_dir).unwrap();
        let path = canonical_repo_path(&repo_dir).unwrap();

        let repo = add(&conn, &path, None).unwrap();
        assert_eq!(repo.display_name, "my-project");
        assert_eq!(get(&conn, &repo.path).unwrap(), Some(repo));
    }

    #[test]
    fn add_twice_fails() {
        let (dir, conn) = conn();
        let path = canonical_repo_path(dir.path()).unwrap();
        add(&conn, &path, Some("x")).unwrap();
        let err = add(&conn, &path, None).unwrap_err();
        assert!(matches!(err, IndexError::AlreadyRegistered(_)));
        assert_eq!(ensure(&conn, &path).unwrap().display_name, "x");
    }

    #[test]
    fn missing_path_is_invalid() {
        let (dir, _conn) = conn();
        let err = canonical_repo_path(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, IndexError::InvalidPath { .. }));
    }

    #[test]
    fn file_path_is_invalid() {
        let (dir, _conn) = conn();
        let file = dir.path().join("f.py");
        std::fs::write(&file, "").unwrap();
        let err = canonical_repo_path(&file).unwrap_err();
        assert!(matches!(err, IndexError::InvalidPath { .. }));
    }

    #[test]
    fn remove_cascades() {
        let (dir, conn) = conn();
        let path = canonical_repo_path(dir.path()).unwrap();
        let repo = add(&conn, &path, None).unwrap();
        update_overrides(
            &conn,
            &repo.path,
            RepositoryOverrides {
                max_file_size_kb: Some(5),
                ..Default::default()
            },
        )
        .unwrap();
        snapshot::insert(
            &conn,
            &Snapshot {
                id: "s1".into(),
                repository: repo.path.clone(),
                timestamp: 1,
                file_count: 0,
                node_count: 0,
                link_count: 0,
                changes: Changes::default(),
                errors: Vec::new(),
                cancelled: false,
                graph_data: None,
            },
        )
        .unwrap();

        remove(&conn, &repo.path).unwrap();
        assert!(get(&conn, &repo.path).unwrap().is_none());
        assert!(load_overrides(&conn, &repo.path).unwrap().is_none());
        assert_eq!(snapshot::count(&conn, &repo.path).unwrap(), 0);
        assert!(matches!(
            remove(&conn, &repo.path).unwrap_err(),
            IndexError::NotFound(_)
        ));
    }

    #[test]
    fn overrides_update_partially_and_reset() {
        let (_dir, conn) = conn();
        update_overrides(
            &conn,
            "/r",
            RepositoryOverrides {
                exclude_dirs: Some(vec!["build".into()]),
                ..Default::default()
            },
        )
        .unwrap();
        let stored = update_overrides(
            &conn,
            "/r",
            RepositoryOverrides {
                max_file_size_kb: Some(64),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(stored.exclude_dirs, Some(vec!["build".to_string()]));
        assert_eq!(stored.max_file_size_kb, Some(64));
        assert_eq!(load_overrides(&conn, "/r").unwrap(), Some(stored));

        assert!(clear_overrides(&conn, "/r").unwrap());
        assert!(load_overrides(&conn, "/r").unwrap().is_none());
        assert!(!clear_overrides(&conn, "/r").unwrap());
    }

    #[test]
    fn list_summarises_latest_snapshot() {
        let (dir, conn) = conn();
        let path = canonical_repo_path(dir.path()).unwrap();
        let repo = add(&conn, &path, Some("demo")).unwrap();

        let listed = list(&conn).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].snapshot_count, 0);
        assert!(listed[0].last_indexed.is_none());
        assert!(listed[0].using_defaults);

        snapshot::insert(
            &conn,
            &Snapshot {
                id: "s1".into(),
                repository: repo.path.clone(),
                timestamp: 77,
                file_count: 2,
                node_count: 3,
                link_count: 1,
                changes: Changes::default(),
                errors: Vec::new(),
                cancelled: false,
                graph_data: None,
            },
        )
        .unwrap();
        let listed = list(&conn).unwrap();
        assert_eq!(listed[0].last_indexed, Some(77));
        assert_eq!(listed[0].node_count, 3);
        assert_eq!(listed[0].snapshot_count, 1);
    }
}
