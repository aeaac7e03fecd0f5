//! Graph store capability and its SQLite implementation.
//!
//! The reconciler talks to the store only through [`GraphStore`]. The SQLite
//! store also owns the run-level transaction ([`RunTx`]), fingerprint
//! persistence, and the bounded retry policy for transient lock errors.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::config::PipelineConfig;
use crate::db;
use crate::errors::StoreError;
use crate::types::{EdgeKind, FileFingerprint, GraphEdge, GraphFilter, GraphNode, NodeKind, Subgraph};

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// Operations the reconciler needs from a graph store.
pub trait GraphStore {
    /// Insert or replace a node by id.
    fn upsert_node(&self, node: &GraphNode) -> Result<(), StoreError>;

    /// Insert or replace an edge keyed by (source, target, kind).
    fn upsert_edge(&self, repo: &str, edge: &GraphEdge) -> Result<(), StoreError>;

    /// Remove every node of `path` and every edge `path` owns. Returns the
    /// number of nodes removed.
    fn delete_nodes_by_file(&self, repo: &str, path: &str) -> Result<usize, StoreError>;

    fn query_subgraph(&self, repo: &str, filter: &GraphFilter) -> Result<Subgraph, StoreError>;

    /// All nodes of one kind in the repository, ordered by file then line.
    fn nodes_of_kind(&self, repo: &str, kind: NodeKind) -> Result<Vec<GraphNode>, StoreError>;

    /// Remove all edges of the given kinds in the repository.
    fn delete_edges_of_kinds(&self, repo: &str, kinds: &[EdgeKind]) -> Result<usize, StoreError>;

    /// Remove edges whose source or target node no longer exists.
    fn prune_dangling_edges(&self, repo: &str) -> Result<usize, StoreError>;

    /// Run `f` atomically: on error everything it wrote is undone and the
    /// error is returned.
    fn within_unit<T>(&self, f: impl FnOnce(&Self) -> Result<T, StoreError>) -> Result<T, StoreError>
    where
        Self: Sized;
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Bounded exponential backoff for transient store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
    /// How long one attempt waits on a locked database before failing busy.
    pub busy_timeout: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff: Duration::ZERO,
            busy_timeout: Duration::from_millis(PipelineConfig::default().busy_timeout_ms),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            retries: config.store_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
        }
    }

    /// Run `op`, retrying transient failures up to `retries` times.
    pub fn run<T>(&self, mut op: impl FnMut() -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut delay = self.backoff;
        let mut attempt = 0;
        loop {
            match op() {
                Err(err) if err.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    tracing::debug!(
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "graph store busy, retrying"
                    );
                    thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                }
                other => return other,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

/// SQLite-backed graph store. One instance per thread; instances for
/// different repositories may share a database file.
pub struct SqliteGraphStore {
    conn: Connection,
    retry: RetryPolicy,
    write_gate: Option<Arc<Mutex<()>>>,
}

impl SqliteGraphStore {
    pub fn open(path: &Path, retry: RetryPolicy) -> Result<Self, StoreError> {
        let conn = retry.run(|| db::open(path))?;
        conn.busy_timeout(retry.busy_timeout)?;
        Ok(Self {
            conn,
            retry,
            write_gate: None,
        })
    }

    /// Share `gate` with other stores on the same database. [`begin_run`]
    /// takes it before asking SQLite for the write lock, so sibling runs
    /// wait their turn and lock retries only cover outside writers.
    ///
    /// [`begin_run`]: SqliteGraphStore::begin_run
    pub fn with_write_gate(mut self, gate: Arc<Mutex<()>>) -> Self {
        self.write_gate = Some(gate);
        self
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Begin the run-level write transaction, retrying while locked.
    pub fn begin_run(&self) -> Result<RunTx<'_>, StoreError> {
        let permit = self.write_gate.as_ref().map(|gate| {
            tracing::debug!("waiting for write permit");
            gate.lock().unwrap_or_else(|e| e.into_inner())
        });
        self.retry
            .run(|| self.conn.execute_batch("BEGIN IMMEDIATE").map_err(StoreError::from))?;
        Ok(RunTx {
            store: self,
            finished: false,
            _permit: permit,
        })
    }

    /// Read-only query outside a run, retried on transient errors.
    pub fn read<T>(&self, f: impl Fn(&Connection) -> Result<T, StoreError>) -> Result<T, StoreError> {
        self.retry.run(|| f(&self.conn))
    }

    // -- fingerprints ---------------------------------------------------------

    pub fn load_fingerprints(&self, repo: &str) -> Result<HashMap<String, FileFingerprint>, StoreError> {
        load_fingerprints(&self.conn, repo)
    }

    /// Replace the repository's fingerprint set wholesale.
    pub fn replace_fingerprints(
        &self,
        repo: &str,
        fingerprints: &[FileFingerprint],
    ) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM fingerprints WHERE repo = ?1", [repo])?;
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO fingerprints (repo, path, hash, size, mtime, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for fp in fingerprints {
            stmt.execute(params![
                repo,
                fp.path,
                fp.hash,
                fp.size as i64,
                fp.mtime,
                fp.last_seen
            ])?;
        }
        Ok(())
    }

    /// Remove every node, edge and fingerprint of the repository.
    pub fn purge_repository(&self, repo: &str) -> Result<(), StoreError> {
        self.conn.execute("DELETE FROM edges WHERE repo = ?1", [repo])?;
        self.conn.execute("DELETE FROM nodes WHERE repo = ?1", [repo])?;
        self.conn
            .execute("DELETE FROM fingerprints WHERE repo = ?1", [repo])?;
        Ok(())
    }

    pub fn count_nodes(&self, repo: &str) -> Result<usize, StoreError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE repo = ?1",
            [repo],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn node_by_id(&self, id: &str) -> Result<Option<GraphNode>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"),
                [id],
                row_to_node,
            )
            .optional()?)
    }
}

/// Read the fingerprint set of `repo`.
pub fn load_fingerprints(
    conn: &Connection,
    repo: &str,
) -> Result<HashMap<String, FileFingerprint>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT path, hash, size, mtime, last_seen FROM fingerprints WHERE repo = ?1",
    )?;
    let rows = stmt.query_map([repo], |row| {
        Ok(FileFingerprint {
            path: row.get(0)?,
            hash: row.get(1)?,
            size: row.get::<_, i64>(2)? as u64,
            mtime: row.get(3)?,
            last_seen: row.get(4)?,
        })
    })?;
    let mut out = HashMap::new();
    for fp in rows {
        let fp = fp?;
        out.insert(fp.path.clone(), fp);
    }
    Ok(out)
}

const NODE_COLUMNS: &str = "id, kind, name, qualified_name, file, start_line, end_line, repo, bases";

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<GraphNode> {
    let kind: String = row.get(1)?;
    let bases: Option<String> = row.get(8)?;
    Ok(GraphNode {
        id: row.get(0)?,
        kind: NodeKind::from_str(&kind).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
        })?,
        name: row.get(2)?,
        qualified_name: row.get(3)?,
        file: row.get(4)?,
        start_line: row.get::<_, i64>(5)? as usize,
        end_line: row.get::<_, i64>(6)? as usize,
        repo: row.get(7)?,
        bases: bases
            .and_then(|b| serde_json::from_str(&b).ok())
            .unwrap_or_default(),
    })
}

fn row_to_edge(row: &Row<'_>) -> rusqlite::Result<GraphEdge> {
    let kind: String = row.get(2)?;
    Ok(GraphEdge {
        source: row.get(0)?,
        target: row.get(1)?,
        kind: EdgeKind::from_str(&kind).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
        })?,
        owner: row.get(3)?,
    })
}

impl GraphStore for SqliteGraphStore {
    fn upsert_node(&self, node: &GraphNode) -> Result<(), StoreError> {
        let bases = if node.bases.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&node.bases)?)
        };
        self.conn
            .prepare_cached(
                "INSERT OR REPLACE INTO nodes
                 (id, repo, kind, name, qualified_name, file, start_line, end_line, bases)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?
            .execute(params![
                node.id,
                node.repo,
                node.kind.as_str(),
                node.name,
                node.qualified_name,
                node.file,
                node.start_line as i64,
                node.end_line as i64,
                bases,
            ])?;
        Ok(())
    }

    fn upsert_edge(&self, repo: &str, edge: &GraphEdge) -> Result<(), StoreError> {
        self.conn
            .prepare_cached(
                "INSERT OR REPLACE INTO edges (source, target, kind, repo, owner)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?
            .execute(params![
                edge.source,
                edge.target,
                edge.kind.as_str(),
                repo,
                edge.owner
            ])?;
        Ok(())
    }

    fn delete_nodes_by_file(&self, repo: &str, path: &str) -> Result<usize, StoreError> {
        self.conn.execute(
            "DELETE FROM edges WHERE repo = ?1 AND owner = ?2",
            params![repo, path],
        )?;
        let removed = self.conn.execute(
            "DELETE FROM nodes WHERE repo = ?1 AND file = ?2",
            params![repo, path],
        )?;
        Ok(removed)
    }

    fn query_subgraph(&self, repo: &str, filter: &GraphFilter) -> Result<Subgraph, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE repo = ?1
             ORDER BY file, start_line, kind, qualified_name"
        ))?;
        let nodes: Vec<GraphNode> = stmt
            .query_map([repo], row_to_node)?
            .collect::<rusqlite::Result<_>>()?;
        let nodes: Vec<GraphNode> = nodes
            .into_iter()
            .filter(|n| filter.kinds.is_empty() || filter.kinds.contains(&n.kind))
            .filter(|n| {
                filter
                    .path_prefix
                    .as_deref()
                    .is_none_or(|prefix| n.file.starts_with(prefix))
            })
            .collect();

        let ids: std::collections::HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let mut stmt = self.conn.prepare_cached(
            "SELECT source, target, kind, owner FROM edges WHERE repo = ?1
             ORDER BY owner, kind, source, target",
        )?;
        let links: Vec<GraphEdge> = stmt
            .query_map([repo], row_to_edge)?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .filter(|e| ids.contains(e.source.as_str()) && ids.contains(e.target.as_str()))
            .collect();

        Ok(Subgraph { nodes, links })
    }

    fn nodes_of_kind(&self, repo: &str, kind: NodeKind) -> Result<Vec<GraphNode>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE repo = ?1 AND kind = ?2
             ORDER BY file, start_line, qualified_name"
        ))?;
        let nodes = stmt
            .query_map(params![repo, kind.as_str()], row_to_node)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(nodes)
    }

    fn delete_edges_of_kinds(&self, repo: &str, kinds: &[EdgeKind]) -> Result<usize, StoreError> {
        let mut removed = 0;
        for kind in kinds {
            removed += self.conn.execute(
                "DELETE FROM edges WHERE repo = ?1 AND kind = ?2",
                params![repo, kind.as_str()],
            )?;
        }
        Ok(removed)
    }

    fn prune_dangling_edges(&self, repo: &str) -> Result<usize, StoreError> {
        let removed = self.conn.execute(
            "DELETE FROM edges WHERE repo = ?1 AND (
                 NOT EXISTS (SELECT 1 FROM nodes WHERE nodes.id = edges.source)
                 OR NOT EXISTS (SELECT 1 FROM nodes WHERE nodes.id = edges.target))",
            [repo],
        )?;
        Ok(removed)
    }

    fn within_unit<T>(&self, f: impl FnOnce(&Self) -> Result<T, StoreError>) -> Result<T, StoreError> {
        self.conn.execute_batch("SAVEPOINT unit")?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch("RELEASE unit")?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK TO unit; RELEASE unit") {
                    tracing::warn!(error = %rollback, "failed to roll back unit");
                }
                Err(err)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Run transaction
// ---------------------------------------------------------------------------

/// The write transaction spanning one indexing run. Dropping it without
/// calling [`RunTx::commit`] rolls everything back.
pub struct RunTx<'a> {
    store: &'a SqliteGraphStore,
    finished: bool,
    _permit: Option<MutexGuard<'a, ()>>,
}

impl RunTx<'_> {
    /// Commit, retrying while the database is busy.
    pub fn commit(mut self) -> Result<(), StoreError> {
        self.store
            .retry
            .run(|| self.store.conn.execute_batch("COMMIT").map_err(StoreError::from))?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<(), StoreError> {
        self.finished = true;
        self.store.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for RunTx<'_> {
    fn drop(&mut self) {
        if !self.finished
            && !self.store.conn.is_autocommit()
            && let Err(err) = self.store.conn.execute_batch("ROLLBACK")
        {
            tracing::warn!(error = %err, "failed to roll back indexing run");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::TempDir;

    const REPO: &str = "/repo";

    fn store() -> (TempDir, SqliteGraphStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteGraphStore::open(&db::db_path(dir.path()), RetryPolicy::none()).unwrap();
        (dir, store)
    }

    fn node(file: &str, kind: NodeKind, name: &str) -> GraphNode {
        let qualified = if kind == NodeKind::File { "" } else { name };
        GraphNode {
            id: db::node_id(REPO, file, kind.as_str(), qualified),
            kind,
            name: name.into(),
            qualified_name: qualified.into(),
            file: file.into(),
            start_line: 1,
            end_line: 1,
            repo: REPO.into(),
            bases: Vec::new(),
        }
    }

    fn edge(source: &GraphNode, target: &GraphNode, kind: EdgeKind) -> GraphEdge {
        GraphEdge {
            source: source.id.clone(),
            target: target.id.clone(),
            kind,
            owner: source.file.clone(),
        }
    }

    fn busy() -> StoreError {
        StoreError::from(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ))
    }

    #[test]
    fn upsert_is_idempotent() {
        let (_dir, store) = store();
        let file = node("a.py", NodeKind::File, "a.py");
        let func = node("a.py", NodeKind::Function, "foo");
        for _ in 0..2 {
            store.upsert_node(&file).unwrap();
            store.upsert_node(&func).unwrap();
            store
                .upsert_edge(REPO, &edge(&file, &func, EdgeKind::Contains))
                .unwrap();
        }
        let graph = store.query_subgraph(REPO, &GraphFilter::default()).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.links.len(), 1);
    }

    #[test]
    fn delete_by_file_removes_owned_edges_only() {
        let (_dir, store) = store();
        let a = node("a.py", NodeKind::File, "a.py");
        let foo = node("a.py", NodeKind::Function, "foo");
        let b = node("b.py", NodeKind::File, "b.py");
        for n in [&a, &foo, &b] {
            store.upsert_node(n).unwrap();
        }
        store.upsert_edge(REPO, &edge(&a, &foo, EdgeKind::Contains)).unwrap();
        store.upsert_edge(REPO, &edge(&b, &a, EdgeKind::Imports)).unwrap();

        assert_eq!(store.delete_nodes_by_file(REPO, "b.py").unwrap(), 1);
        let graph = store.query_subgraph(REPO, &GraphFilter::default()).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.links.len(), 1);
        assert_eq!(graph.links[0].kind, EdgeKind::Contains);
    }

    #[test]
    fn prune_removes_dangling_edges() {
        let (_dir, store) = store();
        let a = node("a.py", NodeKind::File, "a.py");
        let b = node("b.py", NodeKind::File, "b.py");
        store.upsert_node(&a).unwrap();
        store.upsert_node(&b).unwrap();
        store.upsert_edge(REPO, &edge(&b, &a, EdgeKind::Imports)).unwrap();
        store
            .conn()
            .execute("DELETE FROM nodes WHERE file = 'a.py'", [])
            .unwrap();
        assert_eq!(store.prune_dangling_edges(REPO).unwrap(), 1);
    }

    #[test]
    fn subgraph_filters_by_kind_and_prefix() {
        let (_dir, store) = store();
        for n in [
            node("src/a.py", NodeKind::File, "a.py"),
            node("src/a.py", NodeKind::Class, "A"),
            node("tests/t.py", NodeKind::Class, "T"),
        ] {
            store.upsert_node(&n).unwrap();
        }
        let filter = GraphFilter {
            kinds: vec![NodeKind::Class],
            path_prefix: Some("src/".into()),
        };
        let graph = store.query_subgraph(REPO, &filter).unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.nodes[0].name, "A");
    }

    #[test]
    fn bases_round_trip_through_store() {
        let (_dir, store) = store();
        let mut class = node("a.py", NodeKind::Class, "A");
        class.bases = vec!["Base".into()];
        store.upsert_node(&class).unwrap();
        let classes = store.nodes_of_kind(REPO, NodeKind::Class).unwrap();
        assert_eq!(classes[0].bases, vec!["Base"]);
    }

    #[test]
    fn failed_unit_is_rolled_back() {
        let (_dir, store) = store();
        let tx = store.begin_run().unwrap();
        store.upsert_node(&node("a.py", NodeKind::File, "a.py")).unwrap();
        let result: Result<(), StoreError> = store.within_unit(|s| {
            s.upsert_node(&node("b.py", NodeKind::File, "b.py"))?;
            Err(busy())
        });
        assert!(result.is_err());
        tx.commit().unwrap();
        assert_eq!(store.count_nodes(REPO).unwrap(), 1);
    }

    #[test]
    fn dropped_run_rolls_back() {
        let (_dir, store) = store();
        {
            let _tx = store.begin_run().unwrap();
            store.upsert_node(&node("a.py", NodeKind::File, "a.py")).unwrap();
        }
        assert_eq!(store.count_nodes(REPO).unwrap(), 0);
        assert!(store.conn().is_autocommit());
    }

    #[test]
    fn fingerprints_are_replaced_wholesale() {
        let (_dir, store) = store();
        let fp = |path: &str| FileFingerprint {
            path: path.into(),
            hash: "h".into(),
            size: 1,
            mtime: 2,
            last_seen: 3,
        };
        store.replace_fingerprints(REPO, &[fp("a.py"), fp("b.py")]).unwrap();
        store.replace_fingerprints(REPO, &[fp("a.py")]).unwrap();
        let loaded = store.load_fingerprints(REPO).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["a.py"], fp("a.py"));
    }

    #[test]
    fn retry_recovers_from_transient_errors() {
        let policy = RetryPolicy {
            retries: 3,
            backoff: Duration::from_millis(1),
            ..RetryPolicy::none()
        };
        let calls = Cell::new(0);
        let result = policy.run(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 { Err(busy()) } else { Ok(42) }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn retry_gives_up_after_limit() {
        let policy = RetryPolicy {
            retries: 2,
            backoff: Duration::from_millis(1),
            ..RetryPolicy::none()
        };
        let calls = Cell::new(0);
        let result: Result<(), StoreError> = policy.run(|| {
            calls.set(calls.get() + 1);
            Err(busy())
        });
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn retry_does_not_repeat_permanent_errors() {
        let calls = Cell::new(0);
        let result: Result<(), StoreError> = RetryPolicy::default().run(|| {
            calls.set(calls.get() + 1);
            Err(StoreError::Unavailable("gone".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn second_writer_waits_for_lock() {
        let dir = TempDir::new().unwrap();
        let path = db::db_path(dir.path());
        let first = SqliteGraphStore::open(&path, RetryPolicy::none()).unwrap();
        let second = SqliteGraphStore::open(&path, RetryPolicy::none()).unwrap();
        second.conn().busy_timeout(Duration::from_millis(10)).unwrap();

        let tx = first.begin_run().unwrap();
        let err = second.begin_run().map(|_| ()).unwrap_err();
        assert!(err.is_transient());
        tx.commit().unwrap();
        second.begin_run().unwrap().commit().unwrap();
    }

    #[test]
    fn gated_writers_queue_past_busy_timeout() {
        let dir = TempDir::new().unwrap();
        let path = db::db_path(dir.path());
        let policy = RetryPolicy {
            busy_timeout: Duration::from_millis(20),
            ..RetryPolicy::none()
        };
        let gate = Arc::new(Mutex::new(()));
        let first = SqliteGraphStore::open(&path, policy)
            .unwrap()
            .with_write_gate(Arc::clone(&gate));
        let second = SqliteGraphStore::open(&path, policy)
            .unwrap()
            .with_write_gate(gate);

        let tx = first.begin_run().unwrap();
        first.upsert_node(&node("a.py", NodeKind::File, "a.py")).unwrap();
        let waiter = thread::spawn(move || -> Result<usize, StoreError> {
            let tx = second.begin_run()?;
            second.upsert_node(&node("b.py", NodeKind::File, "b.py"))?;
            tx.commit()?;
            second.count_nodes(REPO)
        });

        // Hold the write lock for many busy timeouts.
        thread::sleep(Duration::from_millis(200));
        tx.commit().unwrap();
        assert_eq!(waiter.join().unwrap().unwrap(), 2);
    }
}
