//! One indexing run, end to end.
//!
//! Orchestrates a run by combining:
//! - Change detection ([`crate::detector`])
//! - Parallel structural extraction ([`crate::extractor`])
//! - Per-file graph reconciliation and link resolution ([`crate::reconciler`])
//! - Snapshot and fingerprint recording ([`crate::snapshot`])
//!
//! All graph writes of a run share one transaction. Each file is its own
//! savepoint, so a file that fails to reconcile is rolled back and recorded
//! without affecting the others.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::config::EffectiveSettings;
use crate::db;
use crate::detector::{self, ChangeSet};
use crate::errors::{FileError, FileStage, IndexError, StoreError};
use crate::extractor::{self, ParserRegistry};
use crate::progress::Progress;
use crate::reconciler;
use crate::snapshot::{self, Changes, Snapshot};
use crate::store::{self, GraphStore, SqliteGraphStore};
use crate::types::{FileFingerprint, GraphFilter, StructuralRecord};

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// What a finished run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// `None` when the run was cancelled before anything was reconciled.
    pub snapshot_id: Option<String>,
    pub new: usize,
    pub changed: usize,
    pub deleted: usize,
    /// Work items reconciled (or attempted and recorded as failed).
    pub processed: usize,
    pub errors: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Per-run bookkeeping
// ---------------------------------------------------------------------------

/// Which work items were handled, and how.
#[derive(Default)]
struct Applied {
    /// Reconciled successfully.
    ok: HashSet<String>,
    /// Attempted, in run order, by classification.
    changes: Changes,
    errors: Vec<FileError>,
    stopped_early: bool,
}

impl Applied {
    fn handled(&self) -> usize {
        self.changes.new.len() + self.changes.changed.len() + self.changes.deleted.len()
    }

    fn record_failure(&mut self, path: &str, stage: FileStage, message: String) {
        let err = FileError {
            path: path.to_string(),
            stage,
            message,
        };
        tracing::warn!(path = %err.path, stage = %err.stage, error = %err.message, "file failed");
        self.errors.push(err);
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Index the repository at `root` (canonical) into `store`.
///
/// `progress` is updated throughout and marked completed (or failed) before
/// returning. Cancellation requested on `progress` is honoured between
/// files.
pub fn run(
    store: &SqliteGraphStore,
    parsers: &ParserRegistry,
    root: &Path,
    settings: &EffectiveSettings,
    progress: &Progress,
) -> Result<RunSummary, IndexError> {
    let result = run_inner(store, parsers, root, settings, progress);
    match &result {
        Ok(summary) => {
            progress.complete(summary.cancelled);
            progress.finish(summary);
        }
        Err(err) => {
            tracing::error!(repo = %root.display(), error = %err, "indexing run failed");
            progress.fail(err.to_string());
        }
    }
    result
}

fn run_inner(
    store: &SqliteGraphStore,
    parsers: &ParserRegistry,
    root: &Path,
    settings: &EffectiveSettings,
    progress: &Progress,
) -> Result<RunSummary, IndexError> {
    let start = Instant::now();
    let repo = db::repo_key(root);

    // 1. Detect.
    let previous = store.read(|conn| store::load_fingerprints(conn, &repo))?;
    let changes = detector::detect(root, settings, &previous)?;
    progress.set_total(changes.work_items());
    tracing::info!(
        repo = %repo,
        run_id = %progress.run_id(),
        new = changes.new.len(),
        changed = changes.changed.len(),
        deleted = changes.deleted.len(),
        unchanged = changes.unchanged.len(),
        "detected changes"
    );

    // 2. Extract new and changed files in parallel.
    let to_extract: Vec<String> = changes.new.iter().chain(&changes.changed).cloned().collect();
    let records = extractor::extract_all(parsers, root, &to_extract, settings.concurrency, progress)?;

    // 3. Reconcile inside the run transaction.
    let tx = store.begin_run()?;
    let mut applied = Applied::default();
    apply_deletions(store, &repo, &changes.deleted, progress, &mut applied)?;
    if !applied.stopped_early {
        let new: HashSet<&str> = changes.new.iter().map(String::as_str).collect();
        apply_records(store, &repo, &to_extract, records, &new, progress, &mut applied)?;
    }

    if applied.stopped_early && applied.handled() == 0 {
        tx.rollback()?;
        tracing::info!(repo = %repo, "run cancelled before any file was reconciled");
        return Ok(RunSummary {
            snapshot_id: None,
            new: 0,
            changed: 0,
            deleted: 0,
            processed: 0,
            errors: 0,
            cancelled: true,
            elapsed: start.elapsed(),
        });
    }

    let links = reconciler::resolve_links(store, &repo)?;
    tracing::debug!(
        repo = %repo,
        imports = links.imports,
        depends_on = links.depends_on,
        extends = links.extends,
        unresolved = links.unresolved,
        pruned = links.pruned,
        "resolved links"
    );

    // 4. Record fingerprints and the snapshot in the same transaction.
    let fingerprints = next_fingerprints(&changes, &previous, &applied);
    store.replace_fingerprints(&repo, &fingerprints)?;

    let graph = store.query_subgraph(&repo, &GraphFilter::default())?;
    let snapshot = Snapshot {
        id: uuid::Uuid::new_v4().to_string(),
        repository: repo.clone(),
        timestamp: db::now_millis(),
        file_count: fingerprints.len(),
        node_count: graph.nodes.len(),
        link_count: graph.links.len(),
        changes: applied.changes,
        errors: applied.errors,
        cancelled: applied.stopped_early,
        graph_data: Some(graph),
    };
    snapshot::insert(store.conn(), &snapshot)?;
    tx.commit()?;

    let summary = RunSummary {
        snapshot_id: Some(snapshot.id.clone()),
        new: snapshot.changes.new.len(),
        changed: snapshot.changes.changed.len(),
        deleted: snapshot.changes.deleted.len(),
        processed: snapshot.changes.new.len()
            + snapshot.changes.changed.len()
            + snapshot.changes.deleted.len(),
        errors: snapshot.errors.len(),
        cancelled: snapshot.cancelled,
        elapsed: start.elapsed(),
    };
    tracing::info!(
        repo = %repo,
        snapshot = %snapshot.id,
        files = snapshot.file_count,
        nodes = snapshot.node_count,
        links = snapshot.link_count,
        errors = summary.errors,
        cancelled = summary.cancelled,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "indexing run finished"
    );
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Classify the outcome of one unit and report whether it applied. Fatal
/// store errors abort the run; anything else is recorded against the file.
fn settle(
    applied: &mut Applied,
    path: &str,
    result: Result<usize, StoreError>,
) -> Result<bool, IndexError> {
    match result {
        Ok(nodes) => {
            tracing::debug!(path = %path, nodes, "reconciled");
            applied.ok.insert(path.to_string());
            Ok(true)
        }
        Err(err) if err.is_fatal() => Err(err.into()),
        Err(err) => {
            applied.record_failure(path, FileStage::Reconcile, err.to_string());
            Ok(false)
        }
    }
}

fn apply_deletions(
    store: &SqliteGraphStore,
    repo: &str,
    deleted: &[String],
    progress: &Progress,
    applied: &mut Applied,
) -> Result<(), IndexError> {
    for path in deleted {
        if progress.cancel_requested() {
            applied.stopped_early = true;
            return Ok(());
        }
        progress.set_current(Some(path));
        let result = store.within_unit(|s| reconciler::remove_file(s, repo, path));
        settle(applied, path, result)?;
        applied.changes.deleted.push(path.clone());
        progress.inc();
    }
    Ok(())
}

fn apply_records(
    store: &SqliteGraphStore,
    repo: &str,
    paths: &[String],
    records: Vec<Option<StructuralRecord>>,
    new: &HashSet<&str>,
    progress: &Progress,
    applied: &mut Applied,
) -> Result<(), IndexError> {
    for (path, record) in paths.iter().zip(records) {
        let Some(record) = record.filter(|_| !progress.cancel_requested()) else {
            applied.stopped_early = true;
            return Ok(());
        };
        progress.set_current(Some(path));
        let result = store.within_unit(|s| reconciler::reconcile_file(s, repo, &record));
        // One error per file: a reconcile failure supersedes the warning.
        if settle(applied, path, result)?
            && let Some(warning) = &record.warning
        {
            applied.record_failure(path, FileStage::Extract, warning.clone());
        }
        if new.contains(path.as_str()) {
            applied.changes.new.push(path.clone());
        } else {
            applied.changes.changed.push(path.clone());
        }
        progress.inc();
    }
    Ok(())
}

/// The fingerprint set matching what the graph now holds.
///
/// Unchanged and retained paths keep their fingerprints. Reconciled paths
/// take the fresh one (or drop out, for deletions). Paths that failed or were
/// never reached keep their previous fingerprint, or have none if they were
/// new, so the next run picks them up again.
fn next_fingerprints(
    changes: &ChangeSet,
    previous: &HashMap<String, FileFingerprint>,
    applied: &Applied,
) -> Vec<FileFingerprint> {
    let mut out: Vec<FileFingerprint> = Vec::with_capacity(changes.current.len());
    let fresh = |path: &String| changes.current.get(path).cloned();
    let old = |path: &String| previous.get(path).cloned();

    out.extend(changes.unchanged.iter().filter_map(fresh));
    out.extend(changes.retained.iter().filter_map(old));
    for path in &changes.new {
        if applied.ok.contains(path) {
            out.extend(fresh(path));
        }
    }
    for path in &changes.changed {
        if applied.ok.contains(path) {
            out.extend(fresh(path));
        } else {
            out.extend(old(path));
        }
    }
    for path in &changes.deleted {
        if !applied.ok.contains(path) {
            out.extend(old(path));
        }
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
