//! The indexing service: the API front ends talk to.
//!
//! [`IndexService`] owns the data directory, the global configuration, the
//! parser registry and the per-repository run table. At most one run per
//! repository is active at a time; runs for different repositories proceed
//! concurrently, each on its own thread with its own database connection.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::Context;

use crate::config::{self, Config, EffectiveSettings, RepositoryOverrides};
use crate::db;
use crate::errors::{IndexError, StoreError};
use crate::extractor::ParserRegistry;
use crate::pipeline::{self, RunSummary};
use crate::progress::{Progress, ProgressMode, RunStatus};
use crate::registry::{self, Repository, RepositorySummary};
use crate::snapshot::{self, FileHistory, Snapshot, SnapshotDiff};
use crate::store::{GraphStore, RetryPolicy, SqliteGraphStore};
use crate::types::{GraphFilter, Subgraph};

/// Live state of one run.
struct RunHandle {
    progress: Arc<Progress>,
    thread: Mutex<Option<JoinHandle<Result<RunSummary, IndexError>>>>,
}

impl RunHandle {
    /// A run is active until it reports completion or its thread is gone.
    fn is_active(&self) -> bool {
        !self.progress.is_completed()
            && self
                .thread
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .as_ref()
                .is_some_and(|t| !t.is_finished())
    }
}

/// How a run ended, as returned by [`IndexService::wait`].
#[derive(Debug)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub result: Result<RunSummary, IndexError>,
}

pub struct IndexService {
    data_dir: PathBuf,
    config: Config,
    parsers: Arc<ParserRegistry>,
    runs: Mutex<HashMap<PathBuf, Arc<RunHandle>>>,
    /// Serializes run transactions across repositories. Held from
    /// `begin_run` until commit or rollback.
    write_gate: Arc<Mutex<()>>,
}

impl IndexService {
    /// Open the service over `data_dir`, loading `config.toml` from it and
    /// creating the database if needed.
    pub fn open(data_dir: &Path) -> Result<Self, IndexError> {
        let config = Config::load(data_dir)?;
        Self::with_config(data_dir, config, ParserRegistry::with_defaults())
    }

    pub fn with_config(
        data_dir: &Path,
        config: Config,
        parsers: ParserRegistry,
    ) -> Result<Self, IndexError> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("cannot create data directory {}", data_dir.display()))?;
        let service = Self {
            data_dir: data_dir.to_path_buf(),
            config,
            parsers: Arc::new(parsers),
            runs: Mutex::new(HashMap::new()),
            write_gate: Arc::new(Mutex::new(())),
        };
        // Creates the schema up front.
        service.store()?;
        Ok(service)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn store(&self) -> Result<SqliteGraphStore, StoreError> {
        SqliteGraphStore::open(
            &db::db_path(&self.data_dir),
            RetryPolicy::from_config(&self.config.pipeline),
        )
    }

    fn lock_runs(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Arc<RunHandle>>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -- runs -----------------------------------------------------------------

    /// Start indexing `path` in the background and return the run id.
    ///
    /// Unregistered repositories are registered first. Fails with
    /// [`IndexError::AlreadyRunning`] while a run for the same repository is
    /// still active.
    pub fn start_indexing(
        &self,
        path: &Path,
        settings: Option<EffectiveSettings>,
        mode: ProgressMode,
    ) -> Result<String, IndexError> {
        let root = registry::canonical_repo_path(path)?;
        let settings = match settings {
            Some(s) => s,
            None => self.resolve_settings(&root)?,
        };

        let mut runs = self.lock_runs();
        if let Some(handle) = runs.get(&root)
            && handle.is_active()
        {
            return Err(IndexError::AlreadyRunning(root));
        }

        let store = self.store()?.with_write_gate(Arc::clone(&self.write_gate));
        store.read(|conn| registry::ensure(conn, &root).map_err(into_store_error))?;

        let progress = Arc::new(Progress::new(uuid::Uuid::new_v4().to_string(), mode));
        let run_id = progress.run_id().to_string();
        let thread = {
            let progress = Arc::clone(&progress);
            let parsers = Arc::clone(&self.parsers);
            let root = root.clone();
            std::thread::Builder::new()
                .name(format!("index-{}", &run_id[..8]))
                .spawn(move || {
                    guarded(&progress, || {
                        pipeline::run(&store, &parsers, &root, &settings, &progress)
                    })
                })
                .context("failed to spawn indexing thread")?
        };
        tracing::info!(repo = %root.display(), run_id = %run_id, "indexing started");

        runs.insert(
            root,
            Arc::new(RunHandle {
                progress,
                thread: Mutex::new(Some(thread)),
            }),
        );
        Ok(run_id)
    }

    fn handle(&self, path: &Path) -> Result<Arc<RunHandle>, IndexError> {
        let root = registry::canonical_repo_path(path)?;
        self.lock_runs()
            .get(&root)
            .cloned()
            .ok_or_else(|| IndexError::NotFound(format!("indexing run for {}", root.display())))
    }

    /// Status of the current (or most recent) run for `path`.
    pub fn get_status(&self, path: &Path) -> Result<RunStatus, IndexError> {
        Ok(self.handle(path)?.progress.status())
    }

    /// Ask the active run for `path` to stop at the next file boundary.
    pub fn cancel(&self, path: &Path) -> Result<(), IndexError> {
        let handle = self.handle(path)?;
        handle.progress.request_cancel();
        tracing::info!(run_id = %handle.progress.run_id(), "cancellation requested");
        Ok(())
    }

    /// Block until the run for `path` finishes and return its outcome.
    /// The outcome can be taken once; later calls report `NotFound`.
    pub fn wait(&self, path: &Path) -> Result<RunOutcome, IndexError> {
        let handle = self.handle(path)?;
        let thread = handle
            .thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| IndexError::NotFound(format!("outcome of run {}", handle.progress.run_id())))?;
        let result = match thread.join() {
            Ok(result) => result,
            Err(_) => {
                let err = anyhow::anyhow!("indexing thread panicked");
                handle.progress.fail(err.to_string());
                Err(err.into())
            }
        };
        Ok(RunOutcome {
            status: handle.progress.status(),
            result,
        })
    }

    /// Shared cancellation flag of the run for `path`.
    pub fn cancel_flag(
        &self,
        path: &Path,
    ) -> Result<Arc<std::sync::atomic::AtomicBool>, IndexError> {
        Ok(self.handle(path)?.progress.cancel_flag())
    }

    // -- snapshots ------------------------------------------------------------

    pub fn get_latest_snapshot(&self, path: &Path) -> Result<Snapshot, IndexError> {
        let key = repo_key_of(path)?;
        self.store()?
            .read(|conn| snapshot::latest(conn, &key, true))?
            .ok_or_else(|| IndexError::NotFound(format!("snapshot for {key}")))
    }

    /// Snapshots of `path`, newest first, without graph data.
    pub fn list_snapshots(&self, path: &Path) -> Result<Vec<Snapshot>, IndexError> {
        let key = repo_key_of(path)?;
        Ok(self.store()?.read(|conn| snapshot::list(conn, &key))?)
    }

    pub fn get_snapshot_detail(&self, id: &str) -> Result<Snapshot, IndexError> {
        self.store()?
            .read(|conn| snapshot::get(conn, id))?
            .ok_or_else(|| IndexError::NotFound(format!("snapshot {id}")))
    }

    pub fn compare_snapshots(&self, from: &str, to: &str) -> Result<SnapshotDiff, IndexError> {
        let store = self.store()?;
        let load = |id: &str| -> Result<Snapshot, IndexError> {
            store
                .read(|conn| snapshot::get(conn, id))?
                .ok_or_else(|| IndexError::NotFound(format!("snapshot {id}")))
        };
        Ok(snapshot::compare(&load(from)?, &load(to)?))
    }

    pub fn file_history(&self, path: &Path) -> Result<FileHistory, IndexError> {
        let key = repo_key_of(path)?;
        Ok(self.store()?.read(|conn| snapshot::file_history(conn, &key))?)
    }

    /// The current graph of `path`, optionally filtered.
    pub fn query_graph(&self, path: &Path, filter: &GraphFilter) -> Result<Subgraph, IndexError> {
        let key = repo_key_of(path)?;
        let store = self.store()?;
        Ok(store.retry().run(|| store.query_subgraph(&key, filter))?)
    }

    // -- repositories ---------------------------------------------------------

    pub fn add_repository(
        &self,
        path: &Path,
        display_name: Option<&str>,
    ) -> Result<Repository, IndexError> {
        let root = registry::canonical_repo_path(path)?;
        registry::add(self.store()?.conn(), &root, display_name)
    }

    /// Unregister `path` and drop everything stored for it. Refused while a
    /// run is active.
    pub fn remove_repository(&self, path: &Path) -> Result<(), IndexError> {
        let key = repo_key_of(path)?;
        let mut runs = self.lock_runs();
        if let Some(handle) = runs.get(Path::new(&key))
            && handle.is_active()
        {
            return Err(IndexError::AlreadyRunning(PathBuf::from(&key)));
        }
        registry::remove(self.store()?.conn(), &key)?;
        runs.remove(Path::new(&key));
        Ok(())
    }

    pub fn list_repositories(&self) -> Result<Vec<RepositorySummary>, IndexError> {
        Ok(self.store()?.read(registry::list)?)
    }

    // -- settings -------------------------------------------------------------

    /// Global configuration merged with the repository's stored overrides.
    pub fn resolve_settings(&self, path: &Path) -> Result<EffectiveSettings, IndexError> {
        let key = repo_key_of(path)?;
        let overrides = self
            .store()?
            .read(|conn| registry::load_overrides(conn, &key))?;
        Ok(config::resolve(&self.config, overrides.as_ref()))
    }

    /// Update only the override fields set in `update`.
    pub fn set_overrides(
        &self,
        path: &Path,
        update: RepositoryOverrides,
    ) -> Result<EffectiveSettings, IndexError> {
        let key = repo_key_of(path)?;
        let overrides = registry::update_overrides(self.store()?.conn(), &key, update)?;
        Ok(config::resolve(&self.config, Some(&overrides)))
    }

    pub fn reset_overrides(&self, path: &Path) -> Result<EffectiveSettings, IndexError> {
        let key = repo_key_of(path)?;
        registry::clear_overrides(self.store()?.conn(), &key)?;
        Ok(config::resolve(&self.config, None))
    }
}

/// Key of a repository path. Paths that no longer exist fall back to their
/// literal form so removed checkouts can still be looked up.
fn repo_key_of(path: &Path) -> Result<String, IndexError> {
    match registry::canonical_repo_path(path) {
        Ok(root) => Ok(db::repo_key(&root)),
        Err(_) if path.is_absolute() => Ok(db::repo_key(path)),
        Err(err) => Err(err),
    }
}

/// Run `f` on the indexing thread. A panic fails the run instead of
/// leaving the repository looking busy.
fn guarded(
    progress: &Progress,
    f: impl FnOnce() -> Result<RunSummary, IndexError>,
) -> Result<RunSummary, IndexError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(run_id = %progress.run_id(), "indexing thread panicked");
            progress.fail("indexing thread panicked");
            Err(anyhow::anyhow!("indexing thread panicked").into())
        }
    }
}

fn into_store_error(err: IndexError) -> StoreError {
    match err {
        IndexError::Store(e) => e,
        other => StoreError::Unavailable(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn service() -> (TempDir, IndexService) {
        let data = TempDir::new().unwrap();
        let service = IndexService::open(data.path()).unwrap();
        (data, service)
    }

    fn repo_with(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (rel, content) in files {
            fs::write(dir.path().join(rel), content).unwrap();
        }
        dir
    }

    #[test]
    fn run_completes_and_records_snapshot() {
        let (_data, svc) = service();
        let repo = repo_with(&[("a.py", "def f():\n    pass\n")]);

        let run_id = svc.start_indexing(repo.path(), None, ProgressMode::Silent).unwrap();
        let outcome = svc.wait(repo.path()).unwrap();
        let summary = outcome.result.unwrap();
        assert_eq!(outcome.status.run_id, run_id);
        assert!(outcome.status.completed);
        assert_eq!(outcome.status.total_files, 1);
        assert_eq!(outcome.status.processed_files, 1);

        let latest = svc.get_latest_snapshot(repo.path()).unwrap();
        assert_eq!(Some(latest.id.clone()), summary.snapshot_id);
        assert!(latest.graph_data.is_some());
        assert_eq!(svc.list_snapshots(repo.path()).unwrap().len(), 1);
    }

    #[test]
    fn indexing_registers_repository() {
        let (_data, svc) = service();
        let repo = repo_with(&[]);
        svc.start_indexing(repo.path(), None, ProgressMode::Silent).unwrap();
        svc.wait(repo.path()).unwrap().result.unwrap();
        let repos = svc.list_repositories().unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].snapshot_count, 1);
    }

    #[test]
    fn invalid_path_never_starts() {
        let (data, svc) = service();
        let err = svc
            .start_indexing(&data.path().join("missing"), None, ProgressMode::Silent)
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidPath { .. }));
    }

    #[test]
    fn status_of_unknown_repository_is_not_found() {
        let (_data, svc) = service();
        let repo = repo_with(&[]);
        assert!(matches!(
            svc.get_status(repo.path()).unwrap_err(),
            IndexError::NotFound(_)
        ));
        assert!(matches!(
            svc.get_latest_snapshot(repo.path()).unwrap_err(),
            IndexError::NotFound(_)
        ));
    }

    #[test]
    fn overrides_apply_to_next_run() {
        let (_data, svc) = service();
        let repo = repo_with(&[("a.py", "x = 1\n"), ("b.js", "let y = 2;\n")]);
        let settings = svc
            .set_overrides(
                repo.path(),
                RepositoryOverrides {
                    extensions: Some(vec!["py".into()]),
                    replace: vec![config::ListField::Extensions],
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!settings.using_defaults);
        assert_eq!(settings.extensions, vec!["py"]);

        svc.start_indexing(repo.path(), None, ProgressMode::Silent).unwrap();
        let summary = svc.wait(repo.path()).unwrap().result.unwrap();
        assert_eq!(summary.new, 1);

        let reset = svc.reset_overrides(repo.path()).unwrap();
        assert!(reset.using_defaults);
        assert!(svc.resolve_settings(repo.path()).unwrap().using_defaults);
    }

    #[test]
    fn remove_repository_drops_history() {
        let (_data, svc) = service();
        let repo = repo_with(&[("a.py", "x = 1\n")]);
        svc.start_indexing(repo.path(), None, ProgressMode::Silent).unwrap();
        svc.wait(repo.path()).unwrap().result.unwrap();

        svc.remove_repository(repo.path()).unwrap();
        assert!(svc.list_repositories().unwrap().is_empty());
        assert!(svc.list_snapshots(repo.path()).unwrap().is_empty());
        assert!(svc.query_graph(repo.path(), &GraphFilter::default()).unwrap().nodes.is_empty());
    }

    #[test]
    fn panicking_run_is_reported_failed() {
        let progress = Progress::silent();
        let result = guarded(&progress, || panic!("extractor bug"));
        assert!(result.is_err());

        let status = progress.status();
        assert!(status.completed);
        assert_eq!(status.error.as_deref(), Some("indexing thread panicked"));
    }

    #[test]
    fn finished_thread_does_not_block_new_run() {
        let (_data, svc) = service();
        let repo = repo_with(&[("a.py", "x = 1\n")]);
        let root = registry::canonical_repo_path(repo.path()).unwrap();

        // A run whose thread died without ever marking completion.
        let thread = std::thread::spawn(|| -> Result<RunSummary, IndexError> {
            Err(anyhow::anyhow!("gone").into())
        });
        while !thread.is_finished() {
            std::thread::yield_now();
        }
        svc.lock_runs().insert(
            root,
            Arc::new(RunHandle {
                progress: Arc::new(Progress::silent()),
                thread: Mutex::new(Some(thread)),
            }),
        );

        svc.start_indexing(repo.path(), None, ProgressMode::Silent).unwrap();
        let outcome = svc.wait(repo.path()).unwrap();
        assert_eq!(outcome.result.unwrap().new, 1);
    }

    #[test]
    fn compare_unknown_snapshot_is_not_found() {
        let (_data, svc) = service();
        assert!(matches!(
            svc.compare_snapshots("x", "y").unwrap_err(),
            IndexError::NotFound(_)
        ));
    }
}
