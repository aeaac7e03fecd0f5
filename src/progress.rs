//! Run status tracking and progress indicators for indexing runs.
//!
//! [`Progress`] is the live, thread-safe status record of one run: counters,
//! the file being worked on, completion, cancellation and error. Callers
//! poll it through [`Progress::status`]. It can also render progress on
//! stderr in one of three modes:
//! - **Silent**: no output (library use, --json, --quiet)
//! - **InPlace**: overwrites a single line with `\r` (smart terminal)
//! - **LineBased**: periodic newline-terminated updates (screen-reader friendly)

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::db;
use crate::pipeline::RunSummary;

// ---------------------------------------------------------------------------
// ProgressMode
// ---------------------------------------------------------------------------

/// How progress should be displayed on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    /// No output at all.
    Silent,
    /// Overwrite a single line using `\r` (normal smart terminal).
    InPlace,
    /// Newline-terminated lines at intervals (TERM=dumb, screen readers).
    LineBased,
}

/// Detect the appropriate progress mode.
///
/// - Returns `Silent` if `suppress` is true (e.g. `--json` or `--quiet`).
/// - Returns `Silent` if stderr is not a TTY.
/// - Returns `LineBased` if `TERM=dumb` or TERM is unset.
/// - Returns `InPlace` otherwise.
pub fn detect_mode(suppress: bool) -> ProgressMode {
    if suppress {
        return ProgressMode::Silent;
    }

    use std::io::IsTerminal;
    if !std::io::stderr().is_terminal() {
        return ProgressMode::Silent;
    }

    match std::env::var("TERM").ok().as_deref() {
        None | Some("dumb") => ProgressMode::LineBased,
        _ => ProgressMode::InPlace,
    }
}

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Point-in-time copy of a run's status record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStatus {
    pub run_id: String,
    /// new + changed + deleted work items; 0 until detection finishes.
    pub total_files: usize,
    /// Work items reconciled so far.
    pub processed_files: usize,
    pub current_file: Option<String>,
    pub completed: bool,
    pub cancelled: bool,
    pub error: Option<String>,
    pub started_at: i64,
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Thread-safe status record for one indexing run.
///
/// Counters are atomics so extraction workers can update them without
/// external synchronization.
pub struct Progress {
    run_id: String,
    mode: ProgressMode,
    total: AtomicUsize,
    done: AtomicUsize,
    current: Mutex<Option<String>>,
    cancel: Arc<AtomicBool>,
    completed: AtomicBool,
    cancelled: AtomicBool,
    error: Mutex<Option<String>>,
    started_at: i64,
    /// Tracks the last rendered percentage (for LineBased 10% interval throttling).
    last_line_pct: AtomicUsize,
}

impl Progress {
    pub fn new(run_id: impl Into<String>, mode: ProgressMode) -> Self {
        Self {
            run_id: run_id.into(),
            mode,
            total: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
            current: Mutex::new(None),
            cancel: Arc::new(AtomicBool::new(false)),
            completed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            error: Mutex::new(None),
            started_at: db::now_millis(),
            last_line_pct: AtomicUsize::new(0),
        }
    }

    /// Convenience: a silent tracker with a fresh run id.
    pub fn silent() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), ProgressMode::Silent)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Set the total work-item count (called after change detection).
    pub fn set_total(&self, n: usize) {
        self.total.store(n, Ordering::Relaxed);
    }

    pub fn set_current(&self, path: Option<&str>) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = path.map(str::to_string);
    }

    /// Atomically count one reconciled work item.
    ///
    /// Rendering is throttled:
    /// - InPlace: every 50 files
    /// - LineBased: at ~10% intervals
    pub fn inc(&self) {
        let prev = self.done.fetch_add(1, Ordering::Relaxed);
        let current = prev + 1;
        let total = self.total.load(Ordering::Relaxed);

        match self.mode {
            ProgressMode::Silent => {}
            ProgressMode::InPlace => {
                if current == total || current % 50 == 0 {
                    eprint!("\rIndexing... [{current}/{total} files]");
                }
            }
            ProgressMode::LineBased => {
                if total == 0 {
                    return;
                }
                let bucket = (current * 100) / total / 10 * 10;
                let last = self.last_line_pct.load(Ordering::Relaxed);
                if (bucket > last
                    && self
                        .last_line_pct
                        .compare_exchange(last, bucket, Ordering::Relaxed, Ordering::Relaxed)
                        .is_ok())
                    || current == total
                {
                    eprintln!("Indexing... [{current}/{total} files]");
                }
            }
        }
    }

    // -- cancellation ---------------------------------------------------------

    /// Ask the run to stop at the next file boundary.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// The shared cancellation flag, e.g. for registering a signal handler.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    // -- completion -----------------------------------------------------------

    /// Mark the run finished. `cancelled` records whether it stopped early.
    pub fn complete(&self, cancelled: bool) {
        self.set_current(None);
        self.cancelled.store(cancelled, Ordering::SeqCst);
        self.completed.store(true, Ordering::SeqCst);
    }

    /// Mark the run failed with a human-readable summary.
    pub fn fail(&self, message: impl Into<String>) {
        {
            let mut error = self.error.lock().unwrap_or_else(|e| e.into_inner());
            *error = Some(message.into());
        }
        self.complete(self.cancel_requested());
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Copy the current state.
    pub fn status(&self) -> RunStatus {
        RunStatus {
            run_id: self.run_id.clone(),
            total_files: self.total.load(Ordering::Relaxed),
            processed_files: self.done.load(Ordering::Relaxed),
            current_file: self
                .current
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            completed: self.completed.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
            error: self
                .error
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            started_at: self.started_at,
        }
    }

    /// Print the final completion summary.
    pub fn finish(&self, summary: &RunSummary) {
        let verb = if summary.cancelled { "Cancelled after" } else { "Indexed" };
        let msg = format!(
            "{verb} {} files ({} new, {} changed, {} deleted, {} errors) in {:.1}s",
            summary.processed,
            summary.new,
            summary.changed,
            summary.deleted,
            summary.errors,
            summary.elapsed.as_secs_f64(),
        );
        match self.mode {
            ProgressMode::Silent => {}
            // Pad with spaces to clear any leftover characters from the progress line.
            ProgressMode::InPlace => eprint!("\r{msg:<80}\n"),
            ProgressMode::LineBased => eprintln!("{msg}"),
        }
    }

    #[cfg(test)]
    pub fn mode(&self) -> ProgressMode {
        self.mode
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_silent_starts_empty() {
        let p = Progress::silent();
        assert_eq!(p.mode(), ProgressMode::Silent);
        let status = p.status();
        assert_eq!(status.total_files, 0);
        assert_eq!(status.processed_files, 0);
        assert!(!status.completed);
        assert!(!status.cancelled);
        assert!(status.error.is_none());
        assert!(!status.run_id.is_empty());
    }

    #[test]
    fn test_counters_and_current_file() {
        let p = Progress::new("run-1", ProgressMode::Silent);
        p.set_total(3);
        p.set_current(Some("a.py"));
        p.inc();
        p.inc();
        let status = p.status();
        assert_eq!(status.run_id, "run-1");
        assert_eq!(status.total_files, 3);
        assert_eq!(status.processed_files, 2);
        assert_eq!(status.current_file.as_deref(), Some("a.py"));
    }

    #[test]
    fn test_inc_thread_safe() {
        let p = Arc::new(Progress::new("run", ProgressMode::Silent));
        p.set_total(1000);

        let mut handles = vec![];
        for _ in 0..10 {
            let p = Arc::clone(&p);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    p.inc();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(p.status().processed_files, 1000);
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let p = Progress::silent();
        let flag = p.cancel_flag();
        assert!(!p.cancel_requested());
        flag.store(true, Ordering::SeqCst);
        assert!(p.cancel_requested());
    }

    #[test]
    fn test_complete_clears_current_file() {
        let p = Progress::silent();
        p.set_current(Some("b.py"));
        p.complete(true);
        let status = p.status();
        assert!(status.completed);
        assert!(status.cancelled);
        assert!(status.current_file.is_none());
    }

    #[test]
    fn test_fail_records_error() {
        let p = Progress::silent();
        p.fail("graph store unavailable");
        let status = p.status();
        assert!(status.completed);
        assert!(!status.cancelled);
        assert_eq!(status.error.as_deref(), Some("graph store unavailable"));
    }

    #[test]
    fn test_detect_mode_suppress_returns_silent() {
        assert_eq!(detect_mode(true), ProgressMode::Silent);
    }

    #[test]
    fn test_finish_silent_does_not_panic() {
        let p = Progress::silent();
        let summary = RunSummary {
            snapshot_id: Some("s".into()),
            new: 2,
            changed: 1,
            deleted: 0,
            processed: 3,
            errors: 0,
            cancelled: false,
            elapsed: Duration::from_secs_f64(1.5),
        };
        p.finish(&summary);
    }
}
