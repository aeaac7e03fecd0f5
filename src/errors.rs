//! Error types and user-facing error formatting.
//!
//! - [`StoreError`] for graph-store failures (drives retry and abort decisions)
//! - [`CapacityError`] for repositories over the configured caps
//! - [`FileError`] for per-file failures that are recorded, not raised
//! - [`IndexError`] as the unified top-level error type
//!
//! [`IndexError`] carries hints and exit codes so that `main()` can present
//! readable diagnostics on stderr.

use std::fmt;
use std::path::PathBuf;

use rusqlite::ErrorCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Exit codes
// ---------------------------------------------------------------------------

/// Process exit codes.
///
/// * `0` - success
/// * `1` - general runtime error
/// * `2` - usage / argument error (bad CLI invocation)
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

// ---------------------------------------------------------------------------
// Layer-specific error types
// ---------------------------------------------------------------------------

/// Errors arising from the graph store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The database is locked by another writer. Retried with backoff.
    #[error("graph store busy: {0}")]
    Busy(#[source] rusqlite::Error),

    /// The database cannot be opened, read or written at all.
    #[error("graph store unavailable: {0}")]
    Unavailable(String),

    /// A single statement failed.
    #[error("graph store query failed: {0}")]
    Query(#[source] rusqlite::Error),

    /// Graph data could not be (de)serialized for a snapshot.
    #[error("graph data encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => StoreError::Busy(err),
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::DiskFull
                | ErrorCode::SystemIoFailure
                | ErrorCode::ReadOnly
                | ErrorCode::PermissionDenied,
            ) => StoreError::Unavailable(err.to_string()),
            _ => StoreError::Query(err),
        }
    }
}

impl StoreError {
    /// Transient errors are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }

    /// Fatal errors abort the whole run; the rest are scoped to one file.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StoreError::Query(_))
    }
}

/// A repository exceeded one of the global caps.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapacityError {
    #[error("repository has more than {limit} indexable files")]
    TooManyFiles { limit: usize },

    #[error("repository exceeds the {limit_mb} MiB size limit")]
    TooLarge { limit_mb: u64 },
}

/// Pipeline stage in which a per-file failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStage {
    Extract,
    Reconcile,
}

impl fmt::Display for FileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStage::Extract => f.write_str("extract"),
            FileStage::Reconcile => f.write_str("reconcile"),
        }
    }
}

/// A non-fatal failure for one file, aggregated into the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub path: String,
    pub stage: FileStage,
    pub message: String,
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.path, self.stage, self.message)
    }
}

// ---------------------------------------------------------------------------
// Unified application error
// ---------------------------------------------------------------------------

/// Unified error type for the indexing service.
#[derive(Error, Debug)]
pub enum IndexError {
    /// The repository path is missing or not a directory. The run never starts.
    #[error("invalid repository path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    /// A run for this repository is already in progress.
    #[error("indexing already in progress for {}", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("{0} not found")]
    NotFound(String),

    #[error("repository already registered: {}", .0.display())]
    AlreadyRegistered(PathBuf),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A usage / argument error (exit code 2).
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for IndexError {
    fn from(err: rusqlite::Error) -> Self {
        IndexError::Store(err.into())
    }
}

impl IndexError {
    /// Return the appropriate process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            IndexError::Usage(_) => EXIT_USAGE,
            _ => EXIT_ERROR,
        }
    }

    /// Return an optional human-readable hint that may help the user fix
    /// the problem.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            IndexError::InvalidPath { .. } => Some("pass an existing directory"),
            IndexError::Capacity(_) => {
                Some("raise the limits in config.toml or exclude large directories")
            }
            IndexError::AlreadyRunning(_) => Some("wait for the current run to finish"),
            IndexError::AlreadyRegistered(_) => Some("use `repograph repo list` to see it"),
            IndexError::NotFound(_) => Some("use `repograph repo list` or `repograph history`"),
            IndexError::Store(StoreError::Busy(_)) => {
                Some("another process holds the database lock; try again shortly")
            }
            IndexError::Store(StoreError::Unavailable(_)) => {
                Some("check that the data directory exists and is writable")
            }
            IndexError::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Some("check file permissions")
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), Some("test".into()))
    }

    #[test]
    fn busy_is_transient_and_fatal() {
        let err = StoreError::from(sqlite_failure(rusqlite::ffi::SQLITE_BUSY));
        assert!(matches!(err, StoreError::Busy(_)));
        assert!(err.is_transient());
        assert!(err.is_fatal());
    }

    #[test]
    fn locked_is_transient() {
        let err = StoreError::from(sqlite_failure(rusqlite::ffi::SQLITE_LOCKED));
        assert!(err.is_transient());
    }

    #[test]
    fn cannot_open_is_unavailable() {
        let err = StoreError::from(sqlite_failure(rusqlite::ffi::SQLITE_CANTOPEN));
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(!err.is_transient());
        assert!(err.is_fatal());
    }

    #[test]
    fn constraint_failure_is_scoped_to_file() {
        let err = StoreError::from(sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT));
        assert!(matches!(err, StoreError::Query(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn exit_code_usage() {
        let err = IndexError::Usage("bad flag".into());
        assert_eq!(err.exit_code(), EXIT_USAGE);
    }

    #[test]
    fn exit_code_general() {
        let err = IndexError::AlreadyRunning(PathBuf::from("/repo"));
        assert_eq!(err.exit_code(), EXIT_ERROR);
    }

    #[test]
    fn already_running_display() {
        let err = IndexError::AlreadyRunning(PathBuf::from("/repo"));
        assert_eq!(format!("{err}"), "indexing already in progress for /repo");
        assert!(err.hint().is_some());
    }

    #[test]
    fn capacity_display_is_transparent() {
        let err: IndexError = CapacityError::TooManyFiles { limit: 3 }.into();
        assert_eq!(format!("{err}"), "repository has more than 3 indexable files");
        assert!(err.hint().unwrap().contains("limits"));
    }

    #[test]
    fn invalid_path_display() {
        let err = IndexError::InvalidPath {
            path: PathBuf::from("/nope"),
            reason: "not a directory".into(),
        };
        assert_eq!(format!("{err}"), "invalid repository path /nope: not a directory");
    }

    #[test]
    fn file_error_display() {
        let err = FileError {
            path: "a.py".into(),
            stage: FileStage::Extract,
            message: "syntax error".into(),
        };
        assert_eq!(err.to_string(), "a.py (extract): syntax error");
    }

    #[test]
    fn hint_none_for_other() {
        let err = IndexError::Other(anyhow::anyhow!("something went wrong"));
        assert!(err.hint().is_none());
    }
}
