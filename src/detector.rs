//! Change detection: walk the repository, fingerprint every in-scope file
//! and classify it against the previous fingerprint set.
//!
//! Detection has no side effects. It fails only when the repository exceeds
//! one of the global caps.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use rayon::prelude::*;
use xxhash_rust::xxh3::xxh3_64;

use crate::config::EffectiveSettings;
use crate::db;
use crate::errors::{CapacityError, IndexError};
use crate::types::FileFingerprint;
use crate::walker::Walker;

/// Classification of a repository's files relative to the last run.
///
/// Every list is sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub new: Vec<String>,
    pub changed: Vec<String>,
    pub unchanged: Vec<String>,
    /// Previously fingerprinted paths that no longer exist on disk.
    pub deleted: Vec<String>,
    /// Previously fingerprinted paths that still exist but are now filtered
    /// out. Their nodes and fingerprints are left as they are.
    pub retained: Vec<String>,
    /// Fresh fingerprints for every new, changed and unchanged path.
    pub current: HashMap<String, FileFingerprint>,
}

impl ChangeSet {
    /// Number of work items a run has to reconcile.
    pub fn work_items(&self) -> usize {
        self.new.len() + self.changed.len() + self.deleted.len()
    }

    pub fn has_changes(&self) -> bool {
        self.work_items() > 0
    }
}

/// An in-scope file found by the walk, before hashing.
struct Candidate {
    rel: String,
    abs: PathBuf,
    size: u64,
    mtime: i64,
}

/// Walk `root`, fingerprint in-scope files and classify them against
/// `previous`.
pub fn detect(
    root: &Path,
    settings: &EffectiveSettings,
    previous: &HashMap<String, FileFingerprint>,
) -> Result<ChangeSet, IndexError> {
    let walker = Walker::new(root, settings)?;
    let max_size = settings.max_file_size_bytes();

    let mut candidates = Vec::new();
    let mut total_bytes: u64 = 0;
    for (rel, abs) in walker.collect_files() {
        let meta = match fs::metadata(&abs) {
            Ok(m) => m,
            Err(err) => {
                tracing::debug!(path = %rel, error = %err, "skipping file without metadata");
                continue;
            }
        };
        if meta.len() > max_size {
            tracing::debug!(path = %rel, size = meta.len(), "skipping oversized file");
            continue;
        }

        total_bytes += meta.len();
        if candidates.len() >= settings.max_files {
            return Err(CapacityError::TooManyFiles {
                limit: settings.max_files,
            }
            .into());
        }
        if total_bytes > settings.max_repo_size_bytes() {
            return Err(CapacityError::TooLarge {
                limit_mb: settings.max_repo_size_mb,
            }
            .into());
        }

        candidates.push(Candidate {
            rel,
            abs,
            size: meta.len(),
            mtime: mtime_secs(&meta),
        });
    }

    let seen_at = db::now_millis();
    let fingerprints: Vec<FileFingerprint> = candidates
        .par_iter()
        .map(|c| fingerprint(c, seen_at))
        .collect();

    Ok(classify(root, fingerprints, previous))
}

/// Compare freshly observed fingerprints with the previous set.
fn classify(
    root: &Path,
    fingerprints: Vec<FileFingerprint>,
    previous: &HashMap<String, FileFingerprint>,
) -> ChangeSet {
    let mut set = ChangeSet::default();

    for fp in fingerprints {
        match previous.get(&fp.path) {
            None => set.new.push(fp.path.clone()),
            Some(old) if old.hash != fp.hash => set.changed.push(fp.path.clone()),
            Some(_) => set.unchanged.push(fp.path.clone()),
        }
        set.current.insert(fp.path.clone(), fp);
    }

    let previous_sorted: BTreeMap<&String, &FileFingerprint> = previous.iter().collect();
    for path in previous_sorted.keys() {
        if set.current.contains_key(*path) {
            continue;
        }
        if root.join(path.as_str()).exists() {
            set.retained.push((*path).clone());
        } else {
            set.deleted.push((*path).clone());
        }
    }

    set.new.sort();
    set.changed.sort();
    set.unchanged.sort();
    set
}

/// Content fingerprint of one file. Falls back to `meta:<size>:<mtime>` when
/// the content cannot be read.
fn fingerprint(c: &Candidate, seen_at: i64) -> FileFingerprint {
    let hash = match fs::read(&c.abs) {
        Ok(bytes) => format!("{:016x}", xxh3_64(&bytes)),
        Err(err) => {
            tracing::debug!(path = %c.rel, error = %err, "hashing from metadata");
            format!("meta:{}:{}", c.size, c.mtime)
        }
    };
    FileFingerprint {
        path: c.rel.clone(),
        hash,
        size: c.size,
        mtime: c.mtime,
        last_seen: seen_at,
    }
}

fn mtime_secs(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RepositoryOverrides, resolve};

    fn write(root: &Path, rel: &str, content: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, content).unwrap();
    }

    fn first_pass(root: &Path) -> ChangeSet {
        detect(root, &EffectiveSettings::default(), &HashMap::new()).unwrap()
    }

    #[test]
    fn first_run_reports_everything_new() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", "def foo(): pass\n");
        write(dir.path(), "b.py", "import a\n");

        let set = first_pass(dir.path());
        assert_eq!(set.new, vec!["a.py", "b.py"]);
        assert!(set.changed.is_empty());
        assert!(set.deleted.is_empty());
        assert_eq!(set.work_items(), 2);
        assert_eq!(set.current["a.py"].hash.len(), 16);
    }

    #[test]
    fn classifies_against_previous() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", "def foo(): pass\n");
        write(dir.path(), "b.py", "import a\n");
        write(dir.path(), "c.py", "x = 1\n");
        let previous = first_pass(dir.path()).current;

        write(dir.path(), "b.py", "\n");
        fs::remove_file(dir.path().join("c.py")).unwrap();
        write(dir.path(), "d.py", "y = 2\n");

        let set = detect(dir.path(), &EffectiveSettings::default(), &previous).unwrap();
        assert_eq!(set.new, vec!["d.py"]);
        assert_eq!(set.changed, vec!["b.py"]);
        assert_eq!(set.unchanged, vec!["a.py"]);
        assert_eq!(set.deleted, vec!["c.py"]);
        assert!(set.retained.is_empty());
    }

    #[test]
    fn unchanged_repository_has_no_work() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", "def foo(): pass\n");
        let previous = first_pass(dir.path()).current;
        let set = detect(dir.path(), &EffectiveSettings::default(), &previous).unwrap();
        assert!(!set.has_changes());
        assert_eq!(set.unchanged, vec!["a.py"]);
    }

    #[test]
    fn newly_filtered_file_is_not_deleted() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "keep.py", "x = 1\n");
        write(dir.path(), "gen/out.py", "y = 1\n");
        let previous = first_pass(dir.path()).current;
        assert!(previous.contains_key("gen/out.py"));

        let settings = resolve(
            &Config::default(),
            Some(&RepositoryOverrides {
                exclude_dirs: Some(vec!["gen".into()]),
                ..Default::default()
            }),
        );
        let set = detect(dir.path(), &settings, &previous).unwrap();
        assert!(set.deleted.is_empty());
        assert_eq!(set.retained, vec!["gen/out.py"]);
        assert_eq!(set.unchanged, vec!["keep.py"]);
    }

    #[test]
    fn oversized_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "small.py", "x = 1\n");
        write(dir.path(), "big.py", &"#".repeat(4096));

        let settings = resolve(
            &Config::default(),
            Some(&RepositoryOverrides {
                max_file_size_kb: Some(1),
                ..Default::default()
            }),
        );
        let set = detect(dir.path(), &settings, &HashMap::new()).unwrap();
        assert_eq!(set.new, vec!["small.py"]);
    }

    #[test]
    fn too_many_files_is_a_capacity_error() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            write(dir.path(), &format!("m{i}.py"), "x = 1\n");
        }
        let mut config = Config::default();
        config.index.max_files = 3;
        let settings = resolve(&config, None);

        let err = detect(dir.path(), &settings, &HashMap::new()).unwrap_err();
        assert!(matches!(
            err,
            IndexError::Capacity(CapacityError::TooManyFiles { limit: 3 })
        ));
    }

    #[test]
    fn out_of_scope_files_do_not_count_toward_caps() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", "x = 1\n");
        for i in 0..5 {
            write(dir.path(), &format!("node_modules/m{i}.js"), "x\n");
            write(dir.path(), &format!("notes{i}.txt"), "x\n");
        }
        let mut config = Config::default();
        config.index.max_files = 1;
        let set = detect(dir.path(), &resolve(&config, None), &HashMap::new()).unwrap();
        assert_eq!(set.new, vec!["a.py"]);
    }

    #[test]
    fn too_large_is_a_capacity_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", &"#".repeat(2 * 1024 * 1024));
        let mut config = Config::default();
        config.index.max_repo_size_mb = 1;

        let err = detect(dir.path(), &resolve(&config, None), &HashMap::new()).unwrap_err();
        assert!(matches!(
            err,
            IndexError::Capacity(CapacityError::TooLarge { limit_mb: 1 })
        ));
    }
}
