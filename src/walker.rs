//! File walker with gitignore support and settings-driven scoping.
//!
//! Wraps the `ignore` crate's `WalkBuilder` to provide a file walker that:
//! - Respects `.gitignore` rules
//! - Skips hidden files and directories
//! - Prunes excluded directories (single names or `a/b` segment runs)
//! - Restricts top-level directories to `include_dirs` when set
//! - Keeps only files with an indexed extension that match no ignore glob
//!
//! The size limit is not applied here; the change detector checks it when it
//! reads file metadata.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;

use crate::config::{EffectiveSettings, normalize_extension};

// ---------------------------------------------------------------------------
// ScopeFilter
// ---------------------------------------------------------------------------

/// Path-based filters derived from [`EffectiveSettings`].
#[derive(Debug)]
pub struct ScopeFilter {
    exclude_dirs: Vec<Vec<String>>,
    include_dirs: Vec<String>,
    extensions: Vec<String>,
    ignore: GlobSet,
}

impl ScopeFilter {
    pub fn from_settings(settings: &EffectiveSettings) -> Result<Self> {
        let exclude_dirs = settings
            .exclude_dirs
            .iter()
            .map(|d| {
                d.split('/')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|segments| !segments.is_empty())
            .collect();

        let include_dirs = settings
            .include_dirs
            .iter()
            .map(|d| d.trim_matches('/').to_string())
            .filter(|d| !d.is_empty())
            .collect();

        let mut builder = GlobSetBuilder::new();
        for pattern in &settings.ignore_patterns {
            let glob = Glob::new(pattern)
                .with_context(|| format!("invalid ignore pattern {pattern:?}"))?;
            builder.add(glob);
        }
        let ignore = builder.build().context("building ignore pattern set")?;

        Ok(Self {
            exclude_dirs,
            include_dirs,
            extensions: settings
                .extensions
                .iter()
                .map(|e| normalize_extension(e))
                .collect(),
            ignore,
        })
    }

    /// Whether the walk should descend into the directory at `rel`.
    ///
    /// Parent directories are assumed to have passed already, so only
    /// exclude entries ending at the last segment are checked.
    pub fn dir_allowed(&self, rel: &[String]) -> bool {
        if rel.is_empty() {
            return true;
        }
        for entry in &self.exclude_dirs {
            if entry.len() <= rel.len() && rel[rel.len() - entry.len()..] == entry[..] {
                return false;
            }
        }
        if rel.len() == 1 && !self.include_dirs.is_empty() {
            return self.include_dirs.iter().any(|d| d == &rel[0]);
        }
        true
    }

    /// Whether a file at the `/`-separated relative path is in scope,
    /// ignoring its size.
    pub fn file_allowed(&self, rel: &str) -> bool {
        let name = rel.rsplit('/').next().unwrap_or(rel);

        if !self.extensions.is_empty() {
            let ext = match name.rsplit_once('.') {
                Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
                _ => return false,
            };
            if !self.extensions.contains(&ext) {
                return false;
            }
        }

        !(self.ignore.is_match(rel) || self.ignore.is_match(name))
    }
}

/// Split a relative path into its normal components.
pub fn segments(rel: &Path) -> Vec<String> {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

/// `/`-separated form of a relative path.
pub fn to_rel_string(rel: &Path) -> String {
    segments(rel).join("/")
}

// ---------------------------------------------------------------------------
// Walker
// ---------------------------------------------------------------------------

/// A file-system walker that respects `.gitignore` and the repository's
/// scope filters.
pub struct Walker {
    root: PathBuf,
    filter: Arc<ScopeFilter>,
}

impl Walker {
    pub fn new<P: AsRef<Path>>(root: P, settings: &EffectiveSettings) -> Result<Self> {
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            filter: Arc::new(ScopeFilter::from_settings(settings)?),
        })
    }

    fn make_builder(&self) -> WalkBuilder {
        let mut builder = WalkBuilder::new(&self.root);

        builder.standard_filters(true);
        // Hidden entries are handled by the entry filter below so the root
        // itself is never dropped.
        builder.hidden(false);
        builder.follow_links(false);

        let root = self.root.clone();
        let filter = Arc::clone(&self.filter);
        builder.filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            if entry.file_name().to_string_lossy().starts_with('.') {
                return false;
            }
            if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                let rel = entry.path().strip_prefix(&root).unwrap_or(entry.path());
                return filter.dir_allowed(&segments(rel));
            }
            true
        });

        builder
    }

    /// Walk the tree and collect `(relative path, absolute path)` for every
    /// in-scope file, sorted by relative path.
    pub fn collect_files(&self) -> Vec<(String, PathBuf)> {
        let mut files = Vec::new();
        for result in self.make_builder().build() {
            let entry = match result {
                Ok(e) => e,
                Err(err) => {
                    tracing::debug!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let rel = to_rel_string(rel);
            if self.filter.file_allowed(&rel) {
                files.push((rel, entry.into_path()));
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        files
    }
}
