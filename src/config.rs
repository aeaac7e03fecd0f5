//! Configuration: global defaults, per-repository overrides, and merging.
//!
//! Global defaults are loaded in layers (last wins):
//! 1. Built-in defaults
//! 2. `<data_dir>/config.toml`
//!
//! The TOML layer only overrides fields it explicitly sets. Per-repository
//! [`RepositoryOverrides`] are then applied by [`resolve`]: scalar fields
//! replace the default, list fields are unioned with it unless the field is
//! named in `replace`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Public config types (fully resolved, no Options)
// ---------------------------------------------------------------------------

/// Top-level configuration, fully resolved with defaults applied.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    pub index: IndexConfig,
    pub pipeline: PipelineConfig,
}

/// Global indexing defaults shared by every repository.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexConfig {
    /// Files larger than this (in KiB) are skipped.
    pub max_file_size_kb: u64,
    /// Repositories whose in-scope files exceed this many MiB are rejected.
    pub max_repo_size_mb: u64,
    /// Repositories with more in-scope files than this are rejected.
    pub max_files: usize,
    /// When non-empty, only these top-level directories are indexed.
    pub include_dirs: Vec<String>,
    /// Directory names (or `a/b` segment runs) that are never descended into.
    pub exclude_dirs: Vec<String>,
    /// Glob patterns matched against the relative path and the file name.
    pub ignore_patterns: Vec<String>,
    /// File extensions to index, without the leading dot.
    pub extensions: Vec<String>,
}

/// Run-level tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Worker threads for structural extraction. `0` lets rayon decide.
    pub concurrency: usize,
    /// Attempts after the first for transient store errors.
    pub store_retries: u32,
    /// Initial backoff between store retries; doubles on each attempt.
    pub retry_backoff_ms: u64,
    /// How long a single store attempt waits on a locked database.
    pub busy_timeout_ms: u64,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    "node_modules",
    "venv",
    "env",
    "__pycache__",
    "dist",
    "build",
    "target",
    "out",
    "output",
    "vendor",
    "bower_components",
    "jspm_packages",
    "packages",
    "tmp",
    "temp",
    "coverage",
    "htmlcov",
    "migrations",
    "static",
    "assets",
    "public/assets",
    "public/img",
    "public/images",
    "public/static",
];

const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    "*.so", "*.dylib", "*.dll", "*.exe", "*.bin", "*.dat",
    "*.pyc", "*.pyo", "*.pyd",
    "*.jpg", "*.jpeg", "*.png", "*.gif", "*.bmp", "*.svg",
    "*.mp3", "*.mp4", "*.wav", "*.avi", "*.mov", "*.webm",
    "*.zip", "*.tar", "*.gz", "*.bz2", "*.rar", "*.7z",
    "*.whl", "*.egg", "*.jar",
    "*.db", "*.sqlite", "*.sqlite3",
    "*.pdf", "*.doc", "*.docx", "*.ppt", "*.pptx", "*.xls", "*.xlsx",
    "*.log", "*.log.*",
    "package-lock.json", "yarn.lock", "poetry.lock", "Pipfile.lock",
    "*.min.js", "*.map", "*.chunk.js", "*.bundle.js",
];

const DEFAULT_EXTENSIONS: &[&str] = &["py", "js", "jsx", "ts", "tsx"];

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_file_size_kb: 10 * 1024,
            max_repo_size_mb: 2 * 1024,
            max_files: 10_000,
            include_dirs: Vec::new(),
            exclude_dirs: owned(DEFAULT_EXCLUDE_DIRS),
            ignore_patterns: owned(DEFAULT_IGNORE_PATTERNS),
            extensions: owned(DEFAULT_EXTENSIONS),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            store_retries: 3,
            retry_backoff_ms: 50,
            busy_timeout_ms: 5000,
        }
    }
}

// ---------------------------------------------------------------------------
// Option-based overlay types (for partial deserialization)
// ---------------------------------------------------------------------------

/// Mirror of [`Config`] where every field is `Option`, so we can
/// deserialize a partial TOML file and overlay only the keys that are
/// present.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigOverlay {
    index: Option<IndexOverlay>,
    pipeline: Option<PipelineOverlay>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct IndexOverlay {
    max_file_size_kb: Option<u64>,
    max_repo_size_mb: Option<u64>,
    max_files: Option<usize>,
    include_dirs: Option<Vec<String>>,
    exclude_dirs: Option<Vec<String>>,
    ignore_patterns: Option<Vec<String>>,
    extensions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct PipelineOverlay {
    concurrency: Option<usize>,
    store_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
    busy_timeout_ms: Option<u64>,
}

impl Config {
    /// Apply an overlay on top of this config, replacing only the fields
    /// that are `Some` in the overlay.
    fn apply_overlay(&mut self, overlay: ConfigOverlay) {
        if let Some(idx) = overlay.index {
            if let Some(v) = idx.max_file_size_kb {
                self.index.max_file_size_kb = v;
            }
            if let Some(v) = idx.max_repo_size_mb {
                self.index.max_repo_size_mb = v;
            }
            if let Some(v) = idx.max_files {
                self.index.max_files = v;
            }
            if let Some(v) = idx.include_dirs {
                self.index.include_dirs = v;
            }
            if let Some(v) = idx.exclude_dirs {
                self.index.exclude_dirs = v;
            }
            if let Some(v) = idx.ignore_patterns {
                self.index.ignore_patterns = v;
            }
            if let Some(v) = idx.extensions {
                self.index.extensions = v;
            }
        }
        if let Some(p) = overlay.pipeline {
            if let Some(v) = p.concurrency {
                self.pipeline.concurrency = v;
            }
            if let Some(v) = p.store_retries {
                self.pipeline.store_retries = v;
            }
            if let Some(v) = p.retry_backoff_ms {
                self.pipeline.retry_backoff_ms = v;
            }
            if let Some(v) = p.busy_timeout_ms {
                self.pipeline.busy_timeout_ms = v;
            }
        }
    }

    /// Load configuration: built-in defaults overlaid by
    /// `<data_dir>/config.toml` when it exists.
    pub fn load(data_dir: &Path) -> Result<Config> {
        let mut config = Config::default();
        let path = data_dir.join("config.toml");
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let overlay: ConfigOverlay = toml::from_str(&contents)
                    .with_context(|| format!("failed to parse config file: {}", path.display()))?;
                config.apply_overlay(overlay);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read config file {}", path.display()));
            }
        }
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Per-repository overrides
// ---------------------------------------------------------------------------

/// List-valued settings that may be marked as replacing the global default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListField {
    IncludeDirs,
    ExcludeDirs,
    IgnorePatterns,
    Extensions,
}

impl std::str::FromStr for ListField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "include_dirs" => Ok(ListField::IncludeDirs),
            "exclude_dirs" => Ok(ListField::ExcludeDirs),
            "ignore_patterns" => Ok(ListField::IgnorePatterns),
            "extensions" => Ok(ListField::Extensions),
            other => Err(format!("unknown list setting: {other}")),
        }
    }
}

/// Settings a single repository overrides. Absent fields fall back to the
/// global defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_file_size_kb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_dirs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_dirs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_patterns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<String>>,
    /// List fields that replace the global default instead of extending it.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub replace: Vec<ListField>,
}

impl RepositoryOverrides {
    /// True when no field is overridden.
    pub fn is_empty(&self) -> bool {
        self.max_file_size_kb.is_none()
            && self.include_dirs.is_none()
            && self.exclude_dirs.is_none()
            && self.ignore_patterns.is_none()
            && self.extensions.is_none()
    }

    /// Fold a partial update into these overrides: fields set in `update`
    /// win, everything else is kept.
    pub fn merge(&mut self, update: RepositoryOverrides) {
        if update.max_file_size_kb.is_some() {
            self.max_file_size_kb = update.max_file_size_kb;
        }
        if update.include_dirs.is_some() {
            self.include_dirs = update.include_dirs;
        }
        if update.exclude_dirs.is_some() {
            self.exclude_dirs = update.exclude_dirs;
        }
        if update.ignore_patterns.is_some() {
            self.ignore_patterns = update.ignore_patterns;
        }
        if update.extensions.is_some() {
            self.extensions = update.extensions;
        }
        for field in update.replace {
            if !self.replace.contains(&field) {
                self.replace.push(field);
            }
        }
    }

    fn replaces(&self, field: ListField) -> bool {
        self.replace.contains(&field)
    }
}

// ---------------------------------------------------------------------------
// Effective settings
// ---------------------------------------------------------------------------

/// Fully merged settings for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveSettings {
    pub max_file_size_kb: u64,
    pub max_repo_size_mb: u64,
    pub max_files: usize,
    pub include_dirs: Vec<String>,
    pub exclude_dirs: Vec<String>,
    pub ignore_patterns: Vec<String>,
    /// Lowercase, without leading dots.
    pub extensions: Vec<String>,
    pub concurrency: usize,
    /// `false` when any override field was applied.
    pub using_defaults: bool,
}

impl EffectiveSettings {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_kb.saturating_mul(1024)
    }

    pub fn max_repo_size_bytes(&self) -> u64 {
        self.max_repo_size_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for EffectiveSettings {
    fn default() -> Self {
        resolve(&Config::default(), None)
    }
}

/// Merge global defaults with optional repository overrides.
pub fn resolve(config: &Config, overrides: Option<&RepositoryOverrides>) -> EffectiveSettings {
    let global = &config.index;
    let empty = RepositoryOverrides::default();
    let ov = overrides.unwrap_or(&empty);

    let list = |field: ListField, base: &[String], extra: &Option<Vec<String>>| -> Vec<String> {
        match extra {
            Some(values) if ov.replaces(field) => dedup(values.iter().cloned()),
            Some(values) => dedup(base.iter().chain(values.iter()).cloned()),
            None => base.to_vec(),
        }
    };

    let extensions = list(ListField::Extensions, &global.extensions, &ov.extensions)
        .into_iter()
        .map(|e| normalize_extension(&e))
        .collect::<Vec<_>>();

    EffectiveSettings {
        max_file_size_kb: ov.max_file_size_kb.unwrap_or(global.max_file_size_kb),
        max_repo_size_mb: global.max_repo_size_mb,
        max_files: global.max_files,
        include_dirs: list(ListField::IncludeDirs, &global.include_dirs, &ov.include_dirs),
        exclude_dirs: list(ListField::ExcludeDirs, &global.exclude_dirs, &ov.exclude_dirs),
        ignore_patterns: list(
            ListField::IgnorePatterns,
            &global.ignore_patterns,
            &ov.ignore_patterns,
        ),
        extensions: dedup(extensions.into_iter()),
        concurrency: config.pipeline.concurrency,
        using_defaults: ov.is_empty(),
    }
}

/// `".PY"` -> `"py"`.
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn dedup(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
