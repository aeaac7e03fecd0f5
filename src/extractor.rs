//! Structural extraction: turn changed files into [`StructuralRecord`]s.
//!
//! Parsers are looked up by extension in a [`ParserRegistry`]. Extraction
//! never fails a run; unreadable files, bad encodings and syntax errors all
//! produce an empty record carrying a warning.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::indexer::{Lang, LanguageParser, TreeSitterParser};
use crate::progress::Progress;
use crate::types::{Declaration, StructuralRecord};

/// Maps lowercase file extensions to language parsers.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    by_ext: HashMap<String, Arc<dyn LanguageParser>>,
}

impl ParserRegistry {
    /// Registry with no parsers at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the bundled tree-sitter parsers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for lang in Lang::ALL {
            registry.register(Arc::new(TreeSitterParser::new(lang)));
        }
        registry
    }

    /// Register `parser` for every extension it reports. Later registrations
    /// win.
    pub fn register(&mut self, parser: Arc<dyn LanguageParser>) {
        for ext in parser.extensions() {
            self.by_ext.insert(ext.to_ascii_lowercase(), Arc::clone(&parser));
        }
    }

    /// Parser for a `/`-separated relative path, by extension.
    pub fn for_path(&self, path: &str) -> Option<&dyn LanguageParser> {
        let name = path.rsplit('/').next().unwrap_or(path);
        let (_, ext) = name.rsplit_once('.')?;
        self.by_ext
            .get(&ext.to_ascii_lowercase())
            .map(|p| p.as_ref())
    }

    pub fn extensions(&self) -> Vec<&str> {
        let mut exts: Vec<&str> = self.by_ext.keys().map(String::as_str).collect();
        exts.sort_unstable();
        exts
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("extensions", &self.extensions())
            .finish()
    }
}

/// Extract one file. `abs` is read from disk; `rel` names the record.
pub fn extract_file(registry: &ParserRegistry, rel: &str, abs: &Path) -> StructuralRecord {
    let mut record = StructuralRecord::empty(rel);

    let Some(parser) = registry.for_path(rel) else {
        return record;
    };
    record.language = Some(parser.language().to_string());

    let bytes = match std::fs::read(abs) {
        Ok(b) => b,
        Err(err) => {
            record.warning = Some(format!("unreadable: {err}"));
            return record;
        }
    };
    let Ok(content) = String::from_utf8(bytes) else {
        record.warning = Some("content is not valid UTF-8".to_string());
        return record;
    };

    match panic::catch_unwind(AssertUnwindSafe(|| parser.parse(&content))) {
        Ok(Ok(decls)) => record.declarations = decls.into_iter().map(normalized).collect(),
        Ok(Err(err)) => record.warning = Some(err.to_string()),
        Err(_) => record.warning = Some(format!("{} parser panicked", parser.language())),
    }
    record
}

/// Clamp a parser-reported range to `1 <= start_line <= end_line`.
fn normalized(mut decl: Declaration) -> Declaration {
    decl.start_line = decl.start_line.max(1);
    decl.end_line = decl.end_line.max(decl.start_line);
    decl
}

/// Extract `paths` (relative to `root`) in parallel.
///
/// Uses a dedicated pool of `concurrency` threads (`0` = the global rayon
/// pool). Once cancellation is requested on `progress`, remaining files are
/// skipped; their slots come back as `None`. The result is in input order.
pub fn extract_all(
    registry: &ParserRegistry,
    root: &Path,
    paths: &[String],
    concurrency: usize,
    progress: &Progress,
) -> Result<Vec<Option<StructuralRecord>>> {
    let run = || {
        paths
            .par_iter()
            .map(|rel| {
                if progress.cancel_requested() {
                    return None;
                }
                progress.set_current(Some(rel));
                let record = extract_file(registry, rel, &root.join(rel));
                tracing::debug!(
                    path = %rel,
                    declarations = record.declarations.len(),
                    "extracted"
                );
                Some(record)
            })
            .collect()
    };

    if concurrency == 0 {
        return Ok(run());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency)
        .build()
        .context("failed to create extraction thread pool")?;
    Ok(pool.install(run))
}
