//! Incremental repository indexer.
//!
//! Walks a repository, detects which files changed since the last run,
//! extracts declarations with tree-sitter and keeps a code property graph
//! (files, classes, functions, imports and the links between them) in
//! SQLite. Every run leaves an immutable snapshot behind.

pub mod cli;
pub mod config;
pub mod db;
pub mod detector;
pub mod errors;
pub mod extractor;
pub mod indexer;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod reconciler;
pub mod registry;
pub mod router;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod walker;
