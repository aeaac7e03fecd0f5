//! Output formatting: plain text (default) and JSON (`--json`).
//!
//! All result data flows through a [`Formatter`] which writes to an
//! arbitrary [`std::io::Write`] destination (typically stdout). Lists are
//! emitted as JSON Lines, single results as one JSON object.
//! Hints and errors always go to stderr via [`print_hint`] and [`print_error`].

use std::io::Write;

use serde::Serialize;

use crate::config::EffectiveSettings;
use crate::errors::IndexError;
use crate::pipeline::RunSummary;
use crate::progress::RunStatus;
use crate::registry::{Repository, RepositorySummary};
use crate::snapshot::{FileHistory, FileStatus, Snapshot, SnapshotDiff};
use crate::types::Subgraph;

// ---------------------------------------------------------------------------
// Serializable output types
// ---------------------------------------------------------------------------

/// Result of an `index` command.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    pub total_files: usize,
    pub processed_files: usize,
    pub new: usize,
    pub changed: usize,
    pub deleted: usize,
    pub errors: usize,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl RunOutput {
    pub fn new(status: &RunStatus, summary: &RunSummary) -> Self {
        Self {
            run_id: status.run_id.clone(),
            snapshot_id: summary.snapshot_id.clone(),
            total_files: status.total_files,
            processed_files: status.processed_files,
            new: summary.new,
            changed: summary.changed,
            deleted: summary.deleted,
            errors: summary.errors,
            cancelled: summary.cancelled,
            elapsed_ms: summary.elapsed.as_millis() as u64,
        }
    }
}

fn status_label(status: Option<FileStatus>) -> &'static str {
    match status {
        Some(FileStatus::New) => "new",
        Some(FileStatus::Changed) => "changed",
        Some(FileStatus::Deleted) => "deleted",
        None => "-",
    }
}

// ---------------------------------------------------------------------------
// Formatter
// ---------------------------------------------------------------------------

/// Renders results as text or JSON.
pub struct Formatter<W: Write> {
    writer: W,
    json: bool,
}

impl<W: Write> Formatter<W> {
    /// * `writer` - The destination for output (e.g. `std::io::stdout()`).
    /// * `json`   - When `true`, emit JSON; otherwise, emit text.
    pub fn new(writer: W, json: bool) -> Self {
        Self { writer, json }
    }

    fn write_json<T: Serialize + ?Sized>(&mut self, value: &T) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, value)?;
        writeln!(self.writer)
    }

    pub fn format_repository(&mut self, repo: &Repository) -> std::io::Result<()> {
        if self.json {
            return self.write_json(repo);
        }
        writeln!(self.writer, "registered {} ({})", repo.display_name, repo.path)
    }

    pub fn format_repository_summary(&mut self, repo: &RepositorySummary) -> std::io::Result<()> {
        if self.json {
            return self.write_json(repo);
        }
        let last = match repo.last_indexed {
            Some(ts) => ts.to_string(),
            None => "never".to_string(),
        };
        writeln!(
            self.writer,
            "{}\t{}\tlast indexed: {last}\t{} files, {} nodes, {} links, {} snapshots{}",
            repo.repository.display_name,
            repo.repository.path,
            repo.file_count,
            repo.node_count,
            repo.link_count,
            repo.snapshot_count,
            if repo.using_defaults { "" } else { " (custom settings)" },
        )
    }

    pub fn format_settings(&mut self, settings: &EffectiveSettings) -> std::io::Result<()> {
        if self.json {
            return self.write_json(settings);
        }
        let w = &mut self.writer;
        writeln!(w, "max_file_size_kb: {}", settings.max_file_size_kb)?;
        writeln!(w, "max_repo_size_mb: {}", settings.max_repo_size_mb)?;
        writeln!(w, "max_files: {}", settings.max_files)?;
        writeln!(w, "include_dirs: {}", settings.include_dirs.join(", "))?;
        writeln!(w, "exclude_dirs: {}", settings.exclude_dirs.join(", "))?;
        writeln!(w, "ignore_patterns: {}", settings.ignore_patterns.join(", "))?;
        writeln!(w, "extensions: {}", settings.extensions.join(", "))?;
        writeln!(w, "using_defaults: {}", settings.using_defaults)
    }

    pub fn format_run(&mut self, run: &RunOutput) -> std::io::Result<()> {
        if self.json {
            return self.write_json(run);
        }
        match &run.snapshot_id {
            Some(id) => writeln!(
                self.writer,
                "snapshot {id}: {} new, {} changed, {} deleted, {} errors{}",
                run.new,
                run.changed,
                run.deleted,
                run.errors,
                if run.cancelled { " (cancelled)" } else { "" },
            ),
            None => writeln!(self.writer, "cancelled before any file was indexed"),
        }
    }

    /// One line per snapshot.
    pub fn format_snapshot_line(&mut self, snapshot: &Snapshot) -> std::io::Result<()> {
        if self.json {
            return self.write_json(snapshot);
        }
        writeln!(
            self.writer,
            "{}\t{}\t{} files\t{} nodes\t{} links\t+{} ~{} -{}{}",
            snapshot.id,
            snapshot.timestamp,
            snapshot.file_count,
            snapshot.node_count,
            snapshot.link_count,
            snapshot.changes.new.len(),
            snapshot.changes.changed.len(),
            snapshot.changes.deleted.len(),
            if snapshot.cancelled { "\tcancelled" } else { "" },
        )
    }

    /// A snapshot with its change lists and errors.
    pub fn format_snapshot(&mut self, snapshot: &Snapshot) -> std::io::Result<()> {
        if self.json {
            return self.write_json(snapshot);
        }
        let w = &mut self.writer;
        writeln!(w, "snapshot {}", snapshot.id)?;
        writeln!(w, "repository: {}", snapshot.repository)?;
        writeln!(w, "timestamp: {}", snapshot.timestamp)?;
        writeln!(
            w,
            "files: {}  nodes: {}  links: {}",
            snapshot.file_count, snapshot.node_count, snapshot.link_count
        )?;
        if snapshot.cancelled {
            writeln!(w, "cancelled: true")?;
        }
        for path in &snapshot.changes.new {
            writeln!(w, "  new      {path}")?;
        }
        for path in &snapshot.changes.changed {
            writeln!(w, "  changed  {path}")?;
        }
        for path in &snapshot.changes.deleted {
            writeln!(w, "  deleted  {path}")?;
        }
        for err in &snapshot.errors {
            writeln!(w, "  error    {err}")?;
        }
        if let Some(graph) = &snapshot.graph_data {
            self.format_graph(graph)?;
        }
        Ok(())
    }

    pub fn format_diff(&mut self, diff: &SnapshotDiff) -> std::io::Result<()> {
        if self.json {
            return self.write_json(diff);
        }
        let w = &mut self.writer;
        writeln!(w, "{} -> {}", diff.from, diff.to)?;
        writeln!(
            w,
            "files {:+}  nodes {:+}  links {:+}",
            diff.file_count_delta, diff.node_count_delta, diff.link_count_delta
        )?;
        for change in &diff.status_changes {
            writeln!(
                w,
                "  {}: {} -> {}",
                change.path,
                status_label(change.from),
                status_label(change.to)
            )?;
        }
        Ok(())
    }

    pub fn format_graph(&mut self, graph: &Subgraph) -> std::io::Result<()> {
        if self.json {
            return self.write_json(graph);
        }
        let w = &mut self.writer;
        for node in &graph.nodes {
            writeln!(
                w,
                "{}\t{}\t{}:{}-{}",
                node.kind.as_str(),
                node.qualified_name,
                node.file,
                node.start_line,
                node.end_line
            )?;
        }
        for link in &graph.links {
            writeln!(
                w,
                "{} -[{}]-> {}",
                node_label(graph, &link.source),
                link.kind.as_str(),
                node_label(graph, &link.target)
            )?;
        }
        Ok(())
    }

    pub fn format_history(&mut self, history: &FileHistory) -> std::io::Result<()> {
        if self.json {
            return self.write_json(history);
        }
        let w = &mut self.writer;
        match history.last_indexed {
            Some(ts) => writeln!(w, "last indexed: {ts}")?,
            None => writeln!(w, "never indexed")?,
        }
        for path in &history.changes.new {
            writeln!(w, "  new      {path}")?;
        }
        for path in &history.changes.changed {
            writeln!(w, "  changed  {path}")?;
        }
        for path in &history.changes.deleted {
            writeln!(w, "  deleted  {path}")?;
        }
        Ok(())
    }

    /// Plain confirmation line; JSON mode emits `{"ok": true, "message": ...}`.
    pub fn format_message(&mut self, message: &str) -> std::io::Result<()> {
        if self.json {
            return self.write_json(&serde_json::json!({ "ok": true, "message": message }));
        }
        writeln!(self.writer, "{message}")
    }
}

/// Qualified name of node `id`, or the id itself when it is not in `graph`.
fn node_label<'a>(graph: &'a Subgraph, id: &'a str) -> &'a str {
    graph
        .nodes
        .iter()
        .find(|n| n.id == id)
        .map_or(id, |n| n.qualified_name.as_str())
}

// ---------------------------------------------------------------------------
// Stderr helpers
// ---------------------------------------------------------------------------

/// Print a hint message to stderr (suppressed when `json` is true).
pub fn print_hint(msg: &str, json: bool) {
    if !json {
        eprintln!("hint: {msg}");
    }
}

/// Print an error message to stderr.
pub fn print_error(msg: &str) {
    eprintln!("error: {msg}");
}

/// Format an [`IndexError`] to stderr with structured `error:` / `hint:`
/// lines and return the process exit code.
pub fn format_error(err: &IndexError, json: bool) -> i32 {
    print_error(&format!("{err}"));
    if let Some(hint) = err.hint() {
        print_hint(hint, json);
    }
    err.exit_code()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Changes, StatusChange};
    use crate::types::{EdgeKind, GraphEdge, GraphNode, NodeKind};

    /// Helper: renders output into a String.
    fn render<F>(json: bool, f: F) -> String
    where
        F: FnOnce(&mut Formatter<&mut Vec<u8>>) -> std::io::Result<()>,
    {
        let mut buf = Vec::new();
        {
            let mut fmt = Formatter::new(&mut buf, json);
            f(&mut fmt).unwrap();
        }
        String::from_utf8(buf).unwrap()
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            id: "s1".into(),
            repository: "/repo".into(),
            timestamp: 1000,
            file_count: 2,
            node_count: 5,
            link_count: 3,
            changes: Changes {
                new: vec!["a.py".into()],
                changed: vec![],
                deleted: vec!["old.py".into()],
            },
            errors: vec![],
            cancelled: false,
            graph_data: None,
        }
    }

    #[test]
    fn snapshot_line_text() {
        let out = render(false, |fmt| fmt.format_snapshot_line(&snapshot()));
        assert_eq!(out, "s1\t1000\t2 files\t5 nodes\t3 links\t+1 ~0 -1\n");
    }

    #[test]
    fn snapshot_json_omits_missing_graph() {
        let out = render(true, |fmt| fmt.format_snapshot(&snapshot()));
        let v: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(v["id"], "s1");
        assert_eq!(v["changes"]["deleted"][0], "old.py");
        assert!(v.get("graph_data").is_none());
    }

    #[test]
    fn snapshot_text_lists_changes() {
        let out = render(false, |fmt| fmt.format_snapshot(&snapshot()));
        assert!(out.contains("  new      a.py\n"));
        assert!(out.contains("  deleted  old.py\n"));
    }

    #[test]
    fn diff_text_shows_signed_deltas() {
        let diff = SnapshotDiff {
            from: "a".into(),
            to: "b".into(),
            file_count_delta: -1,
            node_count_delta: 4,
            link_count_delta: 0,
            status_changes: vec![StatusChange {
                path: "x.py".into(),
                from: Some(FileStatus::New),
                to: None,
            }],
        };
        let out = render(false, |fmt| fmt.format_diff(&diff));
        assert_eq!(out, "a -> b\nfiles -1  nodes +4  links +0\n  x.py: new -> -\n");
    }

    #[test]
    fn graph_text_labels_links_by_qualified_name() {
        let node = |id: &str, kind: NodeKind, qn: &str| GraphNode {
            id: id.into(),
            kind,
            name: qn.into(),
            qualified_name: qn.into(),
            file: "m.py".into(),
            start_line: 1,
            end_line: 2,
            repo: "/repo".into(),
            bases: vec![],
        };
        let graph = Subgraph {
            nodes: vec![node("1", NodeKind::File, "m.py"), node("2", NodeKind::Function, "f")],
            links: vec![GraphEdge {
                source: "1".into(),
                target: "2".into(),
                kind: EdgeKind::Contains,
                owner: "m.py".into(),
            }],
        };
        let out = render(false, |fmt| fmt.format_graph(&graph));
        assert!(out.contains("Function\tf\tm.py:1-2\n"));
        assert!(out.ends_with("m.py -[CONTAINS]-> f\n"));
    }

    #[test]
    fn unknown_link_endpoint_falls_back_to_id() {
        let graph = Subgraph {
            nodes: vec![],
            links: vec![GraphEdge {
                source: "abc".into(),
                target: "def".into(),
                kind: EdgeKind::Imports,
                owner: "m.py".into(),
            }],
        };
        let out = render(false, |fmt| fmt.format_graph(&graph));
        assert_eq!(out, "abc -[IMPORTS]-> def\n");
    }

    #[test]
    fn message_json() {
        let out = render(true, |fmt| fmt.format_message("done"));
        let v: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(v["ok"], true);
        assert_eq!(v["message"], "done");
    }

    #[test]
    fn format_error_returns_exit_code() {
        let err = IndexError::Usage("bad".into());
        assert_eq!(format_error(&err, true), crate::errors::EXIT_USAGE);
    }
}
