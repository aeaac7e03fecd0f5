//! Integration tests that drive the `repograph` binary end to end.

use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

fn repograph(data_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_repograph"))
        .arg("--data-dir")
        .arg(data_dir)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run repograph")
}

fn json_lines(output: &Output) -> Vec<Value> {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn setup() -> (TempDir, TempDir) {
    let data = TempDir::new().unwrap();
    let repo = TempDir::new().unwrap();
    std::fs::write(repo.path().join("a.py"), "def foo():\n    pass\n").unwrap();
    std::fs::write(repo.path().join("b.py"), "import a\n").unwrap();
    (data, repo)
}

#[test]
fn index_then_history_and_show() {
    let (data, repo) = setup();
    let repo_arg = repo.path().to_str().unwrap();

    let run = json_lines(&repograph(data.path(), &["--json", "index", repo_arg]));
    assert_eq!(run.len(), 1);
    assert_eq!(run[0]["new"], 2);
    assert_eq!(run[0]["cancelled"], false);
    let snapshot_id = run[0]["snapshot_id"].as_str().unwrap().to_string();

    let history = json_lines(&repograph(data.path(), &["--json", "history", repo_arg]));
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["id"], snapshot_id.as_str());
    assert!(history[0].get("graph_data").is_none());

    let shown = json_lines(&repograph(
        data.path(),
        &["--json", "show", &snapshot_id, "--graph"],
    ));
    assert!(shown[0]["graph_data"]["nodes"].as_array().unwrap().len() >= 3);

    let repos = json_lines(&repograph(data.path(), &["--json", "repo", "list"]));
    assert_eq!(repos.len(), 1);
    assert_eq!(repos[0]["snapshot_count"], 1);
}

#[test]
fn graph_filters_by_kind() {
    let (data, repo) = setup();
    let repo_arg = repo.path().to_str().unwrap();
    json_lines(&repograph(data.path(), &["--json", "index", repo_arg]));

    let graph = json_lines(&repograph(
        data.path(),
        &["--json", "graph", repo_arg, "--kind", "File"],
    ));
    let nodes = graph[0]["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 2);
    assert!(nodes.iter().all(|n| n["kind"] == "File"));
}

#[test]
fn settings_set_and_reset() {
    let (data, repo) = setup();
    let repo_arg = repo.path().to_str().unwrap();

    let set = json_lines(&repograph(
        data.path(),
        &["--json", "settings", "set", repo_arg, "--exclude-dir", "vendor"],
    ));
    assert_eq!(set[0]["using_defaults"], false);
    let excludes = set[0]["exclude_dirs"].as_array().unwrap();
    assert!(excludes.iter().any(|d| d == "vendor"));
    assert!(excludes.iter().any(|d| d == "node_modules"));

    let reset = json_lines(&repograph(
        data.path(),
        &["--json", "settings", "reset", repo_arg],
    ));
    assert_eq!(reset[0]["using_defaults"], true);
}

#[test]
fn unknown_snapshot_exits_with_error() {
    let data = TempDir::new().unwrap();
    let out = repograph(data.path(), &["show", "no-such-id"]);
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("error: snapshot no-such-id not found"));
}

#[test]
fn bad_replace_field_is_usage_error() {
    let (data, repo) = setup();
    let out = repograph(
        data.path(),
        &[
            "settings",
            "set",
            repo.path().to_str().unwrap(),
            "--replace",
            "colors",
        ],
    );
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn missing_repository_is_rejected() {
    let data = TempDir::new().unwrap();
    let out = repograph(data.path(), &["index", "/definitely/not/here"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("invalid repository path"));
}
