use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// repograph - incremental code graph indexer with snapshot history
#[derive(Parser, Debug)]
#[command(name = "repograph", version, about)]
pub struct Cli {
    /// Output results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Data directory (defaults to $REPOGRAPH_HOME or ~/.repograph)
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage registered repositories
    Repo(RepoArgs),

    /// Show or change per-repository settings
    Settings(SettingsArgs),

    /// Index a repository (incrementally after the first run)
    Index(IndexArgs),

    /// List snapshots of a repository, newest first
    History(RepoPathArg),

    /// Show one snapshot, or the latest snapshot of a repository
    Show(ShowArgs),

    /// Compare two snapshots
    Diff(DiffArgs),

    /// Print the current graph of a repository
    Graph(GraphArgs),

    /// Show the files reported by the latest run
    Files(RepoPathArg),
}

#[derive(clap::Args, Debug)]
pub struct RepoPathArg {
    /// Repository path (defaults to the current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct RepoArgs {
    #[command(subcommand)]
    pub command: RepoCommand,
}

#[derive(Subcommand, Debug)]
pub enum RepoCommand {
    /// Register a repository
    Add {
        /// Repository path
        path: PathBuf,
        /// Display name (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Unregister a repository and drop its graph and history
    Remove {
        /// Repository path
        path: PathBuf,
    },
    /// List registered repositories
    List,
}

#[derive(clap::Args, Debug)]
pub struct SettingsArgs {
    #[command(subcommand)]
    pub command: SettingsCommand,
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    /// Show the effective settings of a repository
    Show(RepoPathArg),
    /// Override settings for a repository; unspecified settings are kept
    Set(SetArgs),
    /// Drop all overrides of a repository
    Reset(RepoPathArg),
}

#[derive(clap::Args, Debug)]
pub struct SetArgs {
    /// Repository path
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Maximum size of an indexed file, in KiB
    #[arg(long)]
    pub max_file_size_kb: Option<u64>,

    /// Top-level directories to restrict indexing to (repeatable)
    #[arg(long = "include-dir", value_name = "DIR")]
    pub include_dirs: Vec<String>,

    /// Directories to skip (repeatable)
    #[arg(long = "exclude-dir", value_name = "DIR")]
    pub exclude_dirs: Vec<String>,

    /// Glob patterns of files to skip (repeatable)
    #[arg(long = "ignore", value_name = "GLOB")]
    pub ignore_patterns: Vec<String>,

    /// File extensions to index (repeatable)
    #[arg(long = "extension", value_name = "EXT")]
    pub extensions: Vec<String>,

    /// List settings that replace the defaults instead of extending them
    /// (include_dirs, exclude_dirs, ignore_patterns, extensions)
    #[arg(long, value_name = "FIELD")]
    pub replace: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub struct IndexArgs {
    /// Repository path (defaults to the current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    /// Snapshot id; when omitted, the latest snapshot of --repo is shown
    pub id: Option<String>,

    /// Repository path used when no id is given
    #[arg(long, default_value = ".")]
    pub repo: PathBuf,

    /// Include the graph data
    #[arg(long)]
    pub graph: bool,
}

#[derive(clap::Args, Debug)]
pub struct DiffArgs {
    /// Older snapshot id
    pub from: String,
    /// Newer snapshot id
    pub to: String,
}

#[derive(clap::Args, Debug)]
pub struct GraphArgs {
    /// Repository path (defaults to the current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Only nodes of this kind (File, Class, Function, Import; repeatable)
    #[arg(long = "kind", value_name = "KIND")]
    pub kinds: Vec<String>,

    /// Only nodes in files under this path prefix
    #[arg(long, value_name = "PREFIX")]
    pub path_prefix: Option<String>,
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_defaults_to_current_dir() {
        let cli = Cli::try_parse_from(["repograph", "index"]).unwrap();
        match cli.command {
            Command::Index(args) => assert_eq!(args.path, PathBuf::from(".")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["repograph", "repo", "list", "--json", "--data-dir", "/tmp/x"])
                .unwrap();
        assert!(cli.json);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn settings_set_collects_repeated_flags() {
        let cli = Cli::try_parse_from([
            "repograph",
            "settings",
            "set",
            "/repo",
            "--exclude-dir",
            "build",
            "--exclude-dir",
            "out",
            "--replace",
            "exclude_dirs",
        ])
        .unwrap();
        let Command::Settings(SettingsArgs {
            command: SettingsCommand::Set(args),
        }) = cli.command
        else {
            panic!("expected settings set");
        };
        assert_eq!(args.exclude_dirs, vec!["build", "out"]);
        assert_eq!(args.replace, vec!["exclude_dirs"]);
        assert!(args.max_file_size_kb.is_none());
    }

    #[test]
    fn diff_requires_two_ids() {
        assert!(Cli::try_parse_from(["repograph", "diff", "a"]).is_err());
    }
}
