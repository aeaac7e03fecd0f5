use anyhow::Context;
use signal_hook::consts::SIGINT;
use signal_hook::flag;

use crate::cli::{Cli, Command, RepoCommand, SetArgs, SettingsCommand};
use crate::config::{ListField, RepositoryOverrides};
use crate::db;
use crate::errors::IndexError;
use crate::output::{Formatter, RunOutput};
use crate::progress::detect_mode;
use crate::service::IndexService;
use crate::types::{GraphFilter, NodeKind};

pub fn dispatch(cli: Cli) -> Result<(), IndexError> {
    let data_dir = db::resolve_data_dir(cli.data_dir.as_deref())?;
    let service = IndexService::open(&data_dir)?;
    let stdout = std::io::stdout();
    let mut fmt = Formatter::new(stdout.lock(), cli.json);

    match cli.command {
        Command::Repo(args) => match args.command {
            RepoCommand::Add { path, name } => {
                let repo = service.add_repository(&path, name.as_deref())?;
                fmt.format_repository(&repo)?;
            }
            RepoCommand::Remove { path } => {
                service.remove_repository(&path)?;
                fmt.format_message(&format!("removed {}", path.display()))?;
            }
            RepoCommand::List => {
                for repo in service.list_repositories()? {
                    fmt.format_repository_summary(&repo)?;
                }
            }
        },
        Command::Settings(args) => match args.command {
            SettingsCommand::Show(arg) => {
                fmt.format_settings(&service.resolve_settings(&arg.path)?)?;
            }
            SettingsCommand::Set(args) => {
                let path = args.path.clone();
                let update = overrides_from_args(args)?;
                if update.is_empty() && update.replace.is_empty() {
                    return Err(IndexError::Usage(
                        "settings set needs at least one setting to change".into(),
                    ));
                }
                fmt.format_settings(&service.set_overrides(&path, update)?)?;
            }
            SettingsCommand::Reset(arg) => {
                fmt.format_settings(&service.reset_overrides(&arg.path)?)?;
            }
        },
        Command::Index(args) => {
            let mode = detect_mode(cli.json || cli.quiet);
            service.start_indexing(&args.path, None, mode)?;
            flag::register(SIGINT, service.cancel_flag(&args.path)?)
                .context("registering SIGINT handler")?;
            let outcome = service.wait(&args.path)?;
            let summary = outcome.result?;
            fmt.format_run(&RunOutput::new(&outcome.status, &summary))?;
        }
        Command::History(arg) => {
            for snapshot in service.list_snapshots(&arg.path)? {
                fmt.format_snapshot_line(&snapshot)?;
            }
        }
        Command::Show(args) => {
            let mut snapshot = match &args.id {
                Some(id) => service.get_snapshot_detail(id)?,
                None => service.get_latest_snapshot(&args.repo)?,
            };
            if !args.graph {
                snapshot.graph_data = None;
            }
            fmt.format_snapshot(&snapshot)?;
        }
        Command::Diff(args) => {
            fmt.format_diff(&service.compare_snapshots(&args.from, &args.to)?)?;
        }
        Command::Graph(args) => {
            let filter = GraphFilter {
                kinds: parse_kinds(&args.kinds)?,
                path_prefix: args.path_prefix,
            };
            fmt.format_graph(&service.query_graph(&args.path, &filter)?)?;
        }
        Command::Files(arg) => {
            fmt.format_history(&service.file_history(&arg.path)?)?;
        }
    }
    Ok(())
}

fn parse_kinds(kinds: &[String]) -> Result<Vec<NodeKind>, IndexError> {
    kinds
        .iter()
        .map(|k| k.parse::<NodeKind>().map_err(IndexError::Usage))
        .collect()
}

/// Only flags that were given become overrides.
fn overrides_from_args(args: SetArgs) -> Result<RepositoryOverrides, IndexError> {
    let non_empty = |v: Vec<String>| (!v.is_empty()).then_some(v);
    let replace = args
        .replace
        .iter()
        .map(|f| f.parse::<ListField>().map_err(IndexError::Usage))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RepositoryOverrides {
        max_file_size_kb: args.max_file_size_kb,
        include_dirs: non_empty(args.include_dirs),
        exclude_dirs: non_empty(args.exclude_dirs),
        ignore_patterns: non_empty(args.ignore_patterns),
        extensions: non_empty(args.extensions),
        replace,
    })
}
