use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;

use taskplan_console::catalog::{self, ParamFields, template};
use taskplan_console::config::{self, ClientConfig};
use taskplan_console::dispatch::{
    self, ActionArgs, ActionRoute, Dispatch, HttpDispatcher, LogSink, Request,
};
use taskplan_console::snapshot::{FileSnapshotSource, HttpSnapshotSource, Snapshot, SnapshotSource};
use taskplan_console::task::{TaskAction, TaskEntry, legal_actions};
use taskplan_console::{Error, Result};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Client config TOML (defaults to ./taskplan.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the task list
    Tasks {
        /// Read state from a JSON file instead of the backend
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Print params grouped by group label
    Params {
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// List by sorting rank instead of by group
        #[arg(long)]
        sorted: bool,
    },
    /// Resolve a template name against arguments
    Resolve { name: String, args: Vec<String> },
    /// Dispatch one task action (pause, run-now, change, continue, ...)
    Action {
        verb: String,
        uuid: String,
        #[arg(long)]
        iterations: Option<u64>,
        /// Device for `continue` (defaults to [tasks].device)
        #[arg(long)]
        device: Option<String>,
    },
    /// Move a queued task to a queue index
    ReorderTask { uuid: String, index: usize },
    /// Move a param to a sorting rank
    ReorderParam { uuid: String, sorting: i64 },
    /// Toggle whether a param always appears in task names
    ForceParam { uuid: String, enabled: OnOff },
    AddParam {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        condition: String,
    },
    EditParam {
        uuid: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        condition: String,
        /// Default value uuid
        #[arg(long, default_value = "")]
        default: String,
        /// Deprecated value uuid
        #[arg(long, default_value = "")]
        deprecated: String,
    },
    /// Create params from a TOML or JSON document
    AddParamBatch { file: PathBuf },
    PauseAll,
    SetTags { uuid: String, tags: Vec<String> },
    /// Interactive terminal UI
    Tui {
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum OnOff {
    On,
    Off,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let cfg = config::load_client_config(args.config.as_deref())?;

    let cmd = match args.cmd {
        Command::Tui { snapshot } => {
            init_file_logging(&cfg.log_file_path())?;
            return taskplan_console::ui::run_tui(cfg, snapshot);
        }
        cmd => cmd,
    };
    init_stderr_logging();

    match cmd {
        Command::Tasks { snapshot } => cmd_tasks(&cfg, snapshot.as_deref()),
        Command::Params { snapshot, sorted } => cmd_params(&cfg, snapshot.as_deref(), sorted),
        Command::Resolve { name, args } => {
            println!("{}", template::resolve(&name, &args)?);
            Ok(())
        }
        Command::Action {
            verb,
            uuid,
            iterations,
            device,
        } => cmd_action(&cfg, &verb, &uuid, iterations, device),
        Command::ReorderTask { uuid, index } => send(
            &cfg,
            taskplan_console::reorder::reorder_request(
                taskplan_console::reorder::ReorderKind::Task,
                &uuid,
                index as i64,
            )?,
        ),
        Command::ReorderParam { uuid, sorting } => {
            send(&cfg, catalog::reorder_param_request(&uuid, sorting)?)
        }
        Command::ForceParam { uuid, enabled } => send(
            &cfg,
            catalog::force_param_request(&uuid, matches!(enabled, OnOff::On))?,
        ),
        Command::AddParam { name, condition } => {
            let fields = ParamFields {
                name,
                condition,
                ..ParamFields::default()
            };
            send(&cfg, catalog::create_param_request(&fields)?)
        }
        Command::EditParam {
            uuid,
            name,
            condition,
            default,
            deprecated,
        } => {
            let fields = ParamFields {
                name,
                condition,
                default_param_value: default,
                deprecated_param_value: deprecated,
            };
            send(&cfg, catalog::edit_param_request(&uuid, &fields)?)
        }
        Command::AddParamBatch { file } => {
            let document = config::load_document(&file)?;
            send(&cfg, catalog::create_batch_request(document)?)
        }
        Command::PauseAll => send(&cfg, dispatch::pause_all_request()?),
        Command::SetTags { uuid, tags } => send(&cfg, dispatch::set_tags_request(&uuid, &tags)?),
        Command::Tui { .. } => Ok(()),
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
}

fn init_stderr_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

// The terminal belongs to the UI, so its logs go to a file.
fn init_file_logging(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            Error::config(format!(
                "failed to create log directory '{}': {e}",
                parent.display()
            ))
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::config(format!("failed to open log file '{}': {e}", path.display())))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

fn dispatcher(cfg: &ClientConfig) -> Result<HttpDispatcher> {
    HttpDispatcher::from_config(&cfg.server, Arc::new(LogSink))
}

fn send(cfg: &ClientConfig, req: Request) -> Result<()> {
    let d = dispatcher(cfg)?;
    let res = d.send_blocking(&req)?;
    println!("{} {}: ok", req.method, req.path);
    if !res.is_null() {
        println!("{res}");
    }
    Ok(())
}

fn fetch_snapshot(cfg: &ClientConfig, file: Option<&Path>) -> Result<Snapshot> {
    let source: Box<dyn SnapshotSource> = match file {
        Some(path) => Box::new(FileSnapshotSource::new(path)),
        None => Box::new(HttpSnapshotSource::from_config(cfg)?),
    };
    source.fetch()
}

fn cmd_tasks(cfg: &ClientConfig, file: Option<&Path>) -> Result<()> {
    let snap = fetch_snapshot(cfg, file)?;
    for entry in &snap.tasks {
        let task = match entry {
            TaskEntry::Stub { uuid } => {
                println!("{uuid:<38} Loading...");
                continue;
            }
            TaskEntry::Loaded(task) => task,
        };
        let queue_index = snap.queue_index(&task.uuid);
        let name = task
            .display_name()
            .unwrap_or_else(|e| format!("<{e}>"));
        let actions: Vec<&str> = legal_actions(task).iter().map(|a| a.as_str()).collect();
        println!(
            "{:<38} {:<10} {:<16} {:<12} {}  [{}]",
            task.uuid,
            task.state.as_str(),
            task.status_text(queue_index),
            task.iterations_text(),
            taskplan_console::sanitize::sanitize(&name),
            actions.join(" ")
        );
    }
    Ok(())
}

fn cmd_params(cfg: &ClientConfig, file: Option<&Path>, sorted: bool) -> Result<()> {
    let snap = fetch_snapshot(cfg, file)?;
    let print_param = |p: &catalog::Param| {
        let value_name = |uuid: Option<&str>| {
            uuid.and_then(|u| p.find_value(u))
                .map(|v| v.name.clone())
                .unwrap_or_else(|| "-".into())
        };
        println!(
            "  {:<24} rank={:<4} default={:<16} deprecated={:<16}{}",
            p.name,
            p.sorting,
            value_name(p.effective_default()),
            value_name(p.effective_deprecated()),
            if p.force { " forced" } else { "" }
        );
    };

    if sorted {
        for p in catalog::sorted_by_rank(&snap.params) {
            print_param(p);
        }
        return Ok(());
    }
    for (group, params) in catalog::group_params(&snap.params) {
        println!("{}", catalog::display_group(&group));
        for p in params {
            print_param(p);
        }
    }
    Ok(())
}

fn cmd_action(
    cfg: &ClientConfig,
    verb: &str,
    uuid: &str,
    iterations: Option<u64>,
    device: Option<String>,
) -> Result<()> {
    let action = TaskAction::parse(verb).ok_or_else(|| {
        let known: Vec<&str> = TaskAction::ALL.iter().map(|a| a.as_str()).collect();
        Error::msg(format!("unknown action '{verb}' (known: {})", known.join(", ")))
    })?;
    let args = ActionArgs {
        iterations,
        device: device.or_else(|| cfg.tasks.device().map(str::to_string)),
    };
    match dispatch::route_task_action(action, uuid, &args)? {
        ActionRoute::Send(req) => send(cfg, req),
        ActionRoute::Open { path } => {
            println!("{}", dispatcher(cfg)?.url(&path));
            Ok(())
        }
        ActionRoute::Local(action) => Err(Error::msg(format!(
            "'{}' is handled inside the terminal UI",
            action.as_str()
        ))),
    }
}
