use clap::{Parser, Subcommand};
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

use softtube_engine::config::{self, DownloadSettings};
use softtube_engine::fetch::YtDlpFetcher;
use softtube_engine::orchestrator::{Orchestrator, OrchestratorOptions};
use softtube_engine::paths::AppPaths;
use softtube_engine::{backlog, db, videos, EngineError};

const BASE_DIR_ENV_VAR: &str = "SOFTTUBE_BASE_DIR";

#[derive(Parser)]
#[command(
    name = "softtube_download",
    version,
    about = "Downloads every video waiting in the SoftTube backlog."
)]
struct Cli {
    /// Data directory holding config/, db/, logs/ and videos/.
    #[arg(long = "base-dir", global = true)]
    base_dir: Option<PathBuf>,

    #[arg(long = "max-concurrency", short = 'j', global = true)]
    max_concurrency: Option<usize>,

    /// Per-video fetch timeout in seconds (0 disables it).
    #[arg(long = "timeout-secs", global = true)]
    timeout_secs: Option<u64>,

    #[arg(long = "videos-dir", global = true)]
    videos_dir: Option<String>,

    #[arg(
        long = "verbosity",
        short,
        default_value = "info",
        global = true,
        value_parser = clap::builder::PossibleValuesParser::new([
            "off", "error", "warn", "info", "debug", "trace"
        ])
    )]
    verbosity: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one download pass over the backlog (default).
    Run,
    /// Put videos back into the backlog, e.g. after a failed fetch.
    Enqueue {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// List videos left in `downloading` by an interrupted run.
    Stale,
    /// List the backlog without touching it.
    Pending,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.verbosity))
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            exit_code_for(&err)
        }
    }
}

fn exit_code_for(err: &EngineError) -> ExitCode {
    match err {
        EngineError::InvalidConfig(_) | EngineError::InvalidVideoId(_) => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}

fn run(mut cli: Cli) -> Result<ExitCode, EngineError> {
    let base_dir = cli
        .base_dir
        .clone()
        .or_else(default_base_dir)
        .ok_or_else(|| {
            EngineError::InvalidConfig(format!(
                "could not determine base dir; pass --base-dir or set {BASE_DIR_ENV_VAR}"
            ))
        })?;
    let cwd = std::env::current_dir()?;
    let paths = AppPaths::new(AppPaths::normalize_base_dir(&base_dir, &cwd));

    let command = cli.command.take().unwrap_or(Command::Run);
    match command {
        Command::Run => {
            let settings = effective_settings(&paths, &cli)?;
            info!(
                "softtube download started (base dir {})",
                paths.base_dir.to_string_lossy()
            );
            let fetcher = YtDlpFetcher::from_settings(&paths, &settings);
            let options = OrchestratorOptions::from_settings(&paths, &settings);
            let report = Orchestrator::new(paths, fetcher, options).run_once()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            info!("softtube download finished");
        }
        Command::Enqueue { ids } => {
            db::ensure_schema(&paths)?;
            // Every id is tried; the exit code reflects the first rejection.
            let mut exit = ExitCode::SUCCESS;
            let mut rejected = 0usize;
            for (id, result) in backlog::enqueue_many(&paths, ids.iter().map(String::as_str)) {
                match result {
                    Ok(outcome) => println!("{id}\t{}", serde_json::to_string(&outcome)?),
                    Err(err) => {
                        error!("could not enqueue {id:?}: {err}");
                        if rejected == 0 {
                            exit = exit_code_for(&err);
                        }
                        rejected += 1;
                    }
                }
            }
            if rejected > 0 {
                error!("{rejected} of {} ids were not enqueued", ids.len());
            }
            return Ok(exit);
        }
        Command::Stale => {
            db::ensure_schema(&paths)?;
            for video in videos::stale_downloading(&paths)? {
                println!("{}\t{}", video.id, video.title);
            }
        }
        Command::Pending => {
            db::ensure_schema(&paths)?;
            for entry in backlog::list_pending(&paths)? {
                println!("{}", entry.video_id);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn effective_settings(paths: &AppPaths, cli: &Cli) -> Result<DownloadSettings, EngineError> {
    let mut settings = config::load_download_settings(paths)?;
    if let Some(n) = cli.max_concurrency {
        settings.max_concurrency = n;
    }
    if let Some(secs) = cli.timeout_secs {
        settings.fetch_timeout_secs = secs;
    }
    if let Some(dir) = &cli.videos_dir {
        settings.videos_dir = Some(dir.clone());
    }
    Ok(settings.normalized())
}

fn default_base_dir() -> Option<PathBuf> {
    if let Ok(v) = std::env::var(BASE_DIR_ENV_VAR) {
        let t = v.trim();
        if !t.is_empty() {
            return Some(PathBuf::from(t));
        }
    }
    dirs::data_dir().map(|dir| dir.join("softtube"))
}
