//! Download Orchestrator: turns the backlog into local files.
//!
//! One pass snapshots the backlog, then a bounded set of worker threads
//! drains the snapshot. Per entry: claim, mark `Downloading`, fetch, mark
//! `Downloaded` or `FailedToFetch`. The store is the only shared state and
//! its single-statement writes are the only synchronization between
//! entries (and between concurrent runs).

use crate::backlog::{self, BacklogEntry, ClaimOutcome};
use crate::config::{self, DownloadSettings};
use crate::fetch::Fetcher;
use crate::paths::AppPaths;
use crate::runlog::{Level, RunLog};
use crate::videos::{self, VideoStatus};
use crate::{db, session, EngineError, Result};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;

pub const SESSION_NAME: &str = "softtube download";

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub max_concurrency: usize,
    pub videos_dir: PathBuf,
}

impl OrchestratorOptions {
    pub fn from_settings(paths: &AppPaths, settings: &DownloadSettings) -> Self {
        Self {
            max_concurrency: config::clamp_concurrency(settings.max_concurrency),
            videos_dir: paths.videos_dir(settings.videos_dir.as_deref()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Entries in the backlog snapshot.
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Entries another claimant removed first.
    pub skipped: usize,
    /// Status writes that failed after a claim; the video needs a manual look.
    pub inconsistent: usize,
    /// Videos found in `Downloading` before the pass started.
    pub stale: usize,
}

impl RunReport {
    fn record(&mut self, entry: EntryReport) {
        match entry.outcome {
            EntryOutcome::Succeeded => self.succeeded += 1,
            EntryOutcome::Failed => self.failed += 1,
            EntryOutcome::Skipped => self.skipped += 1,
        }
        if entry.inconsistent {
            self.inconsistent += 1;
        }
    }

    fn merge(&mut self, other: RunReport) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.inconsistent += other.inconsistent;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryOutcome {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy)]
struct EntryReport {
    outcome: EntryOutcome,
    inconsistent: bool,
}

impl EntryReport {
    fn new(outcome: EntryOutcome) -> Self {
        Self {
            outcome,
            inconsistent: false,
        }
    }

    fn inconsistent(outcome: EntryOutcome) -> Self {
        Self {
            outcome,
            inconsistent: true,
        }
    }
}

pub struct Orchestrator<F: Fetcher> {
    paths: AppPaths,
    fetcher: F,
    options: OrchestratorOptions,
}

impl<F: Fetcher> Orchestrator<F> {
    pub fn new(paths: AppPaths, fetcher: F, options: OrchestratorOptions) -> Self {
        Self {
            paths,
            fetcher,
            options,
        }
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Runs one pass over the current backlog and blocks until every
    /// dispatched entry has finished.
    ///
    /// Only an unreachable store is an error; everything that goes wrong
    /// for a single entry is logged and counted in the report.
    pub fn run_once(&self) -> Result<RunReport> {
        db::ensure_schema(&self.paths).map_err(store_unavailable)?;
        let session =
            session::create_session(&self.paths, SESSION_NAME).map_err(store_unavailable)?;
        let runlog = RunLog::new(&self.paths, &session.id);
        info!("session started: {} ({})", session.name, session.id);

        let stale = videos::stale_downloading(&self.paths).map_err(store_unavailable)?;
        for video in &stale {
            warn!(
                "video {} is still marked downloading from an earlier run; re-enqueue it manually if the file is missing",
                video.id
            );
            runlog.event(
                Level::Warn,
                "stale_downloading",
                serde_json::json!({
                    "video_id": video.id,
                    "status_changed_at_ms": video.status_changed_at_ms,
                }),
            );
        }

        let pending = backlog::list_pending(&self.paths).map_err(store_unavailable)?;
        let mut report = RunReport {
            attempted: pending.len(),
            stale: stale.len(),
            ..RunReport::default()
        };

        let workers = self.options.max_concurrency.max(1).min(pending.len());
        info!(
            "{} video(s) pending, {} worker(s), writing to {}",
            pending.len(),
            workers,
            self.options.videos_dir.to_string_lossy()
        );
        runlog.event(
            Level::Info,
            "run_started",
            serde_json::json!({
                "pending": pending.len(),
                "workers": workers,
                "videos_dir": self.options.videos_dir.to_string_lossy(),
            }),
        );

        let queue = Mutex::new(pending.into_iter().collect::<VecDeque<_>>());
        let (queue, worker_log) = (&queue, &runlog);
        thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| scope.spawn(move || self.drain(queue, worker_log)))
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(partial) => report.merge(partial),
                    Err(_) => {
                        error!("a download worker panicked; its in-flight video may be left downloading");
                        runlog.event(Level::Error, "worker_panicked", serde_json::json!({}));
                    }
                }
            }
        });

        info!(
            "run finished: attempted={} succeeded={} failed={} skipped={} inconsistent={} stale={}",
            report.attempted,
            report.succeeded,
            report.failed,
            report.skipped,
            report.inconsistent,
            report.stale
        );
        runlog.event(
            Level::Info,
            "run_finished",
            serde_json::to_value(&report).unwrap_or_default(),
        );
        Ok(report)
    }

    fn drain(&self, queue: &Mutex<VecDeque<BacklogEntry>>, runlog: &RunLog) -> RunReport {
        let mut partial = RunReport::default();
        loop {
            let next = queue
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .pop_front();
            let Some(entry) = next else {
                break;
            };
            partial.record(self.process_entry(&entry, runlog));
        }
        partial
    }

    fn process_entry(&self, entry: &BacklogEntry, runlog: &RunLog) -> EntryReport {
        let video_id = entry.video_id.as_str();

        match backlog::claim(&self.paths, video_id) {
            Ok(ClaimOutcome::Claimed) => {}
            Ok(ClaimOutcome::AlreadyClaimed) => {
                debug!("video {video_id} was claimed elsewhere, skipping");
                runlog.event(
                    Level::Info,
                    "entry_skipped",
                    serde_json::json!({ "video_id": video_id }),
                );
                return EntryReport::new(EntryOutcome::Skipped);
            }
            Err(err) => {
                error!("failed to claim video {video_id}: {err}");
                runlog.event(
                    Level::Error,
                    "claim_failed",
                    serde_json::json!({ "video_id": video_id, "error": err.to_string() }),
                );
                if let Err(status_err) =
                    videos::set_status(&self.paths, video_id, VideoStatus::FailedToClaim)
                {
                    warn!("could not mark video {video_id} as failed to claim: {status_err}");
                }
                return EntryReport::new(EntryOutcome::Failed);
            }
        }

        // The entry is gone from the backlog now; a failure from here on is
        // logged and the entry dropped rather than retried.
        if let Err(err) = videos::set_status(&self.paths, video_id, VideoStatus::Downloading) {
            error!(
                "video {video_id} was claimed but could not be marked downloading ({err}); it will not be fetched this run"
            );
            runlog.event(
                Level::Error,
                "status_write_failed",
                serde_json::json!({
                    "video_id": video_id,
                    "status": VideoStatus::Downloading.as_str(),
                    "error": err.to_string(),
                }),
            );
            return EntryReport::inconsistent(EntryOutcome::Failed);
        }

        info!("downloading video {video_id}");
        let outcome = self.fetcher.fetch(video_id, &self.options.videos_dir);
        let (status, entry_outcome) = match &outcome.result {
            Ok(()) => {
                info!("downloaded video {video_id}");
                runlog.event(
                    Level::Info,
                    "fetch_succeeded",
                    serde_json::json!({ "video_id": video_id, "command": outcome.command }),
                );
                (VideoStatus::Downloaded, EntryOutcome::Succeeded)
            }
            Err(err) => {
                error!(
                    "failed to download video {video_id}: {err} (command: {})",
                    outcome.command
                );
                runlog.event(
                    Level::Error,
                    "fetch_failed",
                    serde_json::json!({
                        "video_id": video_id,
                        "command": outcome.command,
                        "error": err.to_string(),
                    }),
                );
                (VideoStatus::FailedToFetch, EntryOutcome::Failed)
            }
        };

        if let Err(err) = videos::set_status(&self.paths, video_id, status) {
            error!(
                "video {video_id} finished but could not be marked {} ({err})",
                status.as_str()
            );
            runlog.event(
                Level::Error,
                "status_write_failed",
                serde_json::json!({
                    "video_id": video_id,
                    "status": status.as_str(),
                    "error": err.to_string(),
                }),
            );
            return EntryReport::inconsistent(entry_outcome);
        }

        EntryReport::new(entry_outcome)
    }
}

fn store_unavailable(err: EngineError) -> EngineError {
    match err {
        EngineError::StoreUnavailable(_) => err,
        other => EngineError::StoreUnavailable(other.to_string()),
    }
}
