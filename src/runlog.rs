//! Append-only JSONL log of download runs, rotated by size.

use crate::db::now_ms;
use crate::paths::AppPaths;
use crate::Result;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const RUN_LOG_ROTATE_BYTES: u64 = 5 * 1024 * 1024;
pub const RUN_LOG_MAX_BACKUPS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warn,
    Error,
}

/// Shared by every worker of a run; writes are serialized so lines never interleave.
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl RunLog {
    pub fn new(paths: &AppPaths, session_id: &str) -> Self {
        Self {
            path: paths.download_log_path(),
            session_id: session_id.to_string(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best effort: a failing log write is reported and otherwise ignored.
    pub fn event(&self, level: Level, event: &str, data: serde_json::Value) {
        if let Err(err) = self.write_line(level, event, data) {
            log::warn!(
                "failed to write run log {}: {err}",
                self.path.to_string_lossy()
            );
        }
    }

    fn write_line(&self, level: Level, event: &str, data: serde_json::Value) -> Result<()> {
        let line = serde_json::json!({
            "ts_ms": now_ms(),
            "session_id": self.session_id,
            "level": level,
            "event": event,
            "data": data
        })
        .to_string();

        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        rotate_if_needed(&self.path, RUN_LOG_ROTATE_BYTES)?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(format!("{line}\n").as_bytes())?;
        Ok(())
    }
}

fn rotate_if_needed(path: &Path, limit: u64) -> Result<()> {
    let len = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(_) => return Ok(()),
    };
    if len < limit {
        return Ok(());
    }
    rotate_file_backups(path, RUN_LOG_MAX_BACKUPS)?;
    Ok(())
}

fn rotate_file_backups(path: &Path, max_backups: usize) -> std::io::Result<()> {
    if max_backups == 0 {
        let _ = std::fs::remove_file(path);
        return Ok(());
    }

    for i in (1..=max_backups).rev() {
        let dst = path_with_suffix(path, &format!(".{i}"));
        let src = if i == 1 {
            path.to_path_buf()
        } else {
            path_with_suffix(path, &format!(".{}", i - 1))
        };

        if !src.exists() {
            continue;
        }
        if dst.exists() {
            let _ = std::fs::remove_file(&dst);
        }
        std::fs::rename(src, dst)?;
    }
    Ok(())
}

fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let file_name = match path.file_name() {
        Some(n) => n.to_string_lossy().to_string(),
        None => suffix.to_string(),
    };
    path.with_file_name(format!("{file_name}{suffix}"))
}
