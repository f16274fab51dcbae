//! Fetch Executor: runs the external retrieval tool for one video.
//!
//! Every failure mode of the subprocess (missing binary, non-zero exit,
//! hang) comes back as a [`FetchOutcome`] value. Nothing here panics or
//! returns early into the caller's error path.

use crate::config::DownloadSettings;
use crate::paths::AppPaths;
use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

const POLL_INTERVAL_MS: u64 = 200;
const STDERR_TAIL_BYTES: usize = 4096;
const STDERR_DRAIN_MS: u64 = 2000;

pub trait Fetcher: Send + Sync {
    fn fetch(&self, video_id: &str, dest_dir: &Path) -> FetchOutcome;
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch tool is missing (tried: {0})")]
    ToolMissing(String),

    #[error("{program} could not start: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("failed while waiting for fetch tool: {0}")]
    Wait(std::io::Error),

    #[error("fetch tool exited with code {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("fetch tool timed out after {0}s and was killed")]
    TimedOut(u64),

    #[error("could not prepare destination {path}: {source}")]
    Destination {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub struct FetchOutcome {
    /// Command line as it was (or would have been) run; kept for failure logs.
    pub command: String,
    pub result: Result<(), FetchError>,
}

impl FetchOutcome {
    pub fn ok(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            result: Ok(()),
        }
    }

    pub fn failed(command: impl Into<String>, err: FetchError) -> Self {
        Self {
            command: command.into(),
            result: Err(err),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCandidate {
    pub program: PathBuf,
    pub prefix: Vec<String>,
}

impl ToolCandidate {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix: Vec::new(),
        }
    }

    pub fn with_prefix(program: impl Into<PathBuf>, prefix: Vec<String>) -> Self {
        Self {
            program: program.into(),
            prefix,
        }
    }

    fn python_module(python: &str) -> Self {
        Self::with_prefix(python, vec!["-m".to_string(), "yt_dlp".to_string()])
    }
}

/// yt-dlp behind the [`Fetcher`] contract.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    candidates: Vec<ToolCandidate>,
    max_height: u32,
    timeout_secs: u64,
}

impl YtDlpFetcher {
    pub fn new(candidates: Vec<ToolCandidate>, max_height: u32, timeout_secs: u64) -> Self {
        Self {
            candidates,
            max_height,
            timeout_secs,
        }
    }

    pub fn from_settings(paths: &AppPaths, settings: &DownloadSettings) -> Self {
        let candidates = match settings.fetch_tool.as_deref() {
            Some(tool) => vec![ToolCandidate::new(tool)],
            None => {
                let mut candidates = Vec::new();
                let bundled = paths.bundled_yt_dlp_path();
                if bundled.exists() {
                    candidates.push(ToolCandidate::new(bundled));
                }
                candidates.push(ToolCandidate::new("yt-dlp"));
                candidates.push(ToolCandidate::python_module("python"));
                candidates.push(ToolCandidate::python_module("python3"));
                candidates
            }
        };
        Self::new(candidates, settings.max_height, settings.fetch_timeout_secs)
    }

    pub fn candidates(&self) -> &[ToolCandidate] {
        &self.candidates
    }

    pub fn build_args(&self, video_id: &str, dest_dir: &Path) -> Vec<String> {
        let h = self.max_height;
        vec![
            "-f".to_string(),
            format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]"),
            "--no-overwrites".to_string(),
            "--no-progress".to_string(),
            "-o".to_string(),
            dest_dir
                .join("%(id)s.%(ext)s")
                .to_string_lossy()
                .to_string(),
            "--".to_string(),
            video_id.to_string(),
        ]
    }
}

impl Fetcher for YtDlpFetcher {
    fn fetch(&self, video_id: &str, dest_dir: &Path) -> FetchOutcome {
        let args = self.build_args(video_id, dest_dir);
        let first_command = match self.candidates.first() {
            Some(c) => render_command(c, &args),
            None => render_command(&ToolCandidate::new("yt-dlp"), &args),
        };

        if let Err(source) = std::fs::create_dir_all(dest_dir) {
            return FetchOutcome::failed(
                first_command,
                FetchError::Destination {
                    path: dest_dir.to_path_buf(),
                    source,
                },
            );
        }

        let mut tried: Vec<String> = Vec::new();
        for candidate in &self.candidates {
            let command_line = render_command(candidate, &args);
            let mut cmd = background_command(&candidate.program);
            cmd.args(&candidate.prefix);
            cmd.args(&args);

            match run_with_timeout(&mut cmd, self.timeout_secs) {
                Ok(run) if run.status.success() => return FetchOutcome::ok(command_line),
                Ok(run) => {
                    return FetchOutcome::failed(
                        command_line,
                        FetchError::NonZeroExit {
                            code: run.status.code(),
                            stderr: if run.stderr.is_empty() {
                                "unknown error".to_string()
                            } else {
                                run.stderr
                            },
                        },
                    );
                }
                Err(RunError::Spawn(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    tried.push(candidate.program.to_string_lossy().to_string());
                    continue;
                }
                Err(RunError::Spawn(source)) => {
                    return FetchOutcome::failed(
                        command_line,
                        FetchError::Spawn {
                            program: candidate.program.to_string_lossy().to_string(),
                            source,
                        },
                    );
                }
                Err(RunError::Wait(e)) => {
                    return FetchOutcome::failed(command_line, FetchError::Wait(e));
                }
                Err(RunError::TimedOut(limit)) => {
                    return FetchOutcome::failed(command_line, FetchError::TimedOut(limit));
                }
            }
        }

        FetchOutcome::failed(first_command, FetchError::ToolMissing(tried.join(", ")))
    }
}

fn background_command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    configure_for_background(&mut cmd);
    cmd
}

#[cfg(windows)]
fn configure_for_background(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;

    // The job runs unattended; keep the tool from opening a console window.
    cmd.creation_flags(windows_sys::Win32::System::Threading::CREATE_NO_WINDOW);
}

#[cfg(unix)]
fn configure_for_background(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;

    // Own process group, so a timeout can take down whatever the tool spawned.
    cmd.process_group(0);
}

#[cfg(not(any(windows, unix)))]
fn configure_for_background(_cmd: &mut Command) {}

fn render_command(candidate: &ToolCandidate, args: &[String]) -> String {
    std::iter::once(candidate.program.to_string_lossy().to_string())
        .chain(candidate.prefix.iter().cloned())
        .chain(args.iter().cloned())
        .map(|part| shell_quote(&part))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(part: &str) -> String {
    let plain = !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:+,@".contains(c));
    if plain {
        part.to_string()
    } else {
        format!("'{}'", part.replace('\'', r"'\''"))
    }
}

#[derive(Debug)]
enum RunError {
    Spawn(std::io::Error),
    Wait(std::io::Error),
    TimedOut(u64),
}

#[derive(Debug)]
struct RunOutput {
    status: ExitStatus,
    stderr: String,
}

fn run_with_timeout(cmd: &mut Command, timeout_secs: u64) -> Result<RunOutput, RunError> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(RunError::Spawn)?;
    let (stderr_tx, stderr_rx) = mpsc::channel();
    if let Some(mut stderr) = child.stderr.take() {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            let _ = stderr_tx.send(buf);
        });
    }

    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let drain = Duration::from_millis(STDERR_DRAIN_MS);
                let buf = match stderr_rx.recv_timeout(drain) {
                    Ok(buf) => buf,
                    Err(_) => {
                        // Something the tool left behind still holds stderr open.
                        kill_process_group(child.id());
                        stderr_rx.recv_timeout(drain).unwrap_or_default()
                    }
                };
                return Ok(RunOutput {
                    status,
                    stderr: stderr_tail(&buf),
                });
            }
            Ok(None) => {
                if timeout_secs > 0 && started.elapsed() >= Duration::from_secs(timeout_secs) {
                    kill_child_process_tree(&mut child);
                    // Not waiting on the reader: the pipe closes once the group is gone.
                    return Err(RunError::TimedOut(timeout_secs));
                }
                thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
            }
            Err(err) => {
                kill_child_process_tree(&mut child);
                return Err(RunError::Wait(err));
            }
        }
    }
}

fn kill_child_process_tree(child: &mut Child) {
    kill_process_group(child.id());
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(windows)]
fn kill_process_group(pid: u32) {
    let pid = pid.to_string();
    let _ = background_command("taskkill")
        .args(["/PID", &pid, "/T", "/F"])
        .status();
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    // The child leads its own group (see configure_for_background).
    let group = format!("-{pid}");
    let _ = Command::new("kill")
        .args(["-KILL", "--", &group])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(not(any(windows, unix)))]
fn kill_process_group(_pid: u32) {}

fn stderr_tail(buf: &[u8]) -> String {
    let start = buf.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&buf[start..]).trim().to_string()
}
