use crate::paths::AppPaths;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const MAX_MAX_CONCURRENCY: usize = 16;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 7200;
pub const DEFAULT_MAX_HEIGHT: u32 = 1080;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Directory the fetch tool writes `<id>.<ext>` files into.
    pub videos_dir: Option<String>,
    pub max_concurrency: usize,
    /// Per-video limit for the fetch tool; 0 disables the limit.
    pub fetch_timeout_secs: u64,
    /// Vertical resolution ceiling passed to the fetch tool.
    pub max_height: u32,
    /// Explicit fetch tool executable. When unset the bundled tool and
    /// the usual `yt-dlp` install locations are tried in order.
    pub fetch_tool: Option<String>,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            videos_dir: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            max_height: DEFAULT_MAX_HEIGHT,
            fetch_tool: None,
        }
    }
}

impl DownloadSettings {
    pub fn normalized(mut self) -> Self {
        self.max_concurrency = clamp_concurrency(self.max_concurrency);
        if self.max_height == 0 {
            self.max_height = DEFAULT_MAX_HEIGHT;
        }
        self.videos_dir = trim_to_option(self.videos_dir);
        self.fetch_tool = trim_to_option(self.fetch_tool);
        self
    }
}

pub fn clamp_concurrency(value: usize) -> usize {
    value.clamp(1, MAX_MAX_CONCURRENCY)
}

pub fn load_download_settings(paths: &AppPaths) -> Result<DownloadSettings> {
    let path = paths.download_settings_path();
    if !path.exists() {
        return Ok(DownloadSettings::default());
    }
    let bytes = std::fs::read(&path)?;
    let parsed: DownloadSettings = serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::InvalidConfig(format!(
            "failed to parse download settings at {}: {e}",
            path.to_string_lossy()
        ))
    })?;
    Ok(parsed.normalized())
}

pub fn save_download_settings(paths: &AppPaths, settings: &DownloadSettings) -> Result<()> {
    let path = paths.download_settings_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(&path, format!("{json}\n"))?;
    Ok(())
}

fn trim_to_option(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let t = v.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let settings = load_download_settings(&paths).expect("load");
        assert_eq!(settings, DownloadSettings::default());
    }

    #[test]
    fn saved_settings_are_normalized_on_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let settings = DownloadSettings {
            videos_dir: Some("  ".to_string()),
            max_concurrency: 64,
            fetch_timeout_secs: 30,
            max_height: 720,
            fetch_tool: Some(" /opt/yt-dlp ".to_string()),
        };
        save_download_settings(&paths, &settings).expect("save");

        let loaded = load_download_settings(&paths).expect("load");
        assert_eq!(loaded.videos_dir, None);
        assert_eq!(loaded.max_concurrency, MAX_MAX_CONCURRENCY);
        assert_eq!(loaded.fetch_timeout_secs, 30);
        assert_eq!(loaded.max_height, 720);
        assert_eq!(loaded.fetch_tool.as_deref(), Some("/opt/yt-dlp"));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        std::fs::create_dir_all(paths.config_dir()).expect("config dir");
        std::fs::write(paths.download_settings_path(), r#"{ "max_concurrency": 0 }"#)
            .expect("write");

        let loaded = load_download_settings(&paths).expect("load");
        assert_eq!(loaded.max_concurrency, 1);
        assert_eq!(loaded.fetch_timeout_secs, DEFAULT_FETCH_TIMEOUT_SECS);
        assert_eq!(loaded.max_height, DEFAULT_MAX_HEIGHT);
    }

    #[test]
    fn garbage_file_is_invalid_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(PathBuf::from(dir.path()));
        std::fs::create_dir_all(paths.config_dir()).expect("config dir");
        std::fs::write(paths.download_settings_path(), "not json").expect("write");

        let err = load_download_settings(&paths).expect_err("should fail");
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }
}
