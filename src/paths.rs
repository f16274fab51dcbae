use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_dir: PathBuf,
}

impl AppPaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    pub fn download_settings_path(&self) -> PathBuf {
        self.config_dir().join("download.json")
    }

    pub fn db_dir(&self) -> PathBuf {
        self.base_dir.join("db")
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_dir().join("softtube.sqlite")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn download_log_path(&self) -> PathBuf {
        self.logs_dir().join("download.jsonl")
    }

    pub fn default_videos_dir(&self) -> PathBuf {
        self.base_dir.join("videos")
    }

    /// Resolves the videos directory, preferring an explicit override.
    pub fn videos_dir(&self, override_dir: Option<&str>) -> PathBuf {
        match override_dir.map(str::trim) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => self.default_videos_dir(),
        }
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.base_dir.join("tools")
    }

    pub fn bundled_yt_dlp_path(&self) -> PathBuf {
        let mut path = self.tools_dir().join("yt-dlp").join("yt-dlp");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.config_dir())?;
        std::fs::create_dir_all(self.db_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }

    /// Anchors a relative base dir at `cwd`.
    pub fn normalize_base_dir(base_dir: &Path, cwd: &Path) -> PathBuf {
        if base_dir.is_absolute() {
            base_dir.to_path_buf()
        } else {
            cwd.join(base_dir)
        }
    }
}
