use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};

use crate::utils::timestamps::{date_folder, file_timestamp};

const RECORDINGS_DIR: &str = "recordings";
const TIMELAPSES_DIR: &str = "timelapses";
const TEMP_DIR: &str = "temp";
const EXPORTS_DIR: &str = "exports";

/// On-disk layout under the data directory:
///
/// ```text
/// recordings/YYYY-MM-DD/chunks/chunk_YYYYMMDD_HHMMSS.mp4
/// timelapses/YYYY-MM-DD/activity_YYYYMMDD_HHMMSS.mp4
/// temp/batch_YYYYMMDD_HHMMSS.mp4
/// exports/dayflow_export_YYYY-MM-DD.zip
/// ```
///
/// Date folders and file names follow the local clock.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    base_dir: PathBuf,
}

impl ChunkStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn recordings_root(&self) -> PathBuf {
        self.base_dir.join(RECORDINGS_DIR)
    }

    pub fn timelapses_root(&self) -> PathBuf {
        self.base_dir.join(TIMELAPSES_DIR)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.base_dir.join(TEMP_DIR)
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.base_dir.join(EXPORTS_DIR)
    }

    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.recordings_root(),
            self.timelapses_root(),
            self.temp_dir(),
            self.exports_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn recordings_dir_for(&self, date: NaiveDate) -> PathBuf {
        self.recordings_root().join(date.format("%Y-%m-%d").to_string())
    }

    pub fn timelapses_dir_for(&self, date: NaiveDate) -> PathBuf {
        self.timelapses_root().join(date.format("%Y-%m-%d").to_string())
    }

    pub fn chunks_dir(&self, at: DateTime<Utc>) -> PathBuf {
        self.recordings_root().join(date_folder(at)).join("chunks")
    }

    /// Path for a chunk starting at `start`; the date folder is created.
    pub fn chunk_path(&self, start: DateTime<Utc>) -> Result<PathBuf> {
        let dir = self.chunks_dir(start);
        create(&dir)?;
        Ok(dir.join(format!("chunk_{}.mp4", file_timestamp(start))))
    }

    /// First free timelapse name for an activity starting at `start`.
    /// Activities in the same second get `_1`, `_2`, ... after the stamp.
    pub fn timelapse_path(&self, start: DateTime<Utc>) -> Result<PathBuf> {
        let dir = self.timelapses_root().join(date_folder(start));
        create(&dir)?;
        let stamp = file_timestamp(start);
        let mut path = dir.join(format!("activity_{stamp}.mp4"));
        let mut counter = 1;
        while path.exists() {
            path = dir.join(format!("activity_{stamp}_{counter}.mp4"));
            counter += 1;
        }
        Ok(path)
    }

    pub fn batch_path(&self, window_start: DateTime<Utc>) -> Result<PathBuf> {
        let dir = self.temp_dir();
        create(&dir)?;
        Ok(dir.join(format!("batch_{}.mp4", file_timestamp(window_start))))
    }

    /// Scratch directory for still frames; callers remove it when done.
    pub fn staging_dir(&self, label: &str, at: DateTime<Utc>) -> Result<PathBuf> {
        let dir = self
            .temp_dir()
            .join(format!("{label}_{}", at.format("%Y%m%d_%H%M%S_%3f")));
        create(&dir)?;
        Ok(dir)
    }

    pub fn export_path(&self, date: NaiveDate) -> Result<PathBuf> {
        let dir = self.exports_dir();
        create(&dir)?;
        Ok(dir.join(format!("dayflow_export_{}.zip", date.format("%Y-%m-%d"))))
    }
}

fn create(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))
}
