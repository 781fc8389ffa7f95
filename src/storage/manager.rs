use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{info, warn};
use serde::Serialize;
use sysinfo::Disks;
use walkdir::WalkDir;

use crate::{
    db::{Database, NewRecordingChunk, RecordingChunk},
    scheduling::SingleFlight,
    utils::timestamps::local_date,
};

use super::{export::write_archive, layout::ChunkStore};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupStats {
    pub deleted_files: usize,
    pub deleted_records: usize,
    pub freed_bytes: u64,
    pub removed_dirs: usize,
    /// Another cleanup was already running.
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub recordings_bytes: u64,
    pub timelapses_bytes: u64,
    pub chunk_count: u64,
    pub activity_count: u64,
    pub disk_available_bytes: Option<u64>,
}

/// Index of recorded chunks plus the retention and reporting jobs that
/// operate on it.
#[derive(Clone)]
pub struct StorageManager {
    db: Database,
    store: ChunkStore,
    cleanup_flight: SingleFlight,
}

impl StorageManager {
    pub fn new(db: Database, store: ChunkStore) -> Self {
        Self {
            db,
            store,
            cleanup_flight: SingleFlight::new(),
        }
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Indexes a finished chunk file. The file must already exist.
    pub async fn save_chunk(
        &self,
        file_path: PathBuf,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        display_id: u32,
    ) -> Result<RecordingChunk> {
        let file_size_bytes = tokio::fs::metadata(&file_path)
            .await
            .with_context(|| format!("chunk file missing: {}", file_path.display()))?
            .len();

        self.db
            .insert_chunk(&NewRecordingChunk {
                start_time,
                end_time,
                file_path,
                display_id,
                file_size_bytes,
            })
            .await
    }

    /// Chunks fully inside `[start, end]`, in start-time order.
    pub async fn chunks_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        display_id: Option<u32>,
    ) -> Result<Vec<RecordingChunk>> {
        self.db.get_chunks_in_range(start, end, display_id).await
    }

    /// Chunks whose start falls in `[start, end)`, in start-time order.
    pub async fn chunks_starting_in(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RecordingChunk>> {
        self.db.get_chunks_starting_in(start, end).await
    }

    /// Chunks no batch run has covered yet whose start falls in
    /// `[start, end)`, in start-time order.
    pub async fn unanalyzed_chunks(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RecordingChunk>> {
        self.db.get_unanalyzed_chunks(start, end).await
    }

    pub async fn mark_analyzed(&self, chunks: &[RecordingChunk]) -> Result<usize> {
        let ids = chunks.iter().map(|chunk| chunk.id).collect();
        self.db.mark_chunks_analyzed(ids, Utc::now()).await
    }

    /// Deletes chunks older than `retention_days`. A concurrent call returns
    /// immediately with `skipped` set.
    pub async fn cleanup(&self, retention_days: u32) -> Result<CleanupStats> {
        let Some(_guard) = self.cleanup_flight.try_acquire() else {
            info!("Cleanup already running, skipping");
            return Ok(CleanupStats {
                skipped: true,
                ..CleanupStats::default()
            });
        };

        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        self.cleanup_before(cutoff).await
    }

    /// Files go first; rows are deleted only for chunks whose file is gone,
    /// so an interruption can leave orphaned files but never dangling rows
    /// pointing at deleted data.
    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<CleanupStats> {
        let expired = self.db.get_chunks_before(cutoff).await?;
        let mut stats = CleanupStats::default();
        let mut removable = Vec::with_capacity(expired.len());

        for chunk in &expired {
            match tokio::fs::metadata(&chunk.file_path).await {
                Ok(metadata) => match tokio::fs::remove_file(&chunk.file_path).await {
                    Ok(()) => {
                        stats.deleted_files += 1;
                        stats.freed_bytes += metadata.len();
                        removable.push(chunk.id);
                    }
                    Err(err) => {
                        warn!(
                            "Failed to delete chunk {}: {err}",
                            chunk.file_path.display()
                        );
                    }
                },
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    removable.push(chunk.id);
                }
                Err(err) => {
                    warn!("Failed to stat chunk {}: {err}", chunk.file_path.display());
                }
            }
        }

        stats.deleted_records = self.db.delete_chunks(removable).await?;

        let recordings_root = self.store.recordings_root();
        stats.removed_dirs = tokio::task::spawn_blocking(move || remove_empty_dirs(&recordings_root))
            .await
            .context("empty directory sweep failed to join")?;

        info!(
            "Cleanup removed {} files ({} bytes), {} records, {} directories",
            stats.deleted_files, stats.freed_bytes, stats.deleted_records, stats.removed_dirs
        );
        Ok(stats)
    }

    /// Usage report; any failing part reads as zero rather than failing the
    /// whole report.
    pub async fn storage_stats(&self) -> StorageStats {
        let recordings = self.store.recordings_root();
        let timelapses = self.store.timelapses_root();
        let base_dir = self.store.base_dir().to_path_buf();

        let sizes = tokio::task::spawn_blocking(move || {
            (
                dir_size(&recordings),
                dir_size(&timelapses),
                available_space(&base_dir),
            )
        })
        .await;
        let (recordings_bytes, timelapses_bytes, disk_available_bytes) = match sizes {
            Ok(values) => values,
            Err(err) => {
                warn!("Storage size scan failed: {err}");
                (0, 0, None)
            }
        };

        let chunk_count = self.db.count_chunks().await.unwrap_or_else(|err| {
            warn!("Failed to count chunks: {err:?}");
            0
        });
        let activity_count = self.db.count_activities().await.unwrap_or_else(|err| {
            warn!("Failed to count activities: {err:?}");
            0
        });

        StorageStats {
            recordings_bytes,
            timelapses_bytes,
            chunk_count,
            activity_count,
            disk_available_bytes,
        }
    }

    /// Zips the recordings and timelapses of one local date.
    pub async fn export_date(&self, date: NaiveDate) -> Result<PathBuf> {
        let base_dir = self.store.base_dir().to_path_buf();
        let recordings = self.store.recordings_dir_for(date);
        let timelapses = self.store.timelapses_dir_for(date);
        let destination = self.store.export_path(date)?;

        let target = destination.clone();
        let count = tokio::task::spawn_blocking(move || {
            write_archive(
                &base_dir,
                &[recordings.as_path(), timelapses.as_path()],
                &target,
            )
        })
        .await
        .context("export worker failed to join")?
        .with_context(|| format!("export for {date} failed"))?;

        info!("Exported {count} files for {date} to {}", destination.display());
        Ok(destination)
    }

    /// Local dates of the earliest and latest recorded chunk.
    pub async fn date_range(&self) -> Result<Option<(NaiveDate, NaiveDate)>> {
        let range = self.db.get_chunk_date_range().await?;
        Ok(range.map(|(earliest, latest)| (local_date(earliest), local_date(latest))))
    }
}

fn dir_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

/// Removes empty directories below `root` (never `root` itself).
fn remove_empty_dirs(root: &Path) -> usize {
    let mut removed = 0;
    for entry in WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        if !entry.file_type().is_dir() {
            continue;
        }
        let is_empty = std::fs::read_dir(entry.path())
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if is_empty && std::fs::remove_dir(entry.path()).is_ok() {
            removed += 1;
        }
    }
    removed
}

/// Free space on the volume holding `path`: the disk with the longest mount
/// point that prefixes it.
fn available_space(path: &Path) -> Option<u64> {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}
