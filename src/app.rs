//! Wires capture, storage, batch analysis and summaries around one explicitly
//! constructed database handle, and exposes the trigger surface a shell calls.

use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate, NaiveTime};
use log::{error, info, warn};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::Duration,
};
use tokio_util::sync::CancellationToken;

use crate::{
    analysis::{BatchConfig, BatchScheduler},
    capture::{
        CaptureConfig, CaptureController, CaptureStatus, CommandFrameSource, CompletedChunk,
        FrameSource,
    },
    db::{DailySummary, Database},
    extraction::{build_backend, ActivityExtractor, VisionBackend},
    keystore::KeyStore,
    scheduling::spawn_periodic,
    settings::{parse_daily_time, Provider, SettingsStore},
    storage::{ChunkStore, CleanupStats, StorageManager, StorageStats},
    summary::{DailySummaryScheduler, SummaryEngine},
    video::{FfmpegVideoOps, VideoOps},
};

const CHUNK_QUEUE_CAPACITY: usize = 32;
const TASK_JOIN_TIMEOUT_SECS: u64 = 10;

/// Collaborators for [`Dayflow::assemble`]. `backend` drives batch analysis
/// and `summary_backend` the daily recap; either may be absent.
pub struct Components {
    pub settings: SettingsStore,
    pub db: Database,
    pub store: ChunkStore,
    pub source: Arc<dyn FrameSource>,
    pub video: Arc<dyn VideoOps>,
    pub backend: Option<Arc<dyn VisionBackend>>,
    pub summary_backend: Option<Arc<dyn VisionBackend>>,
}

#[derive(Clone)]
pub struct Dayflow {
    settings: Arc<SettingsStore>,
    db: Database,
    storage: StorageManager,
    source: Arc<dyn FrameSource>,
    video: Arc<dyn VideoOps>,
    capture: Arc<Mutex<CaptureController>>,
    chunk_tx: mpsc::Sender<CompletedChunk>,
    batch: Option<BatchScheduler>,
    summaries: DailySummaryScheduler,
    summaries_enabled: bool,
    cancel_token: CancellationToken,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Dayflow {
    /// Opens (or creates) everything under `data_dir` with the real ffmpeg
    /// and screenshot collaborators. Missing credentials disable analysis and
    /// summaries instead of failing.
    pub async fn initialize(data_dir: PathBuf, keys: &dyn KeyStore) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let settings = SettingsStore::new(data_dir.join("settings.json"))?;
        let db = Database::new(data_dir.join("dayflow.db"))?;
        let store = ChunkStore::new(&data_dir);
        store.ensure_layout()?;
        db.ensure_default_categories().await?;

        let recording = settings.recording();
        let source: Arc<dyn FrameSource> = Arc::new(CommandFrameSource::new(
            &recording.capture_command,
            store.temp_dir(),
        )?);
        let video: Arc<dyn VideoOps> = Arc::new(FfmpegVideoOps::default());

        let analysis = settings.analysis();
        let backend = match build_backend(&analysis, &analysis.model_name, keys) {
            Ok(backend) => Some(backend),
            Err(err) => {
                warn!("activity analysis disabled: {err:#}");
                None
            }
        };
        // Local models serve both jobs with the analysis model.
        let summary_model = match analysis.provider {
            Provider::Gemini => settings.summary().model_name,
            Provider::Ollama => analysis.model_name.clone(),
        };
        let summary_backend = if backend.is_some() {
            build_backend(&analysis, &summary_model, keys).ok()
        } else {
            None
        };

        info!("data directory: {}", data_dir.display());
        Ok(Self::assemble(Components {
            settings,
            db,
            store,
            source,
            video,
            backend,
            summary_backend,
        }))
    }

    /// Must be called inside a tokio runtime; spawns the chunk recorder.
    pub fn assemble(components: Components) -> Self {
        let Components {
            settings,
            db,
            store,
            source,
            video,
            backend,
            summary_backend,
        } = components;

        let settings = Arc::new(settings);
        let storage = StorageManager::new(db.clone(), store.clone());
        let cancel_token = CancellationToken::new();
        let analysis = settings.analysis();

        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE_CAPACITY);
        let recorder = tokio::spawn(record_chunks(
            storage.clone(),
            chunk_rx,
            cancel_token.clone(),
        ));

        let batch = backend.map(|backend| {
            let extractor = ActivityExtractor::new(
                backend,
                video.clone(),
                analysis.extraction_timeout(),
                analysis.frame_sample_count,
            );
            BatchScheduler::new(
                db.clone(),
                storage.clone(),
                video.clone(),
                extractor,
                BatchConfig::from_settings(&analysis),
            )
        });

        let summary_settings = settings.summary();
        let summaries_enabled = summary_settings.enabled && summary_backend.is_some();
        let daily_time = parse_daily_time(&summary_settings.daily_time).unwrap_or_else(|err| {
            warn!("{err:#}; using 22:00");
            NaiveTime::from_hms_opt(22, 0, 0).unwrap_or(NaiveTime::MIN)
        });
        let summaries = DailySummaryScheduler::new(
            SummaryEngine::new(db.clone(), summary_backend, analysis.extraction_timeout()),
            daily_time,
        );

        let capture = CaptureController::new(
            capture_config(&settings),
            source.clone(),
            video.clone(),
            store,
            chunk_tx.clone(),
        );

        Self {
            settings,
            db,
            storage,
            source,
            video,
            capture: Arc::new(Mutex::new(capture)),
            chunk_tx,
            batch,
            summaries,
            summaries_enabled,
            cancel_token,
            tasks: Arc::new(Mutex::new(vec![recorder])),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn analysis_enabled(&self) -> bool {
        self.batch.is_some()
    }

    /// Starts the batch, summary and retention schedules that are enabled.
    pub async fn start_schedulers(&self) {
        let mut tasks = self.tasks.lock().await;

        match &self.batch {
            Some(batch) => tasks.push(batch.start(self.cancel_token.child_token())),
            None => warn!("no model backend configured; batch analysis will not run"),
        }

        if self.summaries_enabled {
            tasks.push(self.summaries.start(self.cancel_token.child_token()));
        } else {
            info!("daily summaries are not scheduled");
        }

        let storage = self.storage.clone();
        let settings = self.settings.clone();
        let period = Duration::from_secs(settings.storage().cleanup_interval_minutes.max(1) * 60);
        tasks.push(spawn_periodic(
            "retention",
            period,
            self.cancel_token.child_token(),
            move || {
                let storage = storage.clone();
                let retention_days = settings.recording().retention_days;
                async move {
                    match storage.cleanup(retention_days).await {
                        Ok(stats) if stats.deleted_records > 0 => info!(
                            "retention removed {} chunks ({} bytes)",
                            stats.deleted_records, stats.freed_bytes
                        ),
                        Ok(_) => {}
                        Err(err) => error!("retention cleanup failed: {err:?}"),
                    }
                }
            },
        ));
    }

    pub async fn capture_status(&self) -> CaptureStatus {
        self.capture.lock().await.status()
    }

    /// Begins recording. A stopped controller is replaced by a fresh one
    /// built from the current recording settings.
    pub async fn start_capture(&self) -> bool {
        let mut capture = self.capture.lock().await;
        if capture.status() == CaptureStatus::Stopped {
            *capture = CaptureController::new(
                capture_config(&self.settings),
                self.source.clone(),
                self.video.clone(),
                self.storage.store().clone(),
                self.chunk_tx.clone(),
            );
        }
        capture.start()
    }

    pub async fn pause_capture(&self) -> bool {
        self.capture.lock().await.pause()
    }

    pub async fn resume_capture(&self) -> bool {
        self.capture.lock().await.resume()
    }

    /// Stops recording, waiting a bounded time for the last chunk.
    pub async fn stop_capture(&self) {
        let flush_timeout = Duration::from_secs(self.settings.recording().stop_flush_timeout_secs);
        self.capture.lock().await.stop(flush_timeout).await;
    }

    /// Analyzes the last interval, or a whole day when `date` is given.
    /// Returns the number of activities created.
    pub async fn run_batch_now(&self, date: Option<NaiveDate>) -> Result<usize> {
        let batch = self
            .batch
            .as_ref()
            .ok_or_else(|| anyhow!("activity analysis is disabled: no model backend configured"))?;
        Ok(match date {
            Some(date) => batch.backfill(date).await,
            None => batch.trigger().await.activities(),
        })
    }

    /// Regenerates the summary for `date` (default: today).
    pub async fn generate_summary_now(&self, date: Option<NaiveDate>) -> Result<DailySummary> {
        let date = date.unwrap_or_else(|| Local::now().date_naive());
        self.summaries.generate_now(date).await
    }

    pub async fn get_summary(&self, date: NaiveDate) -> Result<Option<DailySummary>> {
        self.summaries.engine().get_summary(date).await
    }

    pub async fn save_user_notes(&self, date: NaiveDate, notes: String) -> Result<DailySummary> {
        self.summaries.engine().save_user_notes(date, notes).await
    }

    /// Moves the daily summary to `HH:MM`, persisting the setting.
    pub fn reschedule_summary(&self, daily_time: &str) -> Result<()> {
        let time = self.settings.update_summary_time(daily_time)?;
        self.summaries.reschedule(time);
        Ok(())
    }

    pub async fn storage_stats(&self) -> StorageStats {
        self.storage.storage_stats().await
    }

    pub async fn cleanup_now(&self) -> Result<CleanupStats> {
        self.storage
            .cleanup(self.settings.recording().retention_days)
            .await
    }

    pub async fn export_date(&self, date: NaiveDate) -> Result<PathBuf> {
        self.storage.export_date(date).await
    }

    pub async fn test_connection(&self) -> bool {
        match &self.batch {
            Some(batch) => batch.test_connection().await,
            None => false,
        }
    }

    /// Flushes capture, then stops every background task. Jobs still running
    /// after the join timeout are abandoned.
    pub async fn shutdown(&self) {
        info!("shutting down");
        self.stop_capture().await;
        self.cancel_token.cancel();

        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            match tokio::time::timeout(Duration::from_secs(TASK_JOIN_TIMEOUT_SECS), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("background task failed: {err}"),
                Err(_) => warn!("background task did not stop in time"),
            }
        }
    }
}

fn capture_config(settings: &SettingsStore) -> CaptureConfig {
    let recording = settings.recording();
    CaptureConfig {
        frame_interval: recording.frame_interval(),
        chunk_duration: recording.chunk_duration(),
        display_id: recording.display_id,
    }
}

/// Indexes finished chunks. A chunk whose row cannot be written is deleted so
/// files and rows stay in step. Chunks queued at cancellation are still
/// recorded.
async fn record_chunks(
    storage: StorageManager,
    mut chunk_rx: mpsc::Receiver<CompletedChunk>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            chunk = chunk_rx.recv() => match chunk {
                Some(chunk) => record_chunk(&storage, chunk).await,
                None => break,
            },
            _ = cancel_token.cancelled() => {
                while let Ok(chunk) = chunk_rx.try_recv() {
                    record_chunk(&storage, chunk).await;
                }
                break;
            }
        }
    }
}

async fn record_chunk(storage: &StorageManager, chunk: CompletedChunk) {
    let result = storage
        .save_chunk(
            chunk.file_path.clone(),
            chunk.start_time,
            chunk.end_time,
            chunk.display_id,
        )
        .await;
    if let Err(err) = result {
        error!(
            "failed to index chunk {}: {err:?}",
            chunk.file_path.display()
        );
        if let Err(err) = std::fs::remove_file(&chunk.file_path) {
            warn!(
                "failed to remove unindexed chunk {}: {err}",
                chunk.file_path.display()
            );
        }
    }
}
