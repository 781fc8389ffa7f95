use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{error, info, warn};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    db::{Database, RecordingChunk, TimelineActivity},
    extraction::{prompt::build_context, ActivityExtractor, ActivitySegment},
    scheduling::{spawn_periodic, SingleFlight},
    settings::AnalysisSettings,
    storage::StorageManager,
    utils::timestamps::{local_day_bounds, parse_file_timestamp},
    video::{ClipRange, VideoOps},
};

use super::{BatchOutcome, BatchStage};

const CONTEXT_ACTIVITIES: usize = 3;
/// Periodic runs look this many intervals back, so a chunk still being
/// encoded when one run fires is picked up by the next.
const LOOKBACK_INTERVALS: i32 = 2;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub interval: Duration,
    pub timelapse_speedup: f64,
}

impl BatchConfig {
    pub fn from_settings(settings: &AnalysisSettings) -> Self {
        Self {
            interval: settings.interval(),
            timelapse_speedup: settings.timelapse_speedup,
        }
    }

    fn window(&self) -> Duration {
        self.interval.max(Duration::minutes(1))
    }
}

/// Turns recorded chunks into timeline activities, one time window at a time:
/// collect the window's chunks, merge them, extract activities, then write a
/// timelapse and a row per activity. At most one window is processed at once.
#[derive(Clone)]
pub struct BatchScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    db: Database,
    storage: StorageManager,
    video: Arc<dyn VideoOps>,
    extractor: ActivityExtractor,
    config: BatchConfig,
    flight: SingleFlight,
    stage_tx: watch::Sender<BatchStage>,
}

#[derive(Debug, Clone, Copy)]
enum Selection {
    /// Chunks no completed run has covered yet.
    Unanalyzed,
    /// Every chunk starting in the window.
    All,
}

/// Removes a temporary file or directory when dropped.
struct TempPath(PathBuf);

impl TempPath {
    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        let result = if self.0.is_dir() {
            std::fs::remove_dir_all(&self.0)
        } else {
            std::fs::remove_file(&self.0)
        };
        if let Err(err) = result {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove temp path {}: {err}", self.0.display());
            }
        }
    }
}

/// Removes a timelapse whose activity row was never written.
fn discard_timelapse(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(err) => {
            warn!("failed to remove orphaned timelapse {}: {err}", path.display());
            false
        }
    }
}

fn offset_secs(offset: Duration) -> f64 {
    offset.num_milliseconds() as f64 / 1000.0
}

impl BatchScheduler {
    pub fn new(
        db: Database,
        storage: StorageManager,
        video: Arc<dyn VideoOps>,
        extractor: ActivityExtractor,
        config: BatchConfig,
    ) -> Self {
        let (stage_tx, _) = watch::channel(BatchStage::Idle);
        Self {
            inner: Arc::new(Inner {
                db,
                storage,
                video,
                extractor,
                config,
                flight: SingleFlight::new(),
                stage_tx,
            }),
        }
    }

    pub fn stage(&self) -> BatchStage {
        *self.inner.stage_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchStage> {
        self.inner.stage_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.flight.is_busy()
    }

    pub async fn test_connection(&self) -> bool {
        self.inner.extractor.test_connection().await
    }

    /// Runs every interval until `cancel_token` fires.
    pub fn start(&self, cancel_token: CancellationToken) -> JoinHandle<()> {
        let period = self
            .inner
            .config
            .window()
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(15 * 60));
        let scheduler = self.clone();
        info!("batch scheduler every {}s", period.as_secs());
        spawn_periodic("batch scheduler", period, cancel_token, move || {
            let scheduler = scheduler.clone();
            async move {
                scheduler.trigger().await;
            }
        })
    }

    pub async fn trigger(&self) -> BatchOutcome {
        self.trigger_at(Utc::now()).await
    }

    /// Processes the chunks started before `now` that no run has covered
    /// yet. Dropped with `Skipped` when a run or backfill is already in
    /// progress.
    pub async fn trigger_at(&self, now: DateTime<Utc>) -> BatchOutcome {
        let Some(_guard) = self.inner.flight.try_acquire() else {
            info!("batch run already in progress, skipping trigger");
            return BatchOutcome::Skipped;
        };
        let start = now - self.inner.config.window() * LOOKBACK_INTERVALS;
        self.run_window(start, now, Selection::Unanalyzed).await
    }

    /// Re-runs a whole local calendar day in interval-sized windows from
    /// midnight. Waits for any run in progress. Returns the number of
    /// activities created.
    pub async fn backfill(&self, date: NaiveDate) -> usize {
        let _guard = self.inner.flight.acquire().await;
        let (day_start, day_end) = local_day_bounds(date);
        let step = self.inner.config.window();

        let mut total = 0;
        let mut window_start = day_start;
        while window_start < day_end {
            let window_end = (window_start + step).min(day_end);
            total += self
                .run_window(window_start, window_end, Selection::All)
                .await
                .activities();
            window_start = window_end;
        }

        info!("backfill for {date} created {total} activities");
        total
    }

    fn set_stage(&self, stage: BatchStage) {
        self.inner.stage_tx.send_replace(stage);
    }

    async fn run_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        selection: Selection,
    ) -> BatchOutcome {
        let outcome = self.process_window(start, end, selection).await;
        self.set_stage(BatchStage::Idle);

        match &outcome {
            BatchOutcome::Aborted(reason) => {
                error!("batch [{start}, {end}) aborted: {reason}")
            }
            BatchOutcome::Completed { activities } => {
                info!("batch [{start}, {end}) produced {activities} activities")
            }
            BatchOutcome::NoChunks | BatchOutcome::Skipped => {}
        }
        outcome
    }

    async fn process_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        selection: Selection,
    ) -> BatchOutcome {
        let inner = &self.inner;

        self.set_stage(BatchStage::Collecting);
        let listed = match selection {
            Selection::Unanalyzed => inner.storage.unanalyzed_chunks(start, end).await,
            Selection::All => inner.storage.chunks_starting_in(start, end).await,
        };
        let chunks = match listed {
            Ok(chunks) => chunks,
            Err(err) => return BatchOutcome::Aborted(format!("cannot list chunks: {err:#}")),
        };
        if chunks.is_empty() {
            return BatchOutcome::NoChunks;
        }
        if let Some(missing) = chunks.iter().find(|chunk| !chunk.file_path.exists()) {
            return BatchOutcome::Aborted(format!(
                "chunk file missing: {}",
                missing.file_path.display()
            ));
        }

        self.set_stage(BatchStage::Merging);
        let batch = match self.merge(&chunks).await {
            Ok(batch) => batch,
            Err(err) => return BatchOutcome::Aborted(format!("{err:#}")),
        };

        let first_start = chunks[0].start_time;
        let context = match inner
            .db
            .get_recent_activities(first_start, CONTEXT_ACTIVITIES)
            .await
        {
            Ok(recent) => build_context(&recent),
            Err(err) => {
                warn!("cannot load recent activities for context: {err:?}");
                None
            }
        };

        self.set_stage(BatchStage::Extracting);
        let scratch = match inner.storage.store().staging_dir("frames", first_start) {
            Ok(dir) => TempPath(dir),
            Err(err) => return BatchOutcome::Aborted(format!("{err:#}")),
        };
        let segments = inner
            .extractor
            .extract(batch.path(), context.as_deref(), scratch.path())
            .await;
        drop(scratch);

        if segments.is_empty() {
            return self.complete(&chunks, 0).await;
        }

        self.set_stage(BatchStage::Persisting);
        let base = parse_file_timestamp(batch.path()).unwrap_or(first_start);
        let mut persisted = 0;
        for segment in &segments {
            match self.persist(segment, batch.path(), base).await {
                Ok(()) => persisted += 1,
                Err(err) => error!("failed to save activity '{}': {err:?}", segment.title),
            }
        }

        self.complete(&chunks, persisted).await
    }

    /// Marks the run's chunks so later periodic runs skip them.
    async fn complete(&self, chunks: &[RecordingChunk], activities: usize) -> BatchOutcome {
        if let Err(err) = self.inner.storage.mark_analyzed(chunks).await {
            warn!("failed to mark {} chunks analysed: {err:?}", chunks.len());
        }
        BatchOutcome::Completed { activities }
    }

    /// Concatenates the chunks into a temp file named from the first chunk's
    /// start, which is the time base the extractor reads back.
    async fn merge(&self, chunks: &[RecordingChunk]) -> Result<TempPath> {
        let output = self.inner.storage.store().batch_path(chunks[0].start_time)?;
        let batch = TempPath(output.clone());

        let inputs: Vec<PathBuf> = chunks.iter().map(|chunk| chunk.file_path.clone()).collect();
        self.inner
            .video
            .merge_files(&inputs, &output)
            .await
            .with_context(|| format!("failed to merge {} chunks", inputs.len()))?;

        let size = std::fs::metadata(&output).map(|meta| meta.len()).unwrap_or(0);
        if size == 0 {
            bail!("merge produced no output at {}", output.display());
        }
        Ok(batch)
    }

    async fn persist(
        &self,
        segment: &ActivitySegment,
        batch: &Path,
        base: DateTime<Utc>,
    ) -> Result<()> {
        let timelapse_path = self.render_timelapse(segment, batch, base).await;
        let category_id = self.inner.db.resolve_category(segment.category).await?;

        let now = Utc::now();
        let activity = TimelineActivity {
            id: Uuid::new_v4().to_string(),
            start_time: segment.start_time,
            end_time: segment.end_time,
            title: segment.title.clone(),
            summary: segment.summary.clone(),
            category_id,
            timelapse_path: timelapse_path.clone(),
            created_at: now,
            updated_at: now,
        };

        if let Err(err) = self.inner.db.insert_activity(&activity).await {
            if let Some(path) = timelapse_path {
                discard_timelapse(&path);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Failures leave the activity without a timelapse.
    async fn render_timelapse(
        &self,
        segment: &ActivitySegment,
        batch: &Path,
        base: DateTime<Utc>,
    ) -> Option<PathBuf> {
        let output = match self.inner.storage.store().timelapse_path(segment.start_time) {
            Ok(path) => path,
            Err(err) => {
                warn!("no timelapse for '{}': {err:?}", segment.title);
                return None;
            }
        };

        let clip = ClipRange::new(
            offset_secs(segment.start_time - base),
            offset_secs(segment.end_time - base),
        );
        match self
            .inner
            .video
            .speed_up(batch, &output, self.inner.config.timelapse_speedup, clip)
            .await
        {
            Ok(()) => Some(output),
            Err(err) => {
                warn!("timelapse for '{}' failed: {err:?}", segment.title);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::CategoryKind,
        storage::ChunkStore,
        testing::{FakeBackend, FakeVideoOps},
        utils::timestamps::local_to_utc,
    };
    use std::time::Duration as StdDuration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    struct Harness {
        _dir: TempDir,
        db: Database,
        storage: StorageManager,
        video: Arc<FakeVideoOps>,
    }

    fn harness() -> Harness {
        harness_with(FakeVideoOps::default())
    }

    fn harness_with(video: FakeVideoOps) -> Harness {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("dayflow.db")).unwrap();
        let store = ChunkStore::new(dir.path().join("data"));
        store.ensure_layout().unwrap();
        let storage = StorageManager::new(db.clone(), store);
        Harness {
            _dir: dir,
            db,
            storage,
            video: Arc::new(video),
        }
    }

    impl Harness {
        fn scheduler(&self, backend: Arc<FakeBackend>, interval_minutes: i64) -> BatchScheduler {
            let extractor = ActivityExtractor::new(
                backend,
                self.video.clone(),
                StdDuration::from_secs(30),
                4,
            );
            BatchScheduler::new(
                self.db.clone(),
                self.storage.clone(),
                self.video.clone(),
                extractor,
                BatchConfig {
                    interval: Duration::minutes(interval_minutes),
                    timelapse_speedup: 20.0,
                },
            )
        }

        async fn seed_chunks(&self, start: DateTime<Utc>, count: i64) -> Vec<RecordingChunk> {
            let mut chunks = Vec::new();
            for i in 0..count {
                let chunk_start = start + Duration::minutes(15 * i);
                let path = self.storage.store().chunk_path(chunk_start).unwrap();
                std::fs::write(&path, format!("chunk {i}")).unwrap();
                chunks.push(
                    self.storage
                        .save_chunk(path, chunk_start, chunk_start + Duration::minutes(15), 1)
                        .await
                        .unwrap(),
                );
            }
            chunks
        }

        fn leftover_batches(&self) -> usize {
            std::fs::read_dir(self.storage.store().temp_dir())
                .unwrap()
                .filter_map(|entry| entry.ok())
                .count()
        }
    }

    fn midnight() -> DateTime<Utc> {
        local_to_utc(
            NaiveDate::from_ymd_opt(2026, 3, 2)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        )
    }

    const TWO_ACTIVITIES: &str = r#"Sure! Here is the timeline:
[
  {"start_minutes": 0, "end_minutes": 20, "title": "Refactoring the parser", "summary": "Worked on Rust code.", "category": "coding"},
  {"start_minutes": 20, "end_minutes": 55, "title": "Team sync", "summary": "Weekly call.", "category": "Meeting"}
]"#;

    #[tokio::test]
    async fn hour_window_becomes_two_activities_with_timelapses() {
        let h = harness();
        h.seed_chunks(midnight(), 4).await;
        let backend = Arc::new(FakeBackend::video(TWO_ACTIVITIES));
        let scheduler = h.scheduler(backend, 60);

        let outcome = scheduler.trigger_at(midnight() + Duration::hours(1)).await;
        assert_eq!(outcome, BatchOutcome::Completed { activities: 2 });
        assert_eq!(scheduler.stage(), BatchStage::Idle);

        let activities = h
            .db
            .get_activities_between(midnight(), midnight() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(activities.len(), 2);

        let first = &activities[0];
        assert_eq!(first.activity.start_time, midnight());
        assert_eq!(first.activity.end_time, midnight() + Duration::minutes(20));
        assert_eq!(
            first.category.as_ref().map(|c| c.name.as_str()),
            Some(CategoryKind::Work.as_str())
        );

        let second = &activities[1];
        assert_eq!(second.activity.start_time, midnight() + Duration::minutes(20));
        assert_eq!(second.activity.end_time, midnight() + Duration::minutes(55));
        assert_eq!(
            second.category.as_ref().map(|c| c.name.as_str()),
            Some(CategoryKind::Meeting.as_str())
        );

        for item in &activities {
            let path = item.activity.timelapse_path.as_ref().unwrap();
            assert!(path.exists());
            assert_eq!(
                path.parent().unwrap().file_name().unwrap().to_string_lossy(),
                "2026-03-02"
            );
        }

        let clips: Vec<_> = h.video.speed_ups().into_iter().map(|(_, clip)| clip).collect();
        assert_eq!(
            clips,
            vec![ClipRange::new(0.0, 1200.0), ClipRange::new(1200.0, 3300.0)]
        );
        assert_eq!(h.leftover_batches(), 0);
    }

    #[tokio::test]
    async fn empty_window_completes_without_calling_the_model() {
        let h = harness();
        let backend = Arc::new(FakeBackend::video(TWO_ACTIVITIES));
        let scheduler = h.scheduler(backend.clone(), 15);

        let outcome = scheduler.trigger_at(midnight() + Duration::hours(1)).await;
        assert_eq!(outcome, BatchOutcome::NoChunks);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn overlapping_trigger_is_dropped() {
        let h = harness();
        h.seed_chunks(midnight(), 1).await;
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(FakeBackend::video("[]").with_gate(gate.clone()));
        let started = backend.started();
        let scheduler = h.scheduler(backend.clone(), 15);

        let running = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                scheduler
                    .trigger_at(midnight() + Duration::minutes(15))
                    .await
            })
        };
        started.notified().await;

        assert!(scheduler.is_running());
        assert_eq!(scheduler.stage(), BatchStage::Extracting);
        assert_eq!(
            scheduler.trigger_at(midnight() + Duration::minutes(15)).await,
            BatchOutcome::Skipped
        );

        gate.notify_one();
        assert_eq!(
            running.await.unwrap(),
            BatchOutcome::Completed { activities: 0 }
        );
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn extraction_failure_persists_nothing_and_cleans_up() {
        let h = harness();
        h.seed_chunks(midnight(), 2).await;
        let scheduler = h.scheduler(Arc::new(FakeBackend::failing()), 30);

        let outcome = scheduler.trigger_at(midnight() + Duration::minutes(30)).await;
        assert_eq!(outcome, BatchOutcome::Completed { activities: 0 });
        assert_eq!(h.db.count_activities().await.unwrap(), 0);
        assert_eq!(h.leftover_batches(), 0);
    }

    #[tokio::test]
    async fn missing_chunk_file_aborts_before_merge() {
        let h = harness();
        let chunks = h.seed_chunks(midnight(), 2).await;
        std::fs::remove_file(&chunks[1].file_path).unwrap();
        let backend = Arc::new(FakeBackend::video(TWO_ACTIVITIES));
        let scheduler = h.scheduler(backend.clone(), 30);

        let outcome = scheduler.trigger_at(midnight() + Duration::minutes(30)).await;
        assert!(matches!(outcome, BatchOutcome::Aborted(_)));
        assert_eq!(backend.calls(), 0);
        assert_eq!(h.db.count_activities().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn merge_failure_aborts_the_run() {
        let h = harness_with(FakeVideoOps::failing_merge());
        h.seed_chunks(midnight(), 1).await;
        let backend = Arc::new(FakeBackend::video(TWO_ACTIVITIES));
        let scheduler = h.scheduler(backend.clone(), 15);

        let outcome = scheduler.trigger_at(midnight() + Duration::minutes(15)).await;
        assert!(matches!(outcome, BatchOutcome::Aborted(_)));
        assert_eq!(backend.calls(), 0);
        assert_eq!(h.leftover_batches(), 0);
    }

    #[tokio::test]
    async fn backfill_walks_the_day_in_windows() {
        let h = harness();
        h.seed_chunks(midnight(), 4).await;
        let backend = Arc::new(FakeBackend::video(
            r#"[{"start_minutes": 0, "end_minutes": 10, "title": "Reading", "category": "research"}]"#,
        ));
        let scheduler = h.scheduler(backend.clone(), 15);

        let created = scheduler.backfill(local_date_of(midnight())).await;
        assert_eq!(created, 4);
        assert_eq!(backend.calls(), 4);

        let activities = h
            .db
            .get_activities_between(midnight(), midnight() + Duration::days(1))
            .await
            .unwrap();
        let starts: Vec<_> = activities.iter().map(|a| a.activity.start_time).collect();
        assert_eq!(
            starts,
            (0..4)
                .map(|i| midnight() + Duration::minutes(15 * i))
                .collect::<Vec<_>>()
        );

        // The second window sees the first window's activity as context.
        assert!(backend.last_prompt().unwrap().contains("Reading"));
    }

    #[tokio::test]
    async fn chunk_indexed_after_a_trigger_is_picked_up_next_run() {
        let h = harness();
        h.seed_chunks(midnight(), 1).await;
        let backend = Arc::new(FakeBackend::video(
            r#"[{"start_minutes": 0, "end_minutes": 5, "title": "Writing", "category": "work"}]"#,
        ));
        let scheduler = h.scheduler(backend.clone(), 15);

        // The 00:15 chunk is still being encoded when the 00:20 run fires.
        let first = scheduler.trigger_at(midnight() + Duration::minutes(20)).await;
        assert_eq!(first, BatchOutcome::Completed { activities: 1 });
        h.seed_chunks(midnight() + Duration::minutes(15), 1).await;

        let second = scheduler.trigger_at(midnight() + Duration::minutes(35)).await;
        assert_eq!(second, BatchOutcome::Completed { activities: 1 });
        assert_eq!(
            scheduler.trigger_at(midnight() + Duration::minutes(50)).await,
            BatchOutcome::NoChunks
        );
        assert_eq!(backend.calls(), 2);

        let activities = h
            .db
            .get_activities_between(midnight(), midnight() + Duration::hours(1))
            .await
            .unwrap();
        let starts: Vec<_> = activities.iter().map(|a| a.activity.start_time).collect();
        assert_eq!(
            starts,
            vec![midnight(), midnight() + Duration::minutes(15)]
        );
    }

    #[tokio::test]
    async fn backfilled_chunks_are_not_analysed_again() {
        let h = harness();
        h.seed_chunks(midnight(), 4).await;
        let backend = Arc::new(FakeBackend::video("[]"));
        let scheduler = h.scheduler(backend.clone(), 15);

        scheduler.backfill(local_date_of(midnight())).await;
        assert_eq!(backend.calls(), 4);

        let outcome = scheduler.trigger_at(midnight() + Duration::hours(1)).await;
        assert_eq!(outcome, BatchOutcome::NoChunks);
        assert_eq!(backend.calls(), 4);
    }

    #[tokio::test]
    async fn same_second_activities_keep_separate_timelapses() {
        let h = harness();
        h.seed_chunks(midnight(), 1).await;
        let backend = Arc::new(FakeBackend::video(
            r#"[
                {"start_minutes": 0, "end_minutes": 5, "title": "first"},
                {"start_minutes": 0.001, "end_minutes": 10, "title": "second"}
            ]"#,
        ));
        let scheduler = h.scheduler(backend, 15);

        let outcome = scheduler.trigger_at(midnight() + Duration::minutes(15)).await;
        assert_eq!(outcome, BatchOutcome::Completed { activities: 2 });

        let activities = h
            .db
            .get_activities_between(midnight(), midnight() + Duration::hours(1))
            .await
            .unwrap();
        let paths: Vec<_> = activities
            .iter()
            .map(|item| item.activity.timelapse_path.clone().unwrap())
            .collect();
        assert_eq!(paths.len(), 2);
        assert_ne!(paths[0], paths[1]);
        assert!(paths.iter().all(|path| path.exists()));

        let outputs: Vec<_> = h.video.speed_ups().into_iter().map(|(path, _)| path).collect();
        assert_ne!(outputs[0], outputs[1]);
    }

    #[test]
    fn orphaned_timelapse_is_removed_and_missing_one_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("activity_20260302_000000.mp4");
        std::fs::write(&path, b"clip").unwrap();

        assert!(discard_timelapse(&path));
        assert!(!path.exists());
        assert!(!discard_timelapse(&path));
    }

    fn local_date_of(at: DateTime<Utc>) -> NaiveDate {
        crate::utils::timestamps::local_date(at)
    }
}
