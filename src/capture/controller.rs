use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::{storage::ChunkStore, video::VideoOps};

use super::{
    loop_worker::{capture_loop, CaptureConfig, CaptureContext, CompletedChunk},
    source::FrameSource,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum CaptureStatus {
    #[default]
    Idle,
    Recording,
    Paused,
    Stopped,
}

impl CaptureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureStatus::Idle => "Idle",
            CaptureStatus::Recording => "Recording",
            CaptureStatus::Paused => "Paused",
            CaptureStatus::Stopped => "Stopped",
        }
    }
}

/// Owns the capture loop task. `Stopped` is terminal; a new controller is
/// needed to record again.
pub struct CaptureController {
    config: CaptureConfig,
    source: Arc<dyn FrameSource>,
    video: Arc<dyn VideoOps>,
    store: ChunkStore,
    chunk_tx: mpsc::Sender<CompletedChunk>,
    status: CaptureStatus,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    pause_tx: Option<watch::Sender<bool>>,
}

impl CaptureController {
    pub fn new(
        config: CaptureConfig,
        source: Arc<dyn FrameSource>,
        video: Arc<dyn VideoOps>,
        store: ChunkStore,
        chunk_tx: mpsc::Sender<CompletedChunk>,
    ) -> Self {
        Self {
            config,
            source,
            video,
            store,
            chunk_tx,
            status: CaptureStatus::Idle,
            handle: None,
            cancel_token: None,
            pause_tx: None,
        }
    }

    pub fn status(&self) -> CaptureStatus {
        self.status
    }

    /// Idle -> Recording. Returns false (and does nothing) in any other state.
    pub fn start(&mut self) -> bool {
        if self.status != CaptureStatus::Idle {
            info!("start ignored: capture is {}", self.status.as_str());
            return false;
        }

        let cancel_token = CancellationToken::new();
        let (pause_tx, pause_rx) = watch::channel(false);

        let ctx = CaptureContext {
            config: self.config.clone(),
            source: self.source.clone(),
            video: self.video.clone(),
            store: self.store.clone(),
            chunk_tx: self.chunk_tx.clone(),
        };
        let handle = tokio::spawn(capture_loop(ctx, cancel_token.clone(), pause_rx));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.pause_tx = Some(pause_tx);
        self.status = CaptureStatus::Recording;
        info!(
            "capture started on display {} ({}s frames, {}s chunks)",
            self.config.display_id,
            self.config.frame_interval.as_secs(),
            self.config.chunk_duration.as_secs()
        );
        true
    }

    /// Recording -> Paused. Buffered frames are kept.
    pub fn pause(&mut self) -> bool {
        if self.status != CaptureStatus::Recording {
            return false;
        }
        if let Some(tx) = &self.pause_tx {
            let _ = tx.send(true);
        }
        self.status = CaptureStatus::Paused;
        true
    }

    /// Paused -> Recording, continuing the same chunk.
    pub fn resume(&mut self) -> bool {
        if self.status != CaptureStatus::Paused {
            return false;
        }
        if let Some(tx) = &self.pause_tx {
            let _ = tx.send(false);
        }
        self.status = CaptureStatus::Recording;
        true
    }

    /// Recording/Paused -> Stopped. The loop flushes its partial chunk; if it
    /// does not finish within `flush_timeout` the task is aborted and the
    /// partial chunk is lost.
    pub async fn stop(&mut self, flush_timeout: Duration) {
        if !matches!(
            self.status,
            CaptureStatus::Recording | CaptureStatus::Paused
        ) {
            return;
        }

        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.pause_tx = None;

        if let Some(mut handle) = self.handle.take() {
            match tokio::time::timeout(flush_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("capture loop task failed to join: {err}"),
                Err(_) => {
                    warn!(
                        "capture flush exceeded {}s, abandoning partial chunk",
                        flush_timeout.as_secs()
                    );
                    handle.abort();
                }
            }
        }

        self.status = CaptureStatus::Stopped;
        info!("capture stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFrameSource, FakeVideoOps};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        controller: CaptureController,
        chunk_rx: mpsc::Receiver<CompletedChunk>,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let (chunk_tx, chunk_rx) = mpsc::channel(16);
        let controller = CaptureController::new(
            CaptureConfig {
                frame_interval: Duration::from_secs(5),
                chunk_duration: Duration::from_secs(15),
                display_id: 1,
            },
            Arc::new(FakeFrameSource::new()),
            Arc::new(FakeVideoOps::default()),
            store,
            chunk_tx,
        );
        Harness {
            _dir: dir,
            controller,
            chunk_rx,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<CompletedChunk>) -> Vec<CompletedChunk> {
        let mut chunks = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test(start_paused = true)]
    async fn records_fixed_length_chunks_and_flushes_on_stop() {
        let mut h = harness();
        assert!(h.controller.start());
        assert!(!h.controller.start());

        tokio::time::sleep(Duration::from_secs(32)).await;
        h.controller.stop(Duration::from_secs(5)).await;
        assert_eq!(h.controller.status(), CaptureStatus::Stopped);

        let chunks = drain(&mut h.chunk_rx);
        let frames: Vec<_> = chunks.iter().map(|c| c.frame_count).collect();
        assert_eq!(frames, vec![3, 3, 1]);

        for chunk in &chunks {
            assert!(chunk.end_time > chunk.start_time);
            assert!(chunk.end_time - chunk.start_time <= chrono::Duration::seconds(15));
            assert!(chunk.file_path.exists());
        }
        assert_eq!(chunks[0].end_time, chunks[1].start_time);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_excludes_wall_clock_time() {
        let mut h = harness();
        h.controller.start();

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(h.controller.pause());
        assert!(!h.controller.pause());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(h.controller.resume());
        tokio::time::sleep(Duration::from_secs(20)).await;
        h.controller.stop(Duration::from_secs(5)).await;

        let chunks = drain(&mut h.chunk_rx);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].frame_count, 3);
        assert_eq!(
            chunks[0].end_time - chunks[0].start_time,
            chrono::Duration::seconds(15)
        );
        assert_eq!(chunks[1].frame_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_paused_flushes_buffer() {
        let mut h = harness();
        h.controller.start();
        tokio::time::sleep(Duration::from_secs(6)).await;
        h.controller.pause();
        tokio::time::sleep(Duration::from_secs(30)).await;
        h.controller.stop(Duration::from_secs(5)).await;

        let chunks = drain(&mut h.chunk_rx);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].frame_count, 2);
        assert_eq!(
            chunks[0].end_time - chunks[0].start_time,
            chrono::Duration::seconds(6)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_from_idle_is_a_no_op() {
        let mut h = harness();
        h.controller.stop(Duration::from_secs(1)).await;
        assert_eq!(h.controller.status(), CaptureStatus::Idle);
        assert!(!h.controller.resume());
    }
}
