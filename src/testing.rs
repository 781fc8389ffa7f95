//! In-memory stand-ins for the screen, ffmpeg and model backends.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::RgbaImage;
use tokio::sync::Notify;

use crate::{
    capture::{Frame, FrameSource},
    extraction::VisionBackend,
    video::{ClipRange, VideoOps},
};

/// Frames stamped with a wall clock that advances with tokio's (possibly
/// paused) clock.
pub struct FakeFrameSource {
    base: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl FakeFrameSource {
    pub fn new() -> Self {
        Self {
            base: Utc::now(),
            started: tokio::time::Instant::now(),
        }
    }
}

#[async_trait]
impl FrameSource for FakeFrameSource {
    async fn capture(&self, _display_id: u32) -> Result<Frame> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())?;
        Ok(Frame {
            image: RgbaImage::new(4, 4),
            captured_at: self.base + elapsed,
        })
    }
}

/// Writes small text files in place of real media. Uses blocking std::fs so
/// tests under a paused clock do not depend on the blocking pool.
pub struct FakeVideoOps {
    duration_secs: f64,
    fail_merge: bool,
    speed_ups: Mutex<Vec<(PathBuf, Option<ClipRange>)>>,
}

impl Default for FakeVideoOps {
    fn default() -> Self {
        Self::with_duration(3600.0)
    }
}

impl FakeVideoOps {
    pub fn with_duration(duration_secs: f64) -> Self {
        Self {
            duration_secs,
            fail_merge: false,
            speed_ups: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_merge() -> Self {
        Self {
            fail_merge: true,
            ..Self::default()
        }
    }

    pub fn speed_ups(&self) -> Vec<(PathBuf, Option<ClipRange>)> {
        self.speed_ups.lock().unwrap().clone()
    }
}

#[async_trait]
impl VideoOps for FakeVideoOps {
    async fn encode_frames(&self, frames: &[PathBuf], _fps: f64, output: &Path) -> Result<()> {
        if frames.is_empty() {
            bail!("no frames");
        }
        std::fs::write(output, format!("{} frames", frames.len()))?;
        Ok(())
    }

    async fn merge_files(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        if self.fail_merge {
            bail!("merge failed");
        }
        let mut merged = Vec::new();
        for input in inputs {
            merged.extend(std::fs::read(input)?);
            merged.push(b'\n');
        }
        std::fs::write(output, merged)?;
        Ok(())
    }

    async fn speed_up(
        &self,
        input: &Path,
        output: &Path,
        _factor: f64,
        clip: Option<ClipRange>,
    ) -> Result<()> {
        std::fs::copy(input, output)?;
        self.speed_ups
            .lock()
            .unwrap()
            .push((output.to_path_buf(), clip));
        Ok(())
    }

    async fn probe_duration(&self, _input: &Path) -> Result<f64> {
        Ok(self.duration_secs)
    }

    async fn extract_frames(
        &self,
        _input: &Path,
        count: usize,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(output_dir)?;
        (0..count)
            .map(|index| {
                let path = output_dir.join(format!("frame_{index:03}.jpg"));
                std::fs::write(&path, b"jpeg")?;
                Ok(path)
            })
            .collect()
    }
}

/// Returns a canned response for every request.
pub struct FakeBackend {
    response: String,
    video: bool,
    fail: bool,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
    started: Arc<Notify>,
    calls: AtomicUsize,
    frames_seen: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
}

impl FakeBackend {
    fn build(response: &str, video: bool, fail: bool) -> Self {
        Self {
            response: response.to_string(),
            video,
            fail,
            delay: None,
            gate: None,
            started: Arc::new(Notify::new()),
            calls: AtomicUsize::new(0),
            frames_seen: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn video(response: &str) -> Self {
        Self::build(response, true, false)
    }

    pub fn frames(response: &str) -> Self {
        Self::build(response, false, false)
    }

    pub fn failing() -> Self {
        Self::build("", true, true)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests block until `gate` is notified.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Notified when a request begins.
    pub fn started(&self) -> Arc<Notify> {
        self.started.clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn frames_seen(&self) -> usize {
        self.frames_seen.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().unwrap().clone()
    }

    async fn respond(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
        self.started.notify_one();

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            bail!("backend unavailable");
        }
        Ok(self.response.clone())
    }
}

#[async_trait]
impl VisionBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn supports_video(&self) -> bool {
        self.video
    }

    async fn analyze_video(&self, _video: &Path, prompt: &str) -> Result<String> {
        self.respond(prompt).await
    }

    async fn analyze_frames(&self, frames: &[PathBuf], prompt: &str) -> Result<String> {
        self.frames_seen.store(frames.len(), Ordering::SeqCst);
        self.respond(prompt).await
    }

    async fn generate_text(&self, prompt: &str) -> Result<String> {
        self.respond(prompt).await
    }

    async fn test_connection(&self) -> bool {
        !self.fail
    }
}
