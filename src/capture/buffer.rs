use chrono::{DateTime, Utc};
use tokio::time::{Duration, Instant};

use super::source::Frame;

/// Frames for the chunk currently being recorded.
///
/// Elapsed time only accrues while recording: `active_baseline` holds the
/// time from earlier running windows and `running_anchor` marks the start of
/// the current one, so pauses never count toward the chunk's length.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    frames: Vec<Frame>,
    started_at: Option<DateTime<Utc>>,
    active_baseline: Duration,
    running_anchor: Option<Instant>,
    paused: bool,
}

/// A chunk's worth of frames ready to encode.
#[derive(Debug)]
pub struct PendingChunk {
    pub frames: Vec<Frame>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self, frame: Frame) {
        if self.frames.is_empty() {
            self.started_at = Some(frame.captured_at);
            self.active_baseline = Duration::ZERO;
            self.running_anchor = if self.paused {
                None
            } else {
                Some(Instant::now())
            };
        }
        self.frames.push(frame);
    }

    pub fn active_elapsed(&self) -> Duration {
        match self.running_anchor {
            Some(anchor) => self.active_baseline.saturating_add(anchor.elapsed()),
            None => self.active_baseline,
        }
    }

    pub fn is_due(&self, chunk_duration: Duration) -> bool {
        !self.frames.is_empty() && self.active_elapsed() >= chunk_duration
    }

    pub fn pause(&mut self) {
        if self.paused {
            return;
        }
        self.active_baseline = self.active_elapsed();
        self.running_anchor = None;
        self.paused = true;
    }

    pub fn resume(&mut self) {
        if !self.paused {
            return;
        }
        self.paused = false;
        if !self.frames.is_empty() {
            self.running_anchor = Some(Instant::now());
        }
    }

    /// Drains the buffer. `end_time` is the start plus active time, at least
    /// one millisecond past the start.
    pub fn take(&mut self) -> Option<PendingChunk> {
        let start_time = self.started_at.take()?;
        let active = self.active_elapsed().max(Duration::from_millis(1));
        let frames = std::mem::take(&mut self.frames);
        self.active_baseline = Duration::ZERO;
        self.running_anchor = None;

        let end_time = start_time
            + chrono::Duration::from_std(active).unwrap_or(chrono::Duration::milliseconds(1));
        Some(PendingChunk {
            frames,
            start_time,
            end_time,
        })
    }
}
