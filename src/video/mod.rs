//! Video operations used by the capture loop and the batch scheduler.
//!
//! Every operation either produces its complete output or leaves no output
//! behind; callers treat an error as "nothing was written".

mod ffmpeg;

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

pub use ffmpeg::FfmpegVideoOps;

/// Offsets in seconds into a source video.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRange {
    pub start_secs: f64,
    pub end_secs: f64,
}

impl ClipRange {
    /// `None` when the range is empty or inverted.
    pub fn new(start_secs: f64, end_secs: f64) -> Option<Self> {
        let start_secs = start_secs.max(0.0);
        if end_secs > start_secs {
            Some(Self {
                start_secs,
                end_secs,
            })
        } else {
            None
        }
    }
}

#[async_trait]
pub trait VideoOps: Send + Sync {
    /// Encodes still frames, in order, into a video at `fps` frames per second.
    async fn encode_frames(&self, frames: &[PathBuf], fps: f64, output: &Path) -> Result<()>;

    /// Concatenates `inputs` in order into `output`.
    async fn merge_files(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;

    /// Writes `input` (optionally cut to `clip`) played `factor` times faster.
    async fn speed_up(
        &self,
        input: &Path,
        output: &Path,
        factor: f64,
        clip: Option<ClipRange>,
    ) -> Result<()>;

    /// Duration of `input` in seconds.
    async fn probe_duration(&self, input: &Path) -> Result<f64>;

    /// Extracts `count` evenly spaced frames into `output_dir`, in time order.
    async fn extract_frames(
        &self,
        input: &Path,
        count: usize,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>>;
}
