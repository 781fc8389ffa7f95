//! Turning a batch video into activity segments with a vision model.

mod gemini;
mod ollama;
pub mod parser;
pub mod prompt;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    db::CategoryKind,
    keystore::KeyStore,
    settings::{AnalysisSettings, Provider},
    utils::timestamps::parse_file_timestamp,
    video::VideoOps,
};

pub use gemini::GeminiBackend;
pub use ollama::OllamaBackend;

/// One activity as reported by the model, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySegment {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub title: String,
    pub summary: String,
    /// Label exactly as the model wrote it.
    pub category_label: String,
    pub category: CategoryKind,
}

#[derive(Debug, Clone)]
pub struct TimedFrame {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

/// A model endpoint. Implementations return the raw text of the response.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the backend accepts a whole video rather than sampled frames.
    fn supports_video(&self) -> bool;

    async fn analyze_video(&self, video: &Path, prompt: &str) -> Result<String>;

    async fn analyze_frames(&self, frames: &[PathBuf], prompt: &str) -> Result<String>;

    async fn generate_text(&self, prompt: &str) -> Result<String>;

    async fn test_connection(&self) -> bool;
}

/// Builds a backend for the provider configured in `settings`, talking to
/// `model_name`. Fails when the provider needs a credential that the key
/// store does not have.
pub fn build_backend(
    settings: &AnalysisSettings,
    model_name: &str,
    keys: &dyn KeyStore,
) -> Result<Arc<dyn VisionBackend>> {
    match settings.provider {
        Provider::Gemini => {
            let Some(api_key) = keys.get(Provider::Gemini) else {
                bail!("no API key configured for {}", Provider::Gemini.as_str());
            };
            Ok(Arc::new(GeminiBackend::new(api_key, model_name)?))
        }
        Provider::Ollama => Ok(Arc::new(OllamaBackend::new(
            &settings.ollama_host,
            model_name,
        )?)),
    }
}

/// Prompting and response parsing on top of a [`VisionBackend`]. Backend
/// failures and timeouts degrade to an empty result.
#[derive(Clone)]
pub struct ActivityExtractor {
    backend: Arc<dyn VisionBackend>,
    video: Arc<dyn VideoOps>,
    timeout: Duration,
    frame_samples: usize,
}

impl ActivityExtractor {
    pub fn new(
        backend: Arc<dyn VisionBackend>,
        video: Arc<dyn VideoOps>,
        timeout: Duration,
        frame_samples: usize,
    ) -> Self {
        Self {
            backend,
            video,
            timeout,
            frame_samples: frame_samples.max(1),
        }
    }

    pub fn backend(&self) -> &Arc<dyn VisionBackend> {
        &self.backend
    }

    pub async fn test_connection(&self) -> bool {
        self.backend.test_connection().await
    }

    /// Analyzes `video_path`, sending the whole video when the backend can
    /// take it and sampled frames (written under `scratch_dir`) otherwise.
    pub async fn extract(
        &self,
        video_path: &Path,
        context: Option<&str>,
        scratch_dir: &Path,
    ) -> Vec<ActivitySegment> {
        if self.backend.supports_video() {
            return self.analyze_video(video_path, context).await;
        }

        let base = base_time(video_path);
        let duration = match self.video.probe_duration(video_path).await {
            Ok(duration) => duration,
            Err(err) => {
                warn!("cannot probe {}: {err:?}", video_path.display());
                return Vec::new();
            }
        };
        let paths = match self
            .video
            .extract_frames(video_path, self.frame_samples, scratch_dir)
            .await
        {
            Ok(paths) => paths,
            Err(err) => {
                warn!("frame sampling failed for {}: {err:?}", video_path.display());
                return Vec::new();
            }
        };

        let count = paths.len().max(1) as f64;
        let frames: Vec<TimedFrame> = paths
            .into_iter()
            .enumerate()
            .map(|(index, path)| TimedFrame {
                path,
                timestamp: base
                    + chrono::Duration::milliseconds(
                        (duration * 1000.0 * index as f64 / count).round() as i64,
                    ),
            })
            .collect();

        self.analyze_frames(&frames, context).await
    }

    /// Offsets in the response are minutes from the start time embedded in
    /// the file name (falling back to now).
    pub async fn analyze_video(
        &self,
        video_path: &Path,
        context: Option<&str>,
    ) -> Vec<ActivitySegment> {
        let base = base_time(video_path);
        let prompt = prompt::video_prompt(context);

        let Some(raw) = self
            .call("video analysis", self.backend.analyze_video(video_path, &prompt))
            .await
        else {
            return Vec::new();
        };

        let segments = parser::parse_video_response(&raw, base);
        info!(
            "{} returned {} activities for {}",
            self.backend.name(),
            segments.len(),
            video_path.display()
        );
        segments
    }

    pub async fn analyze_frames(
        &self,
        frames: &[TimedFrame],
        context: Option<&str>,
    ) -> Vec<ActivitySegment> {
        if frames.is_empty() {
            return Vec::new();
        }

        let timestamps: Vec<_> = frames.iter().map(|frame| frame.timestamp).collect();
        let paths: Vec<_> = frames.iter().map(|frame| frame.path.clone()).collect();
        let prompt = prompt::frames_prompt(&timestamps, context);

        let Some(raw) = self
            .call("frame analysis", self.backend.analyze_frames(&paths, &prompt))
            .await
        else {
            return Vec::new();
        };

        parser::parse_frames_response(&raw, &timestamps)
    }

    async fn call(
        &self,
        what: &str,
        request: impl std::future::Future<Output = Result<String>>,
    ) -> Option<String> {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(raw)) => Some(raw),
            Ok(Err(err)) => {
                warn!("{what} via {} failed: {err:?}", self.backend.name());
                None
            }
            Err(_) => {
                warn!(
                    "{what} via {} timed out after {}s",
                    self.backend.name(),
                    self.timeout.as_secs()
                );
                None
            }
        }
    }
}

fn base_time(video_path: &Path) -> DateTime<Utc> {
    parse_file_timestamp(video_path).unwrap_or_else(|| {
        warn!(
            "no timestamp in {}, using current time as base",
            video_path.display()
        );
        Utc::now()
    })
}
