use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::warn;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::VisionBackend;

const REQUEST_TIMEOUT_SECS: u64 = 600;

/// A local Ollama server. Vision models there take images, not video, so
/// batches are analyzed from sampled frames.
pub struct OllamaBackend {
    client: Client,
    model: String,
    base_url: String,
}

#[derive(Serialize, Debug)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    options: GenerateOptions,
}

#[derive(Serialize, Debug)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    response: String,
}

impl OllamaBackend {
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn generate(&self, prompt: &str, images: Vec<String>) -> Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            images,
            options: GenerateOptions { temperature: 0.3 },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .with_context(|| format!("cannot reach Ollama at {}", self.base_url))?;
        if !response.status().is_success() {
            bail!(
                "Ollama returned HTTP {} for model '{}'",
                response.status(),
                self.model
            );
        }

        let response: GenerateResponse = response.json().await?;
        Ok(response.response.trim().to_string())
    }
}

#[async_trait]
impl VisionBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn supports_video(&self) -> bool {
        false
    }

    async fn analyze_video(&self, video: &Path, _prompt: &str) -> Result<String> {
        bail!(
            "Ollama cannot analyze video directly ({}); sample frames instead",
            video.display()
        )
    }

    async fn analyze_frames(&self, frames: &[PathBuf], prompt: &str) -> Result<String> {
        let mut images = Vec::with_capacity(frames.len());
        for frame in frames {
            let bytes = tokio::fs::read(frame)
                .await
                .with_context(|| format!("failed to read frame {}", frame.display()))?;
            images.push(STANDARD.encode(bytes));
        }
        self.generate(prompt, images).await
    }

    async fn generate_text(&self, prompt: &str) -> Result<String> {
        self.generate(prompt, Vec::new()).await
    }

    async fn test_connection(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        match result {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                warn!("Ollama connection test failed: {err}");
                false
            }
        }
    }
}
