use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use super::VisionBackend;

const API_BASE: &str = "https://generativelanguage.googleapis.com";
const REQUEST_TIMEOUT_SECS: u64 = 300;
const POLL_INITIAL: Duration = Duration::from_secs(2);
const POLL_MAX: Duration = Duration::from_secs(10);
const PROCESSING_DEADLINE: Duration = Duration::from_secs(120);

/// Google Gemini over the public REST API. Videos go through the resumable
/// Files API and are deleted again once analyzed.
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: RemoteFile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteFile {
    name: String,
    uri: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    fn text(self) -> Result<String> {
        let text: String = self
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();
        if text.trim().is_empty() {
            bail!("Gemini returned no text");
        }
        Ok(text)
    }
}

impl GeminiBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: API_BASE.to_string(),
        })
    }

    async fn upload(&self, path: &Path) -> Result<RemoteFile> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mime_type = mime_type_for(path);
        let display_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let start = self
            .client
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await?;
        let start = ensure_success(start, "start upload").await?;
        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| anyhow!("upload session has no x-goog-upload-url"))?
            .to_string();

        let finish = self
            .client
            .post(upload_url)
            .header("X-Goog-Upload-Offset", 0)
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await?;
        let uploaded: UploadResponse = ensure_success(finish, "upload bytes").await?.json().await?;
        info!("uploaded {} as {}", display_name, uploaded.file.name);
        Ok(uploaded.file)
    }

    async fn get_file(&self, name: &str) -> Result<RemoteFile> {
        let response = self
            .client
            .get(format!("{}/v1beta/{}", self.base_url, name))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;
        Ok(ensure_success(response, "get file").await?.json().await?)
    }

    /// Polls until the uploaded file leaves PROCESSING, backing off from 2s
    /// to 10s between checks.
    async fn wait_until_active(&self, mut file: RemoteFile) -> Result<RemoteFile> {
        let deadline = tokio::time::Instant::now() + PROCESSING_DEADLINE;
        let mut delay = POLL_INITIAL;

        loop {
            match file.state.as_deref() {
                Some("ACTIVE") | None => return Ok(file),
                Some("FAILED") => bail!("Gemini failed to process {}", file.name),
                Some(state) => debug!("{} is {state}, waiting {}s", file.name, delay.as_secs()),
            }

            if tokio::time::Instant::now() + delay > deadline {
                bail!(
                    "{} still processing after {}s",
                    file.name,
                    PROCESSING_DEADLINE.as_secs()
                );
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(POLL_MAX);
            file = self.get_file(&file.name).await?;
        }
    }

    async fn delete_file(&self, name: &str) {
        let result = self
            .client
            .delete(format!("{}/v1beta/{}", self.base_url, name))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => warn!("failed to delete {name}: HTTP {}", response.status()),
            Err(err) => warn!("failed to delete {name}: {err}"),
        }
    }

    async fn generate(&self, parts: Vec<Value>) -> Result<String> {
        let body = json!({
            "contents": [{ "role": "user", "parts": parts }],
        });
        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let response: GenerateResponse = ensure_success(response, "generateContent")
            .await?
            .json()
            .await?;
        response.text()
    }
}

#[async_trait]
impl VisionBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn supports_video(&self) -> bool {
        true
    }

    async fn analyze_video(&self, video: &Path, prompt: &str) -> Result<String> {
        let uploaded = self.upload(video).await?;
        let name = uploaded.name.clone();

        let result = async {
            let file = self.wait_until_active(uploaded).await?;
            let mime_type = file
                .mime_type
                .clone()
                .unwrap_or_else(|| mime_type_for(video).to_string());
            self.generate(vec![
                json!({ "text": prompt }),
                json!({ "file_data": { "mime_type": mime_type, "file_uri": file.uri } }),
            ])
            .await
        }
        .await;

        self.delete_file(&name).await;
        result
    }

    async fn analyze_frames(&self, frames: &[PathBuf], prompt: &str) -> Result<String> {
        let mut parts = vec![json!({ "text": prompt })];
        for frame in frames {
            let bytes = tokio::fs::read(frame)
                .await
                .with_context(|| format!("failed to read frame {}", frame.display()))?;
            parts.push(json!({
                "inline_data": {
                    "mime_type": mime_type_for(frame),
                    "data": STANDARD.encode(bytes),
                }
            }));
        }
        self.generate(parts).await
    }

    async fn generate_text(&self, prompt: &str) -> Result<String> {
        self.generate(vec![json!({ "text": prompt })]).await
    }

    async fn test_connection(&self) -> bool {
        match self.generate_text("Reply with OK.").await {
            Ok(_) => true,
            Err(err) => {
                warn!("Gemini connection test failed: {err:?}");
                false
            }
        }
    }
}

async fn ensure_success(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        bail!("Gemini rejected the API key during {what} (HTTP {status})");
    }
    bail!(
        "Gemini {what} failed with HTTP {status}: {}",
        body.chars().take(300).collect::<String>()
    )
}

fn mime_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}
