use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    pub frame_interval_secs: u64,
    pub chunk_duration_secs: u64,
    pub display_id: u32,
    pub retention_days: u32,
    pub stop_flush_timeout_secs: u64,
    /// Screenshot command; `{display}` and `{output}` are substituted. When
    /// `{output}` is absent the PNG is read from stdout.
    pub capture_command: Vec<String>,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            frame_interval_secs: 5,
            chunk_duration_secs: 15,
            display_id: 1,
            retention_days: 3,
            stop_flush_timeout_secs: 5,
            capture_command: default_capture_command(),
        }
    }
}

impl RecordingSettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(self.frame_interval_secs.max(1))
    }

    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs(self.chunk_duration_secs.max(1))
    }
}

#[cfg(target_os = "macos")]
fn default_capture_command() -> Vec<String> {
    ["screencapture", "-x", "-t", "png", "-D", "{display}", "{output}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[cfg(not(target_os = "macos"))]
fn default_capture_command() -> Vec<String> {
    ["import", "-window", "root", "png:{output}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::Ollama => "ollama",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, Provider::Gemini)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub provider: Provider,
    pub model_name: String,
    pub analysis_interval_minutes: u64,
    pub timelapse_speedup: f64,
    pub extraction_timeout_secs: u64,
    pub frame_sample_count: usize,
    pub ollama_host: String,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            provider: Provider::Gemini,
            model_name: "gemini-2.5-flash".into(),
            analysis_interval_minutes: 15,
            timelapse_speedup: 20.0,
            extraction_timeout_secs: 600,
            frame_sample_count: 10,
            ollama_host: "http://localhost:11434".into(),
        }
    }
}

impl AnalysisSettings {
    pub fn interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.analysis_interval_minutes.max(1) as i64)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarySettings {
    pub enabled: bool,
    /// Local time of day, `HH:MM`.
    pub daily_time: String,
    pub model_name: String,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_time: "22:00".into(),
            model_name: "gemini-2.0-flash-lite".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub cleanup_interval_minutes: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            cleanup_interval_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct UserSettings {
    recording: RecordingSettings,
    analysis: AnalysisSettings,
    summary: SummarySettings,
    storage: StorageSettings,
}

/// Parses `HH:MM` into a time of day.
pub fn parse_daily_time(value: &str) -> Result<NaiveTime> {
    let parsed = NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .with_context(|| format!("invalid time '{value}', expected HH:MM"))?;
    Ok(parsed)
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(parsed) => parsed,
                Err(err) => {
                    log::warn!(
                        "Ignoring unreadable settings at {}: {err}",
                        path.display()
                    );
                    UserSettings::default()
                }
            }
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn recording(&self) -> RecordingSettings {
        self.read().recording.clone()
    }

    pub fn analysis(&self) -> AnalysisSettings {
        self.read().analysis.clone()
    }

    pub fn summary(&self) -> SummarySettings {
        self.read().summary.clone()
    }

    pub fn storage(&self) -> StorageSettings {
        self.read().storage.clone()
    }

    pub fn update_recording(&self, settings: RecordingSettings) -> Result<()> {
        if settings.frame_interval_secs == 0 || settings.chunk_duration_secs == 0 {
            bail!("frame interval and chunk duration must be positive");
        }
        let mut guard = self.write();
        guard.recording = settings;
        self.persist(&guard)
    }

    pub fn update_analysis(&self, settings: AnalysisSettings) -> Result<()> {
        let mut guard = self.write();
        guard.analysis = settings;
        self.persist(&guard)
    }

    /// Validates and stores a new daily summary time.
    pub fn update_summary_time(&self, daily_time: &str) -> Result<NaiveTime> {
        let parsed = parse_daily_time(daily_time)?;
        let mut guard = self.write();
        guard.summary.daily_time = parsed.format("%H:%M").to_string();
        self.persist(&guard)?;
        Ok(parsed)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
