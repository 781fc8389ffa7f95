//! Tolerant parsing of model responses into activity segments.
//!
//! Responses often wrap the JSON array in prose or code fences; everything
//! between the first `[` and the last `]` is taken as the payload. Elements
//! that fail to parse are skipped individually.

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::db::CategoryKind;

use super::ActivitySegment;

const DEFAULT_TITLE: &str = "Untitled activity";
const MAX_TITLE_CHARS: usize = 50;
const LOGGED_RESPONSE_CHARS: usize = 500;
/// No batch spans more than a day; larger offsets are model noise.
const MAX_OFFSET_MINUTES: f64 = 24.0 * 60.0;

#[derive(Deserialize)]
#[serde(untagged)]
enum Number {
    Float(f64),
    Text(String),
}

impl Number {
    fn value(&self) -> Option<f64> {
        let parsed = match self {
            Number::Float(value) => Some(*value),
            Number::Text(text) => text.trim().parse::<f64>().ok(),
        };
        parsed.filter(|value| value.is_finite())
    }
}

#[derive(Deserialize)]
struct VideoRecord {
    start_minutes: Number,
    end_minutes: Number,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Deserialize)]
struct FrameRecord {
    start_index: Number,
    end_index: Number,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

pub fn extract_json_array(raw: &str) -> Option<&str> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    (end > start).then(|| &raw[start..=end])
}

fn parse_elements(raw: &str) -> Vec<Value> {
    let Some(payload) = extract_json_array(raw) else {
        warn!(
            "model response has no JSON array: {}",
            raw.chars().take(LOGGED_RESPONSE_CHARS).collect::<String>()
        );
        return Vec::new();
    };

    match serde_json::from_str::<Vec<Value>>(payload) {
        Ok(elements) => elements,
        Err(err) => {
            warn!(
                "model response is not a JSON array ({err}): {}",
                raw.chars().take(LOGGED_RESPONSE_CHARS).collect::<String>()
            );
            debug!("full model response: {raw}");
            Vec::new()
        }
    }
}

fn clean_title(title: Option<String>) -> String {
    let trimmed = title.as_deref().map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    trimmed.chars().take(MAX_TITLE_CHARS).collect()
}

fn segment(
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    title: Option<String>,
    summary: Option<String>,
    category: Option<String>,
) -> ActivitySegment {
    let category_label = category.unwrap_or_default().trim().to_string();
    ActivitySegment {
        start_time,
        end_time: end_time.max(start_time),
        title: clean_title(title),
        summary: summary.unwrap_or_default().trim().to_string(),
        category: CategoryKind::normalize(&category_label),
        category_label,
    }
}

/// `base` plus `minutes`, or `None` when the offset is out of range.
fn offset_time(base: DateTime<Utc>, minutes: f64) -> Option<DateTime<Utc>> {
    if minutes > MAX_OFFSET_MINUTES {
        return None;
    }
    let millis = (minutes.max(0.0) * 60_000.0).round() as i64;
    base.checked_add_signed(Duration::milliseconds(millis))
}

/// Segments from a video-mode response; offsets are minutes from `base`.
pub fn parse_video_response(raw: &str, base: DateTime<Utc>) -> Vec<ActivitySegment> {
    parse_elements(raw)
        .into_iter()
        .enumerate()
        .filter_map(|(index, element)| {
            let record: VideoRecord = match serde_json::from_value(element) {
                Ok(record) => record,
                Err(err) => {
                    warn!("skipping malformed activity {index}: {err}");
                    return None;
                }
            };
            let (Some(start), Some(end)) =
                (record.start_minutes.value(), record.end_minutes.value())
            else {
                warn!("skipping activity {index}: non-numeric offsets");
                return None;
            };

            let (Some(start_time), Some(end_time)) =
                (offset_time(base, start), offset_time(base, end))
            else {
                warn!("skipping activity {index}: offsets {start}..{end} out of range");
                return None;
            };

            Some(segment(
                start_time,
                end_time,
                record.title,
                record.summary,
                record.category,
            ))
        })
        .collect()
}

/// Segments from a frame-mode response; indices refer to `timestamps` and
/// are clamped into range.
pub fn parse_frames_response(raw: &str, timestamps: &[DateTime<Utc>]) -> Vec<ActivitySegment> {
    let Some(last) = timestamps.len().checked_sub(1) else {
        return Vec::new();
    };
    let clamp = |value: f64| (value.max(0.0).round() as usize).min(last);

    parse_elements(raw)
        .into_iter()
        .enumerate()
        .filter_map(|(index, element)| {
            let record: FrameRecord = match serde_json::from_value(element) {
                Ok(record) => record,
                Err(err) => {
                    warn!("skipping malformed activity {index}: {err}");
                    return None;
                }
            };
            let (Some(start), Some(end)) = (record.start_index.value(), record.end_index.value())
            else {
                warn!("skipping activity {index}: non-numeric indices");
                return None;
            };

            let start = clamp(start);
            let end = clamp(end).max(start);
            Some(segment(
                timestamps[start],
                timestamps[end],
                record.title,
                record.summary,
                record.category,
            ))
        })
        .collect()
}
