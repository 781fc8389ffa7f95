use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A fixed-duration video file produced by the capture loop.
///
/// `end_time` is exclusive and always strictly after `start_time`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordingChunk {
    pub id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub file_path: PathBuf,
    pub display_id: u32,
    pub file_size_bytes: u64,
    pub created_at: DateTime<Utc>,
    /// Set once a batch run has covered this chunk.
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl RecordingChunk {
    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }
}

/// Insert payload; the id and creation time are assigned by the repository.
#[derive(Debug, Clone)]
pub struct NewRecordingChunk {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub file_path: PathBuf,
    pub display_id: u32,
    pub file_size_bytes: u64,
}
