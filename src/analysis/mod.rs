mod batch;

use serde::{Deserialize, Serialize};

pub use batch::{BatchConfig, BatchScheduler};

/// Where the currently running batch is. `Idle` between runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum BatchStage {
    #[default]
    Idle,
    Collecting,
    Merging,
    Extracting,
    Persisting,
}

/// Result of one batch window. None of these is an error for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Another run held the lock.
    Skipped,
    NoChunks,
    /// Data-integrity failure before anything was persisted.
    Aborted(String),
    Completed { activities: usize },
}

impl BatchOutcome {
    pub fn activities(&self) -> usize {
        match self {
            BatchOutcome::Completed { activities } => *activities,
            _ => 0,
        }
    }
}
