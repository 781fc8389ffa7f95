//! Daily recap: statistics over a day's activities plus a model-written
//! summary, generated on a daily schedule or on demand.

mod engine;
mod prompt;
mod scheduler;
mod stats;

pub use engine::{SummaryEngine, EMPTY_DAY_SUMMARY};
pub use scheduler::{next_fire, DailySummaryScheduler};
pub use stats::{CategoryMinutes, DailyStats};
