pub mod activity;
pub mod category;
pub mod chunk;
pub mod daily_summary;

pub use activity::{CategorizedActivity, TimelineActivity};
pub use category::{CategoryKind, Locale, TimelineCategory};
pub use chunk::{NewRecordingChunk, RecordingChunk};
pub use daily_summary::{DailySummary, DailySummaryInput};
