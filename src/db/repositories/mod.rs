pub mod activities;
pub mod categories;
pub mod chunks;
pub mod daily_summaries;
