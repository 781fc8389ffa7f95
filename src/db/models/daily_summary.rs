use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub id: i64,
    pub date: NaiveDate,
    pub ai_summary: Option<String>,
    pub user_notes: Option<String>,
    pub total_minutes: i64,
    pub productive_minutes: i64,
    pub activity_count: i64,
    pub top_category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values written by an upsert; one row per calendar date.
#[derive(Debug, Clone)]
pub struct DailySummaryInput {
    pub date: NaiveDate,
    pub ai_summary: String,
    pub user_notes: Option<String>,
    pub total_minutes: i64,
    pub productive_minutes: i64,
    pub activity_count: i64,
    pub top_category: Option<String>,
}
