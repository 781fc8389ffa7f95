use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_datetime, parse_optional_datetime, to_i64, to_u64},
    models::{CategorizedActivity, TimelineActivity, TimelineCategory},
};

fn row_to_activity(row: &Row) -> Result<TimelineActivity> {
    let start_time: String = row.get("start_time")?;
    let end_time: String = row.get("end_time")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let timelapse_path: Option<String> = row.get("timelapse_path")?;

    Ok(TimelineActivity {
        id: row.get("id")?,
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: parse_datetime(&end_time, "end_time")?,
        title: row.get("title")?,
        summary: row.get("summary")?,
        category_id: row.get("category_id")?,
        timelapse_path: timelapse_path.map(PathBuf::from),
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn row_to_categorized(row: &Row) -> Result<CategorizedActivity> {
    let activity = row_to_activity(row)?;
    let category_id: Option<i64> = row.get("cat_id")?;
    let category = match category_id {
        Some(id) => Some(TimelineCategory {
            id,
            name: row.get("cat_name")?,
            color: row.get("cat_color")?,
            icon: row.get("cat_icon")?,
            created_at: parse_optional_datetime(row.get("cat_created_at")?, "cat_created_at")?
                .unwrap_or(activity.created_at),
        }),
        None => None,
    };

    Ok(CategorizedActivity { activity, category })
}

impl Database {
    pub async fn insert_activity(&self, activity: &TimelineActivity) -> Result<()> {
        let record = activity.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO timeline_activities (id, start_time, end_time, title, summary, category_id, timelapse_path, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id,
                    format_datetime(&record.start_time),
                    format_datetime(&record.end_time),
                    record.title,
                    record.summary,
                    record.category_id,
                    record
                        .timelapse_path
                        .as_ref()
                        .map(|path| path.to_string_lossy().to_string()),
                    format_datetime(&record.created_at),
                    format_datetime(&record.updated_at),
                ],
            )
            .with_context(|| format!("failed to insert activity {}", record.id))?;
            Ok(())
        })
        .await
    }

    /// The `limit` most recent activities that ended at or before `before`,
    /// newest first.
    pub async fn get_recent_activities(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TimelineActivity>> {
        let limit = to_i64(limit as u64)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, start_time, end_time, title, summary, category_id, timelapse_path, created_at, updated_at
                 FROM timeline_activities
                 WHERE end_time <= ?1
                 ORDER BY end_time DESC
                 LIMIT ?2",
            )?;

            let mut rows = stmt.query(params![format_datetime(&before), limit])?;
            let mut activities = Vec::new();
            while let Some(row) = rows.next()? {
                activities.push(row_to_activity(row)?);
            }
            Ok(activities)
        })
        .await
    }

    /// Activities starting in `[start, end)` with their categories, in time order.
    pub async fn get_activities_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CategorizedActivity>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT a.id, a.start_time, a.end_time, a.title, a.summary, a.category_id,
                        a.timelapse_path, a.created_at, a.updated_at,
                        c.id AS cat_id, c.name AS cat_name, c.color AS cat_color,
                        c.icon AS cat_icon, c.created_at AS cat_created_at
                 FROM timeline_activities a
                 LEFT JOIN timeline_categories c ON c.id = a.category_id
                 WHERE a.start_time >= ?1 AND a.start_time < ?2
                 ORDER BY a.start_time ASC",
            )?;

            let mut rows = stmt.query(params![format_datetime(&start), format_datetime(&end)])?;
            let mut activities = Vec::new();
            while let Some(row) = rows.next()? {
                activities.push(row_to_categorized(row)?);
            }
            Ok(activities)
        })
        .await
    }

    pub async fn count_activities(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM timeline_activities", [], |row| {
                    row.get(0)
                })?;
            to_u64(count, "activity count")
        })
        .await
    }
}
