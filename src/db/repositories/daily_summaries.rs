use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::{
    connection::Database,
    helpers::{format_date, format_datetime, parse_date, parse_datetime},
    models::{DailySummary, DailySummaryInput},
};

fn row_to_summary(row: &Row) -> Result<DailySummary> {
    let date: String = row.get("date")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(DailySummary {
        id: row.get("id")?,
        date: parse_date(&date, "date")?,
        ai_summary: row.get("ai_summary")?,
        user_notes: row.get("user_notes")?,
        total_minutes: row.get("total_minutes")?,
        productive_minutes: row.get("productive_minutes")?,
        activity_count: row.get("activity_count")?,
        top_category: row.get("top_category")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn select_summary(conn: &Connection, date: &str) -> Result<Option<DailySummary>> {
    let mut stmt = conn.prepare(
        "SELECT id, date, ai_summary, user_notes, total_minutes, productive_minutes,
                activity_count, top_category, created_at, updated_at
         FROM daily_summaries
         WHERE date = ?1",
    )?;

    let mut rows = stmt.query(params![date])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_summary(row)?)),
        None => Ok(None),
    }
}

impl Database {
    pub async fn get_daily_summary(&self, date: NaiveDate) -> Result<Option<DailySummary>> {
        self.execute(move |conn| select_summary(conn, &format_date(&date)))
            .await
    }

    /// Writes the summary for `input.date`, replacing any existing row's
    /// generated fields. Existing user notes survive when `input.user_notes`
    /// is `None`.
    pub async fn upsert_daily_summary(&self, input: &DailySummaryInput) -> Result<DailySummary> {
        let record = input.clone();
        self.execute(move |conn| {
            let date = format_date(&record.date);
            let now = format_datetime(&Utc::now());
            conn.execute(
                "INSERT INTO daily_summaries (date, ai_summary, user_notes, total_minutes, productive_minutes,
                                              activity_count, top_category, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT(date) DO UPDATE SET
                     ai_summary = excluded.ai_summary,
                     user_notes = COALESCE(excluded.user_notes, daily_summaries.user_notes),
                     total_minutes = excluded.total_minutes,
                     productive_minutes = excluded.productive_minutes,
                     activity_count = excluded.activity_count,
                     top_category = excluded.top_category,
                     updated_at = excluded.updated_at",
                params![
                    date,
                    record.ai_summary,
                    record.user_notes,
                    record.total_minutes,
                    record.productive_minutes,
                    record.activity_count,
                    record.top_category,
                    now,
                ],
            )
            .with_context(|| format!("failed to upsert daily summary for {date}"))?;

            select_summary(conn, &date)?
                .ok_or_else(|| anyhow!("daily summary for {date} missing after upsert"))
        })
        .await
    }

    /// Stores user notes for a date, creating an empty summary row if needed.
    pub async fn save_user_notes(&self, date: NaiveDate, notes: String) -> Result<DailySummary> {
        self.execute(move |conn| {
            let date = format_date(&date);
            let now = format_datetime(&Utc::now());
            conn.execute(
                "INSERT INTO daily_summaries (date, user_notes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(date) DO UPDATE SET
                     user_notes = excluded.user_notes,
                     updated_at = excluded.updated_at",
                params![date, notes, now],
            )
            .with_context(|| format!("failed to save notes for {date}"))?;

            select_summary(conn, &date)?
                .ok_or_else(|| anyhow!("daily summary for {date} missing after saving notes"))
        })
        .await
    }
}
