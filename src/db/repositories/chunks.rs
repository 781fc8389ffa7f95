use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, Row};

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_datetime, parse_optional_datetime, to_i64, to_u64},
    models::{NewRecordingChunk, RecordingChunk},
};

const CHUNK_COLUMNS: &str =
    "id, start_time, end_time, file_path, display_id, file_size_bytes, created_at, analyzed_at";

fn row_to_chunk(row: &Row) -> Result<RecordingChunk> {
    let start_time: String = row.get("start_time")?;
    let end_time: String = row.get("end_time")?;
    let created_at: String = row.get("created_at")?;
    let analyzed_at: Option<String> = row.get("analyzed_at")?;
    let file_path: String = row.get("file_path")?;
    let display_id: i64 = row.get("display_id")?;

    Ok(RecordingChunk {
        id: row.get("id")?,
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: parse_datetime(&end_time, "end_time")?,
        file_path: PathBuf::from(file_path),
        display_id: u32::try_from(display_id)
            .map_err(|_| anyhow!("display_id out of range: {display_id}"))?,
        file_size_bytes: to_u64(row.get("file_size_bytes")?, "file_size_bytes")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        analyzed_at: parse_optional_datetime(analyzed_at, "analyzed_at")?,
    })
}

impl Database {
    pub async fn insert_chunk(&self, chunk: &NewRecordingChunk) -> Result<RecordingChunk> {
        let record = chunk.clone();
        if record.end_time <= record.start_time {
            return Err(anyhow!(
                "chunk end_time {} must be after start_time {}",
                record.end_time,
                record.start_time
            ));
        }

        self.execute(move |conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO recording_chunks (start_time, end_time, file_path, display_id, file_size_bytes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    format_datetime(&record.start_time),
                    format_datetime(&record.end_time),
                    record.file_path.to_string_lossy().to_string(),
                    i64::from(record.display_id),
                    to_i64(record.file_size_bytes)?,
                    format_datetime(&now),
                ],
            )
            .with_context(|| format!("failed to insert chunk {}", record.file_path.display()))?;

            Ok(RecordingChunk {
                id: conn.last_insert_rowid(),
                start_time: record.start_time,
                end_time: record.end_time,
                file_path: record.file_path,
                display_id: record.display_id,
                file_size_bytes: record.file_size_bytes,
                created_at: now,
                analyzed_at: None,
            })
        })
        .await
    }

    /// Chunks fully contained in `[start, end]`, ordered by start time.
    pub async fn get_chunks_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        display_id: Option<u32>,
    ) -> Result<Vec<RecordingChunk>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHUNK_COLUMNS}
                 FROM recording_chunks
                 WHERE start_time >= ?1 AND end_time <= ?2
                   AND (?3 IS NULL OR display_id = ?3)
                 ORDER BY start_time ASC"
            ))?;

            let mut rows = stmt.query(params![
                format_datetime(&start),
                format_datetime(&end),
                display_id.map(i64::from),
            ])?;
            let mut chunks = Vec::new();
            while let Some(row) = rows.next()? {
                chunks.push(row_to_chunk(row)?);
            }
            Ok(chunks)
        })
        .await
    }

    /// Chunks whose start time falls in `[start, end)`, ordered by start time.
    pub async fn get_chunks_starting_in(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RecordingChunk>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHUNK_COLUMNS}
                 FROM recording_chunks
                 WHERE start_time >= ?1 AND start_time < ?2
                 ORDER BY start_time ASC"
            ))?;

            let mut rows = stmt.query(params![format_datetime(&start), format_datetime(&end)])?;
            let mut chunks = Vec::new();
            while let Some(row) = rows.next()? {
                chunks.push(row_to_chunk(row)?);
            }
            Ok(chunks)
        })
        .await
    }

    /// Chunks not yet covered by a batch run whose start falls in
    /// `[start, end)`, ordered by start time.
    pub async fn get_unanalyzed_chunks(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RecordingChunk>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHUNK_COLUMNS}
                 FROM recording_chunks
                 WHERE analyzed_at IS NULL AND start_time >= ?1 AND start_time < ?2
                 ORDER BY start_time ASC"
            ))?;

            let mut rows = stmt.query(params![format_datetime(&start), format_datetime(&end)])?;
            let mut chunks = Vec::new();
            while let Some(row) = rows.next()? {
                chunks.push(row_to_chunk(row)?);
            }
            Ok(chunks)
        })
        .await
    }

    /// Stamps the given chunks as analysed. Returns how many rows changed.
    pub async fn mark_chunks_analyzed(&self, ids: Vec<i64>, at: DateTime<Utc>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let stamp = format_datetime(&at);
            let mut updated = 0;
            for batch in ids.chunks(500) {
                let placeholders = vec!["?"; batch.len()].join(", ");
                let params = std::iter::once(Value::from(stamp.clone()))
                    .chain(batch.iter().map(|id| Value::from(*id)));
                updated += tx.execute(
                    &format!(
                        "UPDATE recording_chunks SET analyzed_at = ? WHERE id IN ({placeholders})"
                    ),
                    params_from_iter(params),
                )?;
            }
            tx.commit().context("failed to commit chunk analysis marks")?;
            Ok(updated)
        })
        .await
    }

    pub async fn get_chunks_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<RecordingChunk>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHUNK_COLUMNS}
                 FROM recording_chunks
                 WHERE start_time < ?1
                 ORDER BY start_time ASC"
            ))?;

            let mut rows = stmt.query(params![format_datetime(&cutoff)])?;
            let mut chunks = Vec::new();
            while let Some(row) = rows.next()? {
                chunks.push(row_to_chunk(row)?);
            }
            Ok(chunks)
        })
        .await
    }

    /// Deletes the given rows in one transaction and returns how many went.
    pub async fn delete_chunks(&self, ids: Vec<i64>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut deleted = 0;
            for batch in ids.chunks(500) {
                let placeholders = vec!["?"; batch.len()].join(", ");
                deleted += tx.execute(
                    &format!("DELETE FROM recording_chunks WHERE id IN ({placeholders})"),
                    params_from_iter(batch.iter()),
                )?;
            }
            tx.commit().context("failed to commit chunk deletion")?;
            Ok(deleted)
        })
        .await
    }

    pub async fn count_chunks(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM recording_chunks", [], |row| row.get(0))?;
            to_u64(count, "chunk count")
        })
        .await
    }

    /// Earliest and latest chunk start, or `None` when nothing is recorded.
    pub async fn get_chunk_date_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        self.execute(|conn| {
            let (min, max): (Option<String>, Option<String>) = conn.query_row(
                "SELECT MIN(start_time), MAX(start_time) FROM recording_chunks",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let earliest = parse_optional_datetime(min, "start_time")?;
            let latest = parse_optional_datetime(max, "start_time")?;
            Ok(earliest.zip(latest))
        })
        .await
    }
}
