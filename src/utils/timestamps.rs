//! Local wall-clock helpers for file names and calendar days.
//!
//! Timestamps live in UTC everywhere except file names and date folders,
//! which follow the user's local clock (`chunk_20260302_091500.mp4` under
//! `2026-03-02/`).

use std::path::Path;

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const FILE_TIMESTAMP_LEN: usize = 15;

pub fn file_timestamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local)
        .format(FILE_TIMESTAMP_FORMAT)
        .to_string()
}

pub fn date_folder(at: DateTime<Utc>) -> String {
    local_date(at).format("%Y-%m-%d").to_string()
}

pub fn local_date(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&Local).date_naive()
}

/// Recovers the start time embedded at the end of a file stem such as
/// `batch_20260302_090000`, also accepting a `_<n>` collision suffix
/// (`activity_20260302_090000_1`).
pub fn parse_file_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    let stem = path.file_stem()?.to_str()?;
    stamp_at_end(stem).or_else(|| {
        let (head, counter) = stem.rsplit_once('_')?;
        if counter.is_empty() || !counter.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        stamp_at_end(head)
    })
}

fn stamp_at_end(stem: &str) -> Option<DateTime<Utc>> {
    if stem.len() < FILE_TIMESTAMP_LEN || !stem.is_char_boundary(stem.len() - FILE_TIMESTAMP_LEN) {
        return None;
    }
    let raw = &stem[stem.len() - FILE_TIMESTAMP_LEN..];
    let naive = NaiveDateTime::parse_from_str(raw, FILE_TIMESTAMP_FORMAT).ok()?;
    Some(local_to_utc(naive))
}

/// Resolves a local wall-clock time, taking the earlier instant when a DST
/// fold makes it ambiguous and skipping forward past a DST gap.
pub fn local_to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    let mut candidate = naive;
    for _ in 0..4 {
        if let Some(local) = Local.from_local_datetime(&candidate).earliest() {
            return local.with_timezone(&Utc);
        }
        candidate += Duration::minutes(30);
    }
    Utc.from_utc_datetime(&naive)
}

/// `[local midnight, next local midnight)` for a calendar date.
pub fn local_day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = local_to_utc(date.and_time(NaiveTime::MIN));
    let next = date.succ_opt().unwrap_or(date);
    let end = local_to_utc(next.and_time(NaiveTime::MIN));
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn file_timestamps_round_trip_to_the_second() {
        let naive = NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(9, 15, 30)
            .unwrap();
        let at = local_to_utc(naive);

        let name = format!("chunk_{}.mp4", file_timestamp(at));
        assert_eq!(name, "chunk_20260302_091530.mp4");
        assert_eq!(parse_file_timestamp(&PathBuf::from(name)), Some(at));
        assert_eq!(date_folder(at), "2026-03-02");
    }

    #[test]
    fn rejects_names_without_timestamp() {
        assert_eq!(parse_file_timestamp(&PathBuf::from("video.mp4")), None);
        assert_eq!(
            parse_file_timestamp(&PathBuf::from("batch_2026XX02_090000.mp4")),
            None
        );
        assert_eq!(
            parse_file_timestamp(&PathBuf::from("activity_2026XX02_090000_1.mp4")),
            None
        );
    }

    #[test]
    fn day_bounds_cover_one_local_day() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let (start, end) = local_day_bounds(date);
        assert_eq!(local_date(start), date);
        assert_eq!(local_date(end), date.succ_opt().unwrap());
        assert_eq!(end - start, Duration::hours(24));
    }
}
