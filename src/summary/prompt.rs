use std::fmt::Write as _;

use chrono::{Local, NaiveDate};

use crate::db::{CategorizedActivity, CategoryKind};

use super::stats::DailyStats;

const DEFAULT_ICON: &str = "📋";

fn activity_lines(activities: &[CategorizedActivity]) -> String {
    activities
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let (name, icon) = match &item.category {
                Some(category) => (
                    category.name.as_str(),
                    category.icon.as_deref().unwrap_or(DEFAULT_ICON),
                ),
                None => (CategoryKind::Other.as_str(), DEFAULT_ICON),
            };
            let summary = if item.activity.summary.trim().is_empty() {
                "No details"
            } else {
                item.activity.summary.trim()
            };
            format!(
                "{}. {} - {icon} {name}: {} ({} min)\n   {summary}",
                index + 1,
                item.activity
                    .start_time
                    .with_timezone(&Local)
                    .format("%H:%M"),
                item.activity.title,
                item.activity.duration_minutes(),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn breakdown_lines(stats: &DailyStats) -> String {
    let mut text = String::new();
    for entry in &stats.breakdown {
        let share = if stats.total_minutes > 0 {
            entry.minutes as f64 * 100.0 / stats.total_minutes as f64
        } else {
            0.0
        };
        let _ = writeln!(
            text,
            "  • {}: {:.1}h ({share:.0}%)",
            entry.name,
            entry.minutes as f64 / 60.0
        );
    }
    text
}

/// Prompt asking for a prose recap of one day.
pub fn daily_prompt(
    date: NaiveDate,
    activities: &[CategorizedActivity],
    stats: &DailyStats,
    user_notes: Option<&str>,
) -> String {
    let notes = match user_notes.map(str::trim) {
        Some(notes) if !notes.is_empty() => {
            format!("\nThe user's own notes for today:\n{notes}\n")
        }
        _ => String::new(),
    };

    format!(
        "Write an insightful, encouraging daily summary for the activities below.\n\
         \n\
         Date: {date}\n\
         \n\
         Activities:\n\
         {activities}\n\
         \n\
         Statistics:\n\
         • Total tracked time: {total:.1}h\n\
         • Productive time: {productive:.1}h\n\
         • Activities: {count}\n\
         • Top category: {top}\n\
         \n\
         Time by category:\n\
         {breakdown}{notes}\n\
         Cover:\n\
         1. Overview: 2-3 sentences on what was accomplished\n\
         2. Time allocation: where the time went and the main focus areas\n\
         3. Productivity insights: patterns in focus and efficiency\n\
         4. A one-line, warm closing remark acknowledging the effort or suggesting one improvement\n\
         \n\
         Keep it friendly and concise (4-6 short paragraphs). If the user wrote notes, \
         reflect on them.",
        date = date.format("%A, %B %-d, %Y"),
        activities = activity_lines(activities),
        total = stats.total_hours(),
        productive = stats.productive_hours(),
        count = stats.activity_count,
        top = stats.top_category.as_deref().unwrap_or("n/a"),
        breakdown = breakdown_lines(stats),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{TimelineActivity, TimelineCategory};
    use crate::utils::timestamps::local_to_utc;
    use chrono::Duration;

    fn activity() -> CategorizedActivity {
        let start = local_to_utc(
            NaiveDate::from_ymd_opt(2026, 3, 2)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
        );
        CategorizedActivity {
            activity: TimelineActivity {
                id: "a".into(),
                start_time: start,
                end_time: start + Duration::minutes(45),
                title: "Reviewing pull requests".into(),
                summary: "Went through three PRs.".into(),
                category_id: Some(1),
                timelapse_path: None,
                created_at: start,
                updated_at: start,
            },
            category: Some(TimelineCategory {
                id: 1,
                name: "Work".into(),
                color: "#4CAF50".into(),
                icon: Some("💼".into()),
                created_at: start,
            }),
        }
    }

    #[test]
    fn lists_activities_with_local_times_and_stats() {
        let activities = vec![activity()];
        let stats = DailyStats::compute(&activities);
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let prompt = daily_prompt(date, &activities, &stats, Some("  shipped the release "));

        assert!(prompt.contains(
            "1. 09:30 - 💼 Work: Reviewing pull requests (45 min)\n   Went through three PRs."
        ));
        assert!(prompt.contains("• Productive time: 0.8h"));
        assert!(prompt.contains("  • Work: 0.8h (100%)"));
        assert!(prompt.contains("shipped the release\n"));
        assert!(prompt.contains("Monday, March 2, 2026"));
    }

    #[test]
    fn blank_notes_are_left_out() {
        let activities = vec![activity()];
        let stats = DailyStats::compute(&activities);
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert!(!daily_prompt(date, &activities, &stats, Some("   ")).contains("own notes"));
    }
}
