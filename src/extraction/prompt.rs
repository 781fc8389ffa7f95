use chrono::{DateTime, Local, Utc};

use crate::db::{CategoryKind, TimelineActivity};

const CONTEXT_SUMMARY_CHARS: usize = 100;

fn category_list() -> String {
    CategoryKind::DEFAULTS
        .iter()
        .map(|kind| kind.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn with_context(context: Option<&str>, body: String) -> String {
    match context {
        Some(ctx) if !ctx.trim().is_empty() => format!("Previous context: {ctx}\n\n{body}"),
        _ => body,
    }
}

/// Summarizes recent activities (given newest first) as oldest-first lines.
pub fn build_context(recent: &[TimelineActivity]) -> Option<String> {
    if recent.is_empty() {
        return None;
    }

    let mut text = String::from("Recent activities:");
    for activity in recent.iter().rev() {
        let summary: String = activity.summary.chars().take(CONTEXT_SUMMARY_CHARS).collect();
        text.push_str(&format!("\n- {}: {}", activity.title, summary));
    }
    Some(text)
}

pub fn video_prompt(context: Option<&str>) -> String {
    let body = format!(
        "Analyze this screen recording and break it into distinct activities.\n\
         \n\
         For each activity provide:\n\
         - start_minutes: minutes from the start of the video when the activity begins\n\
         - end_minutes: minutes from the start of the video when the activity ends\n\
         - title: a short title, at most 50 characters\n\
         - summary: one or two sentences describing what the user was doing\n\
         - category: one of {}\n\
         \n\
         Respond with a JSON array only, for example:\n\
         [{{\"start_minutes\": 0, \"end_minutes\": 12.5, \"title\": \"Reviewing pull requests\", \
         \"summary\": \"Read and commented on two pull requests.\", \"category\": \"Work\"}}]",
        category_list()
    );
    with_context(context, body)
}

pub fn frames_prompt(timestamps: &[DateTime<Utc>], context: Option<&str>) -> String {
    let mut frame_lines = String::new();
    for (index, at) in timestamps.iter().enumerate() {
        frame_lines.push_str(&format!(
            "Frame {index}: {}\n",
            at.with_timezone(&Local).format("%H:%M:%S")
        ));
    }

    let body = format!(
        "These screenshots were taken in order from one screen recording:\n\
         {frame_lines}\n\
         Group consecutive frames into distinct activities.\n\
         \n\
         For each activity provide:\n\
         - start_index: index of the first frame of the activity\n\
         - end_index: index of the last frame of the activity\n\
         - title: a short title, at most 50 characters\n\
         - summary: one or two sentences describing what the user was doing\n\
         - category: one of {}\n\
         \n\
         Respond with a JSON array only, for example:\n\
         [{{\"start_index\": 0, \"end_index\": 3, \"title\": \"Writing documentation\", \
         \"summary\": \"Edited the project README.\", \"category\": \"Productivity\"}}]",
        category_list()
    );
    with_context(context, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn activity(title: &str, summary: &str) -> TimelineActivity {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        TimelineActivity {
            id: title.to_string(),
            start_time: now,
            end_time: now,
            title: title.to_string(),
            summary: summary.to_string(),
            category_id: None,
            timelapse_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn context_lists_oldest_first_and_truncates() {
        let long = "x".repeat(150);
        let recent = vec![activity("newest", "short"), activity("older", &long)];
        let context = build_context(&recent).unwrap();

        let lines: Vec<_> = context.lines().collect();
        assert_eq!(lines[0], "Recent activities:");
        assert_eq!(lines[1], format!("- older: {}", "x".repeat(100)));
        assert_eq!(lines[2], "- newest: short");
        assert!(build_context(&[]).is_none());
    }

    #[test]
    fn prompts_carry_context_prefix() {
        let prompt = video_prompt(Some("Recent activities:\n- a: b"));
        assert!(prompt.starts_with("Previous context: Recent activities:"));
        assert!(prompt.contains("start_minutes"));
        assert!(!video_prompt(None).starts_with("Previous context"));
    }

    #[test]
    fn frames_prompt_lists_every_frame() {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let prompt = frames_prompt(&[at, at + chrono::Duration::seconds(90)], None);
        assert!(prompt.contains("Frame 0: "));
        assert!(prompt.contains("Frame 1: "));
        assert!(prompt.contains("start_index"));
    }
}
