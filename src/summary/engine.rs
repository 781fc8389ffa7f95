use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use log::info;

use crate::{
    db::{DailySummary, DailySummaryInput, Database},
    extraction::VisionBackend,
    utils::timestamps::local_day_bounds,
};

use super::{prompt::daily_prompt, stats::DailyStats};

pub const EMPTY_DAY_SUMMARY: &str = "No activity recorded today.";

/// Writes the per-date recap from that day's timeline activities.
#[derive(Clone)]
pub struct SummaryEngine {
    db: Database,
    backend: Option<Arc<dyn VisionBackend>>,
    timeout: Duration,
}

impl SummaryEngine {
    /// Without a backend only empty days can be summarized.
    pub fn new(db: Database, backend: Option<Arc<dyn VisionBackend>>, timeout: Duration) -> Self {
        Self {
            db,
            backend,
            timeout,
        }
    }

    pub async fn get_summary(&self, date: NaiveDate) -> Result<Option<DailySummary>> {
        self.db.get_daily_summary(date).await
    }

    pub async fn save_user_notes(&self, date: NaiveDate, notes: String) -> Result<DailySummary> {
        self.db.save_user_notes(date, notes).await
    }

    /// Generates (or with `force`, regenerates) the summary for `date`. An
    /// existing summary is otherwise left alone apart from `user_notes`.
    pub async fn generate(
        &self,
        date: NaiveDate,
        user_notes: Option<String>,
        force: bool,
    ) -> Result<DailySummary> {
        if !force {
            if let Some(existing) = self.db.get_daily_summary(date).await? {
                if existing.ai_summary.is_some() {
                    info!("summary for {date} already exists");
                    return match user_notes {
                        Some(notes) => self.db.save_user_notes(date, notes).await,
                        None => Ok(existing),
                    };
                }
            }
        }

        let (day_start, day_end) = local_day_bounds(date);
        let activities = self.db.get_activities_between(day_start, day_end).await?;
        let stats = DailyStats::compute(&activities);

        let ai_summary = if activities.is_empty() {
            info!("no activities on {date}, writing placeholder summary");
            EMPTY_DAY_SUMMARY.to_string()
        } else {
            let backend = self
                .backend
                .as_ref()
                .ok_or_else(|| anyhow!("no model backend configured for daily summaries"))?;

            // Notes saved earlier count too when none are passed in.
            let notes = match &user_notes {
                Some(notes) => Some(notes.clone()),
                None => self
                    .db
                    .get_daily_summary(date)
                    .await?
                    .and_then(|existing| existing.user_notes),
            };
            let prompt = daily_prompt(date, &activities, &stats, notes.as_deref());

            tokio::time::timeout(self.timeout, backend.generate_text(&prompt))
                .await
                .map_err(|_| anyhow!("summary generation timed out after {}s", self.timeout.as_secs()))?
                .with_context(|| format!("summary generation failed for {date}"))?
        };

        let summary = self
            .db
            .upsert_daily_summary(&DailySummaryInput {
                date,
                ai_summary,
                user_notes,
                total_minutes: stats.total_minutes,
                productive_minutes: stats.productive_minutes,
                activity_count: stats.activity_count,
                top_category: stats.top_category,
            })
            .await?;
        info!(
            "summary for {date}: {} activities, {} min",
            summary.activity_count, summary.total_minutes
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CategoryKind, TimelineActivity};
    use crate::testing::FakeBackend;
    use crate::utils::timestamps::local_to_utc;
    use chrono::{Duration as ChronoDuration, Utc};
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn setup(backend: Option<Arc<FakeBackend>>) -> (TempDir, Database, SummaryEngine) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("dayflow.db")).unwrap();
        let backend = backend.map(|backend| backend as Arc<dyn VisionBackend>);
        let engine = SummaryEngine::new(db.clone(), backend, Duration::from_secs(30));
        (dir, db, engine)
    }

    async fn add_activity(db: &Database, hour: u32, minutes: i64, kind: CategoryKind) {
        let start = local_to_utc(date().and_hms_opt(hour, 0, 0).unwrap());
        let category_id = db.resolve_category(kind).await.unwrap();
        db.insert_activity(&TimelineActivity {
            id: format!("{hour}-{kind:?}"),
            start_time: start,
            end_time: start + ChronoDuration::minutes(minutes),
            title: format!("{kind:?} block"),
            summary: String::new(),
            category_id,
            timelapse_path: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn empty_day_placeholder_is_idempotent() {
        let backend = Arc::new(FakeBackend::video("should not be used"));
        let (_dir, db, engine) = setup(Some(backend.clone()));

        let first = engine.generate(date(), None, true).await.unwrap();
        let second = engine.generate(date(), None, true).await.unwrap();

        assert_eq!(first.ai_summary.as_deref(), Some(EMPTY_DAY_SUMMARY));
        assert_eq!(second.ai_summary, first.ai_summary);
        assert_eq!(second.id, first.id);
        assert_eq!(second.activity_count, 0);
        assert_eq!(backend.calls(), 0);
        assert!(db.get_daily_summary(date()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn summarizes_day_with_stats() {
        let backend = Arc::new(FakeBackend::video("A focused day of deep work."));
        let (_dir, db, engine) = setup(Some(backend.clone()));
        add_activity(&db, 9, 90, CategoryKind::Work).await;
        add_activity(&db, 11, 30, CategoryKind::Break).await;

        let summary = engine
            .generate(date(), Some("felt good".into()), false)
            .await
            .unwrap();

        assert_eq!(summary.ai_summary.as_deref(), Some("A focused day of deep work."));
        assert_eq!(summary.total_minutes, 120);
        assert_eq!(summary.productive_minutes, 90);
        assert_eq!(summary.activity_count, 2);
        assert_eq!(summary.top_category.as_deref(), Some("Work"));
        assert_eq!(summary.user_notes.as_deref(), Some("felt good"));
        assert!(backend.last_prompt().unwrap().contains("felt good"));
    }

    #[tokio::test]
    async fn existing_summary_only_takes_new_notes_unless_forced() {
        let backend = Arc::new(FakeBackend::video("first take"));
        let (_dir, db, engine) = setup(Some(backend.clone()));
        add_activity(&db, 9, 60, CategoryKind::Learning).await;

        engine.generate(date(), None, false).await.unwrap();
        let updated = engine
            .generate(date(), Some("notes later".into()), false)
            .await
            .unwrap();
        assert_eq!(updated.ai_summary.as_deref(), Some("first take"));
        assert_eq!(updated.user_notes.as_deref(), Some("notes later"));
        assert_eq!(backend.calls(), 1);

        engine.generate(date(), None, true).await.unwrap();
        assert_eq!(backend.calls(), 2);
        assert!(backend.last_prompt().unwrap().contains("notes later"));
    }

    #[tokio::test]
    async fn backend_failure_writes_nothing() {
        let (_dir, db, engine) = setup(Some(Arc::new(FakeBackend::failing())));
        add_activity(&db, 9, 60, CategoryKind::Work).await;

        assert!(engine.generate(date(), None, true).await.is_err());
        assert!(db.get_daily_summary(date()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn notes_row_without_summary_still_generates() {
        let (_dir, db, engine) = setup(None);
        engine.save_user_notes(date(), "quiet day".into()).await.unwrap();

        let summary = engine.generate(date(), None, false).await.unwrap();
        assert_eq!(summary.ai_summary.as_deref(), Some(EMPTY_DAY_SUMMARY));
        assert_eq!(summary.user_notes.as_deref(), Some("quiet day"));
        assert_eq!(
            engine.get_summary(date()).await.unwrap().unwrap().id,
            summary.id
        );
        drop(db);
    }
}
