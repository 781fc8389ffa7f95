use serde::Serialize;

use crate::db::{CategorizedActivity, CategoryKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryMinutes {
    pub name: String,
    pub minutes: i64,
}

/// Aggregates over one day's activities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub total_minutes: i64,
    pub productive_minutes: i64,
    pub activity_count: i64,
    pub top_category: Option<String>,
    /// Minutes per category, in the order categories first appear.
    pub breakdown: Vec<CategoryMinutes>,
}

fn category_name(item: &CategorizedActivity) -> &str {
    item.category
        .as_ref()
        .map(|category| category.name.as_str())
        .unwrap_or(CategoryKind::Other.as_str())
}

fn is_productive(item: &CategorizedActivity) -> bool {
    item.category
        .as_ref()
        .and_then(|category| CategoryKind::from_name(&category.name))
        .is_some_and(|kind| kind.is_productive())
}

impl DailyStats {
    pub fn compute(activities: &[CategorizedActivity]) -> Self {
        let mut stats = DailyStats {
            activity_count: activities.len() as i64,
            ..DailyStats::default()
        };

        for item in activities {
            let minutes = item.activity.duration_minutes();
            stats.total_minutes += minutes;
            if is_productive(item) {
                stats.productive_minutes += minutes;
            }

            let name = category_name(item);
            match stats.breakdown.iter_mut().find(|entry| entry.name == name) {
                Some(entry) => entry.minutes += minutes,
                None => stats.breakdown.push(CategoryMinutes {
                    name: name.to_string(),
                    minutes,
                }),
            }
        }

        // First maximum wins, so ties go to the category seen first.
        let mut top: Option<&CategoryMinutes> = None;
        for entry in &stats.breakdown {
            if top.map_or(true, |best| entry.minutes > best.minutes) {
                top = Some(entry);
            }
        }
        stats.top_category = top.map(|entry| entry.name.clone());
        stats
    }

    pub fn total_hours(&self) -> f64 {
        self.total_minutes as f64 / 60.0
    }

    pub fn productive_hours(&self) -> f64 {
        self.productive_minutes as f64 / 60.0
    }
}
