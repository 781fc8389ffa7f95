use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimelineCategory {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub icon: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Locale {
    En,
    Zh,
}

/// Canonical activity categories. `Other` is the sentinel for anything the
/// model returns that does not map onto a known category; it has no row of
/// its own by default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum CategoryKind {
    Work,
    Meeting,
    Break,
    Productivity,
    Learning,
    Entertainment,
    Other,
}

impl CategoryKind {
    pub const DEFAULTS: [CategoryKind; 6] = [
        CategoryKind::Work,
        CategoryKind::Meeting,
        CategoryKind::Break,
        CategoryKind::Productivity,
        CategoryKind::Learning,
        CategoryKind::Entertainment,
    ];

    /// Stable key stored in `timeline_categories.name`.
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryKind::Work => "Work",
            CategoryKind::Meeting => "Meeting",
            CategoryKind::Break => "Break",
            CategoryKind::Productivity => "Productivity",
            CategoryKind::Learning => "Learning",
            CategoryKind::Entertainment => "Entertainment",
            CategoryKind::Other => "Other",
        }
    }

    pub fn display_name(&self, locale: Locale) -> &'static str {
        match locale {
            Locale::En => self.as_str(),
            Locale::Zh => match self {
                CategoryKind::Work => "工作",
                CategoryKind::Meeting => "会议",
                CategoryKind::Break => "休息",
                CategoryKind::Productivity => "效率",
                CategoryKind::Learning => "学习",
                CategoryKind::Entertainment => "娱乐",
                CategoryKind::Other => "其他",
            },
        }
    }

    pub fn default_color(&self) -> &'static str {
        match self {
            CategoryKind::Work => "#4CAF50",
            CategoryKind::Meeting => "#2196F3",
            CategoryKind::Break => "#FF9800",
            CategoryKind::Productivity => "#9C27B0",
            CategoryKind::Learning => "#00BCD4",
            CategoryKind::Entertainment => "#F44336",
            CategoryKind::Other => "#9E9E9E",
        }
    }

    pub fn default_icon(&self) -> &'static str {
        match self {
            CategoryKind::Work => "💼",
            CategoryKind::Meeting => "👥",
            CategoryKind::Break => "☕",
            CategoryKind::Productivity => "📝",
            CategoryKind::Learning => "📚",
            CategoryKind::Entertainment => "🎮",
            CategoryKind::Other => "📌",
        }
    }

    /// Work, Productivity and Learning count towards productive time.
    pub fn is_productive(&self) -> bool {
        matches!(
            self,
            CategoryKind::Work | CategoryKind::Productivity | CategoryKind::Learning
        )
    }

    /// Maps a free-form label (English or Chinese, any case) onto a canonical
    /// category. Unknown labels become `Other`.
    pub fn normalize(raw: &str) -> CategoryKind {
        let key = raw.trim().to_lowercase();
        match key.as_str() {
            "work" | "coding" | "development" | "工作" | "编程" | "开发" => {
                CategoryKind::Work
            }
            "meeting" | "会议" => CategoryKind::Meeting,
            "break" | "休息" => CategoryKind::Break,
            "productivity" | "效率" => CategoryKind::Productivity,
            "learning" | "research" | "reading" | "学习" | "研究" | "阅读" => {
                CategoryKind::Learning
            }
            "entertainment" | "video" | "gaming" | "娱乐" | "视频" | "游戏" => {
                CategoryKind::Entertainment
            }
            _ => CategoryKind::Other,
        }
    }

    /// Inverse of [`CategoryKind::as_str`] for names read back from storage.
    pub fn from_name(name: &str) -> Option<CategoryKind> {
        CategoryKind::DEFAULTS
            .iter()
            .chain(std::iter::once(&CategoryKind::Other))
            .find(|kind| kind.as_str() == name)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_synonyms_in_both_languages() {
        assert_eq!(CategoryKind::normalize("Coding"), CategoryKind::Work);
        assert_eq!(CategoryKind::normalize("  research "), CategoryKind::Learning);
        assert_eq!(CategoryKind::normalize("gaming"), CategoryKind::Entertainment);
        assert_eq!(CategoryKind::normalize("会议"), CategoryKind::Meeting);
        assert_eq!(CategoryKind::normalize("编程"), CategoryKind::Work);
        assert_eq!(CategoryKind::normalize("shopping"), CategoryKind::Other);
        assert_eq!(CategoryKind::normalize(""), CategoryKind::Other);
    }

    #[test]
    fn normalization_is_total_and_idempotent() {
        let all = CategoryKind::DEFAULTS
            .iter()
            .copied()
            .chain(std::iter::once(CategoryKind::Other));
        for kind in all {
            assert_eq!(CategoryKind::normalize(kind.as_str()), kind);
            assert_eq!(CategoryKind::normalize(kind.display_name(Locale::Zh)), kind);
            assert_eq!(
                CategoryKind::normalize(&kind.as_str().to_uppercase()),
                kind
            );
        }

        let labels = [
            "work", "coding", "development", "工作", "编程", "开发", "meeting", "会议",
            "break", "休息", "productivity", "效率", "learning", "research", "reading",
            "学习", "研究", "阅读", "entertainment", "video", "gaming", "娱乐", "视频",
            "游戏", "other", "其他", "shopping", "", "  ", "Work!",
        ];
        for label in labels {
            let once = CategoryKind::normalize(label);
            assert_eq!(CategoryKind::normalize(once.as_str()), once, "label {label:?}");
        }
    }

    #[test]
    fn productive_set() {
        let productive: Vec<_> = CategoryKind::DEFAULTS
            .iter()
            .filter(|kind| kind.is_productive())
            .collect();
        assert_eq!(
            productive,
            vec![
                &CategoryKind::Work,
                &CategoryKind::Productivity,
                &CategoryKind::Learning
            ]
        );
    }

    #[test]
    fn names_round_trip_through_storage_key() {
        for kind in CategoryKind::DEFAULTS {
            assert_eq!(CategoryKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(CategoryKind::from_name("Other"), Some(CategoryKind::Other));
        assert_eq!(CategoryKind::from_name("Gardening"), None);
    }
}
