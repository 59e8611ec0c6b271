use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Category {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub position: i32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Hashtag names are stored lowercase without the leading `#`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Hashtag {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub position: i32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Hashtag {
    pub fn normalize_name(raw: &str) -> String {
        raw.trim().trim_start_matches('#').to_lowercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    #[default]
    Pdf,
    Markdown,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Pdf => "pdf",
            PatternType::Markdown => "markdown",
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for PatternType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pdf" => Ok(PatternType::Pdf),
            "markdown" => Ok(PatternType::Markdown),
            other => Err(format!("unknown pattern type: {other}")),
        }
    }
}

/// A pattern document. `category` refers to `Category::name`, not its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Pattern {
    pub id: i32,
    pub name: String,
    pub filename: String,
    pub original_name: String,
    pub category: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_current: bool,
    #[serde(default)]
    pub stitch_count: i32,
    #[serde(default)]
    pub row_count: i32,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default = "first_page")]
    pub current_page: i32,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    #[sqlx(try_from = "String")]
    pub pattern_type: PatternType,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub timer_seconds: i32,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn first_page() -> i32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Counter {
    pub id: i32,
    pub pattern_id: i32,
    pub name: String,
    #[serde(default)]
    pub value: i32,
    #[serde(default)]
    pub position: i32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct PatternHashtag {
    pub pattern_id: i32,
    pub hashtag_id: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashtag_normalization() {
        assert_eq!(Hashtag::normalize_name("#Cables"), "cables");
        assert_eq!(Hashtag::normalize_name("  ##Lace "), "lace");
        assert_eq!(Hashtag::normalize_name("socks"), "socks");
    }

    #[test]
    fn test_pattern_type_round_trip_strings() {
        assert_eq!(
            PatternType::try_from("markdown".to_string()),
            Ok(PatternType::Markdown)
        );
        assert!(PatternType::try_from("docx".to_string()).is_err());
        assert_eq!(
            serde_json::to_value(PatternType::Pdf).unwrap(),
            serde_json::json!("pdf")
        );
    }

    #[test]
    fn test_pattern_fills_missing_columns() {
        let pattern: Pattern = serde_json::from_value(serde_json::json!({
            "id": 4,
            "name": "Mittens",
            "filename": "mittens.pdf",
            "original_name": "Mittens.pdf",
            "category": "Knitting"
        }))
        .unwrap();

        assert_eq!(pattern.current_page, 1);
        assert_eq!(pattern.pattern_type, PatternType::Pdf);
        assert!(!pattern.is_archived);
        assert!(pattern.thumbnail.is_none());
        assert_eq!(pattern.notes, "");
    }
}
