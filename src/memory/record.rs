//! Memory record model

use crate::MemoriaError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Store-assigned record identifier. Never reused.
pub type MemoryId = i64;

/// Kind of fact a memory holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Who the user is ("user is a programmer")
    Attribute,
    /// What the user wants to achieve
    Goal,
    /// How the user wants the assistant to behave
    Request,
    /// Anything else
    Note,
}

impl Category {
    /// Fixed processing order used by consolidation
    pub const ALL: [Category; 4] = [
        Category::Attribute,
        Category::Goal,
        Category::Request,
        Category::Note,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attribute => "attribute",
            Self::Goal => "goal",
            Self::Request => "request",
            Self::Note => "note",
        }
    }

    /// Plural key used when memories are grouped for context
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Attribute => "attributes",
            Self::Goal => "goals",
            Self::Request => "requests",
            Self::Note => "notes",
        }
    }

    /// Lenient parse for model output: also accepts the legacy `memory` label.
    pub fn from_model_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "memory" => Some(Self::Note),
            other => other.parse().ok(),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Category {
    type Err = MemoriaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attribute" => Ok(Self::Attribute),
            "goal" => Ok(Self::Goal),
            "request" => Ok(Self::Request),
            "note" => Ok(Self::Note),
            other => Err(MemoriaError::InvalidCategory(other.to_string())),
        }
    }
}

/// One stored fact about the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    pub category: Category,
    pub content: String,
    /// Original creation time; content edits never touch it
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// Content length in characters (not bytes)
    pub fn content_len(&self) -> usize {
        self.content.chars().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trip_through_str() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
    }

    #[test]
    fn test_unknown_category_rejected() {
        let err = "hobby".parse::<Category>().unwrap_err();
        assert!(matches!(err, MemoriaError::InvalidCategory(c) if c == "hobby"));
        assert!("Attribute".parse::<Category>().is_err());
    }

    #[test]
    fn test_model_label_accepts_legacy_memory() {
        assert_eq!(Category::from_model_label("memory"), Some(Category::Note));
        assert_eq!(Category::from_model_label(" Goal "), Some(Category::Goal));
        assert_eq!(Category::from_model_label("hobby"), None);
    }

    #[test]
    fn test_content_len_counts_chars() {
        let record = MemoryRecord {
            id: 1,
            category: Category::Note,
            content: "コーヒーが好き".to_string(),
            created_at: Utc::now(),
        };
        assert_eq!(record.content_len(), 7);
        assert!(record.content.len() > 7);
    }
}
