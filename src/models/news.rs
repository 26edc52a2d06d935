//! News and game update models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ParseEnumError;

/// Entries of both kinds share one table and one workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NewsKind {
    #[default]
    News,
    /// Game/server update notes
    Update,
}

impl fmt::Display for NewsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NewsKind::News => write!(f, "news"),
            NewsKind::Update => write!(f, "update"),
        }
    }
}

impl FromStr for NewsKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "news" => Ok(NewsKind::News),
            "update" | "updates" => Ok(NewsKind::Update),
            _ => Err(ParseEnumError::new("news kind", s)),
        }
    }
}

try_from_string!(NewsKind);

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NewsEntry {
    pub id: i64,
    pub slug: String,
    #[sqlx(try_from = "String")]
    pub kind: NewsKind,
    pub author_id: Option<i64>,
    pub is_published: bool,
    /// Set on first publish and never moved afterwards
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NewsTranslation {
    pub id: i64,
    pub news_id: i64,
    pub language: String,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub content_html: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsView {
    #[serde(flatten)]
    pub entry: NewsEntry,
    pub translation: NewsTranslation,
    pub is_fallback: bool,
    pub available_languages: Vec<String>,
}

/// Listing row, already resolved to one language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsSummary {
    pub id: i64,
    pub slug: String,
    pub kind: NewsKind,
    pub published_at: Option<DateTime<Utc>>,
    pub language: String,
    pub title: String,
    pub summary: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateNewsInput {
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub kind: NewsKind,
    pub language: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub content: String,
    #[serde(default)]
    pub publish: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewsTranslationInput {
    pub language: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub content: String,
}
