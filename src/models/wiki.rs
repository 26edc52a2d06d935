//! Wiki models
//!
//! A page is language-neutral (slug, author, publish flag); its text lives in
//! one translation row per language.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WikiPage {
    pub id: i64,
    pub slug: String,
    pub author_id: Option<i64>,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WikiTranslation {
    pub id: i64,
    pub page_id: i64,
    pub language: String,
    pub title: String,
    /// Markdown source
    pub content: String,
    /// Rendered HTML
    pub content_html: String,
    pub updated_at: DateTime<Utc>,
}

/// A page resolved for one language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiPageView {
    #[serde(flatten)]
    pub page: WikiPage,
    pub translation: WikiTranslation,
    /// True when the requested language was missing and another was served
    pub is_fallback: bool,
    pub available_languages: Vec<String>,
}

/// Row used for page listings
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WikiPageSummary {
    pub id: i64,
    pub slug: String,
    pub is_published: bool,
    pub language: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWikiPageInput {
    /// Generated from the title when absent
    #[serde(default)]
    pub slug: Option<String>,
    pub language: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub publish: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WikiTranslationInput {
    pub language: String,
    pub title: String,
    pub content: String,
}
