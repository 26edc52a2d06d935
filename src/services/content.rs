//! Shared pieces of the wiki and news services: error type, language
//! resolution and slug handling.

use crate::config::SiteConfig;
use crate::models::{NewsTranslation, WikiTranslation};
use crate::services::markdown::{is_valid_slug, slugify};

const TITLE_MAX_LEN: usize = 200;
const CONTENT_MAX_LEN: usize = 200_000;

#[derive(Debug, thiserror::Error)]
pub enum ContentServiceError {
    #[error("Not found")]
    NotFound,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// A row that belongs to one language
pub trait Translated {
    fn language(&self) -> &str;
}

impl Translated for WikiTranslation {
    fn language(&self) -> &str {
        &self.language
    }
}

impl Translated for NewsTranslation {
    fn language(&self) -> &str {
        &self.language
    }
}

/// Pick the requested language, else the site default, else the first one.
///
/// The flag is true when the returned translation is not the requested one.
pub fn pick_translation<T: Translated>(translations: Vec<T>, requested: &str, default: &str) -> Option<(T, bool)> {
    let position = translations
        .iter()
        .position(|t| t.language().eq_ignore_ascii_case(requested))
        .map(|i| (i, false))
        .or_else(|| {
            translations
                .iter()
                .position(|t| t.language().eq_ignore_ascii_case(default))
                .map(|i| (i, true))
        })
        .or_else(|| (!translations.is_empty()).then_some((0, true)));

    let (index, fallback) = position?;
    translations.into_iter().nth(index).map(|t| (t, fallback))
}

/// Choose the response language from the query string, then the
/// `Accept-Language` header, then the site default.
pub fn resolve_language(query: Option<&str>, accept_language: Option<&str>, site: &SiteConfig) -> String {
    if let Some(lang) = query.map(str::trim).filter(|l| site.supports_language(l)) {
        return lang.to_lowercase();
    }

    if let Some(header) = accept_language {
        for tag in header.split(',') {
            let tag = tag.split(';').next().unwrap_or_default().trim();
            if tag.is_empty() || tag == "*" {
                continue;
            }
            if site.supports_language(tag) {
                return tag.to_lowercase();
            }
            let primary = tag.split('-').next().unwrap_or_default();
            if site.supports_language(primary) {
                return primary.to_lowercase();
            }
        }
    }

    site.default_language.clone()
}

pub(crate) fn validate_language(language: &str, site: &SiteConfig) -> Result<String, ContentServiceError> {
    let language = language.trim();
    if !site.supports_language(language) {
        return Err(ContentServiceError::ValidationError(format!(
            "Unsupported language '{language}'"
        )));
    }
    Ok(language.to_lowercase())
}

pub(crate) fn validate_text(title: &str, content: &str) -> Result<String, ContentServiceError> {
    let title = title.trim();
    if title.is_empty() || title.chars().count() > TITLE_MAX_LEN {
        return Err(ContentServiceError::ValidationError(format!(
            "Title must be 1-{TITLE_MAX_LEN} characters"
        )));
    }
    if content.len() > CONTENT_MAX_LEN {
        return Err(ContentServiceError::ValidationError("Content is too long".to_string()));
    }
    Ok(title.to_string())
}

/// Use the given slug if canonical, otherwise derive one from the title
pub(crate) fn resolve_slug(slug: Option<&str>, title: &str) -> Result<String, ContentServiceError> {
    match slug.map(str::trim).filter(|s| !s.is_empty()) {
        Some(slug) if is_valid_slug(slug) => Ok(slug.to_string()),
        Some(slug) => Err(ContentServiceError::ValidationError(format!(
            "Invalid slug '{slug}': use lowercase letters, digits and dashes"
        ))),
        None => {
            let slug = slugify(title);
            if slug.is_empty() {
                return Err(ContentServiceError::ValidationError(
                    "Cannot derive a slug from the title; provide one".to_string(),
                ));
            }
            Ok(slug)
        }
    }
}
