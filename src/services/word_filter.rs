//! Word filters
//!
//! Active filters are whole-word, case-insensitive phrases. Posts and
//! comments that contain one are rejected. The active list is cached under
//! `filters:active` so every post does not hit the database.

use crate::cache::{CacheLayer, SharedCache};
use crate::db::repositories::WordFilterRepository;
use crate::models::WordFilter;
use anyhow::Context;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const CACHE_KEY: &str = "filters:active";
const CACHE_TTL: Duration = Duration::from_secs(300);
const PATTERN_MAX_LEN: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum WordFilterError {
    #[error("Word filter not found")]
    NotFound,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Counts from [`WordFilterService::clean`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterCleanup {
    pub normalized: usize,
    pub removed_empty: usize,
    pub removed_duplicates: usize,
}

/// Canonical pattern text: trimmed, lowercase, inner whitespace collapsed
pub fn normalize_pattern(pattern: &str) -> String {
    pattern.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Build one matcher for a set of phrases.
///
/// A phrase only matches when it is not glued to other letters, digits or
/// underscores on either side.
pub fn build_matcher(patterns: &[String]) -> Result<Option<Regex>, regex::Error> {
    let alternatives: Vec<String> = patterns
        .iter()
        .map(|p| normalize_pattern(p))
        .filter(|p| !p.is_empty())
        .map(|p| regex::escape(&p).replace(' ', r"\s+"))
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    let source = format!(r"(?:^|[^\p{{L}}\p{{N}}_])(?:{})(?:$|[^\p{{L}}\p{{N}}_])", alternatives.join("|"));
    RegexBuilder::new(&source).case_insensitive(true).build().map(Some)
}

/// Matcher compiled from one snapshot of the active pattern list
struct CompiledFilters {
    patterns: Vec<String>,
    matcher: Option<Regex>,
}

impl CompiledFilters {
    fn is_match(&self, text: &str) -> bool {
        self.matcher.as_ref().is_some_and(|re| re.is_match(text))
    }
}

pub struct WordFilterService {
    repo: Arc<dyn WordFilterRepository>,
    cache: SharedCache,
    compiled: RwLock<Option<CompiledFilters>>,
}

impl WordFilterService {
    pub fn new(repo: Arc<dyn WordFilterRepository>, cache: SharedCache) -> Self {
        Self {
            repo,
            cache,
            compiled: RwLock::new(None),
        }
    }

    /// Whether `text` contains an active filtered phrase.
    ///
    /// The compiled matcher is reused while the active pattern list is unchanged.
    pub async fn contains_blocked(&self, text: &str) -> Result<bool, WordFilterError> {
        let patterns = self.active_patterns().await?;
        {
            let compiled = self.compiled.read().await;
            if let Some(current) = compiled.as_ref().filter(|c| c.patterns == patterns) {
                return Ok(current.is_match(text));
            }
        }

        let matcher = build_matcher(&patterns).context("Failed to compile word filters")?;
        tracing::debug!(patterns = patterns.len(), "Word filter matcher compiled");
        let fresh = CompiledFilters { patterns, matcher };
        let blocked = fresh.is_match(text);
        *self.compiled.write().await = Some(fresh);
        Ok(blocked)
    }

    pub async fn list_filters(&self) -> Result<Vec<WordFilter>, WordFilterError> {
        Ok(self.repo.list().await.context("Failed to list word filters")?)
    }

    pub async fn add_filter(&self, pattern: &str, is_active: bool) -> Result<WordFilter, WordFilterError> {
        let pattern = normalize_pattern(pattern);
        if pattern.is_empty() || pattern.chars().count() > PATTERN_MAX_LEN {
            return Err(WordFilterError::ValidationError(format!(
                "Pattern must be 1-{PATTERN_MAX_LEN} characters"
            )));
        }
        let existing = self.list_filters().await?;
        if let Some(found) = existing.into_iter().find(|f| f.pattern == pattern) {
            if is_active && !found.is_active {
                self.repo
                    .update(found.id, &found.pattern, true)
                    .await
                    .context("Failed to activate word filter")?;
                self.invalidate().await;
                return Ok(WordFilter { is_active: true, ..found });
            }
            return Ok(found);
        }

        let created = self
            .repo
            .create(&pattern, is_active)
            .await
            .context("Failed to create word filter")?;
        self.invalidate().await;
        Ok(created)
    }

    pub async fn remove_filter(&self, id: i64) -> Result<(), WordFilterError> {
        if !self.repo.delete(id).await.context("Failed to delete word filter")? {
            return Err(WordFilterError::NotFound);
        }
        self.invalidate().await;
        Ok(())
    }

    /// Normalise stored patterns and drop empty or duplicate rows.
    ///
    /// Of a group of duplicates the lowest id survives; it is active when
    /// any member of the group was.
    pub async fn clean(&self) -> Result<FilterCleanup, WordFilterError> {
        let filters = self.list_filters().await?;
        let mut report = FilterCleanup::default();
        let mut survivors: Vec<(WordFilter, String, bool)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut doomed: Vec<i64> = Vec::new();

        for filter in filters {
            let normalized = normalize_pattern(&filter.pattern);
            if normalized.is_empty() {
                doomed.push(filter.id);
                report.removed_empty += 1;
                continue;
            }
            match index.get(&normalized) {
                Some(&i) => {
                    survivors[i].2 |= filter.is_active;
                    doomed.push(filter.id);
                    report.removed_duplicates += 1;
                }
                None => {
                    index.insert(normalized.clone(), survivors.len());
                    let active = filter.is_active;
                    survivors.push((filter, normalized, active));
                }
            }
        }

        for id in doomed {
            self.repo.delete(id).await.context("Failed to delete word filter")?;
        }
        for (filter, pattern, active) in survivors {
            if filter.pattern != pattern || filter.is_active != active {
                self.repo
                    .update(filter.id, &pattern, active)
                    .await
                    .context("Failed to update word filter")?;
                report.normalized += 1;
            }
        }

        self.invalidate().await;
        tracing::info!(
            normalized = report.normalized,
            removed_empty = report.removed_empty,
            removed_duplicates = report.removed_duplicates,
            "Word filters cleaned"
        );
        Ok(report)
    }

    async fn active_patterns(&self) -> Result<Vec<String>, WordFilterError> {
        if let Ok(Some(patterns)) = self.cache.get::<Vec<String>>(CACHE_KEY).await {
            return Ok(patterns);
        }
        let patterns: Vec<String> = self
            .list_filters()
            .await?
            .into_iter()
            .filter(|f| f.is_active)
            .map(|f| f.pattern)
            .collect();
        let _ = self.cache.set(CACHE_KEY, &patterns, CACHE_TTL).await;
        Ok(patterns)
    }

    async fn invalidate(&self) {
        *self.compiled.write().await = None;
        if let Err(e) = self.cache.delete(CACHE_KEY).await {
            tracing::warn!("Failed to invalidate word filter cache: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::repositories::test_support::setup_pool;
    use crate::db::repositories::SqlxWordFilterRepository;

    fn matcher(words: &[&str]) -> Regex {
        let patterns: Vec<String> = words.iter().map(|w| w.to_string()).collect();
        build_matcher(&patterns).unwrap().unwrap()
    }

    #[test]
    fn test_whole_word_matching() {
        let re = matcher(&["grief", "free gold"]);
        assert!(re.is_match("stop the GRIEF please"));
        assert!(re.is_match("grief"));
        assert!(re.is_match("grief!"));
        assert!(!re.is_match("griefing is a word"));
        assert!(!re.is_match("begrief"));
        assert!(re.is_match("get FREE   gold now"));
        assert!(!re.is_match("freegold"));
    }

    #[test]
    fn test_special_characters_are_literal() {
        let re = matcher(&["a.b", "c++"]);
        assert!(re.is_match("this a.b that"));
        assert!(!re.is_match("this axb that"));
        assert!(re.is_match("I like c++ ok"));
    }

    #[test]
    fn test_empty_set_has_no_matcher() {
        assert!(build_matcher(&[]).unwrap().is_none());
        assert!(build_matcher(&["   ".to_string()]).unwrap().is_none());
    }

    async fn setup_service() -> (WordFilterService, Arc<dyn WordFilterRepository>) {
        let pool = setup_pool().await;
        let repo = SqlxWordFilterRepository::boxed(pool);
        (WordFilterService::new(repo.clone(), Arc::new(MemoryCache::new())), repo)
    }

    #[tokio::test]
    async fn test_contains_blocked_tracks_edits() {
        let (service, _) = setup_service().await;
        assert!(!service.contains_blocked("hello griefer").await.unwrap());

        let filter = service.add_filter("  Griefer ", true).await.unwrap();
        assert_eq!(filter.pattern, "griefer");
        assert!(service.contains_blocked("hello griefer").await.unwrap());

        let inactive = service.add_filter("spam", false).await.unwrap();
        assert!(!service.contains_blocked("spam spam").await.unwrap());
        let reactivated = service.add_filter("SPAM", true).await.unwrap();
        assert_eq!(reactivated.id, inactive.id);
        assert!(service.contains_blocked("spam spam").await.unwrap());

        service.remove_filter(filter.id).await.unwrap();
        assert!(!service.contains_blocked("hello griefer").await.unwrap());
        assert!(matches!(
            service.remove_filter(filter.id).await,
            Err(WordFilterError::NotFound)
        ));
        assert!(matches!(
            service.add_filter("   ", true).await,
            Err(WordFilterError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_clean_normalizes_and_dedups() {
        let (service, repo) = setup_service().await;
        let first = repo.create(" Scam ", false).await.unwrap();
        repo.create("scam", true).await.unwrap();
        repo.create("   ", true).await.unwrap();
        repo.create("SCAM", false).await.unwrap();
        let other = repo.create("bot", true).await.unwrap();

        let report = service.clean().await.unwrap();
        assert_eq!(
            report,
            FilterCleanup {
                normalized: 1,
                removed_empty: 1,
                removed_duplicates: 2,
            }
        );

        let remaining = service.list_filters().await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].id, first.id);
        assert_eq!(remaining[0].pattern, "scam");
        assert!(remaining[0].is_active);
        assert_eq!(remaining[1].id, other.id);

        assert_eq!(service.clean().await.unwrap(), FilterCleanup::default());
    }

    #[tokio::test]
    async fn test_matcher_is_compiled_once_per_pattern_list() {
        let pool = setup_pool().await;
        let cache: SharedCache = Arc::new(MemoryCache::new());
        let service = WordFilterService::new(SqlxWordFilterRepository::boxed(pool), cache.clone());
        service.add_filter("grief", true).await.unwrap();
        assert!(service.compiled.read().await.is_none());

        assert!(service.contains_blocked("no grief here").await.unwrap());
        assert!(!service.contains_blocked("all good").await.unwrap());
        {
            let compiled = service.compiled.read().await;
            let current = compiled.as_ref().unwrap();
            assert_eq!(current.patterns, vec!["grief".to_string()]);
            assert!(current.matcher.is_some());
        }

        // Edits drop the compiled matcher
        service.add_filter("scam", true).await.unwrap();
        assert!(service.compiled.read().await.is_none());
        assert!(service.contains_blocked("a scam").await.unwrap());

        // A pattern list that changed underneath is recompiled
        cache.set(CACHE_KEY, &vec!["bot".to_string()], CACHE_TTL).await.unwrap();
        assert!(!service.contains_blocked("a scam").await.unwrap());
        assert!(service.contains_blocked("a bot").await.unwrap());
    }
}
