//! News service
//!
//! News posts and game updates share one workflow: an entry is created as a
//! draft, gains translations, and is published. `published_at` is stamped on
//! the first publish only, so re-publishing does not bump an entry to the top
//! of the listing.

use crate::cache::{CacheLayer, SharedCache};
use crate::config::SiteConfig;
use crate::db::repositories::NewsRepository;
use crate::db::{page_window, Paged};
use crate::models::{
    CreateNewsInput, NewsEntry, NewsKind, NewsSummary, NewsTranslation, NewsTranslationInput, NewsView,
};
use crate::services::content::{pick_translation, resolve_slug, validate_language, validate_text, ContentServiceError};
use crate::services::markdown::MarkdownRenderer;
use anyhow::Context;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const CACHE_PREFIX: &str = "news:";
const SUMMARY_MAX_CHARS: usize = 280;

pub struct NewsService {
    repo: Arc<dyn NewsRepository>,
    cache: SharedCache,
    cache_ttl: Duration,
    renderer: MarkdownRenderer,
    site: SiteConfig,
}

impl NewsService {
    pub fn new(repo: Arc<dyn NewsRepository>, cache: SharedCache, cache_ttl: Duration, site: SiteConfig) -> Self {
        Self {
            repo,
            cache,
            cache_ttl,
            renderer: MarkdownRenderer::new(),
            site,
        }
    }

    pub async fn create(&self, input: CreateNewsInput, author_id: Option<i64>) -> Result<NewsView, ContentServiceError> {
        let language = validate_language(&input.language, &self.site)?;
        let title = validate_text(&input.title, &input.content)?;
        let slug = resolve_slug(input.slug.as_deref(), &title)?;

        if self.repo.get_by_slug(&slug).await.context("Failed to check slug")?.is_some() {
            return Err(ContentServiceError::Conflict(format!("Entry '{slug}' already exists")));
        }

        let entry = self
            .repo
            .create(&slug, input.kind, author_id)
            .await
            .context("Failed to create news entry")?;
        self.save_translation(entry.id, &language, &title, &input.summary, &input.content)
            .await?;
        if input.publish {
            self.repo.publish(entry.id).await.context("Failed to publish news entry")?;
        }

        self.invalidate().await;
        tracing::info!(slug = %entry.slug, kind = %entry.kind, "News entry created");
        self.get(&slug, &language, true).await
    }

    pub async fn upsert_translation(
        &self,
        slug: &str,
        input: NewsTranslationInput,
    ) -> Result<NewsView, ContentServiceError> {
        let entry = self.find(slug).await?;
        let language = validate_language(&input.language, &self.site)?;
        let title = validate_text(&input.title, &input.content)?;
        self.save_translation(entry.id, &language, &title, &input.summary, &input.content)
            .await?;
        self.invalidate().await;
        self.get(slug, &language, true).await
    }

    pub async fn publish(&self, slug: &str) -> Result<NewsEntry, ContentServiceError> {
        let entry = self.find(slug).await?;
        self.repo.publish(entry.id).await.context("Failed to publish news entry")?;
        self.invalidate().await;
        self.find(slug).await
    }

    pub async fn unpublish(&self, slug: &str) -> Result<NewsEntry, ContentServiceError> {
        let entry = self.find(slug).await?;
        self.repo.unpublish(entry.id).await.context("Failed to unpublish news entry")?;
        self.invalidate().await;
        self.find(slug).await
    }

    pub async fn get(&self, slug: &str, language: &str, include_unpublished: bool) -> Result<NewsView, ContentServiceError> {
        let cache_key = format!("{CACHE_PREFIX}entry:{slug}:{language}");
        if let Ok(Some(view)) = self.cache.get::<NewsView>(&cache_key).await {
            return Ok(view);
        }

        let entry = self.find(slug).await?;
        if !entry.is_published && !include_unpublished {
            return Err(ContentServiceError::NotFound);
        }
        let translations = self
            .repo
            .translations(entry.id)
            .await
            .context("Failed to load news translations")?;
        let available_languages = translations.iter().map(|t| t.language.clone()).collect();
        let (translation, is_fallback) = pick_translation(translations, language, &self.site.default_language)
            .ok_or(ContentServiceError::NotFound)?;

        let view = NewsView {
            entry,
            translation,
            is_fallback,
            available_languages,
        };
        if view.entry.is_published {
            let _ = self.cache.set(&cache_key, &view, self.cache_ttl).await;
        }
        Ok(view)
    }

    /// Published entries of one kind, newest first
    pub async fn list(
        &self,
        kind: NewsKind,
        language: &str,
        page: i64,
        per_page: i64,
    ) -> Result<Paged<NewsSummary>, ContentServiceError> {
        let (page, per_page, offset) = page_window(page, per_page);
        let cache_key = format!("{CACHE_PREFIX}list:{kind}:{language}:{page}:{per_page}");
        if let Ok(Some(cached)) = self.cache.get::<Paged<NewsSummary>>(&cache_key).await {
            return Ok(cached);
        }

        let entries = self
            .repo
            .list_published(kind, offset, per_page)
            .await
            .context("Failed to list news")?;
        let total = self.repo.count_published(kind).await.context("Failed to count news")?;

        let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
        let mut by_entry: HashMap<i64, Vec<NewsTranslation>> = HashMap::new();
        for t in self
            .repo
            .translations_for(&ids)
            .await
            .context("Failed to load news translations")?
        {
            by_entry.entry(t.news_id).or_default().push(t);
        }

        let items = entries
            .into_iter()
            .filter_map(|entry| {
                let (t, _) = pick_translation(by_entry.remove(&entry.id)?, language, &self.site.default_language)?;
                Some(NewsSummary {
                    id: entry.id,
                    slug: entry.slug,
                    kind: entry.kind,
                    published_at: entry.published_at,
                    language: t.language,
                    title: t.title,
                    summary: t.summary,
                })
            })
            .collect();

        let result = Paged::new(items, total, page, per_page);
        let _ = self.cache.set(&cache_key, &result, self.cache_ttl).await;
        Ok(result)
    }

    pub async fn delete(&self, slug: &str) -> Result<(), ContentServiceError> {
        let entry = self.find(slug).await?;
        self.repo.delete(entry.id).await.context("Failed to delete news entry")?;
        self.invalidate().await;
        tracing::info!(slug, "News entry deleted");
        Ok(())
    }

    async fn save_translation(
        &self,
        news_id: i64,
        language: &str,
        title: &str,
        summary: &str,
        content: &str,
    ) -> Result<NewsTranslation, ContentServiceError> {
        let summary = match summary.trim() {
            "" => self.renderer.excerpt(content, SUMMARY_MAX_CHARS),
            given => given.chars().take(SUMMARY_MAX_CHARS).collect(),
        };
        let translation = NewsTranslation {
            id: 0,
            news_id,
            language: language.to_string(),
            title: title.to_string(),
            summary,
            content: content.to_string(),
            content_html: self.renderer.render(content),
            updated_at: Utc::now(),
        };
        Ok(self
            .repo
            .upsert_translation(&translation)
            .await
            .context("Failed to save news translation")?)
    }

    async fn find(&self, slug: &str) -> Result<NewsEntry, ContentServiceError> {
        self.repo
            .get_by_slug(slug)
            .await
            .context("Failed to get news entry")?
            .ok_or(ContentServiceError::NotFound)
    }

    async fn invalidate(&self) {
        if let Err(e) = self.cache.delete_prefix(CACHE_PREFIX).await {
            tracing::warn!("Failed to invalidate news cache: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::repositories::test_support::setup_pool;
    use crate::db::repositories::SqlxNewsRepository;

    async fn setup_service() -> NewsService {
        let pool = setup_pool().await;
        NewsService::new(
            SqlxNewsRepository::boxed(pool),
            Arc::new(MemoryCache::new()),
            Duration::from_secs(60),
            SiteConfig {
                default_language: "en".to_string(),
                languages: vec!["en".to_string(), "es".to_string()],
                session_days: 7,
            },
        )
    }

    fn input(title: &str, kind: NewsKind, publish: bool) -> CreateNewsInput {
        CreateNewsInput {
            slug: None,
            kind,
            language: "en".to_string(),
            title: title.to_string(),
            summary: String::new(),
            content: format!("**{title}** is here. More details follow."),
            publish,
        }
    }

    #[tokio::test]
    async fn test_create_draft_then_publish() {
        let service = setup_service().await;
        let view = service.create(input("Season Two", NewsKind::News, false), None).await.unwrap();
        assert!(!view.entry.is_published);
        assert!(view.entry.published_at.is_none());
        assert_eq!(view.translation.summary, "Season Two is here. More details follow.");

        assert!(matches!(
            service.get("season-two", "en", false).await,
            Err(ContentServiceError::NotFound)
        ));

        let published = service.publish("season-two").await.unwrap();
        let first_stamp = published.published_at.unwrap();

        service.unpublish("season-two").await.unwrap();
        let republished = service.publish("season-two").await.unwrap();
        assert_eq!(republished.published_at, Some(first_stamp));
    }

    #[tokio::test]
    async fn test_list_by_kind_and_language() {
        let service = setup_service().await;
        service.create(input("Launch", NewsKind::News, true), None).await.unwrap();
        service.create(input("Patch 1.1", NewsKind::Update, true), None).await.unwrap();
        service.create(input("Patch 1.2", NewsKind::Update, true), None).await.unwrap();
        service.create(input("Patch 1.3", NewsKind::Update, false), None).await.unwrap();

        service
            .upsert_translation(
                "patch-1-2",
                NewsTranslationInput {
                    language: "es".to_string(),
                    title: "Parche 1.2".to_string(),
                    summary: "Resumen".to_string(),
                    content: "Contenido".to_string(),
                },
            )
            .await
            .unwrap();

        let updates = service.list(NewsKind::Update, "es", 1, 10).await.unwrap();
        assert_eq!(updates.total, 2);
        let titles: Vec<&str> = updates.items.iter().map(|s| s.title.as_str()).collect();
        assert!(titles.contains(&"Parche 1.2"));
        assert!(titles.contains(&"Patch 1.1"));

        let news = service.list(NewsKind::News, "en", 1, 10).await.unwrap();
        assert_eq!(news.total, 1);
        assert_eq!(news.items[0].slug, "launch");
    }

    #[tokio::test]
    async fn test_list_is_paginated() {
        let service = setup_service().await;
        for i in 0..5 {
            service
                .create(input(&format!("Update {i}"), NewsKind::Update, true), None)
                .await
                .unwrap();
        }
        let page = service.list(NewsKind::Update, "en", 2, 2).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total_pages(), 3);
    }

    #[tokio::test]
    async fn test_delete_invalidates_listing() {
        let service = setup_service().await;
        service.create(input("Gone Soon", NewsKind::News, true), None).await.unwrap();
        assert_eq!(service.list(NewsKind::News, "en", 1, 10).await.unwrap().total, 1);

        service.delete("gone-soon").await.unwrap();
        assert_eq!(service.list(NewsKind::News, "en", 1, 10).await.unwrap().total, 0);
        assert!(matches!(service.delete("gone-soon").await, Err(ContentServiceError::NotFound)));
    }
}
