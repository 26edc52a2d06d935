//! Wiki service
//!
//! Pages are addressed by slug and carry one translation per language.
//! Reads fall back from the requested language to the site default, then to
//! whatever translation exists. Published views are cached under `wiki:`.

use crate::cache::{CacheLayer, SharedCache};
use crate::config::SiteConfig;
use crate::db::repositories::WikiRepository;
use crate::models::{
    CreateWikiPageInput, WikiPage, WikiPageSummary, WikiPageView, WikiTranslation, WikiTranslationInput,
};
use crate::services::content::{pick_translation, resolve_slug, validate_language, validate_text, ContentServiceError};
use crate::services::markdown::MarkdownRenderer;
use anyhow::Context;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const CACHE_PREFIX: &str = "wiki:";

pub struct WikiService {
    repo: Arc<dyn WikiRepository>,
    cache: SharedCache,
    cache_ttl: Duration,
    renderer: MarkdownRenderer,
    site: SiteConfig,
}

impl WikiService {
    pub fn new(repo: Arc<dyn WikiRepository>, cache: SharedCache, cache_ttl: Duration, site: SiteConfig) -> Self {
        Self {
            repo,
            cache,
            cache_ttl,
            renderer: MarkdownRenderer::new(),
            site,
        }
    }

    pub async fn create_page(
        &self,
        input: CreateWikiPageInput,
        author_id: Option<i64>,
    ) -> Result<WikiPageView, ContentServiceError> {
        let language = validate_language(&input.language, &self.site)?;
        let title = validate_text(&input.title, &input.content)?;
        let slug = resolve_slug(input.slug.as_deref(), &title)?;

        if self.repo.get_by_slug(&slug).await.context("Failed to check slug")?.is_some() {
            return Err(ContentServiceError::Conflict(format!("Page '{slug}' already exists")));
        }

        let page = self
            .repo
            .create_page(&slug, author_id, input.publish)
            .await
            .context("Failed to create wiki page")?;
        let html = self.renderer.render(&input.content);
        self.repo
            .upsert_translation(page.id, &language, &title, &input.content, &html)
            .await
            .context("Failed to save wiki translation")?;

        self.invalidate().await;
        tracing::info!(slug = %page.slug, language = %language, "Wiki page created");
        self.get_page(&slug, &language, true).await
    }

    /// Add or replace one language of an existing page
    pub async fn upsert_translation(
        &self,
        slug: &str,
        input: WikiTranslationInput,
    ) -> Result<WikiPageView, ContentServiceError> {
        let page = self.find(slug).await?;
        let language = validate_language(&input.language, &self.site)?;
        let title = validate_text(&input.title, &input.content)?;
        let html = self.renderer.render(&input.content);

        self.repo
            .upsert_translation(page.id, &language, &title, &input.content, &html)
            .await
            .context("Failed to save wiki translation")?;

        self.invalidate().await;
        self.get_page(slug, &language, true).await
    }

    /// Resolve a page for `language`. Unpublished pages are only visible
    /// when `include_unpublished` is set.
    pub async fn get_page(
        &self,
        slug: &str,
        language: &str,
        include_unpublished: bool,
    ) -> Result<WikiPageView, ContentServiceError> {
        let cache_key = format!("{CACHE_PREFIX}page:{slug}:{language}");
        if let Ok(Some(view)) = self.cache.get::<WikiPageView>(&cache_key).await {
            return Ok(view);
        }

        let page = self.find(slug).await?;
        if !page.is_published && !include_unpublished {
            return Err(ContentServiceError::NotFound);
        }

        let translations = self
            .repo
            .translations(page.id)
            .await
            .context("Failed to load wiki translations")?;
        let available_languages = translations.iter().map(|t| t.language.clone()).collect();
        let (translation, is_fallback) = pick_translation(translations, language, &self.site.default_language)
            .ok_or(ContentServiceError::NotFound)?;

        let view = WikiPageView {
            page,
            translation,
            is_fallback,
            available_languages,
        };
        if view.page.is_published {
            let _ = self.cache.set(&cache_key, &view, self.cache_ttl).await;
        }
        Ok(view)
    }

    /// Page listing in one language, ordered by slug
    pub async fn list_pages(
        &self,
        language: &str,
        include_unpublished: bool,
    ) -> Result<Vec<WikiPageSummary>, ContentServiceError> {
        let cache_key = format!("{CACHE_PREFIX}list:{language}");
        if !include_unpublished {
            if let Ok(Some(list)) = self.cache.get::<Vec<WikiPageSummary>>(&cache_key).await {
                return Ok(list);
            }
        }

        let pages = self
            .repo
            .list_pages(include_unpublished)
            .await
            .context("Failed to list wiki pages")?;
        let mut by_page: HashMap<i64, Vec<WikiTranslation>> = HashMap::new();
        for translation in self
            .repo
            .all_translations(include_unpublished)
            .await
            .context("Failed to load wiki translations")?
        {
            by_page.entry(translation.page_id).or_default().push(translation);
        }

        let summaries: Vec<WikiPageSummary> = pages
            .into_iter()
            .filter_map(|page| {
                let translations = by_page.remove(&page.id)?;
                let (t, _) = pick_translation(translations, language, &self.site.default_language)?;
                Some(WikiPageSummary {
                    id: page.id,
                    slug: page.slug,
                    is_published: page.is_published,
                    language: t.language,
                    title: t.title,
                    updated_at: t.updated_at.max(page.updated_at),
                })
            })
            .collect();

        if !include_unpublished {
            let _ = self.cache.set(&cache_key, &summaries, self.cache_ttl).await;
        }
        Ok(summaries)
    }

    /// Every published page resolved for `language`
    pub async fn published_pages(&self, language: &str) -> Result<Vec<WikiPageView>, ContentServiceError> {
        let mut views = Vec::new();
        for summary in self.list_pages(language, false).await? {
            views.push(self.get_page(&summary.slug, language, false).await?);
        }
        Ok(views)
    }

    pub async fn set_published(&self, slug: &str, published: bool) -> Result<WikiPage, ContentServiceError> {
        let page = self.find(slug).await?;
        self.repo
            .set_published(page.id, published)
            .await
            .context("Failed to update wiki page")?;
        self.invalidate().await;
        self.find(slug).await
    }

    pub async fn delete_page(&self, slug: &str) -> Result<(), ContentServiceError> {
        let page = self.find(slug).await?;
        self.repo.delete_page(page.id).await.context("Failed to delete wiki page")?;
        self.invalidate().await;
        tracing::info!(slug, "Wiki page deleted");
        Ok(())
    }

    async fn find(&self, slug: &str) -> Result<WikiPage, ContentServiceError> {
        self.repo
            .get_by_slug(slug)
            .await
            .context("Failed to get wiki page")?
            .ok_or(ContentServiceError::NotFound)
    }

    async fn invalidate(&self) {
        if let Err(e) = self.cache.delete_prefix(CACHE_PREFIX).await {
            tracing::warn!("Failed to invalidate wiki cache: {e:#}");
        }
    }
}
