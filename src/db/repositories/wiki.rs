//! Wiki repository
//!
//! Pages and their per-language translations.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::db::{DynDatabasePool, LastInsertId};
use crate::models::{WikiPage, WikiTranslation};

const PAGE_COLUMNS: &str = "id, slug, author_id, is_published, created_at, updated_at";
const TRANSLATION_COLUMNS: &str =
    "id, page_id, language, title, content, content_html, updated_at";

#[async_trait]
pub trait WikiRepository: Send + Sync {
    async fn create_page(&self, slug: &str, author_id: Option<i64>, is_published: bool) -> Result<WikiPage>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<WikiPage>>;

    async fn get_by_id(&self, id: i64) -> Result<Option<WikiPage>>;

    /// Pages ordered by slug
    async fn list_pages(&self, include_unpublished: bool) -> Result<Vec<WikiPage>>;

    async fn set_published(&self, id: i64, is_published: bool) -> Result<bool>;

    /// Delete a page together with its translations
    async fn delete_page(&self, id: i64) -> Result<bool>;

    /// Insert or replace the translation for `(page_id, language)`
    async fn upsert_translation(
        &self,
        page_id: i64,
        language: &str,
        title: &str,
        content: &str,
        content_html: &str,
    ) -> Result<WikiTranslation>;

    async fn translations(&self, page_id: i64) -> Result<Vec<WikiTranslation>>;

    /// Translations of every listed page, ordered by page then language
    async fn all_translations(&self, include_unpublished: bool) -> Result<Vec<WikiTranslation>>;
}

pub struct SqlxWikiRepository {
    pool: DynDatabasePool,
}

impl SqlxWikiRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn WikiRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl WikiRepository for SqlxWikiRepository {
    async fn create_page(&self, slug: &str, author_id: Option<i64>, is_published: bool) -> Result<WikiPage> {
        let now = Utc::now();
        let id = dispatch!(self.pool, |db| {
            sqlx::query(
                "INSERT INTO wiki_pages (slug, author_id, is_published, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(slug)
            .bind(author_id)
            .bind(is_published)
            .bind(now)
            .bind(now)
            .execute(db)
            .await
            .map(|r| r.last_id())
            .context("Failed to create wiki page")
        })?;

        Ok(WikiPage {
            id,
            slug: slug.to_string(),
            author_id,
            is_published,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<WikiPage>> {
        let sql = format!("SELECT {PAGE_COLUMNS} FROM wiki_pages WHERE slug = ?");
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, WikiPage>(&sql)
                .bind(slug)
                .fetch_optional(db)
                .await
                .context("Failed to get wiki page by slug")
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<WikiPage>> {
        let sql = format!("SELECT {PAGE_COLUMNS} FROM wiki_pages WHERE id = ?");
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, WikiPage>(&sql)
                .bind(id)
                .fetch_optional(db)
                .await
                .context("Failed to get wiki page")
        })
    }

    async fn list_pages(&self, include_unpublished: bool) -> Result<Vec<WikiPage>> {
        let sql = format!(
            "SELECT {PAGE_COLUMNS} FROM wiki_pages WHERE is_published = 1 OR ? ORDER BY slug"
        );
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, WikiPage>(&sql)
                .bind(include_unpublished)
                .fetch_all(db)
                .await
                .context("Failed to list wiki pages")
        })
    }

    async fn set_published(&self, id: i64, is_published: bool) -> Result<bool> {
        let now = Utc::now();
        let affected = dispatch!(self.pool, |db| {
            sqlx::query("UPDATE wiki_pages SET is_published = ?, updated_at = ? WHERE id = ?")
                .bind(is_published)
                .bind(now)
                .bind(id)
                .execute(db)
                .await
                .map(|r| r.rows_affected())
                .context("Failed to update wiki page")
        })?;
        Ok(affected > 0)
    }

    async fn delete_page(&self, id: i64) -> Result<bool> {
        dispatch!(self.pool, |db| {
            let mut tx = db.begin().await.context("Failed to begin transaction")?;
            sqlx::query("DELETE FROM wiki_page_translations WHERE page_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete wiki translations")?;
            let affected = sqlx::query("DELETE FROM wiki_pages WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete wiki page")?
                .rows_affected();
            tx.commit().await.context("Failed to commit wiki page delete")?;
            Ok(affected > 0)
        })
    }

    async fn upsert_translation(
        &self,
        page_id: i64,
        language: &str,
        title: &str,
        content: &str,
        content_html: &str,
    ) -> Result<WikiTranslation> {
        let now = Utc::now();
        let id = dispatch!(self.pool, |db| {
            let mut tx = db.begin().await.context("Failed to begin transaction")?;
            let existing: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM wiki_page_translations WHERE page_id = ? AND language = ?",
            )
            .bind(page_id)
            .bind(language)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to look up wiki translation")?;

            let id = match existing {
                Some(id) => {
                    sqlx::query(
                        "UPDATE wiki_page_translations SET title = ?, content = ?, content_html = ?, updated_at = ? WHERE id = ?",
                    )
                    .bind(title)
                    .bind(content)
                    .bind(content_html)
                    .bind(now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to update wiki translation")?;
                    id
                }
                None => sqlx::query(
                    "INSERT INTO wiki_page_translations (page_id, language, title, content, content_html, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(page_id)
                .bind(language)
                .bind(title)
                .bind(content)
                .bind(content_html)
                .bind(now)
                .execute(&mut *tx)
                .await
                .context("Failed to insert wiki translation")?
                .last_id(),
            };

            sqlx::query("UPDATE wiki_pages SET updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(page_id)
                .execute(&mut *tx)
                .await
                .context("Failed to touch wiki page")?;

            tx.commit().await.context("Failed to commit wiki translation")?;
            anyhow::Ok(id)
        })?;

        Ok(WikiTranslation {
            id,
            page_id,
            language: language.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            content_html: content_html.to_string(),
            updated_at: now,
        })
    }

    async fn translations(&self, page_id: i64) -> Result<Vec<WikiTranslation>> {
        let sql = format!(
            "SELECT {TRANSLATION_COLUMNS} FROM wiki_page_translations WHERE page_id = ? ORDER BY language"
        );
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, WikiTranslation>(&sql)
                .bind(page_id)
                .fetch_all(db)
                .await
                .context("Failed to load wiki translations")
        })
    }

    async fn all_translations(&self, include_unpublished: bool) -> Result<Vec<WikiTranslation>> {
        let sql = r#"
            SELECT t.id, t.page_id, t.language, t.title, t.content, t.content_html, t.updated_at
            FROM wiki_page_translations t
            JOIN wiki_pages p ON p.id = t.page_id
            WHERE p.is_published = 1 OR ?
            ORDER BY t.page_id, t.language
        "#;
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, WikiTranslation>(sql)
                .bind(include_unpublished)
                .fetch_all(db)
                .await
                .context("Failed to load wiki translations")
        })
    }
}
