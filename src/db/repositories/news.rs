//! News repository
//!
//! News posts and game updates share the `news` table and differ by `kind`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::db::{DynDatabasePool, LastInsertId};
use crate::models::{NewsEntry, NewsKind, NewsTranslation};

const NEWS_COLUMNS: &str =
    "id, slug, kind, author_id, is_published, published_at, created_at, updated_at";
const TRANSLATION_COLUMNS: &str =
    "id, news_id, language, title, summary, content, content_html, updated_at";

#[async_trait]
pub trait NewsRepository: Send + Sync {
    async fn create(&self, slug: &str, kind: NewsKind, author_id: Option<i64>) -> Result<NewsEntry>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<NewsEntry>>;

    async fn get_by_id(&self, id: i64) -> Result<Option<NewsEntry>>;

    /// Mark published; `published_at` is only set the first time
    async fn publish(&self, id: i64) -> Result<bool>;

    async fn unpublish(&self, id: i64) -> Result<bool>;

    async fn delete(&self, id: i64) -> Result<bool>;

    /// Published entries of a kind, newest first
    async fn list_published(&self, kind: NewsKind, offset: i64, limit: i64) -> Result<Vec<NewsEntry>>;

    async fn count_published(&self, kind: NewsKind) -> Result<i64>;

    async fn upsert_translation(&self, translation: &NewsTranslation) -> Result<NewsTranslation>;

    async fn translations(&self, news_id: i64) -> Result<Vec<NewsTranslation>>;

    /// Translations for several entries at once
    async fn translations_for(&self, news_ids: &[i64]) -> Result<Vec<NewsTranslation>>;
}

pub struct SqlxNewsRepository {
    pool: DynDatabasePool,
}

impl SqlxNewsRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn NewsRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl NewsRepository for SqlxNewsRepository {
    async fn create(&self, slug: &str, kind: NewsKind, author_id: Option<i64>) -> Result<NewsEntry> {
        let now = Utc::now();
        let kind_str = kind.to_string();
        let id = dispatch!(self.pool, |db| {
            sqlx::query(
                "INSERT INTO news (slug, kind, author_id, is_published, created_at, updated_at) VALUES (?, ?, ?, 0, ?, ?)",
            )
            .bind(slug)
            .bind(&kind_str)
            .bind(author_id)
            .bind(now)
            .bind(now)
            .execute(db)
            .await
            .map(|r| r.last_id())
            .context("Failed to create news entry")
        })?;

        Ok(NewsEntry {
            id,
            slug: slug.to_string(),
            kind,
            author_id,
            is_published: false,
            published_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<NewsEntry>> {
        let sql = format!("SELECT {NEWS_COLUMNS} FROM news WHERE slug = ?");
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, NewsEntry>(&sql)
                .bind(slug)
                .fetch_optional(db)
                .await
                .context("Failed to get news entry by slug")
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<NewsEntry>> {
        let sql = format!("SELECT {NEWS_COLUMNS} FROM news WHERE id = ?");
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, NewsEntry>(&sql)
                .bind(id)
                .fetch_optional(db)
                .await
                .context("Failed to get news entry")
        })
    }

    async fn publish(&self, id: i64) -> Result<bool> {
        let now = Utc::now();
        let affected = dispatch!(self.pool, |db| {
            sqlx::query(
                "UPDATE news SET is_published = 1, published_at = COALESCE(published_at, ?), updated_at = ? WHERE id = ?",
            )
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(db)
            .await
            .map(|r| r.rows_affected())
            .context("Failed to publish news entry")
        })?;
        Ok(affected > 0)
    }

    async fn unpublish(&self, id: i64) -> Result<bool> {
        let now = Utc::now();
        let affected = dispatch!(self.pool, |db| {
            sqlx::query("UPDATE news SET is_published = 0, updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(id)
                .execute(db)
                .await
                .map(|r| r.rows_affected())
                .context("Failed to unpublish news entry")
        })?;
        Ok(affected > 0)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        dispatch!(self.pool, |db| {
            let mut tx = db.begin().await.context("Failed to begin transaction")?;
            sqlx::query("DELETE FROM news_translations WHERE news_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete news translations")?;
            let affected = sqlx::query("DELETE FROM news WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete news entry")?
                .rows_affected();
            tx.commit().await.context("Failed to commit news delete")?;
            Ok(affected > 0)
        })
    }

    async fn list_published(&self, kind: NewsKind, offset: i64, limit: i64) -> Result<Vec<NewsEntry>> {
        let sql = format!(
            "SELECT {NEWS_COLUMNS} FROM news WHERE kind = ? AND is_published = 1 ORDER BY published_at DESC, id DESC LIMIT ? OFFSET ?"
        );
        let kind = kind.to_string();
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, NewsEntry>(&sql)
                .bind(&kind)
                .bind(limit)
                .bind(offset)
                .fetch_all(db)
                .await
                .context("Failed to list news")
        })
    }

    async fn count_published(&self, kind: NewsKind) -> Result<i64> {
        let kind = kind.to_string();
        dispatch!(self.pool, |db| {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM news WHERE kind = ? AND is_published = 1")
                .bind(&kind)
                .fetch_one(db)
                .await
                .context("Failed to count news")
        })
    }

    async fn upsert_translation(&self, t: &NewsTranslation) -> Result<NewsTranslation> {
        let now = Utc::now();
        let id = dispatch!(self.pool, |db| {
            let mut tx = db.begin().await.context("Failed to begin transaction")?;
            let existing: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM news_translations WHERE news_id = ? AND language = ?",
            )
            .bind(t.news_id)
            .bind(&t.language)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to look up news translation")?;

            let id = match existing {
                Some(id) => {
                    sqlx::query(
                        "UPDATE news_translations SET title = ?, summary = ?, content = ?, content_html = ?, updated_at = ? WHERE id = ?",
                    )
                    .bind(&t.title)
                    .bind(&t.summary)
                    .bind(&t.content)
                    .bind(&t.content_html)
                    .bind(now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to update news translation")?;
                    id
                }
                None => sqlx::query(
                    "INSERT INTO news_translations (news_id, language, title, summary, content, content_html, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(t.news_id)
                .bind(&t.language)
                .bind(&t.title)
                .bind(&t.summary)
                .bind(&t.content)
                .bind(&t.content_html)
                .bind(now)
                .execute(&mut *tx)
                .await
                .context("Failed to insert news translation")?
                .last_id(),
            };

            tx.commit().await.context("Failed to commit news translation")?;
            anyhow::Ok(id)
        })?;

        Ok(NewsTranslation {
            id,
            updated_at: now,
            ..t.clone()
        })
    }

    async fn translations(&self, news_id: i64) -> Result<Vec<NewsTranslation>> {
        self.translations_for(&[news_id]).await
    }

    async fn translations_for(&self, news_ids: &[i64]) -> Result<Vec<NewsTranslation>> {
        if news_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; news_ids.len()].join(", ");
        let sql = format!(
            "SELECT {TRANSLATION_COLUMNS} FROM news_translations WHERE news_id IN ({placeholders}) ORDER BY news_id, language"
        );
        dispatch!(self.pool, |db| {
            let mut query = sqlx::query_as::<_, NewsTranslation>(&sql);
            for id in news_ids {
                query = query.bind(*id);
            }
            query.fetch_all(db).await.context("Failed to load news translations")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::setup_pool;

    fn translation(news_id: i64, language: &str, title: &str) -> NewsTranslation {
        NewsTranslation {
            id: 0,
            news_id,
            language: language.to_string(),
            title: title.to_string(),
            summary: String::new(),
            content: String::new(),
            content_html: String::new(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_sets_timestamp_once() {
        let repo = SqlxNewsRepository::new(setup_pool().await);
        let entry = repo.create("launch", NewsKind::News, None).await.unwrap();
        assert!(entry.published_at.is_none());

        repo.publish(entry.id).await.unwrap();
        let first = repo.get_by_id(entry.id).await.unwrap().unwrap().published_at;
        assert!(first.is_some());

        repo.unpublish(entry.id).await.unwrap();
        repo.publish(entry.id).await.unwrap();
        let again = repo.get_by_id(entry.id).await.unwrap().unwrap();
        assert!(again.is_published);
        assert_eq!(again.published_at, first);
    }

    #[tokio::test]
    async fn test_list_by_kind() {
        let repo = SqlxNewsRepository::new(setup_pool().await);
        let news = repo.create("a", NewsKind::News, None).await.unwrap();
        let update = repo.create("b", NewsKind::Update, None).await.unwrap();
        repo.create("c", NewsKind::News, None).await.unwrap();
        repo.publish(news.id).await.unwrap();
        repo.publish(update.id).await.unwrap();

        let listed = repo.list_published(NewsKind::News, 0, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].slug, "a");
        assert_eq!(repo.count_published(NewsKind::Update).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_translations_for_many() {
        let repo = SqlxNewsRepository::new(setup_pool().await);
        let a = repo.create("a", NewsKind::News, None).await.unwrap();
        let b = repo.create("b", NewsKind::News, None).await.unwrap();
        repo.upsert_translation(&translation(a.id, "en", "A")).await.unwrap();
        repo.upsert_translation(&translation(b.id, "en", "B")).await.unwrap();
        repo.upsert_translation(&translation(b.id, "en", "B2")).await.unwrap();

        let all = repo.translations_for(&[a.id, b.id]).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].title, "B2");
        assert!(repo.translations_for(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_translations() {
        let repo = SqlxNewsRepository::new(setup_pool().await);
        let entry = repo.create("gone", NewsKind::Update, None).await.unwrap();
        repo.upsert_translation(&translation(entry.id, "en", "Gone")).await.unwrap();

        assert!(repo.delete(entry.id).await.unwrap());
        assert!(repo.translations(entry.id).await.unwrap().is_empty());
    }
}
