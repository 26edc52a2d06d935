//! Word filter repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::db::{DynDatabasePool, LastInsertId};
use crate::models::WordFilter;

#[async_trait]
pub trait WordFilterRepository: Send + Sync {
    /// All filters ordered by id
    async fn list(&self) -> Result<Vec<WordFilter>>;

    async fn create(&self, pattern: &str, is_active: bool) -> Result<WordFilter>;

    async fn delete(&self, id: i64) -> Result<bool>;

    async fn update(&self, id: i64, pattern: &str, is_active: bool) -> Result<bool>;
}

pub struct SqlxWordFilterRepository {
    pool: DynDatabasePool,
}

impl SqlxWordFilterRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn WordFilterRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl WordFilterRepository for SqlxWordFilterRepository {
    async fn list(&self) -> Result<Vec<WordFilter>> {
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, WordFilter>(
                "SELECT id, pattern, is_active, created_at FROM word_filters ORDER BY id",
            )
            .fetch_all(db)
            .await
            .context("Failed to list word filters")
        })
    }

    async fn create(&self, pattern: &str, is_active: bool) -> Result<WordFilter> {
        let now = Utc::now();
        let id = dispatch!(self.pool, |db| {
            sqlx::query("INSERT INTO word_filters (pattern, is_active, created_at) VALUES (?, ?, ?)")
                .bind(pattern)
                .bind(is_active)
                .bind(now)
                .execute(db)
                .await
                .map(|r| r.last_id())
                .context("Failed to create word filter")
        })?;

        Ok(WordFilter {
            id,
            pattern: pattern.to_string(),
            is_active,
            created_at: now,
        })
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        dispatch!(self.pool, |db| {
            sqlx::query("DELETE FROM word_filters WHERE id = ?")
                .bind(id)
                .execute(db)
                .await
                .map(|r| r.rows_affected() > 0)
                .context("Failed to delete word filter")
        })
    }

    async fn update(&self, id: i64, pattern: &str, is_active: bool) -> Result<bool> {
        dispatch!(self.pool, |db| {
            sqlx::query("UPDATE word_filters SET pattern = ?, is_active = ? WHERE id = ?")
                .bind(pattern)
                .bind(is_active)
                .bind(id)
                .execute(db)
                .await
                .map(|r| r.rows_affected() > 0)
                .context("Failed to update word filter")
        })
    }
}
