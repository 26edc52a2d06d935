//! Comment repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::db::{DynDatabasePool, LastInsertId};
use crate::models::Comment;

const COMMENT_SELECT: &str = r#"
    SELECT c.id, c.post_id, c.author_id, u.username AS author_username, c.content, c.created_at
    FROM post_comments c
    JOIN users u ON u.id = c.author_id
"#;

/// Comment repository trait
#[async_trait]
pub trait CommentRepository: Send + Sync {
    /// Create a comment and bump the post's comment count
    async fn create(&self, post_id: i64, author_id: i64, content: &str) -> Result<Comment>;

    async fn get(&self, id: i64) -> Result<Option<Comment>>;

    /// Delete a comment and decrement the post's comment count
    async fn delete(&self, id: i64) -> Result<bool>;

    /// Comments on a post, oldest first
    async fn list_by_post(&self, post_id: i64, offset: i64, limit: i64) -> Result<Vec<Comment>>;

    async fn count_by_post(&self, post_id: i64) -> Result<i64>;
}

pub struct SqlxCommentRepository {
    pool: DynDatabasePool,
}

impl SqlxCommentRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CommentRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl CommentRepository for SqlxCommentRepository {
    async fn create(&self, post_id: i64, author_id: i64, content: &str) -> Result<Comment> {
        let now = Utc::now();
        let id = dispatch!(self.pool, |db| {
            let mut tx = db.begin().await.context("Failed to begin transaction")?;
            let id = sqlx::query(
                "INSERT INTO post_comments (post_id, author_id, content, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(post_id)
            .bind(author_id)
            .bind(content)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to create comment")?
            .last_id();
            sqlx::query("UPDATE posts SET comment_count = comment_count + 1 WHERE id = ?")
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .context("Failed to increment comment count")?;
            tx.commit().await.context("Failed to commit comment")?;
            anyhow::Ok(id)
        })?;

        self.get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Comment {} vanished after insert", id))
    }

    async fn get(&self, id: i64) -> Result<Option<Comment>> {
        let sql = format!("{COMMENT_SELECT} WHERE c.id = ?");
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, Comment>(&sql)
                .bind(id)
                .fetch_optional(db)
                .await
                .context("Failed to get comment")
        })
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        dispatch!(self.pool, |db| {
            let mut tx = db.begin().await.context("Failed to begin transaction")?;
            let post_id: Option<i64> = sqlx::query_scalar("SELECT post_id FROM post_comments WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .context("Failed to look up comment")?;
            let Some(post_id) = post_id else {
                tx.rollback().await.context("Failed to roll back")?;
                return Ok(false);
            };
            sqlx::query("DELETE FROM post_comments WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete comment")?;
            sqlx::query(
                "UPDATE posts SET comment_count = CASE WHEN comment_count > 0 THEN comment_count - 1 ELSE 0 END WHERE id = ?",
            )
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .context("Failed to decrement comment count")?;
            tx.commit().await.context("Failed to commit comment delete")?;
            Ok(true)
        })
    }

    async fn list_by_post(&self, post_id: i64, offset: i64, limit: i64) -> Result<Vec<Comment>> {
        let sql = format!("{COMMENT_SELECT} WHERE c.post_id = ? ORDER BY c.created_at ASC, c.id ASC LIMIT ? OFFSET ?");
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, Comment>(&sql)
                .bind(post_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(db)
                .await
                .context("Failed to list comments")
        })
    }

    async fn count_by_post(&self, post_id: i64) -> Result<i64> {
        dispatch!(self.pool, |db| {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM post_comments WHERE post_id = ?")
                .bind(post_id)
                .fetch_one(db)
                .await
                .context("Failed to count comments")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::post::{PostRepository, SqlxPostRepository};
    use crate::db::repositories::test_support::{insert_user, setup_pool};

    #[tokio::test]
    async fn test_comment_lifecycle_updates_counter() {
        let pool = setup_pool().await;
        let author = insert_user(&pool, "author").await;
        let commenter = insert_user(&pool, "commenter").await;
        let posts = SqlxPostRepository::new(pool.clone());
        let repo = SqlxCommentRepository::new(pool);
        let post_id = posts.create(author, "post").await.unwrap();

        let first = repo.create(post_id, commenter, "first!").await.unwrap();
        repo.create(post_id, author, "thanks").await.unwrap();
        assert_eq!(first.author_username, "commenter");
        assert_eq!(posts.get(post_id).await.unwrap().unwrap().comment_count, 2);

        let listed = repo.list_by_post(post_id, 0, 10).await.unwrap();
        assert_eq!(listed[0].content, "first!");
        assert_eq!(repo.count_by_post(post_id).await.unwrap(), 2);

        assert!(repo.delete(first.id).await.unwrap());
        assert!(!repo.delete(first.id).await.unwrap());
        assert_eq!(posts.get(post_id).await.unwrap().unwrap().comment_count, 1);
    }
}
