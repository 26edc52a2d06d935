//! Post repository
//!
//! Posts plus the rows hanging off them: hashtag links, likes and shares.
//! Denormalised counters on `posts` are maintained in the same transaction
//! as the row they count.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::db::{DynDatabasePool, LastInsertId};
use crate::models::{Post, Share, TrendingHashtag};

const POST_SELECT: &str = r#"
    SELECT p.id, p.author_id, u.username AS author_username, p.content, p.is_hidden,
           p.like_count, p.comment_count, p.share_count, p.created_at, p.updated_at
    FROM posts p
    JOIN users u ON u.id = p.author_id
"#;

/// Which listing a feed query targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedScope<'a> {
    /// The viewer's own posts and those of everyone they follow
    Home { user_id: i64 },
    Author { author_id: i64, include_hidden: bool },
    Hashtag { name: &'a str },
}

impl FeedScope<'_> {
    fn where_clause(&self) -> &'static str {
        match self {
            FeedScope::Home { .. } => {
                "p.is_hidden = 0 AND (p.author_id = ? OR p.author_id IN (SELECT followed_id FROM follows WHERE follower_id = ?))"
            }
            FeedScope::Author { include_hidden: true, .. } => "p.author_id = ?",
            FeedScope::Author { include_hidden: false, .. } => "p.author_id = ? AND p.is_hidden = 0",
            FeedScope::Hashtag { .. } => {
                "p.is_hidden = 0 AND p.id IN (SELECT ph.post_id FROM post_hashtags ph JOIN hashtags h ON h.id = ph.hashtag_id WHERE h.name = ?)"
            }
        }
    }
}

/// Bind the scope's parameters in the order `where_clause` expects
macro_rules! bind_scope {
    ($query:expr, $scope:expr) => {
        match $scope {
            FeedScope::Home { user_id } => $query.bind(user_id).bind(user_id),
            FeedScope::Author { author_id, .. } => $query.bind(author_id),
            FeedScope::Hashtag { name } => $query.bind(name),
        }
    };
}

#[async_trait]
pub trait PostRepository: Send + Sync {
    async fn create(&self, author_id: i64, content: &str) -> Result<i64>;

    async fn get(&self, id: i64) -> Result<Option<Post>>;

    async fn update_content(&self, id: i64, content: &str) -> Result<bool>;

    async fn set_hidden(&self, id: i64, hidden: bool) -> Result<bool>;

    async fn delete(&self, id: i64) -> Result<bool>;

    /// Newest first
    async fn feed(&self, scope: FeedScope<'_>, offset: i64, limit: i64) -> Result<Vec<Post>>;

    async fn count_feed(&self, scope: FeedScope<'_>) -> Result<i64>;

    /// Replace the post's hashtag set, creating missing hashtags
    async fn set_hashtags(&self, post_id: i64, tags: &[String]) -> Result<()>;

    async fn hashtags(&self, post_id: i64) -> Result<Vec<String>>;

    /// Hashtags ranked by number of visible posts
    async fn trending_hashtags(&self, limit: i64) -> Result<Vec<TrendingHashtag>>;

    /// Returns true if the like was new
    async fn add_like(&self, post_id: i64, user_id: i64) -> Result<bool>;

    /// Returns true if a like was removed
    async fn remove_like(&self, post_id: i64, user_id: i64) -> Result<bool>;

    async fn is_liked(&self, post_id: i64, user_id: i64) -> Result<bool>;

    async fn find_share(&self, post_id: i64, user_id: i64) -> Result<Option<Share>>;

    async fn create_share(&self, post_id: i64, user_id: i64, comment: Option<&str>) -> Result<Share>;
}

pub struct SqlxPostRepository {
    pool: DynDatabasePool,
}

impl SqlxPostRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn PostRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl PostRepository for SqlxPostRepository {
    async fn create(&self, author_id: i64, content: &str) -> Result<i64> {
        let now = Utc::now();
        dispatch!(self.pool, |db| {
            sqlx::query("INSERT INTO posts (author_id, content, created_at, updated_at) VALUES (?, ?, ?, ?)")
                .bind(author_id)
                .bind(content)
                .bind(now)
                .bind(now)
                .execute(db)
                .await
                .map(|r| r.last_id())
                .context("Failed to create post")
        })
    }

    async fn get(&self, id: i64) -> Result<Option<Post>> {
        let sql = format!("{POST_SELECT} WHERE p.id = ?");
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, Post>(&sql)
                .bind(id)
                .fetch_optional(db)
                .await
                .context("Failed to get post")
        })
    }

    async fn update_content(&self, id: i64, content: &str) -> Result<bool> {
        let now = Utc::now();
        let affected = dispatch!(self.pool, |db| {
            sqlx::query("UPDATE posts SET content = ?, updated_at = ? WHERE id = ?")
                .bind(content)
                .bind(now)
                .bind(id)
                .execute(db)
                .await
                .map(|r| r.rows_affected())
                .context("Failed to update post")
        })?;
        Ok(affected > 0)
    }

    async fn set_hidden(&self, id: i64, hidden: bool) -> Result<bool> {
        let affected = dispatch!(self.pool, |db| {
            sqlx::query("UPDATE posts SET is_hidden = ? WHERE id = ?")
                .bind(hidden)
                .bind(id)
                .execute(db)
                .await
                .map(|r| r.rows_affected())
                .context("Failed to change post visibility")
        })?;
        Ok(affected > 0)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        dispatch!(self.pool, |db| {
            let mut tx = db.begin().await.context("Failed to begin transaction")?;
            for table in ["post_hashtags", "post_likes", "shares", "post_comments", "notifications"] {
                sqlx::query(&format!("DELETE FROM {table} WHERE post_id = ?"))
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("Failed to delete rows from {}", table))?;
            }
            let affected = sqlx::query("DELETE FROM posts WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete post")?
                .rows_affected();
            tx.commit().await.context("Failed to commit post delete")?;
            Ok(affected > 0)
        })
    }

    async fn feed(&self, scope: FeedScope<'_>, offset: i64, limit: i64) -> Result<Vec<Post>> {
        let sql = format!(
            "{POST_SELECT} WHERE {} ORDER BY p.created_at DESC, p.id DESC LIMIT ? OFFSET ?",
            scope.where_clause()
        );
        dispatch!(self.pool, |db| {
            let query = sqlx::query_as::<_, Post>(&sql);
            bind_scope!(query, scope)
                .bind(limit)
                .bind(offset)
                .fetch_all(db)
                .await
                .context("Failed to load feed")
        })
    }

    async fn count_feed(&self, scope: FeedScope<'_>) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM posts p WHERE {}", scope.where_clause());
        dispatch!(self.pool, |db| {
            let query = sqlx::query_scalar::<_, i64>(&sql);
            bind_scope!(query, scope)
                .fetch_one(db)
                .await
                .context("Failed to count feed")
        })
    }

    async fn set_hashtags(&self, post_id: i64, tags: &[String]) -> Result<()> {
        let now = Utc::now();
        dispatch!(self.pool, |db| {
            let mut tx = db.begin().await.context("Failed to begin transaction")?;
            sqlx::query("DELETE FROM post_hashtags WHERE post_id = ?")
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .context("Failed to clear post hashtags")?;

            for tag in tags {
                let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM hashtags WHERE name = ?")
                    .bind(tag)
                    .fetch_optional(&mut *tx)
                    .await
                    .context("Failed to look up hashtag")?;
                let hashtag_id = match existing {
                    Some(id) => id,
                    None => sqlx::query("INSERT INTO hashtags (name, created_at) VALUES (?, ?)")
                        .bind(tag)
                        .bind(now)
                        .execute(&mut *tx)
                        .await
                        .context("Failed to create hashtag")?
                        .last_id(),
                };
                sqlx::query("INSERT INTO post_hashtags (post_id, hashtag_id) VALUES (?, ?)")
                    .bind(post_id)
                    .bind(hashtag_id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to link hashtag")?;
            }

            tx.commit().await.context("Failed to commit hashtags")
        })
    }

    async fn hashtags(&self, post_id: i64) -> Result<Vec<String>> {
        dispatch!(self.pool, |db| {
            sqlx::query_scalar::<_, String>(
                "SELECT h.name FROM hashtags h JOIN post_hashtags ph ON ph.hashtag_id = h.id WHERE ph.post_id = ? ORDER BY h.name",
            )
            .bind(post_id)
            .fetch_all(db)
            .await
            .context("Failed to load post hashtags")
        })
    }

    async fn trending_hashtags(&self, limit: i64) -> Result<Vec<TrendingHashtag>> {
        let sql = r#"
            SELECT h.name AS name, COUNT(ph.post_id) AS post_count
            FROM hashtags h
            JOIN post_hashtags ph ON ph.hashtag_id = h.id
            JOIN posts p ON p.id = ph.post_id
            WHERE p.is_hidden = 0
            GROUP BY h.id, h.name
            ORDER BY post_count DESC, h.name ASC
            LIMIT ?
        "#;
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, TrendingHashtag>(sql)
                .bind(limit)
                .fetch_all(db)
                .await
                .context("Failed to load trending hashtags")
        })
    }

    async fn add_like(&self, post_id: i64, user_id: i64) -> Result<bool> {
        let now = Utc::now();
        dispatch!(self.pool, |db| {
            let mut tx = db.begin().await.context("Failed to begin transaction")?;
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT post_id FROM post_likes WHERE post_id = ? AND user_id = ?")
                    .bind(post_id)
                    .bind(user_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .context("Failed to check like")?;
            if exists.is_some() {
                tx.rollback().await.context("Failed to roll back")?;
                return Ok(false);
            }
            sqlx::query("INSERT INTO post_likes (post_id, user_id, created_at) VALUES (?, ?, ?)")
                .bind(post_id)
                .bind(user_id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .context("Failed to add like")?;
            sqlx::query("UPDATE posts SET like_count = like_count + 1 WHERE id = ?")
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .context("Failed to increment like count")?;
            tx.commit().await.context("Failed to commit like")?;
            Ok(true)
        })
    }

    async fn remove_like(&self, post_id: i64, user_id: i64) -> Result<bool> {
        dispatch!(self.pool, |db| {
            let mut tx = db.begin().await.context("Failed to begin transaction")?;
            let removed = sqlx::query("DELETE FROM post_likes WHERE post_id = ? AND user_id = ?")
                .bind(post_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .context("Failed to remove like")?
                .rows_affected();
            if removed > 0 {
                sqlx::query(
                    "UPDATE posts SET like_count = CASE WHEN like_count > 0 THEN like_count - 1 ELSE 0 END WHERE id = ?",
                )
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .context("Failed to decrement like count")?;
            }
            tx.commit().await.context("Failed to commit unlike")?;
            Ok(removed > 0)
        })
    }

    async fn is_liked(&self, post_id: i64, user_id: i64) -> Result<bool> {
        let count = dispatch!(self.pool, |db| {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM post_likes WHERE post_id = ? AND user_id = ?")
                .bind(post_id)
                .bind(user_id)
                .fetch_one(db)
                .await
                .context("Failed to check like")
        })?;
        Ok(count > 0)
    }

    async fn find_share(&self, post_id: i64, user_id: i64) -> Result<Option<Share>> {
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, Share>(
                "SELECT id, post_id, user_id, comment, created_at FROM shares WHERE post_id = ? AND user_id = ?",
            )
            .bind(post_id)
            .bind(user_id)
            .fetch_optional(db)
            .await
            .context("Failed to look up share")
        })
    }

    async fn create_share(&self, post_id: i64, user_id: i64, comment: Option<&str>) -> Result<Share> {
        let now = Utc::now();
        let id = dispatch!(self.pool, |db| {
            let mut tx = db.begin().await.context("Failed to begin transaction")?;
            let id = sqlx::query("INSERT INTO shares (post_id, user_id, comment, created_at) VALUES (?, ?, ?, ?)")
                .bind(post_id)
                .bind(user_id)
                .bind(comment)
                .bind(now)
                .execute(&mut *tx)
                .await
                .context("Failed to create share")?
                .last_id();
            sqlx::query("UPDATE posts SET share_count = share_count + 1 WHERE id = ?")
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .context("Failed to increment share count")?;
            tx.commit().await.context("Failed to commit share")?;
            anyhow::Ok(id)
        })?;

        Ok(Share {
            id,
            post_id,
            user_id,
            comment: comment.map(str::to_string),
            created_at: now,
        })
    }
}
