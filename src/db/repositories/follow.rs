//! Follow repository
//!
//! The directed follower graph between users.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::db::DynDatabasePool;
use crate::models::User;

#[async_trait]
pub trait FollowRepository: Send + Sync {
    /// Returns true if the edge was new
    async fn follow(&self, follower_id: i64, followed_id: i64) -> Result<bool>;

    /// Returns true if an edge was removed
    async fn unfollow(&self, follower_id: i64, followed_id: i64) -> Result<bool>;

    async fn is_following(&self, follower_id: i64, followed_id: i64) -> Result<bool>;

    /// Users following `user_id`, most recent first
    async fn followers(&self, user_id: i64, offset: i64, limit: i64) -> Result<Vec<User>>;

    /// Users `user_id` follows, most recent first
    async fn following(&self, user_id: i64, offset: i64, limit: i64) -> Result<Vec<User>>;

    async fn count_followers(&self, user_id: i64) -> Result<i64>;

    async fn count_following(&self, user_id: i64) -> Result<i64>;
}

pub struct SqlxFollowRepository {
    pool: DynDatabasePool,
}

impl SqlxFollowRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn FollowRepository> {
        Arc::new(Self::new(pool))
    }

    async fn edge_users(&self, join_on: &str, filter_on: &str, user_id: i64, offset: i64, limit: i64) -> Result<Vec<User>> {
        let sql = format!(
            r#"
            SELECT u.id, u.username, u.email, u.password_hash, u.role, u.status, u.display_name,
                   u.legacy_id, u.created_at, u.updated_at
            FROM follows f
            JOIN users u ON u.id = f.{join_on}
            WHERE f.{filter_on} = ?
            ORDER BY f.created_at DESC, u.id DESC
            LIMIT ? OFFSET ?
            "#
        );
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, User>(&sql)
                .bind(user_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(db)
                .await
                .context("Failed to list follow edges")
        })
    }

    async fn count_edges(&self, column: &str, user_id: i64) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM follows WHERE {column} = ?");
        dispatch!(self.pool, |db| {
            sqlx::query_scalar::<_, i64>(&sql)
                .bind(user_id)
                .fetch_one(db)
                .await
                .context("Failed to count follow edges")
        })
    }
}

#[async_trait]
impl FollowRepository for SqlxFollowRepository {
    async fn follow(&self, follower_id: i64, followed_id: i64) -> Result<bool> {
        if self.is_following(follower_id, followed_id).await? {
            return Ok(false);
        }
        let now = Utc::now();
        dispatch!(self.pool, |db| {
            sqlx::query("INSERT INTO follows (follower_id, followed_id, created_at) VALUES (?, ?, ?)")
                .bind(follower_id)
                .bind(followed_id)
                .bind(now)
                .execute(db)
                .await
                .map(|r| r.rows_affected() > 0)
                .context("Failed to follow user")
        })
    }

    async fn unfollow(&self, follower_id: i64, followed_id: i64) -> Result<bool> {
        dispatch!(self.pool, |db| {
            sqlx::query("DELETE FROM follows WHERE follower_id = ? AND followed_id = ?")
                .bind(follower_id)
                .bind(followed_id)
                .execute(db)
                .await
                .map(|r| r.rows_affected() > 0)
                .context("Failed to unfollow user")
        })
    }

    async fn is_following(&self, follower_id: i64, followed_id: i64) -> Result<bool> {
        let count = dispatch!(self.pool, |db| {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM follows WHERE follower_id = ? AND followed_id = ?",
            )
            .bind(follower_id)
            .bind(followed_id)
            .fetch_one(db)
            .await
            .context("Failed to check follow")
        })?;
        Ok(count > 0)
    }

    async fn followers(&self, user_id: i64, offset: i64, limit: i64) -> Result<Vec<User>> {
        self.edge_users("follower_id", "followed_id", user_id, offset, limit).await
    }

    async fn following(&self, user_id: i64, offset: i64, limit: i64) -> Result<Vec<User>> {
        self.edge_users("followed_id", "follower_id", user_id, offset, limit).await
    }

    async fn count_followers(&self, user_id: i64) -> Result<i64> {
        self.count_edges("followed_id", user_id).await
    }

    async fn count_following(&self, user_id: i64) -> Result<i64> {
        self.count_edges("follower_id", user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{insert_user, setup_pool};

    #[tokio::test]
    async fn test_follow_graph() {
        let pool = setup_pool().await;
        let alice = insert_user(&pool, "alice").await;
        let bob = insert_user(&pool, "bob").await;
        let carol = insert_user(&pool, "carol").await;
        let repo = SqlxFollowRepository::new(pool);

        assert!(repo.follow(alice, bob).await.unwrap());
        assert!(!repo.follow(alice, bob).await.unwrap());
        assert!(repo.follow(carol, bob).await.unwrap());

        assert_eq!(repo.count_followers(bob).await.unwrap(), 2);
        assert_eq!(repo.count_following(alice).await.unwrap(), 1);

        let followers = repo.followers(bob, 0, 10).await.unwrap();
        let mut names: Vec<_> = followers.iter().map(|u| u.username.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["alice", "carol"]);

        let following = repo.following(alice, 0, 10).await.unwrap();
        assert_eq!(following[0].username, "bob");

        assert!(repo.unfollow(alice, bob).await.unwrap());
        assert!(!repo.unfollow(alice, bob).await.unwrap());
        assert!(!repo.is_following(alice, bob).await.unwrap());
    }
}
