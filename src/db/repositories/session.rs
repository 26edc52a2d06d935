//! Session repository
//!
//! Database operations for user sessions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::db::DynDatabasePool;
use crate::models::Session;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &Session) -> Result<Session>;

    /// Get session by ID (token)
    async fn get_by_id(&self, id: &str) -> Result<Option<Session>>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// Delete all sessions for a user, returning how many were removed
    async fn delete_by_user(&self, user_id: i64) -> Result<u64>;

    /// Delete expired sessions
    async fn delete_expired(&self) -> Result<u64>;
}

/// SQLx-based session repository implementation
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, session: &Session) -> Result<Session> {
        dispatch!(self.pool, |db| {
            sqlx::query("INSERT INTO sessions (id, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)")
                .bind(&session.id)
                .bind(session.user_id)
                .bind(session.expires_at)
                .bind(session.created_at)
                .execute(db)
                .await
                .map(|_| ())
                .context("Failed to create session")
        })?;
        Ok(session.clone())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, Session>(
                "SELECT id, user_id, expires_at, created_at FROM sessions WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(db)
            .await
            .context("Failed to get session")
        })
    }

    async fn delete(&self, id: &str) -> Result<()> {
        dispatch!(self.pool, |db| {
            sqlx::query("DELETE FROM sessions WHERE id = ?")
                .bind(id)
                .execute(db)
                .await
                .map(|_| ())
                .context("Failed to delete session")
        })
    }

    async fn delete_by_user(&self, user_id: i64) -> Result<u64> {
        dispatch!(self.pool, |db| {
            sqlx::query("DELETE FROM sessions WHERE user_id = ?")
                .bind(user_id)
                .execute(db)
                .await
                .map(|r| r.rows_affected())
                .context("Failed to delete user sessions")
        })
    }

    async fn delete_expired(&self) -> Result<u64> {
        let now = Utc::now();
        dispatch!(self.pool, |db| {
            sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
                .bind(now)
                .execute(db)
                .await
                .map(|r| r.rows_affected())
                .context("Failed to delete expired sessions")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{insert_user, setup_pool};
    use chrono::Duration;

    fn session(id: &str, user_id: i64, ttl: Duration) -> Session {
        let now = Utc::now();
        Session {
            id: id.to_string(),
            user_id,
            expires_at: now + ttl,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let pool = setup_pool().await;
        let user_id = insert_user(&pool, "alice").await;
        let repo = SqlxSessionRepository::new(pool);

        repo.create(&session("tok", user_id, Duration::days(1))).await.unwrap();
        let found = repo.get_by_id("tok").await.unwrap().expect("Session not found");
        assert_eq!(found.user_id, user_id);

        repo.delete("tok").await.unwrap();
        assert!(repo.get_by_id("tok").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_expired_and_by_user() {
        let pool = setup_pool().await;
        let user_id = insert_user(&pool, "bob").await;
        let repo = SqlxSessionRepository::new(pool);

        repo.create(&session("old", user_id, Duration::seconds(-10))).await.unwrap();
        repo.create(&session("new1", user_id, Duration::days(1))).await.unwrap();
        repo.create(&session("new2", user_id, Duration::days(1))).await.unwrap();

        assert_eq!(repo.delete_expired().await.unwrap(), 1);
        assert_eq!(repo.delete_by_user(user_id).await.unwrap(), 2);
        assert!(repo.get_by_id("new1").await.unwrap().is_none());
    }
}
