//! Notification repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::db::{DynDatabasePool, LastInsertId};
use crate::models::{NewNotification, Notification};

const NOTIFICATION_COLUMNS: &str =
    "id, recipient_id, actor_id, kind, post_id, message, is_read, created_at";

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create(&self, notification: &NewNotification) -> Result<Notification>;

    /// Newest first
    async fn list(&self, recipient_id: i64, unread_only: bool, offset: i64, limit: i64) -> Result<Vec<Notification>>;

    async fn count(&self, recipient_id: i64, unread_only: bool) -> Result<i64>;

    /// Mark one notification read; only succeeds for its recipient
    async fn mark_read(&self, id: i64, recipient_id: i64) -> Result<bool>;

    async fn mark_all_read(&self, recipient_id: i64) -> Result<u64>;

    /// Delete read notifications created before `cutoff`
    async fn delete_read_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

pub struct SqlxNotificationRepository {
    pool: DynDatabasePool,
}

impl SqlxNotificationRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn NotificationRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl NotificationRepository for SqlxNotificationRepository {
    async fn create(&self, n: &NewNotification) -> Result<Notification> {
        let now = Utc::now();
        let kind = n.kind.to_string();
        let id = dispatch!(self.pool, |db| {
            sqlx::query(
                r#"
                INSERT INTO notifications (recipient_id, actor_id, kind, post_id, message, is_read, created_at)
                VALUES (?, ?, ?, ?, ?, 0, ?)
                "#,
            )
            .bind(n.recipient_id)
            .bind(n.actor_id)
            .bind(&kind)
            .bind(n.post_id)
            .bind(&n.message)
            .bind(now)
            .execute(db)
            .await
            .map(|r| r.last_id())
            .context("Failed to create notification")
        })?;

        Ok(Notification {
            id,
            recipient_id: n.recipient_id,
            actor_id: n.actor_id,
            kind: n.kind,
            post_id: n.post_id,
            message: n.message.clone(),
            is_read: false,
            created_at: now,
        })
    }

    async fn list(&self, recipient_id: i64, unread_only: bool, offset: i64, limit: i64) -> Result<Vec<Notification>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE recipient_id = ? AND (is_read = 0 OR ? = 0) ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        );
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, Notification>(&sql)
                .bind(recipient_id)
                .bind(unread_only)
                .bind(limit)
                .bind(offset)
                .fetch_all(db)
                .await
                .context("Failed to list notifications")
        })
    }

    async fn count(&self, recipient_id: i64, unread_only: bool) -> Result<i64> {
        dispatch!(self.pool, |db| {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM notifications WHERE recipient_id = ? AND (is_read = 0 OR ? = 0)",
            )
            .bind(recipient_id)
            .bind(unread_only)
            .fetch_one(db)
            .await
            .context("Failed to count notifications")
        })
    }

    async fn mark_read(&self, id: i64, recipient_id: i64) -> Result<bool> {
        dispatch!(self.pool, |db| {
            sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ? AND recipient_id = ?")
                .bind(id)
                .bind(recipient_id)
                .execute(db)
                .await
                .map(|r| r.rows_affected() > 0)
                .context("Failed to mark notification read")
        })
    }

    async fn mark_all_read(&self, recipient_id: i64) -> Result<u64> {
        dispatch!(self.pool, |db| {
            sqlx::query("UPDATE notifications SET is_read = 1 WHERE recipient_id = ? AND is_read = 0")
                .bind(recipient_id)
                .execute(db)
                .await
                .map(|r| r.rows_affected())
                .context("Failed to mark notifications read")
        })
    }

    async fn delete_read_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        dispatch!(self.pool, |db| {
            sqlx::query("DELETE FROM notifications WHERE is_read = 1 AND created_at < ?")
                .bind(cutoff)
                .execute(db)
                .await
                .map(|r| r.rows_affected())
                .context("Failed to purge notifications")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{insert_user, setup_pool};
    use crate::models::NotificationKind;
    use chrono::Duration;

    #[tokio::test]
    async fn test_unread_filter_and_mark_read() {
        let pool = setup_pool().await;
        let alice = insert_user(&pool, "alice").await;
        let bob = insert_user(&pool, "bob").await;
        let repo = SqlxNotificationRepository::new(pool);

        let first = repo
            .create(&NewNotification::new(alice, Some(bob), NotificationKind::Follow, "bob followed you"))
            .await
            .unwrap();
        repo.create(&NewNotification::new(alice, Some(bob), NotificationKind::Like, "bob liked your post"))
            .await
            .unwrap();

        assert_eq!(repo.count(alice, true).await.unwrap(), 2);
        assert!(repo.mark_read(first.id, alice).await.unwrap());
        assert!(!repo.mark_read(first.id, bob).await.unwrap());
        assert_eq!(repo.count(alice, true).await.unwrap(), 1);
        assert_eq!(repo.count(alice, false).await.unwrap(), 2);

        let unread = repo.list(alice, true, 0, 10).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].kind, NotificationKind::Like);

        assert_eq!(repo.mark_all_read(alice).await.unwrap(), 1);
        assert_eq!(repo.count(alice, true).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_read_before_keeps_unread() {
        let pool = setup_pool().await;
        let alice = insert_user(&pool, "alice").await;
        let repo = SqlxNotificationRepository::new(pool);

        let read = repo
            .create(&NewNotification::new(alice, None, NotificationKind::Moderation, "hidden"))
            .await
            .unwrap();
        repo.create(&NewNotification::new(alice, None, NotificationKind::Moderation, "unread"))
            .await
            .unwrap();
        repo.mark_read(read.id, alice).await.unwrap();

        let purged = repo.delete_read_before(Utc::now() + Duration::seconds(1)).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(repo.count(alice, false).await.unwrap(), 1);
    }
}
