//! Notification service

use crate::db::repositories::NotificationRepository;
use crate::db::{page_window, Paged};
use crate::models::{NewNotification, Notification};
use anyhow::Context;
use chrono::{Duration, Utc};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum NotificationServiceError {
    #[error("Notification not found")]
    NotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct NotificationService {
    repo: Arc<dyn NotificationRepository>,
}

impl NotificationService {
    pub fn new(repo: Arc<dyn NotificationRepository>) -> Self {
        Self { repo }
    }

    /// Store a notification. Users are never notified about their own actions.
    pub async fn notify(&self, notification: NewNotification) -> Result<Option<Notification>, NotificationServiceError> {
        if notification.is_self_notification() {
            return Ok(None);
        }
        let created = self
            .repo
            .create(&notification)
            .await
            .context("Failed to create notification")?;
        Ok(Some(created))
    }

    /// Like [`notify`](Self::notify), but failures are only logged.
    ///
    /// Used on the side of user actions that must not fail because a
    /// notification could not be written.
    pub async fn notify_quietly(&self, notification: NewNotification) {
        let recipient = notification.recipient_id;
        let kind = notification.kind;
        if let Err(e) = self.notify(notification).await {
            tracing::warn!(recipient, %kind, "Failed to deliver notification: {e:#}");
        }
    }

    pub async fn list(
        &self,
        user_id: i64,
        unread_only: bool,
        page: i64,
        per_page: i64,
    ) -> Result<Paged<Notification>, NotificationServiceError> {
        let (page, per_page, offset) = page_window(page, per_page);
        let items = self
            .repo
            .list(user_id, unread_only, offset, per_page)
            .await
            .context("Failed to list notifications")?;
        let total = self
            .repo
            .count(user_id, unread_only)
            .await
            .context("Failed to count notifications")?;
        Ok(Paged::new(items, total, page, per_page))
    }

    pub async fn unread_count(&self, user_id: i64) -> Result<i64, NotificationServiceError> {
        Ok(self
            .repo
            .count(user_id, true)
            .await
            .context("Failed to count unread notifications")?)
    }

    /// Mark one of the user's notifications read
    pub async fn mark_read(&self, id: i64, user_id: i64) -> Result<(), NotificationServiceError> {
        if !self
            .repo
            .mark_read(id, user_id)
            .await
            .context("Failed to mark notification read")?
        {
            return Err(NotificationServiceError::NotFound);
        }
        Ok(())
    }

    pub async fn mark_all_read(&self, user_id: i64) -> Result<u64, NotificationServiceError> {
        Ok(self
            .repo
            .mark_all_read(user_id)
            .await
            .context("Failed to mark notifications read")?)
    }

    /// Delete read notifications older than `days`
    pub async fn purge_read_older_than(&self, days: i64) -> Result<u64, NotificationServiceError> {
        let cutoff = Utc::now() - Duration::days(days.max(0));
        let deleted = self
            .repo
            .delete_read_before(cutoff)
            .await
            .context("Failed to purge notifications")?;
        tracing::info!(deleted, days, "Purged read notifications");
        Ok(deleted)
    }
}
