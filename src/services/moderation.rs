//! Moderation service
//!
//! Members report posts and comments; moderators resolve reports by
//! dismissing them, hiding or deleting the content, or banning its author.
//! Every moderator action is written to the moderation log, and the affected
//! member is notified of hides, deletions and bans.

use crate::db::repositories::{CommentRepository, ModerationRepository, PostRepository};
use crate::db::{page_window, Paged};
use crate::models::{
    LogAction, LogTarget, ModerationAction, ModerationLogEntry, NewNotification, NotificationKind, Report,
    ReportStatus, ReportTarget, User, UserStatus,
};
use crate::services::notification::NotificationService;
use crate::services::user::{UserService, UserServiceError};
use anyhow::Context;
use std::sync::Arc;

const REASON_MAX_CHARS: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum ModerationServiceError {
    #[error("Not found")]
    NotFound,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<UserServiceError> for ModerationServiceError {
    fn from(err: UserServiceError) -> Self {
        match err {
            UserServiceError::NotFound => ModerationServiceError::NotFound,
            UserServiceError::ValidationError(msg) => ModerationServiceError::ValidationError(msg),
            UserServiceError::InternalError(e) => ModerationServiceError::InternalError(e),
            other => ModerationServiceError::InternalError(anyhow::anyhow!(other.to_string())),
        }
    }
}

/// Reported object resolved to its author
struct ReportedContent {
    target: ReportTarget,
    id: i64,
    author_id: i64,
    post_id: i64,
}

pub struct ModerationService {
    repo: Arc<dyn ModerationRepository>,
    posts: Arc<dyn PostRepository>,
    comments: Arc<dyn CommentRepository>,
    users: Arc<UserService>,
    notifications: Arc<NotificationService>,
}

impl ModerationService {
    pub fn new(
        repo: Arc<dyn ModerationRepository>,
        posts: Arc<dyn PostRepository>,
        comments: Arc<dyn CommentRepository>,
        users: Arc<UserService>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            repo,
            posts,
            comments,
            users,
            notifications,
        }
    }

    // ========================================================================
    // Reports
    // ========================================================================

    /// File a report. A member has at most one open report per target.
    pub async fn report(
        &self,
        reporter: &User,
        target: ReportTarget,
        target_id: i64,
        reason: &str,
    ) -> Result<Report, ModerationServiceError> {
        let reason = reason.trim();
        if reason.is_empty() || reason.chars().count() > REASON_MAX_CHARS {
            return Err(ModerationServiceError::ValidationError(format!(
                "Reason must be 1-{REASON_MAX_CHARS} characters"
            )));
        }

        let content = self.load_content(target, target_id).await?;
        if content.author_id == reporter.id {
            return Err(ModerationServiceError::ValidationError(
                "You cannot report your own content".to_string(),
            ));
        }
        if self
            .repo
            .find_open_report(reporter.id, target, target_id)
            .await
            .context("Failed to check existing reports")?
            .is_some()
        {
            return Err(ModerationServiceError::Conflict("You already reported this".to_string()));
        }

        let report = self
            .repo
            .create_report(reporter.id, target, target_id, reason)
            .await
            .context("Failed to create report")?;
        tracing::info!(report_id = report.id, %target, target_id, "Report filed");
        Ok(report)
    }

    pub async fn list_reports(
        &self,
        status: Option<ReportStatus>,
        page: i64,
        per_page: i64,
    ) -> Result<Paged<Report>, ModerationServiceError> {
        let (page, per_page, offset) = page_window(page, per_page);
        let items = self
            .repo
            .list_reports(status, offset, per_page)
            .await
            .context("Failed to list reports")?;
        let total = self.repo.count_reports(status).await.context("Failed to count reports")?;
        Ok(Paged::new(items, total, page, per_page))
    }

    /// Close an open report with the given action
    pub async fn resolve(
        &self,
        moderator: &User,
        report_id: i64,
        action: ModerationAction,
    ) -> Result<Report, ModerationServiceError> {
        let report = self
            .repo
            .get_report(report_id)
            .await
            .context("Failed to get report")?
            .ok_or(ModerationServiceError::NotFound)?;
        if report.status != ReportStatus::Open {
            return Err(ModerationServiceError::Conflict("Report is already closed".to_string()));
        }

        let status = match action {
            ModerationAction::Dismiss => {
                self.repo
                    .log(
                        Some(moderator.id),
                        LogAction::DismissReport,
                        LogTarget::Report,
                        report.id,
                        &report.reason,
                    )
                    .await
                    .context("Failed to write moderation log")?;
                ReportStatus::Dismissed
            }
            ModerationAction::HideContent => {
                let content = self.load_content(report.target_type, report.target_id).await?;
                if content.target != ReportTarget::Post {
                    return Err(ModerationServiceError::ValidationError(
                        "Only posts can be hidden; delete the comment instead".to_string(),
                    ));
                }
                self.hide_post(moderator, content.id).await?;
                ReportStatus::Resolved
            }
            ModerationAction::DeleteContent => {
                let content = self.load_content(report.target_type, report.target_id).await?;
                self.delete_content(moderator, &content, &report.reason).await?;
                ReportStatus::Resolved
            }
            ModerationAction::BanAuthor => {
                let content = self.load_content(report.target_type, report.target_id).await?;
                self.ban_user(moderator, content.author_id, &report.reason).await?;
                ReportStatus::Resolved
            }
        };

        if !self
            .repo
            .close_report(report.id, status, moderator.id)
            .await
            .context("Failed to close report")?
        {
            return Err(ModerationServiceError::Conflict("Report is already closed".to_string()));
        }
        tracing::info!(report_id, ?action, moderator = %moderator.username, "Report resolved");

        self.repo
            .get_report(report.id)
            .await
            .context("Failed to reload report")?
            .ok_or(ModerationServiceError::NotFound)
    }

    // ========================================================================
    // Direct actions
    // ========================================================================

    pub async fn hide_post(&self, moderator: &User, post_id: i64) -> Result<(), ModerationServiceError> {
        self.set_post_hidden(moderator, post_id, true).await
    }

    pub async fn unhide_post(&self, moderator: &User, post_id: i64) -> Result<(), ModerationServiceError> {
        self.set_post_hidden(moderator, post_id, false).await
    }

    /// Ban a member; their sessions are revoked immediately
    pub async fn ban_user(&self, moderator: &User, user_id: i64, reason: &str) -> Result<(), ModerationServiceError> {
        let target = self.users.get_by_id(user_id).await?.ok_or(ModerationServiceError::NotFound)?;
        if target.id == moderator.id {
            return Err(ModerationServiceError::ValidationError("You cannot ban yourself".to_string()));
        }
        if target.is_admin() || (target.is_moderator() && !moderator.is_admin()) {
            return Err(ModerationServiceError::Forbidden(format!(
                "Cannot ban {} '{}'",
                target.role, target.username
            )));
        }

        self.users.set_status(user_id, UserStatus::Banned).await?;
        self.repo
            .log(Some(moderator.id), LogAction::BanUser, LogTarget::User, user_id, reason)
            .await
            .context("Failed to write moderation log")?;
        self.notifications
            .notify_quietly(NewNotification::new(
                user_id,
                Some(moderator.id),
                NotificationKind::Moderation,
                "Your account has been banned",
            ))
            .await;
        Ok(())
    }

    pub async fn unban_user(&self, moderator: &User, user_id: i64) -> Result<(), ModerationServiceError> {
        self.users.set_status(user_id, UserStatus::Active).await?;
        self.repo
            .log(Some(moderator.id), LogAction::UnbanUser, LogTarget::User, user_id, "")
            .await
            .context("Failed to write moderation log")?;
        Ok(())
    }

    pub async fn list_log(&self, page: i64, per_page: i64) -> Result<Paged<ModerationLogEntry>, ModerationServiceError> {
        let (page, per_page, offset) = page_window(page, per_page);
        let items = self
            .repo
            .list_log(offset, per_page)
            .await
            .context("Failed to list moderation log")?;
        let total = self.repo.count_log().await.context("Failed to count moderation log")?;
        Ok(Paged::new(items, total, page, per_page))
    }

    // ========================================================================
    // Private helpers
    // ========================================================================

    async fn set_post_hidden(&self, moderator: &User, post_id: i64, hidden: bool) -> Result<(), ModerationServiceError> {
        let post = self
            .posts
            .get(post_id)
            .await
            .context("Failed to get post")?
            .ok_or(ModerationServiceError::NotFound)?;
        self.posts
            .set_hidden(post_id, hidden)
            .await
            .context("Failed to update post visibility")?;

        let action = if hidden { LogAction::HideContent } else { LogAction::UnhideContent };
        self.repo
            .log(Some(moderator.id), action, LogTarget::Post, post_id, "")
            .await
            .context("Failed to write moderation log")?;

        if hidden {
            self.notifications
                .notify_quietly(
                    NewNotification::new(
                        post.author_id,
                        Some(moderator.id),
                        NotificationKind::Moderation,
                        "One of your posts was hidden by a moderator",
                    )
                    .with_post(post_id),
                )
                .await;
        }
        Ok(())
    }

    async fn delete_content(
        &self,
        moderator: &User,
        content: &ReportedContent,
        reason: &str,
    ) -> Result<(), ModerationServiceError> {
        match content.target {
            ReportTarget::Post => self.posts.delete(content.id).await.context("Failed to delete post")?,
            ReportTarget::Comment => self.comments.delete(content.id).await.context("Failed to delete comment")?,
        };
        self.repo
            .log(
                Some(moderator.id),
                LogAction::DeleteContent,
                content.target.into(),
                content.id,
                reason,
            )
            .await
            .context("Failed to write moderation log")?;

        let mut notification = NewNotification::new(
            content.author_id,
            Some(moderator.id),
            NotificationKind::Moderation,
            format!("Your {} was removed by a moderator", content.target),
        );
        if content.target == ReportTarget::Comment {
            notification = notification.with_post(content.post_id);
        }
        self.notifications.notify_quietly(notification).await;
        Ok(())
    }

    async fn load_content(&self, target: ReportTarget, id: i64) -> Result<ReportedContent, ModerationServiceError> {
        match target {
            ReportTarget::Post => {
                let post = self
                    .posts
                    .get(id)
                    .await
                    .context("Failed to get post")?
                    .ok_or(ModerationServiceError::NotFound)?;
                Ok(ReportedContent {
                    target,
                    id,
                    author_id: post.author_id,
                    post_id: post.id,
                })
            }
            ReportTarget::Comment => {
                let comment = self
                    .comments
                    .get(id)
                    .await
                    .context("Failed to get comment")?
                    .ok_or(ModerationServiceError::NotFound)?;
                Ok(ReportedContent {
                    target,
                    id,
                    author_id: comment.author_id,
                    post_id: comment.post_id,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::setup_pool;
    use crate::db::repositories::{
        SqlxCommentRepository, SqlxModerationRepository, SqlxNotificationRepository, SqlxPostRepository,
        SqlxSessionRepository, SqlxUserRepository,
    };
    use crate::models::UserRole;
    use crate::services::user::{LoginInput, RegisterInput};

    struct Fixture {
        moderation: ModerationService,
        posts: Arc<dyn PostRepository>,
        comments: Arc<dyn CommentRepository>,
        users: Arc<UserService>,
        notifications: Arc<NotificationService>,
    }

    async fn fixture() -> Fixture {
        let pool = setup_pool().await;
        let posts = SqlxPostRepository::boxed(pool.clone());
        let comments = SqlxCommentRepository::boxed(pool.clone());
        let users = Arc::new(UserService::new(
            SqlxUserRepository::boxed(pool.clone()),
            SqlxSessionRepository::boxed(pool.clone()),
        ));
        let notifications = Arc::new(NotificationService::new(SqlxNotificationRepository::boxed(pool.clone())));
        let moderation = ModerationService::new(
            SqlxModerationRepository::boxed(pool),
            posts.clone(),
            comments.clone(),
            users.clone(),
            notifications.clone(),
        );
        Fixture {
            moderation,
            posts,
            comments,
            users,
            notifications,
        }
    }

    async fn member(f: &Fixture, name: &str, role: UserRole) -> User {
        f.users
            .create_user(RegisterInput::new(name, format!("{name}@example.com"), "password123"), role)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_report_rules() {
        let f = fixture().await;
        let alice = member(&f, "alice", UserRole::Member).await;
        let bob = member(&f, "bob", UserRole::Member).await;
        let post_id = f.posts.create(alice.id, "rude words").await.unwrap();

        let report = f.moderation.report(&bob, ReportTarget::Post, post_id, "rude").await.unwrap();
        assert_eq!(report.status, ReportStatus::Open);

        assert!(matches!(
            f.moderation.report(&bob, ReportTarget::Post, post_id, "again").await,
            Err(ModerationServiceError::Conflict(_))
        ));
        assert!(matches!(
            f.moderation.report(&alice, ReportTarget::Post, post_id, "me").await,
            Err(ModerationServiceError::ValidationError(_))
        ));
        assert!(matches!(
            f.moderation.report(&bob, ReportTarget::Comment, 999, "missing").await,
            Err(ModerationServiceError::NotFound)
        ));
        assert!(matches!(
            f.moderation.report(&bob, ReportTarget::Post, post_id, "  ").await,
            Err(ModerationServiceError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_hide_logs_and_notifies() {
        let f = fixture().await;
        let alice = member(&f, "alice", UserRole::Member).await;
        let bob = member(&f, "bob", UserRole::Member).await;
        let warden = member(&f, "warden", UserRole::Moderator).await;
        let post_id = f.posts.create(alice.id, "spoilers").await.unwrap();

        let report = f.moderation.report(&bob, ReportTarget::Post, post_id, "spoilers").await.unwrap();
        let closed = f
            .moderation
            .resolve(&warden, report.id, ModerationAction::HideContent)
            .await
            .unwrap();
        assert_eq!(closed.status, ReportStatus::Resolved);
        assert_eq!(closed.handled_by, Some(warden.id));
        assert!(closed.handled_at.is_some());

        assert!(f.posts.get(post_id).await.unwrap().unwrap().is_hidden);
        assert_eq!(f.notifications.unread_count(alice.id).await.unwrap(), 1);

        let log = f.moderation.list_log(1, 20).await.unwrap();
        assert_eq!(log.total, 1);
        assert_eq!(log.items[0].action, LogAction::HideContent);

        assert!(matches!(
            f.moderation.resolve(&warden, report.id, ModerationAction::Dismiss).await,
            Err(ModerationServiceError::Conflict(_))
        ));

        f.moderation.unhide_post(&warden, post_id).await.unwrap();
        assert!(!f.posts.get(post_id).await.unwrap().unwrap().is_hidden);
    }

    #[tokio::test]
    async fn test_resolve_dismiss_and_delete_comment() {
        let f = fixture().await;
        let alice = member(&f, "alice", UserRole::Member).await;
        let bob = member(&f, "bob", UserRole::Member).await;
        let warden = member(&f, "warden", UserRole::Moderator).await;
        let post_id = f.posts.create(alice.id, "post").await.unwrap();
        let comment = f.comments.create(post_id, bob.id, "flame").await.unwrap();

        let first = f.moderation.report(&alice, ReportTarget::Comment, comment.id, "flame").await.unwrap();
        let dismissed = f.moderation.resolve(&warden, first.id, ModerationAction::Dismiss).await.unwrap();
        assert_eq!(dismissed.status, ReportStatus::Dismissed);

        let second = f.moderation.report(&alice, ReportTarget::Comment, comment.id, "still flame").await.unwrap();
        assert!(matches!(
            f.moderation.resolve(&warden, second.id, ModerationAction::HideContent).await,
            Err(ModerationServiceError::ValidationError(_))
        ));
        f.moderation
            .resolve(&warden, second.id, ModerationAction::DeleteContent)
            .await
            .unwrap();
        assert!(f.comments.get(comment.id).await.unwrap().is_none());

        let open = f.moderation.list_reports(Some(ReportStatus::Open), 1, 20).await.unwrap();
        assert_eq!(open.total, 0);
        assert_eq!(f.moderation.list_reports(None, 1, 20).await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_ban_author_revokes_sessions() {
        let f = fixture().await;
        member(&f, "root", UserRole::Admin).await;
        let alice = member(&f, "alice", UserRole::Member).await;
        let bob = member(&f, "bob", UserRole::Member).await;
        let warden = member(&f, "warden", UserRole::Moderator).await;
        let post_id = f.posts.create(bob.id, "scam link").await.unwrap();
        let (session, _) = f.users.login(LoginInput::new("bob", "password123")).await.unwrap();

        let report = f.moderation.report(&alice, ReportTarget::Post, post_id, "scam").await.unwrap();
        f.moderation
            .resolve(&warden, report.id, ModerationAction::BanAuthor)
            .await
            .unwrap();

        assert!(f.users.validate_session(&session.id).await.unwrap().is_none());
        assert!(f.users.get_by_id(bob.id).await.unwrap().unwrap().is_banned());

        f.moderation.unban_user(&warden, bob.id).await.unwrap();
        assert!(!f.users.get_by_id(bob.id).await.unwrap().unwrap().is_banned());
    }

    #[tokio::test]
    async fn test_ban_permissions() {
        let f = fixture().await;
        let root = member(&f, "root", UserRole::Admin).await;
        let warden = member(&f, "warden", UserRole::Moderator).await;
        let keeper = member(&f, "keeper", UserRole::Moderator).await;

        assert!(matches!(
            f.moderation.ban_user(&warden, root.id, "coup").await,
            Err(ModerationServiceError::Forbidden(_))
        ));
        assert!(matches!(
            f.moderation.ban_user(&warden, keeper.id, "rivalry").await,
            Err(ModerationServiceError::Forbidden(_))
        ));
        assert!(matches!(
            f.moderation.ban_user(&warden, warden.id, "oops").await,
            Err(ModerationServiceError::ValidationError(_))
        ));
        f.moderation.ban_user(&root, keeper.id, "abuse").await.unwrap();
        assert!(matches!(
            f.moderation.ban_user(&root, 999, "ghost").await,
            Err(ModerationServiceError::NotFound)
        ));
    }
}
