//! Social service
//!
//! Posts, comments, likes, shares and the follow graph, plus the feeds built
//! on top of them. Every write that involves another member produces a
//! notification for them; notification failures never fail the write.

use crate::db::repositories::{
    CommentRepository, FeedScope, FollowRepository, PostRepository, UserRepository,
};
use crate::db::{page_window, Paged};
use crate::models::{
    Comment, NewNotification, NotificationKind, Post, PostDetail, Share, TrendingHashtag, User, UserProfile,
};
use crate::services::notification::NotificationService;
use crate::services::word_filter::{WordFilterError, WordFilterService};
use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

const POST_MAX_CHARS: usize = 2000;
const COMMENT_MAX_CHARS: usize = 1000;
const SHARE_COMMENT_MAX_CHARS: usize = 500;
const HASHTAG_MAX_LEN: usize = 50;
const MAX_MENTIONS: usize = 10;
const TRENDING_MAX: i64 = 50;

static HASHTAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^A-Za-z0-9_&#])#([A-Za-z0-9_]+)").expect("valid hashtag regex"));

static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^A-Za-z0-9_.@-])@([A-Za-z0-9_.-]+)").expect("valid mention regex"));

#[derive(Debug, thiserror::Error)]
pub enum SocialServiceError {
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

impl From<WordFilterError> for SocialServiceError {
    fn from(err: WordFilterError) -> Self {
        match err {
            WordFilterError::NotFound => SocialServiceError::NotFound,
            WordFilterError::ValidationError(msg) => SocialServiceError::ValidationError(msg),
            WordFilterError::InternalError(e) => SocialServiceError::InternalError(e),
        }
    }
}

/// Lowercased, deduplicated hashtags in order of first appearance
pub fn extract_hashtags(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    HASHTAG_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|tag| tag.len() <= HASHTAG_MAX_LEN)
        .map(str::to_lowercase)
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

/// Usernames mentioned as `@name`, deduplicated case-insensitively
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    MENTION_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches(['.', '-']))
        .filter(|name| (3..=50).contains(&name.len()))
        .filter(|name| seen.insert(name.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Public profile with follow counts
#[derive(Debug, Clone, Serialize)]
pub struct SocialProfile {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub followers: i64,
    pub following: i64,
    /// Whether the viewer follows this user
    pub followed_by_viewer: bool,
}

pub struct SocialService {
    posts: Arc<dyn PostRepository>,
    comments: Arc<dyn CommentRepository>,
    follows: Arc<dyn FollowRepository>,
    users: Arc<dyn UserRepository>,
    notifications: Arc<NotificationService>,
    filters: Arc<WordFilterService>,
}

impl SocialService {
    pub fn new(
        posts: Arc<dyn PostRepository>,
        comments: Arc<dyn CommentRepository>,
        follows: Arc<dyn FollowRepository>,
        users: Arc<dyn UserRepository>,
        notifications: Arc<NotificationService>,
        filters: Arc<WordFilterService>,
    ) -> Self {
        Self {
            posts,
            comments,
            follows,
            users,
            notifications,
            filters,
        }
    }

    // ========================================================================
    // Posts
    // ========================================================================

    pub async fn create_post(&self, author: &User, content: &str) -> Result<PostDetail, SocialServiceError> {
        let content = self.check_text(content, POST_MAX_CHARS, "Post").await?;

        let id = self
            .posts
            .create(author.id, &content)
            .await
            .context("Failed to create post")?;
        let hashtags = extract_hashtags(&content);
        self.posts
            .set_hashtags(id, &hashtags)
            .await
            .context("Failed to store hashtags")?;

        self.notify_mentions(author, id, &content).await;
        tracing::debug!(post_id = id, author = %author.username, "Post created");
        self.get_post(Some(author), id).await
    }

    /// Replace the text of a post. Only its author may edit it.
    pub async fn edit_post(&self, user: &User, post_id: i64, content: &str) -> Result<PostDetail, SocialServiceError> {
        let post = self.find_post(post_id).await?;
        if post.author_id != user.id {
            return Err(SocialServiceError::Forbidden("Only the author can edit a post".to_string()));
        }
        let content = self.check_text(content, POST_MAX_CHARS, "Post").await?;

        self.posts
            .update_content(post_id, &content)
            .await
            .context("Failed to update post")?;
        self.posts
            .set_hashtags(post_id, &extract_hashtags(&content))
            .await
            .context("Failed to store hashtags")?;
        self.get_post(Some(user), post_id).await
    }

    /// Delete a post; allowed for its author and for moderators
    pub async fn delete_post(&self, user: &User, post_id: i64) -> Result<(), SocialServiceError> {
        let post = self.find_post(post_id).await?;
        if post.author_id != user.id && !user.is_moderator() {
            return Err(SocialServiceError::Forbidden("Cannot delete another member's post".to_string()));
        }
        self.posts.delete(post_id).await.context("Failed to delete post")?;
        Ok(())
    }

    /// Hidden posts are visible only to their author and moderators
    pub async fn get_post(&self, viewer: Option<&User>, post_id: i64) -> Result<PostDetail, SocialServiceError> {
        let post = self.visible_post(viewer, post_id).await?;
        let hashtags = self.posts.hashtags(post_id).await.context("Failed to load hashtags")?;
        let liked = match viewer {
            Some(user) => self
                .posts
                .is_liked(post_id, user.id)
                .await
                .context("Failed to check like")?,
            None => false,
        };
        Ok(PostDetail { post, hashtags, liked })
    }

    // ========================================================================
    // Comments
    // ========================================================================

    pub async fn add_comment(&self, user: &User, post_id: i64, content: &str) -> Result<Comment, SocialServiceError> {
        let post = self.visible_post(Some(user), post_id).await?;
        let content = self.check_text(content, COMMENT_MAX_CHARS, "Comment").await?;

        let comment = self
            .comments
            .create(post_id, user.id, &content)
            .await
            .context("Failed to create comment")?;

        self.notifications
            .notify_quietly(
                NewNotification::new(
                    post.author_id,
                    Some(user.id),
                    NotificationKind::Comment,
                    format!("{} commented on your post", user.username),
                )
                .with_post(post_id),
            )
            .await;
        Ok(comment)
    }

    /// Allowed for the comment author, the post author and moderators
    pub async fn delete_comment(&self, user: &User, comment_id: i64) -> Result<(), SocialServiceError> {
        let comment = self
            .comments
            .get(comment_id)
            .await
            .context("Failed to get comment")?
            .ok_or(SocialServiceError::NotFound)?;
        let post_author = self.posts.get(comment.post_id).await.context("Failed to get post")?.map(|p| p.author_id);

        if comment.author_id != user.id && post_author != Some(user.id) && !user.is_moderator() {
            return Err(SocialServiceError::Forbidden("Cannot delete this comment".to_string()));
        }
        self.comments.delete(comment_id).await.context("Failed to delete comment")?;
        Ok(())
    }

    /// Comments of a post, oldest first
    pub async fn list_comments(
        &self,
        viewer: Option<&User>,
        post_id: i64,
        page: i64,
        per_page: i64,
    ) -> Result<Paged<Comment>, SocialServiceError> {
        self.visible_post(viewer, post_id).await?;
        let (page, per_page, offset) = page_window(page, per_page);
        let items = self
            .comments
            .list_by_post(post_id, offset, per_page)
            .await
            .context("Failed to list comments")?;
        let total = self.comments.count_by_post(post_id).await.context("Failed to count comments")?;
        Ok(Paged::new(items, total, page, per_page))
    }

    // ========================================================================
    // Likes and shares
    // ========================================================================

    /// Idempotent; only a new like notifies the author
    pub async fn like(&self, user: &User, post_id: i64) -> Result<PostDetail, SocialServiceError> {
        let post = self.visible_post(Some(user), post_id).await?;
        if self.posts.add_like(post_id, user.id).await.context("Failed to like post")? {
            self.notifications
                .notify_quietly(
                    NewNotification::new(
                        post.author_id,
                        Some(user.id),
                        NotificationKind::Like,
                        format!("{} liked your post", user.username),
                    )
                    .with_post(post_id),
                )
                .await;
        }
        self.get_post(Some(user), post_id).await
    }

    pub async fn unlike(&self, user: &User, post_id: i64) -> Result<PostDetail, SocialServiceError> {
        self.visible_post(Some(user), post_id).await?;
        self.posts
            .remove_like(post_id, user.id)
            .await
            .context("Failed to unlike post")?;
        self.get_post(Some(user), post_id).await
    }

    /// Share a post once, optionally with a comment
    pub async fn share(&self, user: &User, post_id: i64, comment: Option<&str>) -> Result<Share, SocialServiceError> {
        let post = self.visible_post(Some(user), post_id).await?;
        if post.is_hidden {
            return Err(SocialServiceError::Forbidden("Hidden posts cannot be shared".to_string()));
        }
        let comment = match comment.map(str::trim).filter(|c| !c.is_empty()) {
            Some(text) => Some(self.check_text(text, SHARE_COMMENT_MAX_CHARS, "Share comment").await?),
            None => None,
        };
        if self
            .posts
            .find_share(post_id, user.id)
            .await
            .context("Failed to check share")?
            .is_some()
        {
            return Err(SocialServiceError::Conflict("Post already shared".to_string()));
        }

        let share = self
            .posts
            .create_share(post_id, user.id, comment.as_deref())
            .await
            .context("Failed to share post")?;
        self.notifications
            .notify_quietly(
                NewNotification::new(
                    post.author_id,
                    Some(user.id),
                    NotificationKind::Share,
                    format!("{} shared your post", user.username),
                )
                .with_post(post_id),
            )
            .await;
        Ok(share)
    }

    // ========================================================================
    // Follow graph
    // ========================================================================

    pub async fn follow(&self, user: &User, username: &str) -> Result<bool, SocialServiceError> {
        let target = self.find_user(username).await?;
        if target.id == user.id {
            return Err(SocialServiceError::ValidationError("You cannot follow yourself".to_string()));
        }
        let created = self
            .follows
            .follow(user.id, target.id)
            .await
            .context("Failed to follow user")?;
        if created {
            self.notifications
                .notify_quietly(NewNotification::new(
                    target.id,
                    Some(user.id),
                    NotificationKind::Follow,
                    format!("{} started following you", user.username),
                ))
                .await;
        }
        Ok(created)
    }

    pub async fn unfollow(&self, user: &User, username: &str) -> Result<bool, SocialServiceError> {
        let target = self.find_user(username).await?;
        Ok(self
            .follows
            .unfollow(user.id, target.id)
            .await
            .context("Failed to unfollow user")?)
    }

    pub async fn profile(&self, viewer: Option<&User>, username: &str) -> Result<SocialProfile, SocialServiceError> {
        let user = self.find_user(username).await?;
        let followers = self.follows.count_followers(user.id).await.context("Failed to count followers")?;
        let following = self.follows.count_following(user.id).await.context("Failed to count following")?;
        let followed_by_viewer = match viewer {
            Some(v) if v.id != user.id => self
                .follows
                .is_following(v.id, user.id)
                .await
                .context("Failed to check follow")?,
            _ => false,
        };
        Ok(SocialProfile {
            profile: UserProfile::from(&user),
            followers,
            following,
            followed_by_viewer,
        })
    }

    pub async fn followers(&self, username: &str, page: i64, per_page: i64) -> Result<Paged<UserProfile>, SocialServiceError> {
        let user = self.find_user(username).await?;
        let (page, per_page, offset) = page_window(page, per_page);
        let items = self
            .follows
            .followers(user.id, offset, per_page)
            .await
            .context("Failed to list followers")?;
        let total = self.follows.count_followers(user.id).await.context("Failed to count followers")?;
        Ok(Paged::new(items, total, page, per_page).map(|u| UserProfile::from(&u)))
    }

    pub async fn following(&self, username: &str, page: i64, per_page: i64) -> Result<Paged<UserProfile>, SocialServiceError> {
        let user = self.find_user(username).await?;
        let (page, per_page, offset) = page_window(page, per_page);
        let items = self
            .follows
            .following(user.id, offset, per_page)
            .await
            .context("Failed to list followed users")?;
        let total = self.follows.count_following(user.id).await.context("Failed to count followed users")?;
        Ok(Paged::new(items, total, page, per_page).map(|u| UserProfile::from(&u)))
    }

    // ========================================================================
    // Feeds
    // ========================================================================

    /// The user's own posts plus everyone they follow, newest first
    pub async fn home_feed(&self, user: &User, page: i64, per_page: i64) -> Result<Paged<Post>, SocialServiceError> {
        self.feed(FeedScope::Home { user_id: user.id }, page, per_page).await
    }

    /// Posts by one member; hidden ones only for the author and moderators
    pub async fn user_posts(
        &self,
        viewer: Option<&User>,
        username: &str,
        page: i64,
        per_page: i64,
    ) -> Result<Paged<Post>, SocialServiceError> {
        let author = self.find_user(username).await?;
        let include_hidden = viewer.is_some_and(|v| v.id == author.id || v.is_moderator());
        self.feed(
            FeedScope::Author {
                author_id: author.id,
                include_hidden,
            },
            page,
            per_page,
        )
        .await
    }

    pub async fn hashtag_feed(&self, tag: &str, page: i64, per_page: i64) -> Result<Paged<Post>, SocialServiceError> {
        let tag = tag.trim().trim_start_matches('#').to_lowercase();
        if tag.is_empty() || tag.len() > HASHTAG_MAX_LEN || !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(SocialServiceError::ValidationError("Invalid hashtag".to_string()));
        }
        self.feed(FeedScope::Hashtag { name: &tag }, page, per_page).await
    }

    pub async fn trending_hashtags(&self, limit: i64) -> Result<Vec<TrendingHashtag>, SocialServiceError> {
        Ok(self
            .posts
            .trending_hashtags(limit.clamp(1, TRENDING_MAX))
            .await
            .context("Failed to load trending hashtags")?)
    }

    // ========================================================================
    // Private helpers
    // ========================================================================

    async fn feed(&self, scope: FeedScope<'_>, page: i64, per_page: i64) -> Result<Paged<Post>, SocialServiceError> {
        let (page, per_page, offset) = page_window(page, per_page);
        let items = self.posts.feed(scope, offset, per_page).await.context("Failed to load feed")?;
        let total = self.posts.count_feed(scope).await.context("Failed to count feed")?;
        Ok(Paged::new(items, total, page, per_page))
    }

    /// Trim, length-check and word-filter user text
    async fn check_text(&self, text: &str, max_chars: usize, what: &str) -> Result<String, SocialServiceError> {
        let text = text.trim();
        let len = text.chars().count();
        if len == 0 || len > max_chars {
            return Err(SocialServiceError::ValidationError(format!(
                "{what} must be 1-{max_chars} characters"
            )));
        }
        if self.filters.contains_blocked(text).await? {
            return Err(SocialServiceError::ValidationError(format!(
                "{what} contains blocked words"
            )));
        }
        Ok(text.to_string())
    }

    async fn find_post(&self, post_id: i64) -> Result<Post, SocialServiceError> {
        self.posts
            .get(post_id)
            .await
            .context("Failed to get post")?
            .ok_or(SocialServiceError::NotFound)
    }

    async fn visible_post(&self, viewer: Option<&User>, post_id: i64) -> Result<Post, SocialServiceError> {
        let post = self.find_post(post_id).await?;
        if post.is_hidden && !viewer.is_some_and(|v| v.id == post.author_id || v.is_moderator()) {
            return Err(SocialServiceError::NotFound);
        }
        Ok(post)
    }

    async fn find_user(&self, username: &str) -> Result<User, SocialServiceError> {
        self.users
            .get_by_username(username)
            .await
            .context("Failed to get user")?
            .filter(|u| !u.is_banned())
            .ok_or(SocialServiceError::NotFound)
    }

    async fn notify_mentions(&self, author: &User, post_id: i64, content: &str) {
        for name in extract_mentions(content).into_iter().take(MAX_MENTIONS) {
            match self.users.get_by_username(&name).await {
                Ok(Some(mentioned)) => {
                    self.notifications
                        .notify_quietly(
                            NewNotification::new(
                                mentioned.id,
                                Some(author.id),
                                NotificationKind::Mention,
                                format!("{} mentioned you in a post", author.username),
                            )
                            .with_post(post_id),
                        )
                        .await;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(mention = %name, "Failed to resolve mention: {e:#}"),
            }
        }
    }
}
