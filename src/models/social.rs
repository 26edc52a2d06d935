//! Social feed models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Post as returned by feed queries (joined with the author's username)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub author_id: i64,
    pub author_username: String,
    pub content: String,
    /// Hidden by a moderator; only the author and moderators can see it
    pub is_hidden: bool,
    pub like_count: i64,
    pub comment_count: i64,
    pub share_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Single post with its hashtags and the viewer's like state
#[derive(Debug, Clone, Serialize)]
pub struct PostDetail {
    #[serde(flatten)]
    pub post: Post,
    pub hashtags: Vec<String>,
    pub liked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author_id: i64,
    pub author_username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Share {
    pub id: i64,
    pub post_id: i64,
    pub user_id: i64,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TrendingHashtag {
    pub name: String,
    pub post_count: i64,
}
