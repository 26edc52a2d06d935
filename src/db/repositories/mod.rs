//! Database repositories
//!
//! Repository pattern implementations for database access. Each repository
//! exposes a trait (so services can be tested against other backends) and a
//! `Sqlx*` implementation that works on both SQLite and MySQL.

pub mod comment;
pub mod follow;
pub mod moderation;
pub mod news;
pub mod notification;
pub mod post;
pub mod resource;
pub mod session;
pub mod user;
pub mod wiki;
pub mod word_filter;

pub use comment::{CommentRepository, SqlxCommentRepository};
pub use follow::{FollowRepository, SqlxFollowRepository};
pub use moderation::{ModerationRepository, SqlxModerationRepository};
pub use news::{NewsRepository, SqlxNewsRepository};
pub use notification::{NotificationRepository, SqlxNotificationRepository};
pub use post::{FeedScope, PostRepository, SqlxPostRepository};
pub use resource::{ResourceRepository, SqlxResourceRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use user::{ImportOutcome, SqlxUserRepository, UserRepository};
pub use wiki::{SqlxWikiRepository, WikiRepository};
pub use word_filter::{SqlxWordFilterRepository, WordFilterRepository};
