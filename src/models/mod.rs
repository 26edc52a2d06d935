//! Data models
//!
//! Database entities, their string-backed enums, and the input types the
//! services accept. Rows are mapped with `sqlx::FromRow`; enum columns are
//! stored as lowercase text and decoded through `TryFrom<String>`.

/// Error returned when a stored or submitted enum value is unknown
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Implement `TryFrom<String>` through `FromStr` so the enum can be used
/// with `#[sqlx(try_from = "String")]`.
macro_rules! try_from_string {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl TryFrom<String> for $ty {
                type Error = $crate::models::ParseEnumError;

                fn try_from(value: String) -> Result<Self, Self::Error> {
                    value.parse()
                }
            }
        )+
    };
}

mod moderation;
mod news;
mod notification;
mod resource;
mod session;
mod social;
mod user;
mod wiki;

pub use moderation::{
    LogAction, LogTarget, ModerationAction, ModerationLogEntry, Report, ReportStatus,
    ReportTarget, WordFilter,
};
pub use news::{
    CreateNewsInput, NewsEntry, NewsKind, NewsSummary, NewsTranslation, NewsTranslationInput,
    NewsView,
};
pub use notification::{NewNotification, Notification, NotificationKind};
pub use resource::{CreateResourceInput, Resource, UpdateResourceInput};
pub use session::Session;
pub use social::{Comment, Post, PostDetail, Share, TrendingHashtag};
pub use user::{User, UserProfile, UserRole, UserStatus};
pub use wiki::{
    CreateWikiPageInput, WikiPage, WikiPageSummary, WikiPageView, WikiTranslation,
    WikiTranslationInput,
};
