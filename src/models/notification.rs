//! Notification model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Follow,
    Like,
    Comment,
    Share,
    Mention,
    /// Content hidden/removed or account banned by a moderator
    Moderation,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotificationKind::Follow => "follow",
            NotificationKind::Like => "like",
            NotificationKind::Comment => "comment",
            NotificationKind::Share => "share",
            NotificationKind::Mention => "mention",
            NotificationKind::Moderation => "moderation",
        };
        f.write_str(s)
    }
}

impl FromStr for NotificationKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "follow" => Ok(NotificationKind::Follow),
            "like" => Ok(NotificationKind::Like),
            "comment" => Ok(NotificationKind::Comment),
            "share" => Ok(NotificationKind::Share),
            "mention" => Ok(NotificationKind::Mention),
            "moderation" => Ok(NotificationKind::Moderation),
            _ => Err(ParseEnumError::new("notification kind", s)),
        }
    }
}

try_from_string!(NotificationKind);

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: i64,
    pub recipient_id: i64,
    /// `None` for system notifications or when the actor was deleted
    pub actor_id: Option<i64>,
    #[sqlx(try_from = "String")]
    pub kind: NotificationKind,
    pub post_id: Option<i64>,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Notification about to be stored
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: i64,
    pub actor_id: Option<i64>,
    pub kind: NotificationKind,
    pub post_id: Option<i64>,
    pub message: String,
}

impl NewNotification {
    pub fn new(recipient_id: i64, actor_id: Option<i64>, kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            recipient_id,
            actor_id,
            kind,
            post_id: None,
            message: message.into(),
        }
    }

    pub fn with_post(mut self, post_id: i64) -> Self {
        self.post_id = Some(post_id);
        self
    }

    /// An actor acting on their own content is not worth a notification
    pub fn is_self_notification(&self) -> bool {
        self.actor_id == Some(self.recipient_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_notification() {
        let own = NewNotification::new(1, Some(1), NotificationKind::Like, "liked");
        let other = NewNotification::new(1, Some(2), NotificationKind::Like, "liked");
        let system = NewNotification::new(1, None, NotificationKind::Moderation, "hidden");

        assert!(own.is_self_notification());
        assert!(!other.is_self_notification());
        assert!(!system.is_self_notification());
    }

    #[test]
    fn test_kind_roundtrip_text() {
        for kind in [
            NotificationKind::Follow,
            NotificationKind::Like,
            NotificationKind::Comment,
            NotificationKind::Share,
            NotificationKind::Mention,
            NotificationKind::Moderation,
        ] {
            assert_eq!(kind.to_string().parse::<NotificationKind>().unwrap(), kind);
        }
    }
}
