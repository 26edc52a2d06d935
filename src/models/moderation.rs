//! Moderation models: reports, the moderation log and word filters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ParseEnumError;

/// What a report points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportTarget {
    Post,
    Comment,
}

impl fmt::Display for ReportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportTarget::Post => write!(f, "post"),
            ReportTarget::Comment => write!(f, "comment"),
        }
    }
}

impl FromStr for ReportTarget {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "post" => Ok(ReportTarget::Post),
            "comment" => Ok(ReportTarget::Comment),
            _ => Err(ParseEnumError::new("report target", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Open,
    Resolved,
    Dismissed,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportStatus::Open => write!(f, "open"),
            ReportStatus::Resolved => write!(f, "resolved"),
            ReportStatus::Dismissed => write!(f, "dismissed"),
        }
    }
}

impl FromStr for ReportStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(ReportStatus::Open),
            "resolved" => Ok(ReportStatus::Resolved),
            "dismissed" => Ok(ReportStatus::Dismissed),
            _ => Err(ParseEnumError::new("report status", s)),
        }
    }
}

/// How a moderator resolves a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    Dismiss,
    HideContent,
    DeleteContent,
    BanAuthor,
}

/// Action recorded in the moderation log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    DismissReport,
    HideContent,
    UnhideContent,
    DeleteContent,
    BanUser,
    UnbanUser,
}

impl fmt::Display for LogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogAction::DismissReport => "dismiss_report",
            LogAction::HideContent => "hide_content",
            LogAction::UnhideContent => "unhide_content",
            LogAction::DeleteContent => "delete_content",
            LogAction::BanUser => "ban_user",
            LogAction::UnbanUser => "unban_user",
        };
        f.write_str(s)
    }
}

impl FromStr for LogAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dismiss_report" => Ok(LogAction::DismissReport),
            "hide_content" => Ok(LogAction::HideContent),
            "unhide_content" => Ok(LogAction::UnhideContent),
            "delete_content" => Ok(LogAction::DeleteContent),
            "ban_user" => Ok(LogAction::BanUser),
            "unban_user" => Ok(LogAction::UnbanUser),
            _ => Err(ParseEnumError::new("log action", s)),
        }
    }
}

/// Object a log entry refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    Post,
    Comment,
    User,
    Report,
}

impl fmt::Display for LogTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogTarget::Post => write!(f, "post"),
            LogTarget::Comment => write!(f, "comment"),
            LogTarget::User => write!(f, "user"),
            LogTarget::Report => write!(f, "report"),
        }
    }
}

impl FromStr for LogTarget {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(LogTarget::Post),
            "comment" => Ok(LogTarget::Comment),
            "user" => Ok(LogTarget::User),
            "report" => Ok(LogTarget::Report),
            _ => Err(ParseEnumError::new("log target", s)),
        }
    }
}

impl From<ReportTarget> for LogTarget {
    fn from(target: ReportTarget) -> Self {
        match target {
            ReportTarget::Post => LogTarget::Post,
            ReportTarget::Comment => LogTarget::Comment,
        }
    }
}

try_from_string!(ReportTarget, ReportStatus, LogAction, LogTarget);

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Report {
    pub id: i64,
    pub reporter_id: i64,
    #[sqlx(try_from = "String")]
    pub target_type: ReportTarget,
    pub target_id: i64,
    pub reason: String,
    #[sqlx(try_from = "String")]
    pub status: ReportStatus,
    pub handled_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub handled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ModerationLogEntry {
    pub id: i64,
    pub moderator_id: Option<i64>,
    #[sqlx(try_from = "String")]
    pub action: LogAction,
    #[sqlx(try_from = "String")]
    pub target_type: LogTarget,
    pub target_id: i64,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WordFilter {
    pub id: i64,
    /// Lowercase word or phrase, matched on word boundaries
    pub pattern: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
