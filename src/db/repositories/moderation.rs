//! Moderation repository
//!
//! Reports and the append-only moderation log.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::db::{DynDatabasePool, LastInsertId};
use crate::models::{LogAction, LogTarget, ModerationLogEntry, Report, ReportStatus, ReportTarget};

const REPORT_COLUMNS: &str =
    "id, reporter_id, target_type, target_id, reason, status, handled_by, created_at, handled_at";

#[async_trait]
pub trait ModerationRepository: Send + Sync {
    async fn create_report(&self, reporter_id: i64, target: ReportTarget, target_id: i64, reason: &str) -> Result<Report>;

    async fn get_report(&self, id: i64) -> Result<Option<Report>>;

    /// The reporter's still-open report on this target, if any
    async fn find_open_report(&self, reporter_id: i64, target: ReportTarget, target_id: i64) -> Result<Option<Report>>;

    /// Reports, newest first; all statuses when `status` is `None`
    async fn list_reports(&self, status: Option<ReportStatus>, offset: i64, limit: i64) -> Result<Vec<Report>>;

    async fn count_reports(&self, status: Option<ReportStatus>) -> Result<i64>;

    /// Close a report. Only open reports change; returns false otherwise.
    async fn close_report(&self, id: i64, status: ReportStatus, handled_by: i64) -> Result<bool>;

    async fn log(&self, moderator_id: Option<i64>, action: LogAction, target: LogTarget, target_id: i64, details: &str) -> Result<ModerationLogEntry>;

    /// Log entries, newest first
    async fn list_log(&self, offset: i64, limit: i64) -> Result<Vec<ModerationLogEntry>>;

    async fn count_log(&self) -> Result<i64>;
}

pub struct SqlxModerationRepository {
    pool: DynDatabasePool,
}

impl SqlxModerationRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ModerationRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl ModerationRepository for SqlxModerationRepository {
    async fn create_report(&self, reporter_id: i64, target: ReportTarget, target_id: i64, reason: &str) -> Result<Report> {
        let now = Utc::now();
        let target_str = target.to_string();
        let status_str = ReportStatus::Open.to_string();
        let id = dispatch!(self.pool, |db| {
            sqlx::query(
                r#"
                INSERT INTO reports (reporter_id, target_type, target_id, reason, status, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(reporter_id)
            .bind(&target_str)
            .bind(target_id)
            .bind(reason)
            .bind(&status_str)
            .bind(now)
            .execute(db)
            .await
            .map(|r| r.last_id())
            .context("Failed to create report")
        })?;

        Ok(Report {
            id,
            reporter_id,
            target_type: target,
            target_id,
            reason: reason.to_string(),
            status: ReportStatus::Open,
            handled_by: None,
            created_at: now,
            handled_at: None,
        })
    }

    async fn get_report(&self, id: i64) -> Result<Option<Report>> {
        let sql = format!("SELECT {REPORT_COLUMNS} FROM reports WHERE id = ?");
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, Report>(&sql)
                .bind(id)
                .fetch_optional(db)
                .await
                .context("Failed to get report")
        })
    }

    async fn find_open_report(&self, reporter_id: i64, target: ReportTarget, target_id: i64) -> Result<Option<Report>> {
        let sql = format!(
            "SELECT {REPORT_COLUMNS} FROM reports WHERE reporter_id = ? AND target_type = ? AND target_id = ? AND status = 'open'"
        );
        let target = target.to_string();
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, Report>(&sql)
                .bind(reporter_id)
                .bind(&target)
                .bind(target_id)
                .fetch_optional(db)
                .await
                .context("Failed to look up open report")
        })
    }

    async fn list_reports(&self, status: Option<ReportStatus>, offset: i64, limit: i64) -> Result<Vec<Report>> {
        let sql = format!(
            "SELECT {REPORT_COLUMNS} FROM reports WHERE (? IS NULL OR status = ?) ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        );
        let status = status.map(|s| s.to_string());
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, Report>(&sql)
                .bind(&status)
                .bind(&status)
                .bind(limit)
                .bind(offset)
                .fetch_all(db)
                .await
                .context("Failed to list reports")
        })
    }

    async fn count_reports(&self, status: Option<ReportStatus>) -> Result<i64> {
        let status = status.map(|s| s.to_string());
        dispatch!(self.pool, |db| {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM reports WHERE (? IS NULL OR status = ?)")
                .bind(&status)
                .bind(&status)
                .fetch_one(db)
                .await
                .context("Failed to count reports")
        })
    }

    async fn close_report(&self, id: i64, status: ReportStatus, handled_by: i64) -> Result<bool> {
        let now = Utc::now();
        let status = status.to_string();
        dispatch!(self.pool, |db| {
            sqlx::query(
                "UPDATE reports SET status = ?, handled_by = ?, handled_at = ? WHERE id = ? AND status = 'open'",
            )
            .bind(&status)
            .bind(handled_by)
            .bind(now)
            .bind(id)
            .execute(db)
            .await
            .map(|r| r.rows_affected() > 0)
            .context("Failed to close report")
        })
    }

    async fn log(&self, moderator_id: Option<i64>, action: LogAction, target: LogTarget, target_id: i64, details: &str) -> Result<ModerationLogEntry> {
        let now = Utc::now();
        let action_str = action.to_string();
        let target_str = target.to_string();
        let id = dispatch!(self.pool, |db| {
            sqlx::query(
                r#"
                INSERT INTO moderation_log (moderator_id, action, target_type, target_id, details, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(moderator_id)
            .bind(&action_str)
            .bind(&target_str)
            .bind(target_id)
            .bind(details)
            .bind(now)
            .execute(db)
            .await
            .map(|r| r.last_id())
            .context("Failed to write moderation log")
        })?;

        Ok(ModerationLogEntry {
            id,
            moderator_id,
            action,
            target_type: target,
            target_id,
            details: details.to_string(),
            created_at: now,
        })
    }

    async fn list_log(&self, offset: i64, limit: i64) -> Result<Vec<ModerationLogEntry>> {
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, ModerationLogEntry>(
                "SELECT id, moderator_id, action, target_type, target_id, details, created_at FROM moderation_log ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(db)
            .await
            .context("Failed to list moderation log")
        })
    }

    async fn count_log(&self) -> Result<i64> {
        dispatch!(self.pool, |db| {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM moderation_log")
                .fetch_one(db)
                .await
                .context("Failed to count moderation log")
        })
    }
}
