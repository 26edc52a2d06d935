//! User repository
//!
//! Database operations for users.
//!
//! This module provides:
//! - `UserRepository` trait defining the interface for user data access
//! - `SqlxUserRepository` implementing the trait for SQLite and MySQL

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::db::{DynDatabasePool, LastInsertId};
use crate::models::{User, UserRole, UserStatus};

const USER_COLUMNS: &str = "id, username, email, password_hash, role, status, display_name, legacy_id, created_at, updated_at";

/// Result of an import attempt for a single legacy account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Created(i64),
    /// The email was claimed between the batch check and the insert
    EmailTaken,
}

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &User) -> Result<User>;

    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Case-insensitive lookup by username
    async fn get_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Case-insensitive lookup by email
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()>;

    async fn set_role(&self, id: i64, role: UserRole) -> Result<bool>;

    async fn set_status(&self, id: i64, status: UserStatus) -> Result<bool>;

    async fn count(&self) -> Result<i64>;

    /// List users, oldest first
    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<User>>;

    /// Lowercased usernames and emails of every account
    async fn identities(&self) -> Result<Vec<(String, String)>>;

    /// Insert an imported account in its own transaction, skipping it if the
    /// email already exists.
    async fn import(&self, user: &User) -> Result<ImportOutcome>;
}

/// SQLx-based user repository implementation
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        let now = Utc::now();
        let role = user.role.to_string();
        let status = user.status.to_string();
        let sql = r#"
            INSERT INTO users (username, email, password_hash, role, status, display_name, legacy_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#;

        let id = dispatch!(self.pool, |db| {
            sqlx::query(sql)
                .bind(&user.username)
                .bind(&user.email)
                .bind(&user.password_hash)
                .bind(&role)
                .bind(&status)
                .bind(&user.display_name)
                .bind(user.legacy_id)
                .bind(now)
                .bind(now)
                .execute(db)
                .await
                .map(|r| r.last_id())
                .context("Failed to create user")
        })?;

        Ok(User {
            id,
            created_at: now,
            updated_at: now,
            ..user.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, User>(&sql)
                .bind(id)
                .fetch_optional(db)
                .await
                .context("Failed to get user by ID")
        })
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE LOWER(username) = LOWER(?)");
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, User>(&sql)
                .bind(username)
                .fetch_optional(db)
                .await
                .context("Failed to get user by username")
        })
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER(?)");
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, User>(&sql)
                .bind(email)
                .fetch_optional(db)
                .await
                .context("Failed to get user by email")
        })
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<()> {
        let now = Utc::now();
        dispatch!(self.pool, |db| {
            sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
                .bind(password_hash)
                .bind(now)
                .bind(id)
                .execute(db)
                .await
                .map(|_| ())
                .context("Failed to update password")
        })
    }

    async fn set_role(&self, id: i64, role: UserRole) -> Result<bool> {
        let now = Utc::now();
        let role = role.to_string();
        let affected = dispatch!(self.pool, |db| {
            sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
                .bind(&role)
                .bind(now)
                .bind(id)
                .execute(db)
                .await
                .map(|r| r.rows_affected())
                .context("Failed to update user role")
        })?;
        Ok(affected > 0)
    }

    async fn set_status(&self, id: i64, status: UserStatus) -> Result<bool> {
        let now = Utc::now();
        let status = status.to_string();
        let affected = dispatch!(self.pool, |db| {
            sqlx::query("UPDATE users SET status = ?, updated_at = ? WHERE id = ?")
                .bind(&status)
                .bind(now)
                .bind(id)
                .execute(db)
                .await
                .map(|r| r.rows_affected())
                .context("Failed to update user status")
        })?;
        Ok(affected > 0)
    }

    async fn count(&self) -> Result<i64> {
        dispatch!(self.pool, |db| {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
                .fetch_one(db)
                .await
                .context("Failed to count users")
        })
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id ASC LIMIT ? OFFSET ?");
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, User>(&sql)
                .bind(limit)
                .bind(offset)
                .fetch_all(db)
                .await
                .context("Failed to list users")
        })
    }

    async fn identities(&self) -> Result<Vec<(String, String)>> {
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, (String, String)>("SELECT LOWER(username), LOWER(email) FROM users")
                .fetch_all(db)
                .await
                .context("Failed to load user identities")
        })
    }

    async fn import(&self, user: &User) -> Result<ImportOutcome> {
        let now = Utc::now();
        let role = user.role.to_string();
        let status = user.status.to_string();

        dispatch!(self.pool, |db| {
            let mut tx = db.begin().await.context("Failed to begin transaction")?;

            let existing: Option<i64> =
                sqlx::query_scalar("SELECT id FROM users WHERE LOWER(email) = LOWER(?)")
                    .bind(&user.email)
                    .fetch_optional(&mut *tx)
                    .await
                    .context("Failed to check email")?;
            if existing.is_some() {
                tx.rollback().await.context("Failed to roll back")?;
                return Ok(ImportOutcome::EmailTaken);
            }

            let id = sqlx::query(
                r#"
                INSERT INTO users (username, email, password_hash, role, status, display_name, legacy_id, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&role)
            .bind(&status)
            .bind(&user.display_name)
            .bind(user.legacy_id)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to insert imported user")?
            .last_id();

            tx.commit().await.context("Failed to commit import")?;
            Ok(ImportOutcome::Created(id))
        })
    }
}
