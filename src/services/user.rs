//! User service
//!
//! Registration, login/logout, session validation and account administration.
//! The first account ever registered becomes an admin.

use crate::db::repositories::{SessionRepository, UserRepository};
use crate::db::{page_window, Paged};
use crate::models::{Session, User, UserRole, UserStatus};
use crate::services::password::{hash_password, is_legacy_hash, verify_password};
use anyhow::Context;
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_SESSION_DAYS: i64 = 7;
const USERNAME_MIN_LEN: usize = 3;
const USERNAME_MAX_LEN: usize = 50;
const PASSWORD_MIN_LEN: usize = 8;

/// Error types for user service operations
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Account is banned")]
    Banned,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("User not found")]
    NotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Input for user registration
#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl RegisterInput {
    pub fn new(username: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Input for login
#[derive(Debug, Clone)]
pub struct LoginInput {
    /// Username or email
    pub username_or_email: String,
    pub password: String,
}

impl LoginInput {
    pub fn new(username_or_email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username_or_email: username_or_email.into(),
            password: password.into(),
        }
    }
}

/// Check a username against the account naming rules
pub fn validate_username(username: &str) -> Result<(), UserServiceError> {
    let len = username.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(UserServiceError::ValidationError(format!(
            "Username must be {USERNAME_MIN_LEN}-{USERNAME_MAX_LEN} characters"
        )));
    }
    if !username.chars().all(is_username_char) {
        return Err(UserServiceError::ValidationError(
            "Username may only contain letters, digits, '_', '.' and '-'".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn is_username_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

/// Trim and lowercase an email; `None` if it cannot be an address
pub fn normalize_email(email: &str) -> Option<String> {
    let email = email.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') || email.contains(char::is_whitespace) {
        return None;
    }
    Some(email)
}

/// User service for managing users and authentication
pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    session_repo: Arc<dyn SessionRepository>,
    session_days: i64,
}

impl UserService {
    pub fn new(user_repo: Arc<dyn UserRepository>, session_repo: Arc<dyn SessionRepository>) -> Self {
        Self::with_session_days(user_repo, session_repo, DEFAULT_SESSION_DAYS)
    }

    pub fn with_session_days(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
        session_days: i64,
    ) -> Self {
        Self {
            user_repo,
            session_repo,
            session_days: session_days.max(1),
        }
    }

    /// Register a new member. The first account becomes an admin.
    pub async fn register(&self, input: RegisterInput) -> Result<User, UserServiceError> {
        let role = if self.is_first_user().await? {
            UserRole::Admin
        } else {
            UserRole::Member
        };
        let user = self.create_user(input, role).await?;
        tracing::info!(user_id = user.id, username = %user.username, role = %user.role, "User registered");
        Ok(user)
    }

    /// Create an account with an explicit role (admin tooling)
    pub async fn create_user(&self, input: RegisterInput, role: UserRole) -> Result<User, UserServiceError> {
        let username = input.username.trim().to_string();
        validate_username(&username)?;
        let email = normalize_email(&input.email)
            .ok_or_else(|| UserServiceError::ValidationError("Invalid email format".to_string()))?;
        if input.password.chars().count() < PASSWORD_MIN_LEN {
            return Err(UserServiceError::ValidationError(format!(
                "Password must be at least {PASSWORD_MIN_LEN} characters"
            )));
        }

        if self
            .user_repo
            .get_by_username(&username)
            .await
            .context("Failed to check username")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(format!("Username '{username}' is already taken")));
        }
        if self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to check email")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(format!("Email '{email}' is already registered")));
        }

        let password_hash = hash_password(&input.password).context("Failed to hash password")?;
        let user = User::new(username, email, password_hash, role);
        let created = self.user_repo.create(&user).await.context("Failed to create user")?;
        Ok(created)
    }

    /// Verify credentials and open a session.
    ///
    /// Legacy PBKDF2 hashes are replaced with Argon2id on success.
    pub async fn login(&self, input: LoginInput) -> Result<(Session, User), UserServiceError> {
        let invalid = || UserServiceError::AuthenticationError("Invalid username or password".to_string());

        let user = self
            .find_user_by_username_or_email(input.username_or_email.trim())
            .await?
            .ok_or_else(invalid)?;

        let valid = match verify_password(&input.password, &user.password_hash) {
            Ok(valid) => valid,
            Err(e) => {
                tracing::warn!(user_id = user.id, "Unreadable password hash: {e:#}");
                false
            }
        };
        if !valid {
            return Err(invalid());
        }
        if user.is_banned() {
            return Err(UserServiceError::Banned);
        }

        if is_legacy_hash(&user.password_hash) {
            let upgraded = hash_password(&input.password).context("Failed to hash password")?;
            self.user_repo
                .update_password(user.id, &upgraded)
                .await
                .context("Failed to upgrade password hash")?;
            tracing::info!(user_id = user.id, "Upgraded legacy password hash");
        }

        let session = self.create_session(user.id).await?;
        Ok((session, user))
    }

    /// Key for failed-login throttling.
    ///
    /// A login that names an account, by username or email, maps to that
    /// account's lowercased username; anything else maps to the lowercased input.
    pub async fn login_throttle_key(&self, username_or_email: &str) -> Result<String, UserServiceError> {
        let login = username_or_email.trim();
        Ok(match self.find_user_by_username_or_email(login).await? {
            Some(user) => user.username.to_lowercase(),
            None => login.to_lowercase(),
        })
    }

    pub async fn logout(&self, session_id: &str) -> Result<(), UserServiceError> {
        self.session_repo
            .delete(session_id)
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    /// Resolve a session token to its user.
    ///
    /// Expired sessions are deleted; sessions of banned users are rejected.
    pub async fn validate_session(&self, token: &str) -> Result<Option<User>, UserServiceError> {
        let Some(session) = self
            .session_repo
            .get_by_id(token)
            .await
            .context("Failed to get session")?
        else {
            return Ok(None);
        };

        if session.is_expired() {
            self.session_repo
                .delete(token)
                .await
                .context("Failed to delete expired session")?;
            return Ok(None);
        }

        let user = self
            .user_repo
            .get_by_id(session.user_id)
            .await
            .context("Failed to get user")?;
        Ok(user.filter(|u| !u.is_banned()))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, UserServiceError> {
        Ok(self.user_repo.get_by_id(id).await.context("Failed to get user by ID")?)
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>, UserServiceError> {
        Ok(self
            .user_repo
            .get_by_username(username)
            .await
            .context("Failed to get user by username")?)
    }

    pub async fn set_role(&self, id: i64, role: UserRole) -> Result<User, UserServiceError> {
        if !self.user_repo.set_role(id, role).await.context("Failed to set role")? {
            return Err(UserServiceError::NotFound);
        }
        self.get_by_id(id).await?.ok_or(UserServiceError::NotFound)
    }

    /// Change account status. Banning also revokes every session.
    pub async fn set_status(&self, id: i64, status: UserStatus) -> Result<User, UserServiceError> {
        if !self.user_repo.set_status(id, status).await.context("Failed to set status")? {
            return Err(UserServiceError::NotFound);
        }
        if status == UserStatus::Banned {
            let revoked = self
                .session_repo
                .delete_by_user(id)
                .await
                .context("Failed to revoke sessions")?;
            tracing::info!(user_id = id, revoked, "User banned");
        }
        self.get_by_id(id).await?.ok_or(UserServiceError::NotFound)
    }

    pub async fn list(&self, page: i64, per_page: i64) -> Result<Paged<User>, UserServiceError> {
        let (page, per_page, offset) = page_window(page, per_page);
        let items = self.user_repo.list(offset, per_page).await.context("Failed to list users")?;
        let total = self.user_repo.count().await.context("Failed to count users")?;
        Ok(Paged::new(items, total, page, per_page))
    }

    pub async fn is_first_user(&self) -> Result<bool, UserServiceError> {
        let count = self.user_repo.count().await.context("Failed to count users")?;
        Ok(count == 0)
    }

    pub async fn cleanup_expired_sessions(&self) -> Result<u64, UserServiceError> {
        Ok(self
            .session_repo
            .delete_expired()
            .await
            .context("Failed to delete expired sessions")?)
    }

    // ========================================================================
    // Private helpers
    // ========================================================================

    async fn find_user_by_username_or_email(&self, login: &str) -> Result<Option<User>, UserServiceError> {
        if login.contains('@') {
            if let Some(user) = self.user_repo.get_by_email(login).await.context("Failed to get user by email")? {
                return Ok(Some(user));
            }
        }
        Ok(self
            .user_repo
            .get_by_username(login)
            .await
            .context("Failed to get user by username")?)
    }

    async fn create_session(&self, user_id: i64) -> Result<Session, UserServiceError> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id,
            expires_at: now + Duration::days(self.session_days),
            created_at: now,
        };
        Ok(self
            .session_repo
            .create(&session)
            .await
            .context("Failed to create session")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::setup_pool;
    use crate::db::repositories::{SqlxSessionRepository, SqlxUserRepository};
    use crate::services::password::legacy_hash;

    async fn setup_service() -> UserService {
        let pool = setup_pool().await;
        UserService::new(
            SqlxUserRepository::boxed(pool.clone()),
            SqlxSessionRepository::boxed(pool),
        )
    }

    #[tokio::test]
    async fn test_first_user_becomes_admin() {
        let service = setup_service().await;
        let first = service
            .register(RegisterInput::new("founder", "Founder@Example.com", "password123"))
            .await
            .unwrap();
        assert_eq!(first.role, UserRole::Admin);
        assert_eq!(first.email, "founder@example.com");

        let second = service
            .register(RegisterInput::new("player", "player@example.com", "password123"))
            .await
            .unwrap();
        assert_eq!(second.role, UserRole::Member);
    }

    #[tokio::test]
    async fn test_register_validation() {
        let service = setup_service().await;
        let cases = [
            RegisterInput::new("ab", "a@example.com", "password123"),
            RegisterInput::new("bad name", "a@example.com", "password123"),
            RegisterInput::new("goodname", "not-an-email", "password123"),
            RegisterInput::new("goodname", "a@example.com", "short"),
        ];
        for input in cases {
            assert!(matches!(
                service.register(input).await,
                Err(UserServiceError::ValidationError(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_register_duplicates() {
        let service = setup_service().await;
        service
            .register(RegisterInput::new("player", "player@example.com", "password123"))
            .await
            .unwrap();

        let same_name = service
            .register(RegisterInput::new("PLAYER", "other@example.com", "password123"))
            .await;
        assert!(matches!(same_name, Err(UserServiceError::UserExists(_))));

        let same_email = service
            .register(RegisterInput::new("other", "Player@Example.com", "password123"))
            .await;
        assert!(matches!(same_email, Err(UserServiceError::UserExists(_))));
    }

    #[tokio::test]
    async fn test_login_logout_roundtrip() {
        let service = setup_service().await;
        let user = service
            .register(RegisterInput::new("player", "player@example.com", "password123"))
            .await
            .unwrap();

        let (session, _) = service.login(LoginInput::new("player", "password123")).await.unwrap();
        let current = service.validate_session(&session.id).await.unwrap().unwrap();
        assert_eq!(current.id, user.id);

        let (by_email, _) = service
            .login(LoginInput::new("player@example.com", "password123"))
            .await
            .unwrap();
        assert_ne!(by_email.id, session.id);

        service.logout(&session.id).await.unwrap();
        assert!(service.validate_session(&session.id).await.unwrap().is_none());

        let wrong = service.login(LoginInput::new("player", "wrong-password")).await;
        assert!(matches!(wrong, Err(UserServiceError::AuthenticationError(_))));
        let missing = service.login(LoginInput::new("nobody", "password123")).await;
        assert!(matches!(missing, Err(UserServiceError::AuthenticationError(_))));
    }

    #[tokio::test]
    async fn test_expired_session_is_rejected_and_deleted() {
        let service = setup_service().await;
        let user = service
            .register(RegisterInput::new("player", "player@example.com", "password123"))
            .await
            .unwrap();
        let now = Utc::now();
        service
            .session_repo
            .create(&Session {
                id: "stale-token".to_string(),
                user_id: user.id,
                expires_at: now - Duration::hours(1),
                created_at: now - Duration::days(31),
            })
            .await
            .unwrap();

        assert!(service.validate_session("stale-token").await.unwrap().is_none());
        assert!(service.session_repo.get_by_id("stale-token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_throttle_key_follows_the_account() {
        let service = setup_service().await;
        service
            .register(RegisterInput::new("Player", "player@example.com", "password123"))
            .await
            .unwrap();

        for login in ["Player", "player", " PLAYER@example.com ", "player@example.com"] {
            assert_eq!(service.login_throttle_key(login).await.unwrap(), "player");
        }
        assert_eq!(service.login_throttle_key("Ghost@Example.com").await.unwrap(), "ghost@example.com");
    }

    #[tokio::test]
    async fn test_ban_revokes_sessions_and_blocks_login() {
        let service = setup_service().await;
        service
            .register(RegisterInput::new("admin", "admin@example.com", "password123"))
            .await
            .unwrap();
        let member = service
            .register(RegisterInput::new("troll", "troll@example.com", "password123"))
            .await
            .unwrap();
        let (session, _) = service.login(LoginInput::new("troll", "password123")).await.unwrap();

        let banned = service.set_status(member.id, UserStatus::Banned).await.unwrap();
        assert!(banned.is_banned());
        assert!(service.validate_session(&session.id).await.unwrap().is_none());
        assert!(matches!(
            service.login(LoginInput::new("troll", "password123")).await,
            Err(UserServiceError::Banned)
        ));

        service.set_status(member.id, UserStatus::Active).await.unwrap();
        assert!(service.login(LoginInput::new("troll", "password123")).await.is_ok());
    }

    #[tokio::test]
    async fn test_legacy_hash_is_upgraded_on_login() {
        let pool = setup_pool().await;
        let users = SqlxUserRepository::boxed(pool.clone());
        let service = UserService::new(users.clone(), SqlxSessionRepository::boxed(pool));

        let imported = users
            .create(&User::new(
                "veteran".to_string(),
                "veteran@example.com".to_string(),
                legacy_hash("old-secret", "s4lt", 1000),
                UserRole::Member,
            ))
            .await
            .unwrap();

        service.login(LoginInput::new("veteran", "old-secret")).await.unwrap();
        let stored = users.get_by_id(imported.id).await.unwrap().unwrap();
        assert!(stored.password_hash.starts_with("$argon2id$"));
        assert!(service.login(LoginInput::new("veteran", "old-secret")).await.is_ok());
    }

    #[tokio::test]
    async fn test_set_role_and_list() {
        let service = setup_service().await;
        for name in ["alpha", "bravo", "charlie"] {
            service
                .register(RegisterInput::new(name, format!("{name}@example.com"), "password123"))
                .await
                .unwrap();
        }
        let bravo = service.get_by_username("bravo").await.unwrap().unwrap();
        let promoted = service.set_role(bravo.id, UserRole::Moderator).await.unwrap();
        assert!(promoted.is_moderator());
        assert!(matches!(
            service.set_role(999, UserRole::Admin).await,
            Err(UserServiceError::NotFound)
        ));

        let page = service.list(1, 2).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].username, "alpha");
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Foo@Bar.COM "), Some("foo@bar.com".to_string()));
        assert_eq!(normalize_email("foo"), None);
        assert_eq!(normalize_email("@bar.com"), None);
        assert_eq!(normalize_email("foo@"), None);
        assert_eq!(normalize_email("a@b@c"), None);
        assert_eq!(normalize_email("a b@c.com"), None);
    }
}
