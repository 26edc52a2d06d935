//! User model
//!
//! Accounts are either created through registration, by an administrator, or
//! imported from the legacy user store (in which case `legacy_id` records the
//! source row).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ParseEnumError;

/// User entity representing a registered community member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    /// Username (unique)
    pub username: String,
    /// Email address (unique, stored lowercase)
    pub email: String,
    /// Password hash (argon2, or a legacy PBKDF2 hash until next login)
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[sqlx(try_from = "String")]
    pub role: UserRole,
    #[sqlx(try_from = "String")]
    pub status: UserStatus,
    pub display_name: Option<String>,
    /// Primary key in the legacy store, for imported accounts
    pub legacy_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new User with the given parameters.
    ///
    /// The password must already be hashed.
    pub fn new(username: String, email: String, password_hash: String, role: UserRole) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            username,
            email,
            password_hash,
            role,
            status: UserStatus::Active,
            display_name: None,
            legacy_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Moderators and admins can handle reports and hide content
    pub fn is_moderator(&self) -> bool {
        matches!(self.role, UserRole::Admin | UserRole::Moderator)
    }

    pub fn is_banned(&self) -> bool {
        self.status == UserStatus::Banned
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

/// User role for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Full access, including gate and user administration
    Admin,
    /// Wiki/news editing and moderation
    Moderator,
    #[default]
    Member,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Admin => write!(f, "admin"),
            UserRole::Moderator => write!(f, "moderator"),
            UserRole::Member => write!(f, "member"),
        }
    }
}

impl FromStr for UserRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "moderator" => Ok(UserRole::Moderator),
            "member" => Ok(UserRole::Member),
            _ => Err(ParseEnumError::new("user role", s)),
        }
    }
}

/// User status for account state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    /// Cannot log in; existing sessions are revoked on ban
    Banned,
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserStatus::Active => write!(f, "active"),
            UserStatus::Banned => write!(f, "banned"),
        }
    }
}

impl FromStr for UserStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(UserStatus::Active),
            "banned" => Ok(UserStatus::Banned),
            _ => Err(ParseEnumError::new("user status", s)),
        }
    }
}

try_from_string!(UserRole, UserStatus);

/// Public view of a user, safe to show to other members
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            role: user.role,
            created_at: user.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_role(role: UserRole) -> User {
        User::new("name".to_string(), "name@test.com".to_string(), "hash".to_string(), role)
    }

    #[test]
    fn test_user_new() {
        let user = user_with_role(UserRole::Member);

        assert_eq!(user.id, 0);
        assert_eq!(user.status, UserStatus::Active);
        assert!(user.legacy_id.is_none());
        assert!(user.is_active());
    }

    #[test]
    fn test_role_checks() {
        let admin = user_with_role(UserRole::Admin);
        let moderator = user_with_role(UserRole::Moderator);
        let member = user_with_role(UserRole::Member);

        assert!(admin.is_admin() && admin.is_moderator());
        assert!(!moderator.is_admin() && moderator.is_moderator());
        assert!(!member.is_admin() && !member.is_moderator());
    }

    #[test]
    fn test_user_role_from_str() {
        assert_eq!(UserRole::from_str("ADMIN").unwrap(), UserRole::Admin);
        assert_eq!(UserRole::from_str("Moderator").unwrap(), UserRole::Moderator);
        assert_eq!(UserRole::try_from("member".to_string()).unwrap(), UserRole::Member);
        assert!(UserRole::from_str("editor").is_err());
    }

    #[test]
    fn test_user_role_default_is_member() {
        assert_eq!(UserRole::default(), UserRole::Member);
        assert_eq!(UserRole::Member.to_string(), "member");
    }

    #[test]
    fn test_profile_hides_email() {
        let user = user_with_role(UserRole::Member);
        let json = serde_json::to_value(UserProfile::from(&user)).unwrap();
        assert!(json.get("email").is_none());
        assert_eq!(json["username"], "name");
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let user = user_with_role(UserRole::Member);
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
    }
}
