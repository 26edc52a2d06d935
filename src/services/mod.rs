//! Services layer - Business logic
//!
//! Services implement the rules of the platform on top of the repositories
//! and the cache:
//! - validation and permission checks
//! - cache-aside reads and invalidation after writes
//! - side effects such as notifications and moderation log entries

pub mod account_migration;
pub mod content;
pub mod export;
pub mod gate;
pub mod markdown;
pub mod moderation;
pub mod news;
pub mod notification;
pub mod password;
pub mod rate_limiter;
pub mod social;
pub mod user;
pub mod wiki;
pub mod word_filter;

pub use account_migration::{AccountMigration, LegacySource, MigrationReport, SqlxLegacySource};
pub use content::{resolve_language, ContentServiceError};
pub use gate::{GateDecision, GateService, GateServiceError, GateTable};
pub use markdown::MarkdownRenderer;
pub use moderation::{ModerationService, ModerationServiceError};
pub use news::NewsService;
pub use notification::{NotificationService, NotificationServiceError};
pub use password::{hash_password, verify_password};
pub use rate_limiter::LoginRateLimiter;
pub use social::{SocialProfile, SocialService, SocialServiceError};
pub use user::{LoginInput, RegisterInput, UserService, UserServiceError};
pub use wiki::WikiService;
pub use word_filter::{FilterCleanup, WordFilterError, WordFilterService};
