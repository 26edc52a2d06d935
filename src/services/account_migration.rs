//! Account migration
//!
//! Imports member accounts from a legacy user store. Rows are processed in
//! legacy id order:
//!
//! 1. the email is normalised; rows without a usable address are errors
//! 2. a repeated email within the batch is skipped (first row wins)
//! 3. an email already present in the target is skipped
//! 4. the username is sanitised and, when taken, suffixed `_2`, `_3`, ...
//! 5. the account is inserted in its own transaction
//!
//! A failing row is logged and counted; the batch always runs to the end.
//! Legacy password hashes are copied verbatim and upgraded on first login.

use crate::config::{DatabaseConfig, DatabaseDriver, LegacyConfig};
use crate::db::repositories::{ImportOutcome, UserRepository};
use crate::db::{create_pool, DynDatabasePool};
use crate::models::{User, UserRole};
use crate::services::user::{is_username_char, normalize_email};
use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

const USERNAME_MIN_LEN: usize = 3;
const USERNAME_MAX_LEN: usize = 50;
const FALLBACK_USERNAME: &str = "user";
/// Stored for accounts without a password; never verifies
const UNUSABLE_PASSWORD: &str = "!";

/// A row of the legacy user table
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LegacyAccount {
    pub id: i64,
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[async_trait]
pub trait LegacySource: Send + Sync {
    /// Every legacy account, ordered by id
    async fn accounts(&self) -> anyhow::Result<Vec<LegacyAccount>>;
}

/// Legacy store reached through a SQLite or MySQL pool
pub struct SqlxLegacySource {
    pool: DynDatabasePool,
    table: String,
}

impl SqlxLegacySource {
    pub fn new(pool: DynDatabasePool, table: &str) -> anyhow::Result<Self> {
        let valid = !table.is_empty() && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            anyhow::bail!("Invalid legacy table name: {table:?}");
        }
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    /// Open the store described by the `legacy` config section
    pub async fn connect(config: &LegacyConfig) -> anyhow::Result<Self> {
        if config.url.trim().is_empty() {
            anyhow::bail!("No legacy database configured (set legacy.url or --source)");
        }
        let pool = create_pool(&DatabaseConfig {
            driver: config.driver,
            url: config.url.clone(),
        })
        .await
        .context("Failed to connect to legacy database")?;
        Self::new(pool, &config.table)
    }
}

#[async_trait]
impl LegacySource for SqlxLegacySource {
    async fn accounts(&self) -> anyhow::Result<Vec<LegacyAccount>> {
        let id = match self.pool.driver() {
            DatabaseDriver::Sqlite => "CAST(id AS INTEGER)",
            DatabaseDriver::Mysql => "CAST(id AS SIGNED)",
        };
        let sql = format!(
            "SELECT {id} AS id, username, email, password FROM {} ORDER BY id",
            self.table
        );
        dispatch!(self.pool, |db| {
            sqlx::query_as::<_, LegacyAccount>(&sql)
                .fetch_all(db)
                .await
                .context("Failed to read legacy accounts")
        })
    }
}

/// Counts reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub total: usize,
    pub created: usize,
    pub renamed: usize,
    pub duplicate_email: usize,
    pub existing_email: usize,
    pub errors: usize,
}

/// What to do with one legacy row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAccount {
    Insert { user: User, renamed: bool },
    InvalidEmail,
    DuplicateEmail,
    ExistingEmail,
}

/// Keep only username characters, capped at the maximum length
fn clean_username(raw: &str) -> String {
    raw.chars().filter(|c| is_username_char(*c)).take(USERNAME_MAX_LEN).collect()
}

/// Username derived from a legacy name, falling back to the email local part
pub fn sanitize_username(raw: &str, email: &str) -> String {
    let cleaned = clean_username(raw);
    if cleaned.len() >= USERNAME_MIN_LEN {
        return cleaned;
    }
    let local = email.split('@').next().unwrap_or_default();
    let cleaned = clean_username(local);
    if cleaned.len() >= USERNAME_MIN_LEN {
        return cleaned;
    }
    FALLBACK_USERNAME.to_string()
}

/// First of `base`, `base_2`, `base_3`, ... not in `taken` (lowercase set).
///
/// `base` must be ASCII; it is shortened so the suffixed name still fits.
pub fn unique_username(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(&base.to_lowercase()) {
        return base.to_string();
    }
    (2u32..)
        .map(|n| {
            let suffix = format!("_{n}");
            let keep = base.len().min(USERNAME_MAX_LEN - suffix.len());
            format!("{}{suffix}", &base[..keep])
        })
        .find(|candidate| !taken.contains(&candidate.to_lowercase()))
        .unwrap_or_else(|| base.to_string())
}

/// Applies the dedup and naming rules row by row.
///
/// Remembers every email and username it has handed out so later rows in
/// the same batch see them as taken.
pub struct MigrationPlanner {
    target_emails: HashSet<String>,
    batch_emails: HashSet<String>,
    usernames: HashSet<String>,
}

impl MigrationPlanner {
    /// `identities` are the lowercased `(username, email)` pairs already in
    /// the target
    pub fn new(identities: Vec<(String, String)>) -> Self {
        let mut target_emails = HashSet::with_capacity(identities.len());
        let mut usernames = HashSet::with_capacity(identities.len());
        for (username, email) in identities {
            usernames.insert(username.to_lowercase());
            target_emails.insert(email.to_lowercase());
        }
        Self {
            target_emails,
            batch_emails: HashSet::new(),
            usernames,
        }
    }

    pub fn plan(&mut self, account: &LegacyAccount) -> PlannedAccount {
        let Some(email) = account.email.as_deref().and_then(normalize_email) else {
            return PlannedAccount::InvalidEmail;
        };
        if !self.batch_emails.insert(email.clone()) {
            return PlannedAccount::DuplicateEmail;
        }
        if self.target_emails.contains(&email) {
            return PlannedAccount::ExistingEmail;
        }

        let raw = account.username.as_deref().unwrap_or_default().trim();
        let base = sanitize_username(raw, &email);
        let username = unique_username(&base, &self.usernames);
        let renamed = username != base;
        self.usernames.insert(username.to_lowercase());

        let password = account
            .password
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(UNUSABLE_PASSWORD);

        let mut user = User::new(username, email, password.to_string(), UserRole::Member);
        user.legacy_id = Some(account.id);
        if !raw.is_empty() && raw != user.username {
            user.display_name = Some(raw.chars().take(100).collect());
        }
        PlannedAccount::Insert { user, renamed }
    }
}

/// The migration job
pub struct AccountMigration {
    source: Arc<dyn LegacySource>,
    users: Arc<dyn UserRepository>,
    dry_run: bool,
}

impl AccountMigration {
    pub fn new(source: Arc<dyn LegacySource>, users: Arc<dyn UserRepository>) -> Self {
        Self {
            source,
            users,
            dry_run: false,
        }
    }

    /// Run every check but write nothing
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn run(&self) -> anyhow::Result<MigrationReport> {
        let accounts = self.source.accounts().await?;
        let identities = self
            .users
            .identities()
            .await
            .context("Failed to load existing accounts")?;
        let mut planner = MigrationPlanner::new(identities);
        let mut report = MigrationReport {
            total: accounts.len(),
            ..Default::default()
        };

        tracing::info!(total = report.total, dry_run = self.dry_run, "Starting account migration");

        for account in &accounts {
            match planner.plan(account) {
                PlannedAccount::InvalidEmail => {
                    tracing::warn!(legacy_id = account.id, email = ?account.email, "Skipping account without a valid email");
                    report.errors += 1;
                }
                PlannedAccount::DuplicateEmail => {
                    tracing::debug!(legacy_id = account.id, "Skipping repeated email");
                    report.duplicate_email += 1;
                }
                PlannedAccount::ExistingEmail => {
                    tracing::debug!(legacy_id = account.id, "Email already registered");
                    report.existing_email += 1;
                }
                PlannedAccount::Insert { user, renamed } => {
                    if self.dry_run {
                        report.created += 1;
                        report.renamed += usize::from(renamed);
                        continue;
                    }
                    match self.users.import(&user).await {
                        Ok(ImportOutcome::Created(id)) => {
                            tracing::debug!(legacy_id = account.id, id, username = %user.username, "Imported account");
                            report.created += 1;
                            report.renamed += usize::from(renamed);
                        }
                        Ok(ImportOutcome::EmailTaken) => {
                            report.existing_email += 1;
                        }
                        Err(e) => {
                            tracing::warn!(legacy_id = account.id, "Failed to import account: {e:#}");
                            report.errors += 1;
                        }
                    }
                }
            }
        }

        tracing::info!(
            total = report.total,
            created = report.created,
            renamed = report.renamed,
            duplicate_email = report.duplicate_email,
            existing_email = report.existing_email,
            errors = report.errors,
            "Account migration finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::db::repositories::test_support::{insert_user, setup_pool};
    use crate::db::repositories::SqlxUserRepository;
    use proptest::prelude::*;

    fn account(id: i64, username: &str, email: &str) -> LegacyAccount {
        LegacyAccount {
            id,
            username: Some(username.to_string()),
            email: Some(email.to_string()),
            password: Some("pbkdf2_sha256$1000$salt$abc=".to_string()),
        }
    }

    struct StaticSource(Vec<LegacyAccount>);

    #[async_trait]
    impl LegacySource for StaticSource {
        async fn accounts(&self) -> anyhow::Result<Vec<LegacyAccount>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_sanitize_username() {
        assert_eq!(sanitize_username("Steve", "s@x.io"), "Steve");
        assert_eq!(sanitize_username("Stéve Smith!", "s@x.io"), "StveSmith");
        assert_eq!(sanitize_username("žž", "gamer.one@x.io"), "gamer.one");
        assert_eq!(sanitize_username("", "ab@x.io"), "user");
        assert_eq!(sanitize_username(&"a".repeat(80), "a@x.io").len(), 50);
    }

    #[test]
    fn test_unique_username_suffixes() {
        let taken: HashSet<String> = ["steve", "steve_2"].iter().map(|s| s.to_string()).collect();
        assert_eq!(unique_username("Steve", &taken), "Steve_3");
        assert_eq!(unique_username("alex", &taken), "alex");

        let long = "b".repeat(50);
        let taken: HashSet<String> = [long.clone()].into_iter().collect();
        let unique = unique_username(&long, &taken);
        assert_eq!(unique.len(), 50);
        assert!(unique.ends_with("_2"));
    }

    #[test]
    fn test_planner_rules() {
        let mut planner = MigrationPlanner::new(vec![("taken".to_string(), "old@x.io".to_string())]);

        let missing = LegacyAccount { email: None, ..account(1, "nomail", "") };
        assert_eq!(planner.plan(&missing), PlannedAccount::InvalidEmail);
        assert_eq!(planner.plan(&account(2, "bad", "not-an-email")), PlannedAccount::InvalidEmail);
        assert_eq!(planner.plan(&account(3, "old", " OLD@x.io ")), PlannedAccount::ExistingEmail);

        let PlannedAccount::Insert { user, renamed } = planner.plan(&account(4, "Taken", "new@x.io")) else {
            panic!("expected insert");
        };
        assert!(renamed);
        assert_eq!(user.username, "Taken_2");
        assert_eq!(user.email, "new@x.io");
        assert_eq!(user.legacy_id, Some(4));
        assert_eq!(user.display_name.as_deref(), Some("Taken"));

        assert_eq!(planner.plan(&account(5, "other", "NEW@x.io")), PlannedAccount::DuplicateEmail);

        let PlannedAccount::Insert { user, renamed } = planner.plan(&account(6, "taken", "third@x.io")) else {
            panic!("expected insert");
        };
        assert!(renamed);
        assert_eq!(user.username, "taken_3");
    }

    #[test]
    fn test_planner_missing_password_is_unusable() {
        let mut planner = MigrationPlanner::new(Vec::new());
        let row = LegacyAccount { password: None, ..account(1, "steve", "steve@x.io") };
        let PlannedAccount::Insert { user, .. } = planner.plan(&row) else {
            panic!("expected insert");
        };
        assert_eq!(user.password_hash, UNUSABLE_PASSWORD);
        assert!(user.display_name.is_none());
    }

    #[tokio::test]
    async fn test_run_imports_and_counts() {
        let pool = setup_pool().await;
        insert_user(&pool, "steve").await;
        let users = SqlxUserRepository::boxed(pool);

        let source = Arc::new(StaticSource(vec![
            account(1, "alex", "alex@x.io"),
            account(2, "steve", "steve2@x.io"),
            account(3, "dupe", "ALEX@x.io"),
            account(4, "someone", "steve@example.com"),
            LegacyAccount { email: Some("   ".to_string()), ..account(5, "blank", "") },
        ]));

        let dry = AccountMigration::new(source.clone(), users.clone()).dry_run(true);
        let planned = dry.run().await.unwrap();
        assert_eq!(users.count().await.unwrap(), 1);

        let report = AccountMigration::new(source.clone(), users.clone()).run().await.unwrap();
        assert_eq!(report, planned);
        assert_eq!(
            report,
            MigrationReport {
                total: 5,
                created: 2,
                renamed: 1,
                duplicate_email: 1,
                existing_email: 1,
                errors: 1,
            }
        );

        let renamed = users.get_by_username("steve_2").await.unwrap().unwrap();
        assert_eq!(renamed.legacy_id, Some(2));
        assert!(renamed.password_hash.starts_with("pbkdf2_sha256$"));

        // A second run finds every email already present
        let again = AccountMigration::new(source, users.clone()).run().await.unwrap();
        assert_eq!(again.created, 0);
        assert_eq!(again.existing_email, 3);
        assert_eq!(users.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_sqlx_source_reads_table_in_id_order() {
        let pool = create_test_pool().await.unwrap();
        pool.execute("CREATE TABLE auth_user (id INTEGER PRIMARY KEY, username TEXT, email TEXT, password TEXT)")
            .await
            .unwrap();
        pool.execute(
            "INSERT INTO auth_user (id, username, email, password) VALUES (7, 'late', 'late@x.io', 'h'), (3, 'early', NULL, 'h')",
        )
        .await
        .unwrap();

        let source = SqlxLegacySource::new(pool.clone(), "auth_user").unwrap();
        let rows = source.accounts().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, 3);
        assert!(rows[0].email.is_none());
        assert_eq!(rows[1].username.as_deref(), Some("late"));

        assert!(SqlxLegacySource::new(pool, "users; DROP TABLE users").is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        #[test]
        fn sanitized_usernames_are_valid(raw in "\\PC{0,80}", local in "[a-z0-9.]{0,20}") {
            let name = sanitize_username(&raw, &format!("{local}@x.io"));
            prop_assert!((USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&name.len()));
            prop_assert!(name.chars().all(is_username_char));
        }

        #[test]
        fn unique_usernames_avoid_taken(base in "[a-z]{3,50}", extra in 0usize..5) {
            let mut taken: HashSet<String> = HashSet::new();
            taken.insert(base.clone());
            for n in 2..2 + extra {
                taken.insert(format!("{}_{n}", &base[..base.len().min(USERNAME_MAX_LEN - format!("_{n}").len())]));
            }
            let name = unique_username(&base, &taken);
            prop_assert!(!taken.contains(&name));
            prop_assert!(name.len() <= USERNAME_MAX_LEN);
        }
    }
}
