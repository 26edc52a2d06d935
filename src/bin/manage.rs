//! bastion-manage - administrative commands
//!
//! Runs against the database configured in `config.yml` (plus `BASTION_*`
//! overrides), applying pending migrations first. `migrate-accounts --dry-run`
//! leaves the target untouched and refuses to run against an outdated schema.

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bastion::{
    api::AppState,
    cache::create_cache,
    config::{Config, DatabaseDriver, LegacyConfig},
    db::{self, repositories::SqlxUserRepository, DynDatabasePool},
    models::UserRole,
    services::{export::export_wiki, AccountMigration, RegisterInput, SqlxLegacySource},
};

#[derive(Debug, Parser)]
#[command(name = "bastion-manage", version, about = "Administrative commands for Bastion")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, value_name = "PATH", default_value = "config.yml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import accounts from a legacy user table
    MigrateAccounts(MigrateArgs),
    /// Normalise word filters and drop empty or duplicate patterns
    CleanFilters,
    /// Write published wiki pages as printable HTML
    ExportWiki(ExportArgs),
    /// Delete expired sessions and old read notifications
    Purge(PurgeArgs),
    /// Create an admin account
    CreateAdmin(CreateAdminArgs),
}

#[derive(Debug, Args)]
struct MigrateArgs {
    /// Legacy database URL (defaults to `legacy.url` from the config)
    #[arg(long, value_name = "URL")]
    source: Option<String>,
    /// Legacy account table
    #[arg(long, value_name = "NAME")]
    table: Option<String>,
    /// Run every check without writing
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[arg(long, default_value = "en")]
    language: String,
    #[arg(long, value_name = "DIR")]
    output: PathBuf,
}

#[derive(Debug, Args)]
struct PurgeArgs {
    /// Age in days of read notifications to delete
    #[arg(long, default_value_t = 30)]
    days: i64,
}

#[derive(Debug, Args)]
struct CreateAdminArgs {
    #[arg(long)]
    username: String,
    #[arg(long)]
    email: String,
    #[arg(long, env = "BASTION_ADMIN_PASSWORD")]
    password: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bastion=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::load_with_env(&cli.config)?;

    match cli.command {
        Commands::MigrateAccounts(args) => migrate_accounts(config, args).await,
        Commands::CleanFilters => clean_filters(&open_state(config).await?).await,
        Commands::ExportWiki(args) => export(&open_state(config).await?, args).await,
        Commands::Purge(args) => purge(&open_state(config).await?, args).await,
        Commands::CreateAdmin(args) => create_admin(&open_state(config).await?, args).await,
    }
}

/// Connect to the target database and wire the services
async fn open_state(config: Config) -> Result<AppState> {
    let pool = db::create_pool(&config.database).await?;
    db::migrations::run_migrations(&pool).await?;
    let cache = create_cache(&config.cache);
    Ok(AppState::new(pool, cache, config))
}

async fn clean_filters(state: &AppState) -> Result<()> {
    let cleanup = state.word_filter_service.clean().await?;
    println!(
        "normalized: {}, removed empty: {}, removed duplicates: {}",
        cleanup.normalized, cleanup.removed_empty, cleanup.removed_duplicates
    );
    Ok(())
}

async fn export(state: &AppState, args: ExportArgs) -> Result<()> {
    let summary = export_wiki(&state.wiki_service, &args.language, &args.output).await?;
    println!(
        "exported {} pages ({} in a fallback language), index at {}",
        summary.pages,
        summary.fallbacks,
        summary.index.display()
    );
    Ok(())
}

async fn purge(state: &AppState, args: PurgeArgs) -> Result<()> {
    if args.days < 0 {
        bail!("--days must not be negative");
    }
    let sessions = state.user_service.cleanup_expired_sessions().await?;
    let notifications = state
        .notification_service
        .purge_read_older_than(args.days)
        .await?;
    println!("removed {sessions} expired sessions and {notifications} read notifications");
    Ok(())
}

async fn create_admin(state: &AppState, args: CreateAdminArgs) -> Result<()> {
    let user = state
        .user_service
        .create_user(RegisterInput::new(args.username, args.email, args.password), UserRole::Admin)
        .await?;
    println!("created admin '{}' (id {})", user.username, user.id);
    Ok(())
}

async fn migrate_accounts(config: Config, args: MigrateArgs) -> Result<()> {
    let mut legacy = config.legacy.clone();
    if let Some(url) = args.source {
        legacy = LegacyConfig {
            driver: driver_for_url(&url),
            url,
            ..legacy
        };
    }
    if let Some(table) = args.table {
        legacy.table = table;
    }

    let source = SqlxLegacySource::connect(&legacy).await?;
    let pool = db::create_pool(&config.database).await?;
    prepare_target(&pool, args.dry_run).await?;

    let report = AccountMigration::new(Arc::new(source), SqlxUserRepository::boxed(pool))
        .dry_run(args.dry_run)
        .run()
        .await?;

    if args.dry_run {
        println!("dry run, nothing was written");
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Bring the target schema up to date, or on a dry run only check that it is
async fn prepare_target(pool: &DynDatabasePool, dry_run: bool) -> Result<()> {
    if !dry_run {
        db::migrations::run_migrations(pool).await?;
        return Ok(());
    }
    let pending = db::migrations::pending_count(pool).await?;
    if pending > 0 {
        bail!("target database has {pending} pending migration(s); run without --dry-run to apply them");
    }
    Ok(())
}

fn driver_for_url(url: &str) -> DatabaseDriver {
    if url.starts_with("mysql:") {
        DatabaseDriver::Mysql
    } else {
        DatabaseDriver::Sqlite
    }
}
