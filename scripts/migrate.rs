use anyhow::{Context, Result};
use attachments_migrate_lib::{
    config::MigrateConfig,
    db::open_sqlite_pool,
    handlers::{MIGRATED_FLAG, PRO_MIGRATED_FLAG},
    legacy::{LEGACY_META_KEY, PRO_META_KEY},
    logging,
    report::{write_run_report, RunOutcome},
    schema::ensure_host_schema,
    HostStore, MigrationMode, Migrator, Tables,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "migrate",
    about = "Migrates Attachments 1.x and Attachments Pro data to the JSON instance schema"
)]
struct Cli {
    /// Host database path (overrides ATTACHMENTS_MIGRATE_DB)
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Decode and count without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Write a JSON report of the run into this directory
    #[arg(long, value_name = "DIR")]
    report_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Show migration flags and how many posts carry each meta key
    #[command(about, long_about = None)]
    Status,
    /// Create the host tables if they are missing
    #[command(about, long_about = None)]
    InitSchema,
    /// Migrate Attachments 1.x data into an instance
    #[command(about, long_about = None)]
    Run {
        /// Destination instance name
        #[arg(long, default_value = "attachments")]
        instance: String,
        /// Field name for the legacy title (empty to drop it)
        #[arg(long, default_value = "title")]
        title: String,
        /// Field name for the legacy caption (empty to drop it)
        #[arg(long, default_value = "caption")]
        caption: String,
        /// Run even if the migration flag is already set
        #[arg(long)]
        force: bool,
    },
    /// Migrate every configured Attachments Pro instance
    #[command(about, long_about = None)]
    RunPro {
        /// Run even if the migration flag is already set
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = logging::init()?;

    let cli = Cli::parse();
    let mut config = MigrateConfig::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    let mode = if cli.dry_run {
        MigrationMode::DryRun
    } else {
        MigrationMode::Apply
    };

    let outcome = match cli.cmd {
        Cmd::Status => return status(&config).await,
        Cmd::InitSchema => return init_schema(&config).await,
        Cmd::Run {
            instance,
            title,
            caption,
            force,
        } => {
            let migrator = open_migrator(&config).await?;
            run_legacy(&migrator, mode, &instance, &title, &caption, force).await?
        }
        Cmd::RunPro { force } => {
            let migrator = open_migrator(&config).await?;
            run_pro(&migrator, mode, force).await?
        }
    };

    if let Some(dir) = cli.report_dir {
        let path = write_run_report(&dir, &config.db_path, mode, &outcome)?;
        println!("Report: {}", path.display());
    }
    Ok(())
}

async fn open_migrator(config: &MigrateConfig) -> Result<Migrator> {
    ensure_exists(&config.db_path)?;
    let pool = open_sqlite_pool(&config.db_path, false).await?;
    let host = HostStore::new(pool, Tables::with_prefix(&config.table_prefix));
    Ok(Migrator::new(host, config.meta_key.clone()))
}

fn ensure_exists(db: &Path) -> Result<()> {
    if !db.exists() {
        anyhow::bail!("database not found: {}", db.display());
    }
    Ok(())
}

async fn status(config: &MigrateConfig) -> Result<()> {
    let db = &config.db_path;
    println!("DB: {}", db.display());
    if !db.exists() {
        println!("Database does not exist");
        return Ok(());
    }
    let pool = open_sqlite_pool(db, false).await?;
    let host = HostStore::new(pool, Tables::with_prefix(&config.table_prefix));

    for flag in [MIGRATED_FLAG, PRO_MIGRATED_FLAG] {
        let set = host
            .option_flag(flag)
            .await
            .with_context(|| format!("read option {flag}"))?;
        println!("{flag}: {}", if set { "set" } else { "unset" });
    }
    for key in [LEGACY_META_KEY, PRO_META_KEY, config.meta_key.as_str()] {
        let posts = host
            .count_posts_with_meta_key(key)
            .await
            .with_context(|| format!("count posts with {key}"))?;
        println!("Posts with {key}: {posts}");
    }
    Ok(())
}

async fn init_schema(config: &MigrateConfig) -> Result<()> {
    let pool = open_sqlite_pool(&config.db_path, true).await?;
    ensure_host_schema(&pool, &Tables::with_prefix(&config.table_prefix)).await?;
    println!("Schema ready: {}", config.db_path.display());
    Ok(())
}

async fn run_legacy(
    migrator: &Migrator,
    mode: MigrationMode,
    instance: &str,
    title: &str,
    caption: &str,
    force: bool,
) -> Result<RunOutcome> {
    let host = migrator.host();
    if !force && host.option_flag(MIGRATED_FLAG).await? {
        println!("Migration has already run ({MIGRATED_FLAG} is set); use --force to repeat it");
        return Ok(RunOutcome::AlreadyRun {
            flag: MIGRATED_FLAG.to_string(),
        });
    }

    let Some(report) = migrator
        .migrate(Some(instance), Some(title), Some(caption), mode)
        .await?
    else {
        println!("Nothing to migrate: the instance name is empty");
        return Ok(RunOutcome::NothingToMigrate);
    };

    if mode.is_apply() {
        host.set_option_flag(MIGRATED_FLAG).await?;
    }
    println!(
        "Migrated: {} posts, {} records into '{}'{}",
        report.posts,
        report.records,
        report.instance,
        dry_run_suffix(mode)
    );
    if report.skipped_entries > 0 || report.skipped_posts > 0 {
        println!(
            "Skipped: {} malformed entries, {} posts",
            report.skipped_entries, report.skipped_posts
        );
    }
    Ok(RunOutcome::Legacy { report })
}

async fn run_pro(migrator: &Migrator, mode: MigrationMode, force: bool) -> Result<RunOutcome> {
    let host = migrator.host();
    if !force && host.option_flag(PRO_MIGRATED_FLAG).await? {
        println!("Migration has already run ({PRO_MIGRATED_FLAG} is set); use --force to repeat it");
        return Ok(RunOutcome::AlreadyRun {
            flag: PRO_MIGRATED_FLAG.to_string(),
        });
    }

    let Some(settings) = migrator.pro_settings().await? else {
        println!("Nothing to migrate: no Attachments Pro settings found");
        return Ok(RunOutcome::NothingToMigrate);
    };

    let mut instances = Vec::with_capacity(settings.positions.len());
    for position in &settings.positions {
        if let Some(total) = migrator.migrate_pro(position, mode).await? {
            println!(
                "Instance '{}': {} records from {} posts",
                total.instance, total.total, total.posts
            );
            instances.push(total);
        }
    }
    let total: u64 = instances.iter().map(|i| i.total).sum();
    // Every pass scans the same posts against the same positions.
    let unconfigured = instances.first().map_or(0, |i| i.unconfigured_instances);

    if mode.is_apply() {
        host.set_option_flag(PRO_MIGRATED_FLAG).await?;
    }
    println!("Migrated: {total}{}", dry_run_suffix(mode));
    if unconfigured > 0 {
        println!("Left in place: {unconfigured} stored instances with no configured position");
    }
    Ok(RunOutcome::Pro { instances, total })
}

fn dry_run_suffix(mode: MigrationMode) -> &'static str {
    if mode.is_apply() {
        ""
    } else {
        " (dry run, nothing written)"
    }
}
