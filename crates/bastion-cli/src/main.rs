use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use bastion_core::grants::migration::{self, RoleOutcome, RoleTally, Verification};
use bastion_core::logging::init_logging_from_config;
use bastion_core::migrations::Migrator;
use bastion_core::seed::{self, SeedDocument};
use bastion_core::{App, Config};
use clap::{Parser, Subcommand};
use colored::Colorize;
use sea_orm_migration::MigratorTrait;

#[derive(Parser)]
#[command(name = "bastion")]
#[command(about = "Access control service: catalog, grants and decisions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Move role grants between the junction and embedded forms
    Grants {
        #[command(subcommand)]
        action: GrantCommands,
        /// Print the report as JSON
        #[arg(long, global = true)]
        json: bool,
    },
    /// Upsert resources, permissions and roles from a JSON seed file
    Seed {
        /// Path to the seed document
        file: PathBuf,
    },
    /// Start the HTTP server
    Serve,
}

#[derive(Subcommand, Debug, PartialEq)]
enum GrantCommands {
    /// Build every role's embedded grants from its junction rows
    Migrate,
    /// Clear every role's embedded grants, keeping junction rows
    Rollback,
    /// Compare both forms role by role
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().map_err(|e| anyhow!("invalid configuration: {e}"))?;
    init_logging_from_config(&config);

    match cli.command {
        Commands::Migrate => migrate(&config).await,
        Commands::Grants { action, json } => grants(config, action, json).await,
        Commands::Seed { file } => seed_file(config, file).await,
        Commands::Serve => open(config)
            .await?
            .run()
            .await
            .map_err(|e| anyhow!("server failed: {e}")),
    }
}

/// Connect and apply migrations.
async fn open(config: Config) -> Result<App> {
    App::with_config(config)
        .await
        .map_err(|e| anyhow!("failed to open database: {e}"))
}

async fn migrate(config: &Config) -> Result<()> {
    println!("{}", "Running pending migrations...".bold());
    let db = bastion_core::db::connect(config)
        .await
        .context("failed to connect to database")?;
    let pending = Migrator::get_pending_migrations(&db).await?.len();
    Migrator::up(&db, None).await?;
    println!("{} {} migration(s) applied", "✓".green(), pending);
    Ok(())
}

async fn grants(config: Config, action: GrantCommands, json: bool) -> Result<()> {
    let app = open(config).await?;

    match action {
        GrantCommands::Migrate => {
            let report = migration::migrate_forward(&app.db).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_tallies(&report.roles);
                println!(
                    "\n{} succeeded, {} failed",
                    report.succeeded.to_string().green(),
                    report.failed.to_string().red()
                );
                print_verification(&report.verification);
            }
            if report.failed > 0 || !report.verification.is_consistent() {
                return Err(anyhow!("grant migration finished with errors"));
            }
        }
        GrantCommands::Rollback => {
            let report = migration::rollback(&app.db).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_tallies(&report.roles);
                println!(
                    "\n{} succeeded, {} failed",
                    report.succeeded.to_string().green(),
                    report.failed.to_string().red()
                );
                println!(
                    "Embedded grants remaining: {}  Junction rows kept: {}",
                    report.embedded_remaining, report.junction_total
                );
            }
            if report.failed > 0 || report.embedded_remaining > 0 {
                return Err(anyhow!("grant rollback finished with errors"));
            }
        }
        GrantCommands::Verify => {
            let verification = migration::verify(&app.db).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&verification)?);
            } else {
                print_verification(&verification);
            }
            if !verification.is_consistent() {
                return Err(anyhow!("grant forms are out of sync"));
            }
        }
    }
    Ok(())
}

fn print_tallies(tallies: &[RoleTally]) {
    for tally in tallies {
        match &tally.outcome {
            RoleOutcome::Ok => println!(
                "  {} {} (#{}) {} grant(s)",
                "✓".green(),
                tally.name,
                tally.role_id,
                tally.grants
            ),
            RoleOutcome::Failed(reason) => println!(
                "  {} {} (#{}) {}",
                "✗".red(),
                tally.name,
                tally.role_id,
                reason.red()
            ),
        }
    }
}

fn print_verification(verification: &Verification) {
    println!(
        "Checked {} role(s): {} embedded, {} junction",
        verification.roles_checked, verification.total_embedded, verification.total_junction
    );
    for mismatch in &verification.mismatches {
        println!(
            "  {} {} (#{}) embedded={} junction={} differing={:?}",
            "!".yellow(),
            mismatch.name,
            mismatch.role_id,
            mismatch.embedded,
            mismatch.junction,
            mismatch.differing_actions
        );
    }
    if verification.is_consistent() {
        println!("{}", "Both grant forms agree".green());
    } else {
        println!("{}", "Grant forms disagree".red().bold());
    }
}

async fn seed_file(config: Config, file: PathBuf) -> Result<()> {
    let doc = SeedDocument::from_file(&file).await?;
    let app = open(config).await?;
    let state = app.state()?;

    println!("Seeding from {}...", file.display().to_string().bold());
    let report = seed::apply(&state, doc).await?;
    println!(
        "{} resources: {} created, {} updated",
        "✓".green(),
        report.resources_created,
        report.resources_updated
    );
    println!(
        "{} permissions: {} created, {} updated",
        "✓".green(),
        report.permissions_created,
        report.permissions_updated
    );
    println!("{} roles: {}, grants: {}", "✓".green(), report.roles, report.grants);
    for module in &report.unknown_modules {
        println!("  {} no active permission for '{}'", "!".yellow(), module);
    }
    Ok(())
}
