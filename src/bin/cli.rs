use sqlx::Row;
use std::collections::HashSet;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::SqlitePool;

use precinct_auth::auth::password::{hash_password, needs_rehash, password_violations, validate_password, verify_password};
use precinct_auth::authz::{static_resolution, RoleMappingConfig};
use precinct_auth::db;
use precinct_auth::store::{ConfigStore, CredentialStore, SqliteStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "precinct-auth operator tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Hash a password read from stdin
    HashPassword,
    /// Report complexity violations for a password read from stdin, optionally verifying it against a stored hash
    CheckPassword {
        #[arg(long)]
        hash: Option<String>,
    },
    /// Create or replace a local credential; the password is read from stdin
    SetCredential {
        username: String,
        #[arg(long)]
        role: String,
    },
    /// Replace the role-mapping record with the contents of a JSON file
    ImportRoleMappings { file: PathBuf },
    /// Print the stored role-mapping record
    ShowRoleMappings,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD, falling back to the crate-local `.env`.
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::MigrateRun => {
            let pool = db::init().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = db::init().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::HashPassword => {
            let password = read_password()?;
            validate_password(&password)?;
            println!("{}", hash_password(&password));
        }
        Commands::CheckPassword { hash } => {
            let password = read_password()?;
            let violations = password_violations(&password);
            if violations.is_empty() {
                println!("complexity: ok");
            } else {
                for rule in &violations {
                    println!("complexity: {}", rule.describe());
                }
            }
            if let Some(stored) = hash {
                println!("matches: {}", verify_password(&password, &stored));
                println!("needs rehash: {}", needs_rehash(&stored));
            }
        }
        Commands::SetCredential { username, role } => {
            if static_resolution(&role).is_none() {
                anyhow::bail!("unknown role '{role}' (expected superadmin, admin or moderator)");
            }
            let password = read_password()?;
            validate_password(&password)?;

            let store = SqliteStore::new(db::init().await?);
            let hash = hash_password(&password);
            store.upsert_credential(&username, &hash, &role).await?;
            println!("Credential for {username} saved with role {role}");
        }
        Commands::ImportRoleMappings { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let config: RoleMappingConfig = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a valid role-mapping record", file.display()))?;

            if let Err(problem) = config.validate() {
                anyhow::bail!("{}: {problem}", file.display());
            }

            let store = SqliteStore::new(db::init().await?);
            let version = store.save_role_mappings(&config).await?;
            println!(
                "Imported {} mappings and {} catalog entries as version {version}",
                config.mappings.len(),
                config.catalog.len()
            );
        }
        Commands::ShowRoleMappings => {
            let store = SqliteStore::new(db::init().await?);
            let config = store.load_role_mappings().await?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn read_password() -> anyhow::Result<String> {
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).context("failed to read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        anyhow::bail!("no password given on stdin");
    }
    Ok(password)
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let db_applied = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
        .fetch_optional(pool)
        .await?;
    let applied_versions: HashSet<i64> = if db_applied.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Prefer ./migrations, falling back to the crate-local folder.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}
