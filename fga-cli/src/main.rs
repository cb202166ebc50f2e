//! Operator CLI for embedded FGA datastores
//!
//! Usage:
//!   fga --datastore ./fga.db migrate
//!   fga --datastore ./fga.db create-store acme
//!   fga --datastore ./fga.db check request.json
//!
//! Request files hold the same JSON the facade accepts. Every command other
//! than `migrate` brings the schema up to date before serving the request.

use anyhow::Context;
use clap::{Parser, Subcommand};
use fga_embedded::{EmbeddedConfig, MigrationReport};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "fga")]
#[command(about = "Manage an embedded FGA datastore")]
#[command(version)]
struct Args {
    /// Datastore file path or sqlite: URI
    #[arg(long, env = "FGA_DATASTORE_URI", default_value = "fga.db")]
    datastore: String,

    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending schema migrations
    Migrate,
    /// Create a store
    CreateStore { name: String },
    /// List stores; the request file is optional
    ListStores { request: Option<PathBuf> },
    /// Write an authorization model
    WriteModel { request: PathBuf },
    /// Write and delete tuples
    Write { request: PathBuf },
    /// Check a relationship
    Check { request: PathBuf },
    /// List objects a user is related to
    ListObjects { request: PathBuf },
    /// List users related to an object
    ListUsers { request: PathBuf },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = EmbeddedConfig::load(args.config.as_deref())?;
    fga_embedded::init_logging(&config.logging);

    let output = run(&args, &config)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&output)?;
    writeln!(stdout)?;
    Ok(())
}

fn run(args: &Args, config: &EmbeddedConfig) -> anyhow::Result<Vec<u8>> {
    let report = migrate(&args.datastore)?;
    if !matches!(args.command, Command::Migrate) {
        fga_embedded::init_server_with_config(&args.datastore, config)
            .with_context(|| format!("Failed to open datastore {}", args.datastore))?;
    }

    let output = match &args.command {
        Command::Migrate => serde_json::to_vec_pretty(&report)?,
        Command::CreateStore { name } => fga_embedded::create_store(name)?,
        Command::ListStores { request } => {
            let payload = match request {
                Some(path) => read_request(path)?,
                None => b"{}".to_vec(),
            };
            fga_embedded::list_stores(&payload)?
        }
        Command::WriteModel { request } => {
            fga_embedded::write_authorization_model(&read_request(request)?)?
        }
        Command::Write { request } => {
            fga_embedded::write(&read_request(request)?)?;
            b"{}".to_vec()
        }
        Command::Check { request } => fga_embedded::check_response(&read_request(request)?)?,
        Command::ListObjects { request } => {
            fga_embedded::list_objects_response(&read_request(request)?)?
        }
        Command::ListUsers { request } => fga_embedded::list_users(&read_request(request)?)?,
    };
    Ok(output)
}

fn migrate(uri: &str) -> anyhow::Result<MigrationReport> {
    let report = fga_embedded::migrate_database(uri)
        .with_context(|| format!("Failed to migrate datastore {}", uri))?;
    info!(
        "Datastore {} at schema version {} (was {})",
        uri, report.current_version, report.previous_version
    );
    Ok(report)
}

fn read_request(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read request file {}", path.display()))
}
