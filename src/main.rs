use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use std::env;
use tracing_subscriber::EnvFilter;

use tripwatch::commands;

#[derive(Parser, Debug)]
#[command(
    name = "tripwatch",
    about = "Travel-assistance backend: flight lifecycle tracking and WhatsApp notifications."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full service (web API, scheduler, poll workers)
    Run {
        /// Interface to bind the web server on
        #[arg(long, default_value = "0.0.0.0")]
        interface: String,
        /// Web server port
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
    /// Force a poll cycle for every tracked trip and repair next-check times
    ResyncTrips {
        /// Log what would happen without touching anything
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder()
        .build(manager)
        .context("Failed to create database pool")?;

    match cli.command {
        Commands::Run { interface, port } => commands::handle_run(interface, port, pool).await,
        Commands::ResyncTrips { dry_run } => commands::handle_resync_trips(pool, dry_run).await,
    }
}
