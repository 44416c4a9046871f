//! Logstats - daily per-customer uptime and latency statistics
//!
//! Turns HTTP request logs into one record per customer and day:
//! - Event-time windowing with a lateness watermark
//! - Uptime from 5xx downtime intervals
//! - Mean, median and p99 latency
//! - Read-only HTTP API over the stored records

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use logstats::config::Config;
use logstats::db::{Database, StatsSink};
use logstats::pipeline;
use logstats::web;

#[derive(Debug, Parser)]
#[command(name = "logstats", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Wait for the database and create the schema
    Migrate,
    /// Process a request log (`-` for stdin) into daily stats
    Ingest {
        #[arg(default_value = "api_requests.log")]
        source: String,
    },
    /// Serve the read-only stats API
    Serve,
    /// Print what is currently stored
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any other initialization)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    // Initialize logging based on LOG_FORMAT env var
    // Use LOG_FORMAT=gcp for structured GCP Cloud Logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_lowercase()));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "gcp" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Configuration loaded");

    let db = Database::connect_with_retry(&config.database).await?;
    db.run_migrations().await?;
    info!("Database initialized");

    match cli.command {
        Command::Migrate => {
            info!("Migrations completed");
        }
        Command::Ingest { source } => {
            info!("Processing logs from {}...", source);
            let reader = pipeline::open_source(&source).await?;
            let sink: Arc<dyn StatsSink> = Arc::new(db.clone());
            let (report, written) = pipeline::ingest(
                &config,
                sink,
                pipeline::lines(reader),
                pipeline::shutdown_signal(),
            )
            .await?;
            info!(
                "Log processing completed: {} records written, {} failed, {} malformed lines",
                written.written, written.failed, report.malformed
            );
            verify(&db).await?;
        }
        Command::Serve => {
            web::start_server(&config, db).await?;
        }
        Command::Verify => {
            verify(&db).await?;
        }
    }

    Ok(())
}

async fn verify(db: &Database) -> Result<()> {
    let count = db.get_total_count().await?;
    info!("Found {} records in database", count);

    for record in db.all_stats().await? {
        info!(
            "Customer: {}, Date: {}, Uptime: {}%",
            record.customer_id, record.date, record.uptime_percentage
        );
    }
    Ok(())
}
