use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use newswire_ingest::{
    build_orchestrator, connect_pool, maybe_build_scheduler, run_ingest_once_from_env,
    IngestConfig,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "newswire-cli")]
#[command(about = "Newswire command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one ingestion cycle over all active sources.
    Fetch,
    /// Run the cron scheduler until interrupted.
    Schedule,
    /// Apply the embedded database migrations.
    Migrate,
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

    match cli.command.unwrap_or(Commands::Fetch) {
        Commands::Fetch => {
            println!("Starting article fetch...");
            let summary = run_ingest_once_from_env().await?;
            let elapsed = (summary.finished_at - summary.started_at).num_milliseconds() as f64
                / 1000.0;

            println!("Summary:");
            println!("   Run id: {}", summary.run_id);
            println!("   Total sources processed: {}", summary.sources_processed);
            println!("   Successful: {}", summary.succeeded);
            println!("   Failed: {}", summary.failed);
            println!("   Total articles fetched: {}", summary.total_articles);
            println!("Article fetch completed in {elapsed:.2}s");
        }
        Commands::Schedule => {
            let mut config = IngestConfig::from_env();
            config.scheduler_enabled = true;

            let orchestrator = Arc::new(build_orchestrator(&config).await?);
            let scheduler = maybe_build_scheduler(&config, orchestrator)
                .await?
                .context("scheduler was not built")?;
            scheduler.start().await.context("starting scheduler")?;

            println!(
                "Scheduler running ({} and {}); press ctrl-c to stop.",
                config.ingest_cron_1, config.ingest_cron_2
            );
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            println!("Shutting down.");
        }
        Commands::Migrate => {
            let config = IngestConfig::from_env();
            let pool = connect_pool(&config.database_url).await?;
            newswire_storage::run_migrations(&pool).await?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
