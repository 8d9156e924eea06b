//! Lethe Daemon - background memory lifecycle passes

use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use lethe::LifecycleStats;
use lethe::config::Config;
use lethe::dream::DreamTrigger;
use lethe::engine::Engine;
use lethe::error::Result;
use lethe::scheduler::Scheduler;

/// Lethe - memory lifecycle engine for agent fleets
#[derive(Parser)]
#[command(name = "lethe")]
#[command(about = "Decay, archive, reforge and dream over agent memories")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run maintenance and dream passes on a schedule (default command)
    #[command(name = "serve")]
    Serve,
    /// Run one maintenance pass and exit
    #[command(name = "tick")]
    Tick {
        /// Also run a dream session after maintenance
        #[arg(long)]
        dream: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!("Config loaded: {:?}", config);

    match cli.command {
        None | Some(Command::Serve) => serve(config).await,
        Some(Command::Tick { dream }) => tick(config, dream).await,
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,lethe=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!("Starting Lethe daemon");

    let scheduler_config = config.scheduler.clone();
    let engine = Engine::open(config).await?;
    let scheduler = Scheduler::from_config(&engine, &scheduler_config);

    let stats = scheduler
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await;

    tracing::info!(?stats, "Lethe daemon stopped");
    Ok(())
}

async fn tick(config: Config, dream: bool) -> Result<()> {
    let engine = Engine::open(config).await?;
    let mut stats = LifecycleStats::default();

    engine.maintenance(Utc::now(), &mut stats).await;
    if dream {
        engine.dream(DreamTrigger::Manual, None, &mut stats).await?;
    }

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
