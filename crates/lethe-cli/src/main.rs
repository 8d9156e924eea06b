use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lethe::config::Config;
use lethe::engine::Engine;
use lethe_cli::commands::{
    DecayCommand, DreamCommand, ManifestCommand, MemoryCommand, ReforgeCommand, StatsCommand,
};
use lethe_cli::error::CliResult;
use lethe_cli::output::OutputFormat;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lethe-cli")]
#[command(about = "Lethe CLI - Management tool for the lethe memory lifecycle engine")]
#[command(version)]
pub struct Cli {
    #[clap(long, short, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[clap(long, short = 'd', global = true, help = "Path to data directory")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, short = 'c', global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[clap(about = "Memory management commands")]
    Memory(MemoryCommand),

    #[clap(about = "Decay scoring and archival")]
    Decay(DecayCommand),

    #[clap(about = "Cluster and reforge decaying memories")]
    Reforge(ReforgeCommand),

    #[clap(about = "Run dream analysis and inspect sessions")]
    Dream(DreamCommand),

    #[clap(about = "Review, approve and reject manifestations")]
    Manifest(ManifestCommand),

    #[clap(about = "Show lifecycle statistics")]
    Stats(StatsCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    // Diagnostics go to stderr so JSON output stays clean
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir.clone() {
        config.storage.data_dir = data_dir;
    }

    // Pure scoring needs no store
    if let Command::Decay(cmd) = &cli.command {
        if let Some(result) = cmd.execute_offline(&config, format) {
            return result;
        }
    }

    tracing::debug!(data_dir = %config.storage.data_dir.display(), "opening store");
    let engine = Engine::open(config).await?;

    match &cli.command {
        Command::Memory(cmd) => cmd.execute(&engine, format).await,
        Command::Decay(cmd) => cmd.execute(&engine, format).await,
        Command::Reforge(cmd) => cmd.execute(&engine, format).await,
        Command::Dream(cmd) => cmd.execute(&engine, format).await,
        Command::Manifest(cmd) => cmd.execute(&engine, format).await,
        Command::Stats(cmd) => cmd.execute(&engine, format).await,
    }
}
