use chrono::Utc;
use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use lethe::config::Config;
use lethe::engine::Engine;
use lethe::memory::MemoryKind;

use crate::error::CliResult;
use crate::output::{OutputFormat, print_json};

#[derive(Parser)]
pub struct DecayCommand {
    #[clap(subcommand)]
    pub command: DecaySubcommand,
}

#[derive(Subcommand)]
pub enum DecaySubcommand {
    #[clap(about = "Rescore memories and archive the stale ones")]
    Run,

    #[clap(about = "Compute a decay score without touching the store")]
    Score(ScoreArgs),
}

#[derive(Parser)]
pub struct ScoreArgs {
    #[clap(long, help = "Memory age in hours")]
    pub age_hours: f64,

    #[clap(long, default_value = "0", help = "Times the memory was read")]
    pub access_count: u32,

    #[clap(long, default_value = "note", help = "Memory kind")]
    pub kind: String,

    #[clap(long, help = "Treat the memory as an anchor")]
    pub anchored: bool,
}

impl DecayCommand {
    /// Subcommands that need no store
    pub fn execute_offline(&self, config: &Config, format: OutputFormat) -> Option<CliResult<()>> {
        match &self.command {
            DecaySubcommand::Score(args) => Some(Self::score(config, args, format)),
            DecaySubcommand::Run => None,
        }
    }

    pub async fn execute(&self, engine: &Engine, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            DecaySubcommand::Run => Self::run(engine, format).await,
            DecaySubcommand::Score(args) => Self::score(engine.config(), args, format),
        }
    }

    async fn run(engine: &Engine, format: OutputFormat) -> CliResult<()> {
        let report = engine.decay_pass().run(Utc::now()).await;

        match format {
            OutputFormat::Json => print_json(&report)?,
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Metric", "Value"]);

                table.add_row(["Scored", &report.scored.to_string()]);
                table.add_row(["Archived", &report.archived.to_string()]);
                table.add_row(["Reforge Candidates", &report.candidates.len().to_string()]);
                table.add_row(["Failed Writes", &report.failed_writes.to_string()]);

                println!("{table}");
            }
        }

        Ok(())
    }

    fn score(config: &Config, args: &ScoreArgs, format: OutputFormat) -> CliResult<()> {
        let kind = MemoryKind::from(args.kind.as_str());
        let score = config
            .decay
            .score(args.age_hours, args.access_count, &kind, args.anchored);

        match format {
            OutputFormat::Json => print_json(&serde_json::json!({
                "age_hours": args.age_hours,
                "access_count": args.access_count,
                "kind": kind.as_str(),
                "anchored": args.anchored,
                "score": score,
                "archivable": score < config.archival.archive_threshold && !args.anchored,
            }))?,
            OutputFormat::Table => println!("{score:.3}"),
        }

        Ok(())
    }
}
