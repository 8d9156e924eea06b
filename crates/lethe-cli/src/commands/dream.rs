use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use lethe::LifecycleStats;
use lethe::dream::{DreamSession, DreamTrigger};
use lethe::engine::Engine;
use lethe::storage::{Collection, RecordQuery, SortOrder, fetch};

use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, print_json, truncate_string};

#[derive(Parser)]
pub struct DreamCommand {
    #[clap(subcommand)]
    pub command: DreamSubcommand,
}

#[derive(Subcommand)]
pub enum DreamSubcommand {
    #[clap(about = "Run one dream session now")]
    Run(RunArgs),

    #[clap(about = "List recent dream sessions")]
    Sessions(SessionsArgs),
}

#[derive(Clone, Copy, ValueEnum)]
pub enum TriggerArg {
    Manual,
    Idle,
    Scheduled,
}

impl From<TriggerArg> for DreamTrigger {
    fn from(trigger: TriggerArg) -> Self {
        match trigger {
            TriggerArg::Manual => DreamTrigger::Manual,
            TriggerArg::Idle => DreamTrigger::Idle,
            TriggerArg::Scheduled => DreamTrigger::Scheduled,
        }
    }
}

#[derive(Parser)]
pub struct RunArgs {
    #[clap(long, value_enum, default_value = "manual", help = "What started the session")]
    pub trigger: TriggerArg,

    #[clap(long, help = "Hours the fleet has been idle")]
    pub idle_hours: Option<f64>,
}

#[derive(Parser)]
pub struct SessionsArgs {
    #[clap(long, short, default_value = "10", help = "Maximum number of sessions to display")]
    pub limit: usize,
}

impl DreamCommand {
    pub async fn execute(&self, engine: &Engine, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            DreamSubcommand::Run(args) => Self::run(engine, args, format).await,
            DreamSubcommand::Sessions(args) => Self::sessions(engine, args, format).await,
        }
    }

    async fn run(engine: &Engine, args: &RunArgs, format: OutputFormat) -> CliResult<()> {
        let mut stats = LifecycleStats::default();
        let report = engine
            .dream(args.trigger.into(), args.idle_hours, &mut stats)
            .await?;

        match format {
            OutputFormat::Json => print_json(&report)?,
            OutputFormat::Table => {
                println!(
                    "Session {} {:?}: {} memories, {} clusters, {} insights",
                    report.session_id,
                    report.status,
                    report.memories_scanned,
                    report.clusters_found,
                    report.insights_loaded
                );
                if let Some(error) = &report.error {
                    println!("Interrupted: {error}");
                }
                if report.proposals.is_empty() {
                    println!("No proposals.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["ID", "Category", "Title", "Confidence", "Priority", "Auto"]);

                for proposal in &report.proposals {
                    let auto = report.auto_executed.contains(&proposal.id);
                    table.add_row([
                        truncate_string(&proposal.id.to_string(), 8),
                        proposal.category.to_string(),
                        truncate_string(&proposal.title, 50),
                        format!("{:.2}", proposal.confidence),
                        proposal.priority.to_string(),
                        if auto { "yes" } else { "" }.to_string(),
                    ]);
                }

                println!("{table}");
            }
        }

        Ok(())
    }

    async fn sessions(engine: &Engine, args: &SessionsArgs, format: OutputFormat) -> CliResult<()> {
        let sessions: Vec<DreamSession> = fetch(
            engine.store(),
            Collection::DreamSessions,
            RecordQuery::new()
                .order_by("started_at", SortOrder::Desc)
                .limit(args.limit),
        )
        .await?;

        match format {
            OutputFormat::Json => print_json(&sessions)?,
            OutputFormat::Table => {
                if sessions.is_empty() {
                    println!("No dream sessions yet.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header([
                        "Started", "Trigger", "Status", "Memories", "Clusters", "Proposals", "Auto",
                    ]);

                for s in &sessions {
                    table.add_row([
                        format_timestamp(&s.started_at),
                        format!("{:?}", s.trigger),
                        format!("{:?}", s.status),
                        s.memories_scanned.to_string(),
                        s.clusters_found.to_string(),
                        s.proposals_created.to_string(),
                        s.auto_executed.to_string(),
                    ]);
                }

                println!("{table}");
            }
        }

        Ok(())
    }
}
