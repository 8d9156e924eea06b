use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use lethe::engine::Engine;
use lethe::lifecycle::ReforgedCrystal;
use lethe::storage::{Collection, RecordQuery, SortOrder, fetch};
use uuid::Uuid;

use crate::error::{CliResult, parse_id};
use crate::output::{OutputFormat, format_timestamp, print_json, truncate_string};

#[derive(Parser)]
pub struct ReforgeCommand {
    #[clap(subcommand)]
    pub command: ReforgeSubcommand,
}

#[derive(Subcommand)]
pub enum ReforgeSubcommand {
    #[clap(about = "Show groups of decaying memories that qualify for reforging")]
    Targets,

    #[clap(about = "Reforge specific memories into a crystal")]
    Run(RunArgs),

    #[clap(about = "Reforge the largest qualifying groups")]
    Auto,

    #[clap(about = "List past reforges")]
    List(ListArgs),
}

#[derive(Parser)]
pub struct RunArgs {
    #[clap(required = true, num_args = 1.., help = "Memory IDs to reforge (at least 5)")]
    pub ids: Vec<String>,

    #[clap(long, default_value = "operator", help = "Who requested the reforge")]
    pub by: String,
}

#[derive(Parser)]
pub struct ListArgs {
    #[clap(long, short, default_value = "20", help = "Maximum number of reforges to display")]
    pub limit: usize,
}

impl ReforgeCommand {
    pub async fn execute(&self, engine: &Engine, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            ReforgeSubcommand::Targets => Self::targets(engine, format).await,
            ReforgeSubcommand::Run(args) => Self::run(engine, args, format).await,
            ReforgeSubcommand::Auto => Self::auto(engine, format).await,
            ReforgeSubcommand::List(args) => Self::list(engine, args, format).await,
        }
    }

    async fn targets(engine: &Engine, format: OutputFormat) -> CliResult<()> {
        let targets = engine.cluster_builder().build().await?;

        match format {
            OutputFormat::Json => print_json(&targets)?,
            OutputFormat::Table => {
                if targets.is_empty() {
                    println!("No reforge targets found.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Members", "Mean Decay", "Keywords", "First Memory"]);

                for target in &targets {
                    table.add_row([
                        target.member_count.to_string(),
                        format!("{:.3}", target.mean_decay),
                        truncate_string(&target.keywords.join(", "), 50),
                        target
                            .memory_ids
                            .first()
                            .map_or("-".to_string(), Uuid::to_string),
                    ]);
                }

                println!("{table}");
                println!("\nTotal: {} targets", targets.len());
            }
        }

        Ok(())
    }

    async fn run(engine: &Engine, args: &RunArgs, format: OutputFormat) -> CliResult<()> {
        let ids = args
            .ids
            .iter()
            .map(|id| parse_id(id))
            .collect::<CliResult<Vec<Uuid>>>()?;

        let min = engine.config().reforge.min_sources;
        let Some(reforged) = engine.reforger().reforge(&ids, &args.by).await? else {
            return Err(format!("Reforging needs at least {min} existing memories").into());
        };

        match format {
            OutputFormat::Json => print_json(&reforged)?,
            OutputFormat::Table => print_reforged(&reforged),
        }

        Ok(())
    }

    async fn auto(engine: &Engine, format: OutputFormat) -> CliResult<()> {
        let report = engine.reforger().auto_reforge().await?;

        match format {
            OutputFormat::Json => print_json(&report)?,
            OutputFormat::Table => {
                println!(
                    "Targets: {}, eligible: {}, reforged: {}, failed: {}",
                    report.targets_found,
                    report.eligible,
                    report.reforged.len(),
                    report.failures
                );
                for reforged in &report.reforged {
                    println!();
                    print_reforged(reforged);
                }
            }
        }

        Ok(())
    }

    async fn list(engine: &Engine, args: &ListArgs, format: OutputFormat) -> CliResult<()> {
        let reforged: Vec<ReforgedCrystal> = fetch(
            engine.store(),
            Collection::ReforgedCrystals,
            RecordQuery::new()
                .order_by("created_at", SortOrder::Desc)
                .limit(args.limit),
        )
        .await?;

        match format {
            OutputFormat::Json => print_json(&reforged)?,
            OutputFormat::Table => {
                if reforged.is_empty() {
                    println!("No reforges yet.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Name", "Sources", "Ratio", "By", "Created"]);

                for r in &reforged {
                    table.add_row([
                        r.legendary_name.clone(),
                        r.source_count.to_string(),
                        format!("{:.3}", r.compression_ratio),
                        r.created_by.clone(),
                        format_timestamp(&r.created_at),
                    ]);
                }

                println!("{table}");
            }
        }

        Ok(())
    }
}

fn print_reforged(reforged: &ReforgedCrystal) {
    println!("Reforged into \"{}\"", reforged.legendary_name);
    println!(
        "Sources: {} (compression {:.3})",
        reforged.source_count, reforged.compression_ratio
    );
    if let Some(crystal_id) = reforged.crystal_id {
        println!("Crystal: {crystal_id}");
    }
    println!();
    println!("{}", reforged.summary);
}
