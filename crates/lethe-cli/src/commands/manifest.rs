use chrono::Utc;
use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use lethe::dream::{ManifestStatus, Manifestation};
use lethe::engine::Engine;

use crate::error::{CliResult, parse_id};
use crate::output::{OutputFormat, format_timestamp, print_json, truncate_string};

#[derive(Parser)]
pub struct ManifestCommand {
    #[clap(subcommand)]
    pub command: ManifestSubcommand,
}

#[derive(Subcommand)]
pub enum ManifestSubcommand {
    #[clap(about = "List manifestations")]
    List(ListArgs),

    #[clap(about = "Show manifestation details")]
    Show(IdArgs),

    #[clap(about = "Approve a proposal and execute it")]
    Approve(ApproveArgs),

    #[clap(about = "Reject a proposal")]
    Reject(RejectArgs),

    #[clap(about = "Expire proposals past their time to live")]
    Expire,
}

#[derive(Parser)]
pub struct ListArgs {
    #[clap(long, short, default_value = "20", help = "Maximum number of manifestations")]
    pub limit: usize,

    #[clap(
        long,
        short,
        help = "Filter by status (proposed, approved, executed, auto_executed, rejected, expired)"
    )]
    pub status: Option<String>,
}

#[derive(Parser)]
pub struct IdArgs {
    #[clap(help = "Manifestation ID (UUID format)")]
    pub id: String,
}

#[derive(Parser)]
pub struct ApproveArgs {
    #[clap(help = "Manifestation ID (UUID format)")]
    pub id: String,

    #[clap(long, default_value = "operator", help = "Who approved it")]
    pub by: String,
}

#[derive(Parser)]
pub struct RejectArgs {
    #[clap(help = "Manifestation ID (UUID format)")]
    pub id: String,

    #[clap(long, help = "Why it was rejected")]
    pub reason: Option<String>,
}

impl ManifestCommand {
    pub async fn execute(&self, engine: &Engine, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            ManifestSubcommand::List(args) => Self::list(engine, args, format).await,
            ManifestSubcommand::Show(args) => Self::show(engine, args, format).await,
            ManifestSubcommand::Approve(args) => Self::approve(engine, args, format).await,
            ManifestSubcommand::Reject(args) => Self::reject(engine, args, format).await,
            ManifestSubcommand::Expire => Self::expire(engine, format).await,
        }
    }

    async fn list(engine: &Engine, args: &ListArgs, format: OutputFormat) -> CliResult<()> {
        let status = args
            .status
            .as_deref()
            .map(str::parse::<ManifestStatus>)
            .transpose()?;
        let manifestations = engine.executor().list(status, args.limit).await?;

        match format {
            OutputFormat::Json => print_json(&manifestations)?,
            OutputFormat::Table => {
                if manifestations.is_empty() {
                    println!("No manifestations found.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["ID", "Category", "Title", "Conf", "Prio", "Status", "Created"]);

                for m in &manifestations {
                    table.add_row([
                        truncate_string(&m.id.to_string(), 8),
                        m.category.to_string(),
                        truncate_string(&m.title, 50),
                        format!("{:.2}", m.confidence),
                        m.priority.to_string(),
                        m.status.to_string(),
                        format_timestamp(&m.created_at),
                    ]);
                }

                println!("{table}");
                println!("\nTotal: {} manifestations", manifestations.len());
            }
        }

        Ok(())
    }

    async fn show(engine: &Engine, args: &IdArgs, format: OutputFormat) -> CliResult<()> {
        let manifestation = engine.executor().get(parse_id(&args.id)?).await?;
        print_manifestation(&manifestation, format)
    }

    async fn approve(engine: &Engine, args: &ApproveArgs, format: OutputFormat) -> CliResult<()> {
        let manifestation = engine
            .executor()
            .approve(parse_id(&args.id)?, &args.by)
            .await?;
        if manifestation.status == ManifestStatus::Approved {
            eprintln!("Approved, but the action needs manual follow-up.");
        }
        print_manifestation(&manifestation, format)
    }

    async fn reject(engine: &Engine, args: &RejectArgs, format: OutputFormat) -> CliResult<()> {
        let manifestation = engine
            .executor()
            .reject(parse_id(&args.id)?, args.reason.as_deref())
            .await?;
        print_manifestation(&manifestation, format)
    }

    async fn expire(engine: &Engine, format: OutputFormat) -> CliResult<()> {
        let expired = engine.executor().expire_stale(Utc::now()).await?;
        match format {
            OutputFormat::Json => print_json(&serde_json::json!({ "expired": expired }))?,
            OutputFormat::Table => println!("Expired {expired} manifestations."),
        }
        Ok(())
    }
}

fn print_manifestation(m: &Manifestation, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => print_json(m)?,
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL_CONDENSED)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(["Property", "Value"]);

            table.add_row(["ID", &m.id.to_string()]);
            table.add_row(["Title", &m.title]);
            table.add_row(["Description", &m.description]);
            table.add_row(["Category", m.category.as_str()]);
            table.add_row(["Confidence", &format!("{:.2}", m.confidence)]);
            table.add_row(["Priority", &m.priority.to_string()]);
            table.add_row(["Status", m.status.as_str()]);
            table.add_row(["Action", m.proposed_action.type_name()]);
            table.add_row(["Approved By", m.approved_by.as_deref().unwrap_or("-")]);
            table.add_row(["Rejection Reason", m.rejection_reason.as_deref().unwrap_or("-")]);
            table.add_row([
                "Executed",
                &m.executed_at.map_or("-".to_string(), |t| t.to_rfc3339()),
            ]);
            table.add_row(["Created", &m.created_at.to_rfc3339()]);

            println!("{table}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lethe::config::Config;
    use lethe::dream::{ManifestCategory, ProposedAction};
    use lethe::storage::{Collection, to_record};

    async fn open_engine(dir: &tempfile::TempDir) -> Engine {
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        Engine::open(config).await.unwrap()
    }

    async fn seed(engine: &Engine) -> Manifestation {
        let m = Manifestation::new(
            ManifestCategory::Pattern,
            "Highlight recurring deploy pattern",
            "Agents keep hitting the same deploy issue",
            0.6,
            2,
            ProposedAction::HighlightPattern {
                insight_id: "insight-1".to_string(),
                pattern: "deploy".to_string(),
            },
        );
        engine
            .store()
            .upsert(Collection::Manifestations, vec![to_record(&m).unwrap()], "id")
            .await
            .unwrap();
        m
    }

    #[tokio::test]
    async fn test_approve_executes_and_reject_is_noop_after() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(&dir).await;
        let m = seed(&engine).await;

        let cmd = ManifestCommand {
            command: ManifestSubcommand::Approve(ApproveArgs {
                id: m.id.to_string(),
                by: "tester".to_string(),
            }),
        };
        cmd.execute(&engine, OutputFormat::Json).await.unwrap();

        let cmd = ManifestCommand {
            command: ManifestSubcommand::Reject(RejectArgs {
                id: m.id.to_string(),
                reason: Some("too late".to_string()),
            }),
        };
        cmd.execute(&engine, OutputFormat::Json).await.unwrap();

        let stored = engine.executor().get(m.id).await.unwrap();
        assert_eq!(stored.status, ManifestStatus::Executed);
        assert_eq!(stored.approved_by.as_deref(), Some("tester"));
        assert!(stored.rejection_reason.is_none());
    }

    #[tokio::test]
    async fn test_list_rejects_unknown_status() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(&dir).await;

        let cmd = ManifestCommand {
            command: ManifestSubcommand::List(ListArgs {
                limit: 10,
                status: Some("pending".to_string()),
            }),
        };
        assert!(cmd.execute(&engine, OutputFormat::Json).await.is_err());
    }

    #[tokio::test]
    async fn test_show_missing_id_fails() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(&dir).await;

        let cmd = ManifestCommand {
            command: ManifestSubcommand::Show(IdArgs {
                id: uuid::Uuid::new_v4().to_string(),
            }),
        };
        assert!(cmd.execute(&engine, OutputFormat::Table).await.is_err());
    }
}
