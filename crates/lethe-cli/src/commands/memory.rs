use std::collections::HashMap;

use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use lethe::engine::Engine;
use lethe::lifecycle::record_access;
use lethe::memory::{DecayEntry, Memory, MemoryKind};
use lethe::storage::{Collection, RecordFilter, RecordQuery, SortOrder, fetch, to_record};
use uuid::Uuid;

use crate::error::{CliResult, parse_id};
use crate::output::{OutputFormat, format_timestamp, print_json, truncate_string};

#[derive(Parser)]
pub struct MemoryCommand {
    #[clap(subcommand)]
    pub command: MemorySubcommand,
}

#[derive(Subcommand)]
pub enum MemorySubcommand {
    #[clap(about = "List memories with their decay state")]
    List(ListArgs),

    #[clap(about = "Show memory details")]
    Show(ShowArgs),

    #[clap(about = "Manually add a memory")]
    Add(AddArgs),

    #[clap(about = "Record that a memory was read into context")]
    Touch(ShowArgs),
}

#[derive(Parser)]
pub struct ListArgs {
    #[clap(
        long,
        short,
        default_value = "20",
        help = "Maximum number of memories to display"
    )]
    pub limit: usize,

    #[clap(long, short, help = "Filter by agent id")]
    pub agent: Option<String>,

    #[clap(long, short, help = "Filter by kind (goal, fact, outcome, observation, note, error)")]
    pub kind: Option<String>,

    #[clap(long, help = "Show only archived memories")]
    pub archived: bool,
}

#[derive(Parser)]
pub struct ShowArgs {
    #[clap(help = "Memory ID (UUID format)")]
    pub id: String,
}

#[derive(Parser)]
pub struct AddArgs {
    #[clap(help = "Memory content text")]
    pub text: String,

    #[clap(long, default_value = "operator", help = "Agent recording the memory")]
    pub agent: String,

    #[clap(long, default_value = "note", help = "Memory kind")]
    pub kind: String,

    #[clap(long, help = "Pin the memory as an anchor")]
    pub anchor: bool,
}

impl MemoryCommand {
    pub async fn execute(&self, engine: &Engine, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            MemorySubcommand::List(args) => Self::list(engine, args, format).await,
            MemorySubcommand::Show(args) => Self::show(engine, args, format).await,
            MemorySubcommand::Add(args) => Self::add(engine, args, format).await,
            MemorySubcommand::Touch(args) => Self::touch(engine, args, format).await,
        }
    }

    async fn list(engine: &Engine, args: &ListArgs, format: OutputFormat) -> CliResult<()> {
        let mut filter = RecordFilter::new();
        if let Some(agent) = &args.agent {
            filter = filter.eq("agent_id", agent.as_str());
        }
        if let Some(kind) = &args.kind {
            filter = filter.eq("kind", MemoryKind::from(kind.as_str()).as_str());
        }

        let memories: Vec<Memory> = fetch(
            engine.store(),
            Collection::Memories,
            RecordQuery::new()
                .filter(filter)
                .order_by("created_at", SortOrder::Desc),
        )
        .await?;
        let entries = load_entries(engine, &memories).await?;

        let rows: Vec<(&Memory, Option<&DecayEntry>)> = memories
            .iter()
            .map(|m| (m, entries.get(&m.id)))
            .filter(|(_, e)| !args.archived || e.is_some_and(|e| e.is_archived))
            .take(args.limit)
            .collect();

        match format {
            OutputFormat::Json => {
                let output: Vec<_> = rows
                    .iter()
                    .map(|(m, e)| {
                        serde_json::json!({
                            "id": m.id.to_string(),
                            "agent_id": &m.agent_id,
                            "kind": m.kind.as_str(),
                            "content": &m.content,
                            "source": &m.source,
                            "created_at": m.created_at.to_rfc3339(),
                            "decay_score": e.map(|e| e.decay_score),
                            "access_count": e.map_or(0, |e| e.access_count),
                            "is_archived": e.is_some_and(|e| e.is_archived),
                        })
                    })
                    .collect();
                print_json(&output)?;
            }
            OutputFormat::Table => {
                if rows.is_empty() {
                    println!("No memories found.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["ID", "Agent", "Kind", "Content", "Score", "Archived", "Created"]);

                for (memory, entry) in &rows {
                    table.add_row([
                        truncate_string(&memory.id.to_string(), 8),
                        memory.agent_id.clone(),
                        memory.kind.to_string(),
                        truncate_string(&memory.content, 50),
                        entry.map_or("-".to_string(), |e| format!("{:.3}", e.decay_score)),
                        if entry.is_some_and(|e| e.is_archived) { "yes" } else { "" }.to_string(),
                        format_timestamp(&memory.created_at),
                    ]);
                }

                println!("{table}");
                println!("\nTotal: {} memories", rows.len());
            }
        }

        Ok(())
    }

    async fn show(engine: &Engine, args: &ShowArgs, format: OutputFormat) -> CliResult<()> {
        let id = parse_id(&args.id)?;
        let memory = get_memory(engine, id).await?;
        let entry = load_entries(engine, std::slice::from_ref(&memory))
            .await?
            .remove(&id)
            .unwrap_or_else(|| DecayEntry::fresh(id));

        match format {
            OutputFormat::Json => {
                print_json(&serde_json::json!({ "memory": memory, "decay": entry }))?;
            }
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Property", "Value"]);

                table.add_row(["ID", &memory.id.to_string()]);
                table.add_row(["Agent", &memory.agent_id]);
                table.add_row(["Kind", memory.kind.as_str()]);
                table.add_row(["Content", &memory.content]);
                table.add_row(["Source", &memory.source]);
                table.add_row(["Created", &memory.created_at.to_rfc3339()]);
                table.add_row(["Decay Score", &format!("{:.3}", entry.decay_score)]);
                table.add_row(["Access Count", &entry.access_count.to_string()]);
                table.add_row(["Archived", &entry.is_archived.to_string()]);
                table.add_row(["Archive Reason", entry.archive_reason.as_deref().unwrap_or("-")]);

                println!("{table}");
            }
        }

        Ok(())
    }

    async fn add(engine: &Engine, args: &AddArgs, format: OutputFormat) -> CliResult<()> {
        let mut memory = Memory::new(
            args.agent.clone(),
            MemoryKind::from(args.kind.as_str()),
            args.text.clone(),
        );
        if args.anchor {
            memory = memory.anchored();
        }

        engine
            .store()
            .insert(Collection::Memories, to_record(&memory)?)
            .await?;

        match format {
            OutputFormat::Json => {
                print_json(&serde_json::json!({ "id": memory.id.to_string(), "created": true }))?;
            }
            OutputFormat::Table => {
                println!("Memory created successfully.");
                println!("ID: {}", memory.id);
            }
        }

        Ok(())
    }

    async fn touch(engine: &Engine, args: &ShowArgs, format: OutputFormat) -> CliResult<()> {
        let id = parse_id(&args.id)?;
        get_memory(engine, id).await?;
        let entry = record_access(engine.store(), id).await?;

        match format {
            OutputFormat::Json => print_json(&entry)?,
            OutputFormat::Table => {
                println!("Memory {} accessed {} times.", id, entry.access_count);
            }
        }

        Ok(())
    }
}

async fn get_memory(engine: &Engine, id: Uuid) -> CliResult<Memory> {
    let found: Vec<Memory> = fetch(
        engine.store(),
        Collection::Memories,
        RecordQuery::new()
            .filter(RecordFilter::new().eq("id", id.to_string()))
            .limit(1),
    )
    .await?;
    found
        .into_iter()
        .next()
        .ok_or_else(|| format!("Memory not found: {id}").into())
}

async fn load_entries(engine: &Engine, memories: &[Memory]) -> CliResult<HashMap<Uuid, DecayEntry>> {
    if memories.is_empty() {
        return Ok(HashMap::new());
    }
    let ids: Vec<String> = memories.iter().map(|m| m.id.to_string()).collect();
    let entries: Vec<DecayEntry> = fetch(
        engine.store(),
        Collection::DecayEntries,
        RecordQuery::new().filter(RecordFilter::new().is_in("memory_id", ids)),
    )
    .await?;
    Ok(entries.into_iter().map(|e| (e.memory_id, e)).collect())
}
