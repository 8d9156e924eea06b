use std::collections::BTreeMap;

use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use lethe::engine::Engine;
use lethe::storage::{Collection, RecordFilter, RecordQuery};
use serde::Serialize;

use crate::error::CliResult;
use crate::output::{OutputFormat, print_json};

#[derive(Parser)]
pub struct StatsCommand {
    #[clap(long, help = "Include empty collections")]
    pub all: bool,
}

#[derive(Serialize)]
struct StoreStats {
    collections: BTreeMap<&'static str, usize>,
    archived_memories: usize,
    manifestations_by_status: BTreeMap<String, usize>,
}

impl StatsCommand {
    pub async fn execute(&self, engine: &Engine, format: OutputFormat) -> CliResult<()> {
        let store = engine.store();

        let mut collections = BTreeMap::new();
        for collection in Collection::ALL {
            let count = store.query(collection, RecordQuery::new()).await?.len();
            if count > 0 || self.all {
                collections.insert(collection.name(), count);
            }
        }

        let archived_memories = store
            .query(
                Collection::DecayEntries,
                RecordQuery::new().filter(RecordFilter::new().eq("is_archived", true)),
            )
            .await?
            .len();

        let mut manifestations_by_status = BTreeMap::new();
        for record in store.query(Collection::Manifestations, RecordQuery::new()).await? {
            let status = record
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or("unknown")
                .to_string();
            *manifestations_by_status.entry(status).or_insert(0) += 1;
        }

        let stats = StoreStats {
            collections,
            archived_memories,
            manifestations_by_status,
        };

        match format {
            OutputFormat::Json => print_json(&stats)?,
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Collection", "Records"]);

                for (name, count) in &stats.collections {
                    table.add_row([name.to_string(), count.to_string()]);
                }
                println!("{table}");

                println!("\nArchived memories: {}", stats.archived_memories);

                if !stats.manifestations_by_status.is_empty() {
                    let mut table = Table::new();
                    table
                        .load_preset(UTF8_FULL_CONDENSED)
                        .set_content_arrangement(ContentArrangement::Dynamic)
                        .set_header(["Manifest Status", "Count"]);

                    for (status, count) in &stats.manifestations_by_status {
                        table.add_row([status.clone(), count.to_string()]);
                    }
                    println!("\n{table}");
                }
            }
        }

        Ok(())
    }
}
