//! Keyword-overlap clustering of reforge candidates
//!
//! Greedy single pass over the lowest-scoring live memories: each unassigned
//! candidate seeds a group and pulls in nearby candidates that share enough
//! keywords with it.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::lifecycle::ReforgeConfig;
use crate::memory::keywords::KeywordExtractor;
use crate::memory::types::{DecayEntry, Memory};
use crate::storage::record::{Collection, RecordFilter, RecordQuery, RecordStore, SortOrder, fetch};

/// Keyword sample carried by each target
const KEYWORD_SAMPLE: usize = 8;

/// A group of related stale memories that qualifies for reforging
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReforgeTarget {
    pub memory_ids: Vec<Uuid>,
    /// Seed keywords shared with at least one other member
    pub keywords: Vec<String>,
    pub member_count: usize,
    pub mean_decay: f32,
}

struct Candidate {
    memory_id: Uuid,
    score: f32,
    keywords: Vec<String>,
    keyword_set: HashSet<String>,
}

pub struct ClusterBuilder<'a> {
    store: &'a dyn RecordStore,
    extractor: &'a dyn KeywordExtractor,
    config: ReforgeConfig,
}

impl<'a> ClusterBuilder<'a> {
    pub fn new(store: &'a dyn RecordStore, extractor: &'a dyn KeywordExtractor) -> Self {
        Self::with_config(store, extractor, ReforgeConfig::default())
    }

    pub fn with_config(
        store: &'a dyn RecordStore,
        extractor: &'a dyn KeywordExtractor,
        config: ReforgeConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            config,
        }
    }

    /// Current reforge targets, ordered by ascending mean decay
    pub async fn build(&self) -> Result<Vec<ReforgeTarget>> {
        let entries: Vec<DecayEntry> = fetch(
            self.store,
            Collection::DecayEntries,
            RecordQuery::new()
                .filter(
                    RecordFilter::new()
                        .eq("is_archived", false)
                        .gte("decay_score", self.config.candidate_floor)
                        .lt("decay_score", self.config.candidate_ceiling),
                )
                .order_by("decay_score", SortOrder::Asc)
                .limit(self.config.candidate_limit),
        )
        .await?;

        if entries.len() < self.config.min_sources {
            tracing::debug!(candidates = entries.len(), "Too few reforge candidates");
            return Ok(Vec::new());
        }

        let ids: Vec<String> = entries.iter().map(|e| e.memory_id.to_string()).collect();
        let memories: Vec<Memory> = fetch(
            self.store,
            Collection::Memories,
            RecordQuery::new().filter(RecordFilter::new().is_in("id", ids)),
        )
        .await?;
        let memories: HashMap<Uuid, Memory> = memories.into_iter().map(|m| (m.id, m)).collect();

        let candidates: Vec<Candidate> = entries
            .iter()
            .filter_map(|entry| {
                let memory = memories.get(&entry.memory_id)?;
                if memory.is_anchored() {
                    return None;
                }
                let keywords = self.extractor.extract(&memory.content);
                if keywords.len() < 2 {
                    return None;
                }
                Some(Candidate {
                    memory_id: entry.memory_id,
                    score: entry.decay_score,
                    keyword_set: keywords.iter().cloned().collect(),
                    keywords,
                })
            })
            .collect();

        Ok(self.group(&candidates))
    }

    fn group(&self, candidates: &[Candidate]) -> Vec<ReforgeTarget> {
        let mut assigned = vec![false; candidates.len()];
        let mut targets = Vec::new();

        for seed_idx in 0..candidates.len() {
            if assigned[seed_idx] {
                continue;
            }
            assigned[seed_idx] = true;
            let seed = &candidates[seed_idx];
            let mut members = vec![seed_idx];

            let window: Vec<usize> = (seed_idx + 1..candidates.len())
                .filter(|&j| !assigned[j])
                .take(self.config.scan_window)
                .collect();

            for j in window {
                let overlap = candidates[j]
                    .keyword_set
                    .intersection(&seed.keyword_set)
                    .count();
                if overlap >= self.config.min_overlap {
                    assigned[j] = true;
                    members.push(j);
                }
            }

            if members.len() < self.config.min_sources {
                continue;
            }

            let shared: Vec<String> = seed
                .keywords
                .iter()
                .filter(|k| {
                    members[1..]
                        .iter()
                        .any(|&m| candidates[m].keyword_set.contains(*k))
                })
                .take(KEYWORD_SAMPLE)
                .cloned()
                .collect();

            let mean_decay =
                members.iter().map(|&m| candidates[m].score).sum::<f32>() / members.len() as f32;

            targets.push(ReforgeTarget {
                memory_ids: members.iter().map(|&m| candidates[m].memory_id).collect(),
                keywords: shared,
                member_count: members.len(),
                mean_decay,
            });
        }

        targets.sort_by(|a, b| a.mean_decay.total_cmp(&b.mean_decay));
        targets
    }
}
