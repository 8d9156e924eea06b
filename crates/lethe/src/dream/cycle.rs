//! Dream cycle orchestration
//!
//! One session: scan recent live memories, group them by shared keyword,
//! load recent insights, generate and persist proposals, then auto-execute.
//! The session record is closed exactly once, `completed` or `interrupted`.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::dream::{DreamConfig, hours_before};
use crate::dream::executor::ManifestExecutor;
use crate::dream::generator::ProposalGenerator;
use crate::dream::types::{
    DreamSession, DreamTrigger, Insight, Manifestation, MemoryCluster, SessionStatus,
};
use crate::error::Result;
use crate::memory::keywords::KeywordExtractor;
use crate::memory::types::{DecayEntry, Memory};
use crate::storage::record::{
    Collection, RecordFilter, RecordQuery, RecordStore, SortOrder, fetch, to_record,
};

/// Keywords kept on each analysis cluster
const CLUSTER_KEYWORDS: usize = 5;

/// Summary of one dream session
#[derive(Debug, Clone, Serialize)]
pub struct DreamReport {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub memories_scanned: usize,
    pub clusters_found: usize,
    pub insights_loaded: usize,
    pub proposals: Vec<Manifestation>,
    pub auto_executed: Vec<Uuid>,
    /// Set when the session was interrupted
    pub error: Option<String>,
}

pub struct DreamCycle<'a> {
    store: &'a dyn RecordStore,
    extractor: &'a dyn KeywordExtractor,
    config: DreamConfig,
}

impl<'a> DreamCycle<'a> {
    pub fn new(store: &'a dyn RecordStore, extractor: &'a dyn KeywordExtractor) -> Self {
        Self::with_config(store, extractor, DreamConfig::default())
    }

    pub fn with_config(
        store: &'a dyn RecordStore,
        extractor: &'a dyn KeywordExtractor,
        config: DreamConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            config,
        }
    }

    /// Run one dream session.
    ///
    /// Errors only when the session record itself cannot be created; any
    /// later failure closes the session as `interrupted`.
    pub async fn run(&self, trigger: DreamTrigger, fleet_idle_hours: Option<f64>) -> Result<DreamReport> {
        let mut session = DreamSession::start(trigger, fleet_idle_hours);
        self.store
            .insert(Collection::DreamSessions, to_record(&session)?)
            .await?;
        tracing::info!(session = %session.id, ?trigger, "Dream session started");

        let mut report = DreamReport {
            session_id: session.id,
            status: SessionStatus::Dreaming,
            memories_scanned: 0,
            clusters_found: 0,
            insights_loaded: 0,
            proposals: Vec::new(),
            auto_executed: Vec::new(),
            error: None,
        };

        let outcome = self.analyze(&session, &mut report).await;
        session.status = match &outcome {
            Ok(()) => SessionStatus::Completed,
            Err(e) => {
                tracing::warn!(session = %session.id, error = %e, "Dream session interrupted");
                report.error = Some(e.to_string());
                SessionStatus::Interrupted
            }
        };
        session.ended_at = Some(Utc::now());
        session.memories_scanned = report.memories_scanned;
        session.clusters_found = report.clusters_found;
        session.insights_generated = report.insights_loaded;
        session.proposals_created = report.proposals.len();
        session.auto_executed = report.auto_executed.len();
        report.status = session.status;

        let close = self
            .store
            .update(
                Collection::DreamSessions,
                RecordFilter::new()
                    .eq("id", session.id.to_string())
                    .eq("status", "dreaming"),
                json!({
                    "status": session.status,
                    "ended_at": session.ended_at,
                    "memories_scanned": session.memories_scanned,
                    "clusters_found": session.clusters_found,
                    "insights_generated": session.insights_generated,
                    "proposals_created": session.proposals_created,
                    "auto_executed": session.auto_executed,
                }),
            )
            .await;
        if let Err(e) = close {
            tracing::warn!(session = %session.id, error = %e, "Failed to close dream session");
        }

        tracing::info!(
            session = %session.id,
            status = ?session.status,
            memories = session.memories_scanned,
            clusters = session.clusters_found,
            proposals = session.proposals_created,
            auto_executed = session.auto_executed,
            "Dream session finished"
        );

        Ok(report)
    }

    async fn analyze(&self, session: &DreamSession, report: &mut DreamReport) -> Result<()> {
        let memories = self.live_memories().await?;
        report.memories_scanned = memories.len();

        let clusters = build_analysis_clusters(memories, self.extractor, self.config.min_cluster_size);
        report.clusters_found = clusters.len();

        let insights = self.recent_insights().await?;
        report.insights_loaded = insights.len();

        let generator = ProposalGenerator::with_config(self.store, self.extractor, self.config.clone());
        let proposals = generator.generate(&clusters, &insights, session.id).await;

        if !proposals.is_empty() {
            let records = proposals.iter().map(to_record).collect::<Result<Vec<_>>>()?;
            self.store
                .upsert(Collection::Manifestations, records, "id")
                .await?;
        }
        report.proposals = proposals;

        let executor = ManifestExecutor::with_config(self.store, self.config.clone());
        let executed = executor.auto_execute(&report.proposals).await;
        report.auto_executed = executed.executed;

        Ok(())
    }

    /// Most recent memories whose decay entry is not archived
    async fn live_memories(&self) -> Result<Vec<Memory>> {
        let memories: Vec<Memory> = fetch(
            self.store,
            Collection::Memories,
            RecordQuery::new()
                .order_by("created_at", SortOrder::Desc)
                .limit(self.config.memory_scan_limit),
        )
        .await?;
        if memories.is_empty() {
            return Ok(memories);
        }

        let ids: Vec<String> = memories.iter().map(|m| m.id.to_string()).collect();
        let archived: Vec<DecayEntry> = fetch(
            self.store,
            Collection::DecayEntries,
            RecordQuery::new().filter(
                RecordFilter::new()
                    .is_in("memory_id", ids)
                    .eq("is_archived", true),
            ),
        )
        .await?;
        let archived: HashSet<Uuid> = archived.into_iter().map(|e| e.memory_id).collect();

        Ok(memories
            .into_iter()
            .filter(|m| !archived.contains(&m.id))
            .collect())
    }

    /// Insights inside the lookback window that no manifestation cites yet
    async fn recent_insights(&self) -> Result<Vec<Insight>> {
        let since = hours_before(
            Utc::now(),
            self.config.insight_lookback_hours,
            "insight_lookback_hours",
        )?;
        let window = RecordFilter::new().gte("created_at", since.to_rfc3339());

        let insights: Vec<Insight> = match fetch(
            self.store,
            Collection::Insights,
            RecordQuery::new()
                .filter(window.clone())
                .order_by("created_at", SortOrder::Desc),
        )
        .await
        {
            Ok(insights) => insights,
            Err(e) => {
                tracing::warn!(operation = "load_insights", error = %e, "Continuing without insights");
                return Ok(Vec::new());
            }
        };
        if insights.is_empty() {
            return Ok(insights);
        }

        // A manifestation citing an insight is never older than the insight
        let cited: Vec<Manifestation> =
            match fetch(self.store, Collection::Manifestations, RecordQuery::new().filter(window)).await {
                Ok(cited) => cited,
                Err(e) => {
                    tracing::warn!(operation = "load_insights", error = %e, "Continuing without insights");
                    return Ok(Vec::new());
                }
            };
        let cited: HashSet<String> = cited
            .into_iter()
            .flat_map(|m| m.source_insight_ids)
            .collect();

        let before = insights.len();
        let fresh: Vec<Insight> = insights
            .into_iter()
            .filter(|i| !cited.contains(&i.id))
            .collect();
        if fresh.len() < before {
            tracing::debug!(skipped = before - fresh.len(), "Skipping insights already proposed");
        }
        Ok(fresh)
    }
}

/// Group memories by shared keyword.
///
/// Keywords are visited from most to least common (ties alphabetical); each
/// memory joins at most one cluster, and clusters below `min_size` are dropped.
pub fn build_analysis_clusters(
    memories: Vec<Memory>,
    extractor: &dyn KeywordExtractor,
    min_size: usize,
) -> Vec<MemoryCluster> {
    let keywords: Vec<Vec<String>> = memories.iter().map(|m| extractor.extract(&m.content)).collect();

    let mut index: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, words) in keywords.iter().enumerate() {
        for word in words {
            index.entry(word.as_str()).or_default().push(i);
        }
    }

    let mut order: Vec<(&str, usize)> = index.iter().map(|(k, v)| (*k, v.len())).collect();
    order.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let mut used = vec![false; memories.len()];
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    for (keyword, size) in order {
        if size < min_size {
            break;
        }
        let members: Vec<usize> = index[keyword].iter().copied().filter(|&i| !used[i]).collect();
        if members.len() < min_size {
            continue;
        }
        for &i in &members {
            used[i] = true;
        }
        groups.push((keyword.to_string(), members));
    }

    groups
        .into_iter()
        .map(|(keyword, members)| {
            let shared = shared_keywords(&keyword, &members, &keywords);
            let members: Vec<Memory> = members.iter().map(|&i| memories[i].clone()).collect();
            let mut agents: Vec<String> = Vec::new();
            for memory in &members {
                if !agents.contains(&memory.agent_id) {
                    agents.push(memory.agent_id.clone());
                }
            }
            MemoryCluster {
                keyword,
                keywords: shared,
                members,
                agents,
            }
        })
        .collect()
}

/// `keyword` followed by the other keywords found in at least two members
fn shared_keywords(keyword: &str, members: &[usize], keywords: &[Vec<String>]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for &i in members {
        for word in &keywords[i] {
            if word != keyword {
                *counts.entry(word.as_str()).or_default() += 1;
            }
        }
    }
    let mut common: Vec<(&str, usize)> = counts.into_iter().filter(|(_, n)| *n >= 2).collect();
    common.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    std::iter::once(keyword.to_string())
        .chain(common.into_iter().map(|(w, _)| w.to_string()))
        .take(CLUSTER_KEYWORDS)
        .collect()
}
