//! Proposal generation
//!
//! Independent analyzers over dream clusters, external insights, crystals
//! and usage analytics. Each analyzer that reads the store degrades to no
//! proposals when the read fails.

use std::collections::{BTreeMap, HashMap};

use futures::future::join_all;
use uuid::Uuid;

use crate::dream::DreamConfig;
use crate::dream::types::{
    Association, Insight, ManifestCategory, Manifestation, MemoryCluster, MemoryPair,
    PriceDirection, ProposedAction, UsageRow, Urgency, WeakLink, pair_key,
};
use crate::error::Result;
use crate::lifecycle::crystal::Crystal;
use crate::memory::keywords::KeywordExtractor;
use crate::memory::types::MemoryKind;
use crate::storage::record::{Collection, RecordFilter, RecordQuery, RecordStore, SortOrder, fetch};

/// Strength band of associations worth reinforcing
const WEAK_LINK_MIN: f32 = 0.15;
const WEAK_LINK_MAX: f32 = 0.4;
const REINFORCE_BOOST: f32 = 0.15;
const INITIAL_STRENGTH: f32 = 0.5;

pub struct ProposalGenerator<'a> {
    store: &'a dyn RecordStore,
    extractor: &'a dyn KeywordExtractor,
    config: DreamConfig,
}

impl<'a> ProposalGenerator<'a> {
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

    /// Run every analyzer and stamp the results with `session_id`
    pub async fn generate(
        &self,
        clusters: &[MemoryCluster],
        insights: &[Insight],
        session_id: Uuid,
    ) -> Vec<Manifestation> {
        let mut proposals = Vec::new();

        let association_runs = join_all(
            clusters
                .iter()
                .filter(|c| c.members.len() >= 3)
                .map(|c| self.association_proposals(c)),
        )
        .await;
        proposals.extend(association_runs.into_iter().flatten());

        proposals.extend(clusters.iter().filter_map(error_pattern_proposal));
        proposals.extend(insights.iter().filter_map(correction_proposal));
        proposals.extend(clusters.iter().filter_map(|c| self.meeting_proposal(c)));
        proposals.extend(self.fusion_proposals().await);
        proposals.extend(insights.iter().filter_map(|i| self.insight_proposal(i)));
        proposals.extend(self.pricing_proposals().await);

        for proposal in &mut proposals {
            proposal.session_id = Some(session_id);
        }

        tracing::debug!(
            session = %session_id,
            clusters = clusters.len(),
            insights = insights.len(),
            proposals = proposals.len(),
            "Generated proposals"
        );

        proposals
    }

    async fn association_proposals(&self, cluster: &MemoryCluster) -> Vec<Manifestation> {
        let ids: Vec<Uuid> = cluster
            .members
            .iter()
            .take(self.config.association_sample)
            .map(|m| m.id)
            .collect();

        let existing = match self.existing_associations(&ids).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::warn!(operation = "association_analysis", keyword = %cluster.keyword, error = %e, "Skipping association analysis");
                return Vec::new();
            }
        };

        let mut missing = Vec::new();
        let mut weak = Vec::new();
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                match existing.get(&pair_key(*a, *b)) {
                    None => missing.push(MemoryPair {
                        memory_a: *a,
                        memory_b: *b,
                    }),
                    Some(link) if (WEAK_LINK_MIN..WEAK_LINK_MAX).contains(&link.strength) => {
                        weak.push(WeakLink {
                            association_id: link.id,
                            current_strength: link.strength,
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        let mut proposals = Vec::new();
        if missing.len() >= 2 {
            let count = missing.len();
            proposals.push(
                Manifestation::new(
                    ManifestCategory::Association,
                    format!("Link {count} related memories around '{}'", cluster.keyword),
                    format!(
                        "{count} memory pairs in the '{}' cluster share keywords but have no association.",
                        cluster.keyword
                    ),
                    (0.5 + 0.1 * count as f32).min(0.9),
                    (1 + count / 2).min(4) as u8,
                    ProposedAction::CreateAssociations {
                        pairs: missing,
                        strength: INITIAL_STRENGTH,
                    },
                )
                .with_memories(ids.clone()),
            );
        }
        if weak.len() >= 2 {
            proposals.push(
                Manifestation::new(
                    ManifestCategory::Association,
                    format!("Reinforce {} weak links around '{}'", weak.len(), cluster.keyword),
                    format!(
                        "{} associations in the '{}' cluster sit below strength {WEAK_LINK_MAX}.",
                        weak.len(),
                        cluster.keyword
                    ),
                    0.75,
                    2,
                    ProposedAction::ReinforceAssociations {
                        associations: weak,
                        boost: REINFORCE_BOOST,
                    },
                )
                .with_memories(ids),
            );
        }
        proposals
    }

    /// Associations among `ids`, keyed by pair
    async fn existing_associations(&self, ids: &[Uuid]) -> Result<HashMap<String, Association>> {
        let keys: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        let associations: Vec<Association> = fetch(
            self.store,
            Collection::Associations,
            RecordQuery::new().filter(
                RecordFilter::new()
                    .is_in("memory_a", keys.clone())
                    .is_in("memory_b", keys),
            ),
        )
        .await?;
        Ok(associations
            .into_iter()
            .map(|a| (pair_key(a.memory_a, a.memory_b), a))
            .collect())
    }

    fn meeting_proposal(&self, cluster: &MemoryCluster) -> Option<Manifestation> {
        let agents: Vec<String> = cluster
            .agents
            .iter()
            .filter(|a| {
                **a != self.config.shared_agent && !self.config.infrastructure_agents.contains(a)
            })
            .cloned()
            .collect();
        if agents.len() < 2 || cluster.members.len() < 4 {
            return None;
        }

        let urgency = if cluster.members.len() > 8 {
            Urgency::High
        } else {
            Urgency::Normal
        };
        let count = agents.len();
        Some(
            Manifestation::new(
                ManifestCategory::Meeting,
                format!("{count} agents are working on '{}'", cluster.keyword),
                format!(
                    "{} independently recorded {} memories about '{}'.",
                    agents.join(", "),
                    cluster.members.len(),
                    cluster.keyword
                ),
                (0.4 + 0.15 * count as f32).min(0.85),
                (1 + count).min(4) as u8,
                ProposedAction::TriggerMeeting {
                    agents,
                    keywords: cluster.keywords.clone(),
                    urgency,
                },
            )
            .with_memories(cluster.member_ids()),
        )
    }

    async fn fusion_proposals(&self) -> Vec<Manifestation> {
        let crystals: Vec<Crystal> = match fetch(
            self.store,
            Collection::Crystals,
            RecordQuery::new()
                .filter(RecordFilter::new().eq("fused", false))
                .order_by("star", SortOrder::Desc)
                .limit(self.config.fusion_scan_limit),
        )
        .await
        {
            Ok(crystals) => crystals,
            Err(e) => {
                tracing::warn!(operation = "fusion_analysis", error = %e, "Skipping fusion analysis");
                return Vec::new();
            }
        };

        // Star order is preserved within each class
        let mut by_class: BTreeMap<&str, Vec<&Crystal>> = BTreeMap::new();
        for crystal in &crystals {
            by_class.entry(crystal.class.as_str()).or_default().push(crystal);
        }

        let mut proposals = Vec::new();
        for (class, members) in &by_class {
            if members.len() < 2 {
                continue;
            }
            let (a, b) = (members[0], members[1]);
            proposals.push(Manifestation::new(
                ManifestCategory::Fusion,
                format!("Fuse {} and {}", a.name, b.name),
                format!("Two unfused {class} crystals can be fused into a stronger one."),
                0.7,
                2,
                ProposedAction::FuseCrystals {
                    crystal_ids: vec![a.id, b.id],
                    cross_class: false,
                },
            ));
        }

        if by_class.len() >= 2 {
            let mut leaders: Vec<&Crystal> = by_class.values().map(|members| members[0]).collect();
            leaders.sort_by(|a, b| b.star.cmp(&a.star));
            let (a, b) = (leaders[0], leaders[1]);
            proposals.push(Manifestation::new(
                ManifestCategory::Fusion,
                format!("Cross-fuse {} ({}) with {} ({})", a.name, a.class, b.name, b.class),
                "Fusing across classes is riskier but can yield a rarer crystal.",
                0.5,
                3,
                ProposedAction::FuseCrystals {
                    crystal_ids: vec![a.id, b.id],
                    cross_class: true,
                },
            ));
        }

        proposals
    }

    fn insight_proposal(&self, insight: &Insight) -> Option<Manifestation> {
        match insight.category.as_str() {
            "pattern" if insight.confidence >= 0.6 => Some(
                Manifestation::new(
                    ManifestCategory::Pattern,
                    format!("Pattern: {}", headline(&insight.insight)),
                    insight.insight.clone(),
                    insight.confidence,
                    2,
                    ProposedAction::HighlightPattern {
                        insight_id: insight.id.clone(),
                        pattern: insight.insight.clone(),
                    },
                )
                .with_memories(parse_ids(&insight.source_memory_ids))
                .with_insights(vec![insight.id.clone()]),
            ),
            "summary" if insight.confidence >= 0.5 => {
                let keywords = self.extractor.extract(&insight.insight);
                if keywords.len() < 3 {
                    return None;
                }
                Some(
                    Manifestation::new(
                        ManifestCategory::Skill,
                        format!("Skill candidate: {}", keywords[..3].join(", ")),
                        insight.insight.clone(),
                        insight.confidence.min(0.7),
                        2,
                        ProposedAction::SuggestSkill {
                            insight_id: insight.id.clone(),
                            keywords: keywords.into_iter().take(5).collect(),
                        },
                    )
                    .with_memories(parse_ids(&insight.source_memory_ids))
                    .with_insights(vec![insight.id.clone()]),
                )
            }
            _ => None,
        }
    }

    async fn pricing_proposals(&self) -> Vec<Manifestation> {
        let rows: Vec<UsageRow> =
            match fetch(self.store, Collection::UsageAnalytics, RecordQuery::new()).await {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::debug!(operation = "pricing_analysis", error = %e, "Usage analytics unavailable");
                    return Vec::new();
                }
            };
        pricing_signals(&rows)
    }
}

fn error_pattern_proposal(cluster: &MemoryCluster) -> Option<Manifestation> {
    let errors: Vec<Uuid> = cluster
        .members
        .iter()
        .filter(|m| m.kind == MemoryKind::Error)
        .map(|m| m.id)
        .collect();
    let count = errors.len();
    if count < 3 || count * 2 <= cluster.members.len() {
        return None;
    }

    Some(
        Manifestation::new(
            ManifestCategory::Correction,
            format!("Recurring errors around '{}'", cluster.keyword),
            format!(
                "{count} of {} memories about '{}' are errors.",
                cluster.members.len(),
                cluster.keyword
            ),
            (0.5 + 0.1 * count as f32).min(0.95),
            (2 + count / 2).min(5) as u8,
            ProposedAction::FlagErrorPattern {
                memory_ids: errors.clone(),
                keywords: cluster.keywords.clone(),
                error_count: count,
            },
        )
        .with_memories(errors),
    )
}

fn correction_proposal(insight: &Insight) -> Option<Manifestation> {
    if insight.category != "correction" || insight.confidence < 0.6 {
        return None;
    }
    Some(
        Manifestation::new(
            ManifestCategory::Correction,
            format!("Correction: {}", headline(&insight.insight)),
            insight.insight.clone(),
            insight.confidence,
            4,
            ProposedAction::ApplyCorrection {
                insight_id: insight.id.clone(),
                correction: insight.insight.clone(),
            },
        )
        .with_memories(parse_ids(&insight.source_memory_ids))
        .with_insights(vec![insight.id.clone()]),
    )
}

/// Price review proposals from usage rows grouped by endpoint
pub fn pricing_signals(rows: &[UsageRow]) -> Vec<Manifestation> {
    let mut by_endpoint: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    for row in rows {
        let entry = by_endpoint.entry(row.endpoint.as_str()).or_default();
        entry.0 += 1;
        entry.1 += row.revenue;
    }

    by_endpoint
        .into_iter()
        .filter_map(|(endpoint, (calls, revenue))| {
            let avg_revenue = revenue / calls as f64;
            let (direction, confidence, priority, reason) = if calls >= 10 && avg_revenue < 0.03 {
                (PriceDirection::Increase, 0.6, 2, "is popular but earns little per call")
            } else if calls <= 3 && avg_revenue > 0.2 {
                (PriceDirection::Decrease, 0.5, 1, "is rarely used and may be overpriced")
            } else {
                return None;
            };
            Some(Manifestation::new(
                ManifestCategory::Pricing,
                format!("Review pricing of {endpoint}"),
                format!("{endpoint} {reason} ({calls} calls, {avg_revenue:.4} average revenue)."),
                confidence,
                priority,
                ProposedAction::ReviewPricing {
                    endpoint: endpoint.to_string(),
                    direction,
                    calls,
                    avg_revenue,
                },
            ))
        })
        .collect()
}

fn parse_ids(ids: &[String]) -> Vec<Uuid> {
    ids.iter().filter_map(|id| Uuid::parse_str(id).ok()).collect()
}

fn headline(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default().trim();
    if line.chars().count() > 60 {
        format!("{}...", line.chars().take(60).collect::<String>())
    } else {
        line.to_string()
    }
}
