//! Manifestation execution
//!
//! Runs proposed actions, drives the manifestation state machine through the
//! store and sweeps stale proposals. Status writes are guarded on the
//! expected current status so overlapping passes never double-apply.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::dream::{DreamConfig, hours_before};
use crate::dream::types::{
    Association, AssociationAction, AssociationLogEntry, ManifestStatus, Manifestation, MemoryPair,
    ProposedAction, WeakLink, pair_key,
};
use crate::error::{LetheError, Result};
use crate::storage::record::{
    Collection, RecordFilter, RecordQuery, RecordStore, SortOrder, fetch, to_record,
};

/// Outcome of one auto-execution pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AutoExecuteReport {
    /// Proposals that cleared the gate
    pub eligible: usize,
    pub executed: Vec<Uuid>,
    pub failed: usize,
}

pub struct ManifestExecutor<'a> {
    store: &'a dyn RecordStore,
    config: DreamConfig,
}

impl<'a> ManifestExecutor<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self::with_config(store, DreamConfig::default())
    }

    pub fn with_config(store: &'a dyn RecordStore, config: DreamConfig) -> Self {
        Self { store, config }
    }

    /// Apply the proposal's action
    pub async fn execute_action(&self, manifestation: &Manifestation) -> Result<()> {
        match &manifestation.proposed_action {
            ProposedAction::CreateAssociations { pairs, strength } => {
                self.create_associations(pairs, *strength, manifestation.id).await
            }
            ProposedAction::ReinforceAssociations {
                associations,
                boost,
            } => {
                self.reinforce_associations(associations, *boost, manifestation.id)
                    .await
            }
            // Recording the pattern is the action
            ProposedAction::HighlightPattern { .. } => Ok(()),
            other => Err(LetheError::ManualExecutionRequired(
                other.type_name().to_string(),
            )),
        }
    }

    /// Link each pair that is not linked yet. Existing links keep their id,
    /// strength and history.
    async fn create_associations(
        &self,
        pairs: &[MemoryPair],
        strength: f32,
        manifestation_id: Uuid,
    ) -> Result<()> {
        let keys: Vec<String> = pairs
            .iter()
            .map(|p| pair_key(p.memory_a, p.memory_b))
            .collect();
        let existing: Vec<Association> = fetch(
            self.store,
            Collection::Associations,
            RecordQuery::new().filter(RecordFilter::new().is_in("pair_key", keys)),
        )
        .await?;
        let mut linked: HashSet<String> = existing.into_iter().map(|a| a.pair_key).collect();

        for pair in pairs {
            let association = Association::new(pair.memory_a, pair.memory_b, strength);
            if !linked.insert(association.pair_key.clone()) {
                tracing::debug!(pair = %association.pair_key, "Association already exists");
                continue;
            }
            self.store
                .insert(Collection::Associations, to_record(&association)?)
                .await?;

            let entry = AssociationLogEntry::new(
                association.id,
                AssociationAction::Create,
                None,
                association.strength,
                Some(manifestation_id),
            );
            self.store
                .insert(Collection::AssociationLog, to_record(&entry)?)
                .await?;
        }
        Ok(())
    }

    async fn reinforce_associations(
        &self,
        links: &[WeakLink],
        boost: f32,
        manifestation_id: Uuid,
    ) -> Result<()> {
        for link in links {
            let new_strength = (link.current_strength + boost).min(1.0);
            let updated = self
                .store
                .update(
                    Collection::Associations,
                    RecordFilter::new().eq("id", link.association_id.to_string()),
                    json!({ "strength": new_strength, "updated_at": Utc::now() }),
                )
                .await?;
            if updated == 0 {
                return Err(LetheError::NotFound(format!(
                    "association {}",
                    link.association_id
                )));
            }

            let entry = AssociationLogEntry::new(
                link.association_id,
                AssociationAction::Reinforce,
                Some(link.current_strength),
                new_strength,
                Some(manifestation_id),
            );
            self.store
                .insert(Collection::AssociationLog, to_record(&entry)?)
                .await?;
        }
        Ok(())
    }

    /// Execute every proposal that clears the auto-execution gate.
    ///
    /// Each proposal is claimed (`proposed` to `auto_executed`) before its
    /// action runs, so overlapping passes apply it at most once. A failed
    /// action releases the claim and leaves the proposal `proposed`.
    pub async fn auto_execute(&self, proposals: &[Manifestation]) -> AutoExecuteReport {
        let mut report = AutoExecuteReport::default();

        for proposal in proposals
            .iter()
            .filter(|p| p.is_auto_executable(self.config.auto_execute_min_confidence))
        {
            report.eligible += 1;

            let mut claimed = proposal.clone();
            if let Err(e) = claimed.mark_auto_executed(Utc::now()) {
                tracing::warn!(manifestation = %proposal.id, error = %e, "Skipping auto-execution");
                continue;
            }
            match self.commit(&claimed, ManifestStatus::Proposed).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(manifestation = %proposal.id, "Manifestation left proposed state concurrently");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(operation = "auto_execute", manifestation = %proposal.id, error = %e, "Failed to claim manifestation");
                    report.failed += 1;
                    continue;
                }
            }

            if let Err(e) = self.execute_action(&claimed).await {
                tracing::warn!(operation = "auto_execute", manifestation = %proposal.id, error = %e, "Auto-execution failed");
                report.failed += 1;
                if let Err(e) = self.commit(proposal, ManifestStatus::AutoExecuted).await {
                    tracing::error!(operation = "auto_execute", manifestation = %proposal.id, error = %e, "Failed to release claim");
                }
                continue;
            }
            report.executed.push(claimed.id);
        }

        if report.eligible > 0 {
            tracing::info!(
                eligible = report.eligible,
                executed = report.executed.len(),
                failed = report.failed,
                "Auto-execution complete"
            );
        }
        report
    }

    /// Approve a proposal and execute it immediately.
    ///
    /// Fails without changes unless the proposal is `proposed`. An execution
    /// failure leaves it `approved`.
    pub async fn approve(&self, id: Uuid, approver: &str) -> Result<Manifestation> {
        let mut manifestation = self.get(id).await?;
        manifestation.approve(approver)?;
        if !self.commit(&manifestation, ManifestStatus::Proposed).await? {
            return Err(LetheError::InvalidTransition {
                id: id.to_string(),
                from: "a concurrently changed status".to_string(),
                action: "approve",
            });
        }

        match self.execute_action(&manifestation).await {
            Ok(()) => {
                manifestation.mark_executed(Utc::now())?;
                self.commit(&manifestation, ManifestStatus::Approved).await?;
                tracing::info!(manifestation = %id, approver, "Manifestation executed");
            }
            Err(e) => {
                tracing::warn!(operation = "approve", manifestation = %id, error = %e, "Approved manifestation needs manual follow-up");
            }
        }
        Ok(manifestation)
    }

    /// Reject a proposal. Anything no longer `proposed` is returned unchanged.
    pub async fn reject(&self, id: Uuid, reason: Option<&str>) -> Result<Manifestation> {
        let mut manifestation = self.get(id).await?;
        if manifestation.reject(reason, Utc::now())
            && !self.commit(&manifestation, ManifestStatus::Proposed).await?
        {
            // Lost a race; report what is stored now
            return self.get(id).await;
        }
        Ok(manifestation)
    }

    /// Expire proposals older than the manifest TTL. Returns how many changed.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = hours_before(now, self.config.manifest_ttl_hours, "manifest_ttl_hours")?;
        let expired = self
            .store
            .update(
                Collection::Manifestations,
                RecordFilter::new()
                    .eq("status", ManifestStatus::Proposed.as_str())
                    .lt("created_at", cutoff.to_rfc3339()),
                json!({ "status": ManifestStatus::Expired.as_str(), "resolved_at": now }),
            )
            .await?;
        if expired > 0 {
            tracing::info!(expired, ttl_hours = self.config.manifest_ttl_hours, "Expired stale manifestations");
        }
        Ok(expired)
    }

    pub async fn get(&self, id: Uuid) -> Result<Manifestation> {
        let found: Vec<Manifestation> = fetch(
            self.store,
            Collection::Manifestations,
            RecordQuery::new()
                .filter(RecordFilter::new().eq("id", id.to_string()))
                .limit(1),
        )
        .await?;
        found
            .into_iter()
            .next()
            .ok_or_else(|| LetheError::NotFound(format!("manifestation {id}")))
    }

    /// Newest first, optionally restricted to one status
    pub async fn list(&self, status: Option<ManifestStatus>, limit: usize) -> Result<Vec<Manifestation>> {
        let mut filter = RecordFilter::new();
        if let Some(status) = status {
            filter = filter.eq("status", status.as_str());
        }
        fetch(
            self.store,
            Collection::Manifestations,
            RecordQuery::new()
                .filter(filter)
                .order_by("created_at", SortOrder::Desc)
                .limit(limit),
        )
        .await
    }

    /// Write the status fields of `manifestation` if the stored status is
    /// still `expected`. Returns whether a record changed.
    async fn commit(&self, manifestation: &Manifestation, expected: ManifestStatus) -> Result<bool> {
        let patch = json!({
            "status": manifestation.status,
            "approved_by": manifestation.approved_by,
            "rejection_reason": manifestation.rejection_reason,
            "executed_at": manifestation.executed_at,
            "resolved_at": manifestation.resolved_at,
        });
        let updated = self
            .store
            .update(
                Collection::Manifestations,
                RecordFilter::new()
                    .eq("id", manifestation.id.to_string())
                    .eq("status", expected.as_str()),
                patch,
            )
            .await?;
        Ok(updated > 0)
    }
}
