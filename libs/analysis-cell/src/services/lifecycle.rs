// libs/analysis-cell/src/services/lifecycle.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AnalysisError;
use crate::models::{AnalysisOccurrence, AnalysisStatus, AuditLogEntry};
use crate::services::audit::AuditService;
use crate::store::AnalysisStore;

/// Status transitions of a single analysis occurrence. Archival happens
/// only through the archival job, never here.
pub struct OccurrenceLifecycleService {
    store: Arc<dyn AnalysisStore>,
    audit: AuditService,
}

impl OccurrenceLifecycleService {
    pub fn new(store: Arc<dyn AnalysisStore>) -> Self {
        Self {
            audit: AuditService::new(store.clone()),
            store,
        }
    }

    pub fn validate_status_transition(
        current_status: AnalysisStatus,
        new_status: AnalysisStatus,
    ) -> Result<(), AnalysisError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !Self::get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AnalysisError::InvalidStatusTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    pub fn get_valid_transitions(current_status: AnalysisStatus) -> Vec<AnalysisStatus> {
        match current_status {
            AnalysisStatus::Scheduled => vec![AnalysisStatus::Completed, AnalysisStatus::Cancelled],
            // Terminal states
            AnalysisStatus::Completed => vec![],
            AnalysisStatus::Cancelled => vec![],
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<AnalysisOccurrence, AnalysisError> {
        self.store
            .get_occurrence(id)
            .await?
            .ok_or_else(|| AnalysisError::not_found("Analysis", id))
    }

    pub async fn complete(
        &self,
        id: Uuid,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<AnalysisOccurrence, AnalysisError> {
        let occurrence = self.transition(id, AnalysisStatus::Completed, None, now).await?;

        self.audit
            .record(
                AuditLogEntry::new("analysis.complete", "analysis", id, actor)
                    .at(now)
                    .add_context("recurring_analysis_id", occurrence.recurring_analysis_id)
                    .add_context("analysis_date", occurrence.analysis_date),
            )
            .await;

        Ok(occurrence)
    }

    pub async fn cancel(
        &self,
        id: Uuid,
        actor: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<AnalysisOccurrence, AnalysisError> {
        let occurrence = self
            .transition(id, AnalysisStatus::Cancelled, reason, now)
            .await?;

        self.audit
            .record(
                AuditLogEntry::new("analysis.cancel", "analysis", id, actor)
                    .at(now)
                    .add_context("reason", &occurrence.cancellation_reason)
                    .add_context("recurring_analysis_id", occurrence.recurring_analysis_id),
            )
            .await;

        Ok(occurrence)
    }

    async fn transition(
        &self,
        id: Uuid,
        to: AnalysisStatus,
        cancellation_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<AnalysisOccurrence, AnalysisError> {
        let current = self.get(id).await?;
        Self::validate_status_transition(current.status, to)?;

        let mut updated = current.clone();
        updated.status = to;
        updated.updated_at = now;
        if to == AnalysisStatus::Cancelled {
            updated.cancellation_reason = cancellation_reason;
        }

        // A concurrent transition already made the row terminal.
        self.store
            .update_occurrence(&updated, current.status)
            .await
            .map_err(|e| match e {
                AnalysisError::ConcurrencyConflict(_) => AnalysisError::InvalidStatusTransition {
                    from: current.status,
                    to,
                },
                other => other,
            })?;

        info!(analysis_id = %id, from = %current.status, to = %to, "Analysis status updated");
        Ok(updated)
    }
}
