// =====================================================================================
// ARCHIVAL JOB - MOVES TERMINAL ANALYSES INTO THE ARCHIVE
// =====================================================================================

use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, Utc};
use tracing::{debug, info, warn, instrument};

use crate::error::AnalysisError;
use crate::models::{
    AnalysisOccurrence, ArchivalFailure, ArchivalReport, ArchivedAnalysis, AuditLogEntry,
};
use crate::services::audit::{AuditService, ARCHIVAL_ACTOR};
use crate::services::settings::SettingsSnapshot;
use crate::store::{AnalysisStore, ArchivalCriteria};

pub struct ArchivalJob {
    store: Arc<dyn AnalysisStore>,
    audit: AuditService,
}

impl ArchivalJob {
    pub fn new(store: Arc<dyn AnalysisStore>) -> Self {
        Self {
            audit: AuditService::new(store.clone()),
            store,
        }
    }

    /// Completed analyses become eligible the day after they took place;
    /// cancelled ones once their last update is older than the delay.
    /// Both comparisons are on calendar dates.
    pub fn criteria(today: NaiveDate, settings: &SettingsSnapshot) -> ArchivalCriteria {
        let delay = Days::new(settings.cancelled_analysis_archive_delay_days.max(0) as u64);
        ArchivalCriteria {
            completed_before: today,
            cancelled_updated_before: today.checked_sub_days(delay).unwrap_or(NaiveDate::MIN),
        }
    }

    #[instrument(skip(self, settings))]
    pub async fn run(
        &self,
        now: DateTime<Utc>,
        settings: &SettingsSnapshot,
    ) -> Result<ArchivalReport, AnalysisError> {
        if !settings.auto_archive_enabled {
            info!("Automatic archival is disabled, skipping run");
            return Ok(ArchivalReport::disabled());
        }

        let criteria = Self::criteria(now.date_naive(), settings);
        let candidates = self.store.list_archival_candidates(&criteria).await?;

        let mut report = ArchivalReport {
            candidates: candidates.len(),
            ..ArchivalReport::default()
        };

        if candidates.is_empty() {
            debug!("No analyses eligible for archival");
            return Ok(report);
        }

        for occurrence in candidates {
            match self.archive_one(&occurrence, now).await {
                Ok(true) => report.archived_count += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(analysis_id = %occurrence.id, error = %e, "Failed to archive analysis");
                    report.failures.push(ArchivalFailure {
                        analysis_id: occurrence.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            candidates = report.candidates,
            archived = report.archived_count,
            failures = report.failures.len(),
            "Archival run finished"
        );

        Ok(report)
    }

    /// Returns false when another run archived the row first.
    async fn archive_one(
        &self,
        occurrence: &AnalysisOccurrence,
        now: DateTime<Utc>,
    ) -> Result<bool, AnalysisError> {
        let names = self.store.display_names(occurrence).await?;
        let archived = ArchivedAnalysis::from_occurrence(occurrence, names, now);

        match self.store.archive_occurrence(&archived).await {
            Ok(()) => {}
            Err(AnalysisError::NotFound { .. }) => {
                debug!(analysis_id = %occurrence.id, "Analysis already archived");
                return Ok(false);
            }
            Err(e) => {
                return Err(AnalysisError::ArchivalFailed {
                    analysis_id: occurrence.id,
                    reason: e.to_string(),
                })
            }
        }

        self.audit
            .record(
                AuditLogEntry::new("analysis.archive", "analysis", occurrence.id, ARCHIVAL_ACTOR)
                    .at(now)
                    .add_context("final_status", archived.final_status)
                    .add_context("analysis_date", archived.analysis_date),
            )
            .await;

        Ok(true)
    }
}
