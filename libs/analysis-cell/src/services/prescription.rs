// libs/analysis-cell/src/services/prescription.rs
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn, instrument};
use uuid::Uuid;

use crate::error::AnalysisError;
use crate::models::{
    AuditLogEntry, Prescription, PrescriptionStatus, RecurringAnalysisSeries,
    SubmitPrescriptionRequest,
};
use crate::services::audit::AuditService;
use crate::store::AnalysisStore;

/// Admits prescriptions and keeps their status consistent with the
/// calendar and the remaining-analyses counter.
pub struct PrescriptionService {
    store: Arc<dyn AnalysisStore>,
    audit: AuditService,
}

impl PrescriptionService {
    pub fn new(store: Arc<dyn AnalysisStore>) -> Self {
        Self {
            audit: AuditService::new(store.clone()),
            store,
        }
    }

    /// Checks that do not need the datastore.
    pub fn validate_request(request: &SubmitPrescriptionRequest) -> Result<(), AnalysisError> {
        if request.valid_from > request.valid_until {
            return Err(AnalysisError::Validation(format!(
                "valid_from ({}) must not be after valid_until ({})",
                request.valid_from, request.valid_until
            )));
        }

        if request.total_analyses_prescribed < 1 {
            return Err(AnalysisError::Validation(
                "total_analyses_prescribed must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_series(series: &RecurringAnalysisSeries) -> Result<(), AnalysisError> {
        if series.is_terminal() {
            return Err(AnalysisError::Validation(format!(
                "Recurring analysis series {} is no longer active",
                series.id
            )));
        }
        Ok(())
    }

    /// Picks the prescription that authorizes the next occurrence: among
    /// those usable today, the most recently verified wins, unverified ones
    /// rank last and ties go to the newest.
    pub fn select_authorizing(prescriptions: &[Prescription], today: NaiveDate) -> Option<&Prescription> {
        prescriptions
            .iter()
            .filter(|p| p.authorizes(today))
            .max_by_key(|p| (p.verified_at, p.created_at))
    }

    #[instrument(skip(self, request), fields(series_id = %request.recurring_analysis_id))]
    pub async fn submit(
        &self,
        request: SubmitPrescriptionRequest,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Prescription, AnalysisError> {
        Self::validate_request(&request)?;

        let series = self
            .store
            .get_series(request.recurring_analysis_id)
            .await?
            .ok_or_else(|| {
                AnalysisError::not_found("Recurring analysis series", request.recurring_analysis_id)
            })?;
        Self::validate_series(&series)?;

        let prescription = Prescription {
            id: Uuid::new_v4(),
            recurring_analysis_id: series.id,
            valid_from: request.valid_from,
            valid_until: request.valid_until,
            total_analyses_prescribed: request.total_analyses_prescribed,
            remaining_analyses: request.total_analyses_prescribed,
            status: PrescriptionStatus::Active,
            prescribed_by: request.prescribed_by,
            document_reference: request.document_reference,
            verified_at: None,
            verified_by: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_prescription(&prescription).await?;

        info!(
            prescription_id = %prescription.id,
            remaining = prescription.remaining_analyses,
            "Prescription accepted"
        );

        self.audit
            .record(
                AuditLogEntry::new("prescription.create", "prescription", prescription.id, actor)
                    .at(now)
                    .add_context("recurring_analysis_id", series.id)
                    .add_context("total_analyses_prescribed", prescription.total_analyses_prescribed)
                    .add_context("valid_until", prescription.valid_until),
            )
            .await;

        Ok(prescription)
    }

    pub async fn get(&self, id: Uuid, now: DateTime<Utc>) -> Result<Prescription, AnalysisError> {
        let prescription = self
            .store
            .get_prescription(id)
            .await?
            .ok_or_else(|| AnalysisError::not_found("Prescription", id))?;
        self.refresh_status(prescription, now).await
    }

    pub async fn list_for_series(
        &self,
        series_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Prescription>, AnalysisError> {
        let stored = self.store.list_prescriptions_for_series(series_id).await?;
        let mut refreshed = Vec::with_capacity(stored.len());
        for prescription in stored {
            refreshed.push(self.refresh_status(prescription, now).await?);
        }
        Ok(refreshed)
    }

    /// Persists the recomputed status when it differs from the stored one.
    pub async fn refresh_status(
        &self,
        prescription: Prescription,
        now: DateTime<Utc>,
    ) -> Result<Prescription, AnalysisError> {
        let effective = prescription.effective_status(now.date_naive());
        if effective == prescription.status {
            return Ok(prescription);
        }

        debug!(
            prescription_id = %prescription.id,
            from = %prescription.status,
            to = %effective,
            "Recomputing prescription status"
        );

        match self
            .store
            .update_prescription_status(prescription.id, prescription.status, effective, None, now)
            .await
        {
            Ok(updated) => Ok(updated),
            Err(AnalysisError::ConcurrencyConflict(_)) => {
                // Someone else moved it first; report what is stored now.
                let mut current = self
                    .store
                    .get_prescription(prescription.id)
                    .await?
                    .ok_or_else(|| AnalysisError::not_found("Prescription", prescription.id))?;
                current.status = current.effective_status(now.date_naive());
                Ok(current)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn verify(
        &self,
        id: Uuid,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Prescription, AnalysisError> {
        let prescription = self.get(id, now).await?;
        if prescription.status != PrescriptionStatus::Active {
            return Err(AnalysisError::Validation(format!(
                "Only active prescriptions can be verified (status is {})",
                prescription.status
            )));
        }
        if prescription.verified_at.is_some() {
            return Err(AnalysisError::Validation(format!(
                "Prescription {} is already verified",
                id
            )));
        }

        let verified = self.store.mark_prescription_verified(id, actor, now).await?;

        self.audit
            .record(
                AuditLogEntry::new("prescription.verify", "prescription", id, actor).at(now),
            )
            .await;

        Ok(verified)
    }

    /// Operator override. Terminal: a cancelled prescription never
    /// authorizes anything again.
    #[instrument(skip(self, reason))]
    pub async fn cancel(
        &self,
        id: Uuid,
        actor: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Prescription, AnalysisError> {
        let mut attempts = 0;
        let cancelled = loop {
            attempts += 1;
            let current = self
                .store
                .get_prescription(id)
                .await?
                .ok_or_else(|| AnalysisError::not_found("Prescription", id))?;

            if current.status == PrescriptionStatus::Cancelled {
                return Err(AnalysisError::Validation(format!(
                    "Prescription {} is already cancelled",
                    id
                )));
            }

            match self
                .store
                .update_prescription_status(
                    id,
                    current.status,
                    PrescriptionStatus::Cancelled,
                    reason.clone(),
                    now,
                )
                .await
            {
                Ok(updated) => break updated,
                Err(AnalysisError::ConcurrencyConflict(msg)) if attempts < 2 => {
                    warn!(prescription_id = %id, "Retrying cancellation after conflict: {}", msg);
                }
                Err(e) => return Err(e),
            }
        };

        self.audit
            .record(
                AuditLogEntry::new("prescription.cancel", "prescription", id, actor)
                    .at(now)
                    .add_context("reason", &reason)
                    .add_context("remaining_analyses", cancelled.remaining_analyses),
            )
            .await;

        Ok(cancelled)
    }
}
