// libs/analysis-cell/src/store/memory.rs
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::AnalysisError;
use crate::models::{
    AnalysisOccurrence, AnalysisStatus, ArchivedAnalysis, AuditLogEntry, DisplayNames,
    Notification, OrganizationSetting, Prescription, PrescriptionStatus,
    RecurringAnalysisSeries,
};
use crate::store::{AnalysisStore, ArchivalCriteria, OccurrenceCommit, StoreResult};

#[derive(Default)]
struct Tables {
    series: HashMap<Uuid, RecurringAnalysisSeries>,
    prescriptions: HashMap<Uuid, Prescription>,
    occurrences: HashMap<Uuid, AnalysisOccurrence>,
    archived: HashMap<Uuid, ArchivedAnalysis>,
    notifications: Vec<Notification>,
    audit_log: Vec<AuditLogEntry>,
    settings: HashMap<String, OrganizationSetting>,
    patients: HashMap<Uuid, String>,
    doctors: HashMap<Uuid, String>,
    rooms: HashMap<Uuid, String>,
    failing_archives: HashSet<Uuid>,
}

/// Process-local store. A single lock guards every table, so each trait
/// call observes and mutates a consistent snapshot.
#[derive(Default)]
pub struct InMemoryAnalysisStore {
    tables: Mutex<Tables>,
}

impl InMemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_patient(&self, id: Uuid, name: &str) {
        self.tables.lock().await.patients.insert(id, name.to_string());
    }

    pub async fn register_doctor(&self, id: Uuid, name: &str) {
        self.tables.lock().await.doctors.insert(id, name.to_string());
    }

    pub async fn register_room(&self, id: Uuid, name: &str) {
        self.tables.lock().await.rooms.insert(id, name.to_string());
    }

    pub async fn put_setting(&self, setting: OrganizationSetting) {
        self.tables.lock().await.settings.insert(setting.key.clone(), setting);
    }

    /// Seeds a live occurrence directly, bypassing the scheduler.
    pub async fn insert_occurrence(&self, occurrence: AnalysisOccurrence) {
        self.tables.lock().await.occurrences.insert(occurrence.id, occurrence);
    }

    /// Makes the archive transaction for `analysis_id` fail.
    pub async fn fail_archival_for(&self, analysis_id: Uuid) {
        self.tables.lock().await.failing_archives.insert(analysis_id);
    }

    pub async fn live_occurrence_count(&self) -> usize {
        self.tables.lock().await.occurrences.len()
    }

    pub async fn archived_count(&self) -> usize {
        self.tables.lock().await.archived.len()
    }
}

#[async_trait]
impl AnalysisStore for InMemoryAnalysisStore {
    async fn insert_series(&self, series: &RecurringAnalysisSeries) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.series.contains_key(&series.id) {
            return Err(AnalysisError::ConcurrencyConflict(format!(
                "series {} already exists",
                series.id
            )));
        }
        tables.series.insert(series.id, series.clone());
        Ok(())
    }

    async fn get_series(&self, id: Uuid) -> StoreResult<Option<RecurringAnalysisSeries>> {
        Ok(self.tables.lock().await.series.get(&id).cloned())
    }

    async fn list_active_series(&self) -> StoreResult<Vec<RecurringAnalysisSeries>> {
        let tables = self.tables.lock().await;
        let mut active: Vec<RecurringAnalysisSeries> = tables
            .series
            .values()
            .filter(|series| series.is_active)
            .cloned()
            .collect();
        active.sort_by_key(|series| (series.next_due_date, series.created_at));
        Ok(active)
    }

    async fn set_series_active(
        &self,
        id: Uuid,
        is_active: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<RecurringAnalysisSeries> {
        let mut tables = self.tables.lock().await;
        let series = tables
            .series
            .get_mut(&id)
            .ok_or_else(|| AnalysisError::not_found("Recurring analysis series", id))?;
        series.is_active = is_active;
        series.updated_at = now;
        Ok(series.clone())
    }

    async fn delete_series(&self, id: Uuid) -> StoreResult<usize> {
        let mut tables = self.tables.lock().await;
        if tables.series.remove(&id).is_none() {
            return Err(AnalysisError::not_found("Recurring analysis series", id));
        }
        let before = tables.occurrences.len();
        tables
            .occurrences
            .retain(|_, occurrence| occurrence.recurring_analysis_id != Some(id));
        Ok(before - tables.occurrences.len())
    }

    async fn insert_prescription(&self, prescription: &Prescription) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if !tables.series.contains_key(&prescription.recurring_analysis_id) {
            return Err(AnalysisError::not_found(
                "Recurring analysis series",
                prescription.recurring_analysis_id,
            ));
        }
        tables.prescriptions.insert(prescription.id, prescription.clone());
        Ok(())
    }

    async fn get_prescription(&self, id: Uuid) -> StoreResult<Option<Prescription>> {
        Ok(self.tables.lock().await.prescriptions.get(&id).cloned())
    }

    async fn list_prescriptions_for_series(&self, series_id: Uuid) -> StoreResult<Vec<Prescription>> {
        let tables = self.tables.lock().await;
        let mut prescriptions: Vec<Prescription> = tables
            .prescriptions
            .values()
            .filter(|p| p.recurring_analysis_id == series_id)
            .cloned()
            .collect();
        prescriptions.sort_by_key(|p| p.created_at);
        Ok(prescriptions)
    }

    async fn update_prescription_status(
        &self,
        id: Uuid,
        from: PrescriptionStatus,
        to: PrescriptionStatus,
        cancellation_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<Prescription> {
        let mut tables = self.tables.lock().await;
        let prescription = tables
            .prescriptions
            .get_mut(&id)
            .ok_or_else(|| AnalysisError::not_found("Prescription", id))?;

        if prescription.status != from {
            return Err(AnalysisError::ConcurrencyConflict(format!(
                "prescription {} is {}, expected {}",
                id, prescription.status, from
            )));
        }

        prescription.status = to;
        if cancellation_reason.is_some() {
            prescription.cancellation_reason = cancellation_reason;
        }
        prescription.updated_at = now;
        Ok(prescription.clone())
    }

    async fn mark_prescription_verified(
        &self,
        id: Uuid,
        verified_by: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Prescription> {
        let mut tables = self.tables.lock().await;
        let prescription = tables
            .prescriptions
            .get_mut(&id)
            .ok_or_else(|| AnalysisError::not_found("Prescription", id))?;
        if prescription.verified_at.is_some() {
            return Err(AnalysisError::ConcurrencyConflict(format!(
                "prescription {} was already verified",
                id
            )));
        }
        prescription.verified_at = Some(now);
        prescription.verified_by = Some(verified_by.to_string());
        prescription.updated_at = now;
        Ok(prescription.clone())
    }

    async fn commit_occurrence(&self, commit: &OccurrenceCommit) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;

        let series_id = commit.series.id;
        let prescription_id = commit.prescription.id;

        // Validate everything before touching any table.
        let stored_series = tables
            .series
            .get(&series_id)
            .ok_or_else(|| AnalysisError::not_found("Recurring analysis series", series_id))?;
        if stored_series.completed_occurrences != commit.expected_completed_occurrences
            || !stored_series.is_active
        {
            return Err(AnalysisError::ConcurrencyConflict(format!(
                "series {} advanced concurrently",
                series_id
            )));
        }

        let stored_prescription = tables
            .prescriptions
            .get(&prescription_id)
            .ok_or_else(|| AnalysisError::not_found("Prescription", prescription_id))?;
        if stored_prescription.remaining_analyses != commit.expected_remaining_analyses
            || stored_prescription.remaining_analyses <= 0
            || stored_prescription.status != PrescriptionStatus::Active
        {
            return Err(AnalysisError::ConcurrencyConflict(format!(
                "prescription {} consumed concurrently",
                prescription_id
            )));
        }

        tables.series.insert(series_id, commit.series.clone());
        tables.prescriptions.insert(prescription_id, commit.prescription.clone());
        tables
            .occurrences
            .insert(commit.occurrence.id, commit.occurrence.clone());

        debug!(
            series_id = %series_id,
            occurrence_id = %commit.occurrence.id,
            "Committed recurring occurrence"
        );
        Ok(())
    }

    async fn get_occurrence(&self, id: Uuid) -> StoreResult<Option<AnalysisOccurrence>> {
        Ok(self.tables.lock().await.occurrences.get(&id).cloned())
    }

    async fn list_occurrences_for_series(&self, series_id: Uuid) -> StoreResult<Vec<AnalysisOccurrence>> {
        let tables = self.tables.lock().await;
        let mut occurrences: Vec<AnalysisOccurrence> = tables
            .occurrences
            .values()
            .filter(|o| o.recurring_analysis_id == Some(series_id))
            .cloned()
            .collect();
        occurrences.sort_by_key(|o| o.occurrence_number);
        Ok(occurrences)
    }

    async fn update_occurrence(
        &self,
        occurrence: &AnalysisOccurrence,
        expected_status: AnalysisStatus,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let stored = tables
            .occurrences
            .get_mut(&occurrence.id)
            .ok_or_else(|| AnalysisError::not_found("Analysis", occurrence.id))?;
        if stored.status != expected_status {
            return Err(AnalysisError::ConcurrencyConflict(format!(
                "analysis {} is {}, expected {}",
                occurrence.id, stored.status, expected_status
            )));
        }
        *stored = occurrence.clone();
        Ok(())
    }

    async fn list_archival_candidates(&self, criteria: &ArchivalCriteria) -> StoreResult<Vec<AnalysisOccurrence>> {
        let tables = self.tables.lock().await;
        let mut candidates: Vec<AnalysisOccurrence> = tables
            .occurrences
            .values()
            .filter(|occurrence| criteria.is_eligible(occurrence))
            .cloned()
            .collect();
        candidates.sort_by_key(|o| (o.analysis_date, o.id));
        Ok(candidates)
    }

    async fn archive_occurrence(&self, archived: &ArchivedAnalysis) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.failing_archives.contains(&archived.id) {
            return Err(AnalysisError::Store(format!(
                "archive insert rejected for analysis {}",
                archived.id
            )));
        }
        if tables.occurrences.remove(&archived.id).is_none() {
            return Err(AnalysisError::not_found("Analysis", archived.id));
        }
        tables.archived.insert(archived.id, archived.clone());
        Ok(())
    }

    async fn get_archived(&self, id: Uuid) -> StoreResult<Option<ArchivedAnalysis>> {
        Ok(self.tables.lock().await.archived.get(&id).cloned())
    }

    async fn display_names(&self, occurrence: &AnalysisOccurrence) -> StoreResult<DisplayNames> {
        let tables = self.tables.lock().await;
        Ok(DisplayNames {
            patient_name: tables.patients.get(&occurrence.patient_id).cloned(),
            doctor_name: occurrence.doctor_id.and_then(|id| tables.doctors.get(&id).cloned()),
            room_name: occurrence.room_id.and_then(|id| tables.rooms.get(&id).cloned()),
        })
    }

    async fn insert_notification(&self, notification: &Notification) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        if tables
            .notifications
            .iter()
            .any(|n| n.dedupe_key == notification.dedupe_key)
        {
            return Ok(false);
        }
        tables.notifications.push(notification.clone());
        Ok(true)
    }

    async fn list_notifications(&self, unread_only: bool) -> StoreResult<Vec<Notification>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .notifications
            .iter()
            .filter(|n| !unread_only || !n.is_read)
            .cloned()
            .collect())
    }

    async fn insert_audit_entry(&self, entry: &AuditLogEntry) -> StoreResult<()> {
        self.tables.lock().await.audit_log.push(entry.clone());
        Ok(())
    }

    async fn list_audit_entries(&self, entity_id: Option<Uuid>) -> StoreResult<Vec<AuditLogEntry>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .audit_log
            .iter()
            .filter(|entry| entity_id.map_or(true, |id| entry.entity_id == id))
            .cloned()
            .collect())
    }

    async fn list_settings(&self) -> StoreResult<Vec<OrganizationSetting>> {
        let tables = self.tables.lock().await;
        let mut settings: Vec<OrganizationSetting> = tables.settings.values().cloned().collect();
        settings.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(settings)
    }
}
