// libs/analysis-cell/src/store/mod.rs
//
// Persistence seam for the analysis workflow. Each method is one atomic
// unit against the datastore; the multi-row units (`commit_occurrence`,
// `archive_occurrence`, `delete_series`) must be transactional.

pub mod memory;
pub mod supabase;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::AnalysisError;
use crate::models::{
    AnalysisOccurrence, AnalysisStatus, ArchivedAnalysis, AuditLogEntry, DisplayNames,
    Notification, OrganizationSetting, Prescription, PrescriptionStatus,
    RecurringAnalysisSeries,
};

pub use memory::InMemoryAnalysisStore;
pub use supabase::SupabaseAnalysisStore;

pub type StoreResult<T> = Result<T, AnalysisError>;

/// Everything one successful scheduling decision writes.
///
/// The store applies it only while the prescription still has
/// `expected_remaining_analyses` left and the series still has
/// `expected_completed_occurrences` done; otherwise it fails with
/// `ConcurrencyConflict` and writes nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct OccurrenceCommit {
    pub occurrence: AnalysisOccurrence,
    pub series: RecurringAnalysisSeries,
    pub prescription: Prescription,
    pub expected_completed_occurrences: i32,
    pub expected_remaining_analyses: i32,
}

/// Cut-off dates for archival. Both comparisons are date-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchivalCriteria {
    /// Completed analyses dated strictly before this day are eligible.
    pub completed_before: NaiveDate,
    /// Cancelled analyses last updated strictly before this day are eligible.
    pub cancelled_updated_before: NaiveDate,
}

impl ArchivalCriteria {
    pub fn is_eligible(&self, occurrence: &AnalysisOccurrence) -> bool {
        match occurrence.status {
            AnalysisStatus::Completed => occurrence.analysis_date < self.completed_before,
            AnalysisStatus::Cancelled => {
                occurrence.updated_at.date_naive() < self.cancelled_updated_before
            }
            AnalysisStatus::Scheduled => false,
        }
    }
}

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    // Series
    async fn insert_series(&self, series: &RecurringAnalysisSeries) -> StoreResult<()>;
    async fn get_series(&self, id: Uuid) -> StoreResult<Option<RecurringAnalysisSeries>>;
    async fn list_active_series(&self) -> StoreResult<Vec<RecurringAnalysisSeries>>;
    async fn set_series_active(
        &self,
        id: Uuid,
        is_active: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<RecurringAnalysisSeries>;
    /// Deletes the series with its live occurrences. Returns how many
    /// occurrences went with it.
    async fn delete_series(&self, id: Uuid) -> StoreResult<usize>;

    // Prescriptions
    async fn insert_prescription(&self, prescription: &Prescription) -> StoreResult<()>;
    async fn get_prescription(&self, id: Uuid) -> StoreResult<Option<Prescription>>;
    async fn list_prescriptions_for_series(&self, series_id: Uuid) -> StoreResult<Vec<Prescription>>;
    /// Moves a prescription from `from` to `to`; conflicts if the stored
    /// status is no longer `from`.
    async fn update_prescription_status(
        &self,
        id: Uuid,
        from: PrescriptionStatus,
        to: PrescriptionStatus,
        cancellation_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<Prescription>;
    async fn mark_prescription_verified(
        &self,
        id: Uuid,
        verified_by: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Prescription>;

    // Occurrences
    async fn commit_occurrence(&self, commit: &OccurrenceCommit) -> StoreResult<()>;
    async fn get_occurrence(&self, id: Uuid) -> StoreResult<Option<AnalysisOccurrence>>;
    async fn list_occurrences_for_series(&self, series_id: Uuid) -> StoreResult<Vec<AnalysisOccurrence>>;
    /// Writes `occurrence` only if the stored row still has `expected_status`.
    async fn update_occurrence(
        &self,
        occurrence: &AnalysisOccurrence,
        expected_status: AnalysisStatus,
    ) -> StoreResult<()>;
    async fn list_archival_candidates(&self, criteria: &ArchivalCriteria) -> StoreResult<Vec<AnalysisOccurrence>>;
    /// Inserts the archive row and deletes the live row in one transaction.
    async fn archive_occurrence(&self, archived: &ArchivedAnalysis) -> StoreResult<()>;
    async fn get_archived(&self, id: Uuid) -> StoreResult<Option<ArchivedAnalysis>>;
    async fn display_names(&self, occurrence: &AnalysisOccurrence) -> StoreResult<DisplayNames>;

    // Notifications
    /// Returns false when a notification with the same dedupe key exists.
    async fn insert_notification(&self, notification: &Notification) -> StoreResult<bool>;
    async fn list_notifications(&self, unread_only: bool) -> StoreResult<Vec<Notification>>;

    // Audit
    async fn insert_audit_entry(&self, entry: &AuditLogEntry) -> StoreResult<()>;
    async fn list_audit_entries(&self, entity_id: Option<Uuid>) -> StoreResult<Vec<AuditLogEntry>>;

    // Settings
    async fn list_settings(&self) -> StoreResult<Vec<OrganizationSetting>>;
}
