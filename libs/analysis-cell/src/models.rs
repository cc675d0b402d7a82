// libs/analysis-cell/src/models.rs
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==============================================================================
// RECURRING SERIES
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    BloodCount,
    Biochemistry,
    Coagulation,
    Hormonal,
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisType::BloodCount => write!(f, "blood_count"),
            AnalysisType::Biochemistry => write!(f, "biochemistry"),
            AnalysisType::Coagulation => write!(f, "coagulation"),
            AnalysisType::Hormonal => write!(f, "hormonal"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl RecurrencePattern {
    /// Nominal step in days stored alongside non-custom patterns.
    pub fn nominal_interval_days(&self) -> Option<i32> {
        match self {
            RecurrencePattern::Daily => Some(1),
            RecurrencePattern::Weekly => Some(7),
            RecurrencePattern::Monthly => Some(30),
            RecurrencePattern::Custom => None,
        }
    }
}

impl fmt::Display for RecurrencePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecurrencePattern::Daily => write!(f, "daily"),
            RecurrencePattern::Weekly => write!(f, "weekly"),
            RecurrencePattern::Monthly => write!(f, "monthly"),
            RecurrencePattern::Custom => write!(f, "custom"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecurringAnalysisSeries {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
    pub analysis_type: AnalysisType,
    pub recurrence_pattern: RecurrencePattern,
    pub interval_days: i32,
    pub total_occurrences: i32,
    pub completed_occurrences: i32,
    pub next_due_date: Option<NaiveDate>,
    pub last_scheduled_date: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurringAnalysisSeries {
    /// A terminal series never produces another occurrence.
    pub fn is_terminal(&self) -> bool {
        !self.is_active || self.completed_occurrences >= self.total_occurrences
    }
}

// ==============================================================================
// PRESCRIPTIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    Active,
    Expired,
    Exhausted,
    Cancelled,
}

impl fmt::Display for PrescriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrescriptionStatus::Active => write!(f, "active"),
            PrescriptionStatus::Expired => write!(f, "expired"),
            PrescriptionStatus::Exhausted => write!(f, "exhausted"),
            PrescriptionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prescription {
    pub id: Uuid,
    pub recurring_analysis_id: Uuid,
    pub valid_from: NaiveDate,
    pub valid_until: NaiveDate,
    pub total_analyses_prescribed: i32,
    pub remaining_analyses: i32,
    pub status: PrescriptionStatus,
    pub prescribed_by: Option<Uuid>,
    pub document_reference: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub verified_by: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prescription {
    /// Status as of `today`. Cancellation is an operator override and wins
    /// over everything; expiry is checked before the counter.
    pub fn effective_status(&self, today: NaiveDate) -> PrescriptionStatus {
        if self.status == PrescriptionStatus::Cancelled {
            PrescriptionStatus::Cancelled
        } else if today > self.valid_until {
            PrescriptionStatus::Expired
        } else if self.remaining_analyses <= 0 {
            PrescriptionStatus::Exhausted
        } else {
            PrescriptionStatus::Active
        }
    }

    /// Whether this prescription may authorize one more occurrence today.
    pub fn authorizes(&self, today: NaiveDate) -> bool {
        self.effective_status(today) == PrescriptionStatus::Active
            && self.remaining_analyses > 0
            && self.valid_from <= today
            && today <= self.valid_until
    }
}

// ==============================================================================
// OCCURRENCES & ARCHIVE
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisStatus::Scheduled => write!(f, "scheduled"),
            AnalysisStatus::Completed => write!(f, "completed"),
            AnalysisStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisOccurrence {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
    pub analysis_type: AnalysisType,
    pub analysis_date: NaiveDate,
    pub status: AnalysisStatus,
    pub recurring_analysis_id: Option<Uuid>,
    pub occurrence_number: Option<i32>,
    pub prescription_id: Option<Uuid>,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchivedAnalysis {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: Option<String>,
    pub doctor_id: Option<Uuid>,
    pub doctor_name: Option<String>,
    pub room_id: Option<Uuid>,
    pub room_name: Option<String>,
    pub analysis_type: AnalysisType,
    pub analysis_date: NaiveDate,
    pub final_status: AnalysisStatus,
    pub recurring_analysis_id: Option<Uuid>,
    pub occurrence_number: Option<i32>,
    pub prescription_id: Option<Uuid>,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
}

impl ArchivedAnalysis {
    pub fn from_occurrence(
        occurrence: &AnalysisOccurrence,
        names: DisplayNames,
        archived_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: occurrence.id,
            patient_id: occurrence.patient_id,
            patient_name: names.patient_name,
            doctor_id: occurrence.doctor_id,
            doctor_name: names.doctor_name,
            room_id: occurrence.room_id,
            room_name: names.room_name,
            analysis_type: occurrence.analysis_type,
            analysis_date: occurrence.analysis_date,
            final_status: occurrence.status,
            recurring_analysis_id: occurrence.recurring_analysis_id,
            occurrence_number: occurrence.occurrence_number,
            prescription_id: occurrence.prescription_id,
            notes: occurrence.notes.clone(),
            cancellation_reason: occurrence.cancellation_reason.clone(),
            created_at: occurrence.created_at,
            updated_at: occurrence.updated_at,
            archived_at,
        }
    }
}

/// Patient/doctor/room names resolved at archival time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayNames {
    pub patient_name: Option<String>,
    pub doctor_name: Option<String>,
    pub room_name: Option<String>,
}

// ==============================================================================
// SETTINGS, NOTIFICATIONS, AUDIT
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettingValueType {
    String,
    Integer,
    Boolean,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrganizationSetting {
    pub key: String,
    pub value: String,
    pub value_type: SettingValueType,
}

impl OrganizationSetting {
    pub fn new(key: &str, value: &str, value_type: SettingValueType) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            value_type,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    PrescriptionVerification,
    RecurringAnalysisDue,
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationType::PrescriptionVerification => write!(f, "prescription_verification"),
            NotificationType::RecurringAnalysisDue => write!(f, "recurring_analysis_due"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub notification_type: NotificationType,
    pub patient_id: Uuid,
    pub recurring_analysis_id: Option<Uuid>,
    pub title: String,
    pub message: String,
    pub due_date: Option<NaiveDate>,
    pub dedupe_key: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AuditLogEntry {
    pub fn new(action: &str, entity_type: &str, entity_id: Uuid, actor: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id,
            actor: actor.to_string(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn add_context<T: Serialize>(mut self, key: &str, value: T) -> Self {
        if let Ok(serialized) = serde_json::to_value(value) {
            self.metadata.insert(key.to_string(), serialized);
        }
        self
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSeriesRequest {
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
    pub analysis_type: AnalysisType,
    pub recurrence_pattern: RecurrencePattern,
    pub interval_days: Option<i32>,
    pub total_occurrences: i32,
    pub start_date: NaiveDate,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitPrescriptionRequest {
    pub recurring_analysis_id: Uuid,
    pub valid_from: NaiveDate,
    pub valid_until: NaiveDate,
    pub total_analyses_prescribed: i32,
    pub prescribed_by: Option<Uuid>,
    pub document_reference: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationQuery {
    pub unread_only: Option<bool>,
}

/// What one scheduler pass did to one series.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SeriesOutcome {
    Terminal,
    NotDue { next_due_date: Option<NaiveDate>, reminder_sent: bool },
    Scheduled { occurrence_id: Uuid, occurrence_number: i32, prescription_id: Uuid },
    PendingAuthorization { due_date: NaiveDate, notified: bool },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SeriesFailure {
    pub series_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SchedulerReport {
    pub series_examined: usize,
    pub occurrences_created: usize,
    pub pending_authorization: usize,
    pub reminders_sent: usize,
    pub conflicts_retried: usize,
    pub failures: Vec<SeriesFailure>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ArchivalFailure {
    pub analysis_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ArchivalReport {
    pub skipped: bool,
    pub candidates: usize,
    pub archived_count: usize,
    pub failures: Vec<ArchivalFailure>,
}

impl ArchivalReport {
    pub fn disabled() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}
