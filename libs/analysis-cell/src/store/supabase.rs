// libs/analysis-cell/src/store/supabase.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderValue;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::error::AnalysisError;
use crate::models::{
    AnalysisOccurrence, AnalysisStatus, ArchivedAnalysis, AuditLogEntry, DisplayNames,
    Notification, OrganizationSetting, Prescription, PrescriptionStatus,
    RecurringAnalysisSeries,
};
use crate::store::{AnalysisStore, ArchivalCriteria, OccurrenceCommit, StoreResult};

const SERIES_TABLE: &str = "/rest/v1/recurring_analyses";
const PRESCRIPTIONS_TABLE: &str = "/rest/v1/analysis_prescriptions";
const ANALYSES_TABLE: &str = "/rest/v1/analyses";
const ARCHIVE_TABLE: &str = "/rest/v1/archived_analyses";
const NOTIFICATIONS_TABLE: &str = "/rest/v1/notifications";
const AUDIT_TABLE: &str = "/rest/v1/audit_logs";
const SETTINGS_TABLE: &str = "/rest/v1/organization_settings";

#[derive(Debug, Deserialize)]
struct PersonRow {
    first_name: Option<String>,
    last_name: Option<String>,
}

impl PersonRow {
    fn full_name(self) -> Option<String> {
        let name = [self.first_name, self.last_name]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        (!name.is_empty()).then_some(name)
    }
}

#[derive(Debug, Deserialize)]
struct RoomRow {
    name: Option<String>,
}

/// PostgREST-backed store. Multi-row units go through the
/// `commit_recurring_occurrence` and `archive_analysis` database functions
/// (see `sql/analysis_workflow.sql`), each of which runs in one transaction.
pub struct SupabaseAnalysisStore {
    supabase: SupabaseClient,
    api_key: String,
}

impl SupabaseAnalysisStore {
    pub fn new(config: &AppConfig) -> Self {
        let api_key = config.job_api_key().to_string();
        Self {
            supabase: SupabaseClient::with_api_key(config, &api_key),
            api_key,
        }
    }

    fn token(&self) -> Option<&str> {
        Some(self.api_key.as_str())
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> StoreResult<Vec<T>> {
        let rows: Vec<T> = self.supabase
            .request(Method::GET, path, self.token(), None)
            .await?;
        Ok(rows)
    }

    async fn fetch_one<T: DeserializeOwned>(&self, path: &str) -> StoreResult<Option<T>> {
        Ok(self.fetch::<T>(path).await?.into_iter().next())
    }

    async fn write<T: DeserializeOwned>(&self, method: Method, path: &str, body: Option<Value>) -> StoreResult<Vec<T>> {
        let rows: Option<Vec<T>> = self.supabase
            .request_with_headers(
                method,
                path,
                self.token(),
                body,
                Some(SupabaseClient::return_representation()),
            )
            .await?;
        Ok(rows.unwrap_or_default())
    }

    async fn insert(&self, table: &str, body: Value) -> StoreResult<()> {
        let _: Option<Value> = self.supabase
            .request(Method::POST, table, self.token(), Some(body))
            .await?;
        Ok(())
    }

    /// An empty conditional PATCH either missed the row or lost a race;
    /// this tells the two apart.
    async fn missing_or_conflict(&self, table: &str, entity: &'static str, id: Uuid, detail: String) -> AnalysisError {
        match self.fetch_one::<Value>(&format!("{}?id=eq.{}&select=id", table, id)).await {
            Ok(Some(_)) => AnalysisError::ConcurrencyConflict(detail),
            Ok(None) => AnalysisError::not_found(entity, id),
            Err(e) => e,
        }
    }

    async fn person_name(&self, table: &str, id: Uuid) -> StoreResult<Option<String>> {
        let path = format!("/rest/v1/{}?id=eq.{}&select=first_name,last_name", table, id);
        Ok(self.fetch_one::<PersonRow>(&path).await?.and_then(PersonRow::full_name))
    }
}

#[async_trait]
impl AnalysisStore for SupabaseAnalysisStore {
    async fn insert_series(&self, series: &RecurringAnalysisSeries) -> StoreResult<()> {
        self.insert(SERIES_TABLE, json!(series)).await
    }

    async fn get_series(&self, id: Uuid) -> StoreResult<Option<RecurringAnalysisSeries>> {
        self.fetch_one(&format!("{}?id=eq.{}", SERIES_TABLE, id)).await
    }

    async fn list_active_series(&self) -> StoreResult<Vec<RecurringAnalysisSeries>> {
        self.fetch(&format!(
            "{}?is_active=eq.true&order=next_due_date.asc.nullslast,created_at.asc",
            SERIES_TABLE
        ))
        .await
    }

    async fn set_series_active(
        &self,
        id: Uuid,
        is_active: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<RecurringAnalysisSeries> {
        let rows: Vec<RecurringAnalysisSeries> = self
            .write(
                Method::PATCH,
                &format!("{}?id=eq.{}", SERIES_TABLE, id),
                Some(json!({ "is_active": is_active, "updated_at": now })),
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| AnalysisError::not_found("Recurring analysis series", id))
    }

    async fn delete_series(&self, id: Uuid) -> StoreResult<usize> {
        let occurrences = self.list_occurrences_for_series(id).await?.len();

        // Live analyses follow through ON DELETE CASCADE.
        let rows: Vec<Value> = self
            .write(Method::DELETE, &format!("{}?id=eq.{}", SERIES_TABLE, id), None)
            .await?;
        if rows.is_empty() {
            return Err(AnalysisError::not_found("Recurring analysis series", id));
        }
        Ok(occurrences)
    }

    async fn insert_prescription(&self, prescription: &Prescription) -> StoreResult<()> {
        self.insert(PRESCRIPTIONS_TABLE, json!(prescription)).await
    }

    async fn get_prescription(&self, id: Uuid) -> StoreResult<Option<Prescription>> {
        self.fetch_one(&format!("{}?id=eq.{}", PRESCRIPTIONS_TABLE, id)).await
    }

    async fn list_prescriptions_for_series(&self, series_id: Uuid) -> StoreResult<Vec<Prescription>> {
        self.fetch(&format!(
            "{}?recurring_analysis_id=eq.{}&order=created_at.asc",
            PRESCRIPTIONS_TABLE, series_id
        ))
        .await
    }

    async fn update_prescription_status(
        &self,
        id: Uuid,
        from: PrescriptionStatus,
        to: PrescriptionStatus,
        cancellation_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<Prescription> {
        let mut update = serde_json::Map::new();
        update.insert("status".to_string(), json!(to));
        update.insert("updated_at".to_string(), json!(now));
        if let Some(reason) = cancellation_reason {
            update.insert("cancellation_reason".to_string(), json!(reason));
        }

        let rows: Vec<Prescription> = self
            .write(
                Method::PATCH,
                &format!("{}?id=eq.{}&status=eq.{}", PRESCRIPTIONS_TABLE, id, from),
                Some(Value::Object(update)),
            )
            .await?;

        match rows.into_iter().next() {
            Some(prescription) => Ok(prescription),
            None => Err(self
                .missing_or_conflict(
                    PRESCRIPTIONS_TABLE,
                    "Prescription",
                    id,
                    format!("prescription {} is no longer {}", id, from),
                )
                .await),
        }
    }

    async fn mark_prescription_verified(
        &self,
        id: Uuid,
        verified_by: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Prescription> {
        let rows: Vec<Prescription> = self
            .write(
                Method::PATCH,
                &format!("{}?id=eq.{}&verified_at=is.null", PRESCRIPTIONS_TABLE, id),
                Some(json!({ "verified_at": now, "verified_by": verified_by, "updated_at": now })),
            )
            .await?;

        match rows.into_iter().next() {
            Some(prescription) => Ok(prescription),
            None => Err(self
                .missing_or_conflict(
                    PRESCRIPTIONS_TABLE,
                    "Prescription",
                    id,
                    format!("prescription {} was already verified", id),
                )
                .await),
        }
    }

    async fn commit_occurrence(&self, commit: &OccurrenceCommit) -> StoreResult<()> {
        let committed: bool = self.supabase
            .rpc(
                "commit_recurring_occurrence",
                self.token(),
                json!({
                    "p_occurrence": commit.occurrence,
                    "p_series": commit.series,
                    "p_prescription_id": commit.prescription.id,
                    "p_remaining_analyses": commit.prescription.remaining_analyses,
                    "p_prescription_status": commit.prescription.status,
                    "p_expected_completed": commit.expected_completed_occurrences,
                    "p_expected_remaining": commit.expected_remaining_analyses,
                }),
            )
            .await?;

        if !committed {
            warn!(
                series_id = %commit.series.id,
                prescription_id = %commit.prescription.id,
                "Occurrence commit rejected by optimistic check"
            );
            return Err(AnalysisError::ConcurrencyConflict(format!(
                "series {} or prescription {} changed concurrently",
                commit.series.id, commit.prescription.id
            )));
        }

        debug!(occurrence_id = %commit.occurrence.id, "Committed recurring occurrence");
        Ok(())
    }

    async fn get_occurrence(&self, id: Uuid) -> StoreResult<Option<AnalysisOccurrence>> {
        self.fetch_one(&format!("{}?id=eq.{}", ANALYSES_TABLE, id)).await
    }

    async fn list_occurrences_for_series(&self, series_id: Uuid) -> StoreResult<Vec<AnalysisOccurrence>> {
        self.fetch(&format!(
            "{}?recurring_analysis_id=eq.{}&order=occurrence_number.asc",
            ANALYSES_TABLE, series_id
        ))
        .await
    }

    async fn update_occurrence(
        &self,
        occurrence: &AnalysisOccurrence,
        expected_status: AnalysisStatus,
    ) -> StoreResult<()> {
        let rows: Vec<Value> = self
            .write(
                Method::PATCH,
                &format!("{}?id=eq.{}&status=eq.{}", ANALYSES_TABLE, occurrence.id, expected_status),
                Some(json!(occurrence)),
            )
            .await?;

        if rows.is_empty() {
            return Err(self
                .missing_or_conflict(
                    ANALYSES_TABLE,
                    "Analysis",
                    occurrence.id,
                    format!("analysis {} is no longer {}", occurrence.id, expected_status),
                )
                .await);
        }
        Ok(())
    }

    async fn list_archival_candidates(&self, criteria: &ArchivalCriteria) -> StoreResult<Vec<AnalysisOccurrence>> {
        let mut candidates: Vec<AnalysisOccurrence> = self
            .fetch(&format!(
                "{}?status=eq.completed&analysis_date=lt.{}",
                ANALYSES_TABLE, criteria.completed_before
            ))
            .await?;

        // date(updated_at) < D  <=>  updated_at < D 00:00 UTC
        let cancelled: Vec<AnalysisOccurrence> = self
            .fetch(&format!(
                "{}?status=eq.cancelled&updated_at=lt.{}T00:00:00Z",
                ANALYSES_TABLE, criteria.cancelled_updated_before
            ))
            .await?;

        candidates.extend(cancelled);
        candidates.retain(|occurrence| criteria.is_eligible(occurrence));
        candidates.sort_by_key(|o| (o.analysis_date, o.id));
        Ok(candidates)
    }

    async fn archive_occurrence(&self, archived: &ArchivedAnalysis) -> StoreResult<()> {
        let moved: bool = self.supabase
            .rpc("archive_analysis", self.token(), json!({ "p_archived": archived }))
            .await?;

        if !moved {
            return Err(AnalysisError::not_found("Analysis", archived.id));
        }
        Ok(())
    }

    async fn get_archived(&self, id: Uuid) -> StoreResult<Option<ArchivedAnalysis>> {
        self.fetch_one(&format!("{}?id=eq.{}", ARCHIVE_TABLE, id)).await
    }

    async fn display_names(&self, occurrence: &AnalysisOccurrence) -> StoreResult<DisplayNames> {
        let patient_name = self.person_name("patients", occurrence.patient_id).await?;

        let doctor_name = match occurrence.doctor_id {
            Some(id) => self.person_name("doctors", id).await?,
            None => None,
        };

        let room_name = match occurrence.room_id {
            Some(id) => self
                .fetch_one::<RoomRow>(&format!("/rest/v1/rooms?id=eq.{}&select=name", id))
                .await?
                .and_then(|room| room.name),
            None => None,
        };

        Ok(DisplayNames { patient_name, doctor_name, room_name })
    }

    async fn insert_notification(&self, notification: &Notification) -> StoreResult<bool> {
        let mut headers = SupabaseClient::return_representation();
        headers.insert(
            "Prefer",
            HeaderValue::from_static("return=representation,resolution=ignore-duplicates"),
        );

        let rows: Option<Vec<Value>> = self.supabase
            .request_with_headers(
                Method::POST,
                &format!("{}?on_conflict=dedupe_key", NOTIFICATIONS_TABLE),
                self.token(),
                Some(json!(notification)),
                Some(headers),
            )
            .await?;

        Ok(rows.is_some_and(|rows| !rows.is_empty()))
    }

    async fn list_notifications(&self, unread_only: bool) -> StoreResult<Vec<Notification>> {
        let filter = if unread_only { "is_read=eq.false&" } else { "" };
        self.fetch(&format!("{}?{}order=created_at.asc", NOTIFICATIONS_TABLE, filter)).await
    }

    async fn insert_audit_entry(&self, entry: &AuditLogEntry) -> StoreResult<()> {
        self.insert(AUDIT_TABLE, json!(entry)).await
    }

    async fn list_audit_entries(&self, entity_id: Option<Uuid>) -> StoreResult<Vec<AuditLogEntry>> {
        let filter = entity_id
            .map(|id| format!("entity_id=eq.{}&", id))
            .unwrap_or_default();
        self.fetch(&format!("{}?{}order=timestamp.asc", AUDIT_TABLE, filter)).await
    }

    async fn list_settings(&self) -> StoreResult<Vec<OrganizationSetting>> {
        self.fetch(&format!("{}?select=key,value,value_type", SETTINGS_TABLE)).await
    }
}
