// libs/analysis-cell/src/services/series.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::AnalysisError;
use crate::models::{
    AnalysisOccurrence, AuditLogEntry, CreateSeriesRequest, RecurrencePattern,
    RecurringAnalysisSeries,
};
use crate::services::audit::AuditService;
use crate::store::AnalysisStore;

pub struct SeriesService {
    store: Arc<dyn AnalysisStore>,
    audit: AuditService,
}

impl SeriesService {
    pub fn new(store: Arc<dyn AnalysisStore>) -> Self {
        Self {
            audit: AuditService::new(store.clone()),
            store,
        }
    }

    /// Returns the interval to store for the request. Fixed patterns
    /// ignore whatever the caller sent.
    pub fn resolve_interval(request: &CreateSeriesRequest) -> Result<i32, AnalysisError> {
        if request.total_occurrences < 1 {
            return Err(AnalysisError::Validation(
                "total_occurrences must be at least 1".to_string(),
            ));
        }

        match request.recurrence_pattern.nominal_interval_days() {
            Some(step) => Ok(step),
            None => match request.interval_days {
                Some(days) if days >= 1 => Ok(days),
                _ => Err(AnalysisError::Validation(
                    "custom recurrence requires interval_days >= 1".to_string(),
                )),
            },
        }
    }

    #[instrument(skip(self, request), fields(patient_id = %request.patient_id))]
    pub async fn create(
        &self,
        request: CreateSeriesRequest,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<RecurringAnalysisSeries, AnalysisError> {
        let interval_days = Self::resolve_interval(&request)?;

        let series = RecurringAnalysisSeries {
            id: Uuid::new_v4(),
            patient_id: request.patient_id,
            doctor_id: request.doctor_id,
            room_id: request.room_id,
            analysis_type: request.analysis_type,
            recurrence_pattern: request.recurrence_pattern,
            interval_days,
            total_occurrences: request.total_occurrences,
            completed_occurrences: 0,
            next_due_date: Some(request.start_date),
            last_scheduled_date: None,
            is_active: true,
            notes: request.notes,
            created_by: Some(actor.to_string()),
            created_at: now,
            updated_at: now,
        };

        self.store.insert_series(&series).await?;

        info!(
            series_id = %series.id,
            pattern = %series.recurrence_pattern,
            total = series.total_occurrences,
            "Recurring analysis series created"
        );

        self.audit
            .record(
                AuditLogEntry::new("series.create", "recurring_analysis", series.id, actor)
                    .at(now)
                    .add_context("analysis_type", series.analysis_type)
                    .add_context("recurrence_pattern", series.recurrence_pattern)
                    .add_context("interval_days", series.interval_days)
                    .add_context("total_occurrences", series.total_occurrences),
            )
            .await;

        Ok(series)
    }

    pub async fn get(&self, id: Uuid) -> Result<RecurringAnalysisSeries, AnalysisError> {
        self.store
            .get_series(id)
            .await?
            .ok_or_else(|| AnalysisError::not_found("Recurring analysis series", id))
    }

    pub async fn list_active(&self) -> Result<Vec<RecurringAnalysisSeries>, AnalysisError> {
        self.store.list_active_series().await
    }

    pub async fn occurrences(&self, id: Uuid) -> Result<Vec<AnalysisOccurrence>, AnalysisError> {
        self.get(id).await?;
        self.store.list_occurrences_for_series(id).await
    }

    /// Stops future scheduling. Existing occurrences are left untouched.
    pub async fn deactivate(
        &self,
        id: Uuid,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<RecurringAnalysisSeries, AnalysisError> {
        let series = self.store.set_series_active(id, false, now).await?;

        self.audit
            .record(
                AuditLogEntry::new("series.deactivate", "recurring_analysis", id, actor)
                    .at(now)
                    .add_context("completed_occurrences", series.completed_occurrences),
            )
            .await;

        Ok(series)
    }

    /// Removes the series together with its live occurrences.
    #[instrument(skip(self))]
    pub async fn delete(
        &self,
        id: Uuid,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, AnalysisError> {
        let removed = self.store.delete_series(id).await?;

        info!(series_id = %id, occurrences_removed = removed, "Recurring analysis series deleted");

        self.audit
            .record(
                AuditLogEntry::new("series.delete", "recurring_analysis", id, actor)
                    .at(now)
                    .add_context("occurrences_removed", removed),
            )
            .await;

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalysisType;
    use assert_matches::assert_matches;
    use chrono::NaiveDate;

    fn request(pattern: RecurrencePattern, interval: Option<i32>, total: i32) -> CreateSeriesRequest {
        CreateSeriesRequest {
            patient_id: Uuid::new_v4(),
            doctor_id: None,
            room_id: None,
            analysis_type: AnalysisType::BloodCount,
            recurrence_pattern: pattern,
            interval_days: interval,
            total_occurrences: total,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            notes: None,
        }
    }

    #[test]
    fn test_fixed_patterns_normalize_interval() {
        assert_eq!(SeriesService::resolve_interval(&request(RecurrencePattern::Daily, Some(9), 2)).unwrap(), 1);
        assert_eq!(SeriesService::resolve_interval(&request(RecurrencePattern::Weekly, None, 2)).unwrap(), 7);
        assert_eq!(SeriesService::resolve_interval(&request(RecurrencePattern::Monthly, None, 2)).unwrap(), 30);
    }

    #[test]
    fn test_custom_pattern_requires_interval() {
        assert_eq!(SeriesService::resolve_interval(&request(RecurrencePattern::Custom, Some(10), 2)).unwrap(), 10);
        assert_matches!(
            SeriesService::resolve_interval(&request(RecurrencePattern::Custom, None, 2)),
            Err(AnalysisError::Validation(_))
        );
        assert_matches!(
            SeriesService::resolve_interval(&request(RecurrencePattern::Custom, Some(0), 2)),
            Err(AnalysisError::Validation(_))
        );
    }

    #[test]
    fn test_total_must_be_positive() {
        assert_matches!(
            SeriesService::resolve_interval(&request(RecurrencePattern::Weekly, None, 0)),
            Err(AnalysisError::Validation(_))
        );
    }
}
