// libs/analysis-cell/tests/common/mod.rs
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use uuid::Uuid;

use analysis_cell::models::{
    AnalysisOccurrence, AnalysisStatus, AnalysisType, CreateSeriesRequest, Prescription,
    RecurrencePattern, RecurringAnalysisSeries, SubmitPrescriptionRequest,
};
use analysis_cell::services::{PrescriptionService, SeriesService};
use analysis_cell::store::{AnalysisStore, InMemoryAnalysisStore};

pub const STAFF: &str = "doctor:test";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, hour, 0, 0).unwrap()
}

pub struct TestSetup {
    pub memory: Arc<InMemoryAnalysisStore>,
    pub store: Arc<dyn AnalysisStore>,
}

impl TestSetup {
    pub fn new() -> Self {
        let memory = Arc::new(InMemoryAnalysisStore::new());
        let store: Arc<dyn AnalysisStore> = memory.clone();
        Self { memory, store }
    }

    pub async fn create_series(
        &self,
        pattern: RecurrencePattern,
        interval_days: Option<i32>,
        total: i32,
        start: NaiveDate,
    ) -> RecurringAnalysisSeries {
        SeriesService::new(self.store.clone())
            .create(
                CreateSeriesRequest {
                    patient_id: Uuid::new_v4(),
                    doctor_id: Some(Uuid::new_v4()),
                    room_id: Some(Uuid::new_v4()),
                    analysis_type: AnalysisType::BloodCount,
                    recurrence_pattern: pattern,
                    interval_days,
                    total_occurrences: total,
                    start_date: start,
                    notes: Some("fasting".to_string()),
                },
                STAFF,
                at(2023, 12, 1, 9),
            )
            .await
            .unwrap()
    }

    pub async fn submit_prescription(
        &self,
        series_id: Uuid,
        valid_from: NaiveDate,
        valid_until: NaiveDate,
        count: i32,
        now: DateTime<Utc>,
    ) -> Prescription {
        PrescriptionService::new(self.store.clone())
            .submit(
                SubmitPrescriptionRequest {
                    recurring_analysis_id: series_id,
                    valid_from,
                    valid_until,
                    total_analyses_prescribed: count,
                    prescribed_by: None,
                    document_reference: Some("RX-001".to_string()),
                },
                STAFF,
                now,
            )
            .await
            .unwrap()
    }

    pub async fn series(&self, id: Uuid) -> RecurringAnalysisSeries {
        self.store.get_series(id).await.unwrap().unwrap()
    }

    pub async fn prescription(&self, id: Uuid) -> Prescription {
        self.store.get_prescription(id).await.unwrap().unwrap()
    }

    /// A standalone analysis row, outside of any series.
    pub async fn put_occurrence(
        &self,
        status: AnalysisStatus,
        analysis_date: NaiveDate,
        updated_at: DateTime<Utc>,
    ) -> AnalysisOccurrence {
        let occurrence = AnalysisOccurrence {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            doctor_id: Some(Uuid::new_v4()),
            room_id: Some(Uuid::new_v4()),
            analysis_type: AnalysisType::Hormonal,
            analysis_date,
            status,
            recurring_analysis_id: None,
            occurrence_number: None,
            prescription_id: None,
            notes: None,
            cancellation_reason: None,
            created_at: updated_at,
            updated_at,
        };
        self.memory.insert_occurrence(occurrence.clone()).await;
        occurrence
    }
}
