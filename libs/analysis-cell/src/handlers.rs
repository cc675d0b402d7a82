// libs/analysis-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::require_role;

use crate::models::{CancelRequest, CreateSeriesRequest, NotificationQuery, SubmitPrescriptionRequest};
use crate::services::{
    ArchivalJob, NotificationService, OccurrenceLifecycleService, PrescriptionService,
    RecurringAnalysisScheduler, SeriesService, SettingsService,
};
use crate::store::AnalysisStore;

const STAFF_ROLES: &[&str] = &["admin", "doctor"];
const ADMIN_ROLES: &[&str] = &["admin"];

#[derive(Clone)]
pub struct AnalysisState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn AnalysisStore>,
}

impl AnalysisState {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn AnalysisStore>) -> Self {
        Self { config, store }
    }
}

// ==============================================================================
// SERIES HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_series(
    State(state): State<Arc<AnalysisState>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateSeriesRequest>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, STAFF_ROLES)?;

    let service = SeriesService::new(state.store.clone());
    let series = service.create(request, &user.actor(), Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "series": series,
        "message": "Recurring analysis series created"
    })))
}

#[axum::debug_handler]
pub async fn list_active_series(
    State(state): State<Arc<AnalysisState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, STAFF_ROLES)?;

    let series = SeriesService::new(state.store.clone()).list_active().await?;

    Ok(Json(json!({
        "series": series,
        "total": series.len()
    })))
}

#[axum::debug_handler]
pub async fn get_series(
    State(state): State<Arc<AnalysisState>>,
    Path(series_id): Path<Uuid>,
    Extension(_user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let service = SeriesService::new(state.store.clone());
    let series = service.get(series_id).await?;
    let occurrences = service.occurrences(series_id).await?;

    Ok(Json(json!({
        "series": series,
        "occurrences": occurrences
    })))
}

#[axum::debug_handler]
pub async fn delete_series(
    State(state): State<Arc<AnalysisState>>,
    Path(series_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, STAFF_ROLES)?;

    let service = SeriesService::new(state.store.clone());
    let removed = service.delete(series_id, &user.actor(), Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "occurrences_removed": removed,
        "message": "Recurring analysis series deleted"
    })))
}

#[axum::debug_handler]
pub async fn deactivate_series(
    State(state): State<Arc<AnalysisState>>,
    Path(series_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, STAFF_ROLES)?;

    let service = SeriesService::new(state.store.clone());
    let series = service.deactivate(series_id, &user.actor(), Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "series": series
    })))
}

#[axum::debug_handler]
pub async fn schedule_series(
    State(state): State<Arc<AnalysisState>>,
    Path(series_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, STAFF_ROLES)?;

    let settings = SettingsService::new(state.store.clone()).load_snapshot().await?;
    let scheduler = RecurringAnalysisScheduler::new(state.store.clone());
    let outcome = scheduler.schedule_series(series_id, Utc::now(), &settings).await?;

    Ok(Json(json!({
        "series_id": series_id,
        "result": outcome
    })))
}

#[axum::debug_handler]
pub async fn list_series_prescriptions(
    State(state): State<Arc<AnalysisState>>,
    Path(series_id): Path<Uuid>,
    Extension(_user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    SeriesService::new(state.store.clone()).get(series_id).await?;

    let service = PrescriptionService::new(state.store.clone());
    let prescriptions = service.list_for_series(series_id, Utc::now()).await?;

    Ok(Json(json!({
        "prescriptions": prescriptions,
        "total": prescriptions.len()
    })))
}

// ==============================================================================
// PRESCRIPTION HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn submit_prescription(
    State(state): State<Arc<AnalysisState>>,
    Extension(user): Extension<User>,
    Json(request): Json<SubmitPrescriptionRequest>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, STAFF_ROLES)?;

    let service = PrescriptionService::new(state.store.clone());
    let prescription = service.submit(request, &user.actor(), Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "prescription": prescription,
        "message": "Prescription accepted"
    })))
}

#[axum::debug_handler]
pub async fn get_prescription(
    State(state): State<Arc<AnalysisState>>,
    Path(prescription_id): Path<Uuid>,
    Extension(_user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let service = PrescriptionService::new(state.store.clone());
    let prescription = service.get(prescription_id, Utc::now()).await?;

    Ok(Json(json!({ "prescription": prescription })))
}

#[axum::debug_handler]
pub async fn verify_prescription(
    State(state): State<Arc<AnalysisState>>,
    Path(prescription_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, STAFF_ROLES)?;

    let service = PrescriptionService::new(state.store.clone());
    let prescription = service.verify(prescription_id, &user.actor(), Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "prescription": prescription
    })))
}

#[axum::debug_handler]
pub async fn cancel_prescription(
    State(state): State<Arc<AnalysisState>>,
    Path(prescription_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, STAFF_ROLES)?;

    let service = PrescriptionService::new(state.store.clone());
    let prescription = service
        .cancel(prescription_id, &user.actor(), request.reason, Utc::now())
        .await?;

    Ok(Json(json!({
        "success": true,
        "prescription": prescription,
        "message": "Prescription cancelled"
    })))
}

// ==============================================================================
// OCCURRENCE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_occurrence(
    State(state): State<Arc<AnalysisState>>,
    Path(analysis_id): Path<Uuid>,
    Extension(_user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let service = OccurrenceLifecycleService::new(state.store.clone());
    let occurrence = service.get(analysis_id).await?;
    let valid_transitions = OccurrenceLifecycleService::get_valid_transitions(occurrence.status);

    Ok(Json(json!({
        "analysis": occurrence,
        "valid_transitions": valid_transitions
    })))
}

#[axum::debug_handler]
pub async fn complete_occurrence(
    State(state): State<Arc<AnalysisState>>,
    Path(analysis_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, STAFF_ROLES)?;

    let service = OccurrenceLifecycleService::new(state.store.clone());
    let occurrence = service.complete(analysis_id, &user.actor(), Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "analysis": occurrence
    })))
}

#[axum::debug_handler]
pub async fn cancel_occurrence(
    State(state): State<Arc<AnalysisState>>,
    Path(analysis_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, STAFF_ROLES)?;

    let service = OccurrenceLifecycleService::new(state.store.clone());
    let occurrence = service
        .cancel(analysis_id, &user.actor(), request.reason, Utc::now())
        .await?;

    Ok(Json(json!({
        "success": true,
        "analysis": occurrence
    })))
}

// ==============================================================================
// NOTIFICATIONS AND JOB TRIGGERS
// ==============================================================================

#[axum::debug_handler]
pub async fn list_notifications(
    State(state): State<Arc<AnalysisState>>,
    Query(query): Query<NotificationQuery>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, STAFF_ROLES)?;

    let service = NotificationService::new(state.store.clone());
    let notifications = service.list(query.unread_only.unwrap_or(false)).await?;

    Ok(Json(json!({
        "notifications": notifications,
        "total": notifications.len()
    })))
}

#[axum::debug_handler]
pub async fn run_scheduler(
    State(state): State<Arc<AnalysisState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, ADMIN_ROLES)?;

    let settings = SettingsService::new(state.store.clone()).load_snapshot().await?;
    let scheduler = RecurringAnalysisScheduler::new(state.store.clone());
    let report = scheduler.run(Utc::now(), &settings).await?;

    Ok(Json(json!({
        "success": report.failures.is_empty(),
        "report": report
    })))
}

#[axum::debug_handler]
pub async fn run_archival(
    State(state): State<Arc<AnalysisState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, ADMIN_ROLES)?;

    let settings = SettingsService::new(state.store.clone()).load_snapshot().await?;
    let job = ArchivalJob::new(state.store.clone());
    let report = job.run(Utc::now(), &settings).await?;

    Ok(Json(json!({
        "success": !report.is_partial(),
        "report": report
    })))
}
