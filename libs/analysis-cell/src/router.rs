// libs/analysis-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, AnalysisState};

pub fn analysis_routes(state: Arc<AnalysisState>) -> Router {
    // Every analysis operation requires authentication
    let protected_routes = Router::new()
        // Series management
        .route("/series", get(handlers::list_active_series).post(handlers::create_series))
        .route("/series/{series_id}", get(handlers::get_series).delete(handlers::delete_series))
        .route("/series/{series_id}/deactivate", post(handlers::deactivate_series))
        .route("/series/{series_id}/schedule", post(handlers::schedule_series))
        .route("/series/{series_id}/prescriptions", get(handlers::list_series_prescriptions))

        // Prescriptions
        .route("/prescriptions", post(handlers::submit_prescription))
        .route("/prescriptions/{prescription_id}", get(handlers::get_prescription))
        .route("/prescriptions/{prescription_id}/verify", post(handlers::verify_prescription))
        .route("/prescriptions/{prescription_id}/cancel", post(handlers::cancel_prescription))

        // Occurrences
        .route("/occurrences/{analysis_id}", get(handlers::get_occurrence))
        .route("/occurrences/{analysis_id}/complete", post(handlers::complete_occurrence))
        .route("/occurrences/{analysis_id}/cancel", post(handlers::cancel_occurrence))

        .route("/notifications", get(handlers::list_notifications))

        // Job triggers (admin only)
        .route("/jobs/scheduler/run", post(handlers::run_scheduler))
        .route("/jobs/archival/run", post(handlers::run_archival))

        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
