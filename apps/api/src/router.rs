use std::sync::Arc;

use axum::{routing::get, Router};

use analysis_cell::{analysis_routes, AnalysisState};

pub fn create_router(state: Arc<AnalysisState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic analysis API is running!" }))
        .nest("/analyses", analysis_routes(state))
}
