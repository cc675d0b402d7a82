pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod store;

pub use error::AnalysisError;
pub use handlers::AnalysisState;
pub use models::*;
pub use router::analysis_routes;
pub use services::{AnalysisJobRunner, SettingsSnapshot};
pub use store::{AnalysisStore, InMemoryAnalysisStore, SupabaseAnalysisStore};
