pub mod archival;
pub mod audit;
pub mod lifecycle;
pub mod notification;
pub mod prescription;
pub mod runner;
pub mod scheduler;
pub mod series;
pub mod settings;

pub use archival::ArchivalJob;
pub use audit::AuditService;
pub use lifecycle::OccurrenceLifecycleService;
pub use notification::NotificationService;
pub use prescription::PrescriptionService;
pub use runner::AnalysisJobRunner;
pub use scheduler::{advance_due_date, evaluate_series, RecurringAnalysisScheduler, SchedulingDecision};
pub use series::SeriesService;
pub use settings::{SettingsService, SettingsSnapshot};
