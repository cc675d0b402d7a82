use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::{debug, error, info, warn, instrument};

use crate::error::AnalysisError;
use crate::models::{ArchivalReport, SchedulerReport};
use crate::services::archival::ArchivalJob;
use crate::services::scheduler::RecurringAnalysisScheduler;
use crate::services::settings::{SettingsService, SettingsSnapshot};
use crate::store::AnalysisStore;

/// Drives the scheduler and the archival job on timers until shut down.
pub struct AnalysisJobRunner {
    scheduler: RecurringAnalysisScheduler,
    archival: ArchivalJob,
    settings: SettingsService,
    scheduler_interval: Duration,
    is_shutdown: Arc<RwLock<bool>>,
}

impl AnalysisJobRunner {
    pub fn new(store: Arc<dyn AnalysisStore>, scheduler_interval: Duration) -> Self {
        Self {
            scheduler: RecurringAnalysisScheduler::new(store.clone()),
            archival: ArchivalJob::new(store.clone()),
            settings: SettingsService::new(store),
            scheduler_interval,
            is_shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Runs both loops and returns once `shutdown` has been called.
    #[instrument(skip(self))]
    pub async fn start(&self) {
        info!(
            scheduler_interval_secs = self.scheduler_interval.as_secs(),
            "Starting analysis job runner"
        );

        tokio::join!(self.scheduler_loop(), self.archival_loop());

        info!("Analysis job runner stopped");
    }

    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown for analysis job runner");
        let mut is_shutdown = self.is_shutdown.write().await;
        *is_shutdown = true;
    }

    pub async fn is_shutdown(&self) -> bool {
        *self.is_shutdown.read().await
    }

    pub async fn run_scheduler_once(&self) -> Result<SchedulerReport, AnalysisError> {
        let settings = self.load_settings().await;
        self.scheduler.run(Utc::now(), &settings).await
    }

    pub async fn run_archival_once(&self) -> Result<ArchivalReport, AnalysisError> {
        let settings = self.load_settings().await;
        self.archival.run(Utc::now(), &settings).await
    }

    async fn scheduler_loop(&self) {
        let mut interval = tokio::time::interval(self.scheduler_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.wait_for_shutdown() => break,
            }

            if let Err(e) = self.run_scheduler_once().await {
                error!(error = %e, "Scheduler pass failed");
            }
        }

        debug!("Scheduler loop exited");
    }

    async fn archival_loop(&self) {
        loop {
            if self.is_shutdown().await {
                break;
            }

            let settings = self.load_settings().await;
            if let Err(e) = self.archival.run(Utc::now(), &settings).await {
                error!(error = %e, "Archival run failed");
            }

            // The interval is a setting, so it is re-read every cycle.
            let wait = settings.archiving_interval();
            debug!(wait_secs = wait.as_secs(), "Next archival check scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.wait_for_shutdown() => break,
            }
        }

        debug!("Archival loop exited");
    }

    async fn load_settings(&self) -> SettingsSnapshot {
        match self.settings.load_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Failed to load organization settings, using defaults");
                SettingsSnapshot::default()
            }
        }
    }

    async fn wait_for_shutdown(&self) {
        loop {
            if self.is_shutdown().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
