// libs/analysis-cell/src/services/notification.rs
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AnalysisError;
use crate::models::{Notification, NotificationType, RecurringAnalysisSeries};
use crate::store::AnalysisStore;

pub struct NotificationService {
    store: Arc<dyn AnalysisStore>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn AnalysisStore>) -> Self {
        Self { store }
    }

    /// Key shared by every notification about the same series, type and
    /// due date; the store keeps only the first one.
    pub fn dedupe_key(kind: NotificationType, series_id: Uuid, due_date: NaiveDate) -> String {
        format!("{}:{}:{}", kind, series_id, due_date)
    }

    /// The series is due but nothing authorizes the next occurrence.
    pub async fn notify_prescription_required(
        &self,
        series: &RecurringAnalysisSeries,
        due_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<bool, AnalysisError> {
        let notification = Notification {
            id: Uuid::new_v4(),
            notification_type: NotificationType::PrescriptionVerification,
            patient_id: series.patient_id,
            recurring_analysis_id: Some(series.id),
            title: "Prescription required".to_string(),
            message: format!(
                "Occurrence {} of {} for the {} series was due on {} but no valid prescription authorizes it",
                series.completed_occurrences + 1,
                series.total_occurrences,
                series.analysis_type,
                due_date
            ),
            due_date: Some(due_date),
            dedupe_key: Self::dedupe_key(NotificationType::PrescriptionVerification, series.id, due_date),
            is_read: false,
            created_at: now,
        };

        self.raise(notification).await
    }

    /// The series will be due within the configured lead time.
    pub async fn notify_upcoming_due(
        &self,
        series: &RecurringAnalysisSeries,
        due_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<bool, AnalysisError> {
        let notification = Notification {
            id: Uuid::new_v4(),
            notification_type: NotificationType::RecurringAnalysisDue,
            patient_id: series.patient_id,
            recurring_analysis_id: Some(series.id),
            title: "Recurring analysis due soon".to_string(),
            message: format!(
                "The {} analysis (occurrence {} of {}) is due on {}",
                series.analysis_type,
                series.completed_occurrences + 1,
                series.total_occurrences,
                due_date
            ),
            due_date: Some(due_date),
            dedupe_key: Self::dedupe_key(NotificationType::RecurringAnalysisDue, series.id, due_date),
            is_read: false,
            created_at: now,
        };

        self.raise(notification).await
    }

    async fn raise(&self, notification: Notification) -> Result<bool, AnalysisError> {
        let inserted = self.store.insert_notification(&notification).await?;
        if inserted {
            info!(
                notification_type = %notification.notification_type,
                series_id = ?notification.recurring_analysis_id,
                due_date = ?notification.due_date,
                "Notification raised"
            );
        } else {
            debug!(dedupe_key = %notification.dedupe_key, "Notification already raised");
        }
        Ok(inserted)
    }

    pub async fn list(&self, unread_only: bool) -> Result<Vec<Notification>, AnalysisError> {
        self.store.list_notifications(unread_only).await
    }
}
