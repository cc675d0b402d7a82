// =====================================================================================
// RECURRING ANALYSIS SCHEDULER - MATERIALIZES DUE OCCURRENCES
// =====================================================================================
//
// Each pass looks at every active series once. A due series consumes one
// analysis from its authorizing prescription and produces exactly one
// occurrence; missed periods are caught up on later passes. The decision
// is computed from a snapshot and committed through the store with
// optimistic checks on the counters it was based on.

use std::sync::Arc;

use chrono::{DateTime, Days, Months, NaiveDate, NaiveTime, Utc};
use tracing::{debug, error, info, warn, instrument};
use uuid::Uuid;

use crate::error::AnalysisError;
use crate::models::{
    AnalysisOccurrence, AnalysisStatus, AuditLogEntry, Prescription, RecurrencePattern,
    RecurringAnalysisSeries, SchedulerReport, SeriesFailure, SeriesOutcome,
};
use crate::services::audit::{AuditService, SCHEDULER_ACTOR};
use crate::services::notification::NotificationService;
use crate::services::prescription::PrescriptionService;
use crate::services::settings::SettingsSnapshot;
use crate::store::{AnalysisStore, OccurrenceCommit};

// ==============================================================================
// PURE SCHEDULING LOGIC
// ==============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulingDecision {
    /// Inactive or all occurrences produced.
    Terminal,
    NotDue {
        next_due_date: Option<NaiveDate>,
        send_reminder: bool,
    },
    /// Due, but no prescription authorizes it.
    Unauthorized { due_date: NaiveDate },
    Materialize(Box<OccurrenceCommit>),
}

/// Next due date after `date`. Monthly steps clamp to the last day of the
/// target month. `None` when the result is out of range or a custom
/// interval is not positive.
pub fn advance_due_date(
    date: NaiveDate,
    pattern: RecurrencePattern,
    interval_days: i32,
) -> Option<NaiveDate> {
    match pattern {
        RecurrencePattern::Daily => date.checked_add_days(Days::new(1)),
        RecurrencePattern::Weekly => date.checked_add_days(Days::new(7)),
        RecurrencePattern::Monthly => date.checked_add_months(Months::new(1)),
        RecurrencePattern::Custom => {
            if interval_days < 1 {
                return None;
            }
            date.checked_add_days(Days::new(interval_days as u64))
        }
    }
}

/// Decides what one pass does with `series`, given the prescriptions on
/// file for it. Touches nothing.
pub fn evaluate_series(
    series: &RecurringAnalysisSeries,
    prescriptions: &[Prescription],
    now: DateTime<Utc>,
    settings: &SettingsSnapshot,
) -> Result<SchedulingDecision, AnalysisError> {
    if series.is_terminal() {
        return Ok(SchedulingDecision::Terminal);
    }

    let today = now.date_naive();
    let due_date = match series.next_due_date {
        Some(due) => due,
        None => {
            return Ok(SchedulingDecision::NotDue {
                next_due_date: None,
                send_reminder: false,
            })
        }
    };

    if due_date > today {
        let due_at = due_date.and_time(NaiveTime::MIN).and_utc();
        let send_reminder = settings.prescription_notification_enabled
            && now
                .checked_add_signed(settings.notification_lead_time())
                .map_or(true, |limit| due_at <= limit);
        return Ok(SchedulingDecision::NotDue {
            next_due_date: Some(due_date),
            send_reminder,
        });
    }

    let prescription = match PrescriptionService::select_authorizing(prescriptions, today) {
        Some(p) => p,
        None => return Ok(SchedulingDecision::Unauthorized { due_date }),
    };

    let occurrence_number = series.completed_occurrences + 1;

    let occurrence = AnalysisOccurrence {
        id: Uuid::new_v4(),
        patient_id: series.patient_id,
        doctor_id: series.doctor_id,
        room_id: series.room_id,
        analysis_type: series.analysis_type,
        analysis_date: due_date,
        status: AnalysisStatus::Scheduled,
        recurring_analysis_id: Some(series.id),
        occurrence_number: Some(occurrence_number),
        prescription_id: Some(prescription.id),
        notes: series.notes.clone(),
        cancellation_reason: None,
        created_at: now,
        updated_at: now,
    };

    let mut next_series = series.clone();
    next_series.completed_occurrences = occurrence_number;
    next_series.last_scheduled_date = Some(now);
    next_series.updated_at = now;
    if occurrence_number >= series.total_occurrences {
        next_series.is_active = false;
        next_series.next_due_date = None;
    } else {
        let next_due = advance_due_date(due_date, series.recurrence_pattern, series.interval_days)
            .ok_or_else(|| {
                AnalysisError::Validation(format!(
                    "Cannot advance due date {} for series {} ({} / {} days)",
                    due_date, series.id, series.recurrence_pattern, series.interval_days
                ))
            })?;
        next_series.next_due_date = Some(next_due);
    }

    let mut next_prescription = prescription.clone();
    next_prescription.remaining_analyses -= 1;
    next_prescription.status = next_prescription.effective_status(today);
    next_prescription.updated_at = now;

    Ok(SchedulingDecision::Materialize(Box::new(OccurrenceCommit {
        occurrence,
        series: next_series,
        prescription: next_prescription,
        expected_completed_occurrences: series.completed_occurrences,
        expected_remaining_analyses: prescription.remaining_analyses,
    })))
}

// ==============================================================================
// SCHEDULER SERVICE
// ==============================================================================

pub struct RecurringAnalysisScheduler {
    store: Arc<dyn AnalysisStore>,
    prescriptions: PrescriptionService,
    notifications: NotificationService,
    audit: AuditService,
}

impl RecurringAnalysisScheduler {
    pub fn new(store: Arc<dyn AnalysisStore>) -> Self {
        Self {
            prescriptions: PrescriptionService::new(store.clone()),
            notifications: NotificationService::new(store.clone()),
            audit: AuditService::new(store.clone()),
            store,
        }
    }

    /// One pass over every active series. Failures are per series and
    /// never stop the pass.
    #[instrument(skip(self, settings))]
    pub async fn run(
        &self,
        now: DateTime<Utc>,
        settings: &SettingsSnapshot,
    ) -> Result<SchedulerReport, AnalysisError> {
        let active = self.store.list_active_series().await?;
        let mut report = SchedulerReport::default();

        info!(series = active.len(), "Starting recurring analysis scheduling pass");

        for series in active {
            report.series_examined += 1;
            let series_id = series.id;

            match self.process(series, now, settings, &mut report.conflicts_retried).await {
                Ok(SeriesOutcome::Scheduled { .. }) => report.occurrences_created += 1,
                Ok(SeriesOutcome::PendingAuthorization { .. }) => report.pending_authorization += 1,
                Ok(SeriesOutcome::NotDue { reminder_sent: true, .. }) => report.reminders_sent += 1,
                Ok(_) => {}
                Err(e) => {
                    if e.is_transient() {
                        warn!(series_id = %series_id, error = %e, "Series skipped this pass, will retry");
                    } else {
                        error!(series_id = %series_id, error = %e, "Failed to schedule series");
                    }
                    report.failures.push(SeriesFailure {
                        series_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            examined = report.series_examined,
            created = report.occurrences_created,
            pending = report.pending_authorization,
            reminders = report.reminders_sent,
            conflicts = report.conflicts_retried,
            failures = report.failures.len(),
            "Scheduling pass finished"
        );

        Ok(report)
    }

    /// Runs the scheduling step for a single series.
    #[instrument(skip(self, settings))]
    pub async fn schedule_series(
        &self,
        series_id: Uuid,
        now: DateTime<Utc>,
        settings: &SettingsSnapshot,
    ) -> Result<SeriesOutcome, AnalysisError> {
        let series = self.load_series(series_id).await?;
        let mut conflicts = 0;
        self.process(series, now, settings, &mut conflicts).await
    }

    async fn load_series(&self, series_id: Uuid) -> Result<RecurringAnalysisSeries, AnalysisError> {
        self.store
            .get_series(series_id)
            .await?
            .ok_or_else(|| AnalysisError::not_found("Recurring analysis series", series_id))
    }

    async fn process(
        &self,
        mut series: RecurringAnalysisSeries,
        now: DateTime<Utc>,
        settings: &SettingsSnapshot,
        conflicts: &mut usize,
    ) -> Result<SeriesOutcome, AnalysisError> {
        let mut retried = false;

        loop {
            let prescriptions = self.prescriptions.list_for_series(series.id, now).await?;

            match evaluate_series(&series, &prescriptions, now, settings)? {
                SchedulingDecision::Terminal => {
                    debug!(series_id = %series.id, "Series is terminal");
                    return Ok(SeriesOutcome::Terminal);
                }
                SchedulingDecision::NotDue { next_due_date, send_reminder } => {
                    let reminder_sent = match next_due_date {
                        Some(due) if send_reminder => {
                            self.notifications.notify_upcoming_due(&series, due, now).await?
                        }
                        _ => false,
                    };
                    return Ok(SeriesOutcome::NotDue { next_due_date, reminder_sent });
                }
                SchedulingDecision::Unauthorized { due_date } => {
                    warn!(
                        series_id = %series.id,
                        due_date = %due_date,
                        "Series is due but no prescription authorizes it"
                    );
                    let notified = self
                        .notifications
                        .notify_prescription_required(&series, due_date, now)
                        .await?;
                    return Ok(SeriesOutcome::PendingAuthorization { due_date, notified });
                }
                SchedulingDecision::Materialize(commit) => {
                    match self.store.commit_occurrence(&commit).await {
                        Ok(()) => {
                            self.record_created(&commit, now).await;
                            return Ok(SeriesOutcome::Scheduled {
                                occurrence_id: commit.occurrence.id,
                                occurrence_number: commit.series.completed_occurrences,
                                prescription_id: commit.prescription.id,
                            });
                        }
                        Err(AnalysisError::ConcurrencyConflict(reason)) if !retried => {
                            retried = true;
                            *conflicts += 1;
                            warn!(series_id = %series.id, %reason, "Commit conflicted, re-evaluating series");
                            series = self.load_series(series.id).await?;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    async fn record_created(&self, commit: &OccurrenceCommit, now: DateTime<Utc>) {
        info!(
            series_id = %commit.series.id,
            occurrence_id = %commit.occurrence.id,
            occurrence_number = commit.series.completed_occurrences,
            analysis_date = %commit.occurrence.analysis_date,
            prescription_remaining = commit.prescription.remaining_analyses,
            "Recurring analysis occurrence created"
        );

        self.audit
            .record(
                AuditLogEntry::new("analysis.create", "analysis", commit.occurrence.id, SCHEDULER_ACTOR)
                    .at(now)
                    .add_context("recurring_analysis_id", commit.series.id)
                    .add_context("occurrence_number", commit.series.completed_occurrences)
                    .add_context("prescription_id", commit.prescription.id)
                    .add_context("remaining_analyses", commit.prescription.remaining_analyses)
                    .add_context("next_due_date", commit.series.next_due_date),
            )
            .await;
    }
}
