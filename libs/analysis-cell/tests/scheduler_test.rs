// libs/analysis-cell/tests/scheduler_test.rs
//
// Scheduling passes against the in-memory store: occurrence materialization,
// prescription consumption, notifications and optimistic commits.

mod common;

use assert_matches::assert_matches;
use uuid::Uuid;

use analysis_cell::error::AnalysisError;
use analysis_cell::models::{
    AnalysisStatus, NotificationType, PrescriptionStatus, RecurrencePattern, SeriesOutcome,
};
use analysis_cell::services::{
    evaluate_series, PrescriptionService, RecurringAnalysisScheduler, SchedulingDecision,
    SettingsSnapshot,
};

use common::{at, date, TestSetup, STAFF};

// ==============================================================================
// PRESCRIPTION CONSUMPTION
// ==============================================================================

#[tokio::test]
async fn test_last_remaining_analysis_exhausts_prescription() {
    let setup = TestSetup::new();
    let series = setup
        .create_series(RecurrencePattern::Weekly, None, 3, date(2024, 1, 1))
        .await;
    let prescription = setup
        .submit_prescription(series.id, date(2024, 1, 1), date(2024, 12, 31), 1, at(2023, 12, 20, 9))
        .await;

    let scheduler = RecurringAnalysisScheduler::new(setup.store.clone());
    let report = scheduler.run(at(2024, 1, 1, 6), &SettingsSnapshot::default()).await.unwrap();

    assert_eq!(report.series_examined, 1);
    assert_eq!(report.occurrences_created, 1);
    assert!(report.failures.is_empty());

    let occurrences = setup.store.list_occurrences_for_series(series.id).await.unwrap();
    assert_eq!(occurrences.len(), 1);
    assert_eq!(occurrences[0].occurrence_number, Some(1));
    assert_eq!(occurrences[0].status, AnalysisStatus::Scheduled);
    assert_eq!(occurrences[0].prescription_id, Some(prescription.id));

    let prescription = setup.prescription(prescription.id).await;
    assert_eq!(prescription.remaining_analyses, 0);
    assert_eq!(prescription.status, PrescriptionStatus::Exhausted);

    let series = setup.series(series.id).await;
    assert_eq!(series.completed_occurrences, 1);
    assert_eq!(series.next_due_date, Some(date(2024, 1, 8)));
    assert_eq!(series.last_scheduled_date, Some(at(2024, 1, 1, 6)));
    assert!(series.is_active);

    // Next period has nothing left to consume.
    let report = scheduler.run(at(2024, 1, 8, 6), &SettingsSnapshot::default()).await.unwrap();
    assert_eq!(report.occurrences_created, 0);
    assert_eq!(report.pending_authorization, 1);
    assert_eq!(setup.store.list_occurrences_for_series(series.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_weekly_series_runs_to_completion() {
    let setup = TestSetup::new();
    let series = setup
        .create_series(RecurrencePattern::Weekly, None, 3, date(2024, 1, 1))
        .await;
    let prescription = setup
        .submit_prescription(series.id, date(2024, 1, 1), date(2024, 3, 31), 3, at(2023, 12, 20, 9))
        .await;

    let scheduler = RecurringAnalysisScheduler::new(setup.store.clone());
    let settings = SettingsSnapshot::default();

    for day in [1, 8, 15] {
        let report = scheduler.run(at(2024, 1, day, 7), &settings).await.unwrap();
        assert_eq!(report.occurrences_created, 1, "run on 2024-01-{:02}", day);
    }

    let series = setup.series(series.id).await;
    assert_eq!(series.completed_occurrences, 3);
    assert!(!series.is_active);
    assert_eq!(series.next_due_date, None);

    let dates: Vec<_> = setup
        .store
        .list_occurrences_for_series(series.id)
        .await
        .unwrap()
        .into_iter()
        .map(|o| (o.occurrence_number, o.analysis_date))
        .collect();
    assert_eq!(
        dates,
        vec![
            (Some(1), date(2024, 1, 1)),
            (Some(2), date(2024, 1, 8)),
            (Some(3), date(2024, 1, 15)),
        ]
    );

    let prescription = setup.prescription(prescription.id).await;
    assert_eq!(prescription.remaining_analyses, 0);

    // A terminal series is no longer examined.
    let report = scheduler.run(at(2024, 1, 22, 7), &settings).await.unwrap();
    assert_eq!(report.series_examined, 0);
    assert_eq!(report.occurrences_created, 0);
}

#[tokio::test]
async fn test_missed_periods_catch_up_one_per_run() {
    let setup = TestSetup::new();
    let series = setup
        .create_series(RecurrencePattern::Daily, None, 5, date(2024, 1, 1))
        .await;
    setup
        .submit_prescription(series.id, date(2024, 1, 1), date(2024, 1, 31), 5, at(2023, 12, 20, 9))
        .await;

    let scheduler = RecurringAnalysisScheduler::new(setup.store.clone());
    let now = at(2024, 1, 4, 7);

    for expected in 1..=4 {
        scheduler.run(now, &SettingsSnapshot::default()).await.unwrap();
        assert_eq!(setup.series(series.id).await.completed_occurrences, expected);
    }

    // Caught up: the fifth is due tomorrow.
    let report = scheduler.run(now, &SettingsSnapshot::default()).await.unwrap();
    assert_eq!(report.occurrences_created, 0);
    assert_eq!(setup.series(series.id).await.next_due_date, Some(date(2024, 1, 5)));
}

// ==============================================================================
// AUTHORIZATION AND NOTIFICATIONS
// ==============================================================================

#[tokio::test]
async fn test_due_series_without_prescription_notifies_once() {
    let setup = TestSetup::new();
    let series = setup
        .create_series(RecurrencePattern::Weekly, None, 3, date(2024, 1, 1))
        .await;

    let scheduler = RecurringAnalysisScheduler::new(setup.store.clone());
    let settings = SettingsSnapshot::default();

    let first = scheduler.schedule_series(series.id, at(2024, 1, 1, 6), &settings).await.unwrap();
    assert_eq!(first, SeriesOutcome::PendingAuthorization { due_date: date(2024, 1, 1), notified: true });

    let again = scheduler.schedule_series(series.id, at(2024, 1, 1, 18), &settings).await.unwrap();
    assert_eq!(again, SeriesOutcome::PendingAuthorization { due_date: date(2024, 1, 1), notified: false });

    let report = scheduler.run(at(2024, 1, 2, 6), &settings).await.unwrap();
    assert_eq!(report.pending_authorization, 1);

    assert!(setup.store.list_occurrences_for_series(series.id).await.unwrap().is_empty());

    let notifications = setup.store.list_notifications(false).await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].notification_type, NotificationType::PrescriptionVerification);
    assert_eq!(notifications[0].recurring_analysis_id, Some(series.id));
    assert_eq!(notifications[0].due_date, Some(date(2024, 1, 1)));

    let series = setup.series(series.id).await;
    assert_eq!(series.completed_occurrences, 0);
    assert_eq!(series.next_due_date, Some(date(2024, 1, 1)));
}

#[tokio::test]
async fn test_expired_prescription_is_recomputed_and_not_used() {
    let setup = TestSetup::new();
    let series = setup
        .create_series(RecurrencePattern::Weekly, None, 3, date(2024, 1, 8))
        .await;
    let prescription = setup
        .submit_prescription(series.id, date(2024, 1, 1), date(2024, 1, 5), 3, at(2024, 1, 1, 9))
        .await;

    let scheduler = RecurringAnalysisScheduler::new(setup.store.clone());
    let outcome = scheduler
        .schedule_series(series.id, at(2024, 1, 8, 6), &SettingsSnapshot::default())
        .await
        .unwrap();

    assert_matches!(outcome, SeriesOutcome::PendingAuthorization { .. });
    let prescription = setup.prescription(prescription.id).await;
    assert_eq!(prescription.status, PrescriptionStatus::Expired);
    assert_eq!(prescription.remaining_analyses, 3);
}

#[tokio::test]
async fn test_most_recently_verified_prescription_is_consumed() {
    let setup = TestSetup::new();
    let series = setup
        .create_series(RecurrencePattern::Weekly, None, 3, date(2024, 1, 1))
        .await;
    let older = setup
        .submit_prescription(series.id, date(2024, 1, 1), date(2024, 6, 30), 2, at(2023, 12, 1, 9))
        .await;
    let newer = setup
        .submit_prescription(series.id, date(2024, 1, 1), date(2024, 6, 30), 2, at(2023, 12, 10, 9))
        .await;

    let prescriptions = PrescriptionService::new(setup.store.clone());
    prescriptions.verify(older.id, STAFF, at(2023, 12, 15, 9)).await.unwrap();

    let scheduler = RecurringAnalysisScheduler::new(setup.store.clone());
    let outcome = scheduler
        .schedule_series(series.id, at(2024, 1, 1, 6), &SettingsSnapshot::default())
        .await
        .unwrap();

    let used = assert_matches!(outcome, SeriesOutcome::Scheduled { prescription_id, .. } => prescription_id);
    assert_eq!(used, older.id);
    assert_eq!(setup.prescription(older.id).await.remaining_analyses, 1);
    assert_eq!(setup.prescription(newer.id).await.remaining_analyses, 2);
}

#[tokio::test]
async fn test_upcoming_due_reminder_within_lead_time() {
    let setup = TestSetup::new();
    let series = setup
        .create_series(RecurrencePattern::Weekly, None, 3, date(2024, 1, 2))
        .await;

    let scheduler = RecurringAnalysisScheduler::new(setup.store.clone());
    let settings = SettingsSnapshot::default();

    let report = scheduler.run(at(2024, 1, 1, 12), &settings).await.unwrap();
    assert_eq!(report.reminders_sent, 1);

    let report = scheduler.run(at(2024, 1, 1, 13), &settings).await.unwrap();
    assert_eq!(report.reminders_sent, 0);

    let notifications = setup.store.list_notifications(true).await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].notification_type, NotificationType::RecurringAnalysisDue);
    assert_eq!(notifications[0].recurring_analysis_id, Some(series.id));
}

#[tokio::test]
async fn test_reminders_disabled_by_setting() {
    let setup = TestSetup::new();
    setup
        .create_series(RecurrencePattern::Weekly, None, 3, date(2024, 1, 2))
        .await;

    let settings = SettingsSnapshot {
        prescription_notification_enabled: false,
        ..SettingsSnapshot::default()
    };
    let report = RecurringAnalysisScheduler::new(setup.store.clone())
        .run(at(2024, 1, 1, 12), &settings)
        .await
        .unwrap();

    assert_eq!(report.reminders_sent, 0);
    assert!(setup.store.list_notifications(false).await.unwrap().is_empty());
}

// ==============================================================================
// CONCURRENCY
// ==============================================================================

#[tokio::test]
async fn test_concurrent_schedulers_consume_once() {
    let setup = TestSetup::new();
    let series = setup
        .create_series(RecurrencePattern::Daily, None, 5, date(2024, 1, 1))
        .await;
    let prescription = setup
        .submit_prescription(series.id, date(2024, 1, 1), date(2024, 1, 31), 1, at(2023, 12, 20, 9))
        .await;

    let first = RecurringAnalysisScheduler::new(setup.store.clone());
    let second = RecurringAnalysisScheduler::new(setup.store.clone());
    let settings = SettingsSnapshot::default();
    let now = at(2024, 1, 1, 6);

    let (a, b) = futures::join!(first.run(now, &settings), second.run(now, &settings));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.occurrences_created + b.occurrences_created, 1);
    assert!(a.failures.is_empty() && b.failures.is_empty());
    assert_eq!(setup.store.list_occurrences_for_series(series.id).await.unwrap().len(), 1);

    let prescription = setup.prescription(prescription.id).await;
    assert_eq!(prescription.remaining_analyses, 0);
    assert_eq!(setup.series(series.id).await.completed_occurrences, 1);
}

#[tokio::test]
async fn test_stale_commit_is_rejected() {
    let setup = TestSetup::new();
    let series = setup
        .create_series(RecurrencePattern::Daily, None, 5, date(2024, 1, 1))
        .await;
    setup
        .submit_prescription(series.id, date(2024, 1, 1), date(2024, 1, 31), 3, at(2023, 12, 20, 9))
        .await;

    let now = at(2024, 1, 1, 6);
    let settings = SettingsSnapshot::default();

    // Decision taken from a snapshot, then someone else schedules first.
    let snapshot = setup.series(series.id).await;
    let prescriptions = setup.store.list_prescriptions_for_series(series.id).await.unwrap();
    let stale = assert_matches!(
        evaluate_series(&snapshot, &prescriptions, now, &settings).unwrap(),
        SchedulingDecision::Materialize(commit) => commit
    );

    RecurringAnalysisScheduler::new(setup.store.clone())
        .schedule_series(series.id, now, &settings)
        .await
        .unwrap();

    let result = setup.store.commit_occurrence(&stale).await;
    assert_matches!(result, Err(AnalysisError::ConcurrencyConflict(_)));
    assert_eq!(setup.store.list_occurrences_for_series(series.id).await.unwrap().len(), 1);
    assert_eq!(setup.series(series.id).await.completed_occurrences, 1);
}

#[tokio::test]
async fn test_counters_stay_within_bounds() {
    let setup = TestSetup::new();
    let series = setup
        .create_series(RecurrencePattern::Custom, Some(2), 4, date(2024, 1, 1))
        .await;
    let prescription = setup
        .submit_prescription(series.id, date(2024, 1, 1), date(2024, 12, 31), 10, at(2023, 12, 20, 9))
        .await;

    let scheduler = RecurringAnalysisScheduler::new(setup.store.clone());
    for _ in 0..10 {
        scheduler.run(at(2024, 2, 1, 6), &SettingsSnapshot::default()).await.unwrap();
    }

    let series = setup.series(series.id).await;
    assert_eq!(series.completed_occurrences, series.total_occurrences);
    assert!(!series.is_active);

    let prescription = setup.prescription(prescription.id).await;
    assert_eq!(prescription.remaining_analyses, 6);
    assert!(prescription.remaining_analyses >= 0);
}

#[tokio::test]
async fn test_schedule_unknown_series() {
    let setup = TestSetup::new();
    let result = RecurringAnalysisScheduler::new(setup.store.clone())
        .schedule_series(Uuid::new_v4(), at(2024, 1, 1, 6), &SettingsSnapshot::default())
        .await;

    assert_matches!(result, Err(AnalysisError::NotFound { .. }));
}

#[tokio::test]
async fn test_every_created_occurrence_is_audited() {
    let setup = TestSetup::new();
    let series = setup
        .create_series(RecurrencePattern::Weekly, None, 2, date(2024, 1, 1))
        .await;
    setup
        .submit_prescription(series.id, date(2024, 1, 1), date(2024, 12, 31), 2, at(2023, 12, 20, 9))
        .await;

    let outcome = RecurringAnalysisScheduler::new(setup.store.clone())
        .schedule_series(series.id, at(2024, 1, 1, 6), &SettingsSnapshot::default())
        .await
        .unwrap();
    let occurrence_id = assert_matches!(outcome, SeriesOutcome::Scheduled { occurrence_id, .. } => occurrence_id);

    let entries = setup.store.list_audit_entries(Some(occurrence_id)).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "analysis.create");
    assert_eq!(entries[0].actor, "system:scheduler");
}
