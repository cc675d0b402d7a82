// libs/analysis-cell/tests/archival_test.rs

mod common;

use analysis_cell::models::{AnalysisStatus, OrganizationSetting, SettingValueType};
use analysis_cell::services::settings::{AUTO_ARCHIVE_ENABLED, CANCELLED_ANALYSIS_ARCHIVE_DELAY};
use analysis_cell::services::{ArchivalJob, SettingsService, SettingsSnapshot};

use common::{at, date, TestSetup};

fn with_delay(days: i64) -> SettingsSnapshot {
    SettingsSnapshot {
        cancelled_analysis_archive_delay_days: days,
        ..SettingsSnapshot::default()
    }
}

#[tokio::test]
async fn test_completed_yesterday_is_archived_once() {
    let setup = TestSetup::new();
    let yesterday = setup
        .put_occurrence(AnalysisStatus::Completed, date(2024, 5, 9), at(2024, 5, 9, 15))
        .await;
    let today = setup
        .put_occurrence(AnalysisStatus::Completed, date(2024, 5, 10), at(2024, 5, 10, 8))
        .await;

    let job = ArchivalJob::new(setup.store.clone());
    let now = at(2024, 5, 10, 9);

    let report = job.run(now, &SettingsSnapshot::default()).await.unwrap();
    assert!(!report.skipped);
    assert_eq!(report.candidates, 1);
    assert_eq!(report.archived_count, 1);
    assert!(!report.is_partial());

    assert!(setup.store.get_occurrence(yesterday.id).await.unwrap().is_none());
    assert!(setup.store.get_occurrence(today.id).await.unwrap().is_some());

    let archived = setup.store.get_archived(yesterday.id).await.unwrap().unwrap();
    assert_eq!(archived.final_status, AnalysisStatus::Completed);
    assert_eq!(archived.archived_at, now);

    // Nothing left to do: a no-op, not an error.
    let rerun = job.run(now, &SettingsSnapshot::default()).await.unwrap();
    assert_eq!(rerun.candidates, 0);
    assert_eq!(rerun.archived_count, 0);
    assert_eq!(setup.memory.archived_count().await, 1);
}

#[tokio::test]
async fn test_cancelled_archive_respects_delay() {
    let now = at(2024, 5, 10, 9);

    let setup = TestSetup::new();
    let cancelled = setup
        .put_occurrence(AnalysisStatus::Cancelled, date(2024, 5, 20), at(2024, 5, 8, 10))
        .await;
    let report = ArchivalJob::new(setup.store.clone()).run(now, &with_delay(3)).await.unwrap();
    assert_eq!(report.archived_count, 0);
    assert!(setup.store.get_occurrence(cancelled.id).await.unwrap().is_some());

    let report = ArchivalJob::new(setup.store.clone()).run(now, &with_delay(1)).await.unwrap();
    assert_eq!(report.archived_count, 1);
    let archived = setup.store.get_archived(cancelled.id).await.unwrap().unwrap();
    assert_eq!(archived.final_status, AnalysisStatus::Cancelled);
}

#[tokio::test]
async fn test_scheduled_rows_are_never_archived() {
    let setup = TestSetup::new();
    setup
        .put_occurrence(AnalysisStatus::Scheduled, date(2023, 1, 1), at(2023, 1, 1, 9))
        .await;

    let report = ArchivalJob::new(setup.store.clone())
        .run(at(2024, 5, 10, 9), &with_delay(0))
        .await
        .unwrap();

    assert_eq!(report.candidates, 0);
    assert_eq!(setup.memory.live_occurrence_count().await, 1);
}

#[tokio::test]
async fn test_archive_denormalizes_display_names() {
    let setup = TestSetup::new();
    let occurrence = setup
        .put_occurrence(AnalysisStatus::Completed, date(2024, 5, 1), at(2024, 5, 1, 12))
        .await;
    setup.memory.register_patient(occurrence.patient_id, "Ana Lima").await;
    if let Some(doctor_id) = occurrence.doctor_id {
        setup.memory.register_doctor(doctor_id, "Rui Costa").await;
    }
    if let Some(room_id) = occurrence.room_id {
        setup.memory.register_room(room_id, "Lab 2").await;
    }

    ArchivalJob::new(setup.store.clone())
        .run(at(2024, 5, 10, 9), &SettingsSnapshot::default())
        .await
        .unwrap();

    let archived = setup.store.get_archived(occurrence.id).await.unwrap().unwrap();
    assert_eq!(archived.patient_name.as_deref(), Some("Ana Lima"));
    assert_eq!(archived.doctor_name.as_deref(), Some("Rui Costa"));
    assert_eq!(archived.room_name.as_deref(), Some("Lab 2"));
    assert_eq!(archived.analysis_date, occurrence.analysis_date);
    assert_eq!(archived.created_at, occurrence.created_at);

    let entries = setup.store.list_audit_entries(Some(occurrence.id)).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "analysis.archive");
    assert_eq!(entries[0].actor, "system:archival");
}

#[tokio::test]
async fn test_failed_row_does_not_stop_the_batch() {
    let setup = TestSetup::new();
    let broken = setup
        .put_occurrence(AnalysisStatus::Completed, date(2024, 5, 1), at(2024, 5, 1, 12))
        .await;
    let fine = setup
        .put_occurrence(AnalysisStatus::Completed, date(2024, 5, 2), at(2024, 5, 2, 12))
        .await;
    setup.memory.fail_archival_for(broken.id).await;

    let report = ArchivalJob::new(setup.store.clone())
        .run(at(2024, 5, 10, 9), &SettingsSnapshot::default())
        .await
        .unwrap();

    assert!(report.is_partial());
    assert_eq!(report.candidates, 2);
    assert_eq!(report.archived_count, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].analysis_id, broken.id);

    // The failed row is untouched, not half-archived.
    assert!(setup.store.get_occurrence(broken.id).await.unwrap().is_some());
    assert!(setup.store.get_archived(broken.id).await.unwrap().is_none());
    assert!(setup.store.get_archived(fine.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_disabled_setting_skips_run() {
    let setup = TestSetup::new();
    setup
        .put_occurrence(AnalysisStatus::Completed, date(2024, 5, 1), at(2024, 5, 1, 12))
        .await;
    setup
        .memory
        .put_setting(OrganizationSetting::new(AUTO_ARCHIVE_ENABLED, "false", SettingValueType::Boolean))
        .await;
    setup
        .memory
        .put_setting(OrganizationSetting::new(CANCELLED_ANALYSIS_ARCHIVE_DELAY, "5", SettingValueType::Integer))
        .await;

    let settings = SettingsService::new(setup.store.clone()).load_snapshot().await.unwrap();
    assert!(!settings.auto_archive_enabled);
    assert_eq!(settings.cancelled_analysis_archive_delay_days, 5);

    let report = ArchivalJob::new(setup.store.clone())
        .run(at(2024, 5, 10, 9), &settings)
        .await
        .unwrap();

    assert!(report.skipped);
    assert_eq!(report.archived_count, 0);
    assert_eq!(setup.memory.live_occurrence_count().await, 1);
}
