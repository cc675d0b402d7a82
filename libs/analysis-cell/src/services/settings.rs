// libs/analysis-cell/src/services/settings.rs
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::AnalysisError;
use crate::models::{OrganizationSetting, SettingValueType};
use crate::store::AnalysisStore;

pub const AUTO_ARCHIVE_ENABLED: &str = "auto_archive_enabled";
pub const CANCELLED_ANALYSIS_ARCHIVE_DELAY: &str = "cancelled_analysis_archive_delay";
pub const ARCHIVING_CHECK_INTERVAL_MINUTES: &str = "archiving_check_interval_minutes";
pub const ARCHIVING_CHECK_INTERVAL_HOURS: &str = "archiving_check_interval_hours";
pub const PRESCRIPTION_VALIDATION_NOTIFICATION_HOURS: &str = "prescription_validation_notification_hours";
pub const PRESCRIPTION_NOTIFICATION_ENABLED: &str = "prescription_notification_enabled";

/// Upper bounds for the time-valued settings: one leap year.
pub const MAX_NOTIFICATION_HOURS: i64 = 24 * 366;
pub const MAX_INTERVAL_MINUTES: i64 = 60 * 24 * 366;

/// Tunables read once per job invocation and passed in explicitly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsSnapshot {
    pub auto_archive_enabled: bool,
    pub cancelled_analysis_archive_delay_days: i64,
    pub archiving_check_interval_minutes: i64,
    pub prescription_validation_notification_hours: i64,
    pub prescription_notification_enabled: bool,
}

impl Default for SettingsSnapshot {
    fn default() -> Self {
        Self {
            auto_archive_enabled: true,
            cancelled_analysis_archive_delay_days: 1,
            archiving_check_interval_minutes: 60,
            prescription_validation_notification_hours: 24,
            prescription_notification_enabled: true,
        }
    }
}

impl SettingsSnapshot {
    pub fn from_settings(settings: &[OrganizationSetting]) -> Self {
        let defaults = Self::default();
        let find = |key: &str| settings.iter().find(|s| s.key == key);

        let interval_minutes = find(ARCHIVING_CHECK_INTERVAL_MINUTES)
            .and_then(parse_integer)
            .or_else(|| {
                find(ARCHIVING_CHECK_INTERVAL_HOURS)
                    .and_then(parse_integer)
                    .map(|hours| hours.checked_mul(60).unwrap_or(i64::MAX))
            })
            .and_then(|minutes| within(ARCHIVING_CHECK_INTERVAL_MINUTES, minutes, 1, MAX_INTERVAL_MINUTES))
            .unwrap_or(defaults.archiving_check_interval_minutes);

        Self {
            auto_archive_enabled: find(AUTO_ARCHIVE_ENABLED)
                .and_then(parse_boolean)
                .unwrap_or(defaults.auto_archive_enabled),
            cancelled_analysis_archive_delay_days: find(CANCELLED_ANALYSIS_ARCHIVE_DELAY)
                .and_then(parse_integer)
                .filter(|days| *days >= 0)
                .unwrap_or(defaults.cancelled_analysis_archive_delay_days),
            archiving_check_interval_minutes: interval_minutes,
            prescription_validation_notification_hours: find(PRESCRIPTION_VALIDATION_NOTIFICATION_HOURS)
                .and_then(parse_integer)
                .and_then(|hours| {
                    within(PRESCRIPTION_VALIDATION_NOTIFICATION_HOURS, hours, 0, MAX_NOTIFICATION_HOURS)
                })
                .unwrap_or(defaults.prescription_validation_notification_hours),
            prescription_notification_enabled: find(PRESCRIPTION_NOTIFICATION_ENABLED)
                .and_then(parse_boolean)
                .unwrap_or(defaults.prescription_notification_enabled),
        }
    }

    pub fn notification_lead_time(&self) -> Duration {
        Duration::hours(self.prescription_validation_notification_hours.clamp(0, MAX_NOTIFICATION_HOURS))
    }

    pub fn archiving_interval(&self) -> std::time::Duration {
        let minutes = self.archiving_check_interval_minutes.clamp(1, MAX_INTERVAL_MINUTES) as u64;
        std::time::Duration::from_secs(minutes.saturating_mul(60))
    }
}

fn within(key: &str, value: i64, min: i64, max: i64) -> Option<i64> {
    if (min..=max).contains(&value) {
        Some(value)
    } else {
        warn!(key, value, min, max, "Setting out of range, using default");
        None
    }
}

fn parse_integer(setting: &OrganizationSetting) -> Option<i64> {
    if setting.value_type != SettingValueType::Integer {
        warn!(key = %setting.key, value_type = ?setting.value_type, "Setting is not an integer, using default");
        return None;
    }
    setting.value.trim().parse().map_err(|_| {
        warn!(key = %setting.key, value = %setting.value, "Invalid integer setting, using default");
    }).ok()
}

fn parse_boolean(setting: &OrganizationSetting) -> Option<bool> {
    if setting.value_type != SettingValueType::Boolean {
        warn!(key = %setting.key, value_type = ?setting.value_type, "Setting is not a boolean, using default");
        return None;
    }
    match setting.value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        other => {
            warn!(key = %setting.key, value = %other, "Invalid boolean setting, using default");
            None
        }
    }
}

pub struct SettingsService {
    store: Arc<dyn AnalysisStore>,
}

impl SettingsService {
    pub fn new(store: Arc<dyn AnalysisStore>) -> Self {
        Self { store }
    }

    pub async fn load_snapshot(&self) -> Result<SettingsSnapshot, AnalysisError> {
        let settings = self.store.list_settings().await?;
        let snapshot = SettingsSnapshot::from_settings(&settings);
        debug!(?snapshot, "Loaded organization settings");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integer(key: &str, value: &str) -> OrganizationSetting {
        OrganizationSetting::new(key, value, SettingValueType::Integer)
    }

    fn boolean(key: &str, value: &str) -> OrganizationSetting {
        OrganizationSetting::new(key, value, SettingValueType::Boolean)
    }

    #[test]
    fn test_defaults_when_empty() {
        assert_eq!(SettingsSnapshot::from_settings(&[]), SettingsSnapshot::default());
    }

    #[test]
    fn test_reads_typed_values() {
        let snapshot = SettingsSnapshot::from_settings(&[
            boolean(AUTO_ARCHIVE_ENABLED, "false"),
            integer(CANCELLED_ANALYSIS_ARCHIVE_DELAY, "3"),
            integer(PRESCRIPTION_VALIDATION_NOTIFICATION_HOURS, "48"),
            boolean(PRESCRIPTION_NOTIFICATION_ENABLED, "0"),
        ]);

        assert!(!snapshot.auto_archive_enabled);
        assert_eq!(snapshot.cancelled_analysis_archive_delay_days, 3);
        assert_eq!(snapshot.notification_lead_time(), Duration::hours(48));
        assert!(!snapshot.prescription_notification_enabled);
    }

    #[test]
    fn test_interval_minutes_win_over_hours() {
        let hours_only = SettingsSnapshot::from_settings(&[integer(ARCHIVING_CHECK_INTERVAL_HOURS, "2")]);
        assert_eq!(hours_only.archiving_check_interval_minutes, 120);

        let both = SettingsSnapshot::from_settings(&[
            integer(ARCHIVING_CHECK_INTERVAL_HOURS, "2"),
            integer(ARCHIVING_CHECK_INTERVAL_MINUTES, "15"),
        ]);
        assert_eq!(both.archiving_check_interval_minutes, 15);
        assert_eq!(both.archiving_interval(), std::time::Duration::from_secs(900));
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let snapshot = SettingsSnapshot::from_settings(&[
            integer(CANCELLED_ANALYSIS_ARCHIVE_DELAY, "soon"),
            OrganizationSetting::new(AUTO_ARCHIVE_ENABLED, "true", SettingValueType::String),
            integer(PRESCRIPTION_VALIDATION_NOTIFICATION_HOURS, "-5"),
        ]);

        assert_eq!(snapshot.cancelled_analysis_archive_delay_days, 1);
        assert!(snapshot.auto_archive_enabled);
        assert_eq!(snapshot.prescription_validation_notification_hours, 24);
    }

    #[test]
    fn test_out_of_range_values_fall_back() {
        let snapshot = SettingsSnapshot::from_settings(&[
            integer(PRESCRIPTION_VALIDATION_NOTIFICATION_HOURS, "10000000000"),
            integer(ARCHIVING_CHECK_INTERVAL_MINUTES, &i64::MAX.to_string()),
        ]);
        assert_eq!(snapshot.prescription_validation_notification_hours, 24);
        assert_eq!(snapshot.archiving_check_interval_minutes, 60);
        assert_eq!(snapshot.archiving_interval(), std::time::Duration::from_secs(3600));

        let huge_hours = SettingsSnapshot::from_settings(&[integer(ARCHIVING_CHECK_INTERVAL_HOURS, &i64::MAX.to_string())]);
        assert_eq!(huge_hours.archiving_check_interval_minutes, 60);

        let upper = SettingsSnapshot::from_settings(&[
            integer(PRESCRIPTION_VALIDATION_NOTIFICATION_HOURS, &MAX_NOTIFICATION_HOURS.to_string()),
            integer(ARCHIVING_CHECK_INTERVAL_MINUTES, &MAX_INTERVAL_MINUTES.to_string()),
        ]);
        assert_eq!(upper.notification_lead_time(), Duration::days(366));
        assert_eq!(upper.archiving_interval(), std::time::Duration::from_secs(366 * 24 * 3600));
    }

    #[test]
    fn test_hand_built_extremes_are_clamped() {
        let snapshot = SettingsSnapshot {
            prescription_validation_notification_hours: i64::MAX,
            archiving_check_interval_minutes: i64::MAX,
            ..SettingsSnapshot::default()
        };
        assert_eq!(snapshot.notification_lead_time(), Duration::hours(MAX_NOTIFICATION_HOURS));
        assert_eq!(snapshot.archiving_interval(), std::time::Duration::from_secs(366 * 24 * 3600));
    }

    #[test]
    fn test_load_snapshot_from_store() {
        let store = Arc::new(crate::store::InMemoryAnalysisStore::new());
        let service = SettingsService::new(store.clone());

        let snapshot = tokio_test::block_on(async {
            store.put_setting(integer(CANCELLED_ANALYSIS_ARCHIVE_DELAY, "7")).await;
            service.load_snapshot().await
        });

        let snapshot = tokio_test::assert_ok!(snapshot);
        assert_eq!(snapshot.cancelled_analysis_archive_delay_days, 7);
        assert!(snapshot.auto_archive_enabled);
    }
}
