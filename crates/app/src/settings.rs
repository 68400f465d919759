use serde::Deserialize;

use crate::error::{AppError, Result};
use meter_core::Settings;

/// Partial settings update from the command surface. Absent fields keep
/// their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub reset_day: Option<u32>,
    pub reset_period_days: Option<u32>,
    pub soft_pause_enabled: Option<bool>,
    pub always_compare: Option<bool>,
}

/// Validates the whole update before touching anything, so a rejected update
/// leaves the settings unchanged.
pub fn apply_update(settings: &mut Settings, update: &SettingsUpdate) -> Result<()> {
    if let Some(day) = update.reset_day
        && !(1..=31).contains(&day)
    {
        return Err(AppError::InvalidInput(format!(
            "reset day {day} out of range 1-31"
        )));
    }
    if let Some(period) = update.reset_period_days
        && period == 0
    {
        return Err(AppError::InvalidInput(
            "reset period must be at least one day".to_string(),
        ));
    }

    if let Some(day) = update.reset_day {
        settings.reset_day = day;
    }
    if let Some(period) = update.reset_period_days {
        settings.reset_period_days = period;
    }
    if let Some(enabled) = update.soft_pause_enabled {
        settings.soft_pause_enabled = enabled;
    }
    if let Some(always) = update.always_compare {
        settings.always_compare = always;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_updates_leave_settings_untouched() {
        let mut settings = Settings::default();
        let update = SettingsUpdate {
            reset_day: Some(32),
            reset_period_days: Some(7),
            ..SettingsUpdate::default()
        };
        assert!(apply_update(&mut settings, &update).is_err());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn zero_period_is_invalid() {
        let mut settings = Settings::default();
        let update = SettingsUpdate {
            reset_period_days: Some(0),
            ..SettingsUpdate::default()
        };
        assert!(apply_update(&mut settings, &update).is_err());
    }

    #[test]
    fn partial_updates_apply_only_named_fields() {
        let mut settings = Settings::default();
        let update = SettingsUpdate {
            reset_day: Some(15),
            always_compare: Some(true),
            ..SettingsUpdate::default()
        };
        apply_update(&mut settings, &update).expect("valid update");
        assert_eq!(settings.reset_day, 15);
        assert!(settings.always_compare);
        assert_eq!(settings.reset_period_days, 30);
        assert!(!settings.soft_pause_enabled);
    }
}
