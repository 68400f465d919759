use std::collections::BTreeMap;

use serde::Serialize;

use meter_app::DomainTabs;
use meter_core::Settings;

#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

pub fn ok() -> SuccessResponse {
    SuccessResponse { success: true }
}

#[derive(Serialize)]
pub struct TabInfoResponse {
    pub tab_data: BTreeMap<String, DomainTabs>,
}

/// Settings in the API's snake_case shape; the camelCase form is only for
/// the durable store.
#[derive(Serialize)]
pub struct SettingsResponse {
    pub reset_day: u32,
    pub reset_period_days: u32,
    pub soft_pause_enabled: bool,
    pub always_compare: bool,
    pub setup_complete: bool,
}

impl SettingsResponse {
    pub fn new(settings: &Settings, setup_complete: bool) -> Self {
        Self {
            reset_day: settings.reset_day,
            reset_period_days: settings.reset_period_days,
            soft_pause_enabled: settings.soft_pause_enabled,
            always_compare: settings.always_compare,
            setup_complete,
        }
    }
}

#[derive(Serialize)]
pub struct PausedResponse {
    pub paused_domains: Vec<String>,
}
