use serde::Deserialize;

use meter_app::SettingsUpdate;
use meter_core::TabId;

#[derive(Debug, Deserialize, Default)]
pub struct EmptyRequest {}

#[derive(Debug, Deserialize)]
pub struct DomainRequest {
    pub domain: String,
}

#[derive(Debug, Deserialize)]
pub struct AutoPauseRequest {
    pub domain: String,
    /// Wall-clock time of day, "HH:MM".
    pub time: String,
}

#[derive(Debug, Deserialize)]
pub struct SoftPauseRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct SettingsPutRequest {
    #[serde(flatten)]
    pub update: SettingsUpdate,
}

/// A completed network response from the observer feed.
#[derive(Debug, Deserialize)]
pub struct ResponseEventRequest {
    pub url: String,
    pub initiator: Option<String>,
    pub tab_id: Option<TabId>,
    pub content_length: Option<u64>,
}

/// Tab lifecycle events. `navigated` is a committed main-frame navigation.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TabEventRequest {
    Navigated {
        tab_id: TabId,
        url: String,
        #[serde(default)]
        window_id: i64,
        #[serde(default)]
        active: bool,
        transition: Option<String>,
    },
    Activated {
        tab_id: TabId,
    },
    Removed {
        tab_id: TabId,
    },
}
