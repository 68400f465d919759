use serde::{Deserialize, Serialize};

use meter_app::{Result, SettingsUpdate, UsageSnapshot};

use crate::{
    AppContext, AutoPauseRequest, DomainRequest, SettingsPutRequest, SettingsResponse,
    SoftPauseRequest, SuccessResponse, TabInfoResponse, handlers,
};

/// The command surface as one tagged union. Every variant is handled
/// exhaustively in `dispatch`; unrecognized action names fall into `Unknown`
/// and are acknowledged with `success: false` instead of an error.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Command {
    PauseDomain {
        domain: String,
    },
    UnpauseDomain {
        domain: String,
    },
    GetUsage,
    GetTabInfo,
    ClearAllData,
    SetAutoPause {
        domain: String,
        time: String,
    },
    CancelAutoPause {
        domain: String,
    },
    CancelAllAutoPauseAlarms,
    ToggleSoftPauseGlobal {
        enabled: bool,
    },
    GetSettings,
    PutSettings {
        #[serde(flatten)]
        update: SettingsUpdate,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum CommandResponse {
    Usage(Box<UsageSnapshot>),
    Tabs(TabInfoResponse),
    Settings(SettingsResponse),
    Ack(SuccessResponse),
}

pub fn dispatch(ctx: &AppContext, command: Command) -> Result<CommandResponse> {
    match command {
        Command::PauseDomain { domain } => {
            handlers::pause_domain(ctx, DomainRequest { domain }).map(CommandResponse::Ack)
        }
        Command::UnpauseDomain { domain } => {
            handlers::unpause_domain(ctx, DomainRequest { domain }).map(CommandResponse::Ack)
        }
        Command::GetUsage => handlers::usage(ctx)
            .map(Box::new)
            .map(CommandResponse::Usage),
        Command::GetTabInfo => handlers::tab_info(ctx).map(CommandResponse::Tabs),
        Command::ClearAllData => handlers::clear_all_data(ctx).map(CommandResponse::Ack),
        Command::SetAutoPause { domain, time } => {
            handlers::set_auto_pause(ctx, AutoPauseRequest { domain, time })
                .map(CommandResponse::Ack)
        }
        Command::CancelAutoPause { domain } => {
            handlers::cancel_auto_pause(ctx, DomainRequest { domain }).map(CommandResponse::Ack)
        }
        Command::CancelAllAutoPauseAlarms => {
            handlers::cancel_all_auto_pause_alarms(ctx).map(CommandResponse::Ack)
        }
        Command::ToggleSoftPauseGlobal { enabled } => {
            handlers::toggle_soft_pause_global(ctx, SoftPauseRequest { enabled })
                .map(CommandResponse::Ack)
        }
        Command::GetSettings => handlers::settings_get(ctx).map(CommandResponse::Settings),
        Command::PutSettings { update } => {
            handlers::settings_put(ctx, SettingsPutRequest { update })
                .map(CommandResponse::Settings)
        }
        Command::Unknown => Ok(CommandResponse::Ack(SuccessResponse { success: false })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_deserialize_from_action_tags() {
        let command: Command =
            serde_json::from_str(r#"{"action":"pauseDomain","domain":"shop.example"}"#)
                .expect("parse");
        assert!(matches!(command, Command::PauseDomain { domain } if domain == "shop.example"));

        let command: Command =
            serde_json::from_str(r#"{"action":"setAutoPause","domain":"a.example","time":"22:30"}"#)
                .expect("parse");
        assert!(matches!(command, Command::SetAutoPause { .. }));
    }

    #[test]
    fn unknown_actions_map_to_the_unknown_variant() {
        let command: Command =
            serde_json::from_str(r#"{"action":"definitelyNotAThing"}"#).expect("parse");
        assert!(matches!(command, Command::Unknown));
    }
}
