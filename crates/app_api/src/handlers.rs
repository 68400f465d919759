use chrono::Utc;

use meter_app::{ResponseEvent, Result, TabEvent, UsageSnapshot};

use crate::{
    AppContext, AutoPauseRequest, DomainRequest, PausedResponse, ResponseEventRequest,
    SettingsPutRequest, SettingsResponse, SoftPauseRequest, SuccessResponse, TabEventRequest,
    TabInfoResponse, ok,
};

pub fn record_response(ctx: &AppContext, req: ResponseEventRequest) -> Result<SuccessResponse> {
    let event = ResponseEvent {
        url: req.url,
        initiator: req.initiator,
        tab_id: req.tab_id,
        content_length: req.content_length,
    };
    ctx.engine()?.observe_response(&event, Utc::now());
    Ok(ok())
}

pub fn tab_event(ctx: &AppContext, req: TabEventRequest) -> Result<SuccessResponse> {
    let event = match req {
        TabEventRequest::Navigated {
            tab_id,
            url,
            window_id,
            active,
            transition,
        } => TabEvent::Navigated {
            tab_id,
            url,
            window_id,
            active,
            transition,
        },
        TabEventRequest::Activated { tab_id } => TabEvent::Activated { tab_id },
        TabEventRequest::Removed { tab_id } => TabEvent::Removed { tab_id },
    };
    ctx.engine()?.handle_tab_event(event, Utc::now())?;
    Ok(ok())
}

pub fn usage(ctx: &AppContext) -> Result<UsageSnapshot> {
    Ok(ctx.engine()?.usage_snapshot(Utc::now()))
}

pub fn tab_info(ctx: &AppContext) -> Result<TabInfoResponse> {
    Ok(TabInfoResponse {
        tab_data: ctx.engine()?.tab_info(),
    })
}

pub fn paused_domains(ctx: &AppContext) -> Result<PausedResponse> {
    Ok(PausedResponse {
        paused_domains: ctx.engine()?.paused_origins(),
    })
}

pub fn pause_domain(ctx: &AppContext, req: DomainRequest) -> Result<SuccessResponse> {
    ctx.engine()?.pause(&req.domain)?;
    Ok(ok())
}

pub fn unpause_domain(ctx: &AppContext, req: DomainRequest) -> Result<SuccessResponse> {
    ctx.engine()?.unpause(&req.domain)?;
    Ok(ok())
}

pub fn clear_all_data(ctx: &AppContext) -> Result<SuccessResponse> {
    ctx.engine()?.clear_all()?;
    Ok(ok())
}

pub fn set_auto_pause(ctx: &AppContext, req: AutoPauseRequest) -> Result<SuccessResponse> {
    ctx.engine()?
        .set_auto_pause(&req.domain, &req.time, Utc::now())?;
    Ok(ok())
}

pub fn cancel_auto_pause(ctx: &AppContext, req: DomainRequest) -> Result<SuccessResponse> {
    ctx.engine()?.cancel_auto_pause(&req.domain)?;
    Ok(ok())
}

pub fn cancel_all_auto_pause_alarms(ctx: &AppContext) -> Result<SuccessResponse> {
    ctx.engine()?.cancel_all_auto_pause();
    Ok(ok())
}

pub fn toggle_soft_pause_global(ctx: &AppContext, req: SoftPauseRequest) -> Result<SuccessResponse> {
    ctx.engine()?.toggle_soft_pause(req.enabled)?;
    Ok(ok())
}

pub fn settings_get(ctx: &AppContext) -> Result<SettingsResponse> {
    let engine = ctx.engine()?;
    Ok(SettingsResponse::new(
        engine.settings(),
        engine.setup_complete(),
    ))
}

pub fn settings_put(ctx: &AppContext, req: SettingsPutRequest) -> Result<SettingsResponse> {
    let mut engine = ctx.engine()?;
    let settings = engine.put_settings(&req.update, Utc::now())?;
    let setup_complete = engine.setup_complete();
    Ok(SettingsResponse::new(&settings, setup_complete))
}
