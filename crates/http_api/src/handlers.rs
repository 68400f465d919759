use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
};

use app_api::{
    AutoPauseRequest, Command, DomainRequest, ResponseEventRequest, SettingsPutRequest,
    SoftPauseRequest, TabEventRequest,
};

use crate::{errors::HttpError, state::HttpState};

pub async fn record_response(
    State(state): State<HttpState>,
    Json(req): Json<ResponseEventRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let response = app_api::record_response(&state.context, req)?;
    Ok(Json(response))
}

pub async fn tab_event(
    State(state): State<HttpState>,
    Json(req): Json<TabEventRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let response = app_api::tab_event(&state.context, req)?;
    Ok(Json(response))
}

pub async fn usage(
    State(state): State<HttpState>,
    Json(_): Json<app_api::EmptyRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let response = app_api::usage(&state.context)?;
    Ok(Json(response))
}

pub async fn tab_info(
    State(state): State<HttpState>,
    Json(_): Json<app_api::EmptyRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let response = app_api::tab_info(&state.context)?;
    Ok(Json(response))
}

pub async fn paused_domains(
    State(state): State<HttpState>,
    Json(_): Json<app_api::EmptyRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let response = app_api::paused_domains(&state.context)?;
    Ok(Json(response))
}

pub async fn pause_domain(
    State(state): State<HttpState>,
    Json(req): Json<DomainRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let response = app_api::pause_domain(&state.context, req)?;
    Ok(Json(response))
}

pub async fn unpause_domain(
    State(state): State<HttpState>,
    Json(req): Json<DomainRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let response = app_api::unpause_domain(&state.context, req)?;
    Ok(Json(response))
}

pub async fn clear_all_data(
    State(state): State<HttpState>,
    Json(_): Json<app_api::EmptyRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let response = app_api::clear_all_data(&state.context)?;
    Ok(Json(response))
}

pub async fn set_auto_pause(
    State(state): State<HttpState>,
    Json(req): Json<AutoPauseRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let response = app_api::set_auto_pause(&state.context, req)?;
    Ok(Json(response))
}

pub async fn cancel_auto_pause(
    State(state): State<HttpState>,
    Json(req): Json<DomainRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let response = app_api::cancel_auto_pause(&state.context, req)?;
    Ok(Json(response))
}

pub async fn cancel_all_auto_pause(
    State(state): State<HttpState>,
    Json(_): Json<app_api::EmptyRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let response = app_api::cancel_all_auto_pause_alarms(&state.context)?;
    Ok(Json(response))
}

pub async fn toggle_soft_pause(
    State(state): State<HttpState>,
    Json(req): Json<SoftPauseRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let response = app_api::toggle_soft_pause_global(&state.context, req)?;
    Ok(Json(response))
}

pub async fn settings_get(
    State(state): State<HttpState>,
    Json(_): Json<app_api::EmptyRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let response = app_api::settings_get(&state.context)?;
    Ok(Json(response))
}

pub async fn settings_put(
    State(state): State<HttpState>,
    Json(req): Json<SettingsPutRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let response = app_api::settings_put(&state.context, req)?;
    Ok(Json(response))
}

pub async fn command(
    State(state): State<HttpState>,
    Json(command): Json<Command>,
) -> Result<impl IntoResponse, HttpError> {
    let response = app_api::dispatch(&state.context, command)?;
    Ok(Json(response))
}

pub async fn fallback() -> HttpError {
    HttpError::new(
        StatusCode::NOT_FOUND,
        "unknown endpoint",
        Some("not_found".to_string()),
    )
}
