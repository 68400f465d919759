mod errors;
mod handlers;
mod middleware;
mod state;

use axum::{Router, middleware as axum_middleware, routing::post};

pub use state::{HttpState, generate_api_token};

pub fn router(state: HttpState) -> Router<()> {
    let api = Router::new()
        .route("/events/response", post(handlers::record_response))
        .route("/events/tab", post(handlers::tab_event))
        .route("/usage", post(handlers::usage))
        .route("/tabs", post(handlers::tab_info))
        .route("/paused", post(handlers::paused_domains))
        .route("/pause", post(handlers::pause_domain))
        .route("/unpause", post(handlers::unpause_domain))
        .route("/clear_all_data", post(handlers::clear_all_data))
        .route("/auto_pause", post(handlers::set_auto_pause))
        .route("/auto_pause/cancel", post(handlers::cancel_auto_pause))
        .route(
            "/auto_pause/cancel_all",
            post(handlers::cancel_all_auto_pause),
        )
        .route("/soft_pause", post(handlers::toggle_soft_pause))
        .route("/settings_get", post(handlers::settings_get))
        .route("/settings_put", post(handlers::settings_put))
        .route("/command", post(handlers::command))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_api_token,
        ));

    Router::new()
        .nest("/api", api)
        .fallback(handlers::fallback)
        .with_state(state)
}
