//! Admin HTTP server.
//!
//! Exposes queue statistics, entry inspection, operator retry/cancel and the
//! enqueue entry points (single entry, signup, campaign fan-out).

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use auth::{require_admin_token, verify_admin_token, ADMIN_TOKEN_HEADER};
pub use handlers::{ApiError, AppState, ErrorResponse, HealthResponse};

/// Build the admin router. `/health` is always open; everything else sits
/// behind the admin token check.
pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/queue/stats", get(handlers::queue_stats))
        .route(
            "/queue/entries",
            get(handlers::list_entries).post(handlers::enqueue_entry),
        )
        .route("/queue/entries/:id", get(handlers::get_entry))
        .route("/queue/entries/:id/retry", post(handlers::retry_entry))
        .route("/queue/entries/:id/cancel", post(handlers::cancel_entry))
        .route("/signups", post(handlers::signup))
        .route(
            "/campaigns/:email_type/fan-out",
            post(handlers::fan_out_campaign),
        )
        .route("/campaigns/status", get(handlers::campaign_status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_token,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
