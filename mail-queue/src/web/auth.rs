//! Shared-secret authentication for the admin routes.
//!
//! When `ADMIN_TOKEN` is configured every request except `/health` must carry
//! it in the `X-Admin-Token` header.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use super::handlers::{AppState, ErrorResponse};

pub const ADMIN_TOKEN_HEADER: &str = "X-Admin-Token";

/// Check a presented token against the configured one.
///
/// No configured token (or a blank one) disables the check.
pub fn verify_admin_token(expected: Option<&str>, provided: Option<&str>) -> bool {
    match expected.map(str::trim).filter(|t| !t.is_empty()) {
        None => true,
        Some(expected) => provided
            .map(|p| constant_time_compare(expected, p.trim()))
            .unwrap_or(false),
    }
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Middleware rejecting requests without a valid admin token.
pub async fn require_admin_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());

    if !verify_admin_token(state.config.admin_token.as_deref(), provided) {
        warn!(
            path = %request.uri().path(),
            token_present = provided.is_some(),
            "admin_auth_rejected"
        );
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                status: "unauthorized",
                error: "missing or invalid admin token".to_string(),
            }),
        )
            .into_response();
    }

    next.run(request).await
}
