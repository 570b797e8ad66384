//! Bearer token authentication.
//!
//! Every route except `/health` and `/metrics` passes through
//! [`require_token`]. The token is
//! read from `Authorization: Bearer <token>`, then from a bare `token` header
//! (older clients send it that way), then, for WebSocket upgrades that cannot
//! set headers from a browser, from a `token` query parameter.

use super::AppState;
use super::error::ApiError;
use crate::Error;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use secrecy::ExposeSecret;

/// Rejects the request with 401 unless it carries the configured token.
///
/// # Errors
///
/// Returns [`Error::Unauthorized`] before the handler runs.
pub async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let matches = presented_token(request.headers(), request.uri().query())
        .map(|token| constant_time_eq(token.as_bytes(), state.api_token.expose_secret().as_bytes()));
    match matches {
        Some(true) => Ok(next.run(request).await),
        Some(false) => {
            metrics::counter!("riskwatch_auth_failures_total", "reason" => "mismatch").increment(1);
            tracing::warn!(path = %request.uri().path(), "Rejected request with invalid token");
            Err(Error::Unauthorized("invalid token".to_string()).into())
        },
        None => {
            metrics::counter!("riskwatch_auth_failures_total", "reason" => "missing").increment(1);
            tracing::debug!(path = %request.uri().path(), "Rejected request without token");
            Err(Error::Unauthorized("missing token".to_string()).into())
        },
    }
}

fn presented_token<'a>(headers: &'a HeaderMap, query: Option<&'a str>) -> Option<&'a str> {
    if let Some(value) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        return value.strip_prefix("Bearer ").map(str::trim);
    }
    if let Some(value) = headers.get("token").and_then(|h| h.to_str().ok()) {
        return Some(value.trim());
    }
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
}

/// Constant-time comparison so token checks do not leak prefix length.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
