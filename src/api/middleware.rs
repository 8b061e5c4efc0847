//! API Middleware
//!
//! Bearer token authentication and request logging for the HTTP layer
//! that fronts the ledger core.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::domain::OperationContext;
use crate::error::AppError;
use crate::token::{TokenError, TokenMaker};

const BEARER_SCHEME: &str = "bearer";
const CORRELATION_ID_HEADER: &str = "x-correlation-id";

// =========================================================================
// Bearer Token Authentication Middleware
// =========================================================================

/// Extract the token from an `authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Result<&str, TokenError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(TokenError::InvalidToken)?;

    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case(BEARER_SCHEME) => Ok(token),
        _ => Err(TokenError::InvalidToken),
    }
}

/// Verify the bearer token and attach the caller to the request.
///
/// On success the token [`Payload`](crate::token::Payload) and an
/// [`OperationContext`] carrying the username and correlation ID are
/// inserted into the request extensions.
pub async fn bearer_auth_middleware(
    State(token_maker): State<Arc<dyn TokenMaker>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let payload = bearer_token(request.headers())
        .and_then(|token| token_maker.verify_token(token))
        .map_err(|e| {
            tracing::debug!(error = %e, uri = %request.uri(), "Bearer authentication failed");
            AppError::from(e)
        })?;

    // Extract correlation ID or generate new one
    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    let context = OperationContext::new()
        .with_correlation_id(correlation_id)
        .with_request_username(payload.username.clone());

    request.extensions_mut().insert(payload);
    request.extensions_mut().insert(context);

    Ok(next.run(request).await)
}

// =========================================================================
// mask_headers_for_logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let masked_value = if SENSITIVE_HEADERS.contains(&name.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

// =========================================================================
// Request Logging Middleware
// =========================================================================

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = mask_headers_for_logging(request.headers());

    let correlation_id = request
        .extensions()
        .get::<OperationContext>()
        .and_then(|ctx| ctx.correlation_id);

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        correlation_id = ?correlation_id,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = start.elapsed().as_millis() as u64,
        correlation_id = ?correlation_id,
        "Request completed"
    );

    response
}
