//! AuthGate wired in as axum middleware: picks HMAC or token verification
//! per request (§4.6), buffers the body once so both the HMAC canonical
//! string and the downstream JSON handler can read it, and stamps a
//! request-id span (SPEC_FULL.md Section C.2).

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::auth::{HmacRequest, Identity};
use crate::error::ApiError;
use crate::http::AppState;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

pub async fn request_span(request: Request, next: Next) -> Response {
    let id = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let span = tracing::info_span!("request", id, method = %request.method(), path = %request.uri().path());
    let _enter = span.enter();
    tracing::info!("handling request");
    next.run(request).await
}

pub async fn auth_gate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if !state.auth.enabled() {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return ApiError::BadRequest("body too large or unreadable".into()).into_response(),
    };

    let method = parts.method.as_str().to_string();
    let path = parts.uri.path().to_string();
    let body_str = String::from_utf8_lossy(&bytes).to_string();

    let has_hmac_headers = ["x-service-id", "x-timestamp", "x-signature"]
        .iter()
        .all(|name| parts.headers.get(*name).map(|v| !v.is_empty()).unwrap_or(false));

    let identity_result = if has_hmac_headers {
        let service_id = header_str(&parts.headers, "x-service-id");
        let timestamp = header_str(&parts.headers, "x-timestamp");
        let signature = header_str(&parts.headers, "x-signature");
        state.auth.authenticate_hmac(&HmacRequest {
            service_id: &service_id,
            timestamp: &timestamp,
            signature: &signature,
            method: &method,
            path: &path,
            body: &body_str,
            client_ip: &addr.ip().to_string(),
            is_tls: false,
        })
    } else {
        match parts.headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            Some(value) if value.starts_with("Bearer ") => state.auth.authenticate_token(value.trim_start_matches("Bearer ").trim()),
            _ => Err(ApiError::Unauthorized("missing credentials".into())),
        }
    };

    let identity = match identity_result {
        Ok(identity) => identity,
        Err(err) => return err.into_response(),
    };

    let mut request = Request::from_parts(parts, Body::from(bytes));
    request.extensions_mut().insert(identity);
    next.run(request).await
}

fn header_str(headers: &axum::http::HeaderMap, name: &str) -> String {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or_default().to_string()
}

/// Control-plane gate: token only (§6 "control plane — token required
/// unless Auth Gate disabled"). Service accounts never reach the control
/// plane through this gate.
pub async fn token_gate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    if !state.auth.enabled() {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .filter(|v| v.starts_with("Bearer "))
        .map(|v| v.trim_start_matches("Bearer ").trim().to_string());

    let Some(token) = token else {
        return ApiError::Unauthorized("missing bearer token".into()).into_response();
    };

    match state.auth.authenticate_token(&token) {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}
