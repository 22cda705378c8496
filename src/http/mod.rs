//! HTTP surface assembly (§6). Grounded on the teacher's
//! `server/dashboard_api.rs` for the axum `Router::new().route(...)`
//! wiring idiom, extended with the Auth Gate middleware and the data-plane
//! / control-plane route groups SPEC_FULL.md adds.

pub mod control_plane;
pub mod data_plane;
pub mod extract;

use std::sync::Arc;
use std::time::Instant;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::AuthGate;
use crate::domain_registry::DomainRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DomainRegistry>,
    pub auth: Arc<AuthGate>,
    pub start_time: Instant,
}

pub fn build_router(state: AppState) -> Router {
    let data_plane = data_plane::router()
        .route_layer(middleware::from_fn_with_state(state.clone(), extract::auth_gate));

    let protected_control_plane = control_plane::protected_router()
        .route_layer(middleware::from_fn_with_state(state.clone(), extract::token_gate));

    let api = data_plane.merge(protected_control_plane).merge(control_plane::public_router());

    Router::new()
        .nest("/api", api)
        .route("/health", get(control_plane::health))
        .layer(middleware::from_fn(extract::request_span))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
