pub mod auth;
pub mod config;
pub mod domain_registry;
pub mod error;
pub mod groups;
pub mod http;
pub mod model;
pub mod queue_handler;
pub mod router;
pub mod store;
pub mod subscriptions;

use std::sync::Arc;
use std::time::Instant;

use crate::auth::service_repository::ServiceRepository;
use crate::auth::token::TokenService;
use crate::auth::AuthGate;
use crate::config::Config;
use crate::domain_registry::DomainRegistry;
use crate::http::AppState;

/// Aggregates every long-lived collaborator the HTTP layer needs, mirroring
/// the teacher's `NexoEngine` singleton shape: one value built once in
/// `main.rs` and handed to the router as axum state.
#[derive(Clone)]
pub struct GoRtmsEngine {
    pub registry: Arc<DomainRegistry>,
    pub auth: Arc<AuthGate>,
    pub start_time: Instant,
}

impl GoRtmsEngine {
    pub fn new() -> Self {
        let config = Config::global();
        let registry = DomainRegistry::new();
        registry.spawn_reaper();

        let encryption_key = resolve_encryption_key(config.service_store.encryption_key_hex.as_deref());
        let services = Arc::new(
            ServiceRepository::open(&config.service_store.persistence_path, encryption_key)
                .expect("failed to open service-account store"),
        );
        let tokens = Arc::new(TokenService::new(chrono::Duration::seconds(config.auth.token_ttl_secs)));
        let auth = Arc::new(AuthGate::new(services, tokens));

        Self { registry, auth, start_time: Instant::now() }
    }

    pub fn app_state(&self) -> AppState {
        AppState { registry: self.registry.clone(), auth: self.auth.clone(), start_time: self.start_time }
    }
}

impl Default for GoRtmsEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes the configured hex key, or derives a process-local one so the
/// store stays usable without a pre-shared secret (ephemeral: restarting
/// without a configured key makes previously written secrets unreadable).
fn resolve_encryption_key(configured: Option<&str>) -> [u8; 32] {
    if let Some(hex_key) = configured {
        if let Ok(bytes) = hex::decode(hex_key) {
            if bytes.len() == 32 {
                let mut key = [0u8; 32];
                key.copy_from_slice(&bytes);
                return key;
            }
        }
        tracing::warn!("SERVICE_STORE_KEY_HEX is not 32 bytes of hex; generating an ephemeral key instead");
    }
    let mut key = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut key);
    key
}
