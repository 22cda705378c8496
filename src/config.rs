use std::env;
use std::sync::OnceLock;

static CONFIG: OnceLock<Config> = OnceLock::new();

// --- CONFIG AGGREGATOR ---

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub queue: QueueConfig,
    pub groups: GroupsConfig,
    pub auth: AuthConfig,
    pub service_store: ServiceStoreConfig,
    pub cluster: ClusterConfig,
}

impl Config {
    pub fn global() -> &'static Config {
        CONFIG.get_or_init(Self::load)
    }

    fn load() -> Self {
        dotenv::dotenv().ok();
        Self {
            server: ServerConfig::load(),
            queue: QueueConfig::load(),
            groups: GroupsConfig::load(),
            auth: AuthConfig::load(),
            service_store: ServiceStoreConfig::load(),
            cluster: ClusterConfig::load(),
        }
    }
}

// --- MODULES ---

// SERVER
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl ServerConfig {
    fn load() -> Self {
        Self {
            host: get_env("SERVER_HOST", "127.0.0.1"),
            port: get_env("SERVER_PORT", "8080"),
            log_level: get_env("LOG_LEVEL", "info"),
        }
    }
}

// QUEUE (system-wide defaults applied when a queue is created without
// explicit overrides)
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub default_max_size: usize,
    pub default_ttl_ms: u64,
    pub default_retry_initial_delay_ms: u64,
    pub default_retry_max_delay_ms: u64,
    pub default_retry_max_retries: u32,
    pub default_retry_factor: f64,
    pub default_breaker_error_threshold: f64,
    pub default_breaker_minimum_requests: u32,
    pub default_breaker_success_threshold: u32,
    pub default_breaker_open_timeout_ms: u64,
}

impl QueueConfig {
    fn load() -> Self {
        Self {
            default_max_size: get_env("QUEUE_DEFAULT_MAX_SIZE", "0"),
            default_ttl_ms: get_env("QUEUE_DEFAULT_TTL_MS", "0"),
            default_retry_initial_delay_ms: get_env("QUEUE_RETRY_INITIAL_DELAY_MS", "100"),
            default_retry_max_delay_ms: get_env("QUEUE_RETRY_MAX_DELAY_MS", "5000"),
            default_retry_max_retries: get_env("QUEUE_RETRY_MAX_RETRIES", "3"),
            default_retry_factor: get_env("QUEUE_RETRY_FACTOR", "2.0"),
            default_breaker_error_threshold: get_env("QUEUE_BREAKER_ERROR_THRESHOLD", "0.5"),
            default_breaker_minimum_requests: get_env("QUEUE_BREAKER_MIN_REQUESTS", "10"),
            default_breaker_success_threshold: get_env("QUEUE_BREAKER_SUCCESS_THRESHOLD", "3"),
            default_breaker_open_timeout_ms: get_env("QUEUE_BREAKER_OPEN_TIMEOUT_MS", "30000"),
        }
    }
}

// CONSUMER GROUPS
#[derive(Debug, Clone)]
pub struct GroupsConfig {
    pub default_ttl_ms: u64,
    pub reaper_interval_ms: u64,
    pub reaper_lock_timeout_ms: u64,
}

impl GroupsConfig {
    fn load() -> Self {
        Self {
            default_ttl_ms: get_env("GROUPS_DEFAULT_TTL_MS", "86400000"),
            reaper_interval_ms: get_env("GROUPS_REAPER_INTERVAL_MS", "30000"),
            reaper_lock_timeout_ms: get_env("GROUPS_REAPER_LOCK_TIMEOUT_MS", "30000"),
        }
    }
}

// AUTH
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    pub require_tls: bool,
    pub hmac_window_secs: i64,
    pub token_ttl_secs: i64,
}

impl AuthConfig {
    fn load() -> Self {
        Self {
            enabled: get_env("AUTH_ENABLED", "true"),
            require_tls: get_env("AUTH_REQUIRE_TLS", "false"),
            hmac_window_secs: get_env("AUTH_HMAC_WINDOW_SECS", "300"),
            token_ttl_secs: get_env("AUTH_TOKEN_TTL_SECS", "86400"),
        }
    }
}

// SERVICE ACCOUNT STORE
#[derive(Debug, Clone)]
pub struct ServiceStoreConfig {
    pub persistence_path: String,
    pub encryption_key_hex: Option<String>,
}

impl ServiceStoreConfig {
    fn load() -> Self {
        Self {
            persistence_path: get_env("SERVICE_STORE_PATH", "./data/services.db"),
            encryption_key_hex: env::var("SERVICE_STORE_KEY_HEX").ok(),
        }
    }
}

// CLUSTER (inert — no cluster consensus is implemented; parsed so config
// loading stays total, per spec.md §1 Non-goals)
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub enabled: bool,
    pub node_id: String,
}

impl ClusterConfig {
    fn load() -> Self {
        Self {
            enabled: get_env("CLUSTER_ENABLED", "false"),
            node_id: get_env("CLUSTER_NODE_ID", "node-1"),
        }
    }
}

// --- PRIVATE HELPER ---

fn get_env<T: std::str::FromStr>(key: &str, default: &str) -> T {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| format!("Config error: {} must be valid", key))
        .unwrap()
}
