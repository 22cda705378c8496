//! Per-queue configuration (§3): persistence flag, capacity, TTL, delivery
//! mode, retry policy, circuit-breaker policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Broadcast,
    RoundRobin,
    SingleConsumer,
}

impl Default for DeliveryMode {
    fn default() -> Self {
        DeliveryMode::Broadcast
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl RetryPolicy {
    /// `min(initialDelay * factor^n, maxDelay)` per §4.4.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.factor.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerPolicy {
    pub error_threshold: f64,
    pub minimum_requests: u32,
    pub success_threshold: u32,
    pub open_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub is_persistent: bool,
    pub max_size: usize,
    pub ttl: Option<Duration>,
    pub delivery_mode: DeliveryMode,
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        let cfg = &Config::global().queue;
        Self {
            is_persistent: false,
            max_size: cfg.default_max_size,
            ttl: if cfg.default_ttl_ms == 0 {
                None
            } else {
                Some(Duration::from_millis(cfg.default_ttl_ms))
            },
            delivery_mode: DeliveryMode::default(),
            retry: RetryPolicy {
                max_retries: cfg.default_retry_max_retries,
                initial_delay: Duration::from_millis(cfg.default_retry_initial_delay_ms),
                max_delay: Duration::from_millis(cfg.default_retry_max_delay_ms),
                factor: cfg.default_retry_factor,
            },
            breaker: CircuitBreakerPolicy {
                error_threshold: cfg.default_breaker_error_threshold,
                minimum_requests: cfg.default_breaker_minimum_requests,
                success_threshold: cfg.default_breaker_success_threshold,
                open_timeout: Duration::from_millis(cfg.default_breaker_open_timeout_ms),
            },
        }
    }
}
