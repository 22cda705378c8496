//! Wire and storage shape of a message. Immutable once published (§3).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved metadata key carrying a per-message TTL, in milliseconds.
pub const TTL_METADATA_KEY: &str = "ttl";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub payload: Value,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Message {
    pub fn new(payload: Value, headers: HashMap<String, String>, metadata: HashMap<String, Value>) -> Self {
        Self {
            id: generate_message_id(),
            payload,
            headers,
            timestamp: Utc::now(),
            metadata,
        }
    }

    /// Create a routed copy: same id/payload/headers, a fresh timestamp
    /// (per spec §4.5 — routing forwards a copy, not a pointer).
    pub fn routed_copy(&self) -> Self {
        Self {
            id: self.id.clone(),
            payload: self.payload.clone(),
            headers: self.headers.clone(),
            timestamp: Utc::now(),
            metadata: self.metadata.clone(),
        }
    }

    /// Per-message TTL, if present in metadata under the reserved key.
    pub fn ttl(&self) -> Option<std::time::Duration> {
        self.metadata
            .get(TTL_METADATA_KEY)
            .and_then(|v| v.as_u64())
            .map(std::time::Duration::from_millis)
    }

    /// Whether this message has outlived its TTL. A per-message TTL in
    /// `metadata` wins; otherwise falls back to the queue's own default
    /// (§4.4: "messages with per-message `ttl` expire ... ", §3's queue
    /// `ttl` field).
    pub fn is_expired(&self, queue_default_ttl: Option<std::time::Duration>) -> bool {
        match self.ttl().or(queue_default_ttl) {
            Some(ttl) => Utc::now().signed_duration_since(self.timestamp).to_std().map(|age| age > ttl).unwrap_or(false),
            None => false,
        }
    }
}

/// `msg-<unixnano>-<rand4>` per spec §6.
fn generate_message_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let rand_suffix: u32 = rand::thread_rng().gen_range(0..0xFFFF);
    format!("msg-{}-{:04x}", nanos, rand_suffix)
}
