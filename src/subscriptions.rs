//! Push-style fanout: maps (domain, queue) to zero or more handlers and
//! delivers every publish to each of them concurrently (§4.3 in the
//! component table). Grounded on the teacher's pub-sub `ClientRegistry`
//! (`brokers/pub-sub/actor.rs`), generalized from raw byte senders to a
//! handler trait so in-process subscribers (the Router, tests, future
//! transports) can all plug in the same way.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::model::Message;
use crate::store::QueueKey;

#[async_trait]
pub trait SubscriptionHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), String>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn SubscriptionHandler>,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    subs: DashMap<QueueKey, Vec<Subscription>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, domain: &str, queue: &str, handler: Arc<dyn SubscriptionHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subs
            .entry((domain.to_string(), queue.to_string()))
            .or_default()
            .push(Subscription { id, handler });
        id
    }

    pub fn unsubscribe(&self, domain: &str, queue: &str, id: SubscriptionId) {
        if let Some(mut entry) = self.subs.get_mut(&(domain.to_string(), queue.to_string())) {
            entry.retain(|s| s.id != id);
        }
    }

    /// First registered handler (SingleConsumer delivery mode semantics are
    /// applied by the caller, which decides how many of these to invoke).
    pub fn handlers(&self, domain: &str, queue: &str) -> Vec<(SubscriptionId, Arc<dyn SubscriptionHandler>)> {
        self.subs
            .get(&(domain.to_string(), queue.to_string()))
            .map(|entry| entry.iter().map(|s| (s.id, s.handler.clone())).collect())
            .unwrap_or_default()
    }

    /// Drops every subscriber of (domain, queue) — used on queue/domain
    /// deletion.
    pub fn remove_all(&self, domain: &str, queue: &str) {
        self.subs.remove(&(domain.to_string(), queue.to_string()));
    }
}
