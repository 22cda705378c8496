//! Top-level ownership: Domains -> Queues -> QueueHandlers (§3, §9's
//! ownership graph). Grounded on the teacher's `queue_manager.rs`, which
//! plays the same role for a flat set of queues; generalized here with a
//! domain namespace on top and cascading deletes.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::config::Config;
use crate::error::ApiError;
use crate::groups::{ConsumerGroupDetails, ConsumerGroupRegistry};
use crate::model::{Domain, Message, QueueConfig, Schema};
use crate::queue_handler::{ConsumeOptions, QueueHandler};
use crate::router::{Router, RoutingRule};
use crate::store::MessageStore;
use crate::subscriptions::{SubscriptionHandler, SubscriptionId, SubscriptionRegistry};

#[derive(Debug, Clone, Serialize)]
pub struct QueueDetails {
    pub domain: String,
    pub name: String,
    pub message_count: usize,
}

struct DomainEntry {
    domain: Domain,
    queues: DashMap<String, QueueEntry>,
}

struct QueueEntry {
    config: QueueConfig,
    handler: QueueHandler,
}

pub struct DomainRegistry {
    weak_self: Weak<DomainRegistry>,
    store: Arc<MessageStore>,
    groups: Arc<ConsumerGroupRegistry>,
    subs: Arc<SubscriptionRegistry>,
    router: Arc<Router>,
    domains: DashMap<String, DomainEntry>,
}

impl DomainRegistry {
    pub fn new() -> Arc<Self> {
        let store = Arc::new(MessageStore::new());
        let groups_cfg = &Config::global().groups;
        let groups = Arc::new(ConsumerGroupRegistry::new(
            store.clone(),
            Duration::from_millis(groups_cfg.default_ttl_ms),
            Duration::from_millis(groups_cfg.reaper_lock_timeout_ms),
        ));

        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            store,
            groups,
            subs: Arc::new(SubscriptionRegistry::new()),
            router: Arc::new(Router::new()),
            domains: DashMap::new(),
        })
    }

    pub fn groups(&self) -> &Arc<ConsumerGroupRegistry> {
        &self.groups
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Spawns a background reaper loop, mirroring the teacher's periodic
    /// maintenance tasks (started once from `main.rs`).
    pub fn spawn_reaper(self: &Arc<Self>) {
        let registry = self.clone();
        let interval = Duration::from_millis(Config::global().groups.reaper_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match registry.groups.reap() {
                    Ok(freed) => {
                        for (domain, queue, message_ids) in freed {
                            for message_id in message_ids {
                                let _ = registry.store.delete(&domain, &queue, &message_id);
                            }
                        }
                    }
                    Err(err) => tracing::warn!(%err, "consumer group reaper skipped a cycle"),
                }
            }
        });
    }

    pub fn create_domain(&self, name: &str, schema: Schema) -> Result<(), ApiError> {
        if self.domains.contains_key(name) {
            return Err(ApiError::Conflict(format!("domain '{}' already exists", name)));
        }
        self.domains.insert(
            name.to_string(),
            DomainEntry {
                domain: Domain { name: name.to_string(), schema },
                queues: DashMap::new(),
            },
        );
        Ok(())
    }

    pub fn list_domains(&self) -> Vec<String> {
        self.domains.iter().map(|e| e.key().clone()).collect()
    }

    pub fn domain_schema(&self, name: &str) -> Result<Schema, ApiError> {
        self.domains
            .get(name)
            .map(|e| e.domain.schema.clone())
            .ok_or_else(|| ApiError::NotFound(format!("domain '{}' not found", name)))
    }

    /// Cascades: stops every queue handler, drops their store/matrix/group/
    /// subscription state, then the domain entry itself (§3).
    pub async fn delete_domain(&self, name: &str) -> Result<(), ApiError> {
        let (_, entry) = self
            .domains
            .remove(name)
            .ok_or_else(|| ApiError::NotFound(format!("domain '{}' not found", name)))?;

        for queue in entry.queues.iter() {
            self.teardown_queue(name, queue.key()).await;
        }
        self.router.clear_domain(name);
        Ok(())
    }

    pub fn create_queue(&self, domain: &str, queue_name: &str, config: QueueConfig) -> Result<(), ApiError> {
        let entry = self
            .domains
            .get(domain)
            .ok_or_else(|| ApiError::NotFound(format!("domain '{}' not found", domain)))?;

        if entry.queues.contains_key(queue_name) {
            return Err(ApiError::Conflict(format!("queue '{}/{}' already exists", domain, queue_name)));
        }

        let domain_value = entry.domain.clone();
        let forward = self.forward_callback(domain);
        let handler = QueueHandler::start(
            domain_value,
            queue_name.to_string(),
            config.clone(),
            self.store.clone(),
            self.groups.clone(),
            self.subs.clone(),
            self.router.clone(),
            forward,
        );
        entry.queues.insert(queue_name.to_string(), QueueEntry { config, handler });
        Ok(())
    }

    pub fn list_queues(&self, domain: &str) -> Result<Vec<QueueDetails>, ApiError> {
        let entry = self
            .domains
            .get(domain)
            .ok_or_else(|| ApiError::NotFound(format!("domain '{}' not found", domain)))?;
        Ok(entry
            .queues
            .iter()
            .map(|q| QueueDetails {
                domain: domain.to_string(),
                name: q.key().clone(),
                message_count: self.store.len(domain, q.key()).unwrap_or(0),
            })
            .collect())
    }

    pub async fn delete_queue(&self, domain: &str, queue: &str) -> Result<(), ApiError> {
        {
            let entry = self
                .domains
                .get(domain)
                .ok_or_else(|| ApiError::NotFound(format!("domain '{}' not found", domain)))?;
            if !entry.queues.contains_key(queue) {
                return Err(ApiError::NotFound(format!("queue '{}/{}' not found", domain, queue)));
            }
        }
        self.teardown_queue(domain, queue).await;
        if let Some(entry) = self.domains.get(domain) {
            entry.queues.remove(queue);
        }
        Ok(())
    }

    async fn teardown_queue(&self, domain: &str, queue: &str) {
        if let Some(entry) = self.domains.get(domain) {
            if let Some(q) = entry.queues.get(queue) {
                q.handler.shutdown().await;
            }
        }
        self.store.delete_queue(domain, queue);
        self.groups.remove_all_for_queue(domain, queue);
        self.subs.remove_all(domain, queue);
    }

    fn queue_handle(&self, domain: &str, queue: &str) -> Result<QueueHandler, ApiError> {
        self.domains
            .get(domain)
            .ok_or_else(|| ApiError::NotFound(format!("domain '{}' not found", domain)))?
            .queues
            .get(queue)
            .map(|q| q.handler.clone())
            .ok_or_else(|| ApiError::NotFound(format!("queue '{}/{}' not found", domain, queue)))
    }

    pub async fn publish(&self, domain: &str, queue: &str, message: Message) -> Result<String, ApiError> {
        self.queue_handle(domain, queue)?.publish(message).await
    }

    pub async fn consume(&self, domain: &str, queue: &str, options: ConsumeOptions) -> Result<Option<(i64, Message)>, ApiError> {
        Ok(self.queue_handle(domain, queue)?.consume_with_group(options).await)
    }

    pub fn subscribe(&self, domain: &str, queue: &str, handler: Arc<dyn SubscriptionHandler>) -> Result<SubscriptionId, ApiError> {
        self.queue_handle(domain, queue)?;
        Ok(self.subs.subscribe(domain, queue, handler))
    }

    pub fn unsubscribe(&self, domain: &str, queue: &str, id: SubscriptionId) {
        self.subs.unsubscribe(domain, queue, id);
    }

    pub async fn add_consumer_group(&self, domain: &str, queue: &str, group_id: &str, consumer_id: Option<&str>) -> Result<(), ApiError> {
        self.queue_handle(domain, queue)?
            .add_consumer_group(group_id.to_string(), consumer_id.map(str::to_string))
            .await;
        Ok(())
    }

    pub async fn remove_consumer_group(&self, domain: &str, queue: &str, group_id: &str) -> Result<(), ApiError> {
        self.queue_handle(domain, queue)?.remove_consumer_group(group_id.to_string()).await;
        Ok(())
    }

    /// Removes one consumer from a group, keeping the group itself alive
    /// (§4.3 RemoveConsumer). Talks to the registry directly — membership
    /// bookkeeping is not owned by the per-queue actor.
    pub fn remove_consumer(&self, domain: &str, queue: &str, group_id: &str, consumer_id: &str) -> Result<(), ApiError> {
        self.queue_handle(domain, queue)?;
        self.groups.remove_consumer(domain, queue, group_id, consumer_id);
        Ok(())
    }

    pub fn consumer_group_details(&self, domain: &str, queue: &str, group_id: &str) -> Option<ConsumerGroupDetails> {
        self.groups.details(domain, queue, group_id)
    }

    pub fn list_consumer_groups(&self, domain: &str, queue: &str) -> Vec<ConsumerGroupDetails> {
        self.groups.list_for_queue(domain, queue)
    }

    pub fn add_routing_rule(&self, domain: &str, rule: RoutingRule) -> Result<(), ApiError> {
        let entry = self
            .domains
            .get(domain)
            .ok_or_else(|| ApiError::NotFound(format!("domain '{}' not found", domain)))?;
        if !entry.queues.contains_key(&rule.source_queue) {
            return Err(ApiError::NotFound(format!("source queue '{}' not found", rule.source_queue)));
        }
        if !entry.queues.contains_key(&rule.destination_queue) {
            return Err(ApiError::NotFound(format!("destination queue '{}' not found", rule.destination_queue)));
        }
        self.router.add_rule(domain, rule);
        Ok(())
    }

    pub fn remove_routing_rule(&self, domain: &str, source_queue: &str, destination_queue: &str) {
        self.router.remove_rule(domain, source_queue, destination_queue);
    }

    pub fn list_routing_rules(&self, domain: &str) -> Vec<(String, String)> {
        self.router.list_rules(domain)
    }

    /// Builds the closure a queue's `QueueHandler` calls when a routing
    /// rule matches, forwarding onto the destination queue's own handler in
    /// the same domain without either actor holding a direct reference to
    /// the other. Failures (destination queue missing, e.g.) are logged and
    /// skipped per §7's routing propagation policy.
    fn forward_callback(&self, domain: &str) -> Arc<dyn Fn(String, Message) + Send + Sync> {
        let weak = self.weak_self.clone();
        let domain = domain.to_string();
        Arc::new(move |dest_queue, message| {
            let Some(registry) = weak.upgrade() else { return };
            let domain = domain.clone();
            tokio::spawn(async move {
                if let Err(err) = registry.publish(&domain, &dest_queue, message).await {
                    tracing::warn!(%domain, to = %dest_queue, %err, "routed publish failed");
                }
            });
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[tokio::test]
    async fn publish_then_consume_round_trips_payload() {
        let registry = DomainRegistry::new();
        registry.create_domain("d1", Schema::default()).unwrap();
        registry.create_queue("d1", "q1", QueueConfig::default()).unwrap();

        let message = Message::new(json!({"n": 1}), HashMap::new(), HashMap::new());
        let id = registry.publish("d1", "q1", message).await.unwrap();

        let got = registry
            .consume(
                "d1",
                "q1",
                ConsumeOptions {
                    group_id: Some("g1".into()),
                    start_from_id: None,
                    consumer_id: None,
                    timeout: Duration::from_millis(50),
                    cancel: None,
                },
            )
            .await
            .unwrap();

        let (_, message) = got.expect("message available");
        assert_eq!(message.id, id);
    }

    #[tokio::test]
    async fn consume_times_out_with_no_messages() {
        let registry = DomainRegistry::new();
        registry.create_domain("d1", Schema::default()).unwrap();
        registry.create_queue("d1", "q1", QueueConfig::default()).unwrap();

        let got = registry
            .consume(
                "d1",
                "q1",
                ConsumeOptions {
                    group_id: Some("g1".into()),
                    start_from_id: None,
                    consumer_id: None,
                    timeout: Duration::from_millis(20),
                    cancel: None,
                },
            )
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn cancelling_a_blocked_consume_returns_none_promptly() {
        let registry = DomainRegistry::new();
        registry.create_domain("d1", Schema::default()).unwrap();
        registry.create_queue("d1", "q1", QueueConfig::default()).unwrap();

        let cancel = tokio_util::sync::CancellationToken::new();
        let consume_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            registry
                .consume(
                    "d1",
                    "q1",
                    ConsumeOptions {
                        group_id: Some("g1".into()),
                        start_from_id: None,
                        consumer_id: None,
                        timeout: Duration::from_secs(3600),
                        cancel: Some(consume_cancel),
                    },
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let got = tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("cancellation should resolve well before the 1h timeout")
            .unwrap()
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn delete_domain_cascades_queues() {
        let registry = DomainRegistry::new();
        registry.create_domain("d1", Schema::default()).unwrap();
        registry.create_queue("d1", "q1", QueueConfig::default()).unwrap();
        registry.delete_domain("d1").await.unwrap();
        assert!(registry.list_domains().is_empty());
    }
}
