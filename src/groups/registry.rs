//! Durable per-group cursor state (§4.3): position, member consumer ids,
//! TTL, activity timestamps, and the reaper that expires stale groups.
//!
//! The whole registry sits behind one lock (§5: "ConsumerGroupRegistry uses
//! one registry-wide lock; updates are O(1)"), mirroring the teacher's
//! single `ConsumerGroup` struct in `brokers/stream/group.rs` generalized
//! from one stream's groups to every (domain, queue, group) in the system.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::store::MessageStore;

pub type GroupKey = (String, String, String);

#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("reaper could not acquire the registry lock within the timeout")]
    ReaperLockTimeout,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsumerGroupDetails {
    pub domain: String,
    pub queue: String,
    pub group_id: String,
    pub position: i64,
    pub consumer_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub ttl_ms: u64,
}

struct ConsumerGroup {
    position: i64,
    consumer_ids: HashSet<String>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    ttl: Duration,
    /// Whether this group currently holds a live claim in its queue's
    /// AckMatrix. Cleared (not the group itself) when the last consumer
    /// leaves, per spec.md §9's Open Question resolution.
    registered_in_matrix: bool,
}

impl ConsumerGroup {
    fn new(ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            position: 0,
            consumer_ids: HashSet::new(),
            created_at: now,
            last_activity: now,
            ttl,
            registered_in_matrix: true,
        }
    }

    fn effective_ttl(&self, default: Duration) -> Duration {
        if self.ttl.is_zero() {
            default
        } else {
            self.ttl
        }
    }
}

pub struct ConsumerGroupRegistry {
    store: Arc<MessageStore>,
    groups: Mutex<HashMap<GroupKey, ConsumerGroup>>,
    default_ttl: Duration,
    lock_timeout: Duration,
}

impl ConsumerGroupRegistry {
    pub fn new(store: Arc<MessageStore>, default_ttl: Duration, lock_timeout: Duration) -> Self {
        Self {
            store,
            groups: Mutex::new(HashMap::new()),
            default_ttl,
            lock_timeout,
        }
    }

    fn key(domain: &str, queue: &str, group: &str) -> GroupKey {
        (domain.to_string(), queue.to_string(), group.to_string())
    }

    /// Creates the group if absent (idempotent), registers it in the
    /// queue's AckMatrix, and adds `consumer` if supplied.
    pub fn register(&self, domain: &str, queue: &str, group_id: &str, consumer: Option<&str>) {
        let key = Self::key(domain, queue, group_id);
        let mut groups = self.groups.lock();
        let mut newly_created = false;
        let entry = groups.entry(key).or_insert_with(|| {
            newly_created = true;
            let mut group = ConsumerGroup::new(Duration::ZERO);
            group.registered_in_matrix = false;
            group
        });
        if newly_created || !entry.registered_in_matrix {
            self.store.ack_matrix_for(domain, queue).lock().register_group(group_id);
            entry.registered_in_matrix = true;
        }
        if let Some(consumer_id) = consumer {
            entry.consumer_ids.insert(consumer_id.to_string());
        }
        entry.last_activity = Utc::now();
    }

    /// `position = max(current, newPos)`; regressions are silently ignored
    /// (spec.md §9's Open Question is resolved in favor of silence).
    pub fn store_position(&self, domain: &str, queue: &str, group_id: &str, new_pos: i64) {
        let key = Self::key(domain, queue, group_id);
        let mut groups = self.groups.lock();
        let entry = groups.entry(key).or_insert_with(|| ConsumerGroup::new(Duration::ZERO));
        entry.position = entry.position.max(new_pos);
        entry.last_activity = Utc::now();
    }

    /// Missing group returns 0 — callers treat that as "from the beginning".
    pub fn get_position(&self, domain: &str, queue: &str, group_id: &str) -> i64 {
        let key = Self::key(domain, queue, group_id);
        self.groups.lock().get(&key).map(|g| g.position).unwrap_or(0)
    }

    /// Removes a consumer. If the group becomes empty it is NOT deleted,
    /// but its AckMatrix claim is cleared so other live groups aren't held
    /// back by a group nobody is reading from anymore.
    pub fn remove_consumer(&self, domain: &str, queue: &str, group_id: &str, consumer_id: &str) {
        let key = Self::key(domain, queue, group_id);
        let mut groups = self.groups.lock();
        if let Some(entry) = groups.get_mut(&key) {
            entry.consumer_ids.remove(consumer_id);
            entry.last_activity = Utc::now();
            if entry.consumer_ids.is_empty() && entry.registered_in_matrix {
                self.store.ack_matrix_for(domain, queue).lock().remove_group(group_id);
                entry.registered_in_matrix = false;
            }
        }
    }

    /// Drops every group scoped to (domain, queue) without touching the
    /// AckMatrix — used on queue/domain deletion, where the whole matrix is
    /// discarded alongside the message log anyway.
    pub fn remove_all_for_queue(&self, domain: &str, queue: &str) {
        self.groups.lock().retain(|(d, q, _), _| !(d == domain && q == queue));
    }

    pub fn set_ttl(&self, domain: &str, queue: &str, group_id: &str, ttl: Duration) {
        let key = Self::key(domain, queue, group_id);
        let mut groups = self.groups.lock();
        let entry = groups.entry(key).or_insert_with(|| ConsumerGroup::new(Duration::ZERO));
        entry.ttl = ttl;
    }

    pub fn update_last_activity(&self, domain: &str, queue: &str, group_id: &str) {
        let key = Self::key(domain, queue, group_id);
        if let Some(entry) = self.groups.lock().get_mut(&key) {
            entry.last_activity = Utc::now();
        }
    }

    pub fn details(&self, domain: &str, queue: &str, group_id: &str) -> Option<ConsumerGroupDetails> {
        let key = Self::key(domain, queue, group_id);
        self.groups.lock().get(&key).map(|g| ConsumerGroupDetails {
            domain: domain.to_string(),
            queue: queue.to_string(),
            group_id: group_id.to_string(),
            position: g.position,
            consumer_ids: g.consumer_ids.iter().cloned().collect(),
            created_at: g.created_at,
            last_activity: g.last_activity,
            ttl_ms: g.ttl.as_millis() as u64,
        })
    }

    pub fn list_for_queue(&self, domain: &str, queue: &str) -> Vec<ConsumerGroupDetails> {
        self.groups
            .lock()
            .iter()
            .filter(|((d, q, _), _)| d == domain && q == queue)
            .map(|((d, q, g), group)| ConsumerGroupDetails {
                domain: d.clone(),
                queue: q.clone(),
                group_id: g.clone(),
                position: group.position,
                consumer_ids: group.consumer_ids.iter().cloned().collect(),
                created_at: group.created_at,
                last_activity: group.last_activity,
                ttl_ms: group.ttl.as_millis() as u64,
            })
            .collect()
    }

    pub fn list_all(&self) -> Vec<ConsumerGroupDetails> {
        self.groups
            .lock()
            .iter()
            .map(|((d, q, g), group)| ConsumerGroupDetails {
                domain: d.clone(),
                queue: q.clone(),
                group_id: g.clone(),
                position: group.position,
                consumer_ids: group.consumer_ids.iter().cloned().collect(),
                created_at: group.created_at,
                last_activity: group.last_activity,
                ttl_ms: group.ttl.as_millis() as u64,
            })
            .collect()
    }

    /// Scans all groups under the registry lock (bounded by `lock_timeout`)
    /// and reaps those idle longer than their effective TTL. Reaping a
    /// group removes it and deletes any messages that become fully
    /// acknowledged as a result.
    pub fn reap(&self) -> Result<Vec<(String, String, Vec<String>)>, GroupError> {
        let mut groups = self
            .groups
            .try_lock_for(self.lock_timeout)
            .ok_or(GroupError::ReaperLockTimeout)?;

        let now = Utc::now();
        let mut freed = Vec::new();
        let expired: Vec<GroupKey> = groups
            .iter()
            .filter(|(_, g)| {
                let ttl = g.effective_ttl(self.default_ttl);
                now.signed_duration_since(g.last_activity).to_std().map(|age| age > ttl).unwrap_or(false)
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            if let Some(group) = groups.remove(&key) {
                let (domain, queue, group_id) = key;
                let newly_empty = if group.registered_in_matrix {
                    self.store.ack_matrix_for(&domain, &queue).lock().remove_group(&group_id)
                } else {
                    Vec::new()
                };
                freed.push((domain, queue, newly_empty));
            }
        }

        Ok(freed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ConsumerGroupRegistry {
        let store = Arc::new(MessageStore::new());
        store.declare_queue("d1", "q1");
        ConsumerGroupRegistry::new(store, Duration::from_secs(3600), Duration::from_secs(30))
    }

    #[test]
    fn position_regressions_are_ignored() {
        let reg = registry();
        reg.register("d1", "q1", "g1", None);
        reg.store_position("d1", "q1", "g1", 5);
        reg.store_position("d1", "q1", "g1", 2);
        assert_eq!(reg.get_position("d1", "q1", "g1"), 5);
    }

    #[test]
    fn missing_group_position_is_zero() {
        let reg = registry();
        assert_eq!(reg.get_position("d1", "q1", "ghost"), 0);
    }

    #[test]
    fn remove_last_consumer_keeps_group_but_clears_matrix_claim() {
        let reg = registry();
        reg.register("d1", "q1", "g1", Some("c1"));
        reg.remove_consumer("d1", "q1", "g1", "c1");
        let details = reg.details("d1", "q1", "g1").unwrap();
        assert!(details.consumer_ids.is_empty());
    }

    #[test]
    fn reap_removes_groups_past_ttl() {
        let store = Arc::new(MessageStore::new());
        store.declare_queue("d1", "q1");
        let reg = ConsumerGroupRegistry::new(store, Duration::from_millis(50), Duration::from_secs(30));
        reg.register("d1", "q1", "g1", None);
        reg.set_ttl("d1", "q1", "g1", Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(20));
        let freed = reg.reap().unwrap();
        assert_eq!(freed.len(), 1);
        assert!(reg.details("d1", "q1", "g1").is_none());
    }
}
