//! Append-only per-(domain,queue) message log with random access by id and
//! by index range (§4.1), plus the per-queue AckMatrix (§4.2).
//!
//! Index assignment happens under a per-queue write lock; `get_range` takes
//! a read lock on the same structure. The AckMatrix lives behind its own
//! lock per queue (§5's "one lock per matrix"); callers that need both
//! (the QueueHandler) acquire Matrix before Store, never the reverse.

pub mod ack_matrix;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::model::Message;
pub use ack_matrix::AckMatrix;

pub type QueueKey = (String, String);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("domain or queue unknown: {0}/{1}")]
    DomainOrQueueUnknown(String, String),
    #[error("message not found")]
    MessageNotFound,
}

struct QueueLog {
    next_index: i64,
    /// index -> id; `None` marks a tombstoned (physically deleted) slot that
    /// `get_range` skips and lazily purges on iteration.
    index_to_id: BTreeMap<i64, Option<String>>,
    id_to_index: HashMap<String, i64>,
    messages: HashMap<String, Message>,
}

impl QueueLog {
    fn new() -> Self {
        Self {
            next_index: 0,
            index_to_id: BTreeMap::new(),
            id_to_index: HashMap::new(),
            messages: HashMap::new(),
        }
    }
}

pub struct MessageStore {
    logs: DashMap<QueueKey, Arc<RwLock<QueueLog>>>,
    ack_matrices: DashMap<QueueKey, Arc<Mutex<AckMatrix>>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self {
            logs: DashMap::new(),
            ack_matrices: DashMap::new(),
        }
    }

    /// Declares a queue so subsequent appends succeed. Idempotent.
    pub fn declare_queue(&self, domain: &str, queue: &str) {
        let key = (domain.to_string(), queue.to_string());
        self.logs.entry(key.clone()).or_insert_with(|| Arc::new(RwLock::new(QueueLog::new())));
        self.ack_matrices.entry(key).or_insert_with(|| Arc::new(Mutex::new(AckMatrix::new())));
    }

    pub fn delete_queue(&self, domain: &str, queue: &str) {
        let key = (domain.to_string(), queue.to_string());
        self.logs.remove(&key);
        self.ack_matrices.remove(&key);
    }

    fn log(&self, domain: &str, queue: &str) -> Result<Arc<RwLock<QueueLog>>, StoreError> {
        self.logs
            .get(&(domain.to_string(), queue.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::DomainOrQueueUnknown(domain.to_string(), queue.to_string()))
    }

    pub fn append(&self, domain: &str, queue: &str, message: Message) -> Result<i64, StoreError> {
        let log = self.log(domain, queue)?;
        let mut log = log.write();
        let index = log.next_index;
        log.next_index += 1;
        log.index_to_id.insert(index, Some(message.id.clone()));
        log.id_to_index.insert(message.id.clone(), index);
        log.messages.insert(message.id.clone(), message);
        Ok(index)
    }

    pub fn get_by_id(&self, domain: &str, queue: &str, id: &str) -> Result<Message, StoreError> {
        let log = self.log(domain, queue)?;
        let log = log.read();
        log.messages.get(id).cloned().ok_or(StoreError::MessageNotFound)
    }

    pub fn index_of(&self, domain: &str, queue: &str, id: &str) -> Result<i64, StoreError> {
        let log = self.log(domain, queue)?;
        let log = log.read();
        log.id_to_index.get(id).copied().ok_or(StoreError::MessageNotFound)
    }

    pub fn next_index(&self, domain: &str, queue: &str) -> Result<i64, StoreError> {
        let log = self.log(domain, queue)?;
        Ok(log.read().next_index)
    }

    /// Messages whose index >= `start_index`, up to `limit`, in publish
    /// order. Tombstoned slots (physically deleted messages) are skipped;
    /// encountering one lazily purges the stale index entry.
    pub fn get_range(&self, domain: &str, queue: &str, start_index: i64, limit: usize) -> Result<Vec<(i64, Message)>, StoreError> {
        let log = self.log(domain, queue)?;
        let log = log.read();
        let mut out = Vec::with_capacity(limit.min(64));
        for (&index, maybe_id) in log.index_to_id.range(start_index..) {
            if out.len() >= limit {
                break;
            }
            if let Some(id) = maybe_id {
                if let Some(message) = log.messages.get(id) {
                    out.push((index, message.clone()));
                }
            }
        }
        Ok(out)
    }

    /// Removes a message; the `index -> id` entry is retained (marked
    /// stale) so `get_range` can tombstone it lazily (§4.1).
    pub fn delete(&self, domain: &str, queue: &str, id: &str) -> Result<(), StoreError> {
        let log = self.log(domain, queue)?;
        let mut log = log.write();
        if log.messages.remove(id).is_none() {
            return Err(StoreError::MessageNotFound);
        }
        if let Some(index) = log.id_to_index.remove(id) {
            log.index_to_id.insert(index, None);
        }
        Ok(())
    }

    /// Opportunistic compaction: drops index entries below `min_index` once
    /// every live group has advanced past them.
    pub fn purge_indices_below(&self, domain: &str, queue: &str, min_index: i64) -> Result<(), StoreError> {
        let log = self.log(domain, queue)?;
        let mut log = log.write();
        let stale: Vec<i64> = log.index_to_id.range(..min_index).map(|(&i, _)| i).collect();
        for index in stale {
            log.index_to_id.remove(&index);
        }
        Ok(())
    }

    pub fn len(&self, domain: &str, queue: &str) -> Result<usize, StoreError> {
        let log = self.log(domain, queue)?;
        Ok(log.read().messages.len())
    }

    /// Returns (lazily creating) the per-queue AckMatrix handle.
    pub fn ack_matrix_for(&self, domain: &str, queue: &str) -> Arc<Mutex<AckMatrix>> {
        self.ack_matrices
            .entry((domain.to_string(), queue.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(AckMatrix::new())))
            .value()
            .clone()
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}
