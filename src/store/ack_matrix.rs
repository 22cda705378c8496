//! Per-queue acknowledgment bookkeeping (§4.2). A message is eligible for
//! physical deletion once every group that was live when it was registered
//! has acknowledged it.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct AckMatrix {
    live_groups: HashSet<String>,
    pending: HashMap<String, HashSet<String>>,
}

impl AckMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a group to the live set. Does NOT retroactively attach to
    /// messages already registered — a group is only responsible for
    /// messages published after it joined (§4.2 rationale).
    pub fn register_group(&mut self, group_id: &str) {
        self.live_groups.insert(group_id.to_string());
    }

    /// Records a message's pending-set as a snapshot of the current live
    /// groups.
    pub fn register_message(&mut self, message_id: &str) {
        self.pending
            .insert(message_id.to_string(), self.live_groups.clone());
    }

    /// Removes `group_id` from the pending-set of `message_id`. Returns
    /// `true` iff the set just became empty (caller should physically
    /// delete the message). Idempotent: a second acknowledge of the same
    /// pair returns `false`.
    pub fn acknowledge(&mut self, message_id: &str, group_id: &str) -> bool {
        match self.pending.get_mut(message_id) {
            Some(set) => {
                let removed = set.remove(group_id);
                if removed && set.is_empty() {
                    self.pending.remove(message_id);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// Removes a group from the live set and from every pending-set.
    /// Returns the ids whose pending-set just became empty.
    pub fn remove_group(&mut self, group_id: &str) -> Vec<String> {
        self.live_groups.remove(group_id);
        let mut newly_empty = Vec::new();
        self.pending.retain(|message_id, set| {
            set.remove(group_id);
            if set.is_empty() {
                newly_empty.push(message_id.clone());
                false
            } else {
                true
            }
        });
        newly_empty
    }

    pub fn pending_count(&self, group_id: &str) -> usize {
        self.pending
            .values()
            .filter(|set| set.contains(group_id))
            .count()
    }

    pub fn pending_ids(&self, group_id: &str) -> Vec<String> {
        self.pending
            .iter()
            .filter(|(_, set)| set.contains(group_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Drops all bookkeeping for a message without requiring group
    /// acknowledgment — used when a message is deleted outright (TTL
    /// expiry, queue purge).
    pub fn forget_message(&mut self, message_id: &str) {
        self.pending.remove(message_id);
    }

    pub fn is_live_group(&self, group_id: &str) -> bool {
        self.live_groups.contains(group_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acknowledge_is_idempotent() {
        let mut matrix = AckMatrix::new();
        matrix.register_group("g1");
        matrix.register_message("m1");

        assert!(matrix.acknowledge("m1", "g1"));
        assert!(!matrix.acknowledge("m1", "g1"));
    }

    #[test]
    fn message_retained_until_every_live_group_acks() {
        let mut matrix = AckMatrix::new();
        matrix.register_group("g1");
        matrix.register_group("g2");
        matrix.register_message("m1");

        assert!(!matrix.acknowledge("m1", "g1"));
        assert!(matrix.acknowledge("m1", "g2"));
    }

    #[test]
    fn joining_late_does_not_retroactively_attach() {
        let mut matrix = AckMatrix::new();
        matrix.register_group("g1");
        matrix.register_message("m1");
        matrix.register_group("g2");

        // g2 never owed an ack for m1, so g1 alone suffices.
        assert!(matrix.acknowledge("m1", "g1"));
    }

    #[test]
    fn remove_group_frees_messages_it_was_blocking() {
        let mut matrix = AckMatrix::new();
        matrix.register_group("g1");
        matrix.register_group("g2");
        matrix.register_message("m1");
        matrix.register_message("m2");
        matrix.acknowledge("m2", "g2");

        let freed = matrix.remove_group("g1");
        assert_eq!(freed.len(), 2);
        assert!(!matrix.is_live_group("g1"));
    }
}
