//! Work queue bookkeeping.
//!
//! A key is in at most one of `pending` or `in_flight`. Adding a key that is
//! in flight marks it dirty instead, and it goes back on the queue when its
//! current pass finishes.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::core::types::ObjectKey;

#[derive(Debug, Default)]
pub(crate) struct WorkQueue {
    pending: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    in_flight: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
}

impl WorkQueue {
    /// Ask for a pass over `key`.
    pub(crate) fn add(&mut self, key: ObjectKey) {
        if self.in_flight.contains(&key) {
            self.dirty.insert(key);
        } else if self.queued.insert(key.clone()) {
            self.pending.push_back(key);
        }
    }

    /// Take the next key and mark it in flight.
    pub(crate) fn next(&mut self) -> Option<ObjectKey> {
        let key = self.pending.pop_front()?;
        self.queued.remove(&key);
        self.in_flight.insert(key.clone());
        Some(key)
    }

    /// Finish the pass over `key`. Requeues it if it was marked dirty.
    pub(crate) fn done(&mut self, key: &ObjectKey) {
        self.in_flight.remove(key);
        if self.dirty.remove(key) {
            self.add(key.clone());
        }
    }

    /// Count a failed pass and return the consecutive failure count.
    pub(crate) fn record_failure(&mut self, key: &ObjectKey) -> u32 {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        *failures = failures.saturating_add(1);
        *failures
    }

    /// Reset the failure count after a successful pass.
    pub(crate) fn forget(&mut self, key: &ObjectKey) {
        self.failures.remove(key);
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub(crate) fn failing(&self) -> usize {
        self.failures.len()
    }
}
