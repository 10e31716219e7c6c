//! # Ordered, deduplicated listener collection.
//!
//! [`ListenerSet`] stores the listeners of one stage in registration order and
//! refuses duplicates (same `Arc` address).
//!
//! ## Rules
//! - **Dedup**: `insert` of an already registered listener is a no-op returning `false`
//! - **Order**: snapshots preserve registration order
//! - **Locking**: mutations and snapshots take the same lock; listeners are
//!   invoked by the stage on a snapshot, outside the lock

use std::sync::Arc;

use parking_lot::RwLock;

use crate::listeners::listen::{ListenerRef, addr_of};

pub(crate) struct ListenerSet<P> {
    entries: RwLock<Vec<ListenerRef<P>>>,
}

impl<P> ListenerSet<P> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Adds the listener unless already present; returns `true` if added.
    pub(crate) fn insert(&self, listener: ListenerRef<P>) -> bool {
        let addr = addr_of(&listener);
        let mut entries = self.entries.write();
        if entries.iter().any(|l| addr_of(l) == addr) {
            return false;
        }
        entries.push(listener);
        true
    }

    /// Removes the listener at `addr`; returns `true` if it was present.
    pub(crate) fn remove(&self, addr: usize) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|l| addr_of(l) != addr);
        entries.len() != before
    }

    pub(crate) fn contains(&self, addr: usize) -> bool {
        self.entries.read().iter().any(|l| addr_of(l) == addr)
    }

    /// Registration-ordered copy of the current listeners.
    pub(crate) fn snapshot(&self) -> Vec<ListenerRef<P>> {
        self.entries.read().iter().map(Arc::clone).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}
