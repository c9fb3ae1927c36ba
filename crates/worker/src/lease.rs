//! In-process entity leases.
//!
//! Incremental state must have at most one writer per entity. Jobs claim the
//! entities they are about to advance; anything already claimed by a
//! concurrent run is skipped and picked up by the next one.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct EntityLeases {
    held: Mutex<HashSet<String>>,
}

impl EntityLeases {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claims every free entity in `entity_ids`. Leases are released when the
    /// guard drops.
    pub fn claim<I>(self: &Arc<Self>, entity_ids: I) -> LeaseGuard
    where
        I: IntoIterator<Item = String>,
    {
        let mut held = self.held.lock();
        let mut claimed = Vec::new();
        let mut rejected = Vec::new();
        for id in entity_ids {
            if claimed.contains(&id) {
                continue;
            }
            if held.insert(id.clone()) {
                claimed.push(id);
            } else {
                rejected.push(id);
            }
        }
        LeaseGuard {
            leases: Arc::clone(self),
            claimed,
            rejected,
        }
    }

    pub fn is_held(&self, entity_id: &str) -> bool {
        self.held.lock().contains(entity_id)
    }
}

#[derive(Debug)]
pub struct LeaseGuard {
    leases: Arc<EntityLeases>,
    claimed: Vec<String>,
    rejected: Vec<String>,
}

impl LeaseGuard {
    pub fn claimed(&self) -> &[String] {
        &self.claimed
    }

    /// Entities held by another run.
    pub fn rejected(&self) -> &[String] {
        &self.rejected
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let mut held = self.leases.held.lock();
        for id in &self.claimed {
            held.remove(id);
        }
    }
}
