//! Name-scoped advisory locks for reconciliation passes.

use crate::error::{Error, Result};
use crate::types::ResourceId;
use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Registry of resources currently held by a pass.
///
/// Keys are case-folded resource ids, so `/VMs/Web-0` and `/vms/web-0`
/// contend for the same lock. Share one registry between all passes that
/// may touch the same resources.
#[derive(Debug, Default)]
pub struct LockRegistry {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `id` is free, or until `deadline` passes.
    ///
    /// Without a deadline this waits indefinitely.
    pub fn acquire(&self, id: &ResourceId, deadline: Option<Instant>) -> Result<ResourceLock<'_>> {
        let key = id.lock_key();
        let mut held = self.held();
        while held.contains(&key) {
            held = match deadline {
                None => self
                    .released
                    .wait(held)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::LockTimeout {
                            resource: id.to_string(),
                        });
                    }
                    self.released
                        .wait_timeout(held, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        held.insert(key.clone());
        log::debug!("acquired reconciliation lock on {id}");
        Ok(ResourceLock {
            registry: self,
            key,
        })
    }

    /// Acquire every id in `ids`, in case-folded key order.
    ///
    /// Passes that need overlapping sets of locks take them in the same
    /// order and cannot deadlock. Duplicate ids are locked once. On failure
    /// the locks taken so far are released.
    pub fn acquire_all(
        &self,
        ids: &[&ResourceId],
        deadline: Option<Instant>,
    ) -> Result<Vec<ResourceLock<'_>>> {
        let mut ordered: Vec<&ResourceId> = ids.to_vec();
        ordered.sort_by_key(|id| id.lock_key());
        ordered.dedup_by_key(|id| id.lock_key());
        ordered
            .into_iter()
            .map(|id| self.acquire(id, deadline))
            .collect()
    }

    /// Take the lock only if nobody holds it.
    pub fn try_acquire(&self, id: &ResourceId) -> Option<ResourceLock<'_>> {
        let key = id.lock_key();
        if !self.held().insert(key.clone()) {
            return None;
        }
        Some(ResourceLock {
            registry: self,
            key,
        })
    }

    pub fn is_held(&self, id: &ResourceId) -> bool {
        self.held().contains(&id.lock_key())
    }

    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Guard for a held lock; released on drop.
#[derive(Debug)]
pub struct ResourceLock<'a> {
    registry: &'a LockRegistry,
    key: String,
}

impl ResourceLock<'_> {
    pub fn covers(&self, id: &ResourceId) -> bool {
        self.key == id.lock_key()
    }
}

impl Drop for ResourceLock<'_> {
    fn drop(&mut self) {
        self.registry.held().remove(&self.key);
        self.registry.released.notify_all();
    }
}
