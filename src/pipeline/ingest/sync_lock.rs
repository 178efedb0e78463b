//! Per-exam mutual exclusion for result synchronization.
//!
//! A sync for one exam must not overlap another sync for the same exam:
//! both push and poll completion paths, and the webhook, may try to commit
//! the same payload. The registry hands out one lease per exam id; dropping
//! the lease releases it on every exit path, including `?` and panics.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct SyncLockRegistry {
    held: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl SyncLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for `exam_id`, or `None` if a sync already holds it.
    pub fn try_acquire(&self, exam_id: Uuid) -> Option<SyncLease<'_>> {
        let mut held = self.held();
        if held.contains_key(&exam_id) {
            return None;
        }
        held.insert(exam_id, Utc::now());
        Some(SyncLease {
            registry: self,
            exam_id,
        })
    }

    pub fn is_held(&self, exam_id: &Uuid) -> bool {
        self.held().contains_key(exam_id)
    }

    /// When the current lease for `exam_id` was taken.
    pub fn held_since(&self, exam_id: &Uuid) -> Option<DateTime<Utc>> {
        self.held().get(exam_id).copied()
    }

    // The map stays valid across a panic in another holder; keep serving.
    fn held(&self) -> MutexGuard<'_, HashMap<Uuid, DateTime<Utc>>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, exam_id: &Uuid) {
        self.held().remove(exam_id);
    }
}

/// RAII lease on one exam's sync slot.
#[derive(Debug)]
pub struct SyncLease<'a> {
    registry: &'a SyncLockRegistry,
    exam_id: Uuid,
}

impl SyncLease<'_> {
    pub fn exam_id(&self) -> Uuid {
        self.exam_id
    }
}

impl Drop for SyncLease<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.exam_id);
    }
}
