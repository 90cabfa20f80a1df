//! Per-thread turn exclusivity.
//!
//! Concurrent turns on one thread are rejected rather than queued: a second
//! request while a turn is in flight gets `TurnBusy` (surfaced as HTTP 409).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct TurnLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for TurnLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the turn lock for a thread without waiting. The permit is
    /// held for the duration of the turn and auto-releases on drop.
    pub fn try_acquire(&self, thread_id: &str) -> Result<OwnedSemaphorePermit, TurnBusy> {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(thread_id.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.try_acquire_owned().map_err(|_| TurnBusy)
    }

    pub fn thread_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop semaphores that are not currently held.
    pub fn prune_idle(&self) {
        self.locks.lock().retain(|_, sem| sem.available_permits() == 0);
    }
}

/// A turn is already in progress on this thread.
#[derive(Debug)]
pub struct TurnBusy;

impl std::fmt::Display for TurnBusy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "a turn is already in progress on this thread")
    }
}

impl std::error::Error for TurnBusy {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_rejected_until_release() {
        let map = TurnLockMap::new();
        let permit = map.try_acquire("t1").unwrap();
        assert!(map.try_acquire("t1").is_err());

        drop(permit);
        assert!(map.try_acquire("t1").is_ok());
    }

    #[test]
    fn different_threads_independent() {
        let map = TurnLockMap::new();
        let _p1 = map.try_acquire("t1").unwrap();
        let _p2 = map.try_acquire("t2").unwrap();
        assert_eq!(map.thread_count(), 2);
    }

    #[test]
    fn prune_keeps_held_locks() {
        let map = TurnLockMap::new();
        let _held = map.try_acquire("busy").unwrap();
        let released = map.try_acquire("idle").unwrap();
        drop(released);

        map.prune_idle();
        assert_eq!(map.thread_count(), 1);
        assert!(map.try_acquire("busy").is_err());
    }
}
