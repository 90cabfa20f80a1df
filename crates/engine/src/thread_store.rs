//! TTL-evicting map of conversation states.
//!
//! Memory-resident only: threads survive as long as they are touched within
//! the TTL. A background reaper sweeps expired entries every five minutes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::state::AgentState;

/// Reaper sweep interval.
pub const REAP_INTERVAL: Duration = Duration::from_secs(300);

/// Default entry TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

struct ThreadEntry {
    state: Arc<AgentState>,
    last_access: Instant,
}

pub struct ThreadStore {
    ttl: Duration,
    inner: RwLock<HashMap<String, ThreadEntry>>,
}

impl ThreadStore {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            ttl,
            inner: RwLock::new(HashMap::new()),
        })
    }

    /// Fetch the state for a thread, creating it on first reference.
    /// Touches `last_access`.
    pub fn load_or_create(&self, thread_id: &str) -> Arc<AgentState> {
        // Fast path under the read lock.
        {
            let inner = self.inner.read();
            if let Some(entry) = inner.get(thread_id) {
                let state = entry.state.clone();
                drop(inner);
                self.touch(thread_id);
                return state;
            }
        }

        let mut inner = self.inner.write();
        inner
            .entry(thread_id.to_string())
            .or_insert_with(|| ThreadEntry {
                state: AgentState::new(thread_id),
                last_access: Instant::now(),
            })
            .state
            .clone()
    }

    pub fn get(&self, thread_id: &str) -> Option<Arc<AgentState>> {
        self.inner.read().get(thread_id).map(|e| e.state.clone())
    }

    /// Refresh a thread's TTL after a turn persists its state.
    pub fn touch(&self, thread_id: &str) {
        if let Some(entry) = self.inner.write().get_mut(thread_id) {
            entry.last_access = Instant::now();
        }
    }

    pub fn delete(&self, thread_id: &str) -> bool {
        self.inner.write().remove(thread_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Evict entries idle past the TTL. Returns how many were removed.
    pub fn reap(&self) -> usize {
        let cutoff = Instant::now();
        let mut inner = self.inner.write();
        let before = inner.len();
        inner.retain(|_, entry| cutoff.duration_since(entry.last_access) < self.ttl);
        let removed = before - inner.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = inner.len(), "thread store reaped");
        }
        removed
    }

    /// Spawn the background reaper.
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REAP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                store.reap();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wick_domain::message::Message;

    #[test]
    fn load_or_create_returns_same_state() {
        let store = ThreadStore::new(DEFAULT_TTL);
        let a = store.load_or_create("t1");
        a.push_message(Message::user("hi"));

        let b = store.load_or_create("t1");
        assert_eq!(b.message_count(), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn delete_removes_entry() {
        let store = ThreadStore::new(DEFAULT_TTL);
        store.load_or_create("t1");
        assert!(store.delete("t1"));
        assert!(!store.delete("t1"));
        assert!(store.get("t1").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn reap_evicts_only_expired() {
        let store = ThreadStore::new(Duration::from_millis(20));
        store.load_or_create("old");
        std::thread::sleep(Duration::from_millis(40));
        store.load_or_create("fresh");

        let removed = store.reap();
        assert_eq!(removed, 1);
        assert!(store.get("old").is_none());
        assert!(store.get("fresh").is_some());
    }

    #[test]
    fn touch_extends_lifetime() {
        let store = ThreadStore::new(Duration::from_millis(50));
        store.load_or_create("t1");
        std::thread::sleep(Duration::from_millis(30));
        store.touch("t1");
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(store.reap(), 0);
        assert!(store.get("t1").is_some());
    }
}
