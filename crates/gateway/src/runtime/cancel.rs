//! Per-thread cancellation tokens.
//!
//! Each running turn registers a token under its thread id. A stop request
//! cancels it; the engine notices at its next suspension point.

use std::collections::HashMap;

use parking_lot::Mutex;

use wick_domain::cancel::CancelToken;

#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new cancel token for a thread.
    pub fn register(&self, thread_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(thread_id.to_string(), token.clone());
        token
    }

    /// Cancel a running turn. Returns true if a token was found.
    pub fn cancel(&self, thread_id: &str) -> bool {
        match self.tokens.lock().get(thread_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token when a turn completes.
    pub fn remove(&self, thread_id: &str) {
        self.tokens.lock().remove(thread_id);
    }

    pub fn is_running(&self, thread_id: &str) -> bool {
        self.tokens.lock().contains_key(thread_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_cancel_remove() {
        let map = CancelMap::new();
        let token = map.register("t1");
        assert!(map.is_running("t1"));
        assert!(!token.is_cancelled());

        assert!(map.cancel("t1"));
        assert!(token.is_cancelled());

        map.remove("t1");
        assert!(!map.is_running("t1"));
        assert!(!map.cancel("t1"));
    }

    #[test]
    fn remove_is_idempotent() {
        let map = CancelMap::new();
        map.register("t1");
        map.remove("t1");
        map.remove("t1");
        assert!(!map.is_running("t1"));
    }
}
