//! Per-user turn locks.
//!
//! Serializes work on one user's session while letting different users run
//! in parallel. Entries are created on demand and dropped from the registry
//! once no guard or waiter references them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Registry = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Registry of per-user async mutexes.
#[derive(Debug, Clone, Default)]
pub struct UserLocks {
    registry: Arc<Registry>,
}

/// Held for the duration of one user's turn.
#[derive(Debug)]
pub struct TurnGuard {
    registry: Arc<Registry>,
    user_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, user_id: &str) -> Arc<AsyncMutex<()>> {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait for and take the user's lock.
    pub async fn lock(&self, user_id: &str) -> TurnGuard {
        let mutex = self.entry(user_id);
        let guard = mutex.lock_owned().await;
        TurnGuard {
            registry: Arc::clone(&self.registry),
            user_id: user_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Take the user's lock only if nobody holds it right now.
    pub fn try_lock(&self, user_id: &str) -> Option<TurnGuard> {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let mutex = registry
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();

        match mutex.try_lock_owned() {
            Ok(guard) => Some(TurnGuard {
                registry: Arc::clone(&self.registry),
                user_id: user_id.to_string(),
                guard: Some(guard),
            }),
            Err(_) => None,
        }
    }

    /// Whether any turn for this user is running or waiting.
    pub fn is_busy(&self, user_id: &str) -> bool {
        let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.contains_key(user_id)
    }

    /// Number of users with a registered lock.
    pub fn len(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        // Release first so the strong count below reflects only other holders.
        drop(self.guard.take());

        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        if registry
            .get(&self.user_id)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            registry.remove(&self.user_id);
        }
    }
}
