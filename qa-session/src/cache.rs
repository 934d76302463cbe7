//! In-memory session cache.
//!
//! Maps a user id to its live [`QaState`]. The map is the single source of
//! truth for whether a user's session is live; keys are unique, so there is
//! never more than one entry per user.

use crate::state::QaState;
use chrono::{DateTime, Duration, Utc};
use qa_common::config::ExpiryMode;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A cached session.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub user_id: String,
    pub state: QaState,
    pub last_access: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionEntry {
    fn new(user_id: String, state: QaState, timeout: Duration) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            state,
            last_access: now,
            expires_at: now + timeout,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
}

/// Shared per-user session cache.
///
/// Cloning is cheap and yields a handle to the same map.
#[derive(Debug, Clone)]
pub struct SessionCache {
    entries: Arc<RwLock<HashMap<String, SessionEntry>>>,
    timeout: Duration,
    expiry: ExpiryMode,
}

impl SessionCache {
    pub fn new(timeout: std::time::Duration, expiry: ExpiryMode) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            timeout: Duration::from_std(timeout).unwrap_or_else(|_| Duration::minutes(10)),
            expiry,
        }
    }

    pub fn expiry_mode(&self) -> ExpiryMode {
        self.expiry
    }

    fn is_valid(&self, entry: &SessionEntry, now: DateTime<Utc>) -> bool {
        match self.expiry {
            ExpiryMode::Presence => true,
            ExpiryMode::Strict => !entry.is_expired_at(now),
        }
    }

    /// Cached state for a user, if the session is live.
    ///
    /// In strict mode an expired entry is dropped and reported as a miss.
    pub async fn get(&self, user_id: &str) -> Option<QaState> {
        let now = Utc::now();
        {
            let entries = self.entries.read().await;
            match entries.get(user_id) {
                None => return None,
                Some(entry) if self.is_valid(entry, now) => return Some(entry.state.clone()),
                Some(_) => {}
            }
        }

        // Expired: re-check under the write lock, a concurrent put may have refreshed it.
        let mut entries = self.entries.write().await;
        if entries
            .get(user_id)
            .is_some_and(|entry| !self.is_valid(entry, now))
        {
            entries.remove(user_id);
            tracing::debug!(user_id = %user_id, "Session expired on read");
        }
        None
    }

    /// Insert or replace a user's state and restart its expiry clock.
    pub async fn put(&self, user_id: &str, state: QaState) {
        let entry = SessionEntry::new(user_id.to_string(), state, self.timeout);
        let mut entries = self.entries.write().await;

        if self.expiry == ExpiryMode::Strict {
            let now = entry.last_access;
            let before = entries.len();
            entries.retain(|_, e| !e.is_expired_at(now));
            let purged = before - entries.len();
            if purged > 0 {
                tracing::debug!(purged, "Dropped expired sessions");
            }
        }

        entries.insert(user_id.to_string(), entry);
    }

    /// Remove a user's entry. Returns whether one was present.
    pub async fn remove(&self, user_id: &str) -> bool {
        self.entries.write().await.remove(user_id).is_some()
    }

    /// Whether the user has a valid entry right now.
    pub async fn is_live(&self, user_id: &str) -> bool {
        let now = Utc::now();
        self.entries
            .read()
            .await
            .get(user_id)
            .is_some_and(|entry| self.is_valid(entry, now))
    }

    /// Ids of all users with a valid entry.
    pub async fn snapshot(&self) -> Vec<String> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        let mut ids: Vec<String> = entries
            .values()
            .filter(|entry| self.is_valid(entry, now))
            .map(|entry| entry.user_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Full entry for a user, regardless of validity.
    pub async fn entry(&self, user_id: &str) -> Option<SessionEntry> {
        self.entries.read().await.get(user_id).cloned()
    }

    /// Number of stored entries, including expired ones not yet dropped.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let entries = self.entries.read().await;
        let total = entries.len();
        let expired = entries.values().filter(|e| e.is_expired_at(now)).count();

        CacheStats {
            total_entries: total,
            expired_entries: expired,
            active_entries: total - expired,
        }
    }
}
