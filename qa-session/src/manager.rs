//! Chat session orchestration.
//!
//! Resolves a user's state through the fallback chain
//! (cache, local snapshot, remote object store), runs one QA turn, and
//! caches the new state.

use crate::cache::SessionCache;
use crate::capability::QaCapability;
use crate::error::{SessionError, SessionResult};
use crate::eviction::{EvictionScheduler, SweepReport};
use crate::locks::UserLocks;
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::snapshot::{SnapshotError, SnapshotStore};
use crate::state::{require_field, QaState};
use qa_common::config::{Config, ExpiryMode, ObjectStoreConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Where a turn's prior state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateSource {
    Cache,
    Snapshot,
    Remote,
}

impl std::fmt::Display for StateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::Snapshot => write!(f, "snapshot"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Result of a successful chat turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub answer: String,
    pub source: StateSource,
}

/// Runtime knobs for [`ChatSessionManager`].
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub remote: ObjectStoreConfig,
    pub fetch_timeout: Duration,
    pub session_timeout: Duration,
    pub expiry: ExpiryMode,
    pub write_through: bool,
    pub eviction_enabled: bool,
    pub eviction_interval: Duration,
}

impl ManagerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            remote: config.object_store.clone(),
            fetch_timeout: config.object_store.timeout(),
            session_timeout: config.session.timeout(),
            expiry: config.session.expiry,
            write_through: config.session.write_through,
            eviction_enabled: config.eviction.enabled,
            eviction_interval: config.eviction.interval(),
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Per-user QA session manager.
pub struct ChatSessionManager {
    cache: SessionCache,
    snapshots: SnapshotStore,
    object_store: Arc<dyn ObjectStore>,
    capability: Arc<dyn QaCapability>,
    locks: UserLocks,
    settings: ManagerSettings,
    scheduler: Mutex<EvictionScheduler>,
}

impl ChatSessionManager {
    pub fn new(
        settings: ManagerSettings,
        snapshots: SnapshotStore,
        object_store: Arc<dyn ObjectStore>,
        capability: Arc<dyn QaCapability>,
    ) -> Self {
        let cache = SessionCache::new(settings.session_timeout, settings.expiry);
        let locks = UserLocks::new();
        let scheduler = EvictionScheduler::new(
            cache.clone(),
            snapshots.clone(),
            locks.clone(),
            settings.eviction_interval,
        );

        Self {
            cache,
            snapshots,
            object_store,
            capability,
            locks,
            settings,
            scheduler: Mutex::new(scheduler),
        }
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Number of users with a cached session.
    pub async fn active_sessions(&self) -> usize {
        self.cache.snapshot().await.len()
    }

    /// Start background eviction, unless disabled in settings.
    pub async fn start_eviction(&self) {
        if !self.settings.eviction_enabled {
            tracing::info!("Background eviction disabled");
            return;
        }
        self.scheduler.lock().await.start();
    }

    /// Run one eviction pass immediately.
    pub async fn sweep_now(&self) -> SweepReport {
        self.scheduler.lock().await.sweep_once().await
    }

    /// Stop background work. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.scheduler.lock().await.stop().await;
        tracing::info!("Chat session manager stopped");
    }

    /// Answer one question for a user.
    pub async fn chat(
        &self,
        user_id: Option<&str>,
        question: Option<&str>,
    ) -> SessionResult<ChatReply> {
        let (Some(user_id), Some(question)) = (require_field(user_id), require_field(question))
        else {
            return Err(SessionError::Validation("Missing user_id or question".into()));
        };

        let _turn = self.locks.lock(user_id).await;

        let (state, source) = self.resolve_state(user_id).await?;
        tracing::debug!(user_id = %user_id, source = %source, "Resolved session state");

        let (answer, next_state) =
            self.capability
                .invoke(state, question)
                .await
                .map_err(|e| {
                    tracing::error!(user_id = %user_id, error = %format!("{e:#}"), "QA invocation failed");
                    SessionError::Processing {
                        user_id: user_id.to_string(),
                        reason: format!("{e:#}"),
                    }
                })?;

        if self.settings.write_through {
            if let Err(e) = self.snapshots.save(user_id, &next_state).await {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to write snapshot");
            }
        }
        self.cache.put(user_id, next_state).await;

        tracing::info!(user_id = %user_id, source = %source, "Chat turn completed");
        Ok(ChatReply { answer, source })
    }

    /// End a user's session. Succeeds whether or not a session existed.
    pub async fn end_chat(&self, user_id: Option<&str>) -> SessionResult<()> {
        let Some(user_id) = require_field(user_id) else {
            return Err(SessionError::Validation("Missing user_id".into()));
        };

        let _turn = self.locks.lock(user_id).await;

        let cached = self.cache.remove(user_id).await;
        let deleted = self.snapshots.delete(user_id).await.map_err(|e| {
            tracing::error!(user_id = %user_id, error = %e, "Failed to delete snapshot");
            SessionError::Internal(e.to_string())
        })?;

        tracing::info!(user_id = %user_id, cached, deleted, "Chat ended");
        Ok(())
    }

    async fn resolve_state(&self, user_id: &str) -> SessionResult<(QaState, StateSource)> {
        if let Some(state) = self.cache.get(user_id).await {
            return Ok((state, StateSource::Cache));
        }

        if let Some(state) = self.load_local(user_id).await? {
            return Ok((state, StateSource::Snapshot));
        }

        self.fetch_remote(user_id).await?;

        match self.snapshots.load(user_id).await {
            Ok(state) => Ok((state, StateSource::Remote)),
            Err(SnapshotError::NotFound { .. }) => {
                tracing::info!(user_id = %user_id, "No stored session");
                self.discard_snapshot(user_id).await;
                Err(SessionError::NoSessionFound {
                    user_id: user_id.to_string(),
                })
            }
            Err(SnapshotError::Corrupt { path, reason }) => {
                tracing::error!(
                    user_id = %user_id,
                    path = %path.display(),
                    reason = %reason,
                    "Downloaded snapshot is corrupt"
                );
                self.discard_snapshot(user_id).await;
                Err(SessionError::CorruptSnapshot {
                    user_id: user_id.to_string(),
                    reason,
                })
            }
            Err(e @ SnapshotError::Io(_)) => Err(self.io_failure(user_id, e)),
        }
    }

    /// Local snapshot lookup. Corrupt or vanished files count as a miss.
    async fn load_local(&self, user_id: &str) -> SessionResult<Option<QaState>> {
        if !self.snapshots.exists(user_id).await {
            return Ok(None);
        }

        match self.snapshots.load(user_id).await {
            Ok(state) => Ok(Some(state)),
            Err(SnapshotError::NotFound { .. }) => {
                tracing::debug!(user_id = %user_id, "Snapshot vanished before load");
                Ok(None)
            }
            Err(SnapshotError::Corrupt { path, reason }) => {
                tracing::warn!(
                    user_id = %user_id,
                    path = %path.display(),
                    reason = %reason,
                    "Corrupt snapshot, refetching"
                );
                self.discard_snapshot(user_id).await;
                Ok(None)
            }
            Err(e @ SnapshotError::Io(_)) => Err(self.io_failure(user_id, e)),
        }
    }

    async fn fetch_remote(&self, user_id: &str) -> SessionResult<()> {
        let remote = &self.settings.remote;
        let key = remote.remote_key(user_id);
        let dest = self
            .snapshots
            .prepare(user_id)
            .await
            .map_err(|e| self.io_failure(user_id, e))?;

        tracing::debug!(
            user_id = %user_id,
            store = self.object_store.name(),
            bucket = %remote.bucket,
            key = %key,
            "Fetching remote state"
        );

        let download = self.object_store.download(&remote.bucket, &key, &dest);
        match tokio::time::timeout(self.settings.fetch_timeout, download).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(ObjectStoreError::NotFound { .. })) => Ok(()),
            Ok(Err(ObjectStoreError::Transient(reason))) => {
                tracing::error!(user_id = %user_id, key = %key, reason = %reason, "Remote fetch failed");
                Err(SessionError::UpstreamUnavailable {
                    user_id: user_id.to_string(),
                    reason,
                })
            }
            Err(_) => {
                tracing::error!(
                    user_id = %user_id,
                    key = %key,
                    timeout_ms = self.settings.fetch_timeout.as_millis() as u64,
                    "Remote fetch timed out"
                );
                Err(SessionError::UpstreamUnavailable {
                    user_id: user_id.to_string(),
                    reason: "download timed out".into(),
                })
            }
        }
    }

    async fn discard_snapshot(&self, user_id: &str) {
        if let Err(e) = self.snapshots.delete(user_id).await {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to delete corrupt snapshot");
        }
    }

    fn io_failure(&self, user_id: &str, err: SnapshotError) -> SessionError {
        tracing::error!(user_id = %user_id, error = %err, "Snapshot storage failed");
        SessionError::Internal(err.to_string())
    }
}
