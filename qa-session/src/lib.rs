//! QA Session - per-user conversation state cache.
//!
//! Keeps each user's QA state in memory while they are chatting, falling
//! back to a local snapshot and then to the remote object store when the
//! state is not cached.
//!
//! ```text
//! chat(user, q) → Cache ──hit──────────────────────────┐
//!                   │miss                              │
//!                   └→ Snapshot ──hit──────────────────┤
//!                        │miss/corrupt                 ├→ QA invoke → Cache.put
//!                        └→ Object store → Snapshot ───┘
//!
//! EvictionScheduler: every interval, delete snapshots with no live cache entry
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod cache;
pub mod capability;
pub mod error;
pub mod eviction;
pub mod locks;
pub mod manager;
pub mod object_store;
pub mod snapshot;
pub mod state;

// Re-export commonly used types
pub use cache::{CacheStats, SessionCache, SessionEntry};
pub use capability::{HttpQaCapability, QaCapability};
pub use error::{SessionError, SessionResult};
pub use eviction::{EvictionScheduler, SweepReport};
pub use locks::{TurnGuard, UserLocks};
pub use manager::{ChatReply, ChatSessionManager, ManagerSettings, StateSource};
pub use object_store::{build_object_store, FsObjectStore, HttpObjectStore, ObjectStore, ObjectStoreError};
pub use snapshot::{SnapshotError, SnapshotStore};
pub use state::QaState;
