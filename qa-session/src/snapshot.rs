//! Local snapshot store.
//!
//! One file per user under the snapshot directory, named
//! `{base64url(user_id)}.snapshot`. Encoding the id keeps arbitrary caller
//! supplied ids out of path syntax while still letting [`SnapshotStore::list`]
//! recover them.
//!
//! Ids whose encoding would not fit in a file name are stored under
//! `~{sha256(user_id)}.snapshot` instead, next to a `~{sha256}.owner` file
//! holding the raw id.
//!
//! Two on-disk shapes are accepted:
//! - an envelope written by [`SnapshotStore::save`]
//!   (`{"format": "qa-snapshot", "version": 1, "user_id", "saved_at", "state"}`)
//! - a bare state document, as downloaded from the object store

use crate::object_store::part_path;
use crate::state::QaState;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SNAPSHOT_EXTENSION: &str = "snapshot";
const OWNER_EXTENSION: &str = "owner";
const PART_SUFFIX: &str = ".part";
const DIGEST_MARKER: char = '~';
const ENVELOPE_FORMAT: &str = "qa-snapshot";
const ENVELOPE_VERSION: u32 = 1;

/// Longest base64 stem used verbatim. Leaves room for `.snapshot.part`
/// under the usual 255 byte file name limit.
const MAX_ENCODED_STEM: usize = 200;

/// Snapshot store failures.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("No snapshot for user {user_id}")]
    NotFound { user_id: String },

    #[error("Corrupt snapshot {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Snapshot IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format: String,
    version: u32,
    user_id: String,
    saved_at: DateTime<Utc>,
    state: QaState,
}

/// Result of scanning the snapshot directory.
#[derive(Debug, Default)]
pub struct SnapshotScan {
    /// Users owning a snapshot or a leftover partial download, sorted.
    pub users: Vec<String>,
    /// Digest-named files whose owner can no longer be determined.
    pub orphans: Vec<PathBuf>,
}

/// File-backed per-user snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

fn stem_for(user_id: &str) -> String {
    let encoded = URL_SAFE_NO_PAD.encode(user_id.as_bytes());
    if encoded.len() <= MAX_ENCODED_STEM {
        encoded
    } else {
        format!("{DIGEST_MARKER}{}", hex::encode(Sha256::digest(user_id.as_bytes())))
    }
}

fn is_digest_stem(stem: &str) -> bool {
    stem.starts_with(DIGEST_MARKER)
}

/// Recover the user id from a base64 stem.
fn user_id_from_stem(stem: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
    String::from_utf8(bytes).ok().filter(|id| !id.is_empty())
}

async fn remove_if_present(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

impl SnapshotStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of a user's snapshot.
    ///
    /// Writers should go through [`SnapshotStore::prepare`], which also
    /// records the owner of digest-named files.
    pub fn path_for(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("{}.{SNAPSHOT_EXTENSION}", stem_for(user_id)))
    }

    fn owner_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.{OWNER_EXTENSION}"))
    }

    /// Get the destination for a new snapshot of `user_id`.
    pub async fn prepare(&self, user_id: &str) -> Result<PathBuf, SnapshotError> {
        let stem = stem_for(user_id);
        if is_digest_stem(&stem) {
            tokio::fs::write(self.owner_path(&stem), user_id.as_bytes()).await?;
        }
        Ok(self.dir.join(format!("{stem}.{SNAPSHOT_EXTENSION}")))
    }

    pub async fn exists(&self, user_id: &str) -> bool {
        tokio::fs::try_exists(self.path_for(user_id))
            .await
            .unwrap_or(false)
    }

    /// Load and decode a user's snapshot.
    pub async fn load(&self, user_id: &str) -> Result<QaState, SnapshotError> {
        let path = self.path_for(user_id);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SnapshotError::NotFound {
                    user_id: user_id.to_string(),
                })
            }
            Err(e) => return Err(SnapshotError::Io(e)),
        };

        decode(user_id, &bytes).map_err(|reason| SnapshotError::Corrupt { path, reason })
    }

    /// Write a user's state atomically (temporary file, then rename).
    pub async fn save(&self, user_id: &str, state: &QaState) -> Result<(), SnapshotError> {
        let path = self.prepare(user_id).await?;
        let envelope = SnapshotEnvelope {
            format: ENVELOPE_FORMAT.to_string(),
            version: ENVELOPE_VERSION,
            user_id: user_id.to_string(),
            saved_at: Utc::now(),
            state: state.clone(),
        };
        let bytes = serde_json::to_vec(&envelope).map_err(|e| SnapshotError::Corrupt {
            path: path.clone(),
            reason: format!("serialization failed: {e}"),
        })?;

        let part = part_path(&path);
        tokio::fs::write(&part, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&part, &path).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(SnapshotError::Io(e));
        }
        Ok(())
    }

    /// Delete a user's snapshot along with any partial download and owner
    /// record. Deleting a missing snapshot is not an error.
    ///
    /// Returns whether a snapshot file was removed.
    pub async fn delete(&self, user_id: &str) -> Result<bool, SnapshotError> {
        let stem = stem_for(user_id);
        let path = self.path_for(user_id);

        let removed = remove_if_present(&path).await?;
        remove_if_present(&part_path(&path)).await?;
        if is_digest_stem(&stem) {
            remove_if_present(&self.owner_path(&stem)).await?;
        }
        Ok(removed)
    }

    /// All users with a snapshot on disk.
    pub async fn list(&self) -> Result<Vec<String>, SnapshotError> {
        Ok(self.scan().await?.users)
    }

    /// Walk the snapshot directory.
    ///
    /// Users are recovered from base64 stems or owner records; partial
    /// downloads count for their owner. Unrelated files are skipped.
    pub async fn scan(&self) -> Result<SnapshotScan, SnapshotError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SnapshotScan::default()),
            Err(e) => return Err(SnapshotError::Io(e)),
        };

        let mut users = BTreeSet::new();
        let mut owned_digests = HashSet::new();
        let mut digest_files = Vec::new();
        let mut orphans = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
                continue;
            };

            if let Some(stem) = name
                .strip_suffix(OWNER_EXTENSION)
                .and_then(|s| s.strip_suffix('.'))
                .filter(|s| is_digest_stem(s))
            {
                match tokio::fs::read_to_string(&path).await {
                    Ok(user_id) if !user_id.is_empty() && stem_for(&user_id) == stem => {
                        owned_digests.insert(stem.to_string());
                        users.insert(user_id);
                    }
                    Ok(_) => orphans.push(path),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(SnapshotError::Io(e)),
                }
                continue;
            }

            let data_stem = name
                .strip_suffix(PART_SUFFIX)
                .unwrap_or(name.as_str())
                .strip_suffix(SNAPSHOT_EXTENSION)
                .and_then(|s| s.strip_suffix('.'));
            match data_stem {
                Some(stem) if is_digest_stem(stem) => digest_files.push((stem.to_string(), path)),
                Some(stem) => match user_id_from_stem(stem) {
                    Some(user_id) => {
                        users.insert(user_id);
                    }
                    None => tracing::trace!(path = %path.display(), "Skipping non-snapshot file"),
                },
                None => tracing::trace!(path = %path.display(), "Skipping non-snapshot file"),
            }
        }

        orphans.extend(
            digest_files
                .into_iter()
                .filter(|(stem, _)| !owned_digests.contains(stem))
                .map(|(_, path)| path),
        );
        orphans.sort();

        Ok(SnapshotScan {
            users: users.into_iter().collect(),
            orphans,
        })
    }

    /// Remove a file reported in [`SnapshotScan::orphans`].
    pub async fn remove_orphan(&self, path: &Path) -> Result<(), SnapshotError> {
        if path.parent() != Some(self.dir.as_path()) {
            return Err(SnapshotError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is outside the snapshot directory", path.display()),
            )));
        }
        remove_if_present(path).await?;
        Ok(())
    }
}

fn decode(user_id: &str, bytes: &[u8]) -> Result<QaState, String> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err("empty file".into());
    }

    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| format!("invalid JSON: {e}"))?;

    let is_envelope = value
        .get("format")
        .and_then(|f| f.as_str())
        .is_some_and(|f| f == ENVELOPE_FORMAT);
    if !is_envelope {
        return Ok(QaState::new(value));
    }

    let envelope: SnapshotEnvelope =
        serde_json::from_value(value).map_err(|e| format!("invalid envelope: {e}"))?;
    if envelope.version != ENVELOPE_VERSION {
        return Err(format!("unsupported snapshot version {}", envelope.version));
    }
    if envelope.user_id != user_id {
        return Err(format!(
            "snapshot belongs to '{}', not '{user_id}'",
            envelope.user_id
        ));
    }

    Ok(envelope.state)
}
