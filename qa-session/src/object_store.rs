//! Remote object storage client.
//!
//! Downloads a user's durable state blob into the local snapshot directory.
//! Bodies are written to a sibling `.part` file and renamed into place once
//! complete, so an interrupted download never leaves a half-written snapshot
//! under the final name.

use async_trait::async_trait;
use futures_util::StreamExt;
use qa_common::config::{ObjectStoreBackend, ObjectStoreConfig};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Object store failures.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Object store request failed: {0}")]
    Transient(String),
}

/// Read-only access to the remote durable copy of per-user state.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name (e.g., "http", "filesystem")
    fn name(&self) -> &str;

    /// Download `bucket/key` to `dest`.
    ///
    /// Returns [`ObjectStoreError::NotFound`] without touching `dest` when the
    /// object does not exist. Callers should still re-check `dest` afterwards.
    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<(), ObjectStoreError>;
}

/// Build the configured backend.
pub fn build_object_store(config: &ObjectStoreConfig) -> qa_common::Result<Arc<dyn ObjectStore>> {
    match config.backend {
        ObjectStoreBackend::Http => {
            let endpoint = config.endpoint.clone().ok_or_else(|| {
                qa_common::Error::Config("object_store.endpoint is not set".into())
            })?;
            let store = HttpObjectStore::new(endpoint, config.auth_token.clone(), config.timeout())?;
            Ok(Arc::new(store))
        }
        ObjectStoreBackend::Filesystem => {
            let root = config.root.as_deref().ok_or_else(|| {
                qa_common::Error::Config("object_store.root is not set".into())
            })?;
            Ok(Arc::new(FsObjectStore::new(qa_common::config::expand_path(root))))
        }
    }
}

/// Temporary path used while a download is in progress.
pub(crate) fn part_path(dest: &Path) -> PathBuf {
    let mut name: OsString = dest.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Whether `bucket/key` names exactly one object.
///
/// Empty, `.` and `..` segments would be collapsed by URL or path
/// normalization, so two distinct keys could resolve to the same object.
fn is_literal_key(bucket: &str, key: &str) -> bool {
    let literal = |segment: &str| !matches!(segment, "" | "." | "..");
    literal(bucket) && !bucket.contains('/') && key.split('/').all(literal)
}

async fn discard_part(part: &Path) {
    if let Err(e) = tokio::fs::remove_file(part).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %part.display(), error = %e, "Failed to remove partial download");
        }
    }
}

// ============================================================================
// HTTP backend
// ============================================================================

/// S3-compatible object store addressed path-style: `{endpoint}/{bucket}/{key}`.
pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    auth_token: Option<String>,
}

impl HttpObjectStore {
    /// Create a client. `timeout` bounds each whole request.
    pub fn new(
        endpoint: impl AsRef<str>,
        auth_token: Option<String>,
        timeout: std::time::Duration,
    ) -> qa_common::Result<Self> {
        let endpoint = reqwest::Url::parse(endpoint.as_ref()).map_err(|e| {
            qa_common::Error::Config(format!("invalid object store endpoint: {e}"))
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(qa_common::Error::Config(format!(
                "object store endpoint cannot be a base URL: {endpoint}"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| qa_common::Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            auth_token,
        })
    }

    /// Percent-encoded URL of an object.
    ///
    /// Callers check [`is_literal_key`] first; every key segment maps to
    /// exactly one path segment.
    fn object_url(&self, bucket: &str, key: &str) -> reqwest::Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            segments.push(bucket);
            segments.extend(key.split('/'));
        }
        url
    }

    async fn stream_to(&self, response: reqwest::Response, part: &Path) -> Result<(), ObjectStoreError> {
        let mut file = tokio::fs::File::create(part)
            .await
            .map_err(|e| ObjectStoreError::Transient(format!("cannot create {}: {e}", part.display())))?;

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ObjectStoreError::Transient(format!("body read failed: {e}")))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ObjectStoreError::Transient(format!("write failed: {e}")))?;
        }

        file.sync_all()
            .await
            .map_err(|e| ObjectStoreError::Transient(format!("sync failed: {e}")))
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<(), ObjectStoreError> {
        if !is_literal_key(bucket, key) {
            tracing::debug!(bucket = %bucket, key = %key, "Refusing non-literal object key");
            return Err(ObjectStoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let url = self.object_url(bucket, key);
        tracing::debug!(url = %url, dest = %dest.display(), "Downloading object");

        let mut request = self.client.get(url.clone());
        if let Some(ref token) = self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ObjectStoreError::Transient(format!("GET {url} failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ObjectStoreError::Transient(format!("GET {url} returned {status}")));
        }

        let part = part_path(dest);
        if let Err(e) = self.stream_to(response, &part).await {
            discard_part(&part).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&part, dest).await {
            discard_part(&part).await;
            return Err(ObjectStoreError::Transient(format!(
                "cannot move download into {}: {e}",
                dest.display()
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Filesystem backend
// ============================================================================

/// Object store backed by a directory: objects live at `{root}/{bucket}/{key}`.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve an object path. Keys that are not literal, or that carry
    /// platform path syntax, have no object.
    fn object_path(&self, bucket: &str, key: &str) -> Option<PathBuf> {
        if !is_literal_key(bucket, key) {
            return None;
        }
        let mut path = self.root.clone();
        for segment in std::iter::once(bucket).chain(key.split('/')) {
            let mut components = Path::new(segment).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(_)), None) => path.push(segment),
                _ => return None,
            }
        }
        Some(path)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<(), ObjectStoreError> {
        let not_found = || ObjectStoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };

        let Some(source) = self.object_path(bucket, key) else {
            return Err(not_found());
        };

        let part = part_path(dest);
        match tokio::fs::copy(&source, &part).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !source.exists() => {
                discard_part(&part).await;
                return Err(not_found());
            }
            Err(e) => {
                discard_part(&part).await;
                return Err(ObjectStoreError::Transient(format!(
                    "copy from {} failed: {e}",
                    source.display()
                )));
            }
        }

        tokio::fs::rename(&part, dest).await.map_err(|e| {
            ObjectStoreError::Transient(format!("cannot move copy into {}: {e}", dest.display()))
        })
    }
}
