//! Configuration management for the QA chat service.
//!
//! The service reads a single configuration file at `~/.qachat/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (QA_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `QA_CONFIG` → alternate config file path
//! - `QA_BIND_ADDRESS` → network.bind
//! - `QA_PORT` → server.port
//! - `QA_SESSION_TIMEOUT` → session.timeout_secs (accepts "10m", "600s", ...)
//! - `QA_EVICTION_INTERVAL` → eviction.interval_secs (same format)
//! - `QA_SNAPSHOT_DIR` → snapshot.dir
//! - `QA_OBJECT_STORE_ENDPOINT` → object_store.endpoint
//! - `QA_OBJECT_STORE_BUCKET` → object_store.bucket
//! - `QA_OBJECT_STORE_TOKEN` → object_store.auth_token
//! - `QA_ENDPOINT` → qa.endpoint
//! - `QA_API_KEY` → qa.api_key
//! - `QA_LOG_LEVEL` → observability.log_level

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::util::parse_duration_secs;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".qachat"),
        |dirs| dirs.home_dir().join(".qachat"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Expand a leading `~` in a configured path.
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration for the QA chat service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Bind address
    #[serde(default)]
    pub network: NetworkConfig,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Session cache behavior
    #[serde(default)]
    pub session: SessionConfig,

    /// Background snapshot eviction
    #[serde(default)]
    pub eviction: EvictionConfig,

    /// Local snapshot storage
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Remote object storage holding the durable per-user state
    #[serde(default)]
    pub object_store: ObjectStoreConfig,

    /// Question-answering backend
    #[serde(default)]
    pub qa: QaConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path (or `QA_CONFIG` if set).
    pub fn load() -> Result<Self> {
        let path = std::env::var("QA_CONFIG")
            .map(|p| expand_path(&p))
            .unwrap_or_else(|_| config_path());

        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(bind) = std::env::var("QA_BIND_ADDRESS") {
            self.network.bind = bind;
        }
        if let Ok(port) = std::env::var("QA_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid QA_PORT: {port}"))?;
        }

        if let Ok(timeout) = std::env::var("QA_SESSION_TIMEOUT") {
            self.session.timeout_secs = parse_duration_secs(&timeout)
                .map_err(|e| anyhow::anyhow!("Invalid QA_SESSION_TIMEOUT: {e}"))?;
        }
        if let Ok(interval) = std::env::var("QA_EVICTION_INTERVAL") {
            self.eviction.interval_secs = parse_duration_secs(&interval)
                .map_err(|e| anyhow::anyhow!("Invalid QA_EVICTION_INTERVAL: {e}"))?;
        }

        if let Ok(dir) = std::env::var("QA_SNAPSHOT_DIR") {
            self.snapshot.dir = dir;
        }

        if let Ok(endpoint) = std::env::var("QA_OBJECT_STORE_ENDPOINT") {
            self.object_store.endpoint = Some(endpoint);
        }
        if let Ok(bucket) = std::env::var("QA_OBJECT_STORE_BUCKET") {
            self.object_store.bucket = bucket;
        }
        if let Ok(token) = std::env::var("QA_OBJECT_STORE_TOKEN") {
            self.object_store.auth_token = Some(token);
        }

        if let Ok(endpoint) = std::env::var("QA_ENDPOINT") {
            self.qa.endpoint = Some(endpoint);
        }
        if let Ok(key) = std::env::var("QA_API_KEY") {
            self.qa.api_key = Some(key);
        }

        if let Ok(level) = std::env::var("QA_LOG_LEVEL") {
            self.observability.log_level = level;
        }

        Ok(())
    }

    /// Socket address string the HTTP server binds to.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.network.bind, self.server.port)
    }
}

// ============================================================================
// Network / Server
// ============================================================================

/// Global network configuration.
///
/// Default is `127.0.0.1` (local only). Set to `0.0.0.0` to allow remote access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_address")]
    pub bind: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound for a whole request, including QA invocation.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ============================================================================
// Session / Eviction / Snapshot
// ============================================================================

/// How the session cache decides whether an entry is still valid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryMode {
    /// Entries past their expiry time are treated as absent.
    #[default]
    Strict,
    /// Any entry present in the cache is valid, regardless of age.
    Presence,
}

/// Session cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle time after which a session expires (default: 10 minutes)
    #[serde(default = "default_session_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub expiry: ExpiryMode,

    /// Also save the updated state as the local snapshot after every turn.
    #[serde(default)]
    pub write_through: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_session_timeout(),
            expiry: ExpiryMode::default(),
            write_through: false,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Background eviction sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between sweeps (default: 10 minutes)
    #[serde(default = "default_eviction_interval")]
    pub interval_secs: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_eviction_interval(),
        }
    }
}

impl EvictionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Local snapshot storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Directory holding one snapshot file per user (supports `~`)
    #[serde(default = "default_snapshot_dir")]
    pub dir: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: default_snapshot_dir(),
        }
    }
}

impl SnapshotConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        expand_path(&self.dir)
    }
}

// ============================================================================
// Object Store
// ============================================================================

/// Remote object store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStoreBackend {
    /// S3-compatible HTTP gateway, path-style addressing
    #[default]
    Http,
    /// Directory on a mounted volume acting as the bucket root
    Filesystem,
}

/// Remote object store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    #[serde(default)]
    pub backend: ObjectStoreBackend,

    /// Base URL for the HTTP backend (e.g. `https://s3.eu-west-1.amazonaws.com`)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Root directory for the filesystem backend (supports `~`)
    #[serde(default)]
    pub root: Option<String>,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Remote keys are `{key_prefix}/{user_id}/{user_id}.{blob_extension}`
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default = "default_blob_extension")]
    pub blob_extension: String,

    /// Bound on a single download (default: 30 seconds)
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Bearer token sent to the HTTP backend
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            backend: ObjectStoreBackend::default(),
            endpoint: None,
            root: None,
            bucket: default_bucket(),
            key_prefix: default_key_prefix(),
            blob_extension: default_blob_extension(),
            timeout_secs: default_fetch_timeout(),
            auth_token: None,
        }
    }
}

impl ObjectStoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Deterministic remote key for a user's durable state.
    pub fn remote_key(&self, user_id: &str) -> String {
        let prefix = self.key_prefix.trim_matches('/');
        let ext = self.blob_extension.trim_start_matches('.');
        if prefix.is_empty() {
            format!("{user_id}/{user_id}.{ext}")
        } else {
            format!("{prefix}/{user_id}/{user_id}.{ext}")
        }
    }
}

// ============================================================================
// QA backend
// ============================================================================

/// Question-answering backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaConfig {
    /// URL receiving `POST {state, question}` and returning `{answer, state}`
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_qa_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_qa_timeout(),
            api_key: None,
        }
    }
}

impl QaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets forced to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

// ============================================================================
// Defaults
// ============================================================================

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    5000
}

fn default_request_timeout() -> u64 {
    120
}

fn default_session_timeout() -> u64 {
    600
}

fn default_eviction_interval() -> u64 {
    600
}

fn default_snapshot_dir() -> String {
    "~/.qachat/snapshots".into()
}

fn default_bucket() -> String {
    "qa-sessions".into()
}

fn default_key_prefix() -> String {
    "search-results-clean".into()
}

fn default_blob_extension() -> String {
    "json".into()
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_qa_timeout() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

fn default_true() -> bool {
    true
}
