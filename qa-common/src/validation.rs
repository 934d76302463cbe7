//! Configuration validation for the QA chat service.
//!
//! Provides validation logic for configuration fields to ensure
//! all required values are present and within valid ranges.

use thiserror::Error;

use crate::config::{
    Config, EvictionConfig, ObjectStoreBackend, ObjectStoreConfig, ObservabilityConfig, QaConfig,
    ServerConfig, SessionConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let results = [
            self.server.validate(),
            self.session.validate(),
            self.eviction.validate(),
            self.object_store.validate(),
            self.qa.validate(),
            self.observability.validate(),
        ];

        let mut errors: Vec<ValidationError> = results.into_iter().filter_map(Result::err).collect();

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load (with environment overrides) and validate configuration.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

fn positive(value: u64, field: &str) -> ValidationResult<()> {
    if value == 0 {
        return Err(ValidationError::InvalidValue {
            field: field.into(),
            reason: "must be greater than 0".into(),
        });
    }
    Ok(())
}

impl Validate for ServerConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidValue {
                field: "server.port".into(),
                reason: "must be between 1 and 65535".into(),
            });
        }
        positive(self.request_timeout_secs, "server.request_timeout_secs")
    }
}

impl Validate for SessionConfig {
    fn validate(&self) -> ValidationResult<()> {
        positive(self.timeout_secs, "session.timeout_secs")
    }
}

impl Validate for EvictionConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.enabled {
            positive(self.interval_secs, "eviction.interval_secs")?;
        }
        Ok(())
    }
}

impl Validate for ObjectStoreConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.bucket.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "object_store.bucket".into(),
            });
        }

        match self.backend {
            ObjectStoreBackend::Http => {
                let Some(ref endpoint) = self.endpoint else {
                    return Err(ValidationError::MissingField {
                        field: "object_store.endpoint".into(),
                    });
                };
                if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                    return Err(ValidationError::InvalidValue {
                        field: "object_store.endpoint".into(),
                        reason: format!("must be an http(s) URL, got '{endpoint}'"),
                    });
                }
            }
            ObjectStoreBackend::Filesystem => {
                if self.root.as_deref().map_or(true, |r| r.trim().is_empty()) {
                    return Err(ValidationError::MissingField {
                        field: "object_store.root".into(),
                    });
                }
            }
        }

        positive(self.timeout_secs, "object_store.timeout_secs")
    }
}

impl Validate for QaConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.endpoint.as_deref().map_or(true, |e| e.trim().is_empty()) {
            return Err(ValidationError::MissingField {
                field: "qa.endpoint".into(),
            });
        }
        positive(self.timeout_secs, "qa.timeout_secs")
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!(
                    "must be one of: {}, got '{}'",
                    valid_levels.join(", "),
                    self.log_level
                ),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!(
                    "must be one of: {}, got '{}'",
                    valid_formats.join(", "),
                    self.log_format
                ),
            });
        }

        Ok(())
    }
}
