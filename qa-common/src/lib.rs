//! QA Common - Shared configuration, logging and error types for the QA chat service.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - The error type for wiring components from configuration
//! - Logging setup and request tracing helpers
//! - Small utility functions

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    Config, EvictionConfig, ExpiryMode, ObjectStoreBackend, ObjectStoreConfig,
    ObservabilityConfig, QaConfig, ServerConfig, SessionConfig, SnapshotConfig,
};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};
