//! Error types shared by the QA chat crates.

use thiserror::Error;

/// Result type alias using the common error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures while wiring components up from configuration.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
