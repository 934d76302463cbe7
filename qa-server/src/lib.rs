//! qa-server - HTTP front end for the per-user QA session cache.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod error;
pub mod routes;
pub mod timeout;

pub use error::ApiError;
pub use routes::{build_router, AppState};
pub use timeout::with_request_timeout;
