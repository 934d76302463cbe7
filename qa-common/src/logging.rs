//! Logging utilities for the QA chat service.
//!
//! Provides structured JSON or pretty logging plus per-request trace IDs.
//!
//! # Noise Filtering
//!
//! By default, noisy library modules (hyper, reqwest, h2, rustls, tower_http)
//! are set to `warn` level to reduce log clutter while keeping business logs
//! at the specified level.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Default noisy modules that should be filtered to warn level.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tower_http",
];

/// Build the filter directives: base level, then noisy modules at `warn`.
fn build_directives(log_level: &str, excluded_targets: &[String]) -> String {
    let mut directives = String::from(log_level);

    for module in NOISY_MODULES {
        directives.push_str(&format!(",{}=warn", module));
    }

    for target in excluded_targets {
        directives.push_str(&format!(",{}=warn", target));
    }

    directives
}

/// Initialize logging with the given configuration.
///
/// # Arguments
///
/// * `log_level` - Base log level (trace, debug, info, warn, error)
/// * `log_format` - Output format: "json" for structured JSON, "pretty" for human-readable
/// * `excluded_targets` - Extra modules forced to `warn`
///
/// `RUST_LOG`, when set, overrides the computed filter entirely.
pub fn init_logging(log_level: &str, log_format: &str, excluded_targets: &[String]) {
    let directives = build_directives(log_level, excluded_targets);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let subscriber = tracing_subscriber::registry().with(filter);

    if log_format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::info!(
        log_level = %log_level,
        log_format = %log_format,
        noise_filtered = NOISY_MODULES.len() + excluded_targets.len(),
        "Logging initialized"
    );
}

/// Generate a new trace ID for request tracing.
pub fn generate_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Reuse the caller's `X-Trace-Id` header when present, otherwise generate one.
pub fn trace_id_from_headers(headers: &http::HeaderMap) -> String {
    headers
        .get("X-Trace-Id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(generate_trace_id)
}

/// Create a tracing span for a request with business context.
///
/// # Example
///
/// ```ignore
/// let span = request_span!("chat", trace_id, user_id = %user);
/// async { /* ... */ }.instrument(span).await;
/// ```
#[macro_export]
macro_rules! request_span {
    ($name:expr, $trace_id:expr) => {
        tracing::info_span!($name, trace_id = %$trace_id)
    };
    ($name:expr, $trace_id:expr, $($field:tt)*) => {
        tracing::info_span!($name, trace_id = %$trace_id, $($field)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noisy_modules_list() {
        assert!(NOISY_MODULES.contains(&"hyper"));
        assert!(NOISY_MODULES.contains(&"reqwest"));
        assert!(NOISY_MODULES.contains(&"tower_http"));
    }

    #[test]
    fn test_build_directives() {
        let directives = build_directives("debug", &["qa_session::eviction".to_string()]);
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("hyper=warn"));
        assert!(directives.ends_with("qa_session::eviction=warn"));
    }

    #[test]
    fn test_generate_trace_id() {
        let id1 = generate_trace_id();
        let id2 = generate_trace_id();
        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 36);
    }

    #[test]
    fn test_trace_id_from_headers() {
        let mut headers = http::HeaderMap::new();
        assert_eq!(trace_id_from_headers(&headers).len(), 36);

        headers.insert("X-Trace-Id", "abc-123".parse().unwrap());
        assert_eq!(trace_id_from_headers(&headers), "abc-123");
    }
}
