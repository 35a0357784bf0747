//! # Structured Logging Module
//!
//! Environment-aware structured logging for migration runs. Console output is
//! human-readable by default; set `MIGRATE_LOG_FORMAT=json` for one JSON object
//! per event. `RUST_LOG` overrides the environment's default level.

use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::engine::TaskOutcome;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// Safe to call more than once; only the first call installs a subscriber, and
/// an already-installed global subscriber is left in place.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json = wants_json(std::env::var("MIGRATE_LOG_FORMAT").ok().as_deref());

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_filter(filter)
                .boxed()
        };

        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("MIGRATE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn wants_json(format: Option<&str>) -> bool {
    format.is_some_and(|f| f.eq_ignore_ascii_case("json"))
}

/// Per-page progress of a scan or query
pub fn log_batch_progress(
    table: &str,
    batch_index: usize,
    page_items: usize,
    running_items: usize,
    page_capacity: f64,
    total_capacity: f64,
) {
    tracing::info!(
        table = %table,
        batch_index,
        page_items,
        running_items,
        page_capacity,
        total_capacity,
        "📦 BATCH_PROGRESS"
    );
}

/// Outcome of one executed task
pub fn log_task_outcome(key: &str, outcome: &TaskOutcome) {
    if outcome.success {
        tracing::info!(
            task_key = %key,
            output = %outcome.output,
            timestamp = %Utc::now().to_rfc3339(),
            "✅ TASK_OUTCOME"
        );
    } else {
        tracing::warn!(
            task_key = %key,
            output = %outcome.output,
            timestamp = %Utc::now().to_rfc3339(),
            "⚠️ TASK_OUTCOME"
        );
    }
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
    }

    #[test]
    fn test_json_format_selection() {
        assert!(wants_json(Some("json")));
        assert!(wants_json(Some("JSON")));
        assert!(!wants_json(Some("pretty")));
        assert!(!wants_json(None));
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        log_batch_progress("resources", 0, 3, 3, 1.5, 1.5);
    }
}
