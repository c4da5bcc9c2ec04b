//! Logging utilities for llama-relay.
//!
//! Pretty or JSON output through `tracing-subscriber`, optionally written to a
//! log file instead of stderr.
//!
//! # Noise Filtering
//!
//! By default, noisy library modules (hyper, reqwest, h2, rustls) are set to
//! `warn` level so the bot's own events stay readable. `RUST_LOG` overrides
//! everything.

use anyhow::Context;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Default noisy modules that should be filtered to warn level.
pub const NOISY_MODULES: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls"];

/// Build the filter directive string for a base level.
fn build_directives(log_level: &str) -> String {
    let mut directives = String::from(log_level);
    for module in NOISY_MODULES {
        directives.push_str(&format!(",{module}=warn"));
    }
    directives
}

fn build_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(build_directives(log_level)))
}

/// Initialize logging.
///
/// # Arguments
///
/// * `log_level` - Base log level (trace, debug, info, warn, error)
/// * `log_format` - "json" for structured JSON, anything else for human-readable
/// * `log_file` - Append to this file instead of writing to stderr
pub fn init_logging(log_level: &str, log_format: &str, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = build_filter(log_level);
    let subscriber = tracing_subscriber::registry().with(filter);

    match (log_file, log_format == "json") {
        (Some(path), json) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let writer = Mutex::new(file);

            if json {
                let fmt_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_writer(writer);
                let _ = subscriber.with(fmt_layer).try_init();
            } else {
                let fmt_layer = tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(writer);
                let _ = subscriber.with(fmt_layer).try_init();
            }
        }
        (None, true) => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true);
            let _ = subscriber.with(fmt_layer).try_init();
        }
        (None, false) => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_ansi(true)
                .with_target(true)
                .with_file(false)
                .with_line_number(false);
            let _ = subscriber.with(fmt_layer).try_init();
        }
    }

    tracing::info!(
        log_level = %log_level,
        log_format = %log_format,
        log_file = ?log_file,
        noise_filtered = NOISY_MODULES.len(),
        "Logging initialized"
    );

    Ok(())
}

/// Generate a new trace ID for one inbound event.
pub fn generate_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
