//! Logging and tracing initialization for bastion.
//!
//! The logging level is controlled via the `RUST_LOG` environment variable:
//!
//! ```bash
//! # Show every access decision
//! RUST_LOG=bastion_core=debug bastion serve
//!
//! # Only warnings (fail-open paths) and errors
//! RUST_LOG=warn bastion serve
//!
//! # Fine-grained control
//! RUST_LOG=bastion_core::engine=debug,tower_http=info,sqlx=warn bastion serve
//! ```
//!
//! All initializers panic if a global subscriber is already installed, so call
//! exactly one of them once at process start.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, LogFormat};

/// Initialize logging with sensible defaults (`info` unless `RUST_LOG` is set).
pub fn init_logging() {
    init_logging_with_level("info");
}

/// Initialize logging with a specific default level.
///
/// `RUST_LOG` still wins when present.
pub fn init_logging_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Initialize pretty-formatted logging (recommended for development).
pub fn init_logging_pretty() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_line_number(true)
                .with_thread_ids(true)
                .with_target(true),
        )
        .init();
}

/// Initialize JSON-formatted logging (recommended for production).
///
/// Decision events carry structured fields (`resource`, `role_id`, `action`,
/// `allow`, `reason`) which land as top-level JSON keys.
pub fn init_logging_json() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Initialize logging in the format selected by `LOG_FORMAT`.
pub fn init_logging_from_config(config: &Config) {
    match config.log_format {
        LogFormat::Text => init_logging(),
        LogFormat::Pretty => init_logging_pretty(),
        LogFormat::Json => init_logging_json(),
    }
}
