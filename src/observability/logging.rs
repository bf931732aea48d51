//! Structured logging system using tracing crate
//!
//! ## Log Format Options
//!
//! The output format is controlled by the `LOG_FORMAT` environment variable:
//!
//! - `json` - Structured JSON format for production and log aggregation systems
//! - `pretty` - Human-readable format with colors and indentation for development
//! - `compact` - Terminal-friendly format with colors but minimal spacing
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: Log level (ERROR, WARN, INFO, DEBUG, TRACE) - defaults to INFO
//! - `LOG_FORMAT`: Output format (json, pretty, compact) - defaults to json
//! - `RUST_LOG`: Override log filtering (follows env_logger format)

use once_cell::sync::OnceCell;
use std::env;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: OnceCell<()> = OnceCell::new();

/// Log output format options
#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    /// JSON format for structured logging (machine-readable)
    Json,
    /// Pretty format with colors and indentation (human-readable)
    Pretty,
    /// Compact format with colors but minimal spacing (terminal-friendly)
    Compact,
}

impl LogFormat {
    /// Parse log format from string
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Initialize logging with manual configuration.
///
/// A library cannot assume it owns the global subscriber; repeated calls
/// (including from parallel tests) are no-ops after the first.
pub fn init_logging(level: Level, format: LogFormat) {
    INIT.get_or_init(|| {
        let mut filter = EnvFilter::new(level.to_string())
            // Reduce noise from dependencies
            .add_directive("rumqttc=warn".parse().expect("static directive"))
            .add_directive("tokio=warn".parse().expect("static directive"));

        // Allow RUST_LOG to override
        if let Ok(rust_log) = env::var("RUST_LOG") {
            filter = EnvFilter::new(rust_log);
        }

        let subscriber = tracing_subscriber::registry().with(filter);

        match format {
            LogFormat::Json => {
                subscriber.with(fmt::layer().json()).init();
            }
            LogFormat::Pretty => {
                subscriber.with(fmt::layer().pretty().with_ansi(true)).init();
            }
            LogFormat::Compact => {
                subscriber
                    .with(fmt::layer().compact().with_ansi(true).with_target(false))
                    .init();
            }
        }
    });
}

/// Initialize logging from environment variables
pub fn init_default_logging() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string());

    let level = match log_level.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "INFO" => Level::INFO,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    };

    let format = env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    init_logging(level, LogFormat::parse(&format));
}
