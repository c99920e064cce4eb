// Licensed under the MIT License
// Copyright (c) 2025 Accelara contributors

//! Logging configuration for accelara.
//!
//! Diagnostics always go to stderr: stdout belongs to the supervisor event
//! stream and must stay machine-clean.

use std::io;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Logging mode for different usage contexts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// CLI mode - user-friendly output
    Cli,
    /// Debug mode - verbose logging for development
    Debug,
    /// Silent mode - minimal logging
    Silent,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub mode: LoggingMode,
    pub level: String,
    pub show_target: bool,
    pub show_file_line: bool,
    pub log_to_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::cli(false)
    }
}

impl LoggingConfig {
    /// Create CLI logging configuration
    pub fn cli(verbose: bool) -> Self {
        Self {
            mode: LoggingMode::Cli,
            level: if verbose {
                "info".to_string()
            } else {
                "warn".to_string()
            },
            show_target: verbose,
            show_file_line: verbose,
            log_to_file: None,
        }
    }

    /// Create debug logging configuration
    pub fn debug() -> Self {
        Self {
            mode: LoggingMode::Debug,
            level: "debug".to_string(),
            show_target: true,
            show_file_line: true,
            log_to_file: Some("accelara-debug.log".to_string()),
        }
    }

    /// Create silent logging configuration
    pub fn silent() -> Self {
        Self {
            mode: LoggingMode::Silent,
            level: "error".to_string(),
            show_target: false,
            show_file_line: false,
            log_to_file: None,
        }
    }
}

/// Initialize logging with the given configuration
pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("accelara={}", config.level)));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.mode {
        LoggingMode::Cli | LoggingMode::Silent => {
            let fmt_layer = fmt::layer()
                .with_target(config.show_target)
                .with_file(config.show_file_line)
                .with_line_number(config.show_file_line)
                .with_span_events(FmtSpan::NONE)
                .compact()
                .with_writer(io::stderr);

            registry.with(fmt_layer).init();
        }
        LoggingMode::Debug => {
            let fmt_layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::ENTER | FmtSpan::CLOSE)
                .with_writer(io::stderr)
                .pretty();

            if let Some(log_file) = config.log_to_file {
                let file_appender = tracing_appender::rolling::daily("./logs", log_file);
                let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

                let file_layer = fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false)
                    .with_writer(non_blocking)
                    .json();

                registry.with(fmt_layer).with(file_layer).init();
            } else {
                registry.with(fmt_layer).init();
            }
        }
    }

    Ok(())
}

/// Initialize CLI logging (convenience function)
pub fn init_cli_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging(LoggingConfig::cli(verbose))
}

/// Initialize silent logging (convenience function)
pub fn init_silent_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging(LoggingConfig::silent())
}
