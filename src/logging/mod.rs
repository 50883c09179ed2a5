//! Logging System for LanShare
//!
//! Structured `tracing` output with configurable verbosity, text or JSON
//! formatting, and optional rolling log files.

mod config;


pub use config::{
    default_log_directory, LogFormat, LogLevel, LogOutput, LoggingConfig, RotationStrategy,
};

use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// File name prefix for rolling log files
const LOG_FILE_NAME: &str = "lanshare.log";

/// Logging system errors
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to initialize logging: {0}")]
    InitializationError(String),

    #[error("Failed to create log directory: {0}")]
    DirectoryCreationError(String),
}

/// Result type for logging operations
pub type LoggingResult<T> = Result<T, LoggingError>;

/// Installed logging state. Dropping it flushes and closes file output.
pub struct LoggingSystem {
    config: LoggingConfig,
    _guards: Vec<WorkerGuard>,
}

impl LoggingSystem {
    /// Initialize the global subscriber with the given configuration
    pub fn init(config: LoggingConfig) -> LoggingResult<Self> {
        let wants_file = matches!(config.output, LogOutput::File | LogOutput::Both);
        let log_dir = config
            .log_directory
            .clone()
            .unwrap_or_else(default_log_directory);

        if wants_file {
            std::fs::create_dir_all(&log_dir).map_err(|e| {
                LoggingError::DirectoryCreationError(format!(
                    "Failed to create log directory {:?}: {}",
                    log_dir, e
                ))
            })?;
        }

        let mut guards = Vec::new();
        let env_filter = Self::build_env_filter(&config);
        let registry = tracing_subscriber::registry();

        match config.output {
            LogOutput::Console => {
                registry
                    .with(env_filter)
                    .with(Self::create_console_layer(&config))
                    .try_init()
                    .map_err(|e| LoggingError::InitializationError(e.to_string()))?;
            }
            LogOutput::File => {
                let (file_layer, guard) = Self::create_file_layer(&config, log_dir);
                guards.push(guard);
                registry
                    .with(env_filter)
                    .with(file_layer)
                    .try_init()
                    .map_err(|e| LoggingError::InitializationError(e.to_string()))?;
            }
            LogOutput::Both => {
                let (file_layer, guard) = Self::create_file_layer(&config, log_dir);
                guards.push(guard);
                registry
                    .with(env_filter)
                    .with(Self::create_console_layer(&config))
                    .with(file_layer)
                    .try_init()
                    .map_err(|e| LoggingError::InitializationError(e.to_string()))?;
            }
        }

        Ok(Self {
            config,
            _guards: guards,
        })
    }

    /// Build the filter: `RUST_LOG` wins, otherwise the configured levels
    pub(crate) fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }

        let mut filter = EnvFilter::new(config.level.to_string());
        for (module, level) in &config.module_levels {
            match format!("{}={}", module, level).parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(e) => eprintln!("Ignoring log directive for {}: {}", module, e),
            }
        }
        filter
    }

    fn create_console_layer<S>(config: &LoggingConfig) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        let layer = fmt::layer()
            .with_target(config.include_target)
            .with_thread_ids(config.include_thread_id)
            .with_file(config.include_file_info)
            .with_line_number(config.include_file_info);

        if config.format == LogFormat::Json {
            layer.json().boxed()
        } else {
            layer.boxed()
        }
    }

    fn create_file_layer<S>(
        config: &LoggingConfig,
        log_dir: PathBuf,
    ) -> (Box<dyn Layer<S> + Send + Sync>, WorkerGuard)
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        let rotation = match config.rotation {
            RotationStrategy::Daily => Rotation::DAILY,
            RotationStrategy::Hourly => Rotation::HOURLY,
            RotationStrategy::Never => Rotation::NEVER,
        };

        let file_appender = RollingFileAppender::new(rotation, log_dir, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let layer = fmt::layer()
            .with_writer(non_blocking)
            .with_target(config.include_target)
            .with_thread_ids(config.include_thread_id)
            .with_file(config.include_file_info)
            .with_line_number(config.include_file_info)
            .with_ansi(false);

        if config.format == LogFormat::Json {
            (layer.json().boxed(), guard)
        } else {
            (layer.boxed(), guard)
        }
    }

    /// Get current log directory
    pub fn log_directory(&self) -> Option<&PathBuf> {
        self.config.log_directory.as_ref()
    }

    /// Get current log level
    pub fn log_level(&self) -> LogLevel {
        self.config.level
    }
}
