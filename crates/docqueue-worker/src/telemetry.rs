//! Tracing subscriber setup.
//!
//! Environment variables:
//!   LOG_FORMAT  - "json" or "text" (default: "text")
//!   LOG_FILE    - path to log file (optional, enables file logging)
//!   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
//!   RUST_LOG    - standard env filter (default: "docqueue=info")

use std::path::{Path, PathBuf};

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "docqueue=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Output settings for the tracing subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub format: LogFormat,
    pub file: Option<PathBuf>,
    pub ansi: Option<bool>,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::parse(
            std::env::var("LOG_FORMAT").ok().as_deref(),
            std::env::var("LOG_FILE").ok().as_deref(),
            std::env::var("LOG_ANSI").ok().as_deref(),
        )
    }

    fn parse(format: Option<&str>, file: Option<&str>, ansi: Option<&str>) -> Self {
        Self {
            format: match format {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            file: file.filter(|f| !f.is_empty()).map(PathBuf::from),
            ansi: ansi.map(|v| v == "true" || v == "1"),
        }
    }

    /// Install the global subscriber.
    ///
    /// The returned guard flushes the file writer and must be held for the
    /// life of the process.
    pub fn init(&self, default_log_name: &str) -> Option<WorkerGuard> {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| DEFAULT_FILTER.into());
        let registry = tracing_subscriber::registry().with(env_filter);

        let guard = if let Some(ref path) = self.file {
            let file_dir = path.parent().unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|f| f.to_str())
                .unwrap_or(default_log_name);
            let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            match self.format {
                LogFormat::Json => registry
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(non_blocking),
                    )
                    .init(),
                LogFormat::Text => registry
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(non_blocking)
                            .with_ansi(self.ansi.unwrap_or(false)),
                    )
                    .init(),
            }
            Some(guard)
        } else {
            match self.format {
                LogFormat::Json => registry
                    .with(tracing_subscriber::fmt::layer().json())
                    .init(),
                LogFormat::Text => {
                    let mut layer = tracing_subscriber::fmt::layer();
                    if let Some(ansi) = self.ansi {
                        layer = layer.with_ansi(ansi);
                    }
                    registry.with(layer).init();
                }
            }
            None
        };

        info!(
            log_format = ?self.format,
            log_file = self
                .file
                .as_deref()
                .and_then(Path::to_str)
                .unwrap_or("(stdout)"),
            "Logging initialized"
        );
        guard
    }
}
