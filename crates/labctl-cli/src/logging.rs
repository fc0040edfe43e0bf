use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use file_rotate::compression::Compression;
use file_rotate::suffix::{AppendTimestamp, FileLimit};
use file_rotate::{ContentLimit, FileRotate};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::prelude::*;

/// Used when `RUST_LOG` is unset: info from labctl, warnings from dependencies.
pub const DEFAULT_FILTER: &str = "labctl=info,warn";
pub const TIME_FORMAT: &str = "%d/%m/%Y %I:%M:%S %p";
pub const MAX_LOG_FILES: usize = 5;
pub const MAX_LOG_BYTES: usize = 5 * 1024 * 1024;

/// Initialize the global tracing subscriber: compact lines on stdout, plain
/// lines in a rotating `log_file`.
///
/// Call once at program startup. Keep the returned guard alive until exit or
/// buffered file lines are lost.
pub fn init(log_file: &Path) -> Result<WorkerGuard> {
    if let Some(parent) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let rotating = FileRotate::new(
        log_file,
        AppendTimestamp::default(FileLimit::MaxFiles(MAX_LOG_FILES)),
        ContentLimit::Bytes(MAX_LOG_BYTES),
        Compression::None,
        #[cfg(unix)]
        None,
    );
    let (file_writer, guard) = tracing_appender::non_blocking(rotating);

    let stdout_layer = fmt::layer()
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_target(false)
        .compact();
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_ansi(false)
        .with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}
