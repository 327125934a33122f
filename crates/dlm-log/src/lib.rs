//! tracing initialization shared by the dlm binaries: a stdout layer, an
//! optional non-blocking rolling file layer, and `EnvFilter` directives.

use std::io;

use anyhow::Context as _;
use camino::Utf8Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Per-binary rotation policy.
pub trait StaticLogConfig {
    const MAX_LOG_FILES: usize;
    const LOG_FILE_PREFIX: &'static str;
}

/// Flushes pending log records when dropped; keep it alive for the whole
/// program.
pub struct LoggerGuard {
    _file_guard: Option<WorkerGuard>,
    _stdio_guard: WorkerGuard,
}

pub fn init<C: StaticLogConfig>(file: Option<&Utf8Path>, log_filter: &str) -> anyhow::Result<LoggerGuard> {
    let (file_layer, file_guard) = match file {
        Some(path) => {
            let (folder, prefix) = if path.is_dir() {
                (path, C::LOG_FILE_PREFIX)
            } else {
                (
                    path.parent().context("invalid log path (parent)")?,
                    path.file_name().context("invalid log path (file_name)")?,
                )
            };

            let appender = rolling::Builder::new()
                .rotation(rolling::Rotation::DAILY)
                .filename_prefix(prefix)
                .filename_suffix("log")
                .max_log_files(C::MAX_LOG_FILES)
                .build(folder)
                .context("couldn’t create file appender")?;

            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let (non_blocking_stdio, stdio_guard) = tracing_appender::non_blocking(io::stdout());
    let stdio_layer = fmt::layer().with_writer(non_blocking_stdio);

    let env_filter = EnvFilter::try_new(log_filter).context("invalid log filtering directives")?;

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdio_layer)
        .with(env_filter)
        .init();

    Ok(LoggerGuard {
        _file_guard: file_guard,
        _stdio_guard: stdio_guard,
    })
}
