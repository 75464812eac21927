// Logging module - tracing subscriber setup shared by both binaries
//
// Console output goes to stdout for the service. The admin tool logs to stderr
// instead, because its stdout carries the raw HTTP exchanges that scripts parse.
// File logging is optional and writes JSON lines through non-blocking, rotating
// appenders: one file at INFO and one at TRACE for this crate's targets.
//
// Console precedence: RUST_LOG env var > config file > default "info"

use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LogRotation, LoggingConfig};

/// Where human-readable console logs are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    Stdout,
    Stderr,
}

/// Filter directive used when RUST_LOG is unset
pub fn default_directive(config: &LoggingConfig) -> String {
    format!(
        "evaluation={level},evaltool={level}",
        level = config.level
    )
}

/// This crate's targets at `level` and above
fn crate_targets(level: Level) -> Targets {
    Targets::new()
        .with_target("evaluation", level)
        .with_target("evaltool", level)
}

/// Install the global subscriber
///
/// The returned guards must be kept alive for the duration of the program so
/// buffered file logs are flushed on exit.
pub fn init(config: &LoggingConfig, console: Console) -> Vec<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config)));

    let writer = match console {
        Console::Stdout => BoxMakeWriter::new(std::io::stdout),
        Console::Stderr => BoxMakeWriter::new(std::io::stderr),
    };
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(console == Console::Stdout)
        .with_filter(filter);

    let mut guards = Vec::new();
    let (info_layer, trace_layer) = match file_writers(config) {
        Some(files) => {
            guards.push(files.info_guard);
            guards.push(files.trace_guard);
            // File layers use JSON format for structured log parsing
            (
                Some(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(files.info)
                        .with_ansi(false)
                        .with_filter(crate_targets(Level::INFO)),
                ),
                Some(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(files.trace)
                        .with_ansi(false)
                        .with_filter(crate_targets(Level::TRACE)),
                ),
            )
        }
        None => (None, None),
    };

    // try_init: tests and embedding callers may already have a subscriber
    let _ = tracing_subscriber::registry()
        .with(console_layer)
        .with(info_layer)
        .with(trace_layer)
        .try_init();

    guards
}

/// Non-blocking writers for the INFO and TRACE log files
struct FileWriters {
    info: NonBlocking,
    info_guard: WorkerGuard,
    trace: NonBlocking,
    trace_guard: WorkerGuard,
}

/// Rolling file appenders wrapped in non-blocking writers, if enabled
fn file_writers(config: &LoggingConfig) -> Option<FileWriters> {
    if !config.file_enabled {
        return None;
    }

    if let Err(e) = std::fs::create_dir_all(&config.file_dir) {
        // Fall back to console-only logging
        eprintln!(
            "Warning: Could not create log directory {:?}: {}",
            config.file_dir, e
        );
        return None;
    }

    let appender = |suffix: &str| {
        let prefix = format!("{}-{}.log", config.file_prefix, suffix);
        match config.file_rotation {
            LogRotation::Hourly => tracing_appender::rolling::hourly(&config.file_dir, prefix),
            LogRotation::Daily => tracing_appender::rolling::daily(&config.file_dir, prefix),
            LogRotation::Never => tracing_appender::rolling::never(&config.file_dir, prefix),
        }
    };

    // Writes happen in background threads
    let (info, info_guard) = tracing_appender::non_blocking(appender("info"));
    let (trace, trace_guard) = tracing_appender::non_blocking(appender("trace"));
    Some(FileWriters {
        info,
        info_guard,
        trace,
        trace_guard,
    })
}
