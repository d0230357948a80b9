use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder as RollingBuilder, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::{AppResult, ResultExt};

#[path = "config.rs"]
mod config;
#[path = "retention.rs"]
mod retention;

pub use config::{LOG_LEVEL_ENV, normalize_level};
pub use retention::cleanup_expired_logs;

const LOG_FILE_PREFIX: &str = "dfu-looper";
const LOG_FILE_SUFFIX: &str = "log";

#[derive(Debug, Clone)]
pub struct LoggingGuard {
    log_dir: Option<PathBuf>,
    level: String,
}

impl LoggingGuard {
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    pub fn level(&self) -> &str {
        &self.level
    }
}

fn worker_guard_slot() -> &'static Mutex<Option<WorkerGuard>> {
    static SLOT: OnceLock<Mutex<Option<WorkerGuard>>> = OnceLock::new();
    SLOT.get_or_init(|| Mutex::new(None))
}

pub fn resolve_log_level() -> String {
    config::resolve_log_level()
}

/// Installs the global subscriber: a compact console layer, plus a daily-rolling JSON file
/// layer when `log_dir` is given. Calling it again after a subscriber is installed only
/// prepares the directory.
pub fn init_logging(log_dir: Option<&Path>, keep_days: u32) -> AppResult<LoggingGuard> {
    let level = resolve_log_level();
    let file_writer = match log_dir {
        Some(log_dir) => {
            fs::create_dir_all(log_dir)
                .with_context(|| format!("failed to create log dir: {}", log_dir.display()))
                .with_code("log_dir_create_failed", "Failed to create log directory")
                .with_ctx("logDir", log_dir.display().to_string())?;
            cleanup_expired_logs(log_dir, u64::from(keep_days))?;

            let file_appender = RollingBuilder::new()
                .rotation(Rotation::DAILY)
                .filename_prefix(LOG_FILE_PREFIX)
                .filename_suffix(LOG_FILE_SUFFIX)
                .build(log_dir)
                .with_context(|| format!("failed to create log appender: {}", log_dir.display()))
                .with_code("log_appender_create_failed", "Failed to create log writer")
                .with_ctx("logDir", log_dir.display().to_string())?;
            let (file_writer, worker_guard) = tracing_appender::non_blocking(file_appender);
            if let Ok(mut slot) = worker_guard_slot().lock() {
                *slot = Some(worker_guard);
            }
            Some(file_writer)
        }
        None => None,
    };

    if !tracing::dispatcher::has_been_set() {
        let file_layer = file_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_current_span(false)
                .with_span_list(false)
        });
        let console_layer = tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(true)
            .with_target(cfg!(debug_assertions))
            .with_writer(std::io::stderr);

        tracing_subscriber::registry()
            .with(EnvFilter::new(level.clone()))
            .with(file_layer)
            .with(console_layer)
            .try_init()
            .with_context(|| format!("failed to init log subscriber: level={level}"))
            .with_code("log_subscriber_init_failed", "Failed to initialize logging")
            .with_ctx("logLevel", level.clone())?;
    }

    Ok(LoggingGuard {
        log_dir: log_dir.map(Path::to_path_buf),
        level,
    })
}
