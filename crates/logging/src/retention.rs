use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::Context;

use super::LOG_FILE_PREFIX;
use crate::{AppResult, ResultExt};

/// Only files the rolling appender wrote are candidates; the directory may be shared.
fn is_looper_log(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
}

pub(crate) fn cleanup_expired_logs_with_duration(
    log_dir: &Path,
    keep_duration: Duration,
    now: SystemTime,
) -> AppResult<usize> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let entries = fs::read_dir(log_dir)
        .with_context(|| format!("failed to read log dir: {}", log_dir.display()))
        .with_code("log_cleanup_read_dir_failed", "Failed to read log directory")
        .with_ctx("logDir", log_dir.display().to_string())?;

    let mut removed = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || !is_looper_log(&path) {
            continue;
        }

        let Ok(modified_at) = entry.metadata().and_then(|metadata| metadata.modified()) else {
            tracing::warn!(
                event = "log_cleanup_metadata_failed",
                log_path = %path.display()
            );
            continue;
        };

        let elapsed = now.duration_since(modified_at).unwrap_or_default();
        if elapsed <= keep_duration {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(error) => tracing::warn!(
                event = "log_cleanup_remove_failed",
                log_path = %path.display(),
                error = error.to_string()
            ),
        }
    }
    Ok(removed)
}

pub fn cleanup_expired_logs(log_dir: &Path, keep_days: u64) -> AppResult<usize> {
    let keep_duration = Duration::from_secs(keep_days.saturating_mul(24 * 60 * 60));
    cleanup_expired_logs_with_duration(log_dir, keep_duration, SystemTime::now())
}

#[cfg(test)]
#[path = "../tests/logging/retention_tests.rs"]
mod tests;
