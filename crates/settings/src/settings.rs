use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{AppResult, ResultExt};

pub const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_TIMEOUT_BACKOFF_MS: u64 = 3_000;
pub const DEFAULT_SCAN_FAILURE_BACKOFF_MS: u64 = 4_000;
pub const DEFAULT_ADAPTER_UNAVAILABLE_BACKOFF_MS: u64 = 5_000;
pub const DEFAULT_COMPLETED_BACKOFF_MS: u64 = 2_000;
pub const DEFAULT_ABORTED_BACKOFF_MS: u64 = 2_000;
pub const DEFAULT_ERROR_BACKOFF_MS: u64 = 4_000;
pub const DEFAULT_MODE_MARKER: &str = "DFU";
pub const DEFAULT_LOG_CAPACITY: usize = 500;
pub const DEFAULT_LOG_KEEP_DAYS: u32 = 7;

const MIN_DISCOVERY_TIMEOUT_MS: u64 = 1_000;
const MAX_DISCOVERY_TIMEOUT_MS: u64 = 5 * 60 * 1_000;
const MAX_BACKOFF_MS: u64 = 10 * 60 * 1_000;
const MIN_LOG_CAPACITY: usize = 16;
const MAX_LOG_CAPACITY: usize = 10_000;

/// External DFU tool launched once per attempt. `{address}`, `{name}` and `{image}` in
/// `args` are substituted before the launch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferCommandSettings {
    pub program: String,
    pub args: Vec<String>,
}

impl TransferCommandSettings {
    pub fn is_configured(&self) -> bool {
        !self.program.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoopSettings {
    pub discovery_timeout_ms: u64,
    pub timeout_backoff_ms: u64,
    pub scan_failure_backoff_ms: u64,
    pub adapter_unavailable_backoff_ms: u64,
    pub completed_backoff_ms: u64,
    pub aborted_backoff_ms: u64,
    pub error_backoff_ms: u64,
    pub mode_marker: String,
    pub log_capacity: usize,
    pub log_keep_days: u32,
    pub transfer: TransferCommandSettings,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            discovery_timeout_ms: DEFAULT_DISCOVERY_TIMEOUT_MS,
            timeout_backoff_ms: DEFAULT_TIMEOUT_BACKOFF_MS,
            scan_failure_backoff_ms: DEFAULT_SCAN_FAILURE_BACKOFF_MS,
            adapter_unavailable_backoff_ms: DEFAULT_ADAPTER_UNAVAILABLE_BACKOFF_MS,
            completed_backoff_ms: DEFAULT_COMPLETED_BACKOFF_MS,
            aborted_backoff_ms: DEFAULT_ABORTED_BACKOFF_MS,
            error_backoff_ms: DEFAULT_ERROR_BACKOFF_MS,
            mode_marker: DEFAULT_MODE_MARKER.to_string(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            log_keep_days: DEFAULT_LOG_KEEP_DAYS,
            transfer: TransferCommandSettings::default(),
        }
    }
}

impl LoopSettings {
    pub fn normalized(mut self) -> Self {
        self.discovery_timeout_ms = self
            .discovery_timeout_ms
            .clamp(MIN_DISCOVERY_TIMEOUT_MS, MAX_DISCOVERY_TIMEOUT_MS);
        for backoff in [
            &mut self.timeout_backoff_ms,
            &mut self.scan_failure_backoff_ms,
            &mut self.adapter_unavailable_backoff_ms,
            &mut self.completed_backoff_ms,
            &mut self.aborted_backoff_ms,
            &mut self.error_backoff_ms,
        ] {
            *backoff = (*backoff).min(MAX_BACKOFF_MS);
        }

        let marker = self.mode_marker.trim();
        self.mode_marker = if marker.is_empty() {
            DEFAULT_MODE_MARKER.to_string()
        } else {
            marker.to_string()
        };
        self.log_capacity = self.log_capacity.clamp(MIN_LOG_CAPACITY, MAX_LOG_CAPACITY);
        self.log_keep_days = self.log_keep_days.clamp(1, 90);
        self.transfer.program = self.transfer.program.trim().to_string();
        self
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
}

/// Reads settings from a JSON file, or returns the defaults when no file is given. Missing
/// keys fall back to their defaults; the result is always normalized.
pub fn load_settings(path: Option<&Path>) -> AppResult<LoopSettings> {
    let Some(path) = path else {
        return Ok(LoopSettings::default());
    };

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings from {}", path.display()))
        .with_code("settings_read_failed", "Failed to read settings file")
        .with_ctx("path", path.display().to_string())?;
    let settings = parse_settings(&contents).with_ctx("path", path.display().to_string())?;
    tracing::debug!(
        event = "settings_loaded",
        path = %path.display(),
        discovery_timeout_ms = settings.discovery_timeout_ms,
        mode_marker = settings.mode_marker.as_str()
    );
    Ok(settings)
}

pub fn parse_settings(contents: &str) -> AppResult<LoopSettings> {
    let parsed: LoopSettings = serde_json::from_str(contents)
        .context("invalid settings payload")
        .with_code("settings_parse_failed", "Settings file is not valid JSON")?;
    Ok(parsed.normalized())
}

#[cfg(test)]
#[path = "../tests/settings/settings_tests.rs"]
mod tests;
