use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::models::{LoopLogEntry, LoopLogLevel};

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or_default()
}

/// Operator-facing history of the loop, oldest first. Entries past `capacity` are evicted
/// from the front.
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<LoopLogEntry>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, level: LoopLogLevel, event: &str, message: impl Into<String>) {
        let message = message.into();
        match level {
            LoopLogLevel::Info => tracing::info!(event, message = message.as_str()),
            LoopLogLevel::Warn => tracing::warn!(event, message = message.as_str()),
            LoopLogLevel::Error => tracing::error!(event, message = message.as_str()),
        }

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LoopLogEntry {
            timestamp_ms: now_millis(),
            level,
            event: event.to_string(),
            message,
        });
    }

    pub fn entries(&self) -> Vec<LoopLogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[path = "../tests/controller/event_log_tests.rs"]
mod tests;
