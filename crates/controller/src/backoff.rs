use std::sync::Arc;
use std::time::Duration;

use kernel::runtime::TaskSpawner;
use settings::LoopSettings;
use tokio::task::JoinHandle;

use crate::AppResult;
use crate::machine::AttemptToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackoffReason {
    DiscoveryTimeout,
    ScanFailure,
    AdapterUnavailable,
    TransferCompleted,
    TransferAborted,
    TransferError,
}

impl BackoffReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DiscoveryTimeout => "discovery_timeout",
            Self::ScanFailure => "scan_failure",
            Self::AdapterUnavailable => "adapter_unavailable",
            Self::TransferCompleted => "transfer_completed",
            Self::TransferAborted => "transfer_aborted",
            Self::TransferError => "transfer_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub discovery_timeout: Duration,
    pub scan_failure: Duration,
    pub adapter_unavailable: Duration,
    pub transfer_completed: Duration,
    pub transfer_aborted: Duration,
    pub transfer_error: Duration,
}

impl BackoffPolicy {
    pub fn from_settings(settings: &LoopSettings) -> Self {
        Self {
            discovery_timeout: Duration::from_millis(settings.timeout_backoff_ms),
            scan_failure: Duration::from_millis(settings.scan_failure_backoff_ms),
            adapter_unavailable: Duration::from_millis(settings.adapter_unavailable_backoff_ms),
            transfer_completed: Duration::from_millis(settings.completed_backoff_ms),
            transfer_aborted: Duration::from_millis(settings.aborted_backoff_ms),
            transfer_error: Duration::from_millis(settings.error_backoff_ms),
        }
    }

    pub fn delay(&self, reason: BackoffReason) -> Duration {
        match reason {
            BackoffReason::DiscoveryTimeout => self.discovery_timeout,
            BackoffReason::ScanFailure => self.scan_failure,
            BackoffReason::AdapterUnavailable => self.adapter_unavailable,
            BackoffReason::TransferCompleted => self.transfer_completed,
            BackoffReason::TransferAborted => self.transfer_aborted,
            BackoffReason::TransferError => self.transfer_error,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_settings(&LoopSettings::default())
    }
}

/// Holds at most one armed timer. Arming a new one aborts the previous timer first.
pub struct BackoffTimer {
    spawner: Arc<dyn TaskSpawner>,
    armed: Option<(AttemptToken, JoinHandle<()>)>,
}

impl BackoffTimer {
    pub fn new(spawner: Arc<dyn TaskSpawner>) -> Self {
        Self {
            spawner,
            armed: None,
        }
    }

    pub fn armed(&self) -> Option<AttemptToken> {
        self.armed.as_ref().map(|(token, _)| *token)
    }

    pub fn schedule<F>(&mut self, token: AttemptToken, delay: Duration, on_elapsed: F) -> AppResult<()>
    where
        F: FnOnce(AttemptToken) + Send + 'static,
    {
        self.cancel();
        let handle = self.spawner.spawn(
            "loop_backoff",
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                on_elapsed(token);
            }),
        )?;
        self.armed = Some((token, handle));
        Ok(())
    }

    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some((token, handle)) => {
                handle.abort();
                tracing::debug!(
                    event = "loop_backoff_canceled",
                    generation = token.generation,
                    sequence = token.sequence
                );
                true
            }
            None => false,
        }
    }
}

impl Drop for BackoffTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
#[path = "../tests/controller/backoff_tests.rs"]
mod tests;
