use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::models::TransferEvent;

pub const MISSING_TERMINAL_CODE: i32 = -2;
const MISSING_TERMINAL_MESSAGE: &str = "transfer ended without a terminal event";

pub trait TransferEventRelay: Send + Sync {
    fn relay(&self, event: TransferEvent);
}

struct SinkInner {
    address: String,
    relay: Arc<dyn TransferEventRelay>,
    terminal_sent: AtomicBool,
}

impl SinkInner {
    fn forward(&self, event: TransferEvent) -> bool {
        if event.is_terminal() {
            if self.terminal_sent.swap(true, Ordering::AcqRel) {
                tracing::debug!(
                    event = "transfer_duplicate_terminal_dropped",
                    address = self.address.as_str(),
                    kind = event.kind()
                );
                return false;
            }
        } else if self.terminal_sent.load(Ordering::Acquire) {
            tracing::debug!(
                event = "transfer_late_progress_dropped",
                address = self.address.as_str(),
                kind = event.kind()
            );
            return false;
        }

        self.relay.relay(event);
        true
    }
}

impl Drop for SinkInner {
    fn drop(&mut self) {
        if self.terminal_sent.load(Ordering::Acquire) {
            return;
        }
        tracing::warn!(
            event = "transfer_terminal_missing",
            address = self.address.as_str()
        );
        self.forward(TransferEvent::Error {
            address: self.address.clone(),
            code: MISSING_TERMINAL_CODE,
            message: MISSING_TERMINAL_MESSAGE.to_string(),
        });
    }
}

/// Hands a transfer's notifications to the loop. Clones share state: across all of them
/// exactly one terminal event gets through, and dropping the last clone without one reports
/// an error in its place.
#[derive(Clone)]
pub struct TransferOutcomeSink {
    inner: Arc<SinkInner>,
}

impl TransferOutcomeSink {
    pub fn new(address: impl Into<String>, relay: Arc<dyn TransferEventRelay>) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                address: address.into(),
                relay,
                terminal_sent: AtomicBool::new(false),
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn is_finished(&self) -> bool {
        self.inner.terminal_sent.load(Ordering::Acquire)
    }

    /// Returns whether the event reached the relay.
    pub fn forward(&self, event: TransferEvent) -> bool {
        self.inner.forward(event)
    }

    pub fn started(&self) -> bool {
        self.forward(TransferEvent::Started {
            address: self.inner.address.clone(),
        })
    }

    pub fn connecting(&self) -> bool {
        self.forward(TransferEvent::Connecting {
            address: self.inner.address.clone(),
        })
    }

    pub fn completed(&self) -> bool {
        self.forward(TransferEvent::Completed {
            address: self.inner.address.clone(),
        })
    }

    pub fn aborted(&self) -> bool {
        self.forward(TransferEvent::Aborted {
            address: self.inner.address.clone(),
        })
    }

    pub fn error(&self, code: i32, message: impl Into<String>) -> bool {
        self.forward(TransferEvent::Error {
            address: self.inner.address.clone(),
            code,
            message: message.into(),
        })
    }
}

impl std::fmt::Debug for TransferOutcomeSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferOutcomeSink")
            .field("address", &self.inner.address)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
#[path = "../tests/transfer/outcome_sink_tests.rs"]
mod tests;
