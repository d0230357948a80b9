use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kernel::identity::IdentityMatcher;
use kernel::runtime::TaskSpawner;
use kernel::sync::lock_mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};

use crate::AppResult;
use crate::models::{DeviceTarget, DiscoveryFailure};
use crate::subsystem::{DiscoveryEvent, DiscoveryStream, DiscoverySubsystem};

/// Reported when the advertisement stream ends without a failure event.
const STREAM_CLOSED_SCAN_CODE: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Matched {
        address: String,
        name: Option<String>,
    },
    Failed(DiscoveryFailure),
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStart {
    Started(u64),
    AlreadyActive(u64),
    /// Discovery refused to start. The `Failed` outcome was already delivered to the callback
    /// and no session exists.
    Refused,
}

struct ActiveSession {
    id: u64,
    task: Option<JoinHandle<()>>,
}

/// Owns the single live scan session. Every session that is not stopped explicitly ends
/// with exactly one outcome callback; a stopped session ends with none.
///
/// `stop_discovery` is only called with the session slot locked.
pub struct ScanSessionManager {
    discovery: Arc<dyn DiscoverySubsystem>,
    spawner: Arc<dyn TaskSpawner>,
    matcher: IdentityMatcher,
    timeout: Duration,
    active: Arc<Mutex<Option<ActiveSession>>>,
    next_id: AtomicU64,
}

impl ScanSessionManager {
    pub fn new(
        discovery: Arc<dyn DiscoverySubsystem>,
        spawner: Arc<dyn TaskSpawner>,
        matcher: IdentityMatcher,
        timeout: Duration,
    ) -> Self {
        Self {
            discovery,
            spawner,
            matcher,
            timeout,
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn is_active(&self) -> bool {
        lock_mutex(self.active.as_ref(), "scan_session").is_some()
    }

    pub fn start_session<F>(&self, target: Arc<DeviceTarget>, on_outcome: F) -> AppResult<SessionStart>
    where
        F: FnOnce(SessionOutcome) + Send + 'static,
    {
        let mut active = lock_mutex(self.active.as_ref(), "scan_session");
        if let Some(session) = active.as_ref() {
            tracing::debug!(event = "scan_session_already_active", session_id = session.id);
            return Ok(SessionStart::AlreadyActive(session.id));
        }

        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let stream = match self.discovery.start_discovery() {
            Ok(stream) => stream,
            Err(failure) => {
                drop(active);
                tracing::warn!(
                    event = "scan_session_start_failed",
                    session_id,
                    failure_code = failure.code(),
                    detail = %failure
                );
                on_outcome(SessionOutcome::Failed(failure));
                return Ok(SessionStart::Refused);
            }
        };

        *active = Some(ActiveSession {
            id: session_id,
            task: None,
        });

        let run = SessionRun {
            session_id,
            target,
            matcher: self.matcher.clone(),
            deadline: Instant::now() + self.timeout,
            active: self.active.clone(),
            discovery: self.discovery.clone(),
        };
        let spawned = self.spawner.spawn(
            "scan_session",
            Box::pin(async move {
                run.drive(stream, on_outcome).await;
            }),
        );
        match spawned {
            Ok(task) => {
                if let Some(session) = active.as_mut() {
                    session.task = Some(task);
                }
            }
            Err(error) => {
                *active = None;
                self.discovery.stop_discovery();
                return Err(error);
            }
        }

        tracing::info!(
            event = "scan_session_started",
            session_id,
            timeout_ms = self.timeout.as_millis() as u64
        );
        Ok(SessionStart::Started(session_id))
    }

    /// Returns whether a session was live. When it returns, the session task is aborted and
    /// its callback will not run unless it had already claimed its outcome.
    pub fn stop_session(&self) -> bool {
        let mut active = lock_mutex(self.active.as_ref(), "scan_session");
        let Some(session) = active.take() else {
            return false;
        };

        if let Some(task) = session.task {
            task.abort();
        }
        self.discovery.stop_discovery();
        drop(active);
        tracing::info!(event = "scan_session_stopped", session_id = session.id);
        true
    }
}

impl Drop for ScanSessionManager {
    fn drop(&mut self) {
        self.stop_session();
    }
}

struct SessionRun {
    session_id: u64,
    target: Arc<DeviceTarget>,
    matcher: IdentityMatcher,
    deadline: Instant,
    active: Arc<Mutex<Option<ActiveSession>>>,
    discovery: Arc<dyn DiscoverySubsystem>,
}

impl SessionRun {
    async fn drive<F>(self, mut stream: DiscoveryStream, on_outcome: F)
    where
        F: FnOnce(SessionOutcome) + Send + 'static,
    {
        let outcome = self.wait_for_outcome(&mut stream).await;
        drop(stream);

        if !self.release() {
            return;
        }

        match &outcome {
            SessionOutcome::Matched { address, name } => tracing::info!(
                event = "scan_session_matched",
                session_id = self.session_id,
                address = address.as_str(),
                name = name.as_deref().unwrap_or_default()
            ),
            SessionOutcome::Failed(failure) => tracing::warn!(
                event = "scan_session_failed",
                session_id = self.session_id,
                failure_code = failure.code(),
                detail = %failure
            ),
            SessionOutcome::TimedOut => tracing::info!(
                event = "scan_session_timed_out",
                session_id = self.session_id
            ),
        }
        on_outcome(outcome);
    }

    async fn wait_for_outcome(&self, stream: &mut DiscoveryStream) -> SessionOutcome {
        loop {
            let event = match timeout_at(self.deadline, stream.recv()).await {
                Err(_) => return SessionOutcome::TimedOut,
                Ok(None) => {
                    return SessionOutcome::Failed(DiscoveryFailure::ScanFailed {
                        code: STREAM_CLOSED_SCAN_CODE,
                    });
                }
                Ok(Some(event)) => event,
            };

            match event {
                DiscoveryEvent::Failed(failure) => return SessionOutcome::Failed(failure),
                DiscoveryEvent::Advertisement(advertisement) => {
                    if self.matcher.matches(
                        &self.target,
                        &advertisement.address,
                        advertisement.name.as_deref(),
                    ) {
                        return SessionOutcome::Matched {
                            address: advertisement.address,
                            name: advertisement.name,
                        };
                    }
                    tracing::trace!(
                        event = "scan_advertisement_ignored",
                        session_id = self.session_id,
                        address = advertisement.address.as_str(),
                        rssi = advertisement.rssi
                    );
                }
            }
        }
    }

    /// Claims the outcome for this session and stops discovery before the slot is freed.
    /// Fails when the session was stopped or replaced.
    fn release(&self) -> bool {
        let mut active = lock_mutex(self.active.as_ref(), "scan_session");
        if !active
            .as_ref()
            .is_some_and(|session| session.id == self.session_id)
        {
            return false;
        }
        *active = None;
        self.discovery.stop_discovery();
        true
    }
}

#[cfg(test)]
#[path = "../tests/discovery/session_tests.rs"]
mod tests;
