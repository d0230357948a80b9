use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use discovery::{DiscoverySubsystem, ScanSessionManager, SessionOutcome, SessionStart};
use kernel::identity::IdentityMatcher;
use kernel::runtime::TaskSpawner;
use kernel::selector::StableDeviceSelector;
use kernel::sync::{read_lock, write_lock};
use settings::LoopSettings;
use tokio::sync::{broadcast, mpsc, oneshot};
use transfer::{TransferEventRelay, TransferOutcomeSink, TransferRequest, TransferSubsystem};

use crate::backoff::{BackoffPolicy, BackoffTimer};
use crate::event_log::EventLog;
use crate::machine::{AttemptToken, LoopEffect, LoopMachine};
use crate::models::{
    DeviceTarget, FirmwareImage, LoopLogEntry, LoopLogLevel, LoopSnapshot, TransferEvent,
};
use crate::{AppError, AppResult};

const COMMAND_QUEUE_CAPACITY: usize = 32;
const SNAPSHOT_BROADCAST_CAPACITY: usize = 64;
const TRIGGER_FAILED_CODE: i32 = -1;

/// External collaborators the loop drives.
#[derive(Clone)]
pub struct LoopDependencies {
    pub discovery: Arc<dyn DiscoverySubsystem>,
    pub transfer: Arc<dyn TransferSubsystem>,
    pub spawner: Arc<dyn TaskSpawner>,
}

enum LoopCommand {
    SelectTarget(DeviceTarget, oneshot::Sender<AppResult<()>>),
    SelectImage(FirmwareImage, oneshot::Sender<AppResult<()>>),
    Start(oneshot::Sender<AppResult<()>>),
    Stop(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug)]
enum LoopEvent {
    SessionOutcome(AttemptToken, SessionOutcome),
    BackoffElapsed(AttemptToken),
    Transfer(AttemptToken, TransferEvent),
}

struct SharedState {
    snapshot: RwLock<LoopSnapshot>,
    log: RwLock<EventLog>,
    updates: broadcast::Sender<LoopSnapshot>,
}

/// Operator handle to the update loop. The loop itself runs as one task that owns the
/// state machine; this handle only sends commands and reads published state.
#[derive(Clone)]
pub struct LoopController {
    commands: mpsc::Sender<LoopCommand>,
    shared: Arc<SharedState>,
}

impl LoopController {
    pub fn spawn(settings: &LoopSettings, dependencies: LoopDependencies) -> AppResult<Self> {
        let settings = settings.clone().normalized();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(SNAPSHOT_BROADCAST_CAPACITY);
        let machine = LoopMachine::new(BackoffPolicy::from_settings(&settings));
        let shared = Arc::new(SharedState {
            snapshot: RwLock::new(machine.snapshot()),
            log: RwLock::new(EventLog::new(settings.log_capacity)),
            updates,
        });

        let matcher = IdentityMatcher::new(settings.mode_marker.as_str());
        let runtime = LoopRuntime {
            published: PublishedState::of(&machine.snapshot()),
            machine,
            sessions: ScanSessionManager::new(
                dependencies.discovery,
                dependencies.spawner.clone(),
                matcher.clone(),
                settings.discovery_timeout(),
            ),
            transfer: dependencies.transfer,
            timer: BackoffTimer::new(dependencies.spawner.clone()),
            matcher,
            events: event_tx,
            shared: shared.clone(),
        };
        dependencies.spawner.spawn(
            "loop_controller",
            Box::pin(runtime.run(command_rx, event_rx)),
        )?;

        tracing::info!(
            event = "loop_controller_spawned",
            discovery_timeout_ms = settings.discovery_timeout_ms,
            mode_marker = settings.mode_marker.as_str()
        );
        Ok(Self {
            commands: command_tx,
            shared,
        })
    }

    pub async fn select_target(&self, address: &str, name: Option<String>) -> AppResult<()> {
        let target = DeviceTarget::new(address, name);
        self.request(|reply| LoopCommand::SelectTarget(target, reply))
            .await?
    }

    pub async fn select_image(&self, path: impl Into<PathBuf>) -> AppResult<()> {
        let image = FirmwareImage::new(path);
        self.request(|reply| LoopCommand::SelectImage(image, reply))
            .await?
    }

    pub async fn start(&self) -> AppResult<()> {
        self.request(LoopCommand::Start).await?
    }

    /// Returns once any scan session and back-off timer are cancelled. Idempotent.
    pub async fn stop(&self) -> AppResult<()> {
        self.request(LoopCommand::Stop).await
    }

    /// Stops the loop and ends its task. Later commands fail with
    /// `loop_controller_unavailable`.
    pub async fn shutdown(&self) {
        if self.request(LoopCommand::Shutdown).await.is_err() {
            tracing::debug!(event = "loop_controller_already_shut_down");
        }
    }

    pub fn snapshot(&self) -> LoopSnapshot {
        read_lock(&self.shared.snapshot, "loop_snapshot").clone()
    }

    /// Receives a snapshot whenever the status, the success count or the running flag
    /// changes.
    pub fn subscribe(&self) -> broadcast::Receiver<LoopSnapshot> {
        self.shared.updates.subscribe()
    }

    pub fn log_entries(&self) -> Vec<LoopLogEntry> {
        read_lock(&self.shared.log, "loop_event_log").entries()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> LoopCommand,
    ) -> AppResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .await
            .map_err(|_| controller_unavailable())?;
        reply_rx.await.map_err(|_| controller_unavailable())
    }
}

fn controller_unavailable() -> AppError {
    AppError::new("loop_controller_unavailable", "Update loop is not running")
}

struct TokenRelay {
    token: AttemptToken,
    events: mpsc::UnboundedSender<LoopEvent>,
}

impl TransferEventRelay for TokenRelay {
    fn relay(&self, event: TransferEvent) {
        if self
            .events
            .send(LoopEvent::Transfer(self.token, event))
            .is_err()
        {
            tracing::debug!(event = "loop_transfer_event_undelivered");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PublishedState {
    status: crate::models::LoopStatus,
    running: bool,
    success_count: u64,
}

impl PublishedState {
    fn of(snapshot: &LoopSnapshot) -> Self {
        Self {
            status: snapshot.status,
            running: snapshot.is_running,
            success_count: snapshot.success_count,
        }
    }
}

struct LoopRuntime {
    machine: LoopMachine,
    sessions: ScanSessionManager,
    transfer: Arc<dyn TransferSubsystem>,
    timer: BackoffTimer,
    matcher: IdentityMatcher,
    events: mpsc::UnboundedSender<LoopEvent>,
    shared: Arc<SharedState>,
    published: PublishedState,
}

impl LoopRuntime {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<LoopCommand>,
        mut events: mpsc::UnboundedReceiver<LoopEvent>,
    ) {
        let mut shutdown_reply = None;
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(LoopCommand::Shutdown(reply)) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
            self.publish();
        }

        drop(commands);
        let effects = self.machine.stop();
        self.apply(effects);
        self.publish();
        tracing::info!(event = "loop_controller_exited");
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    fn handle_command(&mut self, command: LoopCommand) {
        match command {
            LoopCommand::SelectTarget(target, reply) => {
                let result = self.machine.select_target(target);
                let _ = reply.send(self.settle(result));
            }
            LoopCommand::SelectImage(image, reply) => {
                let result = self.machine.select_image(image);
                let _ = reply.send(self.settle(result));
            }
            LoopCommand::Start(reply) => {
                let result = self.machine.start(uuid::Uuid::new_v4().to_string());
                let _ = reply.send(self.settle(result));
            }
            LoopCommand::Stop(reply) => {
                let effects = self.machine.stop();
                self.apply(effects);
                let _ = reply.send(());
            }
            LoopCommand::Shutdown(reply) => {
                let _ = reply.send(());
            }
        }
    }

    /// Applies the effects of an accepted command, or logs the refusal.
    fn settle(&mut self, result: AppResult<Vec<LoopEffect>>) -> AppResult<()> {
        match result {
            Ok(effects) => {
                self.apply(effects);
                Ok(())
            }
            Err(error) => {
                write_lock(&self.shared.log, "loop_event_log").push(
                    LoopLogLevel::Error,
                    error.code.as_str(),
                    error.message.clone(),
                );
                Err(error)
            }
        }
    }

    fn handle_event(&mut self, event: LoopEvent) {
        let effects = match event {
            LoopEvent::SessionOutcome(token, outcome) => {
                self.machine.on_session_outcome(token, outcome)
            }
            LoopEvent::BackoffElapsed(token) => {
                if self.timer.armed() == Some(token) {
                    self.timer.cancel();
                }
                self.machine.on_backoff_elapsed(token)
            }
            LoopEvent::Transfer(token, event) => self.machine.on_transfer_event(token, event),
        };
        self.apply(effects);
    }

    fn apply(&mut self, effects: Vec<LoopEffect>) {
        for effect in effects {
            match effect {
                LoopEffect::StartScan { token, target } => self.start_scan(token, target),
                LoopEffect::StopScan => {
                    self.sessions.stop_session();
                }
                LoopEffect::ScheduleBackoff {
                    token,
                    delay,
                    reason,
                } => {
                    let events = self.events.clone();
                    let scheduled = self.timer.schedule(token, delay, move |token| {
                        let _ = events.send(LoopEvent::BackoffElapsed(token));
                    });
                    match scheduled {
                        Ok(()) => tracing::debug!(
                            event = "loop_backoff_scheduled",
                            reason = reason.as_str(),
                            delay_ms = delay.as_millis() as u64
                        ),
                        Err(error) => {
                            let follow_up = self.machine.abort_run(&error);
                            self.apply(follow_up);
                        }
                    }
                }
                LoopEffect::CancelBackoff => {
                    self.timer.cancel();
                }
                LoopEffect::TriggerTransfer {
                    token,
                    address,
                    name_hint,
                    image,
                    target,
                } => self.trigger_transfer(token, address, name_hint, image, target),
                LoopEffect::Report {
                    level,
                    event,
                    message,
                } => write_lock(&self.shared.log, "loop_event_log").push(level, event, message),
            }
        }
    }

    fn start_scan(&mut self, token: AttemptToken, target: Arc<DeviceTarget>) {
        let events = self.events.clone();
        let started = self.sessions.start_session(target, move |outcome| {
            let _ = events.send(LoopEvent::SessionOutcome(token, outcome));
        });
        match started {
            Ok(SessionStart::Started(session_id)) => tracing::debug!(
                event = "loop_scan_started",
                session_id,
                generation = token.generation,
                sequence = token.sequence
            ),
            Ok(SessionStart::AlreadyActive(session_id)) => tracing::warn!(
                event = "loop_scan_already_active",
                session_id
            ),
            Ok(SessionStart::Refused) => tracing::debug!(
                event = "loop_scan_refused",
                generation = token.generation,
                sequence = token.sequence
            ),
            Err(error) => {
                let follow_up = self.machine.on_scan_start_failed(token, &error);
                self.apply(follow_up);
            }
        }
    }

    fn trigger_transfer(
        &mut self,
        token: AttemptToken,
        address: String,
        name_hint: Option<String>,
        image: FirmwareImage,
        target: Arc<DeviceTarget>,
    ) {
        let sink = TransferOutcomeSink::new(
            address.as_str(),
            Arc::new(TokenRelay {
                token,
                events: self.events.clone(),
            }),
        );
        let request = TransferRequest {
            address,
            name_hint,
            image,
            selector: Arc::new(StableDeviceSelector::new(target, self.matcher.clone())),
        };

        if let Err(error) = self.transfer.trigger(request, sink.clone()) {
            tracing::error!(
                event = "loop_transfer_trigger_failed",
                error_code = error.code.as_str(),
                error_detail = error.message.as_str()
            );
            sink.error(TRIGGER_FAILED_CODE, error.message.clone());
        }
    }

    fn publish(&mut self) {
        let snapshot = self.machine.snapshot();
        let state = PublishedState::of(&snapshot);
        *write_lock(&self.shared.snapshot, "loop_snapshot") = snapshot.clone();
        if state != self.published {
            self.published = state;
            let _ = self.shared.updates.send(snapshot);
        }
    }
}

#[cfg(test)]
#[path = "../tests/controller/controller_tests.rs"]
mod tests;
