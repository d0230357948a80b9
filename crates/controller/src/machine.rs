//! Update-loop state machine.
//!
//! [`LoopMachine`] holds no timers, tasks or channels. Every operator command and every
//! external event is fed in as a method call that returns the [`LoopEffect`]s the runtime
//! must carry out. Each attempt (scan, back-off, transfer) is tagged with an
//! [`AttemptToken`]; events carrying any other token than the pending one are stale.

use std::sync::Arc;
use std::time::Duration;

use discovery::SessionOutcome;

use crate::backoff::{BackoffPolicy, BackoffReason};
use crate::models::{
    DeviceTarget, FirmwareImage, LoopLogLevel, LoopSnapshot, LoopStatus, TransferEvent,
};
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptToken {
    pub generation: u64,
    pub sequence: u64,
}

/// The single outstanding attempt. Holding it in one enum keeps a scan session, a back-off
/// timer and a transfer from ever coexisting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    Idle,
    Scan(AttemptToken),
    Backoff(AttemptToken),
    Transfer(AttemptToken),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEffect {
    StartScan {
        token: AttemptToken,
        target: Arc<DeviceTarget>,
    },
    StopScan,
    ScheduleBackoff {
        token: AttemptToken,
        delay: Duration,
        reason: BackoffReason,
    },
    CancelBackoff,
    TriggerTransfer {
        token: AttemptToken,
        address: String,
        name_hint: Option<String>,
        image: FirmwareImage,
        target: Arc<DeviceTarget>,
    },
    Report {
        level: LoopLogLevel,
        event: &'static str,
        message: String,
    },
}

fn report(level: LoopLogLevel, event: &'static str, message: impl Into<String>) -> LoopEffect {
    LoopEffect::Report {
        level,
        event,
        message: message.into(),
    }
}

#[derive(Debug, Clone)]
pub struct LoopMachine {
    policy: BackoffPolicy,
    status: LoopStatus,
    running: bool,
    success_count: u64,
    target: Option<Arc<DeviceTarget>>,
    image: Option<FirmwareImage>,
    run_id: Option<String>,
    generation: u64,
    sequence: u64,
    pending: Pending,
    detached_transfer: Option<AttemptToken>,
}

impl LoopMachine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            status: LoopStatus::Idle,
            running: false,
            success_count: 0,
            target: None,
            image: None,
            run_id: None,
            generation: 0,
            sequence: 0,
            pending: Pending::Idle,
            detached_transfer: None,
        }
    }

    pub fn status(&self) -> LoopStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn success_count(&self) -> u64 {
        self.success_count
    }

    pub fn pending(&self) -> Pending {
        self.pending
    }

    pub fn snapshot(&self) -> LoopSnapshot {
        LoopSnapshot {
            status: self.status,
            is_running: self.running,
            transfer_in_progress: matches!(self.pending, Pending::Transfer(_))
                || (self.running && self.detached_transfer.is_some()),
            success_count: self.success_count,
            target: self.target.as_deref().cloned(),
            image: self.image.clone(),
            run_id: self.run_id.clone(),
        }
    }

    pub fn select_target(&mut self, target: DeviceTarget) -> AppResult<Vec<LoopEffect>> {
        self.ensure_selection_unlocked("target")?;
        if target.address.is_empty() {
            return Err(AppError::new(
                "loop_target_invalid",
                "Device address is required",
            ));
        }
        let message = format!("Selected device {target}");
        self.target = Some(Arc::new(target));
        Ok(vec![report(LoopLogLevel::Info, "loop_target_selected", message)])
    }

    pub fn select_image(&mut self, image: FirmwareImage) -> AppResult<Vec<LoopEffect>> {
        self.ensure_selection_unlocked("image")?;
        let message = format!("Selected firmware {}", image.display_name());
        self.image = Some(image);
        Ok(vec![report(LoopLogLevel::Info, "loop_image_selected", message)])
    }

    fn ensure_selection_unlocked(&self, selection: &str) -> AppResult<()> {
        if self.running {
            return Err(AppError::new(
                "loop_running_selection_locked",
                "Stop the loop before changing the selection",
            )
            .with_context("selection", selection));
        }
        Ok(())
    }

    pub fn start(&mut self, run_id: impl Into<String>) -> AppResult<Vec<LoopEffect>> {
        if self.running {
            return Ok(vec![report(
                LoopLogLevel::Warn,
                "loop_already_running",
                "Loop is already running",
            )]);
        }
        let Some(target) = self.target.clone() else {
            return Err(AppError::new(
                "loop_target_missing",
                "Select a device before starting the loop",
            ));
        };
        if self.image.is_none() {
            return Err(AppError::new(
                "loop_image_missing",
                "Select a firmware image before starting the loop",
            ));
        }

        self.generation += 1;
        self.sequence = 0;
        self.success_count = 0;
        self.running = true;
        self.run_id = Some(run_id.into());

        let mut effects = vec![report(
            LoopLogLevel::Info,
            "loop_started",
            format!("Loop started for {target}"),
        )];
        if self.detached_transfer.is_some() {
            // The previous run's transfer still owns the device. Its terminal event schedules
            // the first scan of this run.
            self.status = LoopStatus::Transferring;
            effects.push(report(
                LoopLogLevel::Warn,
                "loop_waiting_for_transfer",
                "Waiting for the previous transfer to finish before scanning",
            ));
            return Ok(effects);
        }
        effects.extend(self.begin_scan(target));
        Ok(effects)
    }

    /// Idempotent. A transfer in flight is left to finish; its terminal event is only logged,
    /// and a later `start` waits for it before scanning.
    pub fn stop(&mut self) -> Vec<LoopEffect> {
        self.halt(LoopLogLevel::Info, "loop_stopped", "Loop stopped".to_string())
    }

    /// Stops the run because the runtime could not carry out an attempt.
    pub fn abort_run(&mut self, error: &AppError) -> Vec<LoopEffect> {
        self.halt(
            LoopLogLevel::Error,
            "loop_halted",
            format!("Loop halted: {}", error.message),
        )
    }

    fn halt(&mut self, level: LoopLogLevel, event: &'static str, message: String) -> Vec<LoopEffect> {
        if !self.running {
            return Vec::new();
        }

        let mut effects = Vec::new();
        match self.pending {
            Pending::Scan(_) => effects.push(LoopEffect::StopScan),
            Pending::Backoff(_) => effects.push(LoopEffect::CancelBackoff),
            Pending::Transfer(token) => {
                self.detached_transfer = Some(token);
                effects.push(report(
                    LoopLogLevel::Warn,
                    "loop_transfer_left_running",
                    "Transfer in progress will finish on its own",
                ));
            }
            Pending::Idle => {}
        }

        self.pending = Pending::Idle;
        self.running = false;
        self.status = LoopStatus::Stopped;
        effects.push(report(
            level,
            event,
            format!("{message}, {} successful update(s)", self.success_count),
        ));
        effects
    }

    pub fn on_session_outcome(&mut self, token: AttemptToken, outcome: SessionOutcome) -> Vec<LoopEffect> {
        if !self.running || self.pending != Pending::Scan(token) {
            tracing::debug!(
                event = "loop_stale_session_outcome",
                generation = token.generation,
                sequence = token.sequence
            );
            return Vec::new();
        }
        let (Some(target), Some(image)) = (self.target.clone(), self.image.clone()) else {
            return Vec::new();
        };

        match outcome {
            SessionOutcome::Matched { address, name } => {
                let name_hint = name
                    .filter(|name| !name.trim().is_empty())
                    .or_else(|| target.name.clone());
                let token = self.next_token();
                self.pending = Pending::Transfer(token);
                self.status = LoopStatus::Transferring;
                vec![
                    report(
                        LoopLogLevel::Info,
                        "loop_device_matched",
                        format!(
                            "Found {} ({address}), sending {}",
                            name_hint.as_deref().unwrap_or("Unknown"),
                            image.display_name()
                        ),
                    ),
                    LoopEffect::TriggerTransfer {
                        token,
                        address,
                        name_hint,
                        image,
                        target,
                    },
                ]
            }
            SessionOutcome::Failed(failure) => {
                let reason = if failure.requires_operator() {
                    BackoffReason::AdapterUnavailable
                } else {
                    BackoffReason::ScanFailure
                };
                let mut effects = vec![report(
                    LoopLogLevel::Warn,
                    "loop_discovery_failed",
                    failure.to_string(),
                )];
                effects.extend(self.schedule_backoff(reason));
                effects
            }
            SessionOutcome::TimedOut => {
                let mut effects = vec![report(
                    LoopLogLevel::Info,
                    "loop_discovery_timed_out",
                    format!("{target} not found, retrying"),
                )];
                effects.extend(self.schedule_backoff(BackoffReason::DiscoveryTimeout));
                effects
            }
        }
    }

    /// The scan session could not be started at all. Retried like a scan failure.
    pub fn on_scan_start_failed(&mut self, token: AttemptToken, error: &AppError) -> Vec<LoopEffect> {
        if !self.running || self.pending != Pending::Scan(token) {
            return Vec::new();
        }
        let mut effects = vec![report(
            LoopLogLevel::Error,
            "loop_scan_start_failed",
            format!("Scan could not start: {}", error.message),
        )];
        effects.extend(self.schedule_backoff(BackoffReason::ScanFailure));
        effects
    }

    pub fn on_backoff_elapsed(&mut self, token: AttemptToken) -> Vec<LoopEffect> {
        if !self.running || self.pending != Pending::Backoff(token) {
            tracing::debug!(
                event = "loop_stale_backoff_elapsed",
                generation = token.generation,
                sequence = token.sequence
            );
            return Vec::new();
        }
        let Some(target) = self.target.clone() else {
            return Vec::new();
        };
        self.begin_scan(target)
    }

    pub fn on_transfer_event(&mut self, token: AttemptToken, event: TransferEvent) -> Vec<LoopEffect> {
        if self.running && self.pending == Pending::Transfer(token) {
            return self.apply_transfer_event(event);
        }

        if self.detached_transfer == Some(token) {
            if !event.is_terminal() {
                return Vec::new();
            }
            self.detached_transfer = None;
            let mut effects = vec![report(
                LoopLogLevel::Info,
                "loop_transfer_finished_after_stop",
                format!("Transfer finished after stop: {}", describe_transfer_event(&event)),
            )];
            if self.running && self.pending == Pending::Idle {
                effects.extend(self.schedule_backoff(backoff_reason(&event)));
            }
            return effects;
        }

        tracing::debug!(
            event = "loop_stale_transfer_event",
            generation = token.generation,
            sequence = token.sequence,
            kind = event.kind()
        );
        Vec::new()
    }

    fn apply_transfer_event(&mut self, event: TransferEvent) -> Vec<LoopEffect> {
        let (level, log_event, reason) = match &event {
            TransferEvent::Started { .. } => {
                return vec![report(
                    LoopLogLevel::Info,
                    "transfer_started",
                    describe_transfer_event(&event),
                )];
            }
            TransferEvent::Connecting { .. } => {
                return vec![report(
                    LoopLogLevel::Info,
                    "transfer_connecting",
                    describe_transfer_event(&event),
                )];
            }
            TransferEvent::Completed { .. } => {
                self.success_count += 1;
                (
                    LoopLogLevel::Info,
                    "transfer_completed",
                    BackoffReason::TransferCompleted,
                )
            }
            TransferEvent::Aborted { .. } => (
                LoopLogLevel::Warn,
                "transfer_aborted",
                BackoffReason::TransferAborted,
            ),
            TransferEvent::Error { .. } => (
                LoopLogLevel::Error,
                "transfer_failed",
                BackoffReason::TransferError,
            ),
        };

        let mut effects = vec![report(level, log_event, describe_transfer_event(&event))];
        if matches!(event, TransferEvent::Completed { .. }) {
            effects.push(report(
                LoopLogLevel::Info,
                "loop_success_counted",
                format!("Successful updates: {}", self.success_count),
            ));
        }
        effects.extend(self.schedule_backoff(reason));
        effects
    }

    fn begin_scan(&mut self, target: Arc<DeviceTarget>) -> Vec<LoopEffect> {
        let token = self.next_token();
        self.pending = Pending::Scan(token);
        self.status = LoopStatus::Scanning;
        vec![LoopEffect::StartScan { token, target }]
    }

    fn schedule_backoff(&mut self, reason: BackoffReason) -> Vec<LoopEffect> {
        let token = self.next_token();
        self.pending = Pending::Backoff(token);
        self.status = LoopStatus::AwaitingBackoff;
        vec![LoopEffect::ScheduleBackoff {
            token,
            delay: self.policy.delay(reason),
            reason,
        }]
    }

    fn next_token(&mut self) -> AttemptToken {
        self.sequence += 1;
        AttemptToken {
            generation: self.generation,
            sequence: self.sequence,
        }
    }
}

fn backoff_reason(event: &TransferEvent) -> BackoffReason {
    match event {
        TransferEvent::Completed { .. } => BackoffReason::TransferCompleted,
        TransferEvent::Aborted { .. } => BackoffReason::TransferAborted,
        _ => BackoffReason::TransferError,
    }
}

fn describe_transfer_event(event: &TransferEvent) -> String {
    match event {
        TransferEvent::Started { address } => format!("Transfer started for {address}"),
        TransferEvent::Connecting { address } => format!("Connecting to {address}"),
        TransferEvent::Completed { address } => format!("Firmware update completed on {address}"),
        TransferEvent::Aborted { address } => format!("Firmware update aborted on {address}"),
        TransferEvent::Error {
            address,
            code,
            message,
        } => format!("Firmware update failed on {address} (code {code}): {message}"),
    }
}

#[cfg(test)]
#[path = "../tests/controller/machine_tests.rs"]
mod tests;
