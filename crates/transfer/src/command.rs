use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use kernel::identity::increment_address;
use kernel::runtime::TaskSpawner;
use settings::TransferCommandSettings;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};

use crate::outcome_sink::TransferOutcomeSink;
use crate::subsystem::{TransferRequest, TransferSubsystem};
use crate::{AppError, AppResult};

pub const LAUNCH_FAILED_CODE: i32 = -1;
pub const SELECTOR_REJECTED_CODE: i32 = -3;

const ADDRESS_PLACEHOLDER: &str = "{address}";
const NAME_PLACEHOLDER: &str = "{name}";
const IMAGE_PLACEHOLDER: &str = "{image}";

/// Pushes firmware by running an external DFU tool once per attempt. Exit code 0 is a
/// completed transfer and termination by signal an aborted one; anything else is an error
/// carrying the exit code and the tool's last stderr line.
pub struct CommandTransferSubsystem {
    settings: TransferCommandSettings,
    spawner: Arc<dyn TaskSpawner>,
}

impl CommandTransferSubsystem {
    pub fn new(settings: TransferCommandSettings, spawner: Arc<dyn TaskSpawner>) -> Self {
        Self { settings, spawner }
    }
}

impl TransferSubsystem for CommandTransferSubsystem {
    fn trigger(&self, request: TransferRequest, sink: TransferOutcomeSink) -> AppResult<()> {
        if !self.settings.is_configured() {
            return Err(AppError::new(
                "transfer_command_missing",
                "No transfer tool configured",
            ));
        }

        let incremented = increment_address(&request.address).unwrap_or_default();
        if !request.selector.matches(
            &request.address,
            request.name_hint.as_deref(),
            &incremented,
        ) {
            tracing::warn!(
                event = "transfer_selector_rejected",
                address = request.address.as_str()
            );
            sink.error(
                SELECTOR_REJECTED_CODE,
                format!("device {} is not the selected target", request.address),
            );
            return Ok(());
        }

        let program = self.settings.program.clone();
        let args = render_args(&self.settings.args, &request);
        tracing::info!(
            event = "transfer_command_prepared",
            address = request.address.as_str(),
            program = program.as_str(),
            image = %request.image.path().display()
        );

        let mut command = Command::new(&program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        sink.started();
        self.spawner.spawn(
            "transfer_command",
            Box::pin(async move {
                run_command(command, program, sink).await;
            }),
        )?;
        Ok(())
    }
}

pub fn render_args(args: &[String], request: &TransferRequest) -> Vec<String> {
    let name = request
        .name_hint
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    let image = request.image.path().display().to_string();

    args.iter()
        .map(|arg| {
            arg.replace(ADDRESS_PLACEHOLDER, &request.address)
                .replace(NAME_PLACEHOLDER, name)
                .replace(IMAGE_PLACEHOLDER, &image)
        })
        .collect()
}

async fn run_command(mut command: Command, program: String, sink: TransferOutcomeSink) {
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(error) => {
            tracing::error!(
                event = "transfer_command_launch_failed",
                program = program.as_str(),
                error = error.to_string()
            );
            sink.error(
                LAUNCH_FAILED_CODE,
                format!("failed to launch {program}: {error}"),
            );
            return;
        }
    };
    sink.connecting();

    let stderr = child.stderr.take();
    let (last_line, status) = tokio::join!(read_last_line(stderr), child.wait());
    match status {
        Ok(status) => report_exit(&sink, status, last_line),
        Err(error) => {
            sink.error(
                LAUNCH_FAILED_CODE,
                format!("failed to wait for {program}: {error}"),
            );
        }
    }
}

fn report_exit(sink: &TransferOutcomeSink, status: ExitStatus, last_line: Option<String>) {
    match status.code() {
        Some(0) => {
            tracing::info!(event = "transfer_command_completed", address = sink.address());
            sink.completed();
        }
        Some(code) => {
            let message =
                last_line.unwrap_or_else(|| format!("transfer tool exited with code {code}"));
            tracing::warn!(
                event = "transfer_command_failed",
                address = sink.address(),
                exit_code = code,
                detail = message.as_str()
            );
            sink.error(code, message);
        }
        None => {
            tracing::warn!(event = "transfer_command_aborted", address = sink.address());
            sink.aborted();
        }
    }
}

async fn read_last_line(stderr: Option<ChildStderr>) -> Option<String> {
    let mut lines = BufReader::new(stderr?).lines();
    let mut last = None;
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if !line.is_empty() {
            tracing::debug!(event = "transfer_command_output", line);
            last = Some(line.to_string());
        }
    }
    last
}

#[cfg(test)]
#[path = "../tests/transfer/command_tests.rs"]
mod tests;
