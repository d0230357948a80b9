pub mod run;
pub mod scan;

use std::future::Future;
use std::time::Instant;

use protocol::AppResult;

pub(crate) fn command_start(command: &str) -> Instant {
    tracing::info!(event = "command_start", command = command);
    Instant::now()
}

pub(crate) fn command_end(command: &str, started_at: Instant, result: Result<(), &protocol::AppError>) {
    let duration_ms = started_at.elapsed().as_millis() as u64;
    match result {
        Ok(()) => tracing::info!(
            event = "command_end",
            command = command,
            ok = true,
            duration_ms = duration_ms
        ),
        Err(error) => tracing::error!(
            event = "command_end",
            command = command,
            ok = false,
            duration_ms = duration_ms,
            error_code = error.code.as_str(),
            error_message = error.message.as_str(),
            error_detail = error.causes.first().map(String::as_str).unwrap_or_default()
        ),
    }
}

/// Runs one CLI command with start/end records around it.
pub(crate) async fn run_command<F>(command: &str, op: F) -> AppResult<()>
where
    F: Future<Output = AppResult<()>>,
{
    let started_at = command_start(command);
    let result = op.await;
    command_end(command, started_at, result.as_ref().map(|_| ()));
    result
}
