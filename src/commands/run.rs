use std::path::PathBuf;
use std::sync::Arc;

use controller::{LoopController, LoopDependencies};
use discovery::DiscoverySubsystem;
use kernel::runtime::{TaskSpawner, TokioTaskSpawner};
use protocol::models::{LoopLogEntry, LoopSnapshot};
use protocol::{AppError, AppResult};
use settings::LoopSettings;
use tokio::sync::broadcast::error::RecvError;
use transfer::CommandTransferSubsystem;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub address: String,
    pub name: Option<String>,
    pub image: PathBuf,
}

pub fn describe_snapshot(snapshot: &LoopSnapshot) -> String {
    format!(
        "[{}] successes: {}",
        snapshot.status, snapshot.success_count
    )
}

pub fn describe_entry(entry: &LoopLogEntry) -> String {
    format!(
        "{} {:<5} {}: {}",
        entry.timestamp_ms,
        entry.level.as_str(),
        entry.event,
        entry.message
    )
}

pub async fn run_loop(
    settings: LoopSettings,
    discovery: Arc<dyn DiscoverySubsystem>,
    options: RunOptions,
) -> AppResult<()> {
    if !settings.transfer.is_configured() {
        return Err(AppError::new(
            "transfer_command_missing",
            "No transfer tool configured; set transfer.program in the settings file",
        ));
    }
    if !options.image.is_file() {
        tracing::warn!(
            event = "run_image_not_found",
            image = %options.image.display()
        );
    }

    let spawner: Arc<dyn TaskSpawner> = Arc::new(TokioTaskSpawner);
    let transfer = Arc::new(CommandTransferSubsystem::new(
        settings.transfer.clone(),
        spawner.clone(),
    ));
    let controller = LoopController::spawn(
        &settings,
        LoopDependencies {
            discovery,
            transfer,
            spawner,
        },
    )?;

    controller
        .select_target(&options.address, options.name.clone())
        .await?;
    controller.select_image(options.image.clone()).await?;

    let mut updates = controller.subscribe();
    controller.start().await?;
    println!("Loop started, press Ctrl-C to stop");

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            result = &mut interrupted => {
                if let Err(error) = result {
                    tracing::warn!(event = "run_signal_listener_failed", error = error.to_string());
                }
                break;
            }
            update = updates.recv() => match update {
                Ok(snapshot) => println!("{}", describe_snapshot(&snapshot)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(event = "run_snapshot_lagged", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    controller.stop().await?;
    let snapshot = controller.snapshot();
    println!("Stopped after {} successful update(s)", snapshot.success_count);
    for entry in controller.log_entries() {
        println!("{}", describe_entry(&entry));
    }
    controller.shutdown().await;
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/commands/run_tests.rs"]
mod tests;
