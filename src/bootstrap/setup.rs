use std::sync::Arc;
use std::time::Duration;

use discovery::DiscoverySubsystem;
use protocol::AppResult;

use crate::cli::{Cli, Command};
use crate::commands::run::{RunOptions, run_loop};
use crate::commands::{run_command, scan};

/// Reports through tracing once a subscriber is installed, stderr before that.
fn report_fallback(level: tracing::Level, message: &str) {
    if !tracing::dispatcher::has_been_set() {
        eprintln!("dfu-looper: {message}");
        return;
    }

    if level == tracing::Level::ERROR {
        tracing::error!(event = "dispatch_failed", message);
    } else {
        tracing::warn!(event = "dispatch_warning", message);
    }
}

pub(crate) fn log_warn_fallback(message: &str) {
    report_fallback(tracing::Level::WARN, message);
}

pub(crate) fn log_error_fallback(message: &str) {
    report_fallback(tracing::Level::ERROR, message);
}

#[cfg(feature = "ble")]
fn discovery_backend() -> AppResult<Arc<dyn DiscoverySubsystem>> {
    Ok(Arc::new(discovery::btle::BtleDiscovery::new()))
}

#[cfg(not(feature = "ble"))]
fn discovery_backend() -> AppResult<Arc<dyn DiscoverySubsystem>> {
    Err(protocol::AppError::new(
        "discovery_backend_unavailable",
        "Built without BLE support; rebuild with --features ble",
    ))
}

pub(crate) async fn dispatch(cli: Cli) -> AppResult<()> {
    let settings = match settings::load_settings(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(error) => {
            log_warn_fallback(&format!("settings not loaded: {error}"));
            return Err(error);
        }
    };

    let logging_guard = logging::init_logging(cli.log_dir.as_deref(), settings.log_keep_days)?;
    tracing::info!(
        event = "logging_initialized",
        level = logging_guard.level(),
        log_dir = %logging_guard
            .log_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| "console".to_string())
    );

    match cli.command {
        Command::Scan { seconds } => {
            let discovery = discovery_backend()?;
            run_command("scan", scan::scan(discovery, Duration::from_secs(seconds))).await
        }
        Command::Run {
            address,
            name,
            image,
        } => {
            let discovery = discovery_backend()?;
            let options = RunOptions {
                address,
                name,
                image,
            };
            run_command("run", run_loop(settings, discovery, options)).await
        }
    }
}
