use super::*;
use discovery::DiscoveryStream;
use protocol::models::{DiscoveryFailure, LoopLogLevel, LoopStatus};
use settings::TransferCommandSettings;

struct IdleDiscovery;

impl DiscoverySubsystem for IdleDiscovery {
    fn start_discovery(&self) -> Result<DiscoveryStream, DiscoveryFailure> {
        Err(DiscoveryFailure::ScannerUnavailable)
    }

    fn stop_discovery(&self) {}
}

fn options() -> RunOptions {
    RunOptions {
        address: "AA:BB:CC:DD:EE:00".to_string(),
        name: Some("Widget".to_string()),
        image: PathBuf::from("/firmware/app.zip"),
    }
}

#[test]
fn describe_snapshot_should_show_status_and_count() {
    let snapshot = LoopSnapshot {
        status: LoopStatus::AwaitingBackoff,
        success_count: 3,
        ..LoopSnapshot::default()
    };

    assert_eq!(
        describe_snapshot(&snapshot),
        "[awaiting_backoff] successes: 3"
    );
}

#[test]
fn describe_entry_should_align_level() {
    let entry = LoopLogEntry {
        timestamp_ms: 1_700_000_000_000,
        level: LoopLogLevel::Info,
        event: "transfer_completed".to_string(),
        message: "Firmware update completed on AA:BB:CC:DD:EE:01".to_string(),
    };

    assert_eq!(
        describe_entry(&entry),
        "1700000000000 info  transfer_completed: Firmware update completed on AA:BB:CC:DD:EE:01"
    );
}

#[tokio::test]
async fn run_loop_should_require_transfer_tool() {
    let error = run_loop(LoopSettings::default(), Arc::new(IdleDiscovery), options())
        .await
        .expect_err("no transfer program configured");

    assert_eq!(error.code, "transfer_command_missing");
}

#[tokio::test]
async fn run_loop_should_reject_blank_target_address_before_starting() {
    let settings = LoopSettings {
        transfer: TransferCommandSettings {
            program: "true".to_string(),
            args: Vec::new(),
        },
        ..LoopSettings::default()
    };
    let mut options = options();
    options.address = "   ".to_string();

    let error = run_loop(settings, Arc::new(IdleDiscovery), options)
        .await
        .expect_err("blank address");

    assert_eq!(error.code, "loop_target_invalid");
}
