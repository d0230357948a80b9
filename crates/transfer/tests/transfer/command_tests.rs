use super::*;
use std::sync::Arc;

use kernel::identity::IdentityMatcher;
use kernel::runtime::TokioTaskSpawner;
use kernel::selector::StableDeviceSelector;
use tokio::sync::mpsc;

use crate::models::{DeviceTarget, FirmwareImage, TransferEvent};
use crate::outcome_sink::TransferEventRelay;

struct ChannelRelay(mpsc::UnboundedSender<TransferEvent>);

impl TransferEventRelay for ChannelRelay {
    fn relay(&self, event: TransferEvent) {
        let _ = self.0.send(event);
    }
}

fn request(address: &str) -> TransferRequest {
    let target = Arc::new(DeviceTarget::new(
        "AA:BB:CC:DD:EE:00",
        Some("Widget".to_string()),
    ));
    TransferRequest {
        address: address.to_string(),
        name_hint: Some("Widget DFU".to_string()),
        image: FirmwareImage::new("/tmp/firmware/app.zip"),
        selector: Arc::new(StableDeviceSelector::new(target, IdentityMatcher::default())),
    }
}

fn shell(script: &str) -> CommandTransferSubsystem {
    CommandTransferSubsystem::new(
        TransferCommandSettings {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        },
        Arc::new(TokioTaskSpawner),
    )
}

fn sink() -> (TransferOutcomeSink, mpsc::UnboundedReceiver<TransferEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        TransferOutcomeSink::new("AA:BB:CC:DD:EE:01", Arc::new(ChannelRelay(sender))),
        receiver,
    )
}

async fn terminal(receiver: &mut mpsc::UnboundedReceiver<TransferEvent>) -> TransferEvent {
    loop {
        let event = receiver.recv().await.expect("relay stays open");
        if event.is_terminal() {
            return event;
        }
    }
}

#[test]
fn render_args_should_substitute_placeholders() {
    let args = vec![
        "dfu".to_string(),
        "--address={address}".to_string(),
        "--name".to_string(),
        "{name}".to_string(),
        "{image}".to_string(),
    ];

    assert_eq!(
        render_args(&args, &request("AA:BB:CC:DD:EE:01")),
        vec![
            "dfu",
            "--address=AA:BB:CC:DD:EE:01",
            "--name",
            "Widget DFU",
            "/tmp/firmware/app.zip",
        ]
    );
}

#[test]
fn trigger_should_require_configured_program() {
    let subsystem =
        CommandTransferSubsystem::new(TransferCommandSettings::default(), Arc::new(TokioTaskSpawner));
    let (sink, _events) = sink();

    let error = subsystem
        .trigger(request("AA:BB:CC:DD:EE:01"), sink)
        .expect_err("no program configured");

    assert_eq!(error.code, "transfer_command_missing");
}

#[tokio::test]
async fn trigger_should_reject_candidate_the_selector_refuses() {
    let mut foreign = request("11:22:33:44:55:66");
    foreign.name_hint = Some("Speaker".to_string());
    let (sink, mut events) = sink();

    shell("exit 0")
        .trigger(foreign, sink)
        .expect("rejection is reported through the sink");

    match terminal(&mut events).await {
        TransferEvent::Error { code, .. } => assert_eq!(code, SELECTOR_REJECTED_CODE),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn successful_tool_should_complete_after_progress() {
    let (sink, mut events) = sink();

    shell("exit 0")
        .trigger(request("AA:BB:CC:DD:EE:01"), sink)
        .expect("trigger should start the tool");

    let mut kinds = Vec::new();
    while let Some(event) = events.recv().await {
        kinds.push(event.kind());
    }
    assert_eq!(kinds, vec!["started", "connecting", "completed"]);
}

#[cfg(unix)]
#[tokio::test]
async fn failing_tool_should_report_exit_code_and_last_stderr_line() {
    let (sink, mut events) = sink();

    shell("echo connecting >&2; echo 'GATT error 133' >&2; exit 3")
        .trigger(request("AA:BB:CC:DD:EE:01"), sink)
        .expect("trigger should start the tool");

    assert_eq!(
        terminal(&mut events).await,
        TransferEvent::Error {
            address: "AA:BB:CC:DD:EE:01".to_string(),
            code: 3,
            message: "GATT error 133".to_string(),
        }
    );
}

#[cfg(unix)]
#[tokio::test]
async fn killed_tool_should_report_aborted() {
    let (sink, mut events) = sink();

    shell("kill -9 $$")
        .trigger(request("AA:BB:CC:DD:EE:01"), sink)
        .expect("trigger should start the tool");

    assert!(matches!(terminal(&mut events).await, TransferEvent::Aborted { .. }));
}

#[tokio::test]
async fn missing_tool_should_report_launch_failure() {
    let subsystem = CommandTransferSubsystem::new(
        TransferCommandSettings {
            program: "/nonexistent/dfu-tool".to_string(),
            args: Vec::new(),
        },
        Arc::new(TokioTaskSpawner),
    );
    let (sink, mut events) = sink();

    subsystem
        .trigger(request("AA:BB:CC:DD:EE:01"), sink)
        .expect("launch failure is reported through the sink");

    match terminal(&mut events).await {
        TransferEvent::Error { code, .. } => assert_eq!(code, LAUNCH_FAILED_CODE),
        other => panic!("unexpected event: {other:?}"),
    }
}
