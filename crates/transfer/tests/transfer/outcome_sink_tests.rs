use super::*;
use std::sync::Mutex;

#[derive(Default)]
struct RecordingRelay {
    events: Mutex<Vec<TransferEvent>>,
}

impl RecordingRelay {
    fn kinds(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .expect("events lock")
            .iter()
            .map(TransferEvent::kind)
            .collect()
    }
}

impl TransferEventRelay for RecordingRelay {
    fn relay(&self, event: TransferEvent) {
        self.events.lock().expect("events lock").push(event);
    }
}

fn sink_with_relay() -> (TransferOutcomeSink, Arc<RecordingRelay>) {
    let relay = Arc::new(RecordingRelay::default());
    (
        TransferOutcomeSink::new("AA:BB:CC:DD:EE:01", relay.clone()),
        relay,
    )
}

#[test]
fn sink_should_forward_progress_then_single_terminal() {
    let (sink, relay) = sink_with_relay();

    assert!(sink.started());
    assert!(sink.connecting());
    assert!(sink.completed());
    assert!(sink.is_finished());

    assert_eq!(relay.kinds(), vec!["started", "connecting", "completed"]);
}

#[test]
fn sink_should_drop_duplicate_terminal_across_clones() {
    let (sink, relay) = sink_with_relay();
    let clone = sink.clone();

    assert!(clone.error(133, "GATT error"));
    assert!(!sink.completed());
    assert!(!sink.aborted());
    assert!(!sink.connecting());

    let events = relay.events.lock().expect("events lock");
    assert_eq!(
        events.as_slice(),
        [TransferEvent::Error {
            address: "AA:BB:CC:DD:EE:01".to_string(),
            code: 133,
            message: "GATT error".to_string(),
        }]
    );
}

#[test]
fn sink_should_synthesize_error_when_released_without_terminal() {
    let (sink, relay) = sink_with_relay();
    let clone = sink.clone();
    sink.started();

    drop(sink);
    assert_eq!(relay.kinds(), vec!["started"]);

    drop(clone);
    let events = relay.events.lock().expect("events lock");
    assert_eq!(
        events.last(),
        Some(&TransferEvent::Error {
            address: "AA:BB:CC:DD:EE:01".to_string(),
            code: MISSING_TERMINAL_CODE,
            message: "transfer ended without a terminal event".to_string(),
        })
    );
}

#[test]
fn sink_should_stay_quiet_on_release_after_terminal() {
    let (sink, relay) = sink_with_relay();
    sink.aborted();
    drop(sink);

    assert_eq!(relay.kinds(), vec!["aborted"]);
}
