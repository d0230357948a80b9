use super::*;
use std::collections::VecDeque;
use std::sync::OnceLock;
use std::sync::atomic::AtomicUsize;

use kernel::runtime::{NoopTaskSpawner, TokioTaskSpawner};
use tokio::sync::{mpsc, oneshot};

use crate::models::Advertisement;

enum Script {
    Silent,
    Events(Vec<DiscoveryEvent>),
    Refuse(DiscoveryFailure),
}

#[derive(Default)]
struct ScriptedDiscovery {
    scripts: Mutex<VecDeque<Script>>,
    senders: Mutex<Vec<mpsc::UnboundedSender<DiscoveryEvent>>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    slot: OnceLock<Arc<Mutex<Option<ActiveSession>>>>,
    unlocked_stops: AtomicUsize,
}

impl ScriptedDiscovery {
    fn with(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        })
    }

    fn watch(&self, sessions: &ScanSessionManager) {
        let _ = self.slot.set(sessions.active.clone());
    }

    fn push_to_latest(&self, event: DiscoveryEvent) {
        let senders = self.senders.lock().expect("senders lock");
        let sender = senders.last().expect("a discovery was started");
        sender.send(event).expect("stream open");
    }
}

impl DiscoverySubsystem for ScriptedDiscovery {
    fn start_discovery(&self) -> Result<DiscoveryStream, DiscoveryFailure> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .unwrap_or(Script::Silent);
        let (sender, receiver) = mpsc::unbounded_channel();
        match script {
            Script::Silent => {}
            Script::Events(events) => {
                for event in events {
                    sender.send(event).expect("stream open");
                }
            }
            Script::Refuse(failure) => return Err(failure),
        }
        self.senders.lock().expect("senders lock").push(sender);
        Ok(receiver)
    }

    fn stop_discovery(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(slot) = self.slot.get()
            && slot.try_lock().is_ok()
        {
            self.unlocked_stops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn advertisement(address: &str, name: Option<&str>) -> DiscoveryEvent {
    DiscoveryEvent::Advertisement(Advertisement {
        address: address.to_string(),
        name: name.map(str::to_string),
        rssi: -60,
    })
}

fn widget() -> Arc<DeviceTarget> {
    Arc::new(DeviceTarget::new(
        "AA:BB:CC:DD:EE:00",
        Some("Widget".to_string()),
    ))
}

fn manager(discovery: Arc<ScriptedDiscovery>) -> ScanSessionManager {
    ScanSessionManager::new(
        discovery,
        Arc::new(TokioTaskSpawner),
        IdentityMatcher::default(),
        Duration::from_secs(10),
    )
}

fn outcome_channel() -> (
    impl FnOnce(SessionOutcome) + Send + 'static,
    oneshot::Receiver<SessionOutcome>,
) {
    let (sender, receiver) = oneshot::channel();
    (
        move |outcome| {
            let _ = sender.send(outcome);
        },
        receiver,
    )
}

#[tokio::test(start_paused = true)]
async fn session_should_report_first_matching_advertisement() {
    let discovery = ScriptedDiscovery::with(vec![Script::Events(vec![
        advertisement("11:22:33:44:55:66", Some("Speaker")),
        advertisement("aa:bb:cc:dd:ee:01", None),
        advertisement("AA:BB:CC:DD:EE:00", Some("Widget")),
    ])]);
    let sessions = manager(discovery.clone());
    let (callback, outcome) = outcome_channel();

    let start = sessions
        .start_session(widget(), callback)
        .expect("session should start");

    assert_eq!(start, SessionStart::Started(1));
    assert_eq!(
        outcome.await.expect("outcome delivered"),
        SessionOutcome::Matched {
            address: "aa:bb:cc:dd:ee:01".to_string(),
            name: None,
        }
    );
    assert!(!sessions.is_active());
    assert_eq!(discovery.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn session_should_time_out_after_discovery_window() {
    let discovery = ScriptedDiscovery::with(vec![Script::Events(vec![advertisement(
        "11:22:33:44:55:66",
        Some("Speaker"),
    )])]);
    let sessions = manager(discovery.clone());
    let (callback, outcome) = outcome_channel();
    let started_at = Instant::now();

    sessions
        .start_session(widget(), callback)
        .expect("session should start");

    assert_eq!(
        outcome.await.expect("outcome delivered"),
        SessionOutcome::TimedOut
    );
    let waited = started_at.elapsed();
    assert!(waited >= Duration::from_secs(10) && waited < Duration::from_secs(11));
    assert!(!sessions.is_active());
}

#[tokio::test(start_paused = true)]
async fn session_should_report_stream_failure() {
    let discovery = ScriptedDiscovery::with(vec![Script::Silent]);
    let sessions = manager(discovery.clone());
    let (callback, outcome) = outcome_channel();

    sessions
        .start_session(widget(), callback)
        .expect("session should start");
    discovery.push_to_latest(DiscoveryEvent::Failed(DiscoveryFailure::ScanFailed {
        code: 2,
    }));

    assert_eq!(
        outcome.await.expect("outcome delivered"),
        SessionOutcome::Failed(DiscoveryFailure::ScanFailed { code: 2 })
    );
}

#[tokio::test(start_paused = true)]
async fn session_should_report_refused_start_synchronously() {
    let discovery = ScriptedDiscovery::with(vec![Script::Refuse(
        DiscoveryFailure::BluetoothDisabled,
    )]);
    let sessions = manager(discovery.clone());
    let (callback, mut outcome) = outcome_channel();

    let start = sessions
        .start_session(widget(), callback)
        .expect("refusal is an outcome, not an error");

    assert_eq!(start, SessionStart::Refused);
    assert_eq!(
        outcome.try_recv().expect("outcome already delivered"),
        SessionOutcome::Failed(DiscoveryFailure::BluetoothDisabled)
    );
    assert!(!sessions.is_active());
}

#[tokio::test(start_paused = true)]
async fn start_session_should_be_idempotent_while_active() {
    let discovery = ScriptedDiscovery::with(vec![Script::Silent]);
    let sessions = manager(discovery.clone());
    let (first, _first_outcome) = outcome_channel();
    let (second, mut second_outcome) = outcome_channel();

    let first_start = sessions
        .start_session(widget(), first)
        .expect("first session should start");
    let second_start = sessions
        .start_session(widget(), second)
        .expect("second call should not fail");

    assert_eq!(first_start, SessionStart::Started(1));
    assert_eq!(second_start, SessionStart::AlreadyActive(1));
    assert_eq!(discovery.starts.load(Ordering::SeqCst), 1);
    assert!(second_outcome.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn stopped_session_should_never_report() {
    let discovery = ScriptedDiscovery::with(vec![Script::Silent]);
    let sessions = manager(discovery.clone());
    let (callback, outcome) = outcome_channel();

    sessions
        .start_session(widget(), callback)
        .expect("session should start");
    assert!(sessions.stop_session());
    assert!(!sessions.stop_session());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(outcome.await.is_err(), "callback must be dropped unfired");
    assert_eq!(discovery.stops.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_session_should_be_safe_without_a_session() {
    let sessions = ScanSessionManager::new(
        ScriptedDiscovery::with(Vec::new()),
        Arc::new(NoopTaskSpawner),
        IdentityMatcher::default(),
        Duration::from_secs(10),
    );

    assert!(!sessions.stop_session());
}

#[test]
fn start_session_should_surface_spawn_failure() {
    let discovery = ScriptedDiscovery::with(vec![Script::Silent]);
    let sessions = ScanSessionManager::new(
        discovery.clone(),
        Arc::new(NoopTaskSpawner),
        IdentityMatcher::default(),
        Duration::from_secs(10),
    );

    let error = sessions
        .start_session(widget(), |_| {})
        .expect_err("noop spawner cannot run the session");

    assert_eq!(error.code, "task_runtime_unavailable");
    assert!(!sessions.is_active());
    assert_eq!(discovery.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn ending_session_should_stop_discovery_before_freeing_its_slot() {
    let discovery = ScriptedDiscovery::with(vec![
        Script::Events(vec![advertisement("AA:BB:CC:DD:EE:00", Some("Widget"))]),
        Script::Silent,
        Script::Silent,
    ]);
    let sessions = Arc::new(manager(discovery.clone()));
    discovery.watch(&sessions);

    let (restarted_tx, restarted_rx) = oneshot::channel();
    let restarter = sessions.clone();
    sessions
        .start_session(widget(), move |_| {
            let (callback, _) = outcome_channel();
            let _ = restarted_tx.send(restarter.start_session(widget(), callback));
        })
        .expect("first session should start");

    let restarted = restarted_rx
        .await
        .expect("matched outcome delivered")
        .expect("second session should start");
    assert_eq!(restarted, SessionStart::Started(2));
    assert!(sessions.is_active());
    assert_eq!(discovery.stops.load(Ordering::SeqCst), 1);

    assert!(sessions.stop_session());
    assert_eq!(discovery.stops.load(Ordering::SeqCst), 2);
    assert_eq!(discovery.unlocked_stops.load(Ordering::SeqCst), 0);
}
