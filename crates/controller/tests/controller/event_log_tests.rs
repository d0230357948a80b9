use super::*;

#[test]
fn event_log_should_keep_chronological_order() {
    let mut log = EventLog::new(8);
    log.push(LoopLogLevel::Info, "loop_started", "Loop started");
    log.push(LoopLogLevel::Warn, "loop_discovery_failed", "Enable Bluetooth to continue");

    let entries = log.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].event, "loop_started");
    assert_eq!(entries[1].level, LoopLogLevel::Warn);
    assert!(entries[0].timestamp_ms <= entries[1].timestamp_ms);
}

#[test]
fn event_log_should_evict_oldest_entries_at_capacity() {
    let mut log = EventLog::new(3);
    for index in 0..5 {
        log.push(LoopLogLevel::Info, "transfer_completed", format!("update {index}"));
    }

    let messages: Vec<String> = log.entries().into_iter().map(|entry| entry.message).collect();
    assert_eq!(messages, vec!["update 2", "update 3", "update 4"]);
    assert_eq!(log.len(), 3);
}

#[test]
fn now_millis_should_be_after_epoch() {
    assert!(now_millis() > 0);
    assert!(EventLog::new(0).is_empty());
}
