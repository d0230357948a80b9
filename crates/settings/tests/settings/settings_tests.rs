use super::*;

fn unique_temp_file(label: &str) -> std::path::PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|value| value.as_nanos())
        .unwrap_or_default();
    std::env::temp_dir().join(format!("dfu-looper-settings-{label}-{nanos}.json"))
}

#[test]
fn defaults_should_match_loop_timings() {
    let settings = LoopSettings::default();

    assert_eq!(settings.discovery_timeout(), Duration::from_secs(10));
    assert_eq!(settings.timeout_backoff_ms, 3_000);
    assert_eq!(settings.scan_failure_backoff_ms, 4_000);
    assert_eq!(settings.adapter_unavailable_backoff_ms, 5_000);
    assert_eq!(settings.completed_backoff_ms, 2_000);
    assert_eq!(settings.aborted_backoff_ms, 2_000);
    assert_eq!(settings.error_backoff_ms, 4_000);
    assert_eq!(settings.mode_marker, "DFU");
    assert!(!settings.transfer.is_configured());
}

#[test]
fn parse_settings_should_fill_missing_keys_with_defaults() {
    let settings = parse_settings(
        r#"{
            "modeMarker": "JRAK",
            "transfer": { "program": " nrfutil ", "args": ["{image}", "{address}"] }
        }"#,
    )
    .expect("valid settings");

    assert_eq!(settings.mode_marker, "JRAK");
    assert_eq!(settings.discovery_timeout_ms, DEFAULT_DISCOVERY_TIMEOUT_MS);
    assert_eq!(settings.transfer.program, "nrfutil");
    assert_eq!(settings.transfer.args, vec!["{image}", "{address}"]);
    assert!(settings.transfer.is_configured());
}

#[test]
fn normalized_should_clamp_out_of_range_values() {
    let settings = LoopSettings {
        discovery_timeout_ms: 5,
        error_backoff_ms: u64::MAX,
        mode_marker: "   ".to_string(),
        log_capacity: 1,
        log_keep_days: 0,
        ..LoopSettings::default()
    }
    .normalized();

    assert_eq!(settings.discovery_timeout_ms, MIN_DISCOVERY_TIMEOUT_MS);
    assert_eq!(settings.error_backoff_ms, MAX_BACKOFF_MS);
    assert_eq!(settings.mode_marker, DEFAULT_MODE_MARKER);
    assert_eq!(settings.log_capacity, MIN_LOG_CAPACITY);
    assert_eq!(settings.log_keep_days, 1);
}

#[test]
fn parse_settings_should_reject_invalid_json() {
    let error = parse_settings("{ not json").expect_err("invalid payload");
    assert_eq!(error.code, "settings_parse_failed");
}

#[test]
fn load_settings_should_return_defaults_without_path() {
    let settings = load_settings(None).expect("defaults");
    assert_eq!(settings, LoopSettings::default());
}

#[test]
fn load_settings_should_read_file() {
    let path = unique_temp_file("read");
    fs::write(&path, r#"{ "completedBackoffMs": 7000 }"#).expect("write settings file");

    let settings = load_settings(Some(&path)).expect("settings from file");
    assert_eq!(settings.completed_backoff_ms, 7_000);

    let _ = fs::remove_file(path);
}

#[test]
fn load_settings_should_report_missing_file() {
    let path = unique_temp_file("missing");
    let error = load_settings(Some(&path)).expect_err("file does not exist");

    assert_eq!(error.code, "settings_read_failed");
    assert_eq!(
        error.context_value("path"),
        Some(path.display().to_string().as_str())
    );
}
