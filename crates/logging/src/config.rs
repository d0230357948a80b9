pub const LOG_LEVEL_ENV: &str = "DFU_LOOPER_LOG_LEVEL";

pub fn normalize_level(value: &str) -> Option<&'static str> {
    match value.trim().to_ascii_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" => Some("error"),
        _ => None,
    }
}

pub(super) fn resolve_log_level() -> String {
    let env_level = std::env::var(LOG_LEVEL_ENV).ok();
    select_log_level(env_level.as_deref(), cfg!(debug_assertions)).to_string()
}

pub(super) fn select_log_level(env_level: Option<&str>, debug_build: bool) -> &'static str {
    if let Some(level) = env_level.and_then(normalize_level) {
        return level;
    }

    if debug_build { "debug" } else { "info" }
}

#[cfg(test)]
#[path = "../tests/logging/config_tests.rs"]
mod tests;
