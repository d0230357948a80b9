use std::sync::Arc;

use crate::identity::IdentityMatcher;
use crate::models::DeviceTarget;

/// Lets a transfer subsystem re-validate a connection candidate on its own, for example
/// when the device reappears in bootloader mode halfway through an update.
pub trait DeviceSelector: Send + Sync {
    fn matches(
        &self,
        candidate_address: &str,
        candidate_name: Option<&str>,
        incremented_address: &str,
    ) -> bool;
}

#[derive(Debug, Clone)]
pub struct StableDeviceSelector {
    target: Arc<DeviceTarget>,
    matcher: IdentityMatcher,
}

impl StableDeviceSelector {
    pub fn new(target: Arc<DeviceTarget>, matcher: IdentityMatcher) -> Self {
        Self { target, matcher }
    }
}

impl DeviceSelector for StableDeviceSelector {
    fn matches(
        &self,
        candidate_address: &str,
        candidate_name: Option<&str>,
        incremented_address: &str,
    ) -> bool {
        let candidate = candidate_address.trim();
        if !incremented_address.trim().is_empty()
            && candidate.eq_ignore_ascii_case(incremented_address.trim())
        {
            return true;
        }
        self.matcher.matches(&self.target, candidate, candidate_name)
    }
}

#[cfg(test)]
#[path = "../tests/identity/selector_tests.rs"]
mod tests;
