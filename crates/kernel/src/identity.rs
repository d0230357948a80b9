//! Device identity matching.
//!
//! A device that reboots into its bootloader usually advertises under its application
//! address plus one, and often under a name carrying a mode marker such as `Widget DFU`.
//! [`IdentityMatcher`] keeps the selected unit trackable across that switch.

use crate::models::DeviceTarget;

pub const DEFAULT_MODE_MARKER: &str = "DFU";

const ADDRESS_HEX_DIGITS: usize = 12;
const ADDRESS_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// Parses a colon-separated 48-bit address. Returns `None` unless exactly twelve hex digits
/// remain once the colons are stripped.
pub fn parse_address(address: &str) -> Option<u64> {
    let normalized: String = address.trim().chars().filter(|ch| *ch != ':').collect();
    if normalized.len() != ADDRESS_HEX_DIGITS
        || !normalized.chars().all(|ch| ch.is_ascii_hexdigit())
    {
        return None;
    }
    u64::from_str_radix(&normalized, 16).ok()
}

pub fn format_address(value: u64) -> String {
    let bytes = (value & ADDRESS_MASK).to_be_bytes();
    bytes[2..]
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Address the device takes in its secondary mode, wrapping at `FF:FF:FF:FF:FF:FF`.
pub fn increment_address(address: &str) -> Option<String> {
    parse_address(address).map(|value| format_address(value.wrapping_add(1)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityMatcher {
    mode_marker: String,
}

impl Default for IdentityMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MODE_MARKER)
    }
}

impl IdentityMatcher {
    /// A blank marker disables the name-substring rule entirely.
    pub fn new(mode_marker: impl Into<String>) -> Self {
        Self {
            mode_marker: mode_marker.into().trim().to_lowercase(),
        }
    }

    pub fn mode_marker(&self) -> &str {
        &self.mode_marker
    }

    pub fn matches(
        &self,
        target: &DeviceTarget,
        observed_address: &str,
        observed_name: Option<&str>,
    ) -> bool {
        let observed_address = observed_address.trim();
        if observed_address.eq_ignore_ascii_case(&target.address) {
            return true;
        }
        if let Some(incremented) = increment_address(&target.address)
            && observed_address.eq_ignore_ascii_case(&incremented)
        {
            return true;
        }
        self.matches_name(target.name.as_deref(), observed_name)
    }

    pub fn matches_name(&self, target_name: Option<&str>, observed_name: Option<&str>) -> bool {
        let (Some(target_name), Some(observed_name)) =
            (non_blank(target_name), non_blank(observed_name))
        else {
            return false;
        };

        let target_name = target_name.to_lowercase();
        let observed_name = observed_name.to_lowercase();
        if observed_name == target_name {
            return true;
        }

        !self.mode_marker.is_empty()
            && observed_name.contains(&target_name)
            && observed_name.contains(&self.mode_marker)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
#[path = "../tests/identity/identity_tests.rs"]
mod tests;
