use std::sync::Arc;
use std::time::Duration;

use discovery::{DiscoveryEvent, DiscoverySubsystem};
use protocol::models::Advertisement;
use protocol::{AppError, AppResult};
use tokio::time::{Instant, timeout_at};

/// Devices seen during a listing, in first-seen order. A device that advertises again is
/// updated in place.
#[derive(Debug, Default, Clone)]
pub struct DeviceListing {
    devices: Vec<Advertisement>,
}

impl DeviceListing {
    pub fn upsert(&mut self, advertisement: Advertisement) -> bool {
        match self
            .devices
            .iter_mut()
            .find(|device| device.address.eq_ignore_ascii_case(&advertisement.address))
        {
            Some(existing) => {
                existing.rssi = advertisement.rssi;
                if advertisement.name.is_some() {
                    existing.name = advertisement.name;
                }
                false
            }
            None => {
                self.devices.push(advertisement);
                true
            }
        }
    }

    pub fn devices(&self) -> &[Advertisement] {
        &self.devices
    }

    pub fn lines(&self) -> Vec<String> {
        self.devices.iter().map(describe_device).collect()
    }
}

pub fn describe_device(device: &Advertisement) -> String {
    format!(
        "{} ({}), RSSI {}",
        device.display_name(),
        device.address,
        device.rssi
    )
}

pub async fn collect_devices(
    discovery: Arc<dyn DiscoverySubsystem>,
    duration: Duration,
) -> AppResult<DeviceListing> {
    let mut stream = discovery
        .start_discovery()
        .map_err(|failure| discovery_error(&failure))?;
    let deadline = Instant::now() + duration;
    let mut listing = DeviceListing::default();

    let result = loop {
        match timeout_at(deadline, stream.recv()).await {
            Err(_) | Ok(None) => break Ok(()),
            Ok(Some(DiscoveryEvent::Advertisement(advertisement))) => {
                if listing.upsert(advertisement) {
                    tracing::debug!(event = "scan_device_listed", count = listing.devices().len());
                }
            }
            Ok(Some(DiscoveryEvent::Failed(failure))) => break Err(discovery_error(&failure)),
        }
    };

    discovery.stop_discovery();
    result.map(|()| listing)
}

fn discovery_error(failure: &protocol::models::DiscoveryFailure) -> AppError {
    AppError::new(failure.code(), failure.to_string())
}

pub async fn scan(discovery: Arc<dyn DiscoverySubsystem>, duration: Duration) -> AppResult<()> {
    println!("Scanning for {}s...", duration.as_secs());
    let listing = collect_devices(discovery, duration).await?;
    if listing.devices().is_empty() {
        println!("No devices found");
        return Ok(());
    }
    for line in listing.lines() {
        println!("{line}");
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/commands/scan_tests.rs"]
mod tests;
