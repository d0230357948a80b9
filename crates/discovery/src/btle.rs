//! btleplug-backed discovery on the first local adapter.

use std::sync::{Arc, Mutex};

use btleplug::api::{Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::StreamExt;
use kernel::sync::lock_mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::{Advertisement, DiscoveryFailure};
use crate::subsystem::{DiscoveryEvent, DiscoveryStream, DiscoverySubsystem};

const EVENT_STREAM_SCAN_CODE: i32 = 1;
const START_SCAN_CODE: i32 = 2;

#[derive(Default)]
struct ScanState {
    task: Option<JoinHandle<()>>,
    adapter: Option<Adapter>,
    /// `stop_scan` of the previous discovery; the next scan waits for it.
    stopping: Option<JoinHandle<()>>,
}

#[derive(Default, Clone)]
pub struct BtleDiscovery {
    state: Arc<Mutex<ScanState>>,
}

impl BtleDiscovery {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiscoverySubsystem for BtleDiscovery {
    fn start_discovery(&self) -> Result<DiscoveryStream, DiscoveryFailure> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(DiscoveryFailure::ScannerUnavailable);
        }

        self.stop_discovery();
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = self.state.clone();
        let previous_stop = lock_mutex(self.state.as_ref(), "ble_scan_state").stopping.take();
        let task = tokio::spawn(async move {
            if let Some(previous_stop) = previous_stop {
                let _ = previous_stop.await;
            }
            if let Err(failure) = run_scan(state, &sender).await {
                tracing::warn!(
                    event = "ble_scan_failed",
                    failure_code = failure.code(),
                    detail = %failure
                );
                let _ = sender.send(DiscoveryEvent::Failed(failure));
            }
        });
        lock_mutex(self.state.as_ref(), "ble_scan_state").task = Some(task);
        Ok(receiver)
    }

    fn stop_discovery(&self) {
        let mut state = lock_mutex(self.state.as_ref(), "ble_scan_state");
        if let Some(task) = state.task.take() {
            task.abort();
        }
        if let Some(adapter) = state.adapter.take()
            && tokio::runtime::Handle::try_current().is_ok()
        {
            let previous_stop = state.stopping.take();
            state.stopping = Some(tokio::spawn(async move {
                if let Some(previous_stop) = previous_stop {
                    let _ = previous_stop.await;
                }
                if let Err(error) = adapter.stop_scan().await {
                    tracing::debug!(event = "ble_scan_stop_failed", error = error.to_string());
                }
            }));
        }
    }
}

async fn run_scan(
    state: Arc<Mutex<ScanState>>,
    sender: &mpsc::UnboundedSender<DiscoveryEvent>,
) -> Result<(), DiscoveryFailure> {
    let manager = Manager::new()
        .await
        .map_err(|_| DiscoveryFailure::AdapterUnavailable)?;
    let adapter = manager
        .adapters()
        .await
        .map_err(|_| DiscoveryFailure::AdapterUnavailable)?
        .into_iter()
        .next()
        .ok_or(DiscoveryFailure::AdapterUnavailable)?;

    match adapter.adapter_state().await {
        Ok(CentralState::PoweredOn) => {}
        Ok(_) => return Err(DiscoveryFailure::BluetoothDisabled),
        Err(_) => return Err(DiscoveryFailure::ScannerUnavailable),
    }

    let mut events = adapter.events().await.map_err(|_| DiscoveryFailure::ScanFailed {
        code: EVENT_STREAM_SCAN_CODE,
    })?;
    lock_mutex(state.as_ref(), "ble_scan_state").adapter = Some(adapter.clone());
    adapter
        .start_scan(ScanFilter::default())
        .await
        .map_err(|_| DiscoveryFailure::ScanFailed {
            code: START_SCAN_CODE,
        })?;
    tracing::debug!(event = "ble_scan_started");

    while let Some(event) = events.next().await {
        let id = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
            CentralEvent::StateUpdate(CentralState::PoweredOff) => {
                return Err(DiscoveryFailure::BluetoothDisabled);
            }
            _ => continue,
        };
        if let Some(advertisement) = read_advertisement(&adapter, &id).await
            && sender.send(DiscoveryEvent::Advertisement(advertisement)).is_err()
        {
            break;
        }
    }
    Ok(())
}

async fn read_advertisement(adapter: &Adapter, id: &PeripheralId) -> Option<Advertisement> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok().flatten()?;
    Some(Advertisement {
        address: properties.address.to_string(),
        name: properties.local_name,
        rssi: properties.rssi.unwrap_or_default(),
    })
}
