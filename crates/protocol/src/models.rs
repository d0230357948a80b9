use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const UNKNOWN_DEVICE_NAME: &str = "Unknown";
const FALLBACK_IMAGE_NAME: &str = "selected.zip";

/// Device identity the loop pursues on every iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTarget {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl DeviceTarget {
    pub fn new(address: impl Into<String>, name: Option<String>) -> Self {
        Self {
            address: address.into().trim().to_string(),
            name: name
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_DEVICE_NAME)
    }
}

impl Display for DeviceTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.address)
    }
}

/// One observation reported by the discovery subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Advertisement {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub rssi: i16,
}

impl Advertisement {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_DEVICE_NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareImage {
    pub path: PathBuf,
}

impl FirmwareImage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|value| value.to_string_lossy().into_owned())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| FALLBACK_IMAGE_NAME.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    Idle,
    Scanning,
    AwaitingBackoff,
    Transferring,
    Stopped,
}

impl LoopStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::AwaitingBackoff => "awaiting_backoff",
            Self::Transferring => "transferring",
            Self::Stopped => "stopped",
        }
    }
}

impl Display for LoopStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DiscoveryFailure {
    AdapterUnavailable,
    BluetoothDisabled,
    ScannerUnavailable,
    ScanFailed { code: i32 },
}

impl DiscoveryFailure {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AdapterUnavailable => "discovery_adapter_unavailable",
            Self::BluetoothDisabled => "discovery_bluetooth_disabled",
            Self::ScannerUnavailable => "discovery_scanner_unavailable",
            Self::ScanFailed { .. } => "discovery_scan_failed",
        }
    }

    /// Failures that only clear once the operator fixes the radio.
    pub fn requires_operator(&self) -> bool {
        !matches!(self, Self::ScanFailed { .. })
    }
}

impl Display for DiscoveryFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AdapterUnavailable => f.write_str("Bluetooth adapter unavailable"),
            Self::BluetoothDisabled => f.write_str("Enable Bluetooth to continue"),
            Self::ScannerUnavailable => f.write_str("BLE scanner unavailable"),
            Self::ScanFailed { code } => write!(f, "Scan failed with code {code}"),
        }
    }
}

/// Notifications a firmware transfer produces. Exactly one of `Completed`, `Aborted` or
/// `Error` ends every triggered transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TransferEvent {
    Started { address: String },
    Connecting { address: String },
    Completed { address: String },
    Aborted { address: String },
    Error {
        address: String,
        code: i32,
        message: String,
    },
}

impl TransferEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Aborted { .. } | Self::Error { .. }
        )
    }

    pub fn address(&self) -> &str {
        match self {
            Self::Started { address }
            | Self::Connecting { address }
            | Self::Completed { address }
            | Self::Aborted { address }
            | Self::Error { address, .. } => address,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Connecting { .. } => "connecting",
            Self::Completed { .. } => "completed",
            Self::Aborted { .. } => "aborted",
            Self::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopSnapshot {
    pub status: LoopStatus,
    pub is_running: bool,
    pub transfer_in_progress: bool,
    pub success_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<DeviceTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<FirmwareImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl Default for LoopSnapshot {
    fn default() -> Self {
        Self {
            status: LoopStatus::Idle,
            is_running: false,
            transfer_in_progress: false,
            success_count: 0,
            target: None,
            image: None,
            run_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopLogLevel {
    Info,
    Warn,
    Error,
}

impl LoopLogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopLogEntry {
    pub timestamp_ms: i64,
    pub level: LoopLogLevel,
    pub event: String,
    pub message: String,
}
