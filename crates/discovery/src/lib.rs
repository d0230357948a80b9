#[cfg(feature = "ble")]
pub mod btle;
pub mod session;
pub mod subsystem;

pub use protocol::models;
pub use protocol::{AppError, AppResult, ResultExt};
pub use session::{ScanSessionManager, SessionOutcome, SessionStart};
pub use subsystem::{DiscoveryEvent, DiscoveryStream, DiscoverySubsystem};
