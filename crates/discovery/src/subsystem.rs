use tokio::sync::mpsc;

use crate::models::{Advertisement, DiscoveryFailure};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Advertisement(Advertisement),
    Failed(DiscoveryFailure),
}

pub type DiscoveryStream = mpsc::UnboundedReceiver<DiscoveryEvent>;

/// Radio-side scanner. A started discovery keeps delivering advertisements until
/// `stop_discovery` is called or a `Failed` event ends it.
pub trait DiscoverySubsystem: Send + Sync {
    fn start_discovery(&self) -> Result<DiscoveryStream, DiscoveryFailure>;
    fn stop_discovery(&self);
}
