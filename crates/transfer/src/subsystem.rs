use std::sync::Arc;

use kernel::selector::DeviceSelector;

use crate::AppResult;
use crate::models::FirmwareImage;
use crate::outcome_sink::TransferOutcomeSink;

/// One firmware push toward the device that was just observed. `address` and `name_hint`
/// come from the advertisement, which may carry the bootloader address.
#[derive(Clone)]
pub struct TransferRequest {
    pub address: String,
    pub name_hint: Option<String>,
    pub image: FirmwareImage,
    pub selector: Arc<dyn DeviceSelector>,
}

impl std::fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferRequest")
            .field("address", &self.address)
            .field("name_hint", &self.name_hint)
            .field("image", &self.image)
            .finish_non_exhaustive()
    }
}

pub trait TransferSubsystem: Send + Sync {
    /// Starts the transfer and returns without waiting for it. Progress and the terminal
    /// event go through `sink`; an `Err` means nothing was started.
    fn trigger(&self, request: TransferRequest, sink: TransferOutcomeSink) -> AppResult<()>;
}
