pub mod command;
pub mod outcome_sink;
pub mod subsystem;

pub use command::CommandTransferSubsystem;
pub use outcome_sink::{TransferEventRelay, TransferOutcomeSink};
pub use protocol::models;
pub use protocol::{AppError, AppResult, ResultExt};
pub use subsystem::{TransferRequest, TransferSubsystem};
