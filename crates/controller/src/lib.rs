pub mod backoff;
pub mod controller;
pub mod event_log;
pub mod machine;

pub use backoff::{BackoffPolicy, BackoffReason, BackoffTimer};
pub use controller::{LoopController, LoopDependencies};
pub use event_log::EventLog;
pub use machine::{AttemptToken, LoopEffect, LoopMachine, Pending};
pub use protocol::models;
pub use protocol::{AppError, AppResult, ResultExt};
