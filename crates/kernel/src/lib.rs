pub mod identity;
pub mod runtime;
pub mod selector;
pub mod sync;

pub use protocol::models;
pub use protocol::{AppError, AppErrorPayload, AppResult, ErrorContextItem, ResultExt};
