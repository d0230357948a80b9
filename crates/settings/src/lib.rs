pub mod settings;

pub use settings::*;

pub use protocol::{AppError, AppResult, ResultExt};
