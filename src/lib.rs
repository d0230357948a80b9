mod bootstrap;
pub mod cli;
pub mod commands;

use std::process::ExitCode;

use clap::Parser;

use bootstrap::setup::{dispatch, log_error_fallback};
use cli::Cli;

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("dfu-looper")
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            log_error_fallback(&format!("failed to start async runtime: {error}"));
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(dispatch(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            log_error_fallback(&error.to_string());
            ExitCode::FAILURE
        }
    }
}
