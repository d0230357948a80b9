use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "dfu-looper")]
#[command(about = "Repeats BLE firmware updates against a single device", long_about = None)]
pub struct Cli {
    /// Settings file (JSON); defaults apply when omitted
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory for daily rolling log files
    #[arg(long, global = true, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List nearby devices to pick a target from
    Scan {
        /// How long to listen for advertisements
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Run the update loop until Ctrl-C
    Run {
        /// Target device address, e.g. AA:BB:CC:DD:EE:00
        #[arg(long)]
        address: String,

        /// Advertised name of the target, used when its address changes
        #[arg(long)]
        name: Option<String>,

        /// Firmware package pushed on every iteration
        #[arg(long, value_name = "FILE")]
        image: PathBuf,
    },
}
