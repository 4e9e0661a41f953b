//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(
    name = "rig",
    version,
    about = "Scheduled valve actuation with shared-bus probe telemetry"
)]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/rig_config.toml")]
    pub config: PathBuf,

    /// Schedule CSV (Time_HMS,Type,Event_Index); overrides [schedule].path
    #[arg(long, value_name = "FILE")]
    pub schedule: Option<PathBuf>,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the experiment: valve schedule + telemetry until Ctrl-C
    Run {
        /// Stop normally after this many seconds
        #[arg(long, value_name = "SECS")]
        max_runtime_s: Option<u64>,
    },
    /// Identify every configured sensor
    Identify,
    /// Sweep the bus and list responding addresses
    ListAddr,
    /// Send one command to one device and print the response
    Query {
        /// Device address, hex (e.g. 0x63 or 63)
        #[arg(long, value_name = "HEX", value_parser = parse_address)]
        address: u16,
        /// Command text, e.g. R, I, Cal,mid,7.00, Sleep
        command: String,
    },
    /// Validate config and schedule, then probe every sensor
    SelfCheck,
}

/// Parse a 7-bit bus address written in hex, with or without `0x`.
pub fn parse_address(s: &str) -> Result<u16, String> {
    let t = s.trim();
    let digits = t
        .strip_prefix("0x")
        .or_else(|| t.strip_prefix("0X"))
        .unwrap_or(t);
    let v = u16::from_str_radix(digits, 16).map_err(|e| format!("invalid hex address {s:?}: {e}"))?;
    if v > rig_config::MAX_ADDRESS {
        return Err(format!("address 0x{v:02X} is outside 0x00..=0x7F"));
    }
    Ok(v)
}
