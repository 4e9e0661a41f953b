use thiserror::Error;

/// Failure talking to a device on the shared bus. Never fatal to a loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("bus i/o error at 0x{address:02X}: {message}")]
    Io { address: u16, message: String },
    #[error("malformed response from 0x{address:02X}: {reason}")]
    MalformedResponse { address: u16, reason: String },
}

impl BusError {
    pub fn address(&self) -> u16 {
        match self {
            Self::Io { address, .. } | Self::MalformedResponse { address, .. } => *address,
        }
    }
}

/// Schedule rejected before the loops start.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("event {index}: index must be greater than previous index {previous}")]
    NotIncreasing { index: u64, previous: u64 },
    #[error("event {index}: invalid time of day {hour:02}:{minute:02}")]
    InvalidTime { index: u64, hour: u8, minute: u8 },
    #[error("event {index}: index exceeds {max}", max = i64::MAX)]
    IndexTooLarge { index: u64 },
}

/// Ordered steps of the shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStage {
    StopLoops,
    CloseValve,
    ReleaseBus,
    CloseLog,
}

impl std::fmt::Display for ShutdownStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StopLoops => "stop loops",
            Self::CloseValve => "close valve",
            Self::ReleaseBus => "release bus",
            Self::CloseLog => "close log",
        };
        f.write_str(s)
    }
}

/// A shutdown step failed; the remaining steps still run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("shutdown step '{stage}' failed: {message}")]
pub struct ShutdownFault {
    pub stage: ShutdownStage,
    pub message: String,
}

#[derive(Debug, Error, Clone)]
pub enum RigError {
    #[error("valve actuator fault: {0}")]
    Actuator(String),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("telemetry log error: {0}")]
    Log(String),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
