#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core control logic for the pipe rig (hardware-agnostic).
//!
//! Two long-running loops share one valve and one probe bus:
//!
//! - **Valve** (`valve`): second-aligned schedule matcher that opens the
//!   solenoid for `Use`/`Flush` events, at most once per event per day.
//! - **Telemetry** (`telemetry`): samples every probe on a fixed 10 s grid and
//!   appends one CSV line per sample (`logger`).
//! - **Bus** (`bus`, `protocol`, `sensor`): serialized command/response
//!   exchanges with command-class-dependent waits.
//! - **Shutdown** (`shutdown`, `supervisor`): a single cancellation token and
//!   a one-shot teardown that always leaves the valve closed.
//!
//! All hardware goes through `rig_traits::{Valve, Bus, Clock}`.

pub mod bus;
pub mod conversions;
pub mod error;
pub mod hw_error;
pub mod logger;
pub mod mocks;
pub mod protocol;
pub mod schedule;
pub mod sensor;
pub mod shutdown;
pub mod supervisor;
pub mod telemetry;
pub mod util;
pub mod valve;

pub use bus::BusLink;
pub use error::{BusError, Report, Result, RigError, ScheduleError, ShutdownFault, ShutdownStage};
pub use logger::{CsvLog, RecordSink};
pub use protocol::{BusTimings, CommandClass, Response, ResponseStatus};
pub use schedule::{EventKind, ScheduleEvent, ScheduleStore};
pub use sensor::SensorClient;
pub use shutdown::{CancelState, CancelToken, ShutdownCause, ShutdownCoordinator, ShutdownReport};
pub use supervisor::{LoopExit, LoopHandle, WatchOutcome, spawn_loop, watch};
pub use telemetry::{SensorReading, TelemetryLogger, TelemetryRecord, TelemetryTimings};
pub use valve::{
    ControllerState, SharedControllerState, SharedValveState, TickOutcome, ValveController,
    ValveHandle, ValveState, ValveTimings,
};
