//! Phase-locked telemetry sampling loop.
//!
//! The first sample waits for the configured offset past a period boundary
//! (see [`initial_delay`]); afterwards each deadline is the previous deadline
//! plus one period, so sampling time never accumulates as drift.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::NaiveDateTime;
use rig_traits::{Bus, Clock};

use crate::error::{Result, RigError};
use crate::logger::RecordSink;
use crate::protocol::Response;
use crate::sensor::SensorClient;
use crate::shutdown::CancelToken;
use crate::util::{format_timestamp, initial_delay, sleep_for, sleep_until, to_delta};
use crate::valve::{SharedValveState, ValveState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorReading {
    pub label: String,
    /// Decoded payload, or the error marker.
    pub raw_response: String,
}

/// One log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub timestamp: NaiveDateTime,
    /// In configured sensor order.
    pub readings: Vec<SensorReading>,
    pub valve_state: ValveState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryTimings {
    pub period: Duration,
    pub align_offset: Duration,
    pub error_marker: String,
}

impl Default for TelemetryTimings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(10),
            align_offset: Duration::from_secs(5),
            error_marker: "ERROR".to_string(),
        }
    }
}

pub struct TelemetryLogger<B, L> {
    sensors: Vec<SensorClient<B>>,
    valve_state: SharedValveState,
    sink: Arc<Mutex<L>>,
    timings: TelemetryTimings,
    clock: Arc<dyn Clock + Send + Sync>,
    token: CancelToken,
    last_timestamp: Option<NaiveDateTime>,
    written: u64,
}

impl<B: Bus, L: RecordSink> TelemetryLogger<B, L> {
    pub fn new(
        sensors: Vec<SensorClient<B>>,
        valve_state: SharedValveState,
        sink: Arc<Mutex<L>>,
        timings: TelemetryTimings,
        clock: Arc<dyn Clock + Send + Sync>,
        token: CancelToken,
    ) -> Self {
        Self {
            sensors,
            valve_state,
            sink,
            timings,
            clock,
            token,
            last_timestamp: None,
            written: 0,
        }
    }

    /// Records appended so far.
    pub fn records_written(&self) -> u64 {
        self.written
    }

    fn sink(&self) -> MutexGuard<'_, L> {
        match self.sink.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let clock = Arc::clone(&self.clock);
        let start = clock.now();
        let delay = initial_delay(start, self.timings.period, self.timings.align_offset);
        tracing::info!(
            initial = %start,
            delay_s = delay.as_secs_f64(),
            "telemetry loop waiting for first sample"
        );
        if sleep_for(&*clock, &self.token, delay) {
            return Ok(());
        }

        let mut next = clock.now();
        while !self.token.is_cancelled() {
            if let Err(e) = self.sample_once() {
                tracing::warn!(error = %e, "telemetry cycle failed");
            }
            next += to_delta(self.timings.period);
            if sleep_until(&*clock, &self.token, next) {
                break;
            }
        }
        if let Err(e) = self.sink().flush() {
            tracing::warn!(error = %e, "telemetry flush on exit failed");
        }
        tracing::info!(records = self.written, "telemetry loop stopped");
        Ok(())
    }

    /// Query every sensor, snapshot the valve, append one record.
    ///
    /// The cancel token is checked before each sensor; a stop request
    /// abandons the cycle and nothing is written (`Ok(None)`).
    pub fn sample_once(&mut self) -> std::result::Result<Option<TelemetryRecord>, RigError> {
        let mut readings = Vec::with_capacity(self.sensors.len());
        for s in &self.sensors {
            if self.token.is_cancelled() {
                tracing::info!(
                    done = readings.len(),
                    total = self.sensors.len(),
                    "telemetry cycle abandoned on stop request"
                );
                return Ok(None);
            }
            readings.push(SensorReading {
                label: s.label().to_string(),
                raw_response: self.reading_for(s),
            });
        }
        let valve_state = self.valve_state.get();

        let now = self.clock.now();
        let timestamp = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(timestamp);

        let record = TelemetryRecord {
            timestamp,
            readings,
            valve_state,
        };
        self.sink().append(&record)?;
        self.written += 1;
        tracing::info!("Data logged at {}", format_timestamp(timestamp));
        Ok(Some(record))
    }

    fn reading_for(&self, sensor: &SensorClient<B>) -> String {
        match sensor.read() {
            Ok(Response::Success(payload)) => payload,
            Ok(other) => {
                tracing::warn!(
                    sensor = sensor.label(),
                    address = sensor.address(),
                    response = ?other,
                    "sensor returned an error status"
                );
                self.timings.error_marker.clone()
            }
            Err(e) => {
                tracing::warn!(sensor = sensor.label(), error = %e, "sensor read failed");
                self.timings.error_marker.clone()
            }
        }
    }
}
