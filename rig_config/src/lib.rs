#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and schedule parsing for the pipe-rig controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - The schedule CSV loader enforces headers, parses `HH:MM:SS` times and
//!   requires strictly increasing event indices.
use chrono::{NaiveTime, Timelike};
use serde::Deserialize;
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Highest 7-bit bus address.
pub const MAX_ADDRESS: u16 = 0x7F;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ValveCfg {
    /// BCM output pin driving the solenoid relay
    pub pin: u8,
    /// Open time for a `Use` event, in seconds
    pub use_duration_s: u64,
    /// Open time for a `Flush` event, in seconds
    pub flush_duration_s: u64,
    /// Pause after toggling the pin, in milliseconds
    pub settle_ms: u64,
    /// Hour of day (0..=23) at which the processed-event index resets
    pub reset_hour: u8,
}

impl Default for ValveCfg {
    fn default() -> Self {
        Self {
            pin: 23,
            use_duration_s: 10,
            flush_duration_s: 400,
            settle_ms: 100,
            reset_hour: 20,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BusCfg {
    /// Bus number, i.e. `/dev/i2c-<id>`
    pub id: u8,
    /// Wait after `R`/`CAL` commands before the response is valid (ms)
    pub long_wait_ms: u64,
    /// Wait after every other command (ms)
    pub short_wait_ms: u64,
    /// Bytes read per response frame
    pub read_len: usize,
}

impl Default for BusCfg {
    fn default() -> Self {
        Self {
            id: 1,
            long_wait_ms: 1500,
            short_wait_ms: 500,
            read_len: 31,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SensorCfg {
    /// Column label in the telemetry log
    pub label: String,
    pub address: u16,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TelemetryCfg {
    pub log_path: PathBuf,
    /// Sampling period in seconds; samples are phase-locked to this grid
    pub period_s: u64,
    /// Shift applied to the first sample so it lands mid-interval
    pub align_offset_s: u64,
    /// Written in place of a reading when a sensor fails
    pub error_marker: String,
}

impl Default for TelemetryCfg {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("data/rig_log.csv"),
            period_s: 10,
            align_offset_s: 5,
            error_marker: "ERROR".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ScheduleCfg {
    /// CSV with `Time_HMS,Type,Event_Index` columns
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShutdownCfg {
    /// Bounded wait for each loop thread to observe cancellation
    pub join_timeout_ms: u64,
}

impl Default for ShutdownCfg {
    fn default() -> Self {
        Self {
            join_timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub valve: ValveCfg,
    #[serde(default)]
    pub bus: BusCfg,
    /// Probes in log column order
    pub sensors: Vec<SensorCfg>,
    #[serde(default)]
    pub telemetry: TelemetryCfg,
    #[serde(default)]
    pub schedule: ScheduleCfg,
    #[serde(default)]
    pub shutdown: ShutdownCfg,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Valve
        if self.valve.use_duration_s == 0 {
            eyre::bail!("valve.use_duration_s must be >= 1");
        }
        if self.valve.flush_duration_s <= self.valve.use_duration_s {
            eyre::bail!("valve.flush_duration_s must be greater than valve.use_duration_s");
        }
        if self.valve.flush_duration_s > 24 * 60 * 60 {
            eyre::bail!("valve.flush_duration_s is unreasonably large (>24h)");
        }
        if self.valve.settle_ms > 10_000 {
            eyre::bail!("valve.settle_ms is unreasonably large (>10s)");
        }
        if self.valve.reset_hour > 23 {
            eyre::bail!("valve.reset_hour must be in 0..=23");
        }

        // Bus
        if self.bus.long_wait_ms == 0 {
            eyre::bail!("bus.long_wait_ms must be >= 1");
        }
        if self.bus.short_wait_ms == 0 {
            eyre::bail!("bus.short_wait_ms must be >= 1");
        }
        if self.bus.read_len < 2 {
            eyre::bail!("bus.read_len must be >= 2 (status byte + payload)");
        }

        // Sensors
        if self.sensors.is_empty() {
            eyre::bail!("at least one [[sensors]] entry is required");
        }
        let mut labels = HashSet::new();
        let mut addresses = HashSet::new();
        for s in &self.sensors {
            if s.label.trim().is_empty() {
                eyre::bail!("sensor label must not be empty");
            }
            if s.label.contains(',') {
                eyre::bail!("sensor label {:?} must not contain ','", s.label);
            }
            if s.address > MAX_ADDRESS {
                eyre::bail!(
                    "sensor {} address 0x{:02X} is outside 0x00..=0x7F",
                    s.label,
                    s.address
                );
            }
            if !labels.insert(s.label.as_str()) {
                eyre::bail!("duplicate sensor label {}", s.label);
            }
            if !addresses.insert(s.address) {
                eyre::bail!("duplicate sensor address 0x{:02X}", s.address);
            }
        }

        // Telemetry
        if self.telemetry.period_s == 0 {
            eyre::bail!("telemetry.period_s must be >= 1");
        }
        if self.telemetry.align_offset_s >= self.telemetry.period_s {
            eyre::bail!("telemetry.align_offset_s must be smaller than telemetry.period_s");
        }
        if self.telemetry.error_marker.contains(',') {
            eyre::bail!("telemetry.error_marker must not contain ','");
        }
        if self.telemetry.log_path.as_os_str().is_empty() {
            eyre::bail!("telemetry.log_path must not be empty");
        }

        // Shutdown
        if self.shutdown.join_timeout_ms == 0 {
            eyre::bail!("shutdown.join_timeout_ms must be >= 1");
        }
        // A loop mid-read must be able to notice the stop and return in time.
        if self.shutdown.join_timeout_ms <= self.bus.long_wait_ms {
            eyre::bail!(
                "shutdown.join_timeout_ms ({}) must exceed bus.long_wait_ms ({})",
                self.shutdown.join_timeout_ms,
                self.bus.long_wait_ms
            );
        }

        Ok(())
    }
}

/// Valve event kind as written in the schedule's `Type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Use,
    Flush,
}

impl std::str::FromStr for EventType {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "use" => Ok(Self::Use),
            "flush" => Ok(Self::Flush),
            other => eyre::bail!("unknown event type {other:?} (expected Use or Flush)"),
        }
    }
}

/// One resolved schedule row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub index: u64,
    pub hour: u8,
    pub minute: u8,
    pub kind: EventType,
}

/// Raw schedule CSV row.
///
/// Expected headers (extra columns are ignored):
/// Time_HMS,Type,Event_Index
///
/// Example:
/// Time_HMS,Type,Event_Index
/// 07:00:00,Flush,1
/// 07:30:00,Use,2
#[derive(Debug, Deserialize)]
struct ScheduleRow {
    #[serde(rename = "Time_HMS")]
    time_hms: String,
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Event_Index")]
    event_index: u64,
}

const SCHEDULE_HEADERS: [&str; 3] = ["Time_HMS", "Type", "Event_Index"];

/// Parse schedule CSV text from any reader.
pub fn parse_schedule_csv<R: Read>(reader: R) -> eyre::Result<Vec<ScheduleEntry>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read schedule headers: {}", e))?
        .clone();
    let missing: Vec<&str> = SCHEDULE_HEADERS
        .iter()
        .copied()
        .filter(|h| !headers.iter().any(|c| c == *h))
        .collect();
    if !missing.is_empty() {
        eyre::bail!(
            "schedule CSV must have headers 'Time_HMS,Type,Event_Index', missing: {}",
            missing.join(",")
        );
    }

    let mut entries: Vec<ScheduleEntry> = Vec::new();
    for (idx, rec) in rdr.deserialize::<ScheduleRow>().enumerate() {
        let line = idx + 2;
        let row = rec.map_err(|e| eyre::eyre!("invalid schedule row {}: {}", line, e))?;
        let time = NaiveTime::parse_from_str(&row.time_hms, "%H:%M:%S").map_err(|e| {
            eyre::eyre!(
                "invalid schedule row {}: bad Time_HMS {:?}: {}",
                line,
                row.time_hms,
                e
            )
        })?;
        let kind: EventType = row
            .kind
            .parse()
            .map_err(|e| eyre::eyre!("invalid schedule row {}: {}", line, e))?;
        if let Some(prev) = entries.last()
            && row.event_index <= prev.index
        {
            eyre::bail!(
                "invalid schedule row {}: Event_Index {} must be greater than {}",
                line,
                row.event_index,
                prev.index
            );
        }
        entries.push(ScheduleEntry {
            index: row.event_index,
            hour: time.hour() as u8,
            minute: time.minute() as u8,
            kind,
        });
    }

    Ok(entries)
}

pub fn load_schedule_csv(path: &Path) -> eyre::Result<Vec<ScheduleEntry>> {
    let file = std::fs::File::open(path)
        .map_err(|e| eyre::eyre!("open schedule CSV {:?}: {}", path, e))?;
    parse_schedule_csv(file)
}
