//! `From` implementations bridging `rig_config` types to `rig_core` types.

use std::time::Duration;

use crate::error::ScheduleError;
use crate::protocol::BusTimings;
use crate::schedule::{EventKind, ScheduleEvent, ScheduleStore};
use crate::telemetry::TelemetryTimings;
use crate::valve::ValveTimings;

// ── ValveCfg ─────────────────────────────────────────────────────────────────

impl From<&rig_config::ValveCfg> for ValveTimings {
    fn from(c: &rig_config::ValveCfg) -> Self {
        Self {
            use_duration: Duration::from_secs(c.use_duration_s),
            flush_duration: Duration::from_secs(c.flush_duration_s),
            settle: Duration::from_millis(c.settle_ms),
            reset_hour: c.reset_hour,
        }
    }
}

// ── BusCfg ───────────────────────────────────────────────────────────────────

impl From<&rig_config::BusCfg> for BusTimings {
    fn from(c: &rig_config::BusCfg) -> Self {
        Self {
            long_wait: Duration::from_millis(c.long_wait_ms),
            short_wait: Duration::from_millis(c.short_wait_ms),
            read_len: c.read_len,
        }
    }
}

// ── TelemetryCfg ─────────────────────────────────────────────────────────────

impl From<&rig_config::TelemetryCfg> for TelemetryTimings {
    fn from(c: &rig_config::TelemetryCfg) -> Self {
        Self {
            period: Duration::from_secs(c.period_s),
            align_offset: Duration::from_secs(c.align_offset_s),
            error_marker: c.error_marker.clone(),
        }
    }
}

// ── Schedule ─────────────────────────────────────────────────────────────────

impl From<rig_config::EventType> for EventKind {
    fn from(t: rig_config::EventType) -> Self {
        match t {
            rig_config::EventType::Use => Self::Use,
            rig_config::EventType::Flush => Self::Flush,
        }
    }
}

impl TryFrom<&rig_config::ScheduleEntry> for ScheduleEvent {
    type Error = ScheduleError;

    fn try_from(e: &rig_config::ScheduleEntry) -> Result<Self, Self::Error> {
        Self::new(e.index, e.hour, e.minute, e.kind.into())
    }
}

impl TryFrom<&[rig_config::ScheduleEntry]> for ScheduleStore {
    type Error = ScheduleError;

    fn try_from(rows: &[rig_config::ScheduleEntry]) -> Result<Self, Self::Error> {
        let events = rows
            .iter()
            .map(ScheduleEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(events)
    }
}
