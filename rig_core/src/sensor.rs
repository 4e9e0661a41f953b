//! Per-probe client over a shared [`BusLink`].
use rig_traits::Bus;

use crate::bus::BusLink;
use crate::error::BusError;
use crate::protocol::Response;

/// Label returned by `identify` when the payload has no type field.
pub const UNKNOWN_SENSOR: &str = "Unknown sensor";
/// Label returned by `identify` when the exchange itself failed.
pub const COMM_ERROR: &str = "Error in communication";

pub struct SensorClient<B> {
    label: String,
    address: u16,
    link: BusLink<B>,
}

impl<B> std::fmt::Debug for SensorClient<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorClient")
            .field("label", &self.label)
            .field("address", &format_args!("0x{:02X}", self.address))
            .finish()
    }
}

impl<B: Bus> SensorClient<B> {
    pub fn new(label: impl Into<String>, address: u16, link: BusLink<B>) -> Self {
        Self {
            label: label.into(),
            address,
            link,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn query(&self, command: &str) -> Result<Response, BusError> {
        self.link.transact(self.address, command)
    }

    /// Take one measurement (`R`).
    pub fn read(&self) -> Result<Response, BusError> {
        self.query("R")
    }

    /// Device type from the `I` response (`?I,<type>,<firmware>`).
    pub fn identify(&self) -> String {
        match self.query("I") {
            Ok(resp) => device_type(&resp),
            Err(e) => {
                tracing::warn!(sensor = %self.label, error = %e, "identify failed");
                COMM_ERROR.to_string()
            }
        }
    }

    /// Addresses answering on the shared channel.
    pub fn list_devices(&self) -> Vec<u16> {
        self.link.list_devices()
    }
}

fn device_type(resp: &Response) -> String {
    resp.payload()
        .and_then(|p| p.split(',').nth(1))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map_or_else(|| UNKNOWN_SENSOR.to_string(), str::to_string)
}
