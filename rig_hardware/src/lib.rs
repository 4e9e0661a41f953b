pub mod error;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod hardware;

use crate::error::HwError;
use rig_traits::{Bus, Valve};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Simulated valve relay. Clones of the handle returned by `position()`
/// observe the simulated pin level.
#[derive(Debug, Default)]
pub struct SimulatedValve {
    open: Arc<AtomicBool>,
}

impl SimulatedValve {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of the pin level (`true` = energised/open).
    pub fn position(&self) -> Arc<AtomicBool> {
        self.open.clone()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Valve for SimulatedValve {
    fn open(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.open.store(true, Ordering::SeqCst);
        tracing::debug!("valve pin high (simulated)");
        Ok(())
    }
    fn close(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.open.store(false, Ordering::SeqCst);
        tracing::debug!("valve pin low (simulated)");
        Ok(())
    }
}

/// Simulated water-quality probe answering the ASCII command set.
#[derive(Debug, Clone)]
struct SimDevice {
    kind: String,
    value: f32,
    drift: f32,
    status: u8,
}

/// Simulated register bus populated with probe devices.
///
/// Responses are framed like the real probes: one status byte followed by the
/// ASCII payload, null padded to the requested read length. A read with no
/// pending command answers status 255 ("no data").
#[derive(Debug, Default)]
pub struct SimulatedBus {
    devices: BTreeMap<u16, SimDevice>,
    target: Option<u16>,
    pending: Option<Vec<u8>>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The five-probe layout of the pipe rig (DO, ORP, pH, EC, RTD).
    pub fn pipe_rig() -> Self {
        Self::new()
            .with_device(0x61, "DO", 8.21)
            .with_device(0x62, "ORP", 215.4)
            .with_device(0x63, "pH", 7.42)
            .with_device(0x65, "EC", 481.0)
            .with_device(0x66, "RTD", 21.6)
    }

    pub fn with_device(mut self, address: u16, kind: &str, value: f32) -> Self {
        self.devices.insert(
            address,
            SimDevice {
                kind: kind.to_string(),
                value,
                drift: 0.01,
                status: 1,
            },
        );
        self
    }

    /// Force every response from `address` to carry `status` instead of 1.
    pub fn with_status(mut self, address: u16, status: u8) -> Self {
        if let Some(dev) = self.devices.get_mut(&address) {
            dev.status = status;
        }
        self
    }

    /// Remove a device so transfers to its address fail like an absent probe.
    pub fn without_device(mut self, address: u16) -> Self {
        self.devices.remove(&address);
        self
    }

    pub fn addresses(&self) -> Vec<u16> {
        self.devices.keys().copied().collect()
    }

    fn selected(&mut self) -> Result<&mut SimDevice, HwError> {
        let addr = self.target.ok_or(HwError::NoTarget)?;
        self.devices.get_mut(&addr).ok_or(HwError::NoDevice(addr))
    }
}

impl Bus for SimulatedBus {
    fn set_target(&mut self, address: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.target = Some(address);
        self.pending = None;
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let device = self.selected()?;
        let text: String = bytes
            .iter()
            .take_while(|b| **b != 0)
            .map(|b| *b as char)
            .collect();
        let cmd = text.to_ascii_uppercase();
        let payload = if cmd == "R" {
            device.value += device.drift;
            Some(format!("{:.2}", device.value))
        } else if cmd == "I" {
            Some(format!("?I,{},1.98", device.kind))
        } else if cmd.starts_with("SLEEP") {
            None
        } else {
            Some(String::new())
        };
        let status = device.status;
        self.pending = payload.map(|p| {
            let mut frame = Vec::with_capacity(p.len() + 1);
            frame.push(status);
            frame.extend_from_slice(p.as_bytes());
            frame
        });
        tracing::trace!(command = %text, "simulated bus command");
        Ok(())
    }

    fn receive(
        &mut self,
        max_bytes: usize,
    ) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
        self.selected()?;
        let mut frame = self.pending.take().unwrap_or_else(|| vec![255]);
        frame.resize(max_bytes, 0);
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_valve_tracks_level() {
        let mut valve = SimulatedValve::new();
        let level = valve.position();
        valve.open().unwrap();
        assert!(level.load(Ordering::SeqCst));
        valve.close().unwrap();
        assert!(!valve.is_open());
    }

    #[test]
    fn test_simulated_read_drifts() {
        let mut bus = SimulatedBus::new().with_device(0x63, "pH", 7.0);
        bus.set_target(0x63).unwrap();
        bus.send(b"R\0").unwrap();
        let first = bus.receive(31).unwrap();
        bus.send(b"R\0").unwrap();
        let second = bus.receive(31).unwrap();
        assert_eq!(&first[..5], b"\x017.01");
        assert_eq!(&second[..5], b"\x017.02");
        assert_eq!(first.len(), 31);
    }
}
