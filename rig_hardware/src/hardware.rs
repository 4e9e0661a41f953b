//! Raspberry Pi backends: GPIO relay for the valve, `/dev/i2c-N` for probes.

use rig_traits::{Bus, Valve};
use rppal::gpio::{Gpio, OutputPin};
use rppal::i2c::I2c;
use tracing::{debug, trace};

use crate::error::{HwError, Result};

pub struct HardwareValve {
    pin: OutputPin,
}

impl HardwareValve {
    /// Claim `pin` (BCM numbering) as an output, driven low (valve closed).
    pub fn new(pin: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let pin = gpio
            .get(pin)
            .map_err(|e| HwError::Gpio(format!("open valve pin {pin}: {e}")))?
            .into_output_low();
        debug!(pin = pin.pin(), "valve pin initialised low");
        Ok(Self { pin })
    }
}

impl Valve for HardwareValve {
    fn open(&mut self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.pin.set_high();
        Ok(())
    }

    fn close(&mut self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.pin.set_low();
        Ok(())
    }
}

impl Drop for HardwareValve {
    fn drop(&mut self) {
        self.pin.set_low();
    }
}

pub struct HardwareBus {
    i2c: I2c,
}

impl HardwareBus {
    /// Open `/dev/i2c-<bus_id>`.
    pub fn open(bus_id: u8) -> Result<Self> {
        let i2c = I2c::with_bus(bus_id)
            .map_err(|e| HwError::I2c(format!("open i2c bus {bus_id}: {e}")))?;
        Ok(Self { i2c })
    }
}

impl Bus for HardwareBus {
    fn set_target(
        &mut self,
        address: u16,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.i2c
            .set_slave_address(address)
            .map_err(|e| HwError::I2c(format!("select 0x{address:02X}: {e}")))?;
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let n = self
            .i2c
            .write(bytes)
            .map_err(|e| HwError::I2c(e.to_string()))?;
        if n != bytes.len() {
            return Err(Box::new(HwError::I2c(format!(
                "short write: {n} of {} bytes",
                bytes.len()
            ))));
        }
        trace!(len = n, "i2c write");
        Ok(())
    }

    fn receive(
        &mut self,
        max_bytes: usize,
    ) -> std::result::Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
        let mut buf = vec![0u8; max_bytes];
        let n = self
            .i2c
            .read(&mut buf)
            .map_err(|e| HwError::I2c(e.to_string()))?;
        buf.truncate(n);
        trace!(len = n, "i2c read");
        Ok(buf)
    }
}
