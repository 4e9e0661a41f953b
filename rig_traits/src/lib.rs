pub mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

/// Digital output driving the solenoid valve relay.
pub trait Valve {
    fn open(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn close(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Raw duplex channel to a register bus with addressable devices (e.g. I2C).
///
/// Implementations only move bytes; framing and timing live in `rig_core`.
pub trait Bus {
    /// Select the device address subsequent transfers go to.
    fn set_target(&mut self, address: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn send(&mut self, bytes: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    /// Read up to `max_bytes` from the selected device.
    fn receive(
        &mut self,
        max_bytes: usize,
    ) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>;
}

impl<V: Valve + ?Sized> Valve for Box<V> {
    fn open(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).open()
    }
    fn close(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).close()
    }
}

impl<B: Bus + ?Sized> Bus for Box<B> {
    fn set_target(&mut self, address: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).set_target(address)
    }
    fn send(&mut self, bytes: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).send(bytes)
    }
    fn receive(
        &mut self,
        max_bytes: usize,
    ) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
        (**self).receive(max_bytes)
    }
}
