//! Maps `Box<dyn Error>` from trait boundaries to typed errors.
//!
//! The traits in `rig_traits` use `Box<dyn Error + Send + Sync>`; this module
//! converts those to `BusError`/`RigError`, with an optional feature-gated
//! path for `rig_hardware::HwError` downcasting.

use crate::error::{BusError, RigError};

/// Map a bus transfer error for the device at `address` to `BusError::Io`.
pub fn map_bus_error(address: u16, e: &(dyn std::error::Error + 'static)) -> BusError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<rig_hardware::error::HwError>() {
            let message = match hw {
                rig_hardware::error::HwError::NoDevice(_) => "device not responding".to_string(),
                other => other.to_string(),
            };
            return BusError::Io { address, message };
        }
    }

    BusError::Io {
        address,
        message: e.to_string(),
    }
}

/// Map an actuator error to `RigError::Actuator`.
pub fn map_valve_error(e: &(dyn std::error::Error + 'static)) -> RigError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(rig_hardware::error::HwError::Gpio(msg)) =
            e.downcast_ref::<rig_hardware::error::HwError>()
        {
            return RigError::Actuator(format!("gpio: {msg}"));
        }
    }
    RigError::Actuator(e.to_string())
}
