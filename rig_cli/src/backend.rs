//! Valve and bus backend selection.
//!
//! With the `hardware` feature on Linux the valve is a GPIO relay and the
//! probes sit on `/dev/i2c-<id>`. Otherwise a simulated rig answers for every
//! configured sensor so the whole program can run on a workstation.

use rig_config::Config;
use rig_traits::{Bus, Valve};

pub type DynValve = Box<dyn Valve + Send>;
pub type DynBus = Box<dyn Bus + Send>;

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub fn open_valve(cfg: &Config) -> eyre::Result<DynValve> {
    use eyre::WrapErr;
    let valve = rig_hardware::hardware::HardwareValve::new(cfg.valve.pin)
        .wrap_err_with(|| format!("open valve pin {}", cfg.valve.pin))?;
    Ok(Box::new(valve))
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub fn open_bus(cfg: &Config) -> eyre::Result<DynBus> {
    use eyre::WrapErr;
    let bus = rig_hardware::hardware::HardwareBus::open(cfg.bus.id)
        .wrap_err_with(|| format!("open i2c bus {}", cfg.bus.id))?;
    Ok(Box::new(bus))
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
pub fn open_valve(_cfg: &Config) -> eyre::Result<DynValve> {
    tracing::info!("using simulated valve");
    Ok(Box::new(rig_hardware::SimulatedValve::new()))
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
pub fn open_bus(cfg: &Config) -> eyre::Result<DynBus> {
    Ok(Box::new(sim::bus_for(cfg)?))
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
mod sim {
    use rig_config::Config;
    use rig_hardware::SimulatedBus;

    /// Answer every read with status 2 (syntax error) at this address.
    pub const FAIL_ADDR_ENV: &str = "RIG_SIM_FAIL_ADDR";
    /// Leave this address unpopulated.
    pub const ABSENT_ADDR_ENV: &str = "RIG_SIM_ABSENT_ADDR";

    fn nominal_reading(label: &str) -> f32 {
        match label.to_ascii_uppercase().as_str() {
            "DO" => 8.2,
            "ORP" => 215.0,
            "PH" => 7.4,
            "EC" => 480.0,
            "RTD" | "TEMP" => 21.5,
            _ => 1.0,
        }
    }

    fn env_address(key: &str) -> eyre::Result<Option<u16>> {
        match std::env::var(key) {
            Ok(v) => crate::cli::parse_address(&v)
                .map(Some)
                .map_err(|e| eyre::eyre!("{key}: {e}")),
            Err(_) => Ok(None),
        }
    }

    pub fn bus_for(cfg: &Config) -> eyre::Result<SimulatedBus> {
        let mut bus = cfg.sensors.iter().fold(SimulatedBus::new(), |bus, s| {
            bus.with_device(s.address, &s.label, nominal_reading(&s.label))
        });
        if let Some(addr) = env_address(FAIL_ADDR_ENV)? {
            bus = bus.with_status(addr, 2);
        }
        if let Some(addr) = env_address(ABSENT_ADDR_ENV)? {
            bus = bus.without_device(addr);
        }
        tracing::info!(devices = ?bus.addresses(), "using simulated bus");
        Ok(bus)
    }
}
