//! Serialized transport over the shared probe bus.
//!
//! `BusLink` is cheap to clone; every clone talks through the same lock, so a
//! full select/send/wait/receive transaction is atomic with respect to every
//! other user of the channel. The post-command wait happens while the lock is
//! held and before `receive`, so a caller cannot get a frame early.

use std::sync::{Arc, Mutex, MutexGuard};

use rig_traits::{Bus, Clock};

use crate::error::BusError;
use crate::hw_error::map_bus_error;
use crate::protocol::{BusTimings, CommandClass, Response, decode_frame, encode_command};

struct LinkState<B> {
    bus: Option<B>,
    /// Address the channel is currently pointed at.
    current: Option<u16>,
}

pub struct BusLink<B> {
    inner: Arc<Mutex<LinkState<B>>>,
    timings: BusTimings,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl<B> Clone for BusLink<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            timings: self.timings,
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<B> std::fmt::Debug for BusLink<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusLink")
            .field("timings", &self.timings)
            .finish_non_exhaustive()
    }
}

fn closed(address: u16) -> BusError {
    BusError::Io {
        address,
        message: "bus closed".to_string(),
    }
}

impl<B: Bus> BusLink<B> {
    /// Wrap an opened channel.
    pub fn open(bus: B, timings: BusTimings, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LinkState {
                bus: Some(bus),
                current: None,
            })),
            timings,
            clock,
        }
    }

    pub fn timings(&self) -> BusTimings {
        self.timings
    }

    fn lock(&self) -> MutexGuard<'_, LinkState<B>> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Point the channel at `address` for later transactions.
    pub fn set_target(&self, address: u16) -> Result<(), BusError> {
        let mut st = self.lock();
        select(&mut st, address)
    }

    /// Currently selected address, if any.
    pub fn target(&self) -> Option<u16> {
        self.lock().current
    }

    /// One complete command/response exchange with the device at `address`.
    pub fn transact(&self, address: u16, command: &str) -> Result<Response, BusError> {
        let class = CommandClass::of(command);
        let mut st = self.lock();
        select(&mut st, address)?;
        let bus = st.bus.as_mut().ok_or_else(|| closed(address))?;
        bus.send(&encode_command(command))
            .map_err(|e| map_bus_error(address, e.as_ref()))?;
        tracing::trace!(address, command, ?class, "bus command sent");

        let Some(wait) = self.timings.wait_for(class) else {
            return Ok(Response::Sleeping);
        };
        self.clock.sleep(wait);

        let raw = bus
            .receive(self.timings.read_len)
            .map_err(|e| map_bus_error(address, e.as_ref()))?;
        drop(st);
        let response = decode_frame(&raw)
            .map_err(|reason| BusError::MalformedResponse { address, reason })?;
        tracing::trace!(address, %response, "bus response");
        Ok(response)
    }

    /// Probe every 7-bit address with a bare read and return those that
    /// answered. The previously selected address is restored afterwards.
    pub fn list_devices(&self) -> Vec<u16> {
        let mut st = self.lock();
        let previous = st.current;
        let mut found = Vec::new();
        for address in 0..=rig_config::MAX_ADDRESS {
            if select(&mut st, address).is_err() {
                continue;
            }
            let Some(bus) = st.bus.as_mut() else {
                break;
            };
            if bus.receive(1).is_ok() {
                found.push(address);
            }
        }
        match previous {
            Some(prev) => {
                if let Err(e) = select(&mut st, prev) {
                    tracing::warn!(error = %e, "could not restore bus address after sweep");
                    st.current = None;
                }
            }
            // Nothing was selected before; the next transaction re-targets.
            None => st.current = None,
        }
        found
    }

    /// Release the underlying channel. Later transactions fail with
    /// `BusError::Io`. Closing twice is harmless.
    pub fn close(&self) {
        let mut st = self.lock();
        if st.bus.take().is_some() {
            tracing::debug!("bus handle released");
        }
        st.current = None;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().bus.is_none()
    }
}

fn select<B: Bus>(st: &mut LinkState<B>, address: u16) -> Result<(), BusError> {
    if st.current == Some(address) {
        return Ok(());
    }
    let bus = st.bus.as_mut().ok_or_else(|| closed(address))?;
    bus.set_target(address)
        .map_err(|e| map_bus_error(address, e.as_ref()))?;
    st.current = Some(address);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rig_hardware::SimulatedBus;
    use rig_traits::ManualClock;
    use std::time::Duration;

    fn link(bus: SimulatedBus) -> (BusLink<SimulatedBus>, ManualClock) {
        let clock = ManualClock::starting_at(
            chrono::NaiveDate::from_ymd_opt(2025, 4, 18)
                .and_then(|d| d.and_hms_opt(8, 0, 0))
                .unwrap(),
        );
        let link = BusLink::open(bus, BusTimings::default(), Arc::new(clock.clone()));
        (link, clock)
    }

    #[test]
    fn read_waits_long_class() {
        let (link, clock) = link(SimulatedBus::pipe_rig());
        let t0 = clock.now();
        let r = link.transact(0x63, "R").unwrap();
        assert!(r.is_success());
        assert_eq!(
            (clock.now() - t0).to_std().unwrap(),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn sleep_skips_read() {
        let (link, clock) = link(SimulatedBus::pipe_rig());
        let t0 = clock.now();
        assert_eq!(link.transact(0x61, "Sleep").unwrap(), Response::Sleeping);
        assert_eq!(clock.now(), t0);
    }

    #[test]
    fn absent_device_is_io_error() {
        let (link, _) = link(SimulatedBus::pipe_rig());
        let err = link.transact(0x10, "R").unwrap_err();
        assert!(matches!(err, BusError::Io { address: 0x10, .. }));
    }

    #[test]
    fn sweep_finds_devices_and_restores_target() {
        let (link, _) = link(SimulatedBus::pipe_rig());
        link.set_target(0x65).unwrap();
        assert_eq!(link.list_devices(), vec![0x61, 0x62, 0x63, 0x65, 0x66]);
        assert_eq!(link.target(), Some(0x65));
    }

    #[test]
    fn closed_link_refuses() {
        let (link, _) = link(SimulatedBus::pipe_rig());
        link.close();
        link.close();
        assert!(link.is_closed());
        assert!(link.transact(0x61, "R").is_err());
        assert!(link.list_devices().is_empty());
    }
}
