//! Test and helper doubles for rig_core.
//!
//! These record what the loops do against a shared clock so tests can assert
//! on ordering and timing without hardware.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::NaiveDateTime;
use rig_traits::{Bus, Clock, ManualClock, Valve};

use crate::error::RigError;
use crate::logger::RecordSink;
use crate::shutdown::CancelToken;
use crate::telemetry::TelemetryRecord;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveAction {
    Open,
    Close,
}

#[derive(Debug, Default)]
struct SpyState {
    actions: Vec<(NaiveDateTime, ValveAction)>,
    fail_open: bool,
    fail_close: bool,
    open: bool,
}

/// Valve that timestamps every successful open/close. Clones share the log.
#[derive(Clone)]
pub struct SpyValve {
    clock: Arc<dyn Clock + Send + Sync>,
    state: Arc<Mutex<SpyState>>,
}

impl SpyValve {
    pub fn new(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            clock,
            state: Arc::default(),
        }
    }

    pub fn actions(&self) -> Vec<(NaiveDateTime, ValveAction)> {
        lock(&self.state).actions.clone()
    }

    /// Physical level as last successfully driven.
    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    pub fn fail_next_open(&self) {
        lock(&self.state).fail_open = true;
    }

    pub fn fail_next_close(&self) {
        lock(&self.state).fail_close = true;
    }

    /// Durations between each open and the following close.
    pub fn open_spans(&self) -> Vec<Duration> {
        let actions = self.actions();
        actions
            .windows(2)
            .filter(|w| w[0].1 == ValveAction::Open && w[1].1 == ValveAction::Close)
            .filter_map(|w| (w[1].0 - w[0].0).to_std().ok())
            .collect()
    }
}

impl Valve for SpyValve {
    fn open(&mut self) -> Result<(), BoxError> {
        let now = self.clock.now();
        let mut st = lock(&self.state);
        if std::mem::take(&mut st.fail_open) {
            return Err(Box::new(std::io::Error::other("relay did not energise")));
        }
        st.open = true;
        st.actions.push((now, ValveAction::Open));
        Ok(())
    }

    fn close(&mut self) -> Result<(), BoxError> {
        let now = self.clock.now();
        let mut st = lock(&self.state);
        if std::mem::take(&mut st.fail_close) {
            return Err(Box::new(std::io::Error::other("relay stuck")));
        }
        st.open = false;
        st.actions.push((now, ValveAction::Close));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Target(u16),
    Send { address: u16, command: String },
    Receive { address: u16 },
}

/// Shared view of a [`RecordingBus`] log.
#[derive(Debug, Clone, Default)]
pub struct BusRecorder {
    events: Arc<Mutex<Vec<(NaiveDateTime, BusEvent)>>>,
}

impl BusRecorder {
    pub fn events(&self) -> Vec<(NaiveDateTime, BusEvent)> {
        lock(&self.events).clone()
    }

    /// Every `Send` that expects a reply must be followed directly by the
    /// `Receive` for the same address. Returns the first offending position.
    pub fn first_interleaving(&self) -> Option<usize> {
        let events = self.events();
        let mut open: Option<u16> = None;
        for (i, (_, ev)) in events.iter().enumerate() {
            match ev {
                BusEvent::Send { address, command } => {
                    if open.is_some() {
                        return Some(i);
                    }
                    if !command.to_ascii_uppercase().starts_with("SLEEP") {
                        open = Some(*address);
                    }
                }
                BusEvent::Receive { address } => match open.take() {
                    Some(a) if a == *address => {}
                    _ => return Some(i),
                },
                BusEvent::Target(_) => {
                    if open.is_some() {
                        return Some(i);
                    }
                }
            }
        }
        None
    }
}

/// Bus wrapper recording every call with a timestamp.
///
/// `hold` is a real sleep inside `send`, widening the window in which an
/// unserialized second caller would interleave.
pub struct RecordingBus<B> {
    inner: B,
    clock: Arc<dyn Clock + Send + Sync>,
    target: Option<u16>,
    recorder: BusRecorder,
    hold: Duration,
}

impl<B: Bus> RecordingBus<B> {
    pub fn new(inner: B, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            inner,
            clock,
            target: None,
            recorder: BusRecorder::default(),
            hold: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    pub fn recorder(&self) -> BusRecorder {
        self.recorder.clone()
    }

    fn record(&self, ev: BusEvent) {
        lock(&self.recorder.events).push((self.clock.now(), ev));
    }
}

impl<B: Bus> Bus for RecordingBus<B> {
    fn set_target(&mut self, address: u16) -> Result<(), BoxError> {
        self.record(BusEvent::Target(address));
        self.target = Some(address);
        self.inner.set_target(address)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), BoxError> {
        let command: String = bytes
            .iter()
            .take_while(|b| **b != 0)
            .map(|b| char::from(*b))
            .collect();
        self.record(BusEvent::Send {
            address: self.target.unwrap_or(u16::MAX),
            command,
        });
        if !self.hold.is_zero() {
            std::thread::sleep(self.hold);
        }
        self.inner.send(bytes)
    }

    fn receive(&mut self, max_bytes: usize) -> Result<Vec<u8>, BoxError> {
        self.record(BusEvent::Receive {
            address: self.target.unwrap_or(u16::MAX),
        });
        self.inner.receive(max_bytes)
    }
}

/// In-memory record sink. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<TelemetryRecord>>>,
    closed: Arc<Mutex<bool>>,
    close_calls: Arc<AtomicUsize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TelemetryRecord> {
        lock(&self.records).clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl RecordSink for MemorySink {
    fn append(&mut self, record: &TelemetryRecord) -> Result<(), RigError> {
        if *lock(&self.closed) {
            return Err(RigError::Log("sink closed".into()));
        }
        lock(&self.records).push(record.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RigError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), RigError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.closed) = true;
        Ok(())
    }
}

/// Manual clock that requests a stop on `token` once time reaches `stop_at`.
///
/// Lets a loop run to a chosen simulated instant on the test thread.
#[derive(Debug, Clone)]
pub struct CancelAtClock {
    inner: ManualClock,
    stop_at: NaiveDateTime,
    token: CancelToken,
}

impl CancelAtClock {
    pub fn new(inner: ManualClock, stop_at: NaiveDateTime, token: CancelToken) -> Self {
        Self {
            inner,
            stop_at,
            token,
        }
    }
}

impl Clock for CancelAtClock {
    fn now(&self) -> NaiveDateTime {
        self.inner.now()
    }

    fn sleep(&self, d: Duration) {
        self.inner.sleep(d);
        if self.inner.now() >= self.stop_at {
            self.token.request_stop();
        }
    }
}
