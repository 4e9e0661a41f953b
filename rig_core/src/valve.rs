//! Valve state machine driven by the schedule.
//!
//! The controller wakes on every wall-clock second, fires events whose
//! `(hour, minute)` matches and whose index is above the last processed one,
//! and holds the valve open for the event's duration while polling the cancel
//! token. Whatever happens, the loop closes the valve before it returns.
//!
//! `ValveHandle` is the only path to the actuator. The published
//! [`ValveState`] changes only after the actuator call succeeded, so readers
//! (telemetry, shutdown) never see `Open` for a valve that failed to open.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use rig_traits::{Clock, Valve};

use crate::error::{Result, RigError};
use crate::hw_error::map_valve_error;
use crate::schedule::{EventKind, ScheduleEvent, ScheduleStore};
use crate::shutdown::CancelToken;
use crate::util::{sleep_for, sleep_until, to_delta, until_next_second};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveState {
    Closed,
    Open,
}

impl std::fmt::Display for ValveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Closed => "Closed",
            Self::Open => "Open",
        })
    }
}

/// Read-only published valve state. Clones share the value.
#[derive(Debug, Clone, Default)]
pub struct SharedValveState(Arc<AtomicBool>);

impl SharedValveState {
    pub fn get(&self) -> ValveState {
        if self.0.load(Ordering::Acquire) {
            ValveState::Open
        } else {
            ValveState::Closed
        }
    }

    fn set(&self, s: ValveState) {
        self.0.store(s == ValveState::Open, Ordering::Release);
    }
}

/// Shared access to the actuator plus its published state.
pub struct ValveHandle<V> {
    actuator: Arc<Mutex<V>>,
    state: SharedValveState,
}

impl<V> Clone for ValveHandle<V> {
    fn clone(&self) -> Self {
        Self {
            actuator: Arc::clone(&self.actuator),
            state: self.state.clone(),
        }
    }
}

impl<V: Valve> ValveHandle<V> {
    pub fn new(valve: V) -> Self {
        Self {
            actuator: Arc::new(Mutex::new(valve)),
            state: SharedValveState::default(),
        }
    }

    pub fn state(&self) -> SharedValveState {
        self.state.clone()
    }

    // A panic while the lock was held must not keep the valve from closing.
    fn lock(&self) -> MutexGuard<'_, V> {
        match self.actuator.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn open(&self) -> std::result::Result<(), RigError> {
        self.lock().open().map_err(|e| map_valve_error(e.as_ref()))?;
        self.state.set(ValveState::Open);
        Ok(())
    }

    pub fn close(&self) -> std::result::Result<(), RigError> {
        self.lock().close().map_err(|e| map_valve_error(e.as_ref()))?;
        self.state.set(ValveState::Closed);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValveTimings {
    pub use_duration: Duration,
    pub flush_duration: Duration,
    /// Pause after each pin toggle.
    pub settle: Duration,
    /// Hour at which the processed-event index is cleared, once per day.
    pub reset_hour: u8,
}

impl Default for ValveTimings {
    fn default() -> Self {
        Self {
            use_duration: Duration::from_secs(10),
            flush_duration: Duration::from_secs(400),
            settle: Duration::from_millis(100),
            reset_hour: 20,
        }
    }
}

impl ValveTimings {
    pub fn duration_for(&self, kind: EventKind) -> Duration {
        match kind {
            EventKind::Use => self.use_duration,
            EventKind::Flush => self.flush_duration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Actuating {
        index: u64,
        kind: EventKind,
        deadline: NaiveDateTime,
    },
}

/// Controller state as seen from other threads. Clones share the value.
#[derive(Debug, Clone)]
pub struct SharedControllerState(Arc<Mutex<ControllerState>>);

impl Default for SharedControllerState {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(ControllerState::Idle)))
    }
}

impl SharedControllerState {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        match self.0.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get(&self) -> ControllerState {
        *self.lock()
    }

    fn set(&self, s: ControllerState) {
        *self.lock() = s;
    }
}

/// Result of one [`ValveController::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    /// Indices completed this tick, in order.
    Actuated(Vec<u64>),
    /// Cancellation arrived mid-actuation; the event stays unprocessed.
    Interrupted { index: u64 },
}

#[derive(Debug, Default)]
struct RunState {
    last_processed: Option<u64>,
    last_reset: Option<NaiveDate>,
}

pub struct ValveController<V> {
    valve: ValveHandle<V>,
    schedule: ScheduleStore,
    timings: ValveTimings,
    clock: Arc<dyn Clock + Send + Sync>,
    token: CancelToken,
    run: RunState,
    state: SharedControllerState,
    close_pending: bool,
}

impl<V: Valve> ValveController<V> {
    pub fn new(
        valve: ValveHandle<V>,
        schedule: ScheduleStore,
        timings: ValveTimings,
        clock: Arc<dyn Clock + Send + Sync>,
        token: CancelToken,
    ) -> Self {
        Self {
            valve,
            schedule,
            timings,
            clock,
            token,
            run: RunState::default(),
            state: SharedControllerState::default(),
            close_pending: false,
        }
    }

    /// Last completed event index today, `-1` when none.
    pub fn last_processed_event_index(&self) -> i64 {
        self.run
            .last_processed
            .and_then(|i| i64::try_from(i).ok())
            .unwrap_or(-1)
    }

    pub fn state(&self) -> ControllerState {
        self.state.get()
    }

    /// Handle for observing `Idle`/`Actuating` from another thread.
    pub fn state_handle(&self) -> SharedControllerState {
        self.state.clone()
    }

    pub fn valve_state(&self) -> ValveState {
        self.valve.state.get()
    }

    /// Loop body: tick, then sleep to the next whole second, until cancelled.
    pub fn run(&mut self) -> Result<()> {
        tracing::info!(events = self.schedule.len(), "valve loop started");
        while !self.token.is_cancelled() {
            if let Err(e) = self.tick() {
                tracing::warn!(error = %e, "valve tick failed");
            }
            let wait = until_next_second(self.clock.now());
            self.clock.sleep(wait);
        }
        self.secure_on_exit();
        tracing::info!("valve loop stopped");
        Ok(())
    }

    /// Evaluate the schedule once at the current clock time.
    pub fn tick(&mut self) -> std::result::Result<TickOutcome, RigError> {
        let now = self.clock.now();
        self.maybe_reset(now);

        if self.close_pending {
            self.valve.close()?;
            self.close_pending = false;
            tracing::info!("pending valve close succeeded");
        }

        let (hour, minute) = (now.hour() as u8, now.minute() as u8);
        let last = self.run.last_processed;
        let due: Vec<ScheduleEvent> = self
            .schedule
            .due_at(hour, minute)
            .filter(|e| last.is_none_or(|l| e.index() > l))
            .copied()
            .collect();

        let mut done = Vec::new();
        for ev in due {
            if self.token.is_cancelled() {
                break;
            }
            if !self.actuate(ev)? {
                return Ok(TickOutcome::Interrupted { index: ev.index() });
            }
            done.push(ev.index());
        }
        Ok(if done.is_empty() {
            TickOutcome::Idle
        } else {
            TickOutcome::Actuated(done)
        })
    }

    fn maybe_reset(&mut self, now: NaiveDateTime) {
        if now.hour() != u32::from(self.timings.reset_hour) {
            return;
        }
        let today = now.date();
        if self.run.last_reset == Some(today) {
            return;
        }
        self.run.last_reset = Some(today);
        if let Some(prev) = self.run.last_processed.take() {
            tracing::info!(previous = prev, "Event index reset for the next day");
        }
    }

    /// Open for the event's duration, then close. Returns `Ok(false)` when
    /// cancelled before the duration elapsed.
    fn actuate(&mut self, ev: ScheduleEvent) -> std::result::Result<bool, RigError> {
        self.enter(ev)?;
        let interrupted = self.hold();
        self.leave(interrupted)
    }

    /// `Idle -> Actuating`: open and publish the deadline.
    fn enter(&mut self, ev: ScheduleEvent) -> std::result::Result<(), RigError> {
        let duration = self.timings.duration_for(ev.kind());
        let start = self.clock.now();

        if let Err(e) = self.valve.open() {
            tracing::warn!(index = ev.index(), error = %e, "valve open failed");
            if let Err(close_err) = self.valve.close() {
                self.close_pending = true;
                tracing::error!(error = %close_err, "valve close after failed open also failed");
            }
            // Consumed so a broken actuator is not retried every second.
            self.run.last_processed = Some(ev.index());
            return Err(e);
        }

        self.state.set(ControllerState::Actuating {
            index: ev.index(),
            kind: ev.kind(),
            deadline: start + to_delta(duration),
        });
        tracing::info!(
            index = ev.index(),
            kind = %ev.kind(),
            duration_s = duration.as_secs_f64(),
            "Valve opened for {}s due to {} event",
            duration.as_secs(),
            ev.kind()
        );
        Ok(())
    }

    /// Sleep until the published deadline. Returns `true` if cancelled first.
    fn hold(&self) -> bool {
        let ControllerState::Actuating { deadline, .. } = self.state.get() else {
            return false;
        };
        let clock = &*self.clock;
        sleep_for(clock, &self.token, self.timings.settle.min(clock.until(deadline)))
            || sleep_until(clock, &self.token, deadline)
    }

    /// `Actuating -> Idle`: close, and mark the event processed unless the
    /// hold was interrupted.
    fn leave(&mut self, interrupted: bool) -> std::result::Result<bool, RigError> {
        let ControllerState::Actuating { index, .. } = self.state.get() else {
            return Ok(!interrupted);
        };
        let closed = self.valve.close();
        self.state.set(ControllerState::Idle);
        match &closed {
            Ok(()) => {
                tracing::info!(index, "Valve closed");
                self.clock.sleep(self.timings.settle);
            }
            Err(e) => {
                self.close_pending = true;
                tracing::error!(index, error = %e, "valve close failed; will retry");
            }
        }

        if interrupted {
            tracing::info!(index, "actuation interrupted by stop request");
            closed?;
            return Ok(false);
        }
        self.run.last_processed = Some(index);
        closed?;
        Ok(true)
    }

    fn secure_on_exit(&mut self) {
        self.state.set(ControllerState::Idle);
        match self.valve.close() {
            Ok(()) => self.close_pending = false,
            Err(e) => tracing::error!(error = %e, "valve close on loop exit failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{SpyValve, ValveAction};
    use rig_traits::ManualClock;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 4, 18)
            .and_then(|d| d.and_hms_opt(h, m, s))
            .unwrap()
    }

    fn controller(
        events: Vec<ScheduleEvent>,
        start: NaiveDateTime,
    ) -> (ValveController<SpyValve>, SpyValve, ManualClock, CancelToken) {
        let clock = ManualClock::starting_at(start);
        let spy = SpyValve::new(Arc::new(clock.clone()));
        let token = CancelToken::new();
        let c = ValveController::new(
            ValveHandle::new(spy.clone()),
            ScheduleStore::new(events).unwrap(),
            ValveTimings::default(),
            Arc::new(clock.clone()),
            token.clone(),
        );
        (c, spy, clock, token)
    }

    #[test]
    fn idle_outside_scheduled_minute() {
        let ev = ScheduleEvent::new(1, 7, 30, EventKind::Use).unwrap();
        let (mut c, spy, _, _) = controller(vec![ev], at(7, 29, 59));
        assert_eq!(c.tick().unwrap(), TickOutcome::Idle);
        assert!(spy.actions().is_empty());
        assert_eq!(c.last_processed_event_index(), -1);
    }

    #[test]
    fn failed_open_consumes_event_and_closes() {
        let ev = ScheduleEvent::new(4, 7, 30, EventKind::Flush).unwrap();
        let (mut c, spy, _, _) = controller(vec![ev], at(7, 30, 0));
        spy.fail_next_open();
        assert!(matches!(c.tick(), Err(RigError::Actuator(_))));
        assert_eq!(c.last_processed_event_index(), 4);
        assert_eq!(c.valve_state(), ValveState::Closed);
        assert_eq!(
            spy.actions().last().map(|a| a.1),
            Some(ValveAction::Close)
        );
        assert_eq!(c.tick().unwrap(), TickOutcome::Idle);
    }

    #[test]
    fn failed_close_is_retried_next_tick() {
        let ev = ScheduleEvent::new(1, 7, 30, EventKind::Use).unwrap();
        let (mut c, spy, _, _) = controller(vec![ev], at(7, 30, 0));
        spy.fail_next_close();
        assert!(c.tick().is_err());
        assert_eq!(c.last_processed_event_index(), 1);
        assert_eq!(c.valve_state(), ValveState::Open);
        assert_eq!(c.tick().unwrap(), TickOutcome::Idle);
        assert_eq!(c.valve_state(), ValveState::Closed);
    }

    /// Valve that records the controller state seen at each close.
    #[derive(Default, Clone)]
    struct WatchingValve {
        handle: Arc<Mutex<Option<SharedControllerState>>>,
        seen_at_close: Arc<Mutex<Vec<ControllerState>>>,
    }

    impl Valve for WatchingValve {
        fn open(&mut self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }
        fn close(&mut self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            if let Some(h) = self.handle.lock().unwrap().as_ref() {
                self.seen_at_close.lock().unwrap().push(h.get());
            }
            Ok(())
        }
    }

    #[test]
    fn actuating_state_is_published_with_its_deadline() {
        let clock = ManualClock::starting_at(at(7, 30, 0));
        let valve = WatchingValve::default();
        let mut c = ValveController::new(
            ValveHandle::new(valve.clone()),
            ScheduleStore::new(vec![ScheduleEvent::new(3, 7, 30, EventKind::Use).unwrap()])
                .unwrap(),
            ValveTimings::default(),
            Arc::new(clock.clone()),
            CancelToken::new(),
        );
        let observer = c.state_handle();
        *valve.handle.lock().unwrap() = Some(observer.clone());
        assert_eq!(observer.get(), ControllerState::Idle);

        assert_eq!(c.tick().unwrap(), TickOutcome::Actuated(vec![3]));
        assert_eq!(
            *valve.seen_at_close.lock().unwrap(),
            vec![ControllerState::Actuating {
                index: 3,
                kind: EventKind::Use,
                deadline: at(7, 30, 10),
            }]
        );
        assert_eq!(observer.get(), ControllerState::Idle);
        assert_eq!(clock.now(), at(7, 30, 10) + chrono::TimeDelta::milliseconds(100));
    }

    #[test]
    fn reset_happens_once_per_day() {
        let ev = ScheduleEvent::new(1, 20, 0, EventKind::Use).unwrap();
        let (mut c, _, clock, _) = controller(vec![ev], at(20, 0, 0));
        assert_eq!(c.tick().unwrap(), TickOutcome::Actuated(vec![1]));
        // Still 20:00 on the same day: no re-fire.
        clock.set(at(20, 0, 30));
        assert_eq!(c.tick().unwrap(), TickOutcome::Idle);
        assert_eq!(c.last_processed_event_index(), 1);
    }
}
