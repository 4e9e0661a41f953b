//! Cancellation token and the one-shot shutdown sequence.
//!
//! Both control loops poll a shared [`CancelToken`]. [`ShutdownCoordinator`]
//! owns the ordered teardown (stop loops, close valve, release bus, close log)
//! and runs it exactly once no matter how many callers race into it.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{RigError, ShutdownFault, ShutdownStage};
use crate::supervisor::LoopHandle;

/// Process-wide run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CancelState {
    Running = 0,
    StopRequested = 1,
    ShutdownComplete = 2,
}

impl CancelState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Running,
            1 => Self::StopRequested,
            _ => Self::ShutdownComplete,
        }
    }
}

/// Shared cancellation flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicU8>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CancelState {
        CancelState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move `Running -> StopRequested`. Returns `true` for the caller that
    /// made the transition; every later call is a no-op.
    pub fn request_stop(&self) -> bool {
        self.0
            .compare_exchange(
                CancelState::Running as u8,
                CancelState::StopRequested as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.state() != CancelState::Running
    }

    pub(crate) fn mark_complete(&self) {
        self.0
            .store(CancelState::ShutdownComplete as u8, Ordering::Release);
    }
}

/// Why shutdown was entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    Interrupt,
    Fault(String),
    EndOfRun,
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("interrupt"),
            Self::Fault(m) => write!(f, "fault: {m}"),
            Self::EndOfRun => f.write_str("end of run"),
        }
    }
}

/// Outcome of one [`ShutdownCoordinator::shutdown`] call.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// `false` for every caller except the one that ran the steps.
    pub performed: bool,
    pub faults: Vec<ShutdownFault>,
    /// Loops that did not stop within the join timeout and were detached.
    pub detached: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty() && self.detached.is_empty()
    }
}

type Step = Box<dyn Fn() -> Result<(), RigError> + Send + Sync>;

/// Runs the shutdown sequence exactly once.
///
/// Resources are registered with the `with_*` builders before the loops are
/// started; `shutdown` is then safe to call from any thread.
pub struct ShutdownCoordinator {
    token: CancelToken,
    claimed: AtomicBool,
    join_timeout: Duration,
    loops: Mutex<Vec<LoopHandle>>,
    close_valve: Option<Step>,
    release_bus: Option<Step>,
    close_log: Option<Step>,
}

impl fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("state", &self.token.state())
            .field("join_timeout", &self.join_timeout)
            .finish_non_exhaustive()
    }
}

impl ShutdownCoordinator {
    pub fn new(token: CancelToken, join_timeout: Duration) -> Self {
        Self {
            token,
            claimed: AtomicBool::new(false),
            join_timeout,
            loops: Mutex::new(Vec::new()),
            close_valve: None,
            release_bus: None,
            close_log: None,
        }
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    #[must_use]
    pub fn with_valve_close<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), RigError> + Send + Sync + 'static,
    {
        self.close_valve = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_bus_release<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), RigError> + Send + Sync + 'static,
    {
        self.release_bus = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn with_log_close<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), RigError> + Send + Sync + 'static,
    {
        self.close_log = Some(Box::new(f));
        self
    }

    /// Register a running loop to be joined during shutdown.
    pub fn adopt(&self, handle: LoopHandle) {
        let mut loops = match self.loops.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        loops.push(handle);
    }

    pub fn is_complete(&self) -> bool {
        self.token.state() == CancelState::ShutdownComplete
    }

    /// Run the ordered shutdown steps if no one has yet.
    ///
    /// Each step is isolated: an error or panic is recorded as a
    /// [`ShutdownFault`] and the next step still runs. The flag reaches
    /// `ShutdownComplete` only after the last step.
    pub fn shutdown(&self, cause: ShutdownCause) -> ShutdownReport {
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(%cause, "shutdown already claimed");
            return ShutdownReport::default();
        }

        tracing::info!(%cause, "Shutting down safely");
        let mut report = ShutdownReport {
            performed: true,
            ..ShutdownReport::default()
        };

        let detached = &mut report.detached;
        run_step(&mut report.faults, ShutdownStage::StopLoops, || {
            self.token.request_stop();
            let handles = {
                let mut loops = match self.loops.lock() {
                    Ok(g) => g,
                    Err(poisoned) => poisoned.into_inner(),
                };
                std::mem::take(&mut *loops)
            };
            for h in handles {
                let name = h.name().to_string();
                if !h.join_within(self.join_timeout) {
                    tracing::warn!(loop_name = %name, "loop did not stop in time; detaching");
                    detached.push(name);
                }
            }
            Ok(())
        });

        let steps = [
            (ShutdownStage::CloseValve, &self.close_valve),
            (ShutdownStage::ReleaseBus, &self.release_bus),
            (ShutdownStage::CloseLog, &self.close_log),
        ];
        for (stage, step) in steps {
            if let Some(f) = step {
                run_step(&mut report.faults, stage, f);
            }
        }

        self.token.mark_complete();
        if report.is_clean() {
            tracing::info!("Resources have been cleaned up");
        } else {
            tracing::error!(
                faults = report.faults.len(),
                detached = report.detached.len(),
                "shutdown finished with faults"
            );
        }
        report
    }
}

fn run_step<F>(faults: &mut Vec<ShutdownFault>, stage: ShutdownStage, f: F)
where
    F: FnOnce() -> Result<(), RigError>,
{
    let message = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {
            tracing::debug!(%stage, "shutdown step done");
            return;
        }
        Ok(Err(e)) => e.to_string(),
        Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
    };
    let fault = ShutdownFault { stage, message };
    tracing::error!(error = %fault, "shutdown step failed");
    faults.push(fault);
}

pub(crate) fn panic_message(p: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = p.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = p.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
