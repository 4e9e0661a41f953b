//! Supervised loop threads.
//!
//! Each loop runs on a named thread holding the sending half of a zero-capacity
//! channel. The sender is never used; dropping it when the thread ends makes
//! the receiver ready, which lets the supervisor wait on "any loop exited" and
//! on bounded joins without polling `JoinHandle::is_finished`.
use crossbeam_channel as xch;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::shutdown::{CancelToken, panic_message};

/// How a loop thread ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// Returned after observing cancellation.
    Stopped,
    Failed(String),
    Panicked(String),
}

pub struct LoopHandle {
    name: String,
    done: xch::Receiver<()>,
    join: Option<JoinHandle<LoopExit>>,
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("name", &self.name)
            .field("exited", &self.has_exited())
            .finish()
    }
}

impl LoopHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_exited(&self) -> bool {
        matches!(
            self.done.try_recv(),
            Err(xch::TryRecvError::Disconnected)
        )
    }

    /// Wait up to `timeout` for the thread to end. Returns `false` (and
    /// detaches the thread) if it is still running.
    pub fn join_within(mut self, timeout: Duration) -> bool {
        match self.done.recv_timeout(timeout) {
            Err(xch::RecvTimeoutError::Timeout) => false,
            _ => {
                if let Some(h) = self.join.take() {
                    match h.join() {
                        Ok(exit) => tracing::debug!(loop_name = %self.name, ?exit, "loop joined"),
                        Err(_) => tracing::warn!(loop_name = %self.name, "loop thread panicked"),
                    }
                }
                true
            }
        }
    }
}

/// Spawn `body` on a named thread.
///
/// A panic or `Err` escaping `body` is logged and requests a stop on `token`
/// so the other loop winds down too; the supervisor then runs shutdown.
pub fn spawn_loop<F>(name: &str, token: CancelToken, body: F) -> std::io::Result<LoopHandle>
where
    F: FnOnce() -> eyre::Result<()> + Send + 'static,
{
    let (guard, done) = xch::bounded::<()>(0);
    let thread_name = name.to_string();
    let join = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let exit = match catch_unwind(AssertUnwindSafe(body)) {
                Ok(Ok(())) => LoopExit::Stopped,
                Ok(Err(e)) => {
                    tracing::error!(loop_name = %thread_name, error = %e, "loop failed");
                    LoopExit::Failed(e.to_string())
                }
                Err(p) => {
                    let msg = panic_message(p.as_ref());
                    tracing::error!(loop_name = %thread_name, panic = %msg, "loop panicked");
                    LoopExit::Panicked(msg)
                }
            };
            // Exit becomes visible before the stop request it may cause.
            drop(guard);
            if exit != LoopExit::Stopped {
                token.request_stop();
            }
            exit
        })?;
    Ok(LoopHandle {
        name: name.to_string(),
        done,
        join: Some(join),
    })
}

/// What ended a [`watch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Cancelled,
    LoopExited(String),
    DeadlineReached,
}

/// Block until cancellation, any loop exiting, or `deadline`.
///
/// The token is re-checked every `poll`.
pub fn watch(
    handles: &[LoopHandle],
    token: &CancelToken,
    poll: Duration,
    deadline: Option<Instant>,
) -> WatchOutcome {
    loop {
        if let Some(h) = handles.iter().find(|h| h.has_exited()) {
            return WatchOutcome::LoopExited(h.name.clone());
        }
        if token.is_cancelled() {
            return WatchOutcome::Cancelled;
        }
        let mut wait = poll;
        if let Some(d) = deadline {
            let left = d.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return WatchOutcome::DeadlineReached;
            }
            wait = wait.min(left);
        }
        if handles.is_empty() {
            std::thread::sleep(wait);
            continue;
        }
        let mut sel = xch::Select::new();
        for h in handles {
            sel.recv(&h.done);
        }
        // Readiness only; the exit is picked up at the top of the loop.
        let _ = sel.ready_timeout(wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn cancelled_loop_joins() {
        let token = CancelToken::new();
        let t = token.clone();
        let h = spawn_loop("spin", token.clone(), move || {
            while !t.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        })
        .unwrap();
        assert!(!h.has_exited());
        token.request_stop();
        assert!(h.join_within(Duration::from_secs(2)));
    }

    #[test]
    fn panicking_loop_requests_stop_and_is_seen_by_watch() {
        let token = CancelToken::new();
        let h = spawn_loop("boom", token.clone(), || panic!("sensor table corrupt")).unwrap();
        let handles = vec![h];
        let out = watch(&handles, &token, Duration::from_millis(20), None);
        assert_eq!(out, WatchOutcome::LoopExited("boom".into()));
        for h in handles {
            assert!(h.join_within(Duration::from_secs(1)));
        }
        assert!(token.is_cancelled());
    }

    #[test]
    fn stuck_loop_is_detached() {
        let token = CancelToken::new();
        let release = Arc::new(AtomicBool::new(false));
        let r = release.clone();
        let h = spawn_loop("stuck", token.clone(), move || {
            while !r.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        })
        .unwrap();
        token.request_stop();
        assert!(!h.join_within(Duration::from_millis(30)));
        release.store(true, Ordering::SeqCst);
    }

    #[test]
    fn watch_honours_deadline() {
        let token = CancelToken::new();
        let deadline = Instant::now() + Duration::from_millis(50);
        let out = watch(&[], &token, Duration::from_millis(10), Some(deadline));
        assert_eq!(out, WatchOutcome::DeadlineReached);
    }
}
