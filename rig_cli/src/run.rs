//! `rig run`: wire both loops, supervise them, and shut down exactly once.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use eyre::WrapErr;
use rig_config::Config;
use rig_core::{
    BusLink, BusTimings, CancelToken, CsvLog, RecordSink, ScheduleStore, SensorClient,
    ShutdownCause, ShutdownCoordinator, ShutdownReport, TelemetryLogger, ValveController,
    ValveHandle, WatchOutcome, spawn_loop, watch,
};
use rig_traits::{Clock, SystemClock};
use tracing::{error, info, warn};

use crate::backend;

/// How often the supervisor re-checks the cancel token.
const WATCH_POLL: Duration = Duration::from_millis(200);

/// Resolve the schedule file (CLI flag wins over `[schedule].path`) and build
/// the store. No file means an empty schedule: the valve stays closed.
pub fn load_schedule(cfg: &Config, cli_path: Option<&Path>) -> eyre::Result<ScheduleStore> {
    let Some(path) = cli_path.or(cfg.schedule.path.as_deref()) else {
        warn!("no schedule configured; valve will stay closed");
        return Ok(ScheduleStore::default());
    };
    let entries = rig_config::load_schedule_csv(path).map_err(|e| {
        rig_core::RigError::Config(format!("schedule {}: {e:#}", path.display()))
    })?;
    let store = ScheduleStore::try_from(entries.as_slice())?;
    info!(path = %path.display(), events = store.len(), "schedule loaded");
    Ok(store)
}

fn cause_for(outcome: WatchOutcome) -> ShutdownCause {
    match outcome {
        WatchOutcome::Cancelled => ShutdownCause::Interrupt,
        WatchOutcome::LoopExited(name) => ShutdownCause::Fault(format!("{name} loop exited")),
        WatchOutcome::DeadlineReached => ShutdownCause::EndOfRun,
    }
}

/// Run until Ctrl-C, a loop fault, or `max_runtime`; always ends in one
/// coordinated shutdown whose report is returned.
pub fn run_experiment(
    cfg: &Config,
    schedule: ScheduleStore,
    max_runtime: Option<Duration>,
) -> eyre::Result<ShutdownReport> {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(SystemClock::new());
    let token = CancelToken::new();

    // The handler only flags; shutdown runs on this thread.
    let t = token.clone();
    ctrlc::set_handler(move || {
        if t.request_stop() {
            info!("interrupt received, stopping");
        }
    })
    .wrap_err("install Ctrl-C handler")?;

    let valve = ValveHandle::new(backend::open_valve(cfg)?);
    let link = BusLink::open(
        backend::open_bus(cfg)?,
        BusTimings::from(&cfg.bus),
        Arc::clone(&clock),
    );
    let labels: Vec<String> = cfg.sensors.iter().map(|s| s.label.clone()).collect();
    let log = Arc::new(Mutex::new(CsvLog::open(&cfg.telemetry.log_path, &labels)?));
    let sensors = cfg
        .sensors
        .iter()
        .map(|s| SensorClient::new(s.label.clone(), s.address, link.clone()))
        .collect();

    let events = schedule.len();
    let mut controller = ValveController::new(
        valve.clone(),
        schedule,
        (&cfg.valve).into(),
        Arc::clone(&clock),
        token.clone(),
    );
    let mut logger = TelemetryLogger::new(
        sensors,
        valve.state(),
        Arc::clone(&log),
        (&cfg.telemetry).into(),
        Arc::clone(&clock),
        token.clone(),
    );

    let vc = valve.clone();
    let bl = link.clone();
    let lc = Arc::clone(&log);
    let coordinator = ShutdownCoordinator::new(
        token.clone(),
        Duration::from_millis(cfg.shutdown.join_timeout_ms),
    )
    .with_valve_close(move || vc.close())
    .with_bus_release(move || {
        bl.close();
        Ok(())
    })
    .with_log_close(move || match lc.lock() {
        Ok(mut l) => l.close(),
        Err(poisoned) => poisoned.into_inner().close(),
    });

    info!(
        sensors = labels.len(),
        events,
        log = %cfg.telemetry.log_path.display(),
        max_runtime_s = max_runtime.map(|d| d.as_secs()),
        "rig starting"
    );

    let deadline = max_runtime.map(|d| Instant::now() + d);
    let mut handles = Vec::with_capacity(2);
    let spawned = spawn_loop("valve", token.clone(), move || controller.run()).and_then(|h| {
        handles.push(h);
        spawn_loop("telemetry", token.clone(), move || logger.run())
    });
    let cause = match spawned {
        Ok(h) => {
            handles.push(h);
            cause_for(watch(&handles, &token, WATCH_POLL, deadline))
        }
        Err(e) => {
            error!(error = %e, "could not start loop thread");
            ShutdownCause::Fault(format!("spawn loop: {e}"))
        }
    };

    for h in handles {
        coordinator.adopt(h);
    }
    Ok(coordinator.shutdown(cause))
}
