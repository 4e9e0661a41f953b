//! One-shot bus commands: `identify`, `list-addr`, `query`, `self-check`.

use std::sync::Arc;

use rig_config::Config;
use rig_core::{BusLink, BusTimings, Response, SensorClient};
use rig_traits::{Clock, SystemClock};
use serde_json::json;

use crate::backend::{self, DynBus};

fn open_link(cfg: &Config) -> eyre::Result<BusLink<DynBus>> {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(SystemClock::new());
    Ok(BusLink::open(
        backend::open_bus(cfg)?,
        BusTimings::from(&cfg.bus),
        clock,
    ))
}

fn sensors(cfg: &Config, link: &BusLink<DynBus>) -> Vec<SensorClient<DynBus>> {
    cfg.sensors
        .iter()
        .map(|s| SensorClient::new(s.label.clone(), s.address, link.clone()))
        .collect()
}

pub fn identify(cfg: &Config, json: bool) -> eyre::Result<()> {
    let link = open_link(cfg)?;
    for s in sensors(cfg, &link) {
        let kind = s.identify();
        if json {
            println!(
                "{}",
                json!({ "label": s.label(), "address": s.address(), "type": kind })
            );
        } else {
            println!("{:<8} 0x{:02X}  {kind}", s.label(), s.address());
        }
    }
    link.close();
    Ok(())
}

pub fn list_addr(cfg: &Config, json: bool) -> eyre::Result<()> {
    let link = open_link(cfg)?;
    let found = link.list_devices();
    link.close();
    if json {
        println!("{}", json!({ "addresses": found }));
    } else if found.is_empty() {
        println!("no devices responded");
    } else {
        for a in found {
            println!("0x{a:02X}");
        }
    }
    Ok(())
}

pub fn query(cfg: &Config, address: u16, command: &str, json: bool) -> eyre::Result<()> {
    let link = open_link(cfg)?;
    let resp = link.transact(address, command);
    link.close();
    let resp = resp?;
    if json {
        let status = match &resp {
            Response::Success(_) => "success".to_string(),
            Response::Failed(s) => s.to_string(),
            Response::Sleeping => "sleeping".to_string(),
        };
        println!(
            "{}",
            json!({ "address": address, "command": command, "status": status, "payload": resp.payload() })
        );
    } else {
        println!("{resp}");
    }
    Ok(())
}

/// Config and schedule are already validated by the time this runs; probe
/// every sensor with one reading and fail if any does not answer cleanly.
pub fn self_check(cfg: &Config, schedule_events: usize, json: bool) -> eyre::Result<()> {
    let link = open_link(cfg)?;
    let mut failed = Vec::new();
    for s in sensors(cfg, &link) {
        match s.read() {
            Ok(Response::Success(v)) => {
                tracing::info!(sensor = %s.label(), reading = %v, "probe ok");
            }
            Ok(other) => failed.push(format!("{} (0x{:02X}): {other}", s.label(), s.address())),
            Err(e) => {
                link.close();
                return Err(e.into());
            }
        }
    }
    link.close();
    if !failed.is_empty() {
        eyre::bail!("sensor check failed: {}", failed.join("; "));
    }
    if json {
        println!(
            "{}",
            json!({ "ok": true, "sensors": cfg.sensors.len(), "schedule_events": schedule_events })
        );
    } else {
        println!(
            "OK: {} sensors answering, {} schedule events",
            cfg.sensors.len(),
            schedule_events
        );
    }
    Ok(())
}
