//! Human-readable error descriptions and structured JSON error formatting.

use rig_core::{BusError, RigError, ScheduleError};

fn bus_hint(be: &BusError) -> String {
    match be {
        BusError::Io { address, message } => format!(
            "What happened: Device 0x{address:02X} did not answer on the bus ({message}).\nLikely causes: Wrong address, loose wiring, missing pull-ups, or the probe is asleep.\nHow to fix: Run `rig list-addr` to see which addresses respond, then fix [[sensors]] in the config."
        ),
        BusError::MalformedResponse { address, reason } => format!(
            "What happened: Device 0x{address:02X} sent a frame that could not be decoded ({reason}).\nLikely causes: Read started before the probe finished, or electrical noise on the bus.\nHow to fix: Raise bus.long_wait_ms / bus.short_wait_ms and check the cabling."
        ),
    }
}

fn schedule_hint(se: &ScheduleError) -> String {
    format!(
        "What happened: The schedule was rejected ({se}).\nLikely causes: Event_Index values out of order, or an hour/minute out of range.\nHow to fix: Edit the schedule CSV so indices strictly increase and times are HH:MM:SS, then rerun."
    )
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BusError>() {
        return bus_hint(be);
    }
    if let Some(se) = err.downcast_ref::<ScheduleError>() {
        return schedule_hint(se);
    }
    if let Some(re) = err.downcast_ref::<RigError>() {
        return match re {
            RigError::Bus(be) => bus_hint(be),
            RigError::Schedule(se) => schedule_hint(se),
            RigError::Config(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML or schedule CSV.\nHow to fix: Edit the file, then rerun. `rig self-check` validates without starting the loops."
            ),
            RigError::Actuator(msg) => format!(
                "What happened: The valve relay could not be switched ({msg}).\nLikely causes: Wrong valve.pin or missing GPIO permissions.\nHow to fix: Check [valve] pin in the config and that the process may access /dev/gpiomem."
            ),
            RigError::Log(msg) => format!(
                "What happened: The telemetry log could not be written ({msg}).\nLikely causes: Directory not writable or disk full.\nHow to fix: Point telemetry.log_path at a writable location."
            ),
        };
    }

    // String-based heuristics for errors coming from backend init
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("open i2c bus") {
        return "What happened: Failed to open the I2C bus.\nLikely causes: I2C not enabled, wrong bus.id, or insufficient permissions.\nHow to fix: Enable I2C (raspi-config), check that /dev/i2c-<id> exists and add the user to the i2c group.".to_string();
    }

    if lower.contains("open valve pin") {
        return "What happened: Failed to initialize the valve output pin.\nLikely causes: Incorrect pin number or insufficient GPIO permissions.\nHow to fix: Fix valve.pin in the config; ensure the process has permission to access GPIO.".to_string();
    }

    if lower.contains("sensor check failed") {
        return format!(
            "What happened: {msg}.\nLikely causes: A probe answered with an error status.\nHow to fix: Query the probe directly with `rig query --address <hex> R` and recalibrate if needed."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable short name for the error class, used as the JSON `reason`.
pub fn reason_name(err: &eyre::Report) -> &'static str {
    if err.downcast_ref::<BusError>().is_some() {
        return "Bus";
    }
    if err.downcast_ref::<ScheduleError>().is_some() {
        return "Schedule";
    }
    match err.downcast_ref::<RigError>() {
        Some(RigError::Bus(_)) => "Bus",
        Some(RigError::Schedule(_)) => "Schedule",
        Some(RigError::Config(_)) => "Config",
        Some(RigError::Actuator(_)) => "Actuator",
        Some(RigError::Log(_)) => "Log",
        None => "Error",
    }
}

/// Stable exit codes per error class; anything untyped returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match reason_name(err) {
        "Config" => 2,
        "Schedule" => 3,
        "Bus" => 4,
        "Actuator" => 5,
        "Log" => 6,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let address = err
        .downcast_ref::<BusError>()
        .or_else(|| match err.downcast_ref::<RigError>() {
            Some(RigError::Bus(be)) => Some(be),
            _ => None,
        })
        .map(BusError::address);

    let obj = match address {
        Some(a) => json!({ "reason": reason_name(err), "address": a, "message": humanize(err) }),
        None => json!({ "reason": reason_name(err), "message": humanize(err) }),
    };
    obj.to_string()
}
