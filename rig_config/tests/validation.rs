use rig_config::load_toml;
use rstest::rstest;

const BASE: &str = r#"
[valve]
pin = 23
use_duration_s = 10
flush_duration_s = 400
settle_ms = 100
reset_hour = 20

[bus]
id = 1
long_wait_ms = 1500
short_wait_ms = 500
read_len = 31

[[sensors]]
label = "DO"
address = 0x61

[[sensors]]
label = "pH"
address = 0x63

[telemetry]
log_path = "data/rig_log.csv"
period_s = 10
align_offset_s = 5
"#;

#[test]
fn accepts_full_config() {
    let cfg = load_toml(BASE).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.sensors[1].address, 0x63);
    assert_eq!(cfg.telemetry.error_marker, "ERROR");
    assert_eq!(cfg.shutdown.join_timeout_ms, 3000);
}

#[test]
fn defaults_fill_missing_sections() {
    let toml = r#"
[[sensors]]
label = "EC"
address = 0x65
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    cfg.validate().expect("defaults are valid");
    assert_eq!(cfg.valve.pin, 23);
    assert_eq!(cfg.valve.use_duration_s, 10);
    assert_eq!(cfg.valve.flush_duration_s, 400);
    assert_eq!(cfg.bus.long_wait_ms, 1500);
    assert_eq!(cfg.telemetry.period_s, 10);
    assert!(cfg.schedule.path.is_none());
}

#[test]
fn rejects_missing_sensors_table() {
    let err = load_toml("[valve]\npin = 23\n").expect_err("sensors are required");
    assert!(format!("{err}").contains("sensors"));
}

#[rstest]
#[case("flush_duration_s = 400", "flush_duration_s = 5", "greater than valve.use_duration_s")]
#[case("reset_hour = 20", "reset_hour = 24", "reset_hour must be in 0..=23")]
#[case("long_wait_ms = 1500", "long_wait_ms = 0", "long_wait_ms must be >= 1")]
#[case("long_wait_ms = 1500", "long_wait_ms = 3000", "must exceed bus.long_wait_ms (3000)")]
#[case("read_len = 31", "read_len = 1", "read_len must be >= 2")]
#[case("address = 0x63", "address = 0x80", "outside 0x00..=0x7F")]
#[case("address = 0x63", "address = 0x61", "duplicate sensor address")]
#[case("label = \"pH\"", "label = \"DO\"", "duplicate sensor label")]
#[case("label = \"pH\"", "label = \"p,H\"", "must not contain ','")]
#[case("align_offset_s = 5", "align_offset_s = 10", "align_offset_s must be smaller")]
#[case("period_s = 10", "period_s = 0", "period_s must be >= 1")]
fn rejects_invalid_values(#[case] from: &str, #[case] to: &str, #[case] needle: &str) {
    let toml = BASE.replacen(from, to, 1);
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(
        format!("{err}").contains(needle),
        "expected {needle:?} in {err}"
    );
}

#[test]
fn shipped_config_is_valid() {
    let cfg = load_toml(include_str!("../../etc/rig_config.toml")).expect("parse shipped config");
    cfg.validate().expect("shipped config validates");
    assert_eq!(cfg.sensors.len(), 5);
    let entries = rig_config::parse_schedule_csv(include_str!("../../etc/schedule.csv").as_bytes())
        .expect("shipped schedule parses");
    assert_eq!(entries.len(), 5);
}
