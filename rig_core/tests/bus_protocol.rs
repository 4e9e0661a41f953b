use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use rig_core::mocks::{BusEvent, RecordingBus};
use rig_core::{BusError, BusLink, BusTimings, Response, ResponseStatus, SensorClient};
use rig_hardware::SimulatedBus;
use rig_traits::{Clock, ManualClock};
use rstest::rstest;

fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 4, 18)
        .and_then(|d| d.and_hms_opt(8, 0, 0))
        .unwrap()
}

fn recorded_link(
    sim: SimulatedBus,
    timings: BusTimings,
) -> (BusLink<RecordingBus<SimulatedBus>>, rig_core::mocks::BusRecorder) {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(ManualClock::starting_at(t0()));
    let bus = RecordingBus::new(sim, clock.clone()).with_hold(Duration::from_micros(200));
    let rec = bus.recorder();
    (BusLink::open(bus, timings, clock), rec)
}

#[test]
fn concurrent_clients_never_interleave() {
    let (link, rec) = recorded_link(SimulatedBus::pipe_rig(), BusTimings::default());
    let ph = SensorClient::new("pH", 0x63, link.clone());
    let orp = SensorClient::new("ORP", 0x62, link.clone());
    let ec = SensorClient::new("EC", 0x65, link);

    std::thread::scope(|s| {
        s.spawn(|| {
            for _ in 0..25 {
                assert!(ph.read().unwrap().is_success());
            }
        });
        s.spawn(|| {
            for _ in 0..25 {
                assert_eq!(orp.identify(), "ORP");
            }
        });
        s.spawn(|| {
            for _ in 0..25 {
                assert!(ec.query("R").unwrap().is_success());
            }
        });
    });

    assert_eq!(rec.first_interleaving(), None);
    let sends = rec
        .events()
        .iter()
        .filter(|(_, e)| matches!(e, BusEvent::Send { .. }))
        .count();
    assert_eq!(sends, 75);
}

#[rstest]
#[case("R", 1500)]
#[case("r", 1500)]
#[case("Cal,mid,7.00", 1500)]
#[case("I", 500)]
#[case("Status", 500)]
fn receive_never_precedes_class_wait(#[case] command: &str, #[case] wait_ms: u64) {
    let (link, rec) = recorded_link(SimulatedBus::pipe_rig(), BusTimings::default());
    link.transact(0x61, command).unwrap();

    let events = rec.events();
    let sent = events
        .iter()
        .find(|(_, e)| matches!(e, BusEvent::Send { .. }))
        .map(|(t, _)| *t)
        .unwrap();
    let received = events
        .iter()
        .find(|(_, e)| matches!(e, BusEvent::Receive { .. }))
        .map(|(t, _)| *t)
        .unwrap();
    assert!((received - sent).to_std().unwrap() >= Duration::from_millis(wait_ms));
}

#[test]
fn sleep_command_is_never_read_back() {
    let (link, rec) = recorded_link(SimulatedBus::pipe_rig(), BusTimings::default());
    assert_eq!(link.transact(0x66, "SLEEP").unwrap(), Response::Sleeping);
    assert!(
        !rec.events()
            .iter()
            .any(|(_, e)| matches!(e, BusEvent::Receive { .. }))
    );
}

#[test]
fn custom_timings_are_honoured() {
    let timings = BusTimings {
        long_wait: Duration::from_millis(900),
        short_wait: Duration::from_millis(300),
        read_len: 16,
    };
    let clock = ManualClock::starting_at(t0());
    let link = BusLink::open(SimulatedBus::pipe_rig(), timings, Arc::new(clock.clone()));
    link.transact(0x63, "R").unwrap();
    link.transact(0x63, "I").unwrap();
    assert_eq!((clock.now() - t0()).num_milliseconds(), 1200);
}

#[test]
fn error_status_decodes_to_failed_response() {
    let (link, _) = recorded_link(
        SimulatedBus::pipe_rig().with_status(0x63, 2),
        BusTimings::default(),
    );
    let r = link.transact(0x63, "R").unwrap();
    assert_eq!(r, Response::Failed(ResponseStatus::SyntaxError));
    assert_eq!(r.to_string(), "Error reading response");
}

#[test]
fn absent_device_reports_io_error_with_address() {
    let (link, _) = recorded_link(
        SimulatedBus::pipe_rig().without_device(0x65),
        BusTimings::default(),
    );
    let ec = SensorClient::new("EC", 0x65, link);
    let err = ec.read().unwrap_err();
    assert!(matches!(err, BusError::Io { .. }));
    assert_eq!(err.address(), 0x65);
    assert_eq!(ec.identify(), "Error in communication");
}

#[test]
fn discovery_restores_previous_target() {
    let (link, rec) = recorded_link(SimulatedBus::pipe_rig(), BusTimings::default());
    let client = SensorClient::new("DO", 0x61, link.clone());
    client.read().unwrap();
    assert_eq!(client.list_devices(), vec![0x61, 0x62, 0x63, 0x65, 0x66]);
    assert_eq!(link.target(), Some(0x61));
    let last_target = rec
        .events()
        .iter()
        .rev()
        .find_map(|(_, e)| match e {
            BusEvent::Target(a) => Some(*a),
            _ => None,
        });
    assert_eq!(last_target, Some(0x61));
}

#[test]
fn sweep_without_prior_target_leaves_none_selected() {
    let sim = SimulatedBus::new()
        .with_device(0x61, "DO", 8.2)
        .with_device(0x7F, "EC", 480.0);
    let (link, rec) = recorded_link(sim, BusTimings::default());
    assert_eq!(link.target(), None);

    assert_eq!(link.list_devices(), vec![0x61, 0x7F]);
    assert_eq!(link.target(), None);

    // The sweep ended on 0x7F, but the next transaction still selects it.
    let before = rec.events().len();
    assert!(link.transact(0x7F, "R").unwrap().is_success());
    let after: Vec<BusEvent> = rec.events()[before..]
        .iter()
        .map(|(_, e)| e.clone())
        .collect();
    assert_eq!(after.first(), Some(&BusEvent::Target(0x7F)));
    assert_eq!(link.target(), Some(0x7F));
}
