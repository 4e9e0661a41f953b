use rig_hardware::SimulatedBus;
use rig_hardware::error::HwError;
use rig_traits::Bus;
use rstest::rstest;

#[rstest]
#[case(b"I\0", b"\x01?I,pH,1.98")]
#[case(b"Cal,mid,7.00\0", b"\x01")]
#[case(b"Status\0", b"\x01")]
fn answers_command_set(#[case] cmd: &[u8], #[case] expected: &[u8]) {
    let mut bus = SimulatedBus::pipe_rig();
    bus.set_target(0x63).unwrap();
    bus.send(cmd).unwrap();
    let frame = bus.receive(31).unwrap();
    assert_eq!(&frame[..expected.len()], expected);
    assert!(frame[expected.len()..].iter().all(|b| *b == 0));
}

#[rstest]
fn sleep_leaves_nothing_to_read() {
    let mut bus = SimulatedBus::pipe_rig();
    bus.set_target(0x61).unwrap();
    bus.send(b"SLEEP\0").unwrap();
    let frame = bus.receive(4).unwrap();
    assert_eq!(frame, vec![255, 0, 0, 0]);
}

#[rstest]
fn absent_device_is_an_error() {
    let mut bus = SimulatedBus::pipe_rig().without_device(0x66);
    bus.set_target(0x66).unwrap();
    let err = bus.send(b"R\0").expect_err("absent device");
    match err.downcast_ref::<HwError>() {
        Some(HwError::NoDevice(0x66)) => {}
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(bus.receive(31).is_err());
}

#[rstest]
fn forced_status_is_reported() {
    let mut bus = SimulatedBus::pipe_rig().with_status(0x62, 2);
    bus.set_target(0x62).unwrap();
    bus.send(b"R\0").unwrap();
    let frame = bus.receive(31).unwrap();
    assert_eq!(frame[0], 2);
}

#[rstest]
fn transfers_without_target_fail() {
    let mut bus = SimulatedBus::pipe_rig();
    let err = bus.send(b"R\0").expect_err("no target");
    assert!(err.to_string().contains("no bus target"));
}
