#![no_main]
use libfuzzer_sys::fuzz_target;
use rig_core::protocol::decode_frame;

fuzz_target!(|data: &[u8]| {
    if let Ok(resp) = decode_frame(data) {
        if let Some(p) = resp.payload() {
            assert!(p.chars().all(|c| !c.is_control()));
        }
    }
});
