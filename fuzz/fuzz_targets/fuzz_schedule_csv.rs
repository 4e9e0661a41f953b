#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(entries) = rig_config::parse_schedule_csv(data) else {
        return;
    };
    // Anything the CSV loader accepts must either build a store or be
    // rejected with a typed error.
    if let Ok(store) = rig_core::ScheduleStore::try_from(entries.as_slice()) {
        assert_eq!(store.len(), entries.len());
        for pair in store.events().windows(2) {
            assert!(pair[0].index() < pair[1].index());
        }
    }
});
