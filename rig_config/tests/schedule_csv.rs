use std::fs::File;
use std::io::Write;

use proptest::prelude::*;
use rig_config::{EventType, ScheduleEntry, load_schedule_csv, parse_schedule_csv};
use rstest::rstest;
use tempfile::tempdir;

#[rstest]
fn parses_rows_in_order() {
    let csv = "Time_HMS,Type,Event_Index\n07:00:00,Flush,1\n07:30:15,Use,2\n23:59:59,use,7\n";
    let rows = parse_schedule_csv(csv.as_bytes()).unwrap();
    assert_eq!(
        rows,
        vec![
            ScheduleEntry {
                index: 1,
                hour: 7,
                minute: 0,
                kind: EventType::Flush
            },
            ScheduleEntry {
                index: 2,
                hour: 7,
                minute: 30,
                kind: EventType::Use
            },
            ScheduleEntry {
                index: 7,
                hour: 23,
                minute: 59,
                kind: EventType::Use
            },
        ]
    );
}

#[rstest]
fn extra_columns_and_order_are_tolerated() {
    let csv = "Event_Index,Day,Type,Time_HMS\n3,Mon,Use,08:05:00\n";
    let rows = parse_schedule_csv(csv.as_bytes()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!((rows[0].index, rows[0].hour, rows[0].minute), (3, 8, 5));
}

#[rstest]
#[case("Time,Type,Event_Index\n", "missing: Time_HMS")]
#[case("Time_HMS,Type,Event_Index\n7h00,Use,1\n", "bad Time_HMS")]
#[case("Time_HMS,Type,Event_Index\n07:00:00,Drain,1\n", "unknown event type")]
#[case("Time_HMS,Type,Event_Index\n07:00:00,Use,x\n", "invalid schedule row 2")]
#[case("Time_HMS,Type,Event_Index\n07:00:00,Use,2\n08:00:00,Use,2\n", "must be greater than 2")]
fn rejects_bad_schedules(#[case] csv: &str, #[case] needle: &str) {
    let err = parse_schedule_csv(csv.as_bytes()).expect_err("should reject");
    assert!(
        format!("{err}").contains(needle),
        "expected {needle:?} in {err}"
    );
}

#[rstest]
fn loads_from_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("schedule.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "Time_HMS,Type,Event_Index").unwrap();
    writeln!(f, "06:45:00,Use,1").unwrap();
    let rows = load_schedule_csv(&path).unwrap();
    assert_eq!(rows[0].kind, EventType::Use);
}

#[rstest]
fn missing_file_names_the_path() {
    let dir = tempdir().unwrap();
    let err = load_schedule_csv(&dir.path().join("nope.csv")).expect_err("missing file");
    assert!(format!("{err}").contains("nope.csv"));
}

proptest! {
    #[test]
    fn parsed_indices_are_strictly_increasing(
        rows in proptest::collection::vec((0u32..24, 0u32..60, 0u64..1000, any::<bool>()), 0..40)
    ) {
        let mut csv = String::from("Time_HMS,Type,Event_Index\n");
        for (h, m, idx, flush) in &rows {
            let kind = if *flush { "Flush" } else { "Use" };
            csv.push_str(&format!("{h:02}:{m:02}:00,{kind},{idx}\n"));
        }
        if let Ok(entries) = parse_schedule_csv(csv.as_bytes()) {
            prop_assert_eq!(entries.len(), rows.len());
            for w in entries.windows(2) {
                prop_assert!(w[0].index < w[1].index);
            }
            for e in &entries {
                prop_assert!(e.hour < 24 && e.minute < 60);
            }
        }
    }
}
