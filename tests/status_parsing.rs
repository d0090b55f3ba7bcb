use std::io::Write;

use proptest::prelude::*;

use dagrun::history::{parse_status_file, RunStatus, Status};

fn status_strategy() -> impl Strategy<Value = Status> {
    ("[a-z0-9]{1,16}", 0u8..=5u8).prop_map(|(request_id, raw)| {
        let mut s = Status {
            name: "wf".to_string(),
            request_id,
            ..Status::default()
        };
        let state = RunStatus::try_from(raw).unwrap();
        s.set_status(state);
        s
    })
}

proptest! {
    // The file is a log whose value is the fold of its lines with
    // "use the latest decodable line" as the combiner: any amount of
    // undecodable interleaved or trailing bytes never changes the answer.
    #[test]
    fn parse_returns_the_last_decodable_line(
        statuses in proptest::collection::vec(status_strategy(), 1..8),
        garbage in "\\{[a-z :,]{0,40}",
        garbage_in_the_middle in proptest::bool::ANY,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.dat");

        {
            let mut f = std::fs::File::create(&path).unwrap();
            for (i, status) in statuses.iter().enumerate() {
                if garbage_in_the_middle && i == statuses.len() / 2 {
                    writeln!(f, "{garbage}").unwrap();
                }
                writeln!(f, "{}", status.to_json().unwrap()).unwrap();
            }
            // Torn trailing write, no newline.
            f.write_all(garbage.as_bytes()).unwrap();
        }

        let parsed = parse_status_file(&path).unwrap();
        let last = statuses.last().unwrap();
        prop_assert_eq!(&parsed, last);
    }

    #[test]
    fn serialize_then_parse_is_identity(status in status_strategy()) {
        let parsed = Status::from_json(&status.to_json().unwrap()).unwrap();
        prop_assert_eq!(parsed, status);
    }
}
