use std::error::Error;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Local, TimeZone};

use dagrun::dag::Dag;
use dagrun::scheduler::{invoker_fn, Entry, EntryKind, EntryReader, SchedulerLoop};

type TestResult = Result<(), Box<dyn Error>>;

struct FixedEntries {
    entries: Vec<Entry>,
    bases: Arc<Mutex<Vec<DateTime<Local>>>>,
}

impl EntryReader for FixedEntries {
    fn read(&self, base: DateTime<Local>) -> anyhow::Result<Vec<Entry>> {
        self.bases.lock().unwrap().push(base);
        Ok(self.entries.clone())
    }
}

fn entry(name: &str, kind: EntryKind, next: DateTime<Local>) -> Entry {
    Entry {
        dag: Arc::new(Dag {
            id: name.to_string(),
            name: name.to_string(),
            ..Dag::default()
        }),
        kind,
        next,
    }
}

#[tokio::test]
async fn tick_fires_due_entries_once_in_order() -> TestResult {
    let t = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 0).unwrap();
    let bases = Arc::new(Mutex::new(Vec::new()));

    let reader = Arc::new(FixedEntries {
        entries: vec![
            entry("b-at-tick", EntryKind::Start, t),
            entry("a-early", EntryKind::Start, t - Duration::seconds(2)),
            entry("c-future", EntryKind::Start, t + Duration::seconds(30)),
        ],
        bases: Arc::clone(&bases),
    });

    let dispatched: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&dispatched);
    let invoker = invoker_fn(move |e: Entry| {
        sink.lock().unwrap().push(e.dag.id.clone());
    });

    let scheduler = SchedulerLoop::new(reader, invoker);
    scheduler.run(t);

    // Exactly the two due entries, ordered by fire time; the future entry
    // waits for a later tick.
    let got = dispatched.lock().unwrap().clone();
    assert_eq!(got, vec!["a-early".to_string(), "b-at-tick".to_string()]);

    // The read window opens one second before the tick.
    let bases = bases.lock().unwrap();
    assert_eq!(bases.as_slice(), &[t - Duration::seconds(1)]);
    Ok(())
}

#[tokio::test]
async fn same_dag_may_fire_start_and_stop_on_one_tick() -> TestResult {
    let t = Local.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap();

    let reader = Arc::new(FixedEntries {
        entries: vec![
            entry("wf", EntryKind::Stop, t),
            entry("wf", EntryKind::Start, t - Duration::seconds(1)),
        ],
        bases: Arc::new(Mutex::new(Vec::new())),
    });

    let dispatched: Arc<Mutex<Vec<(String, EntryKind)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&dispatched);
    let invoker = invoker_fn(move |e: Entry| {
        sink.lock().unwrap().push((e.dag.id.clone(), e.kind));
    });

    let scheduler = SchedulerLoop::new(reader, invoker);
    scheduler.run(t);

    let got = dispatched.lock().unwrap().clone();
    assert_eq!(
        got,
        vec![
            ("wf".to_string(), EntryKind::Start),
            ("wf".to_string(), EntryKind::Stop),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn reader_failure_skips_the_tick() -> TestResult {
    struct FailingReader;
    impl EntryReader for FailingReader {
        fn read(&self, _base: DateTime<Local>) -> anyhow::Result<Vec<Entry>> {
            anyhow::bail!("directory unavailable")
        }
    }

    let dispatched: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&dispatched);
    let invoker = invoker_fn(move |_| {
        *sink.lock().unwrap() += 1;
    });

    let scheduler = SchedulerLoop::new(Arc::new(FailingReader), invoker);
    scheduler.run(Local::now());

    assert_eq!(*dispatched.lock().unwrap(), 0);
    Ok(())
}
