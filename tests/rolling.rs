//! End-to-end tests for the rolling facade against real temp files: rolls
//! across file boundaries, fires listeners in order, and rejects records
//! that could never fit a single file.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use daq_appendlog::builder::{AppendLogBuilder, RollConfig};
use daq_appendlog::error::AppendLogError;
use daq_appendlog::roller::RollListeners;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .try_init();
}

#[test]
fn rolling_facade_spans_multiple_files_and_preserves_bytes() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let appender = AppendLogBuilder::new(dir.path(), 32)
        .with_roll(RollConfig::new().with_file_name_prefix("seg-"))
        .build()
        .unwrap();

    let mut offsets = Vec::new();
    for i in 0..10u8 {
        let record = [i; 8];
        offsets.push(appender.write(&record).unwrap());
    }
    assert!(offsets.iter().all(Option::is_some));

    let mut files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    files.sort();
    assert!(files.len() >= 3, "expected at least 3 rolled files, got {}", files.len());

    let mut all_bytes = Vec::new();
    for file in &files {
        all_bytes.extend(std::fs::read(file).unwrap());
    }
    for i in 0..10u8 {
        let needle = [i; 8];
        assert!(
            all_bytes.windows(8).any(|w| w == needle),
            "record {i} missing from rolled output"
        );
    }
}

#[test]
fn rolling_facade_fires_listeners_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let listeners = {
        let created = Arc::clone(&events);
        let mapped = Arc::clone(&events);
        let complete = Arc::clone(&events);
        let closed = Arc::clone(&events);
        RollListeners {
            on_file_created: Some(Box::new(move |_| created.lock().unwrap().push("created"))),
            on_file_mapped: Some(Box::new(move |_| mapped.lock().unwrap().push("mapped"))),
            on_file_complete: Some(Box::new(move |_| complete.lock().unwrap().push("complete"))),
            on_file_closed: Some(Box::new(move |_| closed.lock().unwrap().push("closed"))),
        }
    };

    let appender = AppendLogBuilder::new(dir.path(), 16)
        .with_roll(RollConfig::new().with_listeners(listeners))
        .build()
        .unwrap();

    for _ in 0..4 {
        appender.write(&[0u8; 8]).unwrap();
    }

    let seen = events.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec!["created", "mapped", "complete", "closed"],
        "roll lifecycle events fired out of order: {seen:?}"
    );
}

#[test]
fn rolling_facade_rejects_oversized_record_without_rolling() {
    let dir = tempfile::tempdir().unwrap();
    let appender = AppendLogBuilder::new(dir.path(), 16)
        .with_roll(RollConfig::new())
        .build()
        .unwrap();

    let err = appender.write(&[0u8; 17]).unwrap_err();
    assert!(matches!(err, AppendLogError::CapacityExceeded { record_len: 17, usable_capacity: 16 }));

    // No file should have been created by the rejected write.
    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1, "oversized write should not allocate a file");
}

#[test]
fn rolling_facade_never_reports_finished() {
    let dir = tempfile::tempdir().unwrap();
    let appender = AppendLogBuilder::new(dir.path(), 16)
        .with_roll(RollConfig::new())
        .build()
        .unwrap();

    for _ in 0..5 {
        appender.write(&[0u8; 8]).unwrap();
    }
    assert!(!appender.is_finished());
}

#[test]
fn concurrent_writers_each_see_every_record_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let appender = Arc::new(
        AppendLogBuilder::new(dir.path(), 64)
            .with_roll(RollConfig::new().with_file_name_prefix("w-"))
            .build()
            .unwrap(),
    );

    let writes = Arc::new(AtomicUsize::new(0));
    let threads: Vec<_> = (0..6)
        .map(|_| {
            let appender = Arc::clone(&appender);
            let writes = Arc::clone(&writes);
            std::thread::spawn(move || {
                for _ in 0..20 {
                    loop {
                        if appender.write(&[0xAB; 8]).unwrap().is_some() {
                            writes.fetch_add(1, Ordering::SeqCst);
                            break;
                        }
                    }
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(writes.load(Ordering::SeqCst), 120);

    let total_bytes: u64 = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| std::fs::metadata(e.unwrap().path()).unwrap().len())
        .sum();
    assert_eq!(total_bytes, 120 * 8);
}
