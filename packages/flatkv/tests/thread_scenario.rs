//! Many threads against one store, in both lock modes.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flatkv::workload::{self, StressPlan, STRESS_KEYS};
use flatkv::{AccessorConfig, LockMode, SyncAccessor};
use flatkv_core::Value;

fn config(dir: &tempfile::TempDir, mode: LockMode) -> AccessorConfig {
    AccessorConfig::new(dir.path().join("store.bin"))
        .with_max_readers(10)
        .with_mode(mode)
        .with_lock_timeout(Duration::from_secs(60))
}

fn readers_and_writers_keep_layout(mode: LockMode) {
    let dir = tempfile::tempdir().unwrap();
    let accessor =
        SyncAccessor::create(&config(&dir, mode), workload::seed_snapshot(STRESS_KEYS)).unwrap();

    let plan = StressPlan {
        readers: 10,
        writers: 18,
        loops: 10,
        pause: Duration::from_millis(2),
    };
    workload::run_thread_stress(&accessor, plan).unwrap();

    let snapshot = accessor.snapshot().unwrap();
    assert_eq!(snapshot.len(), STRESS_KEYS);
    for k in 0..10 {
        assert_eq!(snapshot[&k.to_string()], Value::Bool(false), "key {k}");
    }
    let problems = workload::verify_stress_snapshot(&snapshot, plan.writers);
    assert!(problems.is_empty(), "{problems:?}");
}

#[test]
fn thread_mode_readers_and_writers_keep_layout() {
    readers_and_writers_keep_layout(LockMode::Threads);
}

#[test]
fn process_mode_readers_and_writers_keep_layout() {
    readers_and_writers_keep_layout(LockMode::Processes);
}

/// Separate accessors, each with its own cache, writing disjoint keys. A
/// write that reloaded a stale file or dumped outside exclusion would
/// drop someone else's keys.
fn no_write_is_lost(mode: LockMode) {
    const WRITERS: usize = 6;
    const KEYS_PER_WRITER: usize = 15;

    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir, mode);
    let seed: SyncAccessor<String, Value> = SyncAccessor::create(&config, HashMap::new()).unwrap();
    let lock = seed.shared_lock();

    thread::scope(|scope| {
        for writer in 0..WRITERS {
            let config = config.clone();
            let lock = Arc::clone(&lock);
            scope.spawn(move || {
                let accessor: SyncAccessor<String, Value> = match mode {
                    LockMode::Threads => SyncAccessor::with_lock(&config, lock),
                    LockMode::Processes => SyncAccessor::open(&config).unwrap(),
                };
                for n in 0..KEYS_PER_WRITER {
                    let key = format!("w{writer}-{n}");
                    let value = Value::Int(i64::try_from(n).unwrap());
                    assert!(accessor.set(key, value).unwrap());
                }
            });
        }
    });

    let snapshot = seed.snapshot().unwrap();
    assert_eq!(snapshot.len(), WRITERS * KEYS_PER_WRITER);
    assert_eq!(snapshot["w3-7"], Value::Int(7));
}

#[test]
fn thread_mode_no_write_is_lost() {
    no_write_is_lost(LockMode::Threads);
}

#[test]
fn process_mode_no_write_is_lost() {
    no_write_is_lost(LockMode::Processes);
}

#[test]
fn deletes_interleave_with_sets() {
    let dir = tempfile::tempdir().unwrap();
    let accessor = Arc::new(
        SyncAccessor::create(
            &config(&dir, LockMode::Threads),
            workload::seed_snapshot(STRESS_KEYS),
        )
        .unwrap(),
    );

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let accessor = Arc::clone(&accessor);
            thread::spawn(move || {
                for k in (t..STRESS_KEYS).step_by(4) {
                    let key = k.to_string();
                    assert_eq!(accessor.delete(&key).unwrap(), Value::Bool(false));
                    assert!(accessor.delete(&key).is_err());
                    assert!(accessor.set(key, Value::Null).unwrap());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let snapshot = accessor.snapshot().unwrap();
    assert_eq!(snapshot.len(), STRESS_KEYS);
    assert!(snapshot.values().all(|v| *v == Value::Null));
}
