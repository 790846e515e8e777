//! Reader/writer workloads used by the `flatkv` stress commands and the
//! integration tests.
//!
//! The stress layout: keys `"0"` to `"19"` start as `false`. Reader `i`
//! reads key `i % 20`. Writer `i` (numbered from 2) repeatedly writes
//! `Int(i)` to key `(i % 10) + 10`. Afterwards keys `0..10` must still be
//! `false` and keys `10..20` must hold some writer's number.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use flatkv_core::Value;
use rand::Rng;

use crate::accessor::SyncAccessor;
use crate::error::AccessError;

/// Keys in the stress snapshot.
pub const STRESS_KEYS: usize = 20;

/// Numbering of the first writer; writer numbers double as written values.
pub const FIRST_WRITER: usize = 2;

/// Keys `"0"..len` all mapped to `false`.
#[must_use]
pub fn seed_snapshot(len: usize) -> HashMap<String, Value> {
    (0..len).map(|k| (k.to_string(), Value::Bool(false))).collect()
}

#[must_use]
pub fn reader_key(index: usize) -> String {
    (index % STRESS_KEYS).to_string()
}

/// Key and value written by writer number `number`.
#[must_use]
pub fn writer_assignment(number: usize) -> (String, Value) {
    let half = STRESS_KEYS / 2;
    let key = (number % half + half).to_string();
    let value = Value::Int(i64::try_from(number).unwrap_or(i64::MAX));
    (key, value)
}

/// Writer numbers for `writers` writers.
pub fn writer_numbers(writers: usize) -> impl Iterator<Item = usize> {
    FIRST_WRITER..FIRST_WRITER + writers
}

/// Shape of one stress run.
#[derive(Debug, Clone, Copy)]
pub struct StressPlan {
    pub readers: usize,
    pub writers: usize,
    pub loops: usize,
    /// Upper bound of the random pause after each operation.
    pub pause: Duration,
}

/// `get(key)` `loops` times. Returns how many reads found a value.
///
/// # Errors
///
/// Stops at the first lock failure.
pub fn run_reader(
    accessor: &SyncAccessor<String, Value>,
    key: &str,
    loops: usize,
    pause: Duration,
) -> Result<usize, AccessError> {
    let key = key.to_string();
    let mut hits = 0;
    for _ in 0..loops {
        if accessor.get(&key)?.is_some() {
            hits += 1;
        }
        jitter(pause);
    }
    Ok(hits)
}

/// `set(key, value)` `loops` times. Returns how many writes were persisted.
///
/// # Errors
///
/// Stops at the first lock failure.
pub fn run_writer(
    accessor: &SyncAccessor<String, Value>,
    key: &str,
    value: &Value,
    loops: usize,
    pause: Duration,
) -> Result<usize, AccessError> {
    let mut persisted = 0;
    for _ in 0..loops {
        if accessor.set(key.to_string(), value.clone())? {
            persisted += 1;
        }
        jitter(pause);
    }
    Ok(persisted)
}

/// Runs every reader and writer of `plan` on its own thread against one
/// shared accessor and waits for all of them.
///
/// # Errors
///
/// Returns the first worker error after every worker has finished.
pub fn run_thread_stress(
    accessor: &SyncAccessor<String, Value>,
    plan: StressPlan,
) -> Result<(), AccessError> {
    let results: Vec<Result<usize, AccessError>> = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(plan.readers + plan.writers);
        for index in 0..plan.readers {
            let key = reader_key(index);
            handles.push(
                scope.spawn(move || run_reader(accessor, &key, plan.loops, plan.pause)),
            );
        }
        for number in writer_numbers(plan.writers) {
            let (key, value) = writer_assignment(number);
            handles.push(scope.spawn(move || {
                run_writer(accessor, &key, &value, plan.loops, plan.pause)
            }));
        }
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    });

    tracing::info!(
        readers = plan.readers,
        writers = plan.writers,
        loops = plan.loops,
        "stress run finished"
    );
    results.into_iter().try_for_each(|result| result.map(|_| ()))
}

/// Checks a post-stress snapshot: reader-only keys untouched, writer keys
/// holding the number of a writer assigned to them. Returns a description
/// of every violation.
#[must_use]
pub fn verify_stress_snapshot(
    snapshot: &HashMap<String, Value>,
    writers: usize,
) -> Vec<String> {
    let mut problems = Vec::new();
    let half = STRESS_KEYS / 2;
    for k in 0..STRESS_KEYS {
        let key = k.to_string();
        let Some(value) = snapshot.get(&key) else {
            problems.push(format!("key {key} missing"));
            continue;
        };
        let allowed: Vec<Value> = writer_numbers(writers)
            .map(writer_assignment)
            .filter(|(writer_key, _)| *writer_key == key)
            .map(|(_, value)| value)
            .collect();
        let ok = if k < half || allowed.is_empty() {
            *value == Value::Bool(false)
        } else {
            allowed.contains(value)
        };
        if !ok {
            problems.push(format!("key {key} holds unexpected {value}"));
        }
    }
    problems
}

fn jitter(pause: Duration) {
    let max_ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return;
    }
    let ms = rand::rng().random_range(0..=max_ms);
    thread::sleep(Duration::from_millis(ms));
}
