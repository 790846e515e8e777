//! Single-threaded operation sequences against the accessor behave exactly
//! like a plain `HashMap`, and the file always matches after each step.

use std::collections::HashMap;

use flatkv::{AccessError, AccessorConfig, LockMode, SyncAccessor};
use flatkv_core::Value;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Get(u8),
    Set(u8, i64),
    Delete(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6).prop_map(Op::Get),
        (0u8..6, any::<i64>()).prop_map(|(k, v)| Op::Set(k, v)),
        (0u8..6).prop_map(Op::Delete),
    ]
}

fn mode() -> impl Strategy<Value = LockMode> {
    prop_oneof![Just(LockMode::Threads), Just(LockMode::Processes)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn accessor_matches_hashmap(mode in mode(), ops in proptest::collection::vec(op(), 1..40)) {
        let dir = tempfile::tempdir().unwrap();
        let config = AccessorConfig::new(dir.path().join("store.bin"))
            .with_max_readers(2)
            .with_mode(mode);
        let accessor = SyncAccessor::create(&config, HashMap::new()).unwrap();
        let mut model: HashMap<String, Value> = HashMap::new();

        for op in ops {
            match op {
                Op::Get(k) => {
                    let key = k.to_string();
                    prop_assert_eq!(accessor.get(&key).unwrap(), model.get(&key).cloned());
                }
                Op::Set(k, v) => {
                    prop_assert!(accessor.set(k.to_string(), Value::Int(v)).unwrap());
                    model.insert(k.to_string(), Value::Int(v));
                }
                Op::Delete(k) => {
                    let key = k.to_string();
                    match (accessor.delete(&key), model.remove(&key)) {
                        (Ok(got), Some(expected)) => prop_assert_eq!(got, expected),
                        (Err(AccessError::KeyNotFound { .. }), None) => {}
                        (got, expected) => {
                            prop_assert!(false, "delete {key}: got {got:?}, expected {expected:?}");
                        }
                    }
                }
            }
        }

        let reopened: SyncAccessor<String, Value> = SyncAccessor::open(&config).unwrap();
        prop_assert_eq!(reopened.snapshot().unwrap(), model);
    }
}
