//! Whole-snapshot encoding.
//!
//! A store file holds exactly one `MessagePack` map: the full
//! `HashMap<K, V>`. There is no header, framing, or incremental record.

use std::collections::HashMap;

use flatkv_core::{StoreKey, StoreValue};

/// Encodes the full snapshot.
///
/// # Errors
///
/// Returns an error if a key or value fails to serialize.
pub fn encode<K: StoreKey, V: StoreValue>(
    entries: &HashMap<K, V>,
) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec(entries)
}

/// Decodes a full snapshot previously produced by [`encode`].
///
/// # Errors
///
/// Returns an error on truncated or foreign input.
pub fn decode<K: StoreKey, V: StoreValue>(
    bytes: &[u8],
) -> Result<HashMap<K, V>, rmp_serde::decode::Error> {
    rmp_serde::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use flatkv_core::Value;

    use super::*;

    #[test]
    fn integer_keys_survive_encoding() {
        let entries: HashMap<i64, Value> = (0..20).map(|k| (k, Value::Bool(false))).collect();
        let bytes = encode(&entries).unwrap();
        let decoded: HashMap<i64, Value> = decode(&bytes).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn empty_snapshot_encodes() {
        let entries: HashMap<String, Value> = HashMap::new();
        let decoded: HashMap<String, Value> = decode(&encode(&entries).unwrap()).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn truncated_input_is_rejected() {
        let entries: HashMap<String, Value> =
            [("a".to_string(), Value::from("some longer text"))].into_iter().collect();
        let bytes = encode(&entries).unwrap();
        let result: Result<HashMap<String, Value>, _> = decode(&bytes[..bytes.len() / 2]);
        assert!(result.is_err());
    }
}
