//! Canonical JSON and content hashing for capability payloads.
//!
//! Object keys are ordered by UTF-16 code units and integer-valued floats are
//! written as integers, so two manifests that differ only in key order or
//! `1.0` vs `1` hash identically.

use sha2::{Digest, Sha256};

use crate::domain::error::{CapctlError, Result};

fn canonicalize(value: &serde_json::Value) -> Result<serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));

            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key.as_str()])?);
            }
            Ok(serde_json::Value::Object(sorted))
        }
        serde_json::Value::Array(items) => Ok(serde_json::Value::Array(
            items.iter().map(canonicalize).collect::<Result<Vec<_>>>()?,
        )),
        serde_json::Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                return Ok(value.clone());
            }
            match n.as_f64() {
                Some(f) if !f.is_finite() => Err(CapctlError::InvalidRequest(
                    "NaN/Infinity not permitted in capability payloads".to_string(),
                )),
                Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                    Ok(serde_json::Value::Number(serde_json::Number::from(f as i64)))
                }
                _ => Ok(value.clone()),
            }
        }
        other => Ok(other.clone()),
    }
}

/// Compact canonical JSON text for `value`.
pub fn canonical_json(value: &serde_json::Value) -> Result<String> {
    Ok(serde_json::to_string(&canonicalize(value)?)?)
}

/// SHA-256 hex digest of the canonical JSON of `value`.
pub fn content_hash(value: &serde_json::Value) -> Result<String> {
    let canonical = canonical_json(value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_order_does_not_change_hash() {
        let a = serde_json::json!({"name": "svc", "spec": {"z": 1, "a": [3, 1]}});
        let b = serde_json::json!({"spec": {"a": [3, 1], "z": 1}, "name": "svc"});
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }

    #[test]
    fn test_array_order_is_significant() {
        let a = serde_json::json!({"deps": ["x", "y"]});
        let b = serde_json::json!({"deps": ["y", "x"]});
        assert_ne!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }

    #[test]
    fn test_integer_valued_floats_collapse() {
        let canonical = canonical_json(&serde_json::json!({"replicas": 3.0})).unwrap();
        assert_eq!(canonical, r#"{"replicas":3}"#);
        let canonical = canonical_json(&serde_json::json!({"ratio": 0.25})).unwrap();
        assert_eq!(canonical, r#"{"ratio":0.25}"#);
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        let digest = content_hash(&serde_json::json!({"id": "svc-a"})).unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
