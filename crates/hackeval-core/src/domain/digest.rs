//! Canonical JSON and SHA-256 digests.
//!
//! Results and configurations are fingerprinted over a canonical JSON form:
//! object keys sorted by UTF-16 code units, integer-valued floats collapsed to
//! integers, NaN/Infinity rejected, compact output. Two values that serialize
//! to the same canonical text always share a digest.

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::error::{HackevalError, Result};

fn sort_keys_utf16(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(String, serde_json::Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.encode_utf16().cmp(b.encode_utf16()));

            let mut sorted = serde_json::Map::new();
            for (k, v) in entries {
                sorted.insert(k, sort_keys_utf16(v));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(sort_keys_utf16).collect())
        }
        other => other,
    }
}

fn normalize_value(value: serde_json::Value) -> Result<serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => {
            let mut normalized = serde_json::Map::new();
            for (k, v) in map {
                normalized.insert(k, normalize_value(v)?);
            }
            Ok(serde_json::Value::Object(normalized))
        }
        serde_json::Value::Array(arr) => Ok(serde_json::Value::Array(
            arr.into_iter()
                .map(normalize_value)
                .collect::<Result<Vec<_>>>()?,
        )),
        serde_json::Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                return Ok(serde_json::Value::Number(n));
            }
            match n.as_f64() {
                Some(f) if !f.is_finite() => Err(HackevalError::NonCanonical(
                    "NaN/Infinity not permitted in canonical JSON".to_string(),
                )),
                Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                    Ok(serde_json::Value::Number(serde_json::Number::from(f as i64)))
                }
                _ => Ok(serde_json::Value::Number(n)),
            }
        }
        other => Ok(other),
    }
}

/// Canonical compact JSON text for `value`.
pub fn canonical_json(value: &serde_json::Value) -> Result<String> {
    let normalized = normalize_value(value.clone())?;
    Ok(serde_json::to_string(&sort_keys_utf16(normalized))?)
}

/// SHA-256 hex digest of the canonical JSON of `value`.
pub fn compute_digest(value: &serde_json::Value) -> Result<String> {
    let canonical = canonical_json(value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Serialize any value and digest its canonical form.
pub fn digest_of<T: Serialize>(value: &T) -> Result<String> {
    compute_digest(&serde_json::to_value(value)?)
}
