//! Canonical hashing of JSON values.
//!
//! Every JSON value hashes to `SHA-256(tag || payload)`, so two documents that
//! differ only in key order or whitespace hash the same. Redacted subtrees are
//! replaced on the wire by a marker string carrying their hash, which lets a
//! reader verify a document they cannot fully see.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::types::{to_hash, Hash};

/// Prefix of a string standing in for a redacted subtree.
pub const REDACTED_PREFIX: &str = "***REDACTED*** Hash: ";

const MAX_FLOAT_LEN: usize = 1000;

fn tagged(tag: u8, payload: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([tag]);
    hasher.update(payload);
    hasher.finalize().into()
}

/// Object hash of a JSON value.
pub fn object_hash(value: &Value) -> Result<Hash> {
    hash_value(value, None)
}

/// Object hash that honours redaction markers.
pub fn object_hash_with_redaction(value: &Value) -> Result<Hash> {
    hash_value(value, Some(REDACTED_PREFIX))
}

fn hash_value(value: &Value, redaction: Option<&str>) -> Result<Hash> {
    match value {
        Value::Null => Ok(tagged(b'n', b"")),
        Value::Bool(b) => Ok(tagged(b'b', if *b { b"1" } else { b"0" })),
        Value::Number(n) => {
            let f = n
                .as_f64()
                .ok_or_else(|| Error::Decode(format!("number out of range: {n}")))?;
            Ok(tagged(b'f', normalize_float(f)?.as_bytes()))
        }
        Value::String(s) => match redaction.and_then(|prefix| s.strip_prefix(prefix)) {
            Some(digest) => {
                let bytes = hex::decode(digest)?;
                to_hash(&bytes)
                    .ok_or_else(|| Error::Decode("redacted hash must be 32 bytes".into()))
            }
            None => Ok(tagged(b'u', s.as_bytes())),
        },
        Value::Array(items) => {
            let mut payload = Vec::with_capacity(items.len() * 32);
            for item in items {
                payload.extend_from_slice(&hash_value(item, redaction)?);
            }
            Ok(tagged(b'l', &payload))
        }
        Value::Object(map) => hash_object(map, redaction),
    }
}

fn hash_object(map: &Map<String, Value>, redaction: Option<&str>) -> Result<Hash> {
    let mut pairs = Vec::with_capacity(map.len());
    for (k, v) in map {
        let mut pair = Vec::with_capacity(64);
        pair.extend_from_slice(&tagged(b'u', k.as_bytes()));
        pair.extend_from_slice(&hash_value(v, redaction)?);
        pairs.push(pair);
    }
    pairs.sort();
    Ok(tagged(b'd', &pairs.concat()))
}

/// Canonical text form of a float: sign, binary exponent, then mantissa bits.
pub fn normalize_float(original: f64) -> Result<String> {
    if !original.is_finite() {
        return Err(Error::Decode(format!("cannot hash float {original}")));
    }
    if original == 0.0 {
        return Ok("+0:".to_string());
    }

    let mut f = original;
    let mut s = String::from(if f < 0.0 { "-" } else { "+" });
    if f < 0.0 {
        f = -f;
    }

    let mut e: i32 = 0;
    while f > 1.0 {
        f /= 2.0;
        e += 1;
    }
    while f <= 0.5 {
        f *= 2.0;
        e -= 1;
    }
    s.push_str(&format!("{e}:"));

    while f != 0.0 {
        if f >= 1.0 {
            s.push('1');
            f -= 1.0;
        } else {
            s.push('0');
        }
        if s.len() >= MAX_FLOAT_LEN {
            return Err(Error::Decode(format!("cannot normalize float {original}")));
        }
        f *= 2.0;
    }
    Ok(s)
}

/// Strip the `[nonce, value]` wrappers that make a document redactable,
/// dropping redacted members.
pub fn shed_redactable(value: &Value) -> Result<Value> {
    match value {
        Value::Array(items) => {
            items.iter().map(shed_redactable).collect::<Result<Vec<_>>>().map(Value::Array)
        }
        Value::Object(map) => {
            let mut shed = Map::new();
            for (k, v) in map {
                match v {
                    Value::String(s) if s.starts_with(REDACTED_PREFIX) => continue,
                    Value::Array(pair) if pair.len() == 2 && pair[0].is_string() => {
                        shed.insert(k.clone(), shed_redactable(&pair[1])?);
                    }
                    _ => {
                        return Err(Error::Decode(format!(
                            "member {k} is neither redacted nor salted"
                        )))
                    }
                }
            }
            Ok(Value::Object(shed))
        }
        other => Ok(other.clone()),
    }
}
