//! BLAKE3 digests and canonical payload encoding.
//!
//! A proof digest commits to the allow-listed fields of an application
//! payload. Fields outside the allow-list never reach the hasher, so a payload
//! that carries personal data next to its claim fields still produces a digest
//! over the claim alone.
//!
//! The canonical form is compact JSON with object keys sorted at every depth,
//! which makes the digest independent of the key order the caller used.

use fedrelay_core::Digest;
use serde_json::{Map, Value};

/// BLAKE3 hash of arbitrary bytes
pub fn hash(bytes: &[u8]) -> Digest {
    *blake3::hash(bytes).as_bytes()
}

/// Hash two nodes in order: `H(left || right)`
pub fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

/// Canonical bytes of the allow-listed top-level fields of `payload`
pub fn canonicalize(payload: &Map<String, Value>, allow_list: &[String]) -> Vec<u8> {
    let mut keys: Vec<&String> = payload
        .keys()
        .filter(|k| allow_list.iter().any(|a| a == *k))
        .collect();
    keys.sort();

    let mut out = Vec::with_capacity(64);
    out.push(b'{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        write_string(key, &mut out);
        out.push(b':');
        if let Some(value) = payload.get(key) {
            write_canonical(value, &mut out);
        }
    }
    out.push(b'}');
    out
}

/// Digest of the canonical form of `payload`
pub fn payload_digest(payload: &Map<String, Value>, allow_list: &[String]) -> Digest {
    hash(&canonicalize(payload, allow_list))
}

/// Sorted names of the fields that `canonicalize` keeps
pub fn payload_fields(payload: &Map<String, Value>, allow_list: &[String]) -> Vec<String> {
    let mut fields: Vec<String> = payload
        .keys()
        .filter(|k| allow_list.iter().any(|a| a == *k))
        .cloned()
        .collect();
    fields.sort();
    fields
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push(b'{');
            for (i, (key, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out);
                out.push(b':');
                write_canonical(v, out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(v, out);
            }
            out.push(b']');
        }
        // Scalars have a single compact JSON rendering
        scalar => out.extend_from_slice(scalar.to_string().as_bytes()),
    }
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(Value::String(s.to_string()).to_string().as_bytes());
}
