//! # canonical
//!
//! why: signatures must cover the logical content, not incidental field order
//! relations: used by signature.rs to hash proofs and bodies
//! what: sorted-key json rendering and sha-512 over it

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha512};

use crate::error::Result;

/// render `value` as compact json with object keys in ascending order
pub fn canonicalize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    let mut out = Vec::new();
    write_value(&value, &mut out)?;
    Ok(out)
}

/// sha-512 of the canonical form
pub fn canonicalize_and_hash<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let bytes = canonicalize(value)?;
    Ok(Sha512::digest(&bytes).to_vec())
}

// keys are sorted here rather than trusting the map type, since another crate
// in the graph may switch serde_json to insertion order
fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push(b'{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_value(val, out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}
