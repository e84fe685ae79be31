//! Content hashes for envelopes.
//!
//! The HMAC key is fixed and public. The hash detects change; it does not
//! authenticate anything.

use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use svchost_core::{HostError, Result};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const HASH_KEY: &[u8] = b"a secret";

/// UUIDv5 namespace for envelope ids.
pub const OBJECT_NAMESPACE: Uuid = Uuid::from_u128(0x9599_7416_503b_440d_ae19_cd60_db51_ab5a);

/// Envelope fields excluded from hashing.
pub const VOLATILE_FIELDS: [&str; 3] = ["$id", "$hash", "$prototype"];

/// Hex HMAC-SHA256 over the canonical JSON of `body`, with the
/// [`VOLATILE_FIELDS`] removed from the top level.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use svchost_web::protocol::content_hash;
///
/// let a = content_hash(&json!({"x": 1, "y": 2, "$hash": "old"}))?;
/// let b = content_hash(&json!({"y": 2, "x": 1}))?;
/// assert_eq!(a, b);
/// # Ok::<(), svchost_core::HostError>(())
/// ```
///
/// # Errors
///
/// [`HostError::Unexpected`] if the MAC cannot be keyed.
pub fn content_hash(body: &Value) -> Result<String> {
    let mut text = String::new();
    match body {
        Value::Object(map) => write_object(map, true, &mut text),
        other => write_canonical(other, &mut text),
    }

    let mut mac = HmacSha256::new_from_slice(HASH_KEY).map_err(HostError::unexpected)?;
    mac.update(text.as_bytes());
    Ok(format!("{:x}", mac.finalize().into_bytes()))
}

/// `($id, $hash)` for `body`.
///
/// # Errors
///
/// See [`content_hash`].
pub fn content_ids(body: &Value) -> Result<(Uuid, String)> {
    let hash = content_hash(body)?;
    Ok((Uuid::new_v5(&OBJECT_NAMESPACE, hash.as_bytes()), hash))
}

/// Insert `$id` and `$hash` into an envelope.
///
/// # Errors
///
/// See [`content_hash`]; the envelope is left unstamped.
pub fn stamp(envelope: &mut Map<String, Value>) -> Result<()> {
    let body = Value::Object(std::mem::take(envelope));
    let ids = content_ids(&body);
    if let Value::Object(map) = body {
        *envelope = map;
    }
    let (id, hash) = ids?;
    envelope.insert("$id".to_string(), Value::String(id.to_string()));
    envelope.insert("$hash".to_string(), Value::String(hash));
    Ok(())
}

/// Sorted-key JSON, independent of the map's iteration order.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_object(map, false, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_object(map: &Map<String, Value>, skip_volatile: bool, out: &mut String) {
    let mut keys: Vec<&String> = map
        .keys()
        .filter(|key| !(skip_volatile && VOLATILE_FIELDS.contains(&key.as_str())))
        .collect();
    keys.sort();

    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(&map[key.as_str()], out);
    }
    out.push('}');
}
