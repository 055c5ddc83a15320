//! Recursive property-bag merge.
//!
//! Merging walks the incoming bag key by key. When both sides hold an object
//! under the same key the merge recurses into it; any other combination
//! (scalar, array, null, or a type change) is overwritten by the incoming
//! value. Keys present only in the target are left alone.
//!
//! There is no conflict detection: the last write to a leaf wins, in the
//! order actions are applied.

use serde_json::Value;
use tandem_protocol::PropertyBag;

/// Merge `incoming` into `target` in place.
///
/// `target` is owned exclusively by the caller; nothing inside it can be
/// aliased by another state snapshot, so recursing into nested objects never
/// leaks a write into older state.
pub fn merge_properties(target: &mut PropertyBag, incoming: PropertyBag) {
    for (key, value) in incoming {
        match value {
            Value::Object(nested) => match target.get_mut(&key) {
                Some(Value::Object(existing)) => merge_properties(existing, nested),
                _ => {
                    target.insert(key, Value::Object(nested));
                }
            },
            other => {
                target.insert(key, other);
            }
        }
    }
}

/// Return the merge of `incoming` into a copy of `existing`.
#[must_use]
pub fn merged(existing: &PropertyBag, incoming: &PropertyBag) -> PropertyBag {
    let mut out = existing.clone();
    merge_properties(&mut out, incoming.clone());
    out
}
