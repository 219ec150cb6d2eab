//! Cached property reads and writes.
//!
//! These are the slow-path/fast-path pairs an interpreter calls from a
//! `get_field`/`put_field` site. A hit reads or writes the slot directly;
//! a miss walks the heap and fills the cache.

use core_types::{AtomId, GcRef, MemoryResult, Value};
use memory_manager::{Heap, PropFlags};
use tracing::warn;

use crate::cache::InlineCache;

/// Reads `atom` from `obj` through `cache`.
///
/// Returns a counted copy of the value, `undefined` when the property is
/// absent. Only plain data properties are cached.
pub fn get_property_cached(
    heap: &mut Heap,
    cache: &mut InlineCache,
    obj: GcRef,
    atom: AtomId,
) -> Value {
    if let Some(hit) = cache.lookup(heap, atom, obj) {
        if let Some(v) = heap.read_slot(hit.proto.unwrap_or(obj), hit.offset) {
            return v;
        }
    }

    let Some(loc) = heap.lookup_property(obj, atom) else {
        return Value::Undefined;
    };
    if loc.flags.is_data() {
        let proto = (loc.depth > 0).then_some(loc.holder);
        if let Err(err) = cache.update(heap, atom, obj, loc.offset, proto) {
            warn!(%atom, error = %err, "inline cache update failed");
        }
    }
    heap.read_slot(loc.holder, loc.offset)
        .unwrap_or(Value::Undefined)
}

/// Writes `value` to `atom` of `obj` through `cache`, taking ownership of
/// `value`.
///
/// Behaves like [`Heap::set_property`]. Only own writable data properties
/// take the fast path.
pub fn set_property_cached(
    heap: &mut Heap,
    cache: &mut InlineCache,
    obj: GcRef,
    atom: AtomId,
    value: Value,
) -> MemoryResult<bool> {
    if let Some(hit) = cache.lookup(heap, atom, obj) {
        if hit.proto.is_none() && is_plain_writable(hit.flags) {
            heap.write_slot(obj, hit.offset, value);
            return Ok(true);
        }
    }

    if !heap.set_property(obj, atom, value)? {
        return Ok(false);
    }
    if let Some((offset, flags)) = heap.find_own_property(obj, atom) {
        if is_plain_writable(flags) {
            if let Err(err) = cache.update(heap, atom, obj, offset, None) {
                warn!(%atom, error = %err, "inline cache update failed");
            }
        }
    }
    Ok(true)
}

fn is_plain_writable(flags: PropFlags) -> bool {
    flags.is_data() && flags.contains(PropFlags::WRITABLE)
}
