//! Contract tests checking the exported inline_cache API and its signatures.

use core_types::{AtomId, MemoryResult, Value};
use inline_cache::{
    get_property_cached, set_property_cached, IcHit, IcStats, InlineCache, Watchpoint,
    IC_CACHE_ITEM_CAPACITY, IC_MAX_PROTO_DEPTH,
};
use memory_manager::{Heap, PropFlags};

/// Test constants contract: ring capacity and prototype depth
#[test]
fn contract_constants() {
    assert_eq!(IC_CACHE_ITEM_CAPACITY, 4);
    assert_eq!(IC_MAX_PROTO_DEPTH, 4);
}

/// Test InlineCache contract: new() -> Self, stats() -> IcStats
#[test]
fn contract_inline_cache_new() {
    let ic = InlineCache::new();
    assert_eq!(ic.stats(), IcStats::default());
}

/// Test InlineCache contract: update(heap, atom, obj, offset, proto) -> MemoryResult<bool>
#[test]
fn contract_inline_cache_update() {
    let mut heap = Heap::new();
    let obj = heap.new_object(None).unwrap();
    heap.define_property(obj, AtomId::from_raw(2), PropFlags::C_W_E, Value::Smi(1))
        .unwrap();
    let mut ic = InlineCache::new();
    let cached: MemoryResult<bool> = ic.update(&heap, AtomId::from_raw(2), obj, 0, None);
    assert_eq!(cached, Ok(true));
    heap.release(obj);
}

/// Test InlineCache contract: lookup(heap, atom, obj) -> Option<IcHit>
#[test]
fn contract_inline_cache_lookup() {
    let mut heap = Heap::new();
    let obj = heap.new_object(None).unwrap();
    heap.define_property(obj, AtomId::from_raw(2), PropFlags::C_W_E, Value::Smi(1))
        .unwrap();
    let mut ic = InlineCache::new();
    ic.update(&heap, AtomId::from_raw(2), obj, 0, None).unwrap();
    let hit: Option<IcHit> = ic.lookup(&heap, AtomId::from_raw(2), obj);
    assert_eq!(hit.map(|h| (h.offset, h.proto)), Some((0, None)));
    heap.release(obj);
}

/// Test InlineCache contract: invalidate(atom), clear()
#[test]
fn contract_inline_cache_invalidate_clear() {
    let mut ic = InlineCache::new();
    ic.invalidate(AtomId::from_raw(2));
    ic.clear();
    assert!(ic.slot(AtomId::from_raw(2)).is_none());
}

/// Test Watchpoint contract: is_valid(&Heap) -> bool
#[test]
fn contract_watchpoint_is_valid() {
    let mut heap = Heap::new();
    let obj = heap.new_object(None).unwrap();
    let wp = Watchpoint {
        holder: obj,
        stamp: heap.object_shape_stamp(obj).unwrap(),
        atom: AtomId::from_raw(2),
    };
    assert!(wp.is_valid(&heap));
    heap.release(obj);
    assert!(!wp.is_valid(&heap));
}

/// Test access contract: get_property_cached / set_property_cached
#[test]
fn contract_cached_access() {
    let mut heap = Heap::new();
    let obj = heap.new_object(None).unwrap();
    let mut ic = InlineCache::new();
    let set: MemoryResult<bool> =
        set_property_cached(&mut heap, &mut ic, obj, AtomId::from_raw(2), Value::Smi(1));
    assert_eq!(set, Ok(true));
    let v: Value = get_property_cached(&mut heap, &mut ic, obj, AtomId::from_raw(2));
    assert_eq!(v, Value::Smi(1));
    heap.release(obj);
}
