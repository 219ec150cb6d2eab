//! Heap and Inline Cache Integration Tests
//!
//! Tests cached property access against the shape table: prototype
//! watchpoints, shape sharing and behavior across collections.

use core_types::Value;
use inline_cache::{get_property_cached, set_property_cached, InlineCache};
use integration_tests::Fixture;

/// Test: deleting a prototype property makes a warm site miss and read undefined
#[test]
fn test_prototype_delete_is_never_stale() {
    let mut fx = Fixture::new();
    let x = fx.atom("x");
    let p = fx.heap.new_object(None).unwrap();
    fx.define(p, "x", Value::Smi(1));
    let a = fx.heap.new_object(Some(p)).unwrap();
    let mut site = InlineCache::new();

    assert_eq!(get_property_cached(&mut fx.heap, &mut site, a, x), Value::Smi(1));
    assert_eq!(get_property_cached(&mut fx.heap, &mut site, a, x), Value::Smi(1));
    assert_eq!(site.stats().hits, 1, "second read should hit through the prototype");

    fx.heap.delete_property(p, x).unwrap();
    assert_eq!(site.lookup(&fx.heap, x, a), None);
    assert_eq!(get_property_cached(&mut fx.heap, &mut site, a, x), Value::Undefined);

    fx.heap.release(a);
    fx.heap.release(p);
    assert_eq!(fx.heap.live_cells(), 0);
}

/// Test: three objects built the same way share one shape
#[test]
fn test_three_objects_share_one_shape() {
    let mut fx = Fixture::new();
    let proto = fx.heap.new_object(None).unwrap();
    let mut objs = Vec::new();
    for i in 0..3 {
        let o = fx.heap.new_object(Some(proto)).unwrap();
        fx.define(o, "x", Value::Smi(i));
        fx.define(o, "y", Value::Smi(i * 10));
        objs.push(o);
    }
    let shape = fx.heap.object(objs[0]).unwrap().shape();
    assert!(objs.iter().all(|&o| fx.heap.object(o).unwrap().shape() == shape));
    assert_eq!(fx.heap.ref_count(shape), Some(3));

    // one site now serves all three receivers
    let y = fx.atom("y");
    let mut site = InlineCache::new();
    for (i, &o) in objs.iter().enumerate() {
        let v = get_property_cached(&mut fx.heap, &mut site, o, y);
        assert_eq!(v, Value::Smi(i as i32 * 10));
    }
    assert_eq!(site.stats().misses, 1);
    assert_eq!(site.stats().hits, 2);

    for o in objs {
        fx.heap.release(o);
    }
    fx.heap.release(proto);
    assert_eq!(fx.heap.live_cells(), 0);
    assert_eq!(fx.heap.hashed_shape_count(), 0);
}

/// Test: a site warmed on one shape never answers for another
#[test]
fn test_polymorphic_site_keeps_offsets_apart() {
    let mut fx = Fixture::new();
    let x = fx.atom("x");
    let o1 = fx.heap.new_object(None).unwrap();
    fx.define(o1, "x", Value::Smi(1));
    fx.define(o1, "y", Value::Smi(2));
    let o2 = fx.heap.new_object(None).unwrap();
    fx.define(o2, "y", Value::Smi(3));
    fx.define(o2, "x", Value::Smi(4));

    let mut site = InlineCache::new();
    for _ in 0..3 {
        assert_eq!(get_property_cached(&mut fx.heap, &mut site, o1, x), Value::Smi(1));
        assert_eq!(get_property_cached(&mut fx.heap, &mut site, o2, x), Value::Smi(4));
    }
    assert_eq!(site.stats().misses, 2);

    fx.heap.release(o1);
    fx.heap.release(o2);
}

/// Test: cached entries stay correct when collected objects free their shapes
#[test]
fn test_cache_survives_collection_of_its_shapes() {
    let mut fx = Fixture::new();
    let x = fx.atom("x");
    let mut site = InlineCache::new();

    let a = fx.heap.new_object(None).unwrap();
    fx.define(a, "x", Value::Smi(1));
    fx.link(a, "self", a);
    assert_eq!(get_property_cached(&mut fx.heap, &mut site, a, x), Value::Smi(1));
    fx.heap.release(a);
    assert_eq!(fx.heap.run_gc(), 1);
    assert_eq!(fx.heap.live_cells(), 0);

    // a fresh object can land in the freed slots
    let b = fx.heap.new_object(None).unwrap();
    fx.define(b, "z", Value::Smi(7));
    fx.define(b, "x", Value::Smi(8));
    assert_eq!(get_property_cached(&mut fx.heap, &mut site, b, x), Value::Smi(8));
    fx.heap.release(b);
}

/// Test: cached writes keep reference counts balanced
#[test]
fn test_cached_writes_release_old_values() {
    let mut fx = Fixture::new();
    let slot = fx.atom("slot");
    let holder = fx.heap.new_object(None).unwrap();
    let mut site = InlineCache::new();
    for _ in 0..5 {
        let child = fx.heap.new_object(None).unwrap();
        set_property_cached(&mut fx.heap, &mut site, holder, slot, Value::Object(child))
            .unwrap();
    }
    assert_eq!(site.stats().hits, 4);
    // holder, its shape, the last child and the empty shape it uses
    assert_eq!(fx.heap.live_cells(), 4);
    fx.heap.release(holder);
    assert_eq!(fx.heap.live_cells(), 0);
}
