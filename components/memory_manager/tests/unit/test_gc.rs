//! Unit tests for the cycle collector

use core_types::{AtomId, GcRef, Value};
use memory_manager::{Heap, PropFlags};

fn link(heap: &mut Heap, from: GcRef, to: GcRef, name: u32) {
    heap.retain(to);
    heap.define_property(from, AtomId::from_raw(name), PropFlags::C_W_E, Value::Object(to))
        .unwrap();
}

#[cfg(test)]
mod collection_tests {
    use super::*;

    #[test]
    fn test_pair_cycle_is_collected() {
        let mut heap = Heap::new();
        let a = heap.new_object(None).unwrap();
        let b = heap.new_object(None).unwrap();
        link(&mut heap, a, b, 2);
        link(&mut heap, b, a, 2);
        heap.release(a);
        heap.release(b);
        assert_eq!(heap.live_cells(), 3);
        assert_eq!(heap.run_gc(), 2);
        assert_eq!(heap.live_cells(), 0);
        assert_eq!(heap.stats().objects_freed_by_gc, 2);
    }

    #[test]
    fn test_garbage_referencing_live_object() {
        let mut heap = Heap::new();
        let keep = heap.new_object(None).unwrap();
        let a = heap.new_object(None).unwrap();
        link(&mut heap, a, a, 2);
        link(&mut heap, a, keep, 3);
        heap.release(a);
        assert_eq!(heap.ref_count(keep), Some(2));

        assert_eq!(heap.run_gc(), 1);
        assert_eq!(heap.ref_count(keep), Some(1));
        assert!(heap.is_live_object(&Value::Object(keep)));
        heap.release(keep);
        assert_eq!(heap.live_cells(), 0);
    }

    #[test]
    fn test_live_object_reachable_through_cycle_survives() {
        let mut heap = Heap::new();
        let root = heap.new_object(None).unwrap();
        let a = heap.new_object(None).unwrap();
        let b = heap.new_object(None).unwrap();
        link(&mut heap, root, a, 2);
        link(&mut heap, a, b, 2);
        link(&mut heap, b, a, 3);
        heap.release(a);
        heap.release(b);

        assert_eq!(heap.run_gc(), 0);
        assert_eq!(heap.ref_count(a), Some(2));
        assert_eq!(heap.ref_count(b), Some(1));

        heap.release(root);
        assert!(heap.contains(a));
        assert_eq!(heap.run_gc(), 2);
        assert_eq!(heap.live_cells(), 0);
    }

    #[test]
    fn test_repeated_collections_are_stable() {
        let mut heap = Heap::new();
        let obj = heap.new_object(None).unwrap();
        link(&mut heap, obj, obj, 2);
        for _ in 0..5 {
            assert_eq!(heap.run_gc(), 0);
            assert_eq!(heap.ref_count(obj), Some(2));
        }
        heap.release(obj);
        assert_eq!(heap.run_gc(), 1);
        assert_eq!(heap.stats().collections, 6);
    }
}
