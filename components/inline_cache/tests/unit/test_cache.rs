//! Unit tests for cache validation

use core_types::{AtomId, GcRef, Value};
use inline_cache::{InlineCache, IC_CACHE_ITEM_CAPACITY};
use memory_manager::{Heap, PropFlags};

fn object_with(heap: &mut Heap, proto: Option<GcRef>, atoms: &[u32]) -> GcRef {
    let obj = heap.new_object(proto).unwrap();
    for (i, &a) in atoms.iter().enumerate() {
        heap.define_property(obj, AtomId::from_raw(a), PropFlags::C_W_E, Value::Smi(i as i32))
            .unwrap();
    }
    obj
}

#[cfg(test)]
mod shape_tests {
    use super::*;

    #[test]
    fn test_different_shapes_never_cross_hit() {
        let mut heap = Heap::new();
        let x = AtomId::from_raw(2);
        let o1 = object_with(&mut heap, None, &[2, 3]);
        let o2 = object_with(&mut heap, None, &[3, 2]);
        let mut ic = InlineCache::new();
        ic.update(&heap, x, o1, 0, None).unwrap();
        assert_eq!(ic.lookup(&heap, x, o2), None);
        ic.update(&heap, x, o2, 1, None).unwrap();
        assert_eq!(ic.lookup(&heap, x, o1).unwrap().offset, 0);
        assert_eq!(ic.lookup(&heap, x, o2).unwrap().offset, 1);
        heap.release(o1);
        heap.release(o2);
    }

    #[test]
    fn test_objects_sharing_a_shape_share_entries() {
        let mut heap = Heap::new();
        let x = AtomId::from_raw(2);
        let a = object_with(&mut heap, None, &[2]);
        let b = object_with(&mut heap, None, &[2]);
        let mut ic = InlineCache::new();
        ic.update(&heap, x, a, 0, None).unwrap();
        assert!(ic.lookup(&heap, x, b).is_some());
        heap.release(a);
        heap.release(b);
    }

    #[test]
    fn test_own_insertion_makes_entry_cold() {
        let mut heap = Heap::new();
        let x = AtomId::from_raw(2);
        let obj = object_with(&mut heap, None, &[2]);
        let mut ic = InlineCache::new();
        ic.update(&heap, x, obj, 0, None).unwrap();
        heap.define_property(obj, AtomId::from_raw(3), PropFlags::C_W_E, Value::Null)
            .unwrap();
        assert_eq!(ic.lookup(&heap, x, obj), None);
        heap.release(obj);
    }

    #[test]
    fn test_own_deletion_makes_entry_cold() {
        let mut heap = Heap::new();
        let x = AtomId::from_raw(2);
        let obj = object_with(&mut heap, None, &[2, 3]);
        let mut ic = InlineCache::new();
        ic.update(&heap, x, obj, 0, None).unwrap();
        heap.delete_property(obj, AtomId::from_raw(3)).unwrap();
        assert_eq!(ic.lookup(&heap, x, obj), None);
        heap.release(obj);
    }

    #[test]
    fn test_freed_receiver_shape_never_matches() {
        let mut heap = Heap::new();
        let x = AtomId::from_raw(2);
        let obj = object_with(&mut heap, None, &[2]);
        let mut ic = InlineCache::new();
        ic.update(&heap, x, obj, 0, None).unwrap();
        heap.release(obj);
        let other = object_with(&mut heap, None, &[2]);
        assert_eq!(ic.lookup(&heap, x, other), None);
        heap.release(other);
    }
}

#[cfg(test)]
mod prototype_tests {
    use super::*;

    #[test]
    fn test_grandparent_change_invalidates() {
        let mut heap = Heap::new();
        let x = AtomId::from_raw(2);
        let grand = object_with(&mut heap, None, &[2]);
        let parent = object_with(&mut heap, Some(grand), &[]);
        let child = object_with(&mut heap, Some(parent), &[]);
        let mut ic = InlineCache::new();
        assert_eq!(ic.update(&heap, x, child, 0, Some(grand)), Ok(true));
        assert_eq!(ic.lookup(&heap, x, child).unwrap().proto, Some(grand));

        // shadowing on the intermediate prototype
        heap.define_property(parent, x, PropFlags::C_W_E, Value::Smi(9))
            .unwrap();
        assert_eq!(ic.lookup(&heap, x, child), None);

        heap.release(child);
        heap.release(parent);
        heap.release(grand);
        assert_eq!(heap.live_cells(), 0);
    }

    #[test]
    fn test_set_prototype_invalidates() {
        let mut heap = Heap::new();
        let x = AtomId::from_raw(2);
        let p1 = object_with(&mut heap, None, &[2]);
        let p2 = object_with(&mut heap, None, &[2]);
        let obj = object_with(&mut heap, Some(p1), &[]);
        let mut ic = InlineCache::new();
        ic.update(&heap, x, obj, 0, Some(p1)).unwrap();
        assert_eq!(heap.set_prototype(obj, Some(p2)), Ok(true));
        assert_eq!(ic.lookup(&heap, x, obj), None);
        heap.release(obj);
        heap.release(p1);
        heap.release(p2);
    }

    #[test]
    fn test_ring_holds_capacity_shapes() {
        let mut heap = Heap::new();
        let x = AtomId::from_raw(2);
        let mut objs = Vec::new();
        let mut ic = InlineCache::new();
        for i in 0..IC_CACHE_ITEM_CAPACITY as u32 {
            let obj = object_with(&mut heap, None, &[100 + i, 2]);
            ic.update(&heap, x, obj, 1, None).unwrap();
            objs.push(obj);
        }
        for &obj in &objs {
            assert!(ic.lookup(&heap, x, obj).is_some());
        }
        assert_eq!(ic.stats().evictions, 0);
        for obj in objs {
            heap.release(obj);
        }
    }
}
