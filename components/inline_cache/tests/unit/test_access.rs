//! Unit tests for cached property access

use core_types::{AtomId, Value};
use inline_cache::{get_property_cached, set_property_cached, InlineCache};
use memory_manager::{Heap, PropFlags};

#[cfg(test)]
mod get_tests {
    use super::*;

    #[test]
    fn test_prototype_delete_reads_undefined() {
        let mut heap = Heap::new();
        let x = AtomId::from_raw(2);
        let p = heap.new_object(None).unwrap();
        heap.define_property(p, x, PropFlags::C_W_E, Value::Smi(42)).unwrap();
        let a = heap.new_object(Some(p)).unwrap();
        let mut site = InlineCache::new();

        assert_eq!(get_property_cached(&mut heap, &mut site, a, x), Value::Smi(42));
        assert_eq!(get_property_cached(&mut heap, &mut site, a, x), Value::Smi(42));
        assert_eq!(site.stats().hits, 1);

        assert_eq!(heap.delete_property(p, x), Ok(true));
        assert_eq!(get_property_cached(&mut heap, &mut site, a, x), Value::Undefined);
        assert_eq!(site.stats().hits, 1);
        assert_eq!(site.stats().misses, 2);

        heap.release(a);
        heap.release(p);
        assert_eq!(heap.live_cells(), 0);
    }

    #[test]
    fn test_own_property_shadows_after_cache_fill() {
        let mut heap = Heap::new();
        let x = AtomId::from_raw(2);
        let p = heap.new_object(None).unwrap();
        heap.define_property(p, x, PropFlags::C_W_E, Value::Smi(1)).unwrap();
        let a = heap.new_object(Some(p)).unwrap();
        let mut site = InlineCache::new();
        assert_eq!(get_property_cached(&mut heap, &mut site, a, x), Value::Smi(1));

        heap.define_property(a, x, PropFlags::C_W_E, Value::Smi(2)).unwrap();
        assert_eq!(get_property_cached(&mut heap, &mut site, a, x), Value::Smi(2));
        assert_eq!(get_property_cached(&mut heap, &mut site, a, x), Value::Smi(2));

        heap.release(a);
        heap.release(p);
    }

    #[test]
    fn test_var_ref_property_reads_through() {
        let mut heap = Heap::new();
        let x = AtomId::from_raw(2);
        let obj = heap.new_object(None).unwrap();
        let var = heap.new_closure_var(Value::Smi(3)).unwrap();
        heap.define_var_ref_property(obj, x, PropFlags::WRITABLE, var).unwrap();
        let mut site = InlineCache::new();
        assert_eq!(get_property_cached(&mut heap, &mut site, obj, x), Value::Smi(3));
        assert_eq!(site.stats().updates, 0);
        heap.release(obj);
        assert_eq!(heap.live_cells(), 0);
    }
}

#[cfg(test)]
mod set_tests {
    use super::*;

    #[test]
    fn test_set_then_get_on_same_shape() {
        let mut heap = Heap::new();
        let x = AtomId::from_raw(2);
        let a = heap.new_object(None).unwrap();
        let b = heap.new_object(None).unwrap();
        let mut put = InlineCache::new();
        let mut get = InlineCache::new();
        set_property_cached(&mut heap, &mut put, a, x, Value::Smi(1)).unwrap();
        set_property_cached(&mut heap, &mut put, b, x, Value::Smi(2)).unwrap();
        assert_eq!(get_property_cached(&mut heap, &mut get, a, x), Value::Smi(1));
        assert_eq!(get_property_cached(&mut heap, &mut get, b, x), Value::Smi(2));
        assert_eq!(get.stats().hits, 1);

        set_property_cached(&mut heap, &mut put, b, x, Value::Smi(5)).unwrap();
        assert_eq!(get_property_cached(&mut heap, &mut get, b, x), Value::Smi(5));

        heap.release(a);
        heap.release(b);
    }

    #[test]
    fn test_set_on_frozen_object_fails() {
        let mut heap = Heap::new();
        let x = AtomId::from_raw(2);
        let obj = heap.new_object(None).unwrap();
        heap.prevent_extensions(obj);
        let mut put = InlineCache::new();
        assert_eq!(set_property_cached(&mut heap, &mut put, obj, x, Value::Smi(1)), Ok(false));
        assert_eq!(put.stats().updates, 0);
        heap.release(obj);
    }
}
