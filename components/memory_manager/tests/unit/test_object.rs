//! Unit tests for object property operations

use core_types::{AtomId, Value};
use memory_manager::{Heap, ObjectClass, PropFlags, Property};

fn atom(n: u32) -> AtomId {
    AtomId::from_raw(n)
}

#[cfg(test)]
mod property_tests {
    use super::*;

    #[test]
    fn test_properties_track_shape_length() {
        let mut heap = Heap::new();
        let obj = heap.new_object(None).unwrap();
        for n in 2..40 {
            heap.set_property(obj, atom(n), Value::Smi(n as i32)).unwrap();
            let o = heap.object(obj).unwrap();
            let shape = heap.shape(o.shape()).unwrap();
            assert_eq!(o.properties().len(), shape.prop_count());
        }
        for n in 2..40 {
            assert_eq!(heap.get_property(obj, atom(n)), Value::Smi(n as i32));
        }
        heap.release(obj);
    }

    #[test]
    fn test_set_property_overwrites_in_place() {
        let mut heap = Heap::new();
        let obj = heap.new_object(None).unwrap();
        heap.set_property(obj, atom(2), Value::Smi(1)).unwrap();
        let stamp = heap.object_shape_stamp(obj);
        heap.set_property(obj, atom(2), Value::string("two")).unwrap();
        assert_eq!(heap.object_shape_stamp(obj), stamp);
        assert_eq!(heap.get_property(obj, atom(2)), Value::string("two"));
        heap.release(obj);
    }

    #[test]
    fn test_own_property_shadows_prototype() {
        let mut heap = Heap::new();
        let proto = heap.new_object(None).unwrap();
        heap.set_property(proto, atom(2), Value::Smi(1)).unwrap();
        let obj = heap.new_object(Some(proto)).unwrap();
        heap.set_property(obj, atom(2), Value::Smi(2)).unwrap();
        assert_eq!(heap.get_property(obj, atom(2)), Value::Smi(2));
        assert_eq!(heap.get_property(proto, atom(2)), Value::Smi(1));
        heap.delete_property(obj, atom(2)).unwrap();
        assert_eq!(heap.get_property(obj, atom(2)), Value::Smi(1));
        heap.release(obj);
        heap.release(proto);
        assert_eq!(heap.live_cells(), 0);
    }

    #[test]
    fn test_var_ref_property_writes_through() {
        let mut heap = Heap::new();
        let obj = heap.new_object(None).unwrap();
        let var = heap.new_closure_var(Value::Smi(1)).unwrap();
        heap.retain(var);
        heap.define_var_ref_property(obj, atom(2), PropFlags::WRITABLE, var)
            .unwrap();
        assert!(matches!(heap.get_own_property(obj, atom(2)), Some(Property::VarRef(_))));
        heap.set_property(obj, atom(2), Value::Smi(5)).unwrap();
        assert_eq!(heap.var_ref_get(var), Value::Smi(5));
        heap.var_ref_set(var, Value::Smi(6));
        assert_eq!(heap.get_property(obj, atom(2)), Value::Smi(6));
        heap.release(obj);
        heap.release(var);
        assert_eq!(heap.live_cells(), 0);
    }

    #[test]
    fn test_object_classes() {
        let mut heap = Heap::new();
        let ctx = heap.new_context().unwrap();
        let arr = heap.new_array(ctx).unwrap();
        let obj = heap.new_object(None).unwrap();
        assert_eq!(heap.object(arr).unwrap().class(), ObjectClass::Array);
        assert_eq!(heap.object(obj).unwrap().class(), ObjectClass::Object);
        heap.release(arr);
        heap.release(obj);
        heap.release(ctx);
        assert_eq!(heap.live_cells(), 0);
    }
}
