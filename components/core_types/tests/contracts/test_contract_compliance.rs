//! Contract compliance tests for core_types
//!
//! These tests pin the public surface that the heap and the inline caches
//! rely on.

use core_types::{AtomId, AtomTable, GcRef, MemoryError, Value};

#[cfg(test)]
mod value_contract_tests {
    use super::*;

    /// Contract: only Object and FunctionBytecode values carry a heap handle
    #[test]
    fn test_only_counted_variants_have_handles() {
        let r = GcRef::new(0, 0);
        let counted = [Value::Object(r), Value::FunctionBytecode(r)];
        for v in &counted {
            assert_eq!(v.gc_ref(), Some(r));
        }
        let leaves = [
            Value::Undefined,
            Value::Null,
            Value::Boolean(true),
            Value::Smi(3),
            Value::Double(2.5),
            Value::string("s"),
            Value::big_number(9),
            Value::Module(std::rc::Rc::from("m")),
        ];
        for v in &leaves {
            assert_eq!(v.gc_ref(), None);
        }
    }

    /// Contract: alias preserves the variant and the handle
    #[test]
    fn test_alias_preserves_handle() {
        let v = Value::Object(GcRef::new(8, 3));
        assert_eq!(v.alias(), v);
    }
}

#[cfg(test)]
mod atom_contract_tests {
    use super::*;

    /// Contract: atom 0 is null and atom 1 is "length"
    #[test]
    fn test_reserved_atoms() {
        let atoms = AtomTable::new();
        assert!(AtomId::NULL.is_null());
        assert_eq!(atoms.name(AtomId::LENGTH), Some("length"));
    }
}

#[cfg(test)]
mod error_contract_tests {
    use super::*;

    /// Contract: OutOfMemory is cloneable and comparable
    #[test]
    fn test_out_of_memory_is_value_like() {
        let err = MemoryError::OutOfMemory { requested: 32 };
        assert_eq!(err.clone(), err);
    }
}
