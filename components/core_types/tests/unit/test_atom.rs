//! Unit tests for the atom table

use core_types::{AtomId, AtomTable};

#[cfg(test)]
mod atom_table_tests {
    use super::*;

    #[test]
    fn test_new_table_has_null_and_length() {
        let atoms = AtomTable::new();
        assert_eq!(atoms.len(), 2);
        assert!(!atoms.is_empty());
        assert_eq!(atoms.get("length"), Some(AtomId::LENGTH));
    }

    #[test]
    fn test_intern_returns_same_id() {
        let mut atoms = AtomTable::new();
        let a = atoms.intern("foo");
        assert_eq!(atoms.intern("foo"), a);
        assert_eq!(atoms.len(), 3);
    }

    #[test]
    fn test_distinct_names_get_distinct_ids() {
        let mut atoms = AtomTable::new();
        let a = atoms.intern("a");
        let b = atoms.intern("b");
        assert_ne!(a, b);
        assert_eq!(atoms.name(a), Some("a"));
        assert_eq!(atoms.name(b), Some("b"));
    }

    #[test]
    fn test_empty_string_is_not_the_null_atom() {
        let mut atoms = AtomTable::new();
        let empty = atoms.intern("");
        assert!(!empty.is_null());
        assert_eq!(atoms.name(empty), Some(""));
    }

    #[test]
    fn test_unknown_atom_has_no_name() {
        let atoms = AtomTable::new();
        assert_eq!(atoms.name(AtomId::from_raw(999)), None);
    }

    #[test]
    fn test_raw_round_trip() {
        let id = AtomId::from_raw(17);
        assert_eq!(id.raw(), 17);
        assert_eq!(id.to_string(), "#17");
    }
}
