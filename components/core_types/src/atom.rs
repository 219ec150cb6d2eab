//! Interned property names.
//!
//! Shapes and inline caches key properties by [`AtomId`], a small integer
//! handed out by an [`AtomTable`]. Atom `0` is reserved as the null atom and
//! marks deleted shape entries.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Identifier of an interned property name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtomId(u32);

impl AtomId {
    /// The null atom; never names a live property.
    pub const NULL: AtomId = AtomId(0);
    /// The predefined `length` atom used by array shapes.
    pub const LENGTH: AtomId = AtomId(1);

    /// Builds an atom from its raw index.
    pub const fn from_raw(raw: u32) -> Self {
        AtomId(raw)
    }

    /// Returns the raw index of this atom.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns true for [`AtomId::NULL`].
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Table of interned property names.
///
/// # Examples
///
/// ```
/// use core_types::{AtomId, AtomTable};
///
/// let mut atoms = AtomTable::new();
/// let a = atoms.intern("answer");
/// let b = atoms.intern("answer");
/// assert_eq!(a, b);
/// assert_eq!(atoms.intern("length"), AtomId::LENGTH);
/// ```
#[derive(Debug)]
pub struct AtomTable {
    names: Vec<Rc<str>>,
    lookup: HashMap<Rc<str>, AtomId>,
}

impl AtomTable {
    /// Creates a table holding only the predefined atoms.
    pub fn new() -> Self {
        let mut table = AtomTable {
            names: Vec::new(),
            lookup: HashMap::new(),
        };
        // Index 0 is the null atom and is never looked up by name.
        table.names.push(Rc::from(""));
        let length = table.intern("length");
        debug_assert_eq!(length, AtomId::LENGTH);
        table
    }

    /// Returns the atom for `name`, interning it on first use.
    pub fn intern(&mut self, name: &str) -> AtomId {
        if let Some(&id) = self.lookup.get(name) {
            return id;
        }
        let id = AtomId(self.names.len() as u32);
        let name: Rc<str> = Rc::from(name);
        self.names.push(name.clone());
        self.lookup.insert(name, id);
        id
    }

    /// Returns the atom for `name` without interning it.
    pub fn get(&self, name: &str) -> Option<AtomId> {
        self.lookup.get(name).copied()
    }

    /// Returns the name of `atom`, or `None` for the null atom and unknown ids.
    pub fn name(&self, atom: AtomId) -> Option<&str> {
        if atom.is_null() {
            return None;
        }
        self.names.get(atom.0 as usize).map(|name| &**name)
    }

    /// Number of interned atoms, the null atom included.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false: the null atom is always present.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for AtomTable {
    fn default() -> Self {
        Self::new()
    }
}
