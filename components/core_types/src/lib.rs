//! Core value types, atoms and error handling for the object-memory core.
//!
//! This crate provides the foundational types shared by the heap, the shape
//! table and the inline caches:
//!
//! - [`Value`] - Tagged representation of JavaScript values
//! - [`GcRef`] - Generation-checked handle to a cell in the heap arena
//! - [`AtomId`] / [`AtomTable`] - Interned property names
//! - [`MemoryError`] - The recoverable error taxonomy (out of memory)
//!
//! # Examples
//!
//! ```
//! use core_types::{AtomTable, GcRef, Value};
//!
//! let mut atoms = AtomTable::new();
//! let x = atoms.intern("x");
//! assert_eq!(atoms.name(x), Some("x"));
//!
//! let num = Value::Smi(42);
//! assert!(num.is_truthy());
//! assert_eq!(num.type_of(), "number");
//!
//! let obj = Value::Object(GcRef::new(3, 0));
//! assert_eq!(obj.gc_ref(), Some(GcRef::new(3, 0)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod atom;
mod error;
mod value;

pub use atom::{AtomId, AtomTable};
pub use error::{MemoryError, MemoryResult};
pub use value::{GcRef, Symbol, Value};
