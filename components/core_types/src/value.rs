//! JavaScript value representation.
//!
//! This module provides the core `Value` enum. Values that can take part in
//! reference cycles (objects and function bytecode) are referenced through
//! [`GcRef`] handles into the heap arena and are counted by the heap
//! registry. Strings, symbols, big numbers and module records can never point
//! back into the object graph, so they are ordinary `Rc` leaves.

use num_bigint::BigInt;
use num_traits::Zero;
use std::fmt;
use std::rc::Rc;

/// Handle to a cell in the heap arena.
///
/// A handle pairs a slot index with the slot's generation. Freeing a cell
/// bumps the generation of its slot, so a handle that outlived its cell is
/// detected instead of silently reading whatever reuses the slot.
///
/// # Examples
///
/// ```
/// use core_types::GcRef;
///
/// let r = GcRef::new(7, 2);
/// assert_eq!(r.index(), 7);
/// assert_eq!(r.generation(), 2);
/// assert_ne!(r, GcRef::new(7, 3));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GcRef {
    index: u32,
    generation: u32,
}

impl GcRef {
    /// Creates a handle from a slot index and generation.
    pub const fn new(index: u32, generation: u32) -> Self {
        GcRef { index, generation }
    }

    /// Slot index in the heap arena.
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot when the handle was issued.
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for GcRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}.{}", self.index, self.generation)
    }
}

/// A JavaScript symbol. Identity is the allocation, not the description.
#[derive(Debug)]
pub struct Symbol {
    /// Optional description given at creation
    pub description: Option<Rc<str>>,
}

/// Represents any JavaScript value.
///
/// `Value` is intentionally not `Clone`: a copy of an `Object` or
/// `FunctionBytecode` value is a new counted reference and must go through
/// the heap (`Heap::dup_value`), and dropping one goes through
/// `Heap::free_value`.
///
/// # Examples
///
/// ```
/// use core_types::Value;
///
/// let undefined = Value::Undefined;
/// let number = Value::Smi(42);
/// let float = Value::Double(3.14);
///
/// assert!(!undefined.is_truthy());
/// assert!(number.is_truthy());
/// assert_eq!(float.type_of(), "number");
/// ```
pub enum Value {
    /// JavaScript undefined value
    Undefined,
    /// JavaScript null value
    Null,
    /// JavaScript boolean (true or false)
    Boolean(bool),
    /// Small integer
    Smi(i32),
    /// IEEE 754 double-precision floating point
    Double(f64),
    /// Heap object, counted by the heap registry
    Object(GcRef),
    /// Compiled function bytecode, counted by the heap registry
    FunctionBytecode(GcRef),
    /// Heap string
    String(Rc<str>),
    /// Symbol
    Symbol(Rc<Symbol>),
    /// Arbitrary precision integer
    BigNumber(Rc<BigInt>),
    /// Module record, named by its specifier
    Module(Rc<str>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::Null => write!(f, "Null"),
            Value::Boolean(b) => f.debug_tuple("Boolean").field(b).finish(),
            Value::Smi(n) => f.debug_tuple("Smi").field(n).finish(),
            Value::Double(n) => f.debug_tuple("Double").field(n).finish(),
            Value::Object(r) => f.debug_tuple("Object").field(r).finish(),
            Value::FunctionBytecode(r) => f.debug_tuple("FunctionBytecode").field(r).finish(),
            Value::String(s) => f.debug_tuple("String").field(s).finish(),
            Value::Symbol(s) => f.debug_tuple("Symbol").field(&s.description).finish(),
            Value::BigNumber(n) => f.debug_tuple("BigNumber").field(n).finish(),
            Value::Module(name) => f.debug_tuple("Module").field(name).finish(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Smi(a), Value::Smi(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::FunctionBytecode(a), Value::FunctionBytecode(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => Rc::ptr_eq(a, b),
            (Value::BigNumber(a), Value::BigNumber(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Value {
    /// Creates a string value.
    pub fn string(s: &str) -> Self {
        Value::String(Rc::from(s))
    }

    /// Creates a big number value.
    pub fn big_number(n: impl Into<BigInt>) -> Self {
        Value::BigNumber(Rc::new(n.into()))
    }

    /// Returns the heap handle of values counted by the heap registry.
    ///
    /// Only `Object` and `FunctionBytecode` values return a handle; every
    /// other variant is either immediate or an `Rc` leaf.
    pub fn gc_ref(&self) -> Option<GcRef> {
        match self {
            Value::Object(r) | Value::FunctionBytecode(r) => Some(*r),
            _ => None,
        }
    }

    /// Returns the object handle if this is an object.
    pub fn as_object(&self) -> Option<GcRef> {
        match self {
            Value::Object(r) => Some(*r),
            _ => None,
        }
    }

    /// Returns true for object values.
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Returns true if copying this value needs a reference count update.
    pub fn has_ref_count(&self) -> bool {
        !matches!(
            self,
            Value::Undefined | Value::Null | Value::Boolean(_) | Value::Smi(_) | Value::Double(_)
        )
    }

    /// Copies the value without touching the heap registry.
    ///
    /// `Rc` leaves are cloned (which counts them); `Object` and
    /// `FunctionBytecode` handles are copied as-is, so the caller must retain
    /// them if the copy is kept. `Heap::dup_value` does both.
    pub fn alias(&self) -> Value {
        match self {
            Value::Undefined => Value::Undefined,
            Value::Null => Value::Null,
            Value::Boolean(b) => Value::Boolean(*b),
            Value::Smi(n) => Value::Smi(*n),
            Value::Double(n) => Value::Double(*n),
            Value::Object(r) => Value::Object(*r),
            Value::FunctionBytecode(r) => Value::FunctionBytecode(*r),
            Value::String(s) => Value::String(Rc::clone(s)),
            Value::Symbol(s) => Value::Symbol(Rc::clone(s)),
            Value::BigNumber(n) => Value::BigNumber(Rc::clone(n)),
            Value::Module(m) => Value::Module(Rc::clone(m)),
        }
    }

    /// Returns whether this value is truthy in JavaScript semantics.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_types::Value;
    ///
    /// assert!(!Value::Undefined.is_truthy());
    /// assert!(!Value::Smi(0).is_truthy());
    /// assert!(!Value::Double(f64::NAN).is_truthy());
    /// assert!(!Value::string("").is_truthy());
    /// assert!(Value::big_number(7).is_truthy());
    /// ```
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Smi(n) => *n != 0,
            Value::Double(n) => !n.is_nan() && *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::BigNumber(n) => !n.is_zero(),
            Value::Object(_) | Value::FunctionBytecode(_) | Value::Symbol(_) | Value::Module(_) => {
                true
            }
        }
    }

    /// Returns the JavaScript `typeof` result for this value.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Boolean(_) => "boolean",
            Value::Smi(_) | Value::Double(_) => "number",
            Value::Object(_) | Value::Module(_) => "object",
            Value::FunctionBytecode(_) => "function",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::BigNumber(_) => "bigint",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Smi(n) => write!(f, "{}", n),
            Value::Double(n) => {
                if n.is_nan() {
                    write!(f, "NaN")
                } else if n.is_infinite() {
                    if n.is_sign_positive() {
                        write!(f, "Infinity")
                    } else {
                        write!(f, "-Infinity")
                    }
                } else if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Object(_) => write!(f, "[object Object]"),
            Value::FunctionBytecode(_) => write!(f, "[bytecode]"),
            Value::String(s) => write!(f, "{}", s),
            Value::Symbol(s) => match &s.description {
                Some(desc) => write!(f, "Symbol({})", desc),
                None => write!(f, "Symbol()"),
            },
            Value::BigNumber(n) => write!(f, "{}n", n),
            Value::Module(_) => write!(f, "[module]"),
        }
    }
}
