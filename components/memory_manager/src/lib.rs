//! Memory Manager - Reference-counted heap with cycle collection
//!
//! This component provides:
//! - A heap registry of generation-checked, reference-counted cells
//! - Iterative freeing through a zero-refcount queue
//! - Hash-consed shapes (hidden classes) for object property layout
//! - Objects with ordinary, array and closure payloads
//! - Closure variables attached to stack frames until the frame returns
//! - A trial-deletion cycle collector triggered by allocation volume
//! - Owning `Root` handles for code outside the heap

pub mod context;
pub mod function;
pub mod gc;
pub mod heap;
pub mod object;
pub mod root;
pub mod shape;
pub mod var_ref;

// Re-export main types
pub use context::Context;
pub use function::{AsyncFrame, FunctionBytecode};
pub use heap::{GcHeader, GcKind, GcPhase, GcStats, Heap, HeapConfig, DEFAULT_GC_THRESHOLD};
pub use object::{JSObject, ObjectClass, ObjectPayload, Property, PropertyLocation};
pub use root::Root;
pub use shape::{
    PropFlags, Shape, ShapeProperty, ShapeStamp, PROP_INITIAL_HASH_SIZE, PROP_INITIAL_SIZE,
};
pub use var_ref::{FrameId, VarRef};
