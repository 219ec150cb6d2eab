//! Function bytecode, closures and suspended async function state.

use std::mem;

use core_types::{AtomId, GcRef, MemoryResult, Value};

use crate::heap::{Cell, CellBody, GcKind, Heap, ListId};
use crate::object::ObjectPayload;

/// Compiled function as seen by the heap.
///
/// Only the parts that hold references are modeled: the constant pool and
/// the realm the function was compiled in.
#[derive(Debug)]
pub struct FunctionBytecode {
    pub(crate) cpool: Vec<Value>,
    pub(crate) realm: Option<GcRef>,
    pub(crate) name: Option<AtomId>,
}

impl FunctionBytecode {
    /// Constant pool
    pub fn cpool(&self) -> &[Value] {
        &self.cpool
    }

    /// Realm the function belongs to
    pub fn realm(&self) -> Option<GcRef> {
        self.realm
    }

    /// Function name
    pub fn name(&self) -> Option<AtomId> {
        self.name
    }
}

/// State of a suspended async function.
#[derive(Debug)]
pub struct AsyncFrame {
    pub(crate) is_active: bool,
    pub(crate) this_val: Value,
    pub(crate) frame_values: Vec<Value>,
    pub(crate) resolving_funcs: [Value; 2],
}

impl AsyncFrame {
    /// False once the function has completed.
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Saved arguments, locals and operand stack.
    pub fn frame_values(&self) -> &[Value] {
        &self.frame_values
    }

    /// `this` of the suspended call
    pub fn this_val(&self) -> &Value {
        &self.this_val
    }

    /// Resolve and reject functions of the result promise.
    pub fn resolving_funcs(&self) -> &[Value; 2] {
        &self.resolving_funcs
    }
}

impl Heap {
    /// Creates function bytecode. Takes ownership of `cpool`; `realm` is
    /// retained.
    pub fn new_function_bytecode(
        &mut self,
        name: Option<AtomId>,
        realm: Option<GcRef>,
        cpool: Vec<Value>,
    ) -> MemoryResult<GcRef> {
        let size = mem::size_of::<Cell>() + cpool.len() * mem::size_of::<Value>();
        let reservation = match self.reserve_cell(size) {
            Ok(reservation) => reservation,
            Err(err) => {
                for v in cpool {
                    self.free_value(v);
                }
                return Err(err);
            }
        };
        if let Some(realm) = realm {
            self.retain(realm);
        }
        let bytecode = FunctionBytecode { cpool, realm, name };
        Ok(self.install_cell(
            reservation,
            GcKind::FunctionBytecode,
            CellBody::FunctionBytecode(bytecode),
            Some(ListId::Live),
        ))
    }

    /// Returns the function bytecode named by `r`.
    pub fn function_bytecode(&self, r: GcRef) -> Option<&FunctionBytecode> {
        match &self.cell(r)?.body {
            CellBody::FunctionBytecode(bytecode) => Some(bytecode),
            _ => None,
        }
    }

    /// Creates a closure object over `bytecode`.
    ///
    /// `bytecode` and `home_object` are retained; the references in
    /// `var_refs` are taken over by the closure.
    pub fn new_closure(
        &mut self,
        proto: Option<GcRef>,
        bytecode: GcRef,
        var_refs: Vec<GcRef>,
        home_object: Option<GcRef>,
    ) -> MemoryResult<GcRef> {
        self.retain(bytecode);
        if let Some(home) = home_object {
            self.retain(home);
        }
        let payload = ObjectPayload::Closure {
            bytecode,
            var_refs,
            home_object,
        };
        let shape = match self.shape_for_new_object(proto) {
            Ok(shape) => shape,
            Err(err) => {
                self.release_payload(payload);
                return Err(err);
            }
        };
        self.new_object_from_shape(shape, payload)
    }

    /// Captures the state of a suspended async function.
    ///
    /// Takes ownership of every value passed in.
    pub fn new_async_frame(
        &mut self,
        this_val: Value,
        frame_values: Vec<Value>,
        resolving_funcs: [Value; 2],
    ) -> MemoryResult<GcRef> {
        let size = mem::size_of::<Cell>() + frame_values.len() * mem::size_of::<Value>();
        let frame = AsyncFrame {
            is_active: true,
            this_val,
            frame_values,
            resolving_funcs,
        };
        let reservation = match self.reserve_cell(size) {
            Ok(reservation) => reservation,
            Err(err) => {
                self.finalize_async_frame(frame);
                return Err(err);
            }
        };
        Ok(self.install_cell(
            reservation,
            GcKind::AsyncFrame,
            CellBody::AsyncFrame(frame),
            Some(ListId::Live),
        ))
    }

    /// Returns the async frame named by `r`.
    pub fn async_frame(&self, r: GcRef) -> Option<&AsyncFrame> {
        match &self.cell(r)?.body {
            CellBody::AsyncFrame(frame) => Some(frame),
            _ => None,
        }
    }

    /// Marks the async function as completed and releases its saved frame.
    ///
    /// The resolving functions are kept until the frame itself is freed.
    pub fn finish_async_frame(&mut self, r: GcRef) {
        let (this_val, values) = match self.cell_mut(r).map(|cell| &mut cell.body) {
            Some(CellBody::AsyncFrame(frame)) => {
                if !frame.is_active {
                    return;
                }
                frame.is_active = false;
                (
                    mem::replace(&mut frame.this_val, Value::Undefined),
                    mem::take(&mut frame.frame_values),
                )
            }
            _ => panic!("{} is not a live async frame", r),
        };
        self.free_value(this_val);
        for v in values {
            self.free_value(v);
        }
    }

    pub(crate) fn finalize_function_bytecode(&mut self, bytecode: FunctionBytecode) {
        for v in bytecode.cpool {
            self.free_value(v);
        }
        if let Some(realm) = bytecode.realm {
            self.release(realm);
        }
    }

    pub(crate) fn finalize_async_frame(&mut self, frame: AsyncFrame) {
        let AsyncFrame {
            this_val,
            frame_values,
            resolving_funcs,
            ..
        } = frame;
        self.free_value(this_val);
        for v in frame_values.into_iter().chain(resolving_funcs) {
            self.free_value(v);
        }
    }
}
