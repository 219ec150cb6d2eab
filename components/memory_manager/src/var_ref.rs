//! Closure variables and the stack frames they point into.
//!
//! A closure captures a local variable through a [`VarRef`]. While the
//! function that owns the variable is running, the var ref is *attached*: it
//! names a slot of a stack frame and is not on any registry list, so the
//! cycle collector never walks it. When the frame is popped every open var
//! ref of the frame is *detached*: the local's value moves into the var ref,
//! which then joins the live list like any other collectable cell.
//!
//! Frames themselves are not collectable. They live in a side arena of the
//! heap, addressed by generation-checked [`FrameId`]s, and their locals hold
//! counted references that act as roots.

use std::fmt;
use std::mem;

use core_types::{GcRef, MemoryError, MemoryResult, Value};
use tracing::trace;

use crate::heap::{Cell, CellBody, GcKind, Heap, ListId};

/// Handle to a live stack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId {
    index: u32,
    generation: u32,
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame {}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
pub(crate) struct StackFrame {
    locals: Vec<Value>,
    /// Attached var refs pointing into `locals`
    open_var_refs: Vec<GcRef>,
    alloc_size: usize,
}

#[derive(Debug)]
pub(crate) struct FrameSlot {
    generation: u32,
    frame: Option<StackFrame>,
}

/// A captured variable.
#[derive(Debug)]
pub enum VarRef {
    /// The variable still lives in a running frame
    Attached {
        /// Owning frame
        frame: FrameId,
        /// Index of the local in the frame
        slot: u32,
    },
    /// The frame has returned; the var ref owns the value
    Detached {
        /// Current value of the variable
        value: Value,
    },
}

impl VarRef {
    /// Returns true once the owning frame has been popped.
    pub fn is_detached(&self) -> bool {
        matches!(self, VarRef::Detached { .. })
    }
}

impl Heap {
    /// Pushes a stack frame holding `locals`, taking ownership of them.
    pub fn push_frame(&mut self, locals: Vec<Value>) -> MemoryResult<FrameId> {
        let size = mem::size_of::<StackFrame>() + locals.len() * mem::size_of::<Value>();
        if let Err(err) = self.reserve_frame(size) {
            for v in locals {
                self.free_value(v);
            }
            return Err(err);
        }
        let frame = StackFrame {
            locals,
            open_var_refs: Vec::new(),
            alloc_size: size,
        };
        let index = match self.free_frames.pop() {
            Some(index) => index,
            None => {
                self.frames.push(FrameSlot {
                    generation: 0,
                    frame: None,
                });
                self.frames.len() as u32 - 1
            }
        };
        let slot = &mut self.frames[index as usize];
        slot.frame = Some(frame);
        let id = FrameId {
            index,
            generation: slot.generation,
        };
        trace!(%id, "pushed frame");
        Ok(id)
    }

    fn reserve_frame(&mut self, size: usize) -> MemoryResult<()> {
        self.charge(size)?;
        if self.free_frames.is_empty() {
            if let Err(err) = self.frames.try_reserve(1) {
                self.uncharge(size);
                return Err(MemoryError::from_reserve(err, 1, mem::size_of::<FrameSlot>()));
            }
        }
        Ok(())
    }

    fn stack_frame(&self, id: FrameId) -> Option<&StackFrame> {
        let slot = self.frames.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.frame.as_ref()
    }

    fn stack_frame_mut(&mut self, id: FrameId) -> &mut StackFrame {
        let frame = self
            .frames
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.frame.as_mut());
        match frame {
            Some(frame) => frame,
            None => panic!("{} is not live", id),
        }
    }

    /// Returns true if `id` names a frame that has not been popped.
    pub fn is_frame_live(&self, id: FrameId) -> bool {
        self.stack_frame(id).is_some()
    }

    /// Reads local `slot` of frame `id`, returning a counted copy.
    pub fn frame_local(&mut self, id: FrameId, slot: u32) -> Option<Value> {
        let v = self.stack_frame(id)?.locals.get(slot as usize)?.alias();
        if let Some(r) = v.gc_ref() {
            self.retain(r);
        }
        Some(v)
    }

    /// Stores `value` into local `slot` of frame `id`.
    ///
    /// # Panics
    ///
    /// Panics if the frame has been popped or the slot is out of range.
    pub fn set_frame_local(&mut self, id: FrameId, slot: u32, value: Value) {
        let old = mem::replace(&mut self.stack_frame_mut(id).locals[slot as usize], value);
        self.free_value(old);
    }

    /// Returns a var ref to local `slot` of frame `id`.
    ///
    /// Closures capturing the same local share one var ref; the caller owns
    /// one reference to it.
    pub fn capture_var(&mut self, id: FrameId, slot: u32) -> MemoryResult<GcRef> {
        let frame = match self.stack_frame(id) {
            Some(frame) => frame,
            None => panic!("capture from {} which is not live", id),
        };
        assert!(
            (slot as usize) < frame.locals.len(),
            "capture of slot {} outside {}",
            slot,
            id
        );
        let existing = frame.open_var_refs.iter().copied().find(|&r| {
            matches!(self.var_ref(r), Some(VarRef::Attached { slot: s, .. }) if *s == slot)
        });
        if let Some(r) = existing {
            self.retain(r);
            return Ok(r);
        }

        let reservation = self.reserve_cell(mem::size_of::<Cell>())?;
        let grown = self.stack_frame_mut(id).open_var_refs.try_reserve(1);
        if let Err(err) = grown {
            self.cancel_reservation(reservation);
            return Err(MemoryError::from_reserve(err, 1, mem::size_of::<GcRef>()));
        }
        let r = self.install_cell(
            reservation,
            GcKind::VarRef,
            CellBody::VarRef(VarRef::Attached { frame: id, slot }),
            None,
        );
        self.stack_frame_mut(id).open_var_refs.push(r);
        Ok(r)
    }

    /// Pops frame `id`.
    ///
    /// Every open var ref takes over the value of its local and is linked
    /// into the live list; the remaining locals are released.
    pub fn pop_frame(&mut self, id: FrameId) {
        let frame = {
            let slot = self
                .frames
                .get_mut(id.index as usize)
                .filter(|slot| slot.generation == id.generation);
            match slot.and_then(|slot| slot.frame.take()) {
                Some(frame) => frame,
                None => panic!("{} popped twice", id),
            }
        };
        let slot = &mut self.frames[id.index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        self.free_frames.push(id.index);

        let StackFrame {
            mut locals,
            open_var_refs,
            alloc_size,
        } = frame;
        let detached = open_var_refs.len();
        for r in open_var_refs {
            let cell = match self.cell_mut(r) {
                Some(cell) => cell,
                None => panic!("open var ref {} of {} is stale", r, id),
            };
            if let CellBody::VarRef(var_ref) = &mut cell.body {
                let VarRef::Attached { slot, .. } = *var_ref else {
                    panic!("var ref {} of {} is already detached", r, id);
                };
                let value = mem::replace(&mut locals[slot as usize], Value::Undefined);
                *var_ref = VarRef::Detached { value };
            }
            self.list_push_back(r.index(), ListId::Live);
        }
        for v in locals {
            self.free_value(v);
        }
        self.uncharge(alloc_size);
        trace!(%id, detached, "popped frame");
    }

    /// Creates a detached var ref holding `initial`, taking ownership of it.
    ///
    /// Used for module-level bindings that never lived in a stack frame.
    pub fn new_closure_var(&mut self, initial: Value) -> MemoryResult<GcRef> {
        let reservation = match self.reserve_cell(mem::size_of::<Cell>()) {
            Ok(reservation) => reservation,
            Err(err) => {
                self.free_value(initial);
                return Err(err);
            }
        };
        Ok(self.install_cell(
            reservation,
            GcKind::VarRef,
            CellBody::VarRef(VarRef::Detached { value: initial }),
            Some(ListId::Live),
        ))
    }

    /// Returns the var ref named by `r`.
    pub fn var_ref(&self, r: GcRef) -> Option<&VarRef> {
        match &self.cell(r)?.body {
            CellBody::VarRef(var_ref) => Some(var_ref),
            _ => None,
        }
    }

    /// Reads the variable behind `r`, returning a counted copy.
    ///
    /// # Panics
    ///
    /// Panics if `r` is not a live var ref.
    pub fn var_ref_get(&mut self, r: GcRef) -> Value {
        let v = match self.var_ref(r) {
            Some(VarRef::Detached { value }) => value.alias(),
            Some(VarRef::Attached { frame, slot }) => {
                let (frame, slot) = (*frame, *slot);
                let frame = match self.stack_frame(frame) {
                    Some(f) => f,
                    None => panic!("var ref {} is attached to dead {}", r, frame),
                };
                frame.locals[slot as usize].alias()
            }
            None => panic!("{} is not a live var ref", r),
        };
        if let Some(child) = v.gc_ref() {
            self.retain(child);
        }
        v
    }

    /// Stores `value` into the variable behind `r`, taking ownership of it.
    pub fn var_ref_set(&mut self, r: GcRef, value: Value) {
        let target = match self.cell_mut(r).map(|cell| &mut cell.body) {
            Some(CellBody::VarRef(VarRef::Detached { value: slot })) => {
                let old = mem::replace(slot, value);
                self.free_value(old);
                return;
            }
            Some(CellBody::VarRef(VarRef::Attached { frame, slot })) => (*frame, *slot),
            _ => panic!("{} is not a live var ref", r),
        };
        self.set_frame_local(target.0, target.1, value);
    }

    pub(crate) fn finalize_var_ref(&mut self, r: GcRef, var_ref: VarRef) {
        match var_ref {
            VarRef::Attached { frame, .. } => {
                let open = &mut self.stack_frame_mut(frame).open_var_refs;
                if let Some(pos) = open.iter().position(|&v| v == r) {
                    open.swap_remove(pos);
                }
            }
            VarRef::Detached { value } => self.free_value(value),
        }
    }
}
