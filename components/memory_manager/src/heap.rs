//! Heap registry: the arena of collectable cells.
//!
//! Every collectable allocation (objects, function bytecode, var refs, async
//! frames, shapes, contexts) lives in one arena of generation-checked slots
//! and carries a [`GcHeader`]. The header holds the reference count, the
//! collector's mark bit and the links of the intrusive list the cell is on:
//!
//! - the live list, which the cycle collector walks
//! - the temporary list of collection candidates (only during a collection)
//! - the zero-refcount list of cells queued for freeing
//!
//! Releasing the last reference to an object never recurses into its
//! children: the object is queued on the zero-refcount list and the queue is
//! drained iteratively, so freeing a long linked list does not grow the
//! native stack.

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use core_types::{GcRef, MemoryError, MemoryResult, Value};
use tracing::{trace, warn};

use crate::context::Context;
use crate::function::{AsyncFrame, FunctionBytecode};
use crate::object::JSObject;
use crate::shape::{Shape, ShapeHashTable};
use crate::var_ref::{FrameSlot, VarRef};

/// End-of-list marker for the intrusive lists.
pub(crate) const NIL: u32 = u32::MAX;

/// Default allocation volume before the first automatic collection (256 KiB)
pub const DEFAULT_GC_THRESHOLD: usize = 256 * 1024;

/// Type tag of a collectable cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcKind {
    /// Ordinary or exotic object
    Object,
    /// Compiled function
    FunctionBytecode,
    /// Closure variable cell
    VarRef,
    /// Suspended async function state
    AsyncFrame,
    /// Property layout record
    Shape,
    /// Realm holding the global object and intrinsic prototypes
    Context,
}

impl GcKind {
    /// Kinds whose release to zero goes through the zero-refcount queue and
    /// which the cycle collector finalizes directly.
    pub fn is_queued_on_release(self) -> bool {
        matches!(self, GcKind::Object | GcKind::FunctionBytecode)
    }
}

/// Phase of the heap with respect to freeing and cycle collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GcPhase {
    /// No freeing in progress
    #[default]
    None,
    /// Draining the zero-refcount queue
    Decref,
    /// Freeing the garbage found by a cycle collection
    RemoveCycles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListId {
    Live = 0,
    Tmp = 1,
    ZeroRef = 2,
}

/// Header embedded in every collectable cell.
#[derive(Debug, Clone)]
pub struct GcHeader {
    /// Number of counted references to the cell
    pub ref_count: i32,
    /// Set on cells visited by the decref pass of a collection
    pub mark: bool,
    /// Type tag
    pub kind: GcKind,
    pub(crate) prev: u32,
    pub(crate) next: u32,
    pub(crate) list: Option<ListId>,
    pub(crate) alloc_size: usize,
}

impl GcHeader {
    /// Estimated number of bytes accounted to this cell.
    pub fn alloc_size(&self) -> usize {
        self.alloc_size
    }
}

#[derive(Debug)]
pub(crate) enum CellBody {
    Object(JSObject),
    FunctionBytecode(FunctionBytecode),
    VarRef(VarRef),
    AsyncFrame(AsyncFrame),
    Shape(Shape),
    Context(Context),
    /// Finalized during cycle removal, still referenced by other garbage
    Zombie,
}

#[derive(Debug)]
pub(crate) struct Cell {
    pub(crate) header: GcHeader,
    pub(crate) body: CellBody,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    cell: Option<Cell>,
}

#[derive(Debug, Clone, Copy)]
struct ListHead {
    first: u32,
    last: u32,
    len: usize,
}

impl ListHead {
    const EMPTY: ListHead = ListHead {
        first: NIL,
        last: NIL,
        len: 0,
    };
}

/// A slot and its accounted size, reserved ahead of building a cell body.
#[derive(Debug)]
#[must_use]
pub(crate) struct Reservation {
    index: u32,
    size: usize,
}

/// Configuration for the heap and its collector.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Accounted bytes above which allocation triggers a collection
    pub gc_threshold: usize,
    /// Upper bound on accounted bytes; `None` means unlimited
    pub memory_limit: Option<usize>,
    /// Whether allocation may trigger the cycle collector
    pub auto_gc: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig {
            gc_threshold: DEFAULT_GC_THRESHOLD,
            memory_limit: None,
            auto_gc: true,
        }
    }
}

/// Snapshot of heap and collector statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcStats {
    /// Number of cycle collections run
    pub collections: usize,
    /// Objects and function bytecode finalized by the cycle collector
    pub objects_freed_by_gc: usize,
    /// Cells currently occupying a slot (zombies included)
    pub live_cells: usize,
    /// Accounted bytes
    pub malloc_size: usize,
    /// Accounted bytes that trigger the next automatic collection
    pub gc_threshold: usize,
}

/// The object-memory heap.
///
/// Owns every collectable cell, the shape hash-consing table and the stack
/// frames of running functions. All operations take `&mut self`; there is no
/// global state.
///
/// # Example
///
/// ```
/// use memory_manager::Heap;
///
/// let mut heap = Heap::new();
/// let obj = heap.new_object(None).unwrap();
/// assert_eq!(heap.ref_count(obj), Some(1));
///
/// heap.release(obj);
/// assert!(heap.object(obj).is_none());
/// ```
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    lists: [ListHead; 3],
    pub(crate) phase: GcPhase,
    pub(crate) shape_table: ShapeHashTable,
    pub(crate) frames: Vec<FrameSlot>,
    pub(crate) free_frames: Vec<u32>,
    pub(crate) drop_queue: Rc<RefCell<Vec<GcRef>>>,
    pub(crate) scratch: Vec<u32>,
    config: HeapConfig,
    malloc_size: usize,
    pub(crate) gc_threshold: usize,
    live_cells: usize,
    pub(crate) collections: usize,
    pub(crate) objects_freed_by_gc: usize,
}

impl Heap {
    /// Creates a heap with the default configuration.
    pub fn new() -> Self {
        Self::with_config(HeapConfig::default())
    }

    /// Creates a heap with the given configuration.
    pub fn with_config(config: HeapConfig) -> Self {
        Heap {
            slots: Vec::new(),
            free_slots: Vec::new(),
            lists: [ListHead::EMPTY; 3],
            phase: GcPhase::None,
            shape_table: ShapeHashTable::new(),
            frames: Vec::new(),
            free_frames: Vec::new(),
            drop_queue: Rc::new(RefCell::new(Vec::new())),
            scratch: Vec::new(),
            gc_threshold: config.gc_threshold,
            config,
            malloc_size: 0,
            live_cells: 0,
            collections: 0,
            objects_freed_by_gc: 0,
        }
    }

    /// Returns the heap configuration.
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Sets or clears the memory limit. Takes effect on the next allocation.
    pub fn set_memory_limit(&mut self, limit: Option<usize>) {
        self.config.memory_limit = limit;
    }

    /// Sets the accounted size that triggers the next automatic collection.
    pub fn set_gc_threshold(&mut self, threshold: usize) {
        self.config.gc_threshold = threshold;
        self.gc_threshold = threshold;
    }

    /// Current freeing phase.
    pub fn phase(&self) -> GcPhase {
        self.phase
    }

    /// Returns a statistics snapshot.
    pub fn stats(&self) -> GcStats {
        GcStats {
            collections: self.collections,
            objects_freed_by_gc: self.objects_freed_by_gc,
            live_cells: self.live_cells,
            malloc_size: self.malloc_size,
            gc_threshold: self.gc_threshold,
        }
    }

    /// Number of cells occupying a slot.
    pub fn live_cells(&self) -> usize {
        self.live_cells
    }

    /// Returns true if `r` still names an allocated cell.
    pub fn contains(&self, r: GcRef) -> bool {
        self.cell(r).is_some()
    }

    /// Returns the header of the cell named by `r`.
    pub fn header(&self, r: GcRef) -> Option<&GcHeader> {
        self.cell(r).map(|cell| &cell.header)
    }

    /// Returns the reference count of the cell named by `r`.
    pub fn ref_count(&self, r: GcRef) -> Option<i32> {
        self.header(r).map(|header| header.ref_count)
    }

    /// Returns the type tag of the cell named by `r`.
    pub fn kind(&self, r: GcRef) -> Option<GcKind> {
        self.header(r).map(|header| header.kind)
    }

    /// Returns true if `v` is an object that has not been finalized.
    pub fn is_live_object(&self, v: &Value) -> bool {
        match v.as_object() {
            Some(r) => self.object(r).is_some(),
            None => false,
        }
    }

    /// Adds a counted reference to `r`.
    ///
    /// # Panics
    ///
    /// Panics if `r` is stale.
    pub fn retain(&mut self, r: GcRef) {
        let cell = self
            .cell_mut(r)
            .unwrap_or_else(|| panic!("retain of stale handle {}", r));
        cell.header.ref_count += 1;
    }

    /// Drops a counted reference to `r`, freeing the cell at zero.
    ///
    /// Objects and function bytecode reaching zero are queued on the
    /// zero-refcount list and freed iteratively; the other kinds only release
    /// values and are freed immediately. During cycle removal nothing is
    /// queued: the collector owns every garbage cell.
    ///
    /// # Panics
    ///
    /// Panics if `r` is stale or its reference count is already zero.
    pub fn release(&mut self, r: GcRef) {
        let (ref_count, kind) = {
            let header = &mut self
                .cell_mut(r)
                .unwrap_or_else(|| panic!("release of stale handle {}", r))
                .header;
            assert!(header.ref_count > 0, "refcount underflow on {}", r);
            header.ref_count -= 1;
            (header.ref_count, header.kind)
        };
        if ref_count > 0 {
            return;
        }
        if kind.is_queued_on_release() {
            if self.phase != GcPhase::RemoveCycles {
                self.list_move(r.index(), ListId::ZeroRef);
                if self.phase == GcPhase::None {
                    self.free_zero_refcount();
                }
            }
        } else {
            self.free_cell(r.index());
        }
    }

    /// Copies `v`, adding a counted reference if it names a heap cell.
    pub fn dup_value(&mut self, v: &Value) -> Value {
        if let Some(r) = v.gc_ref() {
            self.retain(r);
        }
        v.alias()
    }

    /// Drops `v`, releasing its counted reference if it names a heap cell.
    pub fn free_value(&mut self, v: Value) {
        if let Some(r) = v.gc_ref() {
            self.release(r);
        }
    }

    fn free_zero_refcount(&mut self) {
        self.phase = GcPhase::Decref;
        loop {
            let index = self.lists[ListId::ZeroRef as usize].first;
            if index == NIL {
                break;
            }
            debug_assert_eq!(self.cell_at(index).header.ref_count, 0);
            self.free_gc_object(index);
        }
        self.phase = GcPhase::None;
    }

    /// Finalizes an object or function bytecode.
    ///
    /// During cycle removal a finalized cell that is still referenced by
    /// other garbage becomes a zombie: its body is gone but its slot stays
    /// allocated on the zero-refcount list until the final sweep.
    pub(crate) fn free_gc_object(&mut self, index: u32) {
        let body = mem::replace(&mut self.cell_at_mut(index).body, CellBody::Zombie);
        match body {
            CellBody::Object(obj) => self.finalize_object(obj),
            CellBody::FunctionBytecode(bytecode) => self.finalize_function_bytecode(bytecode),
            CellBody::Zombie => panic!("cell {} finalized twice", index),
            _ => panic!("cell {} is not an object or function bytecode", index),
        }
        self.list_unlink(index);
        if self.phase == GcPhase::RemoveCycles && self.cell_at(index).header.ref_count != 0 {
            self.list_push_back(index, ListId::ZeroRef);
        } else {
            self.deallocate(index);
        }
    }

    /// Frees a shape, var ref, async frame or context right away.
    fn free_cell(&mut self, index: u32) {
        let r = self.handle_at(index);
        if let CellBody::Shape(shape) = &self.cell_at(index).body {
            if shape.is_hashed {
                self.shape_hash_unlink(r);
            }
        }
        let body = mem::replace(&mut self.cell_at_mut(index).body, CellBody::Zombie);
        self.deallocate(index);
        match body {
            CellBody::Shape(shape) => self.finalize_shape(shape),
            CellBody::VarRef(var_ref) => self.finalize_var_ref(r, var_ref),
            CellBody::AsyncFrame(frame) => self.finalize_async_frame(frame),
            CellBody::Context(ctx) => self.finalize_context(ctx),
            _ => panic!("cell {} cannot be freed immediately", r),
        }
    }

    // ---- allocation ----

    /// Reserves a slot and accounts `size` bytes for a new cell.
    ///
    /// May run the cycle collector first. Nothing is published until
    /// [`Heap::install_cell`]; a failed reservation leaves the heap as it was.
    pub(crate) fn reserve_cell(&mut self, size: usize) -> MemoryResult<Reservation> {
        self.process_dropped_roots();
        self.trigger_gc();
        self.charge(size)?;
        let index = match self.free_slots.pop() {
            Some(index) => index,
            None => {
                if let Err(err) = self.slots.try_reserve(1) {
                    self.malloc_size -= size;
                    warn!(requested = size, "slot arena growth failed");
                    return Err(MemoryError::from_reserve(err, 1, mem::size_of::<Slot>()));
                }
                assert!(self.slots.len() < NIL as usize, "heap slot index overflow");
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    cell: None,
                });
                index
            }
        };
        Ok(Reservation { index, size })
    }

    /// Gives back a reservation that will not be installed.
    pub(crate) fn cancel_reservation(&mut self, reservation: Reservation) {
        self.malloc_size -= reservation.size;
        self.free_slots.push(reservation.index);
    }

    /// Publishes a new cell with a reference count of one.
    ///
    /// `list` is `None` only for var refs still attached to a stack frame.
    pub(crate) fn install_cell(
        &mut self,
        reservation: Reservation,
        kind: GcKind,
        body: CellBody,
        list: Option<ListId>,
    ) -> GcRef {
        let index = reservation.index;
        let slot = &mut self.slots[index as usize];
        debug_assert!(slot.cell.is_none(), "reserved slot {} is occupied", index);
        slot.cell = Some(Cell {
            header: GcHeader {
                ref_count: 1,
                mark: false,
                kind,
                prev: NIL,
                next: NIL,
                list: None,
                alloc_size: reservation.size,
            },
            body,
        });
        let r = GcRef::new(index, slot.generation);
        if let Some(list) = list {
            self.list_push_back(index, list);
        }
        self.live_cells += 1;
        trace!(cell = %r, ?kind, "allocated");
        r
    }

    /// Returns the slot to the free list and bumps its generation.
    pub(crate) fn deallocate(&mut self, index: u32) {
        self.list_unlink(index);
        let slot = &mut self.slots[index as usize];
        let cell = match slot.cell.take() {
            Some(cell) => cell,
            None => panic!("deallocating vacant slot {}", index),
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(index);
        self.malloc_size -= cell.header.alloc_size;
        self.live_cells -= 1;
        trace!(index, kind = ?cell.header.kind, "freed");
    }

    /// Accounts `bytes` against the memory limit.
    pub(crate) fn charge(&mut self, bytes: usize) -> MemoryResult<()> {
        let new_size = self.malloc_size.saturating_add(bytes);
        if let Some(limit) = self.config.memory_limit {
            if new_size > limit {
                warn!(requested = bytes, limit, "memory limit exceeded");
                return Err(MemoryError::OutOfMemory { requested: bytes });
            }
        }
        self.malloc_size = new_size;
        Ok(())
    }

    /// Accounts `bytes` of growth to the cell named by `r`.
    pub(crate) fn charge_cell(&mut self, r: GcRef, bytes: usize) -> MemoryResult<()> {
        self.charge(bytes)?;
        self.cell_at_mut(r.index()).header.alloc_size += bytes;
        Ok(())
    }

    pub(crate) fn uncharge(&mut self, bytes: usize) {
        self.malloc_size -= bytes;
    }

    pub(crate) fn uncharge_cell(&mut self, r: GcRef, bytes: usize) {
        self.uncharge(bytes);
        self.cell_at_mut(r.index()).header.alloc_size -= bytes;
    }

    fn trigger_gc(&mut self) {
        if self.config.auto_gc
            && self.phase == GcPhase::None
            && self.malloc_size > self.gc_threshold
        {
            self.run_gc();
            self.gc_threshold = self.malloc_size + (self.malloc_size >> 1);
        }
    }

    // ---- slot access ----

    pub(crate) fn cell(&self, r: GcRef) -> Option<&Cell> {
        let slot = self.slots.get(r.index() as usize)?;
        if slot.generation != r.generation() {
            return None;
        }
        slot.cell.as_ref()
    }

    pub(crate) fn cell_mut(&mut self, r: GcRef) -> Option<&mut Cell> {
        let slot = self.slots.get_mut(r.index() as usize)?;
        if slot.generation != r.generation() {
            return None;
        }
        slot.cell.as_mut()
    }

    pub(crate) fn cell_at(&self, index: u32) -> &Cell {
        match self.slots[index as usize].cell.as_ref() {
            Some(cell) => cell,
            None => panic!("slot {} is vacant", index),
        }
    }

    pub(crate) fn cell_at_mut(&mut self, index: u32) -> &mut Cell {
        match self.slots[index as usize].cell.as_mut() {
            Some(cell) => cell,
            None => panic!("slot {} is vacant", index),
        }
    }

    pub(crate) fn handle_at(&self, index: u32) -> GcRef {
        GcRef::new(index, self.slots[index as usize].generation)
    }

    // ---- intrusive lists ----

    pub(crate) fn list_first(&self, list: ListId) -> u32 {
        self.lists[list as usize].first
    }

    pub(crate) fn list_len(&self, list: ListId) -> usize {
        self.lists[list as usize].len
    }

    pub(crate) fn next_in_list(&self, index: u32) -> u32 {
        self.cell_at(index).header.next
    }

    pub(crate) fn list_push_back(&mut self, index: u32, list: ListId) {
        let last = self.lists[list as usize].last;
        {
            let header = &mut self.cell_at_mut(index).header;
            debug_assert!(header.list.is_none(), "cell {} is already linked", index);
            header.prev = last;
            header.next = NIL;
            header.list = Some(list);
        }
        if last == NIL {
            self.lists[list as usize].first = index;
        } else {
            self.cell_at_mut(last).header.next = index;
        }
        let head = &mut self.lists[list as usize];
        head.last = index;
        head.len += 1;
    }

    pub(crate) fn list_unlink(&mut self, index: u32) {
        let (prev, next, list) = {
            let header = &self.cell_at(index).header;
            (header.prev, header.next, header.list)
        };
        let Some(list) = list else {
            return;
        };
        if prev == NIL {
            self.lists[list as usize].first = next;
        } else {
            self.cell_at_mut(prev).header.next = next;
        }
        if next == NIL {
            self.lists[list as usize].last = prev;
        } else {
            self.cell_at_mut(next).header.prev = prev;
        }
        self.lists[list as usize].len -= 1;
        let header = &mut self.cell_at_mut(index).header;
        header.prev = NIL;
        header.next = NIL;
        header.list = None;
    }

    pub(crate) fn list_move(&mut self, index: u32, list: ListId) {
        self.list_unlink(index);
        self.list_push_back(index, list);
    }

    /// Number of cells the cycle collector walks.
    pub fn tracked_cells(&self) -> usize {
        self.list_len(ListId::Live)
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
