//! Trial-deletion cycle collector.
//!
//! Reference counting frees everything except cycles. The collector finds
//! unreachable cycles without knowing the roots:
//!
//! 1. Decref: subtract every edge between tracked cells from the reference
//!    counts. What is left of a count is the number of references from
//!    outside the heap (frames, roots, the embedder).
//! 2. Scan: cells with a non-zero count are alive, and so is everything they
//!    reach; their edges are added back. Cells still at zero are garbage.
//! 3. Free: finalize the garbage objects and function bytecode, which
//!    releases the remaining edges and frees the rest of the garbage.
//!
//! Attached var refs are not tracked and are never walked; the frame they
//! point into acts as a root.

use std::mem;

use core_types::GcRef;
use tracing::debug;

use crate::heap::{CellBody, GcKind, GcPhase, Heap, ListId, NIL};
use crate::object::{ObjectPayload, Property};
use crate::var_ref::VarRef;

impl Heap {
    /// Runs a full cycle collection.
    ///
    /// Does nothing while the heap is already freeing cells, so a finalizer
    /// or an allocation triggered from inside a collection never starts a
    /// nested one.
    ///
    /// # Returns
    ///
    /// The number of objects and function bytecode cells the collection
    /// finalized.
    pub fn run_gc(&mut self) -> usize {
        if self.phase != GcPhase::None {
            return 0;
        }
        self.process_dropped_roots();
        let tracked = self.list_len(ListId::Live);
        let before = self.objects_freed_by_gc;

        self.gc_decref();
        self.gc_scan();
        self.gc_free_cycles();

        self.collections += 1;
        let freed = self.objects_freed_by_gc - before;
        debug!(
            collection = self.collections,
            tracked,
            freed,
            live_cells = self.live_cells(),
            "cycle collection finished"
        );
        freed
    }

    /// Pushes the slot index of every tracked child of the cell at `index`.
    fn mark_children(&self, index: u32, out: &mut Vec<u32>) {
        let mut push = |r: GcRef| out.push(r.index());
        match &self.cell_at(index).body {
            CellBody::Object(obj) => {
                push(obj.shape);
                for prop in &obj.properties {
                    match prop {
                        Property::Value(v) => v.gc_ref().into_iter().for_each(&mut push),
                        Property::GetSet { getter, setter } => {
                            getter.iter().chain(setter.iter()).copied().for_each(&mut push)
                        }
                        Property::VarRef(r) => {
                            if self.is_detached_var_ref(*r) {
                                push(*r);
                            }
                        }
                    }
                }
                match &obj.payload {
                    ObjectPayload::Ordinary => {}
                    ObjectPayload::Array { elements } => {
                        elements.iter().filter_map(|v| v.gc_ref()).for_each(&mut push)
                    }
                    ObjectPayload::Closure {
                        bytecode,
                        var_refs,
                        home_object,
                    } => {
                        push(*bytecode);
                        for r in var_refs {
                            if self.is_detached_var_ref(*r) {
                                push(*r);
                            }
                        }
                        home_object.iter().copied().for_each(&mut push);
                    }
                }
            }
            CellBody::FunctionBytecode(bytecode) => {
                bytecode.cpool.iter().filter_map(|v| v.gc_ref()).for_each(&mut push);
                bytecode.realm.iter().copied().for_each(&mut push);
            }
            CellBody::VarRef(VarRef::Detached { value }) => {
                value.gc_ref().into_iter().for_each(&mut push)
            }
            CellBody::VarRef(VarRef::Attached { .. }) => {}
            CellBody::AsyncFrame(frame) => {
                if frame.is_active {
                    frame.this_val.gc_ref().into_iter().for_each(&mut push);
                    frame.frame_values.iter().filter_map(|v| v.gc_ref()).for_each(&mut push);
                }
                frame.resolving_funcs.iter().filter_map(|v| v.gc_ref()).for_each(&mut push);
            }
            CellBody::Shape(shape) => shape.proto.iter().copied().for_each(&mut push),
            CellBody::Context(ctx) => {
                push(ctx.global_obj);
                push(ctx.object_proto);
                push(ctx.function_proto);
                push(ctx.array_proto);
                push(ctx.array_shape);
            }
            CellBody::Zombie => {}
        }
    }

    fn is_detached_var_ref(&self, r: GcRef) -> bool {
        matches!(
            self.cell(r).map(|cell| &cell.body),
            Some(CellBody::VarRef(VarRef::Detached { .. }))
        )
    }

    fn gc_decref(&mut self) {
        let mut children = mem::take(&mut self.scratch);
        let mut index = self.list_first(ListId::Live);
        while index != NIL {
            // children only move behind the cursor, never onto it
            let next = self.next_in_list(index);
            children.clear();
            self.mark_children(index, &mut children);
            for &child in &children {
                let (ref_count, mark) = {
                    let header = &mut self.cell_at_mut(child).header;
                    debug_assert!(header.ref_count > 0, "decref below zero on slot {}", child);
                    header.ref_count -= 1;
                    (header.ref_count, header.mark)
                };
                if ref_count == 0 && mark {
                    self.list_move(child, ListId::Tmp);
                }
            }
            let ref_count = {
                let header = &mut self.cell_at_mut(index).header;
                header.mark = true;
                header.ref_count
            };
            if ref_count == 0 {
                self.list_move(index, ListId::Tmp);
            }
            index = next;
        }
        children.clear();
        self.scratch = children;
    }

    fn gc_scan(&mut self) {
        let mut children = mem::take(&mut self.scratch);
        let mut index = self.list_first(ListId::Live);
        while index != NIL {
            self.cell_at_mut(index).header.mark = false;
            children.clear();
            self.mark_children(index, &mut children);
            for &child in &children {
                let header = &mut self.cell_at_mut(child).header;
                header.ref_count += 1;
                if header.ref_count == 1 {
                    // reachable after all: back to the live list, scanned later
                    header.mark = false;
                    self.list_move(child, ListId::Live);
                }
            }
            index = self.next_in_list(index);
        }

        // restore the counts of the garbage so freeing it balances
        let mut index = self.list_first(ListId::Tmp);
        while index != NIL {
            children.clear();
            self.mark_children(index, &mut children);
            for &child in &children {
                self.cell_at_mut(child).header.ref_count += 1;
            }
            index = self.next_in_list(index);
        }
        children.clear();
        self.scratch = children;
    }

    fn gc_free_cycles(&mut self) {
        self.phase = GcPhase::RemoveCycles;
        loop {
            let index = self.list_first(ListId::Tmp);
            if index == NIL {
                break;
            }
            let kind = self.cell_at(index).header.kind;
            if kind.is_queued_on_release() {
                self.free_gc_object(index);
                self.objects_freed_by_gc += 1;
            } else {
                // freed when its owners are finalized
                self.list_move(index, ListId::ZeroRef);
            }
        }
        self.phase = GcPhase::None;

        loop {
            let index = self.list_first(ListId::ZeroRef);
            if index == NIL {
                break;
            }
            debug_assert!(
                matches!(
                    self.cell_at(index).header.kind,
                    GcKind::Object | GcKind::FunctionBytecode
                ),
                "only zombies may outlive cycle removal"
            );
            self.deallocate(index);
        }
    }
}
