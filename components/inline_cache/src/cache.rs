//! Per-site property caches.
//!
//! A cache is keyed by property atom. Each atom owns a ring of
//! [`IC_CACHE_ITEM_CAPACITY`] items, so one access site can stay fast for a
//! handful of receiver shapes before it starts evicting.
//!
//! Entries never hold counted references. An item remembers the receiver's
//! [`ShapeStamp`]; a hit additionally requires every prototype between the
//! receiver and the holder to still carry the stamp it had when the entry
//! was filled. Shape handles are generation checked and every in-place shape
//! mutation bumps the version, so a freed, replaced or mutated shape can
//! never match a stale entry.

use std::collections::HashMap;

use arrayvec::ArrayVec;
use core_types::{AtomId, GcRef, MemoryError, MemoryResult};
use memory_manager::{Heap, PropFlags, ShapeStamp};
use tracing::trace;

/// Number of shapes remembered per atom
pub const IC_CACHE_ITEM_CAPACITY: usize = 4;

/// Longest prototype chain an entry will record
pub const IC_MAX_PROTO_DEPTH: usize = 4;

/// A prototype whose shape must stay unchanged for an entry to remain valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watchpoint {
    /// Prototype object on the path to the holder
    pub holder: GcRef,
    /// Its shape when the entry was filled
    pub stamp: ShapeStamp,
    /// Property the entry caches
    pub atom: AtomId,
}

impl Watchpoint {
    /// Whether `holder` still has the recorded shape.
    pub fn is_valid(&self, heap: &Heap) -> bool {
        heap.object_shape_stamp(self.holder) == Some(self.stamp)
    }
}

/// One remembered receiver shape.
#[derive(Debug, Clone, Default)]
pub struct InlineCacheRingItem {
    /// Receiver shape, `None` for an empty item
    pub shape: Option<ShapeStamp>,
    /// Object owning the property when it was found on the prototype chain
    pub proto: Option<GcRef>,
    /// Index of the property in the holder's shape
    pub prop_offset: u32,
    /// Flags of the property when the entry was filled
    pub flags: PropFlags,
    /// Prototypes between receiver and holder, holder included
    pub watchpoints: ArrayVec<Watchpoint, IC_MAX_PROTO_DEPTH>,
}

impl InlineCacheRingItem {
    fn scrub(&mut self) {
        *self = InlineCacheRingItem::default();
    }
}

/// The ring of items for one atom.
#[derive(Debug, Clone)]
pub struct InlineCacheRingSlot {
    /// Property name
    pub atom: AtomId,
    /// Remembered shapes
    pub items: [InlineCacheRingItem; IC_CACHE_ITEM_CAPACITY],
    /// Next item to overwrite
    pub index: usize,
}

impl InlineCacheRingSlot {
    fn new(atom: AtomId) -> Self {
        InlineCacheRingSlot {
            atom,
            items: Default::default(),
            index: 0,
        }
    }
}

/// Result of a successful lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcHit {
    /// Index of the property in the holder's shape
    pub offset: u32,
    /// Holder when it is a prototype, `None` for an own property
    pub proto: Option<GcRef>,
    /// Property flags
    pub flags: PropFlags,
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IcStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that found no valid item
    pub misses: u64,
    /// Items filled or overwritten by `update`
    pub updates: u64,
    /// Occupied items overwritten by another shape
    pub evictions: u64,
}

/// Inline cache for one access site.
#[derive(Debug, Default)]
pub struct InlineCache {
    hash_slots: HashMap<AtomId, usize>,
    ring: Vec<InlineCacheRingSlot>,
    stats: IcStats,
}

impl InlineCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up `atom` for receiver `obj`.
    ///
    /// An item whose receiver shape matches but whose watchpoints no longer
    /// hold is scrubbed and the lookup misses.
    pub fn lookup(&mut self, heap: &Heap, atom: AtomId, obj: GcRef) -> Option<IcHit> {
        let hit = self.probe(heap, atom, obj);
        if hit.is_some() {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        hit
    }

    fn probe(&mut self, heap: &Heap, atom: AtomId, obj: GcRef) -> Option<IcHit> {
        let stamp = heap.object_shape_stamp(obj)?;
        let slot = &mut self.ring[*self.hash_slots.get(&atom)?];
        let item = slot.items.iter_mut().find(|item| item.shape == Some(stamp))?;
        if item.watchpoints.iter().all(|wp| wp.is_valid(heap)) {
            return Some(IcHit {
                offset: item.prop_offset,
                proto: item.proto,
                flags: item.flags,
            });
        }
        trace!(%atom, shape = %stamp.shape, "prototype changed, scrubbing entry");
        item.scrub();
        None
    }

    /// Records that `atom` of receiver `obj` lives at `offset` of `proto`, or
    /// of `obj` itself when `proto` is `None`.
    ///
    /// Returns `Ok(false)` without caching when `proto` is not on the
    /// receiver's prototype chain, lies deeper than [`IC_MAX_PROTO_DEPTH`],
    /// or does not have `atom` at `offset`.
    pub fn update(
        &mut self,
        heap: &Heap,
        atom: AtomId,
        obj: GcRef,
        offset: u32,
        proto: Option<GcRef>,
    ) -> MemoryResult<bool> {
        let Some(stamp) = heap.object_shape_stamp(obj) else {
            return Ok(false);
        };
        let holder = proto.unwrap_or(obj);
        let flags = match heap
            .object(holder)
            .and_then(|o| heap.shape(o.shape()))
            .and_then(|s| s.props().get(offset as usize))
        {
            Some(pr) if pr.atom == atom => pr.flags,
            _ => return Ok(false),
        };

        let mut watchpoints = ArrayVec::new();
        if let Some(holder) = proto {
            let mut cur = heap.object_proto(obj);
            loop {
                let Some(p) = cur else {
                    return Ok(false);
                };
                let Some(stamp) = heap.object_shape_stamp(p) else {
                    return Ok(false);
                };
                if watchpoints
                    .try_push(Watchpoint {
                        holder: p,
                        stamp,
                        atom,
                    })
                    .is_err()
                {
                    trace!(%atom, "prototype chain too deep to cache");
                    return Ok(false);
                }
                if p == holder {
                    break;
                }
                cur = heap.object_proto(p);
            }
        }

        let slot = self.slot_for(atom)?;
        let slot = &mut self.ring[slot];
        let index = match slot
            .items
            .iter()
            .position(|item| matches!(item.shape, Some(s) if s.shape == stamp.shape))
        {
            Some(i) => i,
            None => {
                let i = slot.index;
                slot.index = (i + 1) % IC_CACHE_ITEM_CAPACITY;
                if slot.items[i].shape.is_some() {
                    self.stats.evictions += 1;
                }
                i
            }
        };
        slot.items[index] = InlineCacheRingItem {
            shape: Some(stamp),
            proto,
            prop_offset: offset,
            flags,
            watchpoints,
        };
        self.stats.updates += 1;
        Ok(true)
    }

    fn slot_for(&mut self, atom: AtomId) -> MemoryResult<usize> {
        if let Some(&i) = self.hash_slots.get(&atom) {
            return Ok(i);
        }
        if self.ring.try_reserve(1).is_err() || self.hash_slots.try_reserve(1).is_err() {
            return Err(MemoryError::OutOfMemory {
                requested: std::mem::size_of::<InlineCacheRingSlot>(),
            });
        }
        let i = self.ring.len();
        self.ring.push(InlineCacheRingSlot::new(atom));
        self.hash_slots.insert(atom, i);
        Ok(i)
    }

    /// Forgets every entry for `atom`.
    pub fn invalidate(&mut self, atom: AtomId) {
        if let Some(&i) = self.hash_slots.get(&atom) {
            let slot = &mut self.ring[i];
            for item in slot.items.iter_mut() {
                item.scrub();
            }
            slot.index = 0;
        }
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.hash_slots.clear();
        self.ring.clear();
    }

    /// Ring slot for `atom`, if one was ever filled.
    pub fn slot(&self, atom: AtomId) -> Option<&InlineCacheRingSlot> {
        self.hash_slots.get(&atom).map(|&i| &self.ring[i])
    }

    /// Counters since the cache was created.
    pub fn stats(&self) -> IcStats {
        self.stats
    }
}
