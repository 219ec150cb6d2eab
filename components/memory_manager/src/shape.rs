//! Shapes: shared, hash-consed property layouts.
//!
//! Objects with the same prototype and the same properties added in the same
//! order with the same flags share one [`Shape`]. Hashed shapes are
//! registered in the heap's [`ShapeHashTable`] and are immutable while shared;
//! mutation goes through [`Heap::prepare_update`], which hands back a shape
//! that is uniquely owned and no longer hashed.
//!
//! Every in-place mutation bumps the shape's `version`. Together with the
//! generation in its handle this gives inline caches a cheap way to notice
//! that a layout they observed has changed.

use std::mem;
use std::ops::BitOr;

use core_types::{AtomId, GcRef, MemoryError, MemoryResult};
use tracing::{debug, trace, warn};

use crate::heap::{Cell, CellBody, GcKind, Heap, ListId};

/// Initial number of property slots in a new shape.
pub const PROP_INITIAL_SIZE: usize = 2;
/// Initial number of buckets in a shape's property hash.
pub const PROP_INITIAL_HASH_SIZE: usize = 4;
/// Initial `log2` size of the shape hash-consing table.
const SHAPE_HASH_INITIAL_BITS: u32 = 4;

/// Property attribute and kind flags.
///
/// The low bits are the usual attributes. The bits under [`PropFlags::TMASK`]
/// select how the object stores the property: a plain value, an accessor
/// pair or a reference to a closure variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PropFlags(u8);

impl PropFlags {
    /// No flags
    pub const NONE: PropFlags = PropFlags(0);
    /// Property can be deleted and reconfigured
    pub const CONFIGURABLE: PropFlags = PropFlags(1 << 0);
    /// Property value can be changed
    pub const WRITABLE: PropFlags = PropFlags(1 << 1);
    /// Property shows up in enumeration
    pub const ENUMERABLE: PropFlags = PropFlags(1 << 2);
    /// Configurable, writable and enumerable
    pub const C_W_E: PropFlags = PropFlags(0b111);
    /// The `length` property of arrays
    pub const LENGTH: PropFlags = PropFlags(1 << 3);
    /// Mask of the storage kind bits
    pub const TMASK: PropFlags = PropFlags(0b11 << 4);
    /// Plain value storage
    pub const NORMAL: PropFlags = PropFlags(0);
    /// Getter/setter pair
    pub const GETSET: PropFlags = PropFlags(1 << 4);
    /// Reference to a closure variable
    pub const VARREF: PropFlags = PropFlags(2 << 4);

    /// Raw bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Builds flags from raw bits.
    pub const fn from_bits(bits: u8) -> Self {
        PropFlags(bits)
    }

    /// Returns true if every bit of `other` is set.
    pub const fn contains(self, other: PropFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Storage kind: [`PropFlags::NORMAL`], [`PropFlags::GETSET`] or
    /// [`PropFlags::VARREF`].
    pub const fn kind(self) -> PropFlags {
        PropFlags(self.0 & Self::TMASK.0)
    }

    /// The same attributes with the storage kind replaced by `kind`.
    pub const fn with_kind(self, kind: PropFlags) -> PropFlags {
        PropFlags((self.0 & !Self::TMASK.0) | kind.0)
    }

    /// Returns true for plain value storage.
    pub const fn is_data(self) -> bool {
        self.0 & Self::TMASK.0 == 0
    }
}

impl BitOr for PropFlags {
    type Output = PropFlags;

    fn bitor(self, rhs: PropFlags) -> PropFlags {
        PropFlags(self.0 | rhs.0)
    }
}

/// One entry of a shape's property list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeProperty {
    /// Property name; [`AtomId::NULL`] for a deleted entry
    pub atom: AtomId,
    /// Attributes and storage kind
    pub flags: PropFlags,
    pub(crate) hash_next: u32,
}

/// Shape handle and version, as observed at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeStamp {
    /// The shape observed
    pub shape: GcRef,
    /// Its version at observation time
    pub version: u32,
}

/// Property layout shared by objects.
#[derive(Debug)]
pub struct Shape {
    pub(crate) proto: Option<GcRef>,
    pub(crate) props: Vec<ShapeProperty>,
    /// Bucket heads, 1-based indexes into `props`, 0 for an empty bucket
    pub(crate) prop_hash: Vec<u32>,
    pub(crate) prop_size: usize,
    pub(crate) hash: u32,
    pub(crate) is_hashed: bool,
    pub(crate) hash_next: Option<GcRef>,
    pub(crate) deleted_prop_count: u32,
    pub(crate) version: u32,
}

impl Shape {
    /// Prototype shared by objects of this shape.
    pub fn proto(&self) -> Option<GcRef> {
        self.proto
    }

    /// Property entries, deleted entries included.
    pub fn props(&self) -> &[ShapeProperty] {
        &self.props
    }

    /// Number of property entries, deleted entries included.
    pub fn prop_count(&self) -> usize {
        self.props.len()
    }

    /// Allocated property capacity.
    pub fn prop_size(&self) -> usize {
        self.prop_size
    }

    /// Number of deleted entries awaiting compaction.
    pub fn deleted_prop_count(&self) -> u32 {
        self.deleted_prop_count
    }

    /// Returns true if the shape is registered in the hash-consing table.
    pub fn is_hashed(&self) -> bool {
        self.is_hashed
    }

    /// Structural hash over the prototype and property list.
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Mutation counter.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Looks up `atom` through the shape's own property hash.
    ///
    /// Returns the property index and flags.
    pub fn find(&self, atom: AtomId) -> Option<(u32, PropFlags)> {
        if atom.is_null() {
            return None;
        }
        let mut h = self.prop_hash[self.bucket(atom)];
        while h != 0 {
            let pr = &self.props[(h - 1) as usize];
            if pr.atom == atom {
                return Some((h - 1, pr.flags));
            }
            h = pr.hash_next;
        }
        None
    }

    pub(crate) fn bucket(&self, atom: AtomId) -> usize {
        (atom.raw() & (self.prop_hash.len() as u32 - 1)) as usize
    }

    pub(crate) fn bump_version(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    /// Removes the entry at `index` from its bucket chain and turns it into a
    /// hole.
    pub(crate) fn remove_entry(&mut self, index: u32) {
        let atom = self.props[index as usize].atom;
        let bucket = self.bucket(atom);
        let next = self.props[index as usize].hash_next;
        if self.prop_hash[bucket] == index + 1 {
            self.prop_hash[bucket] = next;
        } else {
            let mut h = self.prop_hash[bucket];
            loop {
                assert!(h != 0, "property {} missing from its bucket", atom);
                let pr = &mut self.props[(h - 1) as usize];
                if pr.hash_next == index + 1 {
                    pr.hash_next = next;
                    break;
                }
                h = pr.hash_next;
            }
        }
        self.props[index as usize] = ShapeProperty {
            atom: AtomId::NULL,
            flags: PropFlags::NONE,
            hash_next: 0,
        };
        self.deleted_prop_count += 1;
        self.bump_version();
    }
}

/// The hash-consing table of shapes, held by the heap.
#[derive(Debug)]
pub(crate) struct ShapeHashTable {
    buckets: Vec<Option<GcRef>>,
    bits: u32,
    count: usize,
}

impl ShapeHashTable {
    pub(crate) fn new() -> Self {
        ShapeHashTable {
            buckets: vec![None; 1 << SHAPE_HASH_INITIAL_BITS],
            bits: SHAPE_HASH_INITIAL_BITS,
            count: 0,
        }
    }
}

const fn shape_hash(h: u32, val: u32) -> u32 {
    h.wrapping_add(val).wrapping_mul(0x9e37_0001)
}

fn shape_initial_hash(proto: Option<GcRef>) -> u32 {
    match proto {
        Some(p) => shape_hash(shape_hash(1, p.index()), p.generation()),
        None => shape_hash(1, 0),
    }
}

fn shape_transition_hash(hash: u32, atom: AtomId, flags: PropFlags) -> u32 {
    shape_hash(shape_hash(hash, atom.raw()), flags.bits() as u32)
}

fn bucket_index(hash: u32, bits: u32) -> usize {
    (hash >> (32 - bits)) as usize
}

pub(crate) fn shape_alloc_size(prop_size: usize, hash_size: usize) -> usize {
    mem::size_of::<Cell>()
        + prop_size * mem::size_of::<ShapeProperty>()
        + hash_size * mem::size_of::<u32>()
}

fn try_copy<T: Copy>(src: &[T], capacity: usize) -> Option<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(capacity.max(src.len())).ok()?;
    v.extend_from_slice(src);
    Some(v)
}

impl Heap {
    /// Returns the shape named by `r`.
    pub fn shape(&self, r: GcRef) -> Option<&Shape> {
        match &self.cell(r)?.body {
            CellBody::Shape(shape) => Some(shape),
            _ => None,
        }
    }

    pub(crate) fn shape_ref(&self, r: GcRef) -> &Shape {
        match self.shape(r) {
            Some(shape) => shape,
            None => panic!("{} is not a live shape", r),
        }
    }

    pub(crate) fn shape_mut_internal(&mut self, r: GcRef) -> &mut Shape {
        match self.cell_mut(r).map(|cell| &mut cell.body) {
            Some(CellBody::Shape(shape)) => shape,
            _ => panic!("{} is not a live shape", r),
        }
    }

    /// Mutable access to a shape that is uniquely owned and not hashed.
    ///
    /// Returns `None` for any other shape; call [`Heap::prepare_update`]
    /// first.
    pub(crate) fn shape_mut(&mut self, r: GcRef) -> Option<&mut Shape> {
        let cell = self.cell_mut(r)?;
        if cell.header.ref_count != 1 {
            return None;
        }
        match &mut cell.body {
            CellBody::Shape(shape) if !shape.is_hashed => Some(shape),
            _ => None,
        }
    }

    /// Current handle and version of shape `r`.
    pub fn shape_stamp(&self, r: GcRef) -> Option<ShapeStamp> {
        self.shape(r).map(|shape| ShapeStamp {
            shape: r,
            version: shape.version,
        })
    }

    /// Number of shapes registered in the hash-consing table.
    pub fn hashed_shape_count(&self) -> usize {
        self.shape_table.count
    }

    /// Returns the canonical empty shape for `proto`, creating it if needed.
    ///
    /// The caller owns one reference to the returned shape.
    pub fn shape_for_new_object(&mut self, proto: Option<GcRef>) -> MemoryResult<GcRef> {
        if let Some(sh) = self.find_hashed_shape_proto(proto) {
            self.retain(sh);
            return Ok(sh);
        }
        self.new_shape(proto)
    }

    fn find_hashed_shape_proto(&self, proto: Option<GcRef>) -> Option<GcRef> {
        let hash = shape_initial_hash(proto);
        let mut cur = self.shape_table.buckets[bucket_index(hash, self.shape_table.bits)];
        while let Some(r) = cur {
            let sh = self.shape_ref(r);
            if sh.hash == hash && sh.proto == proto && sh.props.is_empty() {
                return Some(r);
            }
            cur = sh.hash_next;
        }
        None
    }

    fn find_hashed_shape_prop(&self, from: GcRef, atom: AtomId, flags: PropFlags) -> Option<GcRef> {
        let sh = self.shape_ref(from);
        let hash = shape_transition_hash(sh.hash, atom, flags);
        let n = sh.props.len();
        let mut cur = self.shape_table.buckets[bucket_index(hash, self.shape_table.bits)];
        while let Some(r) = cur {
            let sh1 = self.shape_ref(r);
            if sh1.hash == hash
                && sh1.proto == sh.proto
                && sh1.props.len() == n + 1
                && sh1.props[..n]
                    .iter()
                    .zip(&sh.props)
                    .all(|(a, b)| a.atom == b.atom && a.flags == b.flags)
                && sh1.props[n].atom == atom
                && sh1.props[n].flags == flags
            {
                return Some(r);
            }
            cur = sh1.hash_next;
        }
        None
    }

    fn new_shape(&mut self, proto: Option<GcRef>) -> MemoryResult<GcRef> {
        let size = shape_alloc_size(PROP_INITIAL_SIZE, PROP_INITIAL_HASH_SIZE);
        let reservation = self.reserve_cell(size)?;
        let props = Vec::new();
        let mut prop_hash = Vec::new();
        if prop_hash.try_reserve_exact(PROP_INITIAL_HASH_SIZE).is_err() {
            self.cancel_reservation(reservation);
            return Err(MemoryError::OutOfMemory { requested: size });
        }
        prop_hash.resize(PROP_INITIAL_HASH_SIZE, 0);
        if let Some(p) = proto {
            self.retain(p);
        }
        let shape = Shape {
            proto,
            props,
            prop_hash,
            prop_size: PROP_INITIAL_SIZE,
            hash: shape_initial_hash(proto),
            is_hashed: false,
            hash_next: None,
            deleted_prop_count: 0,
            version: 0,
        };
        let r = self.install_cell(
            reservation,
            GcKind::Shape,
            CellBody::Shape(shape),
            Some(ListId::Live),
        );
        self.shape_hash_link(r);
        Ok(r)
    }

    /// Creates an unhashed copy of `from` with a reference count of one.
    fn clone_shape(&mut self, from: GcRef) -> MemoryResult<GcRef> {
        let size = {
            let sh = self.shape_ref(from);
            shape_alloc_size(sh.prop_size, sh.prop_hash.len())
        };
        let reservation = self.reserve_cell(size)?;
        let sh = self.shape_ref(from);
        let copied = try_copy(&sh.props, sh.prop_size)
            .and_then(|props| try_copy(&sh.prop_hash, 0).map(|prop_hash| (props, prop_hash)));
        let Some((props, prop_hash)) = copied else {
            self.cancel_reservation(reservation);
            return Err(MemoryError::OutOfMemory { requested: size });
        };
        let clone = Shape {
            proto: sh.proto,
            props,
            prop_hash,
            prop_size: sh.prop_size,
            hash: sh.hash,
            is_hashed: false,
            hash_next: None,
            deleted_prop_count: sh.deleted_prop_count,
            version: 0,
        };
        if let Some(p) = clone.proto {
            self.retain(p);
        }
        Ok(self.install_cell(
            reservation,
            GcKind::Shape,
            CellBody::Shape(clone),
            Some(ListId::Live),
        ))
    }

    /// Appends property `atom` with `flags` to the shape in `shape`.
    ///
    /// `shape` holds one counted reference on entry and on exit; it may be
    /// replaced by a hash-consed transition or by a private clone, in which
    /// case the reference to the previous shape is released. Returns the
    /// index of the new property.
    ///
    /// On `OutOfMemory` `shape` still names the shape it named before the
    /// call, with the same layout and hash-consing state.
    ///
    /// # Example
    ///
    /// ```
    /// use core_types::AtomId;
    /// use memory_manager::{Heap, PropFlags};
    ///
    /// let mut heap = Heap::new();
    /// let mut shape = heap.shape_for_new_object(None).unwrap();
    /// let x = AtomId::from_raw(7);
    ///
    /// let index = heap.add_property(&mut shape, x, PropFlags::C_W_E).unwrap();
    /// assert_eq!(index, 0);
    /// assert_eq!(heap.find_property(shape, x), Some((0, PropFlags::C_W_E)));
    /// heap.release(shape);
    /// ```
    pub fn add_property(
        &mut self,
        shape: &mut GcRef,
        atom: AtomId,
        flags: PropFlags,
    ) -> MemoryResult<u32> {
        let sh = *shape;
        let is_hashed = self.shape_ref(sh).is_hashed;
        if is_hashed {
            if let Some(next) = self.find_hashed_shape_prop(sh, atom, flags) {
                self.retain(next);
                *shape = next;
                self.release(sh);
                trace!(from = %sh, to = %next, %atom, "reused shape transition");
                return Ok(self.shape_ref(next).props.len() as u32 - 1);
            }
        }
        if self.ref_count(sh) != Some(1) {
            let clone = self.clone_shape(sh)?;
            let index = match self.add_shape_property(clone, atom, flags) {
                Ok(index) => index,
                Err(err) => {
                    self.release(clone);
                    return Err(err);
                }
            };
            *shape = clone;
            self.release(sh);
            // a clone of a hashed shape joins the table once it is complete
            if is_hashed {
                let s = self.shape_mut_internal(clone);
                s.hash = shape_transition_hash(s.hash, atom, flags);
                self.shape_hash_link(clone);
            }
            return Ok(index);
        }
        self.add_shape_property(sh, atom, flags)
    }

    fn add_shape_property(
        &mut self,
        sh: GcRef,
        atom: AtomId,
        flags: PropFlags,
    ) -> MemoryResult<u32> {
        let (is_hashed, count, size, new_hash) = {
            let s = self.shape_ref(sh);
            (
                s.is_hashed,
                s.props.len(),
                s.prop_size,
                shape_transition_hash(s.hash, atom, flags),
            )
        };
        // unhashed while resizing, rehashed under the new hash afterwards
        if is_hashed {
            self.shape_hash_unlink(sh);
        }
        if count >= size {
            if let Err(err) = self.resize_properties(sh, count + 1) {
                if is_hashed {
                    self.shape_hash_link(sh);
                }
                return Err(err);
            }
        }
        if is_hashed {
            self.shape_mut_internal(sh).hash = new_hash;
            self.shape_hash_link(sh);
        }
        let s = self.shape_mut_internal(sh);
        let index = s.props.len() as u32;
        let bucket = s.bucket(atom);
        s.props.push(ShapeProperty {
            atom,
            flags,
            hash_next: s.prop_hash[bucket],
        });
        s.prop_hash[bucket] = index + 1;
        s.bump_version();
        Ok(index)
    }

    /// Grows the property capacity of `sh` to at least `count`.
    fn resize_properties(&mut self, sh: GcRef, count: usize) -> MemoryResult<()> {
        let (prop_size, hash_size, len) = {
            let s = self.shape_ref(sh);
            (s.prop_size, s.prop_hash.len(), s.props.len())
        };
        let new_size = count.max(prop_size * 3 / 2);
        let mut new_hash_size = hash_size;
        while new_hash_size < new_size {
            new_hash_size *= 2;
        }
        let bytes = (new_size - prop_size) * mem::size_of::<ShapeProperty>()
            + (new_hash_size - hash_size) * mem::size_of::<u32>();
        self.charge_cell(sh, bytes)?;

        let mut new_hash = Vec::new();
        let grown = self
            .shape_mut_internal(sh)
            .props
            .try_reserve_exact(new_size - len)
            .is_ok()
            && (new_hash_size == hash_size || new_hash.try_reserve_exact(new_hash_size).is_ok());
        if !grown {
            self.uncharge_cell(sh, bytes);
            warn!(shape = %sh, new_size, "property array growth failed");
            return Err(MemoryError::OutOfMemory { requested: bytes });
        }

        let s = self.shape_mut_internal(sh);
        if new_hash_size != hash_size {
            new_hash.resize(new_hash_size, 0);
            let mask = new_hash_size as u32 - 1;
            for (i, pr) in s.props.iter_mut().enumerate() {
                if !pr.atom.is_null() {
                    let h = (pr.atom.raw() & mask) as usize;
                    pr.hash_next = new_hash[h];
                    new_hash[h] = i as u32 + 1;
                }
            }
            s.prop_hash = new_hash;
        }
        s.prop_size = new_size;
        Ok(())
    }

    /// Copy-on-write gate for shape mutation.
    ///
    /// On return `shape` names a shape that is uniquely owned and not
    /// hashed, so it may be mutated in place. A shared shape is cloned and
    /// the reference to it released; a unique hashed shape is unlinked from
    /// the hash-consing table. The shape's version is bumped either way.
    pub fn prepare_update(&mut self, shape: &mut GcRef) -> MemoryResult<()> {
        let sh = *shape;
        if self.ref_count(sh) != Some(1) {
            let clone = self.clone_shape(sh)?;
            *shape = clone;
            self.release(sh);
        } else if self.shape_ref(sh).is_hashed {
            self.shape_hash_unlink(sh);
        }
        self.shape_mut_internal(*shape).bump_version();
        Ok(())
    }

    /// Looks up `atom` in shape `shape` (own properties only).
    ///
    /// Returns the property index and flags. Callers walk
    /// [`Shape::proto`] for the prototype chain.
    pub fn find_property(&self, shape: GcRef, atom: AtomId) -> Option<(u32, PropFlags)> {
        self.shape(shape)?.find(atom)
    }

    pub(crate) fn shape_hash_link(&mut self, r: GcRef) {
        if 2 * (self.shape_table.count + 1) > self.shape_table.buckets.len() {
            self.resize_shape_hash(self.shape_table.bits + 1);
        }
        let h = bucket_index(self.shape_ref(r).hash, self.shape_table.bits);
        let head = self.shape_table.buckets[h];
        let s = self.shape_mut_internal(r);
        debug_assert!(!s.is_hashed, "{} is already hashed", r);
        s.hash_next = head;
        s.is_hashed = true;
        self.shape_table.buckets[h] = Some(r);
        self.shape_table.count += 1;
    }

    pub(crate) fn shape_hash_unlink(&mut self, r: GcRef) {
        let (hash, next) = {
            let s = self.shape_ref(r);
            debug_assert!(s.is_hashed, "{} is not hashed", r);
            (s.hash, s.hash_next)
        };
        let h = bucket_index(hash, self.shape_table.bits);
        if self.shape_table.buckets[h] == Some(r) {
            self.shape_table.buckets[h] = next;
        } else {
            let mut cur = self.shape_table.buckets[h];
            loop {
                let c = match cur {
                    Some(c) => c,
                    None => panic!("hashed shape {} missing from its bucket", r),
                };
                let c_next = self.shape_ref(c).hash_next;
                if c_next == Some(r) {
                    self.shape_mut_internal(c).hash_next = next;
                    break;
                }
                cur = c_next;
            }
        }
        let s = self.shape_mut_internal(r);
        s.hash_next = None;
        s.is_hashed = false;
        self.shape_table.count -= 1;
    }

    fn resize_shape_hash(&mut self, new_bits: u32) {
        let new_len = 1usize << new_bits;
        let mut buckets: Vec<Option<GcRef>> = Vec::new();
        if buckets.try_reserve_exact(new_len).is_err() {
            // longer chains, still correct
            warn!(bits = new_bits, "shape hash table growth failed");
            return;
        }
        buckets.resize(new_len, None);
        let old = mem::take(&mut self.shape_table.buckets);
        for head in old {
            let mut cur = head;
            while let Some(r) = cur {
                let s = self.shape_mut_internal(r);
                cur = s.hash_next;
                let h = bucket_index(s.hash, new_bits);
                s.hash_next = buckets[h];
                buckets[h] = Some(r);
            }
        }
        self.shape_table.buckets = buckets;
        self.shape_table.bits = new_bits;
        debug!(bits = new_bits, shapes = self.shape_table.count, "resized shape hash table");
    }

    pub(crate) fn finalize_shape(&mut self, shape: Shape) {
        if let Some(proto) = shape.proto {
            self.release(proto);
        }
    }
}
