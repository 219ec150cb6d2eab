//! JavaScript object representation
//!
//! Provides the core JSObject type with shape-based property storage. The
//! object keeps one [`Property`] per entry of its shape, in the same order,
//! so a property found at index `i` in the shape lives at `properties[i]`.

use std::mem;

use core_types::{AtomId, GcRef, MemoryError, MemoryResult, Value};
use tracing::trace;

use crate::heap::{Cell, CellBody, GcKind, Heap, ListId};
use crate::shape::{shape_alloc_size, PropFlags, ShapeStamp, PROP_INITIAL_SIZE};

/// Storage of one own property.
#[derive(Debug)]
pub enum Property {
    /// Plain value
    Value(Value),
    /// Accessor pair
    GetSet {
        /// Getter function object
        getter: Option<GcRef>,
        /// Setter function object
        setter: Option<GcRef>,
    },
    /// Binding stored in a closure variable (module namespaces)
    VarRef(GcRef),
}

impl Property {
    /// Returns the stored value of a plain property.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Property::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// Class-specific data carried by an object.
#[derive(Debug)]
pub enum ObjectPayload {
    /// No extra data
    Ordinary,
    /// Dense array elements
    Array {
        /// Element values
        elements: Vec<Value>,
    },
    /// Function closure
    Closure {
        /// Compiled function
        bytecode: GcRef,
        /// Captured variables, in closure variable order
        var_refs: Vec<GcRef>,
        /// Object used for `super` lookups
        home_object: Option<GcRef>,
    },
}

/// Object class, derived from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    /// Ordinary object
    Object,
    /// Array exotic object
    Array,
    /// Function closure
    Closure,
}

/// JavaScript object with shape-based property storage
#[derive(Debug)]
pub struct JSObject {
    pub(crate) shape: GcRef,
    pub(crate) properties: Vec<Property>,
    pub(crate) extensible: bool,
    pub(crate) payload: ObjectPayload,
}

impl JSObject {
    /// Shape describing this object's layout
    pub fn shape(&self) -> GcRef {
        self.shape
    }

    /// Own property storage, indexed like the shape's property list
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Class-specific data
    pub fn payload(&self) -> &ObjectPayload {
        &self.payload
    }

    /// Object class
    pub fn class(&self) -> ObjectClass {
        match self.payload {
            ObjectPayload::Ordinary => ObjectClass::Object,
            ObjectPayload::Array { .. } => ObjectClass::Array,
            ObjectPayload::Closure { .. } => ObjectClass::Closure,
        }
    }

    /// Whether new properties may be added
    pub fn is_extensible(&self) -> bool {
        self.extensible
    }
}

/// Where a property lookup found its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyLocation {
    /// Object owning the property: the receiver or one of its prototypes
    pub holder: GcRef,
    /// Index in the holder's shape
    pub offset: u32,
    /// Property flags
    pub flags: PropFlags,
    /// Number of prototype hops from the receiver (0 for own properties)
    pub depth: usize,
}

impl Heap {
    /// Returns the object named by `r`, or `None` if it is stale or finalized.
    pub fn object(&self, r: GcRef) -> Option<&JSObject> {
        match &self.cell(r)?.body {
            CellBody::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub(crate) fn object_ref(&self, r: GcRef) -> &JSObject {
        match self.object(r) {
            Some(obj) => obj,
            None => panic!("{} is not a live object", r),
        }
    }

    pub(crate) fn object_mut(&mut self, r: GcRef) -> &mut JSObject {
        match self.cell_mut(r).map(|cell| &mut cell.body) {
            Some(CellBody::Object(obj)) => obj,
            _ => panic!("{} is not a live object", r),
        }
    }

    /// Prototype of object `r`.
    pub fn object_proto(&self, r: GcRef) -> Option<GcRef> {
        let obj = self.object(r)?;
        self.shape(obj.shape)?.proto
    }

    /// Current shape stamp of object `r`.
    pub fn object_shape_stamp(&self, r: GcRef) -> Option<ShapeStamp> {
        self.shape_stamp(self.object(r)?.shape)
    }

    /// Creates an ordinary object with prototype `proto`.
    ///
    /// The prototype is retained; the caller owns the returned reference.
    pub fn new_object(&mut self, proto: Option<GcRef>) -> MemoryResult<GcRef> {
        let shape = self.shape_for_new_object(proto)?;
        self.new_object_from_shape(shape, ObjectPayload::Ordinary)
    }

    /// Creates an object of shape `shape` carrying `payload`.
    ///
    /// Takes ownership of the reference to `shape` and of every reference
    /// held by `payload`, releasing them if the allocation fails. Properties
    /// already described by the shape start out `undefined`.
    pub fn new_object_from_shape(
        &mut self,
        shape: GcRef,
        payload: ObjectPayload,
    ) -> MemoryResult<GcRef> {
        let (prop_count, prop_size) = {
            let sh = self.shape_ref(shape);
            (sh.prop_count(), sh.prop_size().max(PROP_INITIAL_SIZE))
        };
        let size = mem::size_of::<Cell>() + prop_size * mem::size_of::<Property>();
        let reservation = match self.reserve_cell(size) {
            Ok(reservation) => reservation,
            Err(err) => {
                self.release(shape);
                self.release_payload(payload);
                return Err(err);
            }
        };
        let mut properties = Vec::new();
        if properties.try_reserve_exact(prop_size).is_err() {
            self.cancel_reservation(reservation);
            self.release(shape);
            self.release_payload(payload);
            return Err(MemoryError::OutOfMemory { requested: size });
        }
        properties.extend((0..prop_count).map(|_| Property::Value(Value::Undefined)));
        let obj = JSObject {
            shape,
            properties,
            extensible: true,
            payload,
        };
        Ok(self.install_cell(
            reservation,
            GcKind::Object,
            CellBody::Object(obj),
            Some(ListId::Live),
        ))
    }

    /// Looks up own property `atom` of `obj`.
    pub fn get_own_property(&self, obj: GcRef, atom: AtomId) -> Option<&Property> {
        let o = self.object(obj)?;
        let (index, _) = self.find_property(o.shape, atom)?;
        o.properties.get(index as usize)
    }

    /// Returns the index and flags of own property `atom` of `obj`.
    pub fn find_own_property(&self, obj: GcRef, atom: AtomId) -> Option<(u32, PropFlags)> {
        self.find_property(self.object(obj)?.shape, atom)
    }

    /// Walks the prototype chain of `obj` for `atom`.
    pub fn lookup_property(&self, obj: GcRef, atom: AtomId) -> Option<PropertyLocation> {
        let mut cur = Some(obj);
        let mut depth = 0;
        while let Some(o) = cur {
            let shape = self.shape(self.object(o)?.shape)?;
            if let Some((offset, flags)) = shape.find(atom) {
                return Some(PropertyLocation {
                    holder: o,
                    offset,
                    flags,
                    depth,
                });
            }
            cur = shape.proto();
            depth += 1;
        }
        None
    }

    /// Reads property `atom` of `obj`, following the prototype chain.
    ///
    /// Returns a counted copy of the value, `undefined` when absent.
    /// Accessors are not invoked at this layer and read as `undefined`.
    pub fn get_property(&mut self, obj: GcRef, atom: AtomId) -> Value {
        match self.lookup_property(obj, atom) {
            Some(loc) => self.read_slot(loc.holder, loc.offset).unwrap_or(Value::Undefined),
            None => Value::Undefined,
        }
    }

    /// Reads the property stored at `offset` in `obj`.
    ///
    /// Returns a counted copy for plain and var-ref properties, `None` for
    /// accessors or an out-of-range offset.
    pub fn read_slot(&mut self, obj: GcRef, offset: u32) -> Option<Value> {
        let var_ref = match self.object(obj)?.properties.get(offset as usize)? {
            Property::Value(v) => {
                let v = v.alias();
                if let Some(r) = v.gc_ref() {
                    self.retain(r);
                }
                return Some(v);
            }
            Property::VarRef(r) => *r,
            Property::GetSet { .. } => return None,
        };
        Some(self.var_ref_get(var_ref))
    }

    /// Replaces the plain value stored at `offset` in `obj`.
    ///
    /// # Panics
    ///
    /// Panics if the slot does not hold a plain value.
    pub fn write_slot(&mut self, obj: GcRef, offset: u32, value: Value) {
        let slot = &mut self.object_mut(obj).properties[offset as usize];
        let old = match slot {
            Property::Value(old) => mem::replace(old, value),
            _ => panic!("slot {} of {} is not a plain value", offset, obj),
        };
        self.free_value(old);
    }

    /// Defines own data property `atom` on `obj`, taking ownership of `value`.
    ///
    /// An existing property is overwritten and its flags replaced. Returns
    /// `Ok(false)` if the property is new and the object is not extensible.
    pub fn define_property(
        &mut self,
        obj: GcRef,
        atom: AtomId,
        flags: PropFlags,
        value: Value,
    ) -> MemoryResult<bool> {
        self.define_own(obj, atom, flags.with_kind(PropFlags::NORMAL), Property::Value(value))
    }

    /// Defines an accessor property. `getter` and `setter` are retained.
    pub fn define_accessor(
        &mut self,
        obj: GcRef,
        atom: AtomId,
        flags: PropFlags,
        getter: Option<GcRef>,
        setter: Option<GcRef>,
    ) -> MemoryResult<bool> {
        for f in getter.iter().chain(setter.iter()) {
            self.retain(*f);
        }
        self.define_own(
            obj,
            atom,
            flags.with_kind(PropFlags::GETSET),
            Property::GetSet { getter, setter },
        )
    }

    /// Defines a property backed by closure variable `var_ref`, taking
    /// ownership of the reference.
    pub fn define_var_ref_property(
        &mut self,
        obj: GcRef,
        atom: AtomId,
        flags: PropFlags,
        var_ref: GcRef,
    ) -> MemoryResult<bool> {
        self.define_own(obj, atom, flags.with_kind(PropFlags::VARREF), Property::VarRef(var_ref))
    }

    fn define_own(
        &mut self,
        obj: GcRef,
        atom: AtomId,
        flags: PropFlags,
        prop: Property,
    ) -> MemoryResult<bool> {
        let shape = self.object_ref(obj).shape;
        if let Some((index, old_flags)) = self.find_property(shape, atom) {
            if old_flags != flags {
                let mut sh = shape;
                let updated = self.prepare_update(&mut sh);
                self.object_mut(obj).shape = sh;
                if let Err(err) = updated {
                    self.release_property(prop);
                    return Err(err);
                }
                self.shape_mut_internal(sh).props[index as usize].flags = flags;
            }
            let old = mem::replace(&mut self.object_mut(obj).properties[index as usize], prop);
            self.release_property(old);
            return Ok(true);
        }
        if !self.object_ref(obj).extensible {
            self.release_property(prop);
            return Ok(false);
        }
        self.add_object_property(obj, atom, flags, prop)?;
        Ok(true)
    }

    /// Appends a new own property. `prop` is released on failure.
    fn add_object_property(
        &mut self,
        obj: GcRef,
        atom: AtomId,
        flags: PropFlags,
        prop: Property,
    ) -> MemoryResult<u32> {
        if let Err(err) = self.reserve_property_slot(obj) {
            self.release_property(prop);
            return Err(err);
        }
        let mut sh = self.object_ref(obj).shape;
        let added = self.add_property(&mut sh, atom, flags);
        let o = self.object_mut(obj);
        o.shape = sh;
        match added {
            Ok(index) => {
                o.properties.push(prop);
                debug_assert_eq!(index as usize + 1, o.properties.len());
                Ok(index)
            }
            Err(err) => {
                self.release_property(prop);
                Err(err)
            }
        }
    }

    fn reserve_property_slot(&mut self, obj: GcRef) -> MemoryResult<()> {
        let (len, cap) = {
            let o = self.object_ref(obj);
            (o.properties.len(), o.properties.capacity())
        };
        if len < cap {
            return Ok(());
        }
        let target = (len + 1).max(cap * 3 / 2);
        let bytes = (target - cap) * mem::size_of::<Property>();
        self.charge_cell(obj, bytes)?;
        let failed = self
            .object_mut(obj)
            .properties
            .try_reserve_exact(target - len)
            .is_err();
        if failed {
            self.uncharge_cell(obj, bytes);
            return Err(MemoryError::OutOfMemory { requested: bytes });
        }
        Ok(())
    }

    /// Assigns `value` to property `atom` of `obj`.
    ///
    /// Writes an existing own writable data property in place (or the
    /// variable behind a var-ref property), otherwise adds a new
    /// configurable, writable, enumerable property. Returns `Ok(false)` when
    /// the assignment is refused: read-only or accessor property, or a new
    /// property on a non-extensible object.
    pub fn set_property(&mut self, obj: GcRef, atom: AtomId, value: Value) -> MemoryResult<bool> {
        if let Some((index, flags)) = self.find_own_property(obj, atom) {
            if !flags.contains(PropFlags::WRITABLE) || flags.kind() == PropFlags::GETSET {
                self.free_value(value);
                return Ok(false);
            }
            if flags.kind() == PropFlags::VARREF {
                let r = match &self.object_ref(obj).properties[index as usize] {
                    Property::VarRef(r) => *r,
                    other => panic!("var-ref property stored as {:?}", other),
                };
                self.var_ref_set(r, value);
            } else {
                self.write_slot(obj, index, value);
            }
            return Ok(true);
        }
        self.define_own(obj, atom, PropFlags::C_W_E, Property::Value(value))
    }

    /// Deletes own property `atom` of `obj`.
    ///
    /// Returns `Ok(false)` for a non-configurable property and `Ok(true)`
    /// otherwise, including when the property does not exist. The entry
    /// becomes a hole in the shape; the layout is compacted once holes make
    /// up half of it.
    pub fn delete_property(&mut self, obj: GcRef, atom: AtomId) -> MemoryResult<bool> {
        let Some((index, flags)) = self.find_own_property(obj, atom) else {
            return Ok(true);
        };
        if !flags.contains(PropFlags::CONFIGURABLE) {
            return Ok(false);
        }
        let mut sh = self.object_ref(obj).shape;
        let updated = self.prepare_update(&mut sh);
        self.object_mut(obj).shape = sh;
        updated?;

        let s = self.shape_mut_internal(sh);
        s.remove_entry(index);
        let deleted = s.deleted_prop_count as usize;
        let should_compact = deleted >= 8 && deleted >= s.prop_count() / 2;
        let old = mem::replace(
            &mut self.object_mut(obj).properties[index as usize],
            Property::Value(Value::Undefined),
        );
        self.release_property(old);
        if should_compact {
            if let Err(err) = self.compact_properties(obj) {
                trace!(object = %obj, %err, "compaction skipped");
            }
        }
        Ok(true)
    }

    /// Rebuilds the layout of `obj` without holes left by deletions.
    pub fn compact_properties(&mut self, obj: GcRef) -> MemoryResult<()> {
        let mut sh = self.object_ref(obj).shape;
        let updated = self.prepare_update(&mut sh);
        self.object_mut(obj).shape = sh;
        updated?;

        let (count, deleted, prop_size, hash_size) = {
            let s = self.shape_ref(sh);
            (
                s.prop_count(),
                s.deleted_prop_count as usize,
                s.prop_size,
                s.prop_hash.len(),
            )
        };
        let new_size = PROP_INITIAL_SIZE.max(count - deleted);
        let mut new_hash_size = hash_size;
        while new_hash_size / 2 >= new_size {
            new_hash_size /= 2;
        }
        let mut new_props = Vec::new();
        let mut new_hash = Vec::new();
        let mut new_values = Vec::new();
        if new_props.try_reserve_exact(new_size).is_err()
            || new_hash.try_reserve_exact(new_hash_size).is_err()
            || new_values.try_reserve_exact(new_size).is_err()
        {
            return Err(MemoryError::OutOfMemory {
                requested: new_size * mem::size_of::<Property>(),
            });
        }
        new_hash.resize(new_hash_size, 0);

        let old_props = mem::take(&mut self.shape_mut_internal(sh).props);
        let old_values = mem::take(&mut self.object_mut(obj).properties);
        let old_capacity = old_values.capacity();
        let mask = new_hash_size as u32 - 1;
        for (mut pr, value) in old_props.into_iter().zip(old_values) {
            if pr.atom.is_null() {
                debug_assert!(matches!(value, Property::Value(Value::Undefined)));
                continue;
            }
            let h = (pr.atom.raw() & mask) as usize;
            pr.hash_next = new_hash[h];
            new_hash[h] = new_props.len() as u32 + 1;
            new_props.push(pr);
            new_values.push(value);
        }

        let s = self.shape_mut_internal(sh);
        s.props = new_props;
        s.prop_hash = new_hash;
        s.prop_size = new_size;
        s.deleted_prop_count = 0;
        s.bump_version();
        let freed_values =
            old_capacity.saturating_sub(new_values.capacity()) * mem::size_of::<Property>();
        self.object_mut(obj).properties = new_values;
        let freed_layout = shape_alloc_size(prop_size, hash_size)
            .saturating_sub(shape_alloc_size(new_size, new_hash_size));
        self.uncharge_cell(sh, freed_layout);
        self.uncharge_cell(obj, freed_values);
        trace!(object = %obj, removed = deleted, "compacted properties");
        Ok(())
    }

    /// Replaces the prototype of `obj`.
    ///
    /// Returns `Ok(false)` if the change would create a prototype cycle.
    pub fn set_prototype(&mut self, obj: GcRef, proto: Option<GcRef>) -> MemoryResult<bool> {
        let mut cur = proto;
        while let Some(p) = cur {
            if p == obj {
                return Ok(false);
            }
            cur = self.object_proto(p);
        }
        let mut sh = self.object_ref(obj).shape;
        if self.shape_ref(sh).proto == proto {
            return Ok(true);
        }
        let updated = self.prepare_update(&mut sh);
        self.object_mut(obj).shape = sh;
        updated?;
        if let Some(p) = proto {
            self.retain(p);
        }
        let old = mem::replace(&mut self.shape_mut_internal(sh).proto, proto);
        if let Some(p) = old {
            self.release(p);
        }
        Ok(true)
    }

    /// Forbids adding new properties to `obj`.
    pub fn prevent_extensions(&mut self, obj: GcRef) {
        self.object_mut(obj).extensible = false;
    }

    /// Creates an array in realm `ctx`.
    pub fn new_array(&mut self, ctx: GcRef) -> MemoryResult<GcRef> {
        let shape = self.context_ref(ctx).array_shape;
        self.retain(shape);
        let arr = self.new_object_from_shape(
            shape,
            ObjectPayload::Array {
                elements: Vec::new(),
            },
        )?;
        if let Some((index, _)) = self.find_property(shape, AtomId::LENGTH) {
            self.object_mut(arr).properties[index as usize] = Property::Value(Value::Smi(0));
        }
        Ok(arr)
    }

    /// Appends `value` to array `arr`, taking ownership of it.
    pub fn array_push(&mut self, arr: GcRef, value: Value) -> MemoryResult<()> {
        let (len, cap) = match &self.object_ref(arr).payload {
            ObjectPayload::Array { elements } => (elements.len(), elements.capacity()),
            _ => panic!("{} is not an array", arr),
        };
        if len == cap {
            let target = (len + 1).max(cap * 3 / 2);
            let bytes = (target - cap) * mem::size_of::<Value>();
            if let Err(err) = self.charge_cell(arr, bytes) {
                self.free_value(value);
                return Err(err);
            }
            let failed = match &mut self.object_mut(arr).payload {
                ObjectPayload::Array { elements } => {
                    elements.try_reserve_exact(target - len).is_err()
                }
                _ => unreachable!(),
            };
            if failed {
                self.uncharge_cell(arr, bytes);
                self.free_value(value);
                return Err(MemoryError::OutOfMemory { requested: bytes });
            }
        }
        let shape = self.object_ref(arr).shape;
        let length_slot = self.find_property(shape, AtomId::LENGTH).map(|(index, _)| index);
        let o = self.object_mut(arr);
        if let ObjectPayload::Array { elements } = &mut o.payload {
            elements.push(value);
        }
        if let Some(index) = length_slot {
            o.properties[index as usize] = Property::Value(Value::Smi((len + 1) as i32));
        }
        Ok(())
    }

    /// Returns element `index` of array `arr`.
    pub fn array_get(&self, arr: GcRef, index: usize) -> Option<&Value> {
        match &self.object(arr)?.payload {
            ObjectPayload::Array { elements } => elements.get(index),
            _ => None,
        }
    }

    /// Number of elements of array `arr`.
    pub fn array_len(&self, arr: GcRef) -> Option<usize> {
        match &self.object(arr)?.payload {
            ObjectPayload::Array { elements } => Some(elements.len()),
            _ => None,
        }
    }

    pub(crate) fn release_property(&mut self, prop: Property) {
        match prop {
            Property::Value(v) => self.free_value(v),
            Property::GetSet { getter, setter } => {
                for f in getter.into_iter().chain(setter) {
                    self.release(f);
                }
            }
            Property::VarRef(r) => self.release(r),
        }
    }

    pub(crate) fn release_payload(&mut self, payload: ObjectPayload) {
        match payload {
            ObjectPayload::Ordinary => {}
            ObjectPayload::Array { elements } => {
                for v in elements {
                    self.free_value(v);
                }
            }
            ObjectPayload::Closure {
                bytecode,
                var_refs,
                home_object,
            } => {
                self.release(bytecode);
                for r in var_refs {
                    self.release(r);
                }
                if let Some(home) = home_object {
                    self.release(home);
                }
            }
        }
    }

    pub(crate) fn finalize_object(&mut self, obj: JSObject) {
        let JSObject {
            shape,
            properties,
            payload,
            ..
        } = obj;
        for prop in properties {
            self.release_property(prop);
        }
        self.release_payload(payload);
        self.release(shape);
    }
}
