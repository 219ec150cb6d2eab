//! Realms.
//!
//! A [`Context`] owns the global object, the intrinsic prototypes and the
//! shared initial shape of arrays. Function bytecode points back at its
//! realm, which usually closes a cycle through the global object.

use std::mem;

use core_types::{AtomId, GcRef, MemoryResult};
use tracing::debug;

use crate::heap::{Cell, CellBody, GcKind, Heap, ListId};
use crate::shape::PropFlags;

/// A realm: global object plus intrinsics.
#[derive(Debug)]
pub struct Context {
    pub(crate) global_obj: GcRef,
    pub(crate) object_proto: GcRef,
    pub(crate) function_proto: GcRef,
    pub(crate) array_proto: GcRef,
    pub(crate) array_shape: GcRef,
}

impl Context {
    /// The global object
    pub fn global_obj(&self) -> GcRef {
        self.global_obj
    }

    /// `Object.prototype`
    pub fn object_proto(&self) -> GcRef {
        self.object_proto
    }

    /// `Function.prototype`
    pub fn function_proto(&self) -> GcRef {
        self.function_proto
    }

    /// `Array.prototype`
    pub fn array_proto(&self) -> GcRef {
        self.array_proto
    }

    /// Shape of a freshly created array: prototype `Array.prototype` and a
    /// `length` property.
    pub fn array_shape(&self) -> GcRef {
        self.array_shape
    }
}

impl Heap {
    /// Creates a realm with its global object and intrinsic prototypes.
    pub fn new_context(&mut self) -> MemoryResult<GcRef> {
        let mut owned = Vec::new();
        match self.build_context(&mut owned) {
            Ok(ctx) => Ok(ctx),
            Err(err) => {
                for r in owned.into_iter().rev() {
                    self.release(r);
                }
                Err(err)
            }
        }
    }

    fn build_context(&mut self, owned: &mut Vec<GcRef>) -> MemoryResult<GcRef> {
        owned.reserve_exact(5);
        let object_proto = self.new_object(None)?;
        owned.push(object_proto);
        let function_proto = self.new_object(Some(object_proto))?;
        owned.push(function_proto);
        let array_proto = self.new_object(Some(object_proto))?;
        owned.push(array_proto);
        let global_obj = self.new_object(Some(object_proto))?;
        owned.push(global_obj);
        let mut array_shape = self.shape_for_new_object(Some(array_proto))?;
        let added = self.add_property(
            &mut array_shape,
            AtomId::LENGTH,
            PropFlags::WRITABLE | PropFlags::LENGTH,
        );
        owned.push(array_shape);
        added?;

        let reservation = self.reserve_cell(mem::size_of::<Cell>())?;
        owned.clear();
        let ctx = Context {
            global_obj,
            object_proto,
            function_proto,
            array_proto,
            array_shape,
        };
        let r = self.install_cell(
            reservation,
            GcKind::Context,
            CellBody::Context(ctx),
            Some(ListId::Live),
        );
        debug!(context = %r, "created realm");
        Ok(r)
    }

    /// Returns the realm named by `r`.
    pub fn context(&self, r: GcRef) -> Option<&Context> {
        match &self.cell(r)?.body {
            CellBody::Context(ctx) => Some(ctx),
            _ => None,
        }
    }

    pub(crate) fn context_ref(&self, r: GcRef) -> &Context {
        match self.context(r) {
            Some(ctx) => ctx,
            None => panic!("{} is not a live context", r),
        }
    }

    pub(crate) fn finalize_context(&mut self, ctx: Context) {
        for r in [
            ctx.global_obj,
            ctx.function_proto,
            ctx.array_proto,
            ctx.array_shape,
            ctx.object_proto,
        ] {
            self.release(r);
        }
    }
}
