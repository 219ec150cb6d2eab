//! Owning handles for code outside the heap.
//!
//! A bare [`GcRef`] does not own anything: forgetting to release it leaks,
//! releasing it twice panics. A [`Root`] owns one counted reference and gives
//! it back when dropped. Dropping cannot reach the heap (there is no `&mut
//! Heap` in `Drop`), so the handle is pushed onto the heap's drop queue and
//! released before the next allocation or collection.

use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::Rc;

use core_types::GcRef;
use tracing::trace;

use crate::heap::Heap;

/// An owned counted reference to a heap cell.
pub struct Root {
    handle: Option<GcRef>,
    queue: Rc<RefCell<Vec<GcRef>>>,
}

impl Root {
    /// The rooted cell.
    pub fn get(&self) -> GcRef {
        match self.handle {
            Some(r) => r,
            None => unreachable!("root handle taken"),
        }
    }

    /// Gives up ownership without releasing; the caller now owns the
    /// reference.
    pub fn into_raw(mut self) -> GcRef {
        match self.handle.take() {
            Some(r) => r,
            None => unreachable!("root handle taken"),
        }
    }
}

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Root").field(&self.handle).finish()
    }
}

impl Drop for Root {
    fn drop(&mut self) {
        if let Some(r) = self.handle.take() {
            self.queue.borrow_mut().push(r);
        }
    }
}

impl Heap {
    /// Wraps the reference `r` owned by the caller into a [`Root`].
    pub fn root(&self, r: GcRef) -> Root {
        debug_assert!(self.contains(r), "rooting stale handle {}", r);
        Root {
            handle: Some(r),
            queue: Rc::clone(&self.drop_queue),
        }
    }

    /// Returns a second root to the same cell.
    pub fn clone_root(&mut self, root: &Root) -> Root {
        let r = root.get();
        self.retain(r);
        self.root(r)
    }

    /// Releases every handle of a dropped [`Root`].
    pub(crate) fn process_dropped_roots(&mut self) {
        loop {
            let dropped = mem::take(&mut *self.drop_queue.borrow_mut());
            if dropped.is_empty() {
                break;
            }
            trace!(count = dropped.len(), "releasing dropped roots");
            for r in dropped {
                self.release(r);
            }
        }
    }

    /// Releases the handles of dropped roots now instead of at the next
    /// allocation.
    pub fn flush_dropped_roots(&mut self) {
        self.process_dropped_roots();
    }
}
