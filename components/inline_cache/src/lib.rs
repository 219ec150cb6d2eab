//! Inline Cache - Per-site property access caches
//!
//! This component provides:
//! - Polymorphic caches keyed by property atom, four receiver shapes each
//! - Prototype watchpoints validated against shape handle and version
//! - Cached `get`/`set` helpers that fall back to the heap on a miss

#![warn(missing_docs)]

pub mod access;
pub mod cache;

pub use access::{get_property_cached, set_property_cached};
pub use cache::{
    IcHit, IcStats, InlineCache, InlineCacheRingItem, InlineCacheRingSlot, Watchpoint,
    IC_CACHE_ITEM_CAPACITY, IC_MAX_PROTO_DEPTH,
};
