//! Shared data definitions for the laneheap allocator.
//!
//! Everything here is layout: the packed 64-bit handle words, the 16-bit
//! local reference, the expansion-table tag, the geometry constants, and the
//! runtime type-descriptor format. The engine lives in `laneheap-mm`; this
//! crate exists so that handle layouts can be consumed (and persisted) by
//! callers without pulling in the allocator itself.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod handle;
pub mod type_desc;

pub use handle::{IterKind, IteratorHandle, LocalRef, PoolHandle, RefFlags, RefTag, Reference};
pub use type_desc::{Topology, TypeClass, TypeDesc, TypeKind};

/// Records per subpool. Inside a subpool each flattened field occupies a
/// contiguous lane of `field_size * PAGE` bytes.
pub const PAGE: u64 = 1 << PAGE_SHIFT;

/// log2 of [`PAGE`].
pub const PAGE_SHIFT: u32 = 12;

/// Largest absolute index a handle can carry: 16 bits of subpool id plus
/// 12 bits of in-subpool index. The bits above it are reserved for the
/// sentinel values below.
pub const ABS_INDEX_MAX: u64 = (1 << 28) - 1;

/// Internal "no such object" absolute index. Doubles as the miss value of
/// the expansion table.
pub const REF_NOT_FOUND: u64 = u64::MAX;

/// Absolute-index sentinel marking the end of a traversal.
pub const REF_END: u64 = REF_NOT_FOUND;

/// Absolute-index sentinel marking the position before the first element of
/// a traversal.
pub const REF_BEGIN: u64 = 0x7000_0000_0000_0000;

/// Every sentinel absolute index has at least one of these bits set; a real
/// index (`<= ABS_INDEX_MAX`) never does.
pub const REF_INVALID_BIT: u64 = REF_BEGIN;

/// Liveness bit of stored expansion-table values. A value of exactly
/// `TOMBSTONE_BIT` under a zero key is a tombstone; live values carry the
/// bit on top of the real absolute index and mask it off on read.
pub const TOMBSTONE_BIT: u64 = 1 << 63;
