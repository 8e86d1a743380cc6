//! Column-striped pooled allocator.
//!
//! Records of one runtime-described type are allocated from a dedicated
//! pool; inside a pool every flattened field lives in its own parallel
//! lane, so iterating one field streams contiguous memory. Same-pool
//! references compress to 16 bits — a signed delta when the target is
//! within a subpool's reach, a key into the expansion table otherwise —
//! and a topology-aware collector compacts a pool while preserving its
//! list or tree structure.
//!
//! The entry point is [`Heap`]: build it once from a descriptor set, then
//! create pools, allocate, link, iterate, map and collect through its
//! methods. Handle words and descriptor types come from `laneheap_abi`.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod error;
pub mod heap;
pub mod type_table;

mod expansion;
mod gc;
mod iterator;
mod map;
mod pool;
mod refs;

#[cfg(test)]
mod test_fixtures;
#[cfg(test)]
mod tests_iterator;
#[cfg(test)]
mod tests_map;

pub use error::{HeapError, HeapResult};
pub use heap::Heap;
pub use iterator::{ITERATOR_END, NULL_ITERATOR};
pub use type_table::{FieldOffset, TypeRow, TypeTable};
