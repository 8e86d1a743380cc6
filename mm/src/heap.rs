//! The allocator context.
//!
//! Everything that was once process-global lives in one [`Heap`] value the
//! caller constructs and threads through the API: the frozen type table,
//! the pool directory, the pool-id counter, the expansion table and the
//! collector's root stack. Two heaps are completely independent.
//!
//! Handles never embed addresses. A handle names `(pool_id, subpool, index)`
//! and every access resolves the pool id through the directory, so a pool's
//! backing allocation is free to move when it grows.
//!
//! # Concurrency
//!
//! `pool_create` is safe to call from several threads at once (the id
//! counter is a relaxed compare-exchange). Every other operation assumes
//! exclusive access to the pool it touches; the internal locks only protect
//! the directory and table structures themselves, not record data.

use alloc::vec::Vec;
use core::alloc::Layout;
use core::sync::atomic::AtomicU16;

use spin::{Mutex, RwLock};

use laneheap_abi::TypeDesc;

use crate::error::{HeapError, HeapResult};
use crate::expansion::ExpansionState;
use crate::gc::CollectorState;
use crate::pool::SUBPOOL_ALIGN;
use crate::type_table::TypeTable;

/// Directory entry for one live pool.
#[derive(Clone, Copy)]
pub(crate) struct PoolSlot {
    /// Start of the pool's contiguous backing allocation.
    pub base: *mut u8,
    /// Subpools currently mapped.
    pub subpools: usize,
    /// `type_size * PAGE`; the allocation is `subpools * subpool_bytes`.
    pub subpool_bytes: usize,
}

/// A pooled, column-striped heap for one set of registered types.
pub struct Heap {
    pub(crate) types: TypeTable,
    /// `pool_id -> slot`; entry 0 is never used, ids start at 1.
    pub(crate) directory: RwLock<Vec<Option<PoolSlot>>>,
    pub(crate) next_pool_id: AtomicU16,
    pub(crate) expansion: Mutex<ExpansionState>,
    pub(crate) collector: Mutex<CollectorState>,
    /// Internal 8-byte primitive backing iterator and root stacks.
    pub(crate) word_type: u16,
    /// Internal 16-byte primitive backing the expansion table.
    pub(crate) entry_type: u16,
}

// SAFETY: the raw bases in the directory are owned by the heap and only
// dereferenced under the documented access contract (exclusive writers per
// pool); the directory itself is lock-protected.
unsafe impl Send for Heap {}
unsafe impl Sync for Heap {}

impl Heap {
    /// Build a heap for the given type set.
    ///
    /// Ids must be dense (`descriptors[i].type_id == i`). Two internal
    /// bookkeeping types are appended after the caller's set; their ids are
    /// not part of the public contract.
    pub fn new(descriptors: &[TypeDesc]) -> HeapResult<Heap> {
        if descriptors.len() + 2 >= u16::MAX as usize {
            return Err(HeapError::TooManyTypes);
        }

        let mut all = Vec::with_capacity(descriptors.len() + 2);
        all.extend_from_slice(descriptors);
        let word_type = all.len() as u16;
        all.push(TypeDesc::primitive(word_type, 8));
        let entry_type = word_type + 1;
        all.push(TypeDesc::primitive(entry_type, 16));

        let types = TypeTable::build(&all)?;
        Ok(Heap {
            types,
            directory: RwLock::new(Vec::new()),
            next_pool_id: AtomicU16::new(1),
            expansion: Mutex::new(ExpansionState::new()),
            collector: Mutex::new(CollectorState::new()),
            word_type,
            entry_type,
        })
    }

    /// The flattened type table (read-only).
    #[inline]
    pub fn type_table(&self) -> &TypeTable {
        &self.types
    }

    /// Directory lookup; errors on null ids and destroyed pools.
    #[inline]
    pub(crate) fn pool_slot(&self, pool_id: u16) -> HeapResult<PoolSlot> {
        if pool_id == 0 {
            return Err(HeapError::NullPool);
        }
        self.directory
            .read()
            .get(pool_id as usize)
            .copied()
            .flatten()
            .ok_or(HeapError::NullPool)
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let mut directory = self.directory.write();
        for slot in directory.drain(..).flatten() {
            // SAFETY: every live slot owns exactly one allocation of this
            // size and alignment; the directory is emptied so nothing can
            // observe the freed base.
            unsafe {
                alloc::alloc::dealloc(
                    slot.base,
                    Layout::from_size_align_unchecked(
                        slot.subpools * slot.subpool_bytes,
                        SUBPOOL_ALIGN,
                    ),
                );
            }
        }
    }
}
