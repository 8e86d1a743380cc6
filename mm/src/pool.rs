//! Pool geometry: creation, growth, shrinking and field access.
//!
//! A pool is one contiguous allocation that grows and shrinks a subpool
//! (`PAGE` records) at a time. Inside a subpool every flattened field owns
//! a lane of `field_size * PAGE` bytes, so the byte address of field `k` of
//! the record at `(subpool, index)` is
//!
//! ```text
//! base + subpool * (type_size * PAGE) + offset[k] * PAGE + size[k] * index
//! ```
//!
//! — a directory load, two multiplies and two adds. The cursor lives in the
//! pool handle itself: `(subpool_id, index)` is the next free slot and the
//! FULL flag keeps `index == 0` of a boundary-filled subpool distinguishable
//! from an empty one.
//!
//! Newly mapped subpool memory is always zeroed; a zero reference lane is a
//! null reference, so fresh records start unlinked.

use core::alloc::Layout;
use core::ptr::{self, NonNull};
use core::sync::atomic::Ordering;

use log::debug;

use laneheap_abi::{PAGE, PAGE_SHIFT, PoolHandle, Reference};

use crate::error::{HeapError, HeapResult};
use crate::heap::{Heap, PoolSlot};
use crate::type_table::FieldOffset;

/// Alignment of pool allocations. Subpool-sized lanes keep every
/// power-of-two field size naturally aligned under it.
pub(crate) const SUBPOOL_ALIGN: usize = 4096;

impl Heap {
    /// Create a pool for records of `type_id`, mapping one subpool.
    pub fn pool_create(&self, type_id: u16) -> HeapResult<PoolHandle> {
        let row = self.types.row(type_id)?;
        let subpool_bytes = row.size * PAGE as usize;

        let mut pool_id = self.next_pool_id.load(Ordering::Relaxed);
        loop {
            if pool_id == 0 {
                return Err(HeapError::PoolLimit);
            }
            match self.next_pool_id.compare_exchange_weak(
                pool_id,
                pool_id.wrapping_add(1),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => pool_id = current,
            }
        }

        let layout = Layout::from_size_align(subpool_bytes, SUBPOOL_ALIGN)
            .map_err(|_| HeapError::NoMemory)?;
        // SAFETY: layout is non-zero (type sizes are validated non-zero).
        let base = unsafe { alloc::alloc::alloc_zeroed(layout) };
        if base.is_null() {
            return Err(HeapError::NoMemory);
        }

        let mut directory = self.directory.write();
        if directory.len() <= pool_id as usize {
            directory.resize(pool_id as usize + 1, None);
        }
        directory[pool_id as usize] = Some(PoolSlot {
            base,
            subpools: 1,
            subpool_bytes,
        });
        drop(directory);

        debug!(
            "pool_create: pool={} type={} subpool_bytes={}",
            pool_id, type_id, subpool_bytes
        );
        Ok(PoolHandle::NULL.with_type_id(type_id).with_pool_id(pool_id))
    }

    /// Release a pool's memory and null the handle. Expansion-table entries
    /// keyed to the pool are not touched; delete them first if the pool
    /// holds far references that should not linger.
    pub fn pool_destroy(&self, pool: &mut PoolHandle) -> HeapResult {
        if pool.is_null() {
            return Err(HeapError::NullPool);
        }
        let pool_id = pool.pool_id();

        let slot = {
            let mut directory = self.directory.write();
            directory
                .get_mut(pool_id as usize)
                .and_then(Option::take)
                .ok_or(HeapError::NullPool)?
        };
        // SAFETY: the slot owned this allocation; it is no longer reachable
        // through the directory.
        unsafe {
            alloc::alloc::dealloc(
                slot.base,
                Layout::from_size_align_unchecked(
                    slot.subpools * slot.subpool_bytes,
                    SUBPOOL_ALIGN,
                ),
            );
        }

        debug!("pool_destroy: pool={} subpools={}", pool_id, slot.subpools);
        *pool = PoolHandle::NULL;
        Ok(())
    }

    /// Allocate one record, returning its reference.
    pub fn pool_alloc(&self, pool: &mut PoolHandle) -> HeapResult<Reference> {
        self.pool_add_elements(pool, 1)
    }

    /// Extend the population by `count` records.
    pub fn pool_grow(&self, pool: &mut PoolHandle, count: u64) -> HeapResult {
        self.pool_add_elements(pool, count).map(|_| ())
    }

    /// Advance the cursor, mapping subpools as needed. Returns a reference
    /// to the first of the new records (the pre-advance cursor).
    fn pool_add_elements(&self, pool: &mut PoolHandle, count: u64) -> HeapResult<Reference> {
        let handle = *pool;
        if handle.is_null() {
            return Err(HeapError::NullPool);
        }
        if count == 0 {
            return Ok(Reference::new(handle.raw()).with_raw_index(handle.index()));
        }

        let space_left = if handle.is_full() {
            0
        } else {
            PAGE - handle.index() as u64
        };

        if count <= space_left {
            let new_index = (handle.index() as u64 + count) & (PAGE - 1);
            *pool = handle
                .with_index(new_index as u16)
                .with_full(new_index == 0);
            return Ok(Reference::new(handle.raw()));
        }

        let needed = count - space_left;
        let extra_subpools = needed.div_ceil(PAGE);
        let current_subpools = handle.subpool_id() as u64 + 1;
        let new_subpools = current_subpools + extra_subpools;
        if new_subpools > u16::MAX as u64 + 1 {
            return Err(HeapError::PoolLimit);
        }

        {
            let mut directory = self.directory.write();
            let slot = directory
                .get_mut(handle.pool_id() as usize)
                .and_then(Option::as_mut)
                .ok_or(HeapError::NullPool)?;
            debug_assert_eq!(slot.subpools as u64, current_subpools);

            let old_bytes = slot.subpools * slot.subpool_bytes;
            let new_bytes = new_subpools as usize * slot.subpool_bytes;
            // SAFETY: the old layout matches the live allocation; on failure
            // the old base stays valid and the slot is left untouched.
            let new_base = unsafe {
                alloc::alloc::realloc(
                    slot.base,
                    Layout::from_size_align_unchecked(old_bytes, SUBPOOL_ALIGN),
                    new_bytes,
                )
            };
            if new_base.is_null() {
                return Err(HeapError::NoMemory);
            }
            // SAFETY: the tail past old_bytes is freshly mapped and ours.
            unsafe { ptr::write_bytes(new_base.add(old_bytes), 0, new_bytes - old_bytes) };
            slot.base = new_base;
            slot.subpools = new_subpools as usize;
        }

        debug!(
            "pool_grow: pool={} +{} subpools ({} total)",
            handle.pool_id(),
            extra_subpools,
            new_subpools
        );

        let reference = Reference::new(handle.raw())
            .with_raw_index(handle.index())
            .with_subpool_id(handle.subpool_id() + handle.is_full() as u16);
        let new_index = needed & (PAGE - 1);
        *pool = handle
            .with_subpool_id((handle.subpool_id() as u64 + extra_subpools) as u16)
            .with_index(new_index as u16)
            .with_full(new_index == 0);
        Ok(reference)
    }

    /// Rewind the cursor by `count` records, unmapping subpools that become
    /// empty. The initial subpool is never unmapped. Landing exactly on a
    /// populated subpool boundary sets the FULL flag; rewinding to zero
    /// leaves an empty, not-full pool.
    pub fn pool_shrink(&self, pool: &mut PoolHandle, count: u64) -> HeapResult {
        let handle = *pool;
        if handle.is_null() {
            return Err(HeapError::NullPool);
        }
        if count == 0 {
            return Ok(());
        }
        let population = handle.population();
        if count > population {
            return Err(HeapError::ShrinkUnderflow);
        }

        let remaining = population - count;
        let (new_subpool, new_index, full) = if remaining == 0 {
            (0u16, 0u16, false)
        } else if remaining & (PAGE - 1) == 0 {
            (((remaining >> PAGE_SHIFT) - 1) as u16, 0, true)
        } else {
            (
                (remaining >> PAGE_SHIFT) as u16,
                (remaining & (PAGE - 1)) as u16,
                false,
            )
        };

        let keep_subpools = new_subpool as usize + 1;
        {
            let mut directory = self.directory.write();
            let slot = directory
                .get_mut(handle.pool_id() as usize)
                .and_then(Option::as_mut)
                .ok_or(HeapError::NullPool)?;
            if keep_subpools < slot.subpools {
                let old_bytes = slot.subpools * slot.subpool_bytes;
                let new_bytes = keep_subpools * slot.subpool_bytes;
                // SAFETY: shrinking realloc; old layout matches.
                let new_base = unsafe {
                    alloc::alloc::realloc(
                        slot.base,
                        Layout::from_size_align_unchecked(old_bytes, SUBPOOL_ALIGN),
                        new_bytes,
                    )
                };
                if new_base.is_null() {
                    return Err(HeapError::NoMemory);
                }
                debug!(
                    "pool_shrink: pool={} -{} subpools ({} kept)",
                    handle.pool_id(),
                    slot.subpools - keep_subpools,
                    keep_subpools
                );
                slot.base = new_base;
                slot.subpools = keep_subpools;
            }
        }

        *pool = handle
            .with_subpool_id(new_subpool)
            .with_index(new_index)
            .with_full(full);
        Ok(())
    }

    /// Pointer to field `field_nr` of the referenced record.
    ///
    /// The pointer is valid until the pool next grows, shrinks or is
    /// destroyed. Undefined for extended references.
    pub fn get_field(&self, reference: Reference, field_nr: usize) -> HeapResult<NonNull<u8>> {
        debug_assert!(!reference.is_extended());
        if reference.is_extended() {
            return Err(HeapError::ExtendedReference);
        }
        let row = self.types.row(reference.type_id())?;
        let field = row
            .fields
            .get(field_nr)
            .ok_or(HeapError::FieldOutOfRange { field: field_nr })?;
        let slot = self.pool_slot(reference.pool_id())?;
        // SAFETY: the handle indexes inside the mapped range of its pool.
        let ptr = unsafe { field_ptr(&slot, field, reference) };
        Ok(unsafe { NonNull::new_unchecked(ptr) })
    }

    /// Copy `data` into field `field_nr` of the referenced record.
    pub fn set_field(&self, reference: Reference, field_nr: usize, data: &[u8]) -> HeapResult {
        let row = self.types.row(reference.type_id())?;
        let field = row
            .fields
            .get(field_nr)
            .ok_or(HeapError::FieldOutOfRange { field: field_nr })?;
        if data.len() != field.size {
            return Err(HeapError::FieldSizeMismatch {
                expected: field.size,
                got: data.len(),
            });
        }
        let slot = self.pool_slot(reference.pool_id())?;
        // SAFETY: in-range lane pointer; sizes 2/4/8 are naturally aligned
        // because lanes start on subpool-aligned boundaries.
        unsafe {
            let ptr = field_ptr(&slot, field, reference);
            match field.size {
                1 => ptr.write(data[0]),
                2 => (ptr as *mut u16).write(u16::from_ne_bytes([data[0], data[1]])),
                4 => (ptr as *mut u32).write(u32::from_ne_bytes([
                    data[0], data[1], data[2], data[3],
                ])),
                8 => (ptr as *mut u64).write(u64::from_ne_bytes([
                    data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
                ])),
                _ => ptr::copy_nonoverlapping(data.as_ptr(), ptr, field.size),
            }
        }
        Ok(())
    }

    /// Base address of the pool's backing memory, for pools used as flat
    /// arrays of a single-field type. A pool accessed this way must not be
    /// used through the field interface as well.
    pub fn pool_to_array(&self, pool: PoolHandle) -> HeapResult<NonNull<u8>> {
        let slot = self.pool_slot(pool.pool_id())?;
        // SAFETY: a live slot's base is non-null by construction.
        Ok(unsafe { NonNull::new_unchecked(slot.base) })
    }
}

/// Lane address of one field of one record.
///
/// # Safety
/// `reference` must index inside the mapped range of the pool behind `slot`.
#[inline]
pub(crate) unsafe fn field_ptr(
    slot: &PoolSlot,
    field: &FieldOffset,
    reference: Reference,
) -> *mut u8 {
    slot.base.add(
        reference.subpool_id() as usize * slot.subpool_bytes
            + field.offset * PAGE as usize
            + field.size * reference.index() as usize,
    )
}
