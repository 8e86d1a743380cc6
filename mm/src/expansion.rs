//! Expansion table for far local references.
//!
//! An open-addressed, linear-probing hash table mapping reference tags to
//! absolute indices. Storage is a pool of 16-byte `(key, value)` entries,
//! so the table's memory comes from the same machinery it serves.
//!
//! Slot states share one encoding with stored values: an empty slot is
//! `(0, 0)`, a tombstone is `(0, TOMBSTONE_BIT)`, and a live value carries
//! `TOMBSTONE_BIT` on top of the real index (masked off on read). Lookups
//! therefore stop on `value == 0` only — a true empty — and probe straight
//! through tombstones.
//!
//! Growth doubles capacity once half the slots hold live values; when live
//! entries plus tombstones reach the same watermark the table is instead
//! rebuilt in place to shed the tombstones.

use alloc::vec;

use log::debug;

use laneheap_abi::{PAGE, PoolHandle, REF_NOT_FOUND, RefTag, TOMBSTONE_BIT};

use crate::error::{HeapError, HeapResult};
use crate::heap::Heap;

/// Bookkeeping for the heap-wide table.
pub(crate) struct ExpansionState {
    /// Backing pool of 16-byte entries; null until the first insert.
    pub pool: PoolHandle,
    /// Slot count; always zero or a power of two.
    pub capacity: u64,
    /// Slots holding live values.
    pub live: u64,
    /// Slots holding tombstones.
    pub tombstones: u64,
}

impl ExpansionState {
    pub const fn new() -> Self {
        Self {
            pool: PoolHandle::NULL,
            capacity: 0,
            live: 0,
            tombstones: 0,
        }
    }
}

/// 64-bit mixer (Wang/Jenkins style) spreading tag bits before the modulo.
fn hash_mix(key: u64) -> u64 {
    let mut k = key;
    k = (!k).wrapping_add(k << 21);
    k ^= k >> 24;
    k = k.wrapping_add(k << 3).wrapping_add(k << 8);
    k ^= k >> 14;
    k = k.wrapping_add(k << 2).wrapping_add(k << 4);
    k ^= k >> 28;
    k = k.wrapping_add(k << 31);
    k
}

/// # Safety
/// `base` must point at a table of at least `index + 1` entries.
#[inline]
unsafe fn read_entry(base: *mut u8, index: usize) -> (u64, u64) {
    let entry = (base as *const u64).add(index * 2);
    (entry.read(), entry.add(1).read())
}

/// # Safety
/// `base` must point at a table of at least `index + 1` entries.
#[inline]
unsafe fn write_entry(base: *mut u8, index: usize, key: u64, value: u64) {
    let entry = (base as *mut u64).add(index * 2);
    entry.write(key);
    entry.add(1).write(value);
}

/// Rehash every live entry of `src` into the zeroed table at `dst`.
///
/// # Safety
/// `dst` and `src` must be valid for `dst_capacity` / `src_capacity`
/// entries and must not overlap.
unsafe fn copy_entries(dst: *mut u8, src: *mut u8, dst_capacity: u64, src_capacity: u64) {
    for i in 0..src_capacity as usize {
        let (key, value) = read_entry(src, i);
        if key == 0 {
            continue;
        }
        let mut index = (hash_mix(key) % dst_capacity) as usize;
        for _ in 0..dst_capacity {
            let (dst_key, _) = read_entry(dst, index);
            if dst_key == 0 {
                write_entry(dst, index, key, value);
                break;
            }
            index = if index as u64 == dst_capacity - 1 {
                0
            } else {
                index + 1
            };
        }
    }
}

impl Heap {
    /// Look a tag up, returning the stored absolute index or
    /// [`REF_NOT_FOUND`].
    pub fn expand_local_reference(&self, key: RefTag) -> u64 {
        if key.is_null() {
            return REF_NOT_FOUND;
        }
        let state = self.expansion.lock();
        if state.capacity == 0 {
            return REF_NOT_FOUND;
        }
        let base = match self.pool_slot(state.pool.pool_id()) {
            Ok(slot) => slot.base,
            Err(_) => return REF_NOT_FOUND,
        };

        let mut index = (hash_mix(key.raw()) % state.capacity) as usize;
        for _ in 0..state.capacity {
            // SAFETY: index < capacity; the backing pool holds capacity
            // entries.
            let (entry_key, value) = unsafe { read_entry(base, index) };
            if entry_key == key.raw() {
                return value & !TOMBSTONE_BIT;
            }
            if value == 0 {
                break;
            }
            index = if index as u64 == state.capacity - 1 {
                0
            } else {
                index + 1
            };
        }
        REF_NOT_FOUND
    }

    /// Store `absolute_index` under `key`, inserting or overwriting.
    ///
    /// Grows or rebuilds the table first when the load policy calls for it.
    /// Fails on a null tag or a value that collides with the liveness bit.
    pub fn compress_absolute_index(&self, key: RefTag, absolute_index: u64) -> HeapResult {
        let mut state = self.expansion.lock();
        if state.live * 2 >= state.capacity {
            let new_capacity = if state.capacity != 0 {
                state.capacity * 2
            } else {
                PAGE
            };
            self.grow_table(&mut state, new_capacity)?;
        } else if (state.live + state.tombstones) * 2 >= state.capacity {
            self.rebuild_table(&mut state)?;
        }

        if key.is_null() {
            return Err(HeapError::InvalidTag);
        }
        if absolute_index & TOMBSTONE_BIT != 0 {
            return Err(HeapError::InvalidTag);
        }

        let base = self.pool_slot(state.pool.pool_id())?.base;
        let mut index = (hash_mix(key.raw()) % state.capacity) as usize;
        let mut first_free: Option<usize> = None;
        let spot = loop {
            // SAFETY: index < capacity.
            let (entry_key, value) = unsafe { read_entry(base, index) };
            if entry_key == key.raw() {
                break index;
            }
            if entry_key == 0 && first_free.is_none() {
                first_free = Some(index);
            }
            if let Some(free) = first_free {
                // Past the first reusable slot, only tombstones keep the
                // probe going (the key might still exist further on).
                if value & TOMBSTONE_BIT == 0 {
                    break free;
                }
            }
            index = if index as u64 == state.capacity - 1 {
                0
            } else {
                index + 1
            };
        };

        // SAFETY: spot < capacity.
        unsafe {
            let (spot_key, spot_value) = read_entry(base, spot);
            if spot_key == 0 {
                if spot_value & TOMBSTONE_BIT != 0 {
                    state.tombstones -= 1;
                }
                state.live += 1;
            }
            write_entry(base, spot, key.raw(), TOMBSTONE_BIT | absolute_index);
        }
        Ok(())
    }

    /// Remove the entry for `key`; tombstones the slot.
    pub fn delete_reference(&self, key: RefTag) -> HeapResult {
        if key.is_null() {
            return Err(HeapError::InvalidTag);
        }
        let mut state = self.expansion.lock();
        if state.capacity == 0 {
            return Err(HeapError::RefNotFound);
        }
        let base = self.pool_slot(state.pool.pool_id())?.base;

        let mut index = (hash_mix(key.raw()) % state.capacity) as usize;
        for _ in 0..state.capacity {
            // SAFETY: index < capacity.
            let (entry_key, value) = unsafe { read_entry(base, index) };
            if entry_key == key.raw() {
                unsafe { write_entry(base, index, 0, TOMBSTONE_BIT) };
                state.live -= 1;
                state.tombstones += 1;
                return Ok(());
            }
            if value == 0 {
                break;
            }
            index = if index as u64 == state.capacity - 1 {
                0
            } else {
                index + 1
            };
        }
        Err(HeapError::RefNotFound)
    }

    /// Tombstone every entry whose tag names `pool`. Used when a pool full
    /// of far references goes away wholesale.
    pub fn delete_all_for_pool(&self, pool: PoolHandle) -> HeapResult {
        let pool_id = pool.pool_id();
        if pool_id == 0 {
            return Err(HeapError::NullPool);
        }
        let mut state = self.expansion.lock();
        if state.capacity == 0 {
            return Ok(());
        }
        let base = self.pool_slot(state.pool.pool_id())?.base;

        for index in 0..state.capacity as usize {
            // SAFETY: index < capacity.
            let (entry_key, _) = unsafe { read_entry(base, index) };
            if entry_key != 0 && RefTag::new(entry_key).pool_id() == pool_id {
                unsafe { write_entry(base, index, 0, TOMBSTONE_BIT) };
                state.live -= 1;
                state.tombstones += 1;
            }
        }
        Ok(())
    }

    /// `(capacity, live, tombstones)` of the expansion table.
    pub fn expansion_stats(&self) -> (u64, u64, u64) {
        let state = self.expansion.lock();
        (state.capacity, state.live, state.tombstones)
    }

    /// Move the table into a fresh pool of `new_capacity` entries.
    fn grow_table(&self, state: &mut ExpansionState, new_capacity: u64) -> HeapResult {
        let mut new_pool = self.pool_create(self.entry_type)?;
        if let Err(e) = self.pool_grow(&mut new_pool, new_capacity) {
            let _ = self.pool_destroy(&mut new_pool);
            return Err(e);
        }
        let new_base = self.pool_slot(new_pool.pool_id())?.base;

        if state.capacity != 0 {
            let old_base = self.pool_slot(state.pool.pool_id())?.base;
            // SAFETY: both pools are live and distinct; capacities match
            // their populations.
            unsafe { copy_entries(new_base, old_base, new_capacity, state.capacity) };
            let mut old_pool = state.pool;
            self.pool_destroy(&mut old_pool)?;
        }

        state.pool = new_pool;
        state.capacity = new_capacity;
        state.tombstones = 0;
        debug!("expansion table grown to {} entries", new_capacity);
        Ok(())
    }

    /// Shed tombstones by rehashing live entries through a clean image.
    fn rebuild_table(&self, state: &mut ExpansionState) -> HeapResult {
        if state.capacity == 0 {
            return Ok(());
        }
        let base = self.pool_slot(state.pool.pool_id())?.base;
        let mut clean = vec![0u64; state.capacity as usize * 2];
        // SAFETY: the image and the table are both capacity entries long
        // and do not overlap.
        unsafe {
            copy_entries(
                clean.as_mut_ptr() as *mut u8,
                base,
                state.capacity,
                state.capacity,
            );
            core::ptr::copy_nonoverlapping(
                clean.as_ptr() as *const u8,
                base,
                state.capacity as usize * 16,
            );
        }
        state.tombstones = 0;
        debug!(
            "expansion table rebuilt in place ({} live of {})",
            state.live, state.capacity
        );
        Ok(())
    }
}
