//! Bulk application of a function over one field lane.
//!
//! This is the access pattern the striped layout exists for: one field of
//! every record in a pool is a handful of contiguous lanes, so mapping over
//! it streams memory instead of chasing records. `field_map` requires a
//! compact source (no unlink holes since the last collection) and strides
//! the lanes directly; `field_list_map` walks a list chain instead and
//! tolerates holes, at a pointer chase per element.

use core::slice;

use laneheap_abi::{PAGE, PoolHandle, Reference};

use crate::error::{HeapError, HeapResult};
use crate::heap::Heap;

impl Heap {
    /// Apply `f` to field `field_nr` of every record of `src`, writing
    /// results through field 0 of freshly allocated records in `dst`.
    ///
    /// `dst` is grown by the population of `src`; pass it empty for a
    /// one-to-one mapping. The source pool must be compact.
    pub fn field_map<F>(
        &self,
        src: PoolHandle,
        dst: &mut PoolHandle,
        field_nr: usize,
        mut f: F,
    ) -> HeapResult
    where
        F: FnMut(&[u8], &mut [u8]),
    {
        if src.is_null() || dst.is_null() {
            return Err(HeapError::NullPool);
        }
        if src.pool_id() == dst.pool_id() {
            return Err(HeapError::AliasedPools);
        }
        let src_row = self.types.row(src.type_id())?;
        let src_field = src_row
            .fields
            .get(field_nr)
            .ok_or(HeapError::FieldOutOfRange { field: field_nr })?;
        let dst_row = self.types.row(dst.type_id())?;
        let dst_field = &dst_row.fields[0];

        let population = src.population();
        self.pool_grow(dst, population)?;

        let src_slot = self.pool_slot(src.pool_id())?;
        let dst_slot = self.pool_slot(dst.pool_id())?;
        let full_subpools = (population / PAGE) as usize;
        let remainder = (population % PAGE) as usize;
        let src_stride = src_field.size;
        let dst_stride = dst_field.size;

        let mut run = |subpool: usize, count: usize| {
            // SAFETY: both lanes are inside their mapped subpools; the
            // pools are distinct, so the slices cannot alias.
            unsafe {
                let src_lane = src_slot
                    .base
                    .add(subpool * src_slot.subpool_bytes + src_field.offset * PAGE as usize);
                let dst_lane = dst_slot
                    .base
                    .add(subpool * dst_slot.subpool_bytes + dst_field.offset * PAGE as usize);
                for i in 0..count {
                    f(
                        slice::from_raw_parts(src_lane.add(i * src_stride), src_stride),
                        slice::from_raw_parts_mut(dst_lane.add(i * dst_stride), dst_stride),
                    );
                }
            }
        };

        for subpool in 0..full_subpools {
            run(subpool, PAGE as usize);
        }
        if remainder > 0 {
            run(full_subpools, remainder);
        }
        Ok(())
    }

    /// Apply `f` to field `field_nr` of every record on the list hanging
    /// off `head`, allocating one `dst` record per visited node. Works on
    /// pools with unlink holes, unlike [`Heap::field_map`].
    pub fn field_list_map<F>(
        &self,
        head: Reference,
        dst: &mut PoolHandle,
        field_nr: usize,
        mut f: F,
    ) -> HeapResult
    where
        F: FnMut(&[u8], &mut [u8]),
    {
        if head.is_null() {
            return Err(HeapError::NullReference);
        }
        if dst.is_null() {
            return Err(HeapError::NullPool);
        }
        if head.pool_id() == dst.pool_id() {
            return Err(HeapError::AliasedPools);
        }
        let src_row = self.types.row(head.type_id())?;
        let src_field = src_row
            .fields
            .get(field_nr)
            .ok_or(HeapError::FieldOutOfRange { field: field_nr })?;
        let dst_row = self.types.row(dst.type_id())?;
        let dst_stride = dst_row.fields[0].size;
        let src_stride = src_field.size;

        let mut cursor = head;
        while !cursor.is_null() {
            let out = self.pool_alloc(dst)?;
            let src_ptr = self.get_field(cursor, field_nr)?;
            let dst_ptr = self.get_field(out, 0)?;
            // SAFETY: field pointers into two distinct live pools.
            unsafe {
                f(
                    slice::from_raw_parts(src_ptr.as_ptr(), src_stride),
                    slice::from_raw_parts_mut(dst_ptr.as_ptr(), dst_stride),
                );
            }
            cursor = self.get_field_reference(cursor, 0)?;
        }
        Ok(())
    }
}
