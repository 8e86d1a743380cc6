//! Compressed local-reference codec.
//!
//! Reference lanes store 16-bit values. A target within `±(PAGE - 1)`
//! records of its holder is encoded as a signed delta — no indirection on
//! the common case. Anything further becomes a far reference: the lane
//! stores only the field slot with the long bit set, and the target's
//! absolute index lives in the expansion table under a tag naming
//! `(pool, subpool, index, slot)`. The slot is part of the tag so one
//! holder can own several far references.
//!
//! Transitions keep the table exact: overwriting a far reference with a
//! near one (or with null) deletes its entry before the lane is rewritten,
//! and re-inserting under the same tag overwrites in place, so each far
//! reference in existence has exactly one entry.

use laneheap_abi::{LocalRef, PAGE, REF_NOT_FOUND, RefTag, Reference, TypeClass};

use crate::error::{HeapError, HeapResult};
use crate::heap::Heap;
use crate::pool::field_ptr;

impl Heap {
    /// Point field `field_nr` of `holder` at `target` (same pool), choosing
    /// the near or far encoding.
    ///
    /// A null `target` stores the null encoding. Note that the null
    /// encoding is the zero delta, so a record cannot reference itself.
    pub fn set_field_reference(
        &self,
        holder: Reference,
        field_nr: usize,
        target: Reference,
    ) -> HeapResult {
        let cell = self.local_ref_cell(holder, field_nr)?;
        // SAFETY: local_ref_cell returned an in-range lane cell.
        let old = LocalRef::new(unsafe { cell.read() });

        if target.is_null() {
            if old.is_long() {
                let _ = self.delete_reference(RefTag::for_holder(holder, old));
            }
            unsafe { cell.write(LocalRef::NULL.raw()) };
            return Ok(());
        }
        if target.pool_id() != holder.pool_id() {
            return Err(HeapError::CrossPool);
        }

        let delta = target.absolute_index() as i64 - holder.absolute_index() as i64;
        if delta <= -(PAGE as i64) || delta >= PAGE as i64 {
            let slot_ref = LocalRef::far(field_nr as u16);
            self.compress_absolute_index(
                RefTag::for_holder(holder, slot_ref),
                target.absolute_index(),
            )?;
            unsafe { cell.write(slot_ref.raw()) };
        } else {
            if old.is_long() {
                let _ = self.delete_reference(RefTag::for_holder(holder, old));
            }
            unsafe { cell.write(LocalRef::near(delta).raw()) };
        }
        Ok(())
    }

    /// Expand the local reference in field `field_nr` of `holder` back into
    /// a full reference. Null if the lane is null or the expansion table
    /// has no entry for the tag.
    pub fn get_field_reference(&self, holder: Reference, field_nr: usize) -> HeapResult<Reference> {
        let cell = self.local_ref_cell(holder, field_nr)?;
        // SAFETY: in-range lane cell.
        let local = LocalRef::new(unsafe { cell.read() });
        if local.is_null() {
            return Ok(Reference::NULL);
        }

        let absolute = if local.is_long() {
            let found = self.expand_local_reference(RefTag::for_holder(holder, local));
            if found == REF_NOT_FOUND {
                return Ok(Reference::NULL);
            }
            found
        } else {
            (holder.absolute_index() as i64 + local.delta()) as u64
        };
        Ok(holder.with_absolute_index(absolute))
    }

    /// Pointer to the 16-bit cell of a local-reference field.
    fn local_ref_cell(&self, holder: Reference, field_nr: usize) -> HeapResult<*mut u16> {
        let row = self.types.row(holder.type_id())?;
        let field = row
            .fields
            .get(field_nr)
            .ok_or(HeapError::FieldOutOfRange { field: field_nr })?;
        if self.types.row(field.type_id)?.class != TypeClass::LocalRef {
            return Err(HeapError::NotReferenceField { field: field_nr });
        }
        let slot = self.pool_slot(holder.pool_id())?;
        // SAFETY: the handle indexes inside the mapped range of its pool.
        Ok(unsafe { field_ptr(&slot, field, holder) } as *mut u16)
    }
}
