//! Topology-specialised pool cursors.
//!
//! The cursor kind is picked from the recorded topology of the pool's type:
//!
//! | kind         | topology | traversal                              |
//! |--------------|----------|----------------------------------------|
//! | simple       | none     | stride absolute indices to population  |
//! | list         | list     | follow the leading reference lane      |
//! | list-compact | list     | same; reserved for hole-free lists     |
//! | complex      | tree     | explicit-stack walk, state out of word |
//!
//! Simple and list cursors are handle-sized: the object reference with the
//! kind in the flag bits. A complex cursor owns an auxiliary pool of 64-bit
//! words holding its own pool handle, the target pool handle, the
//! reference-field count, a prev/cursor/next triplet of absolute indices
//! and a growable traversal stack; the visible handle stores the auxiliary
//! pool's id. Binary trees step in order (descend the left spine pushing,
//! pop, then arm the right child); wider trees step pre-order left to
//! right.
//!
//! `next` returns [`ITERATOR_END`] past the last element; complex cursors
//! keep their last position so `get`/`set` remain valid after the walk.

use core::ptr::NonNull;

use laneheap_abi::{
    IterKind, IteratorHandle, PAGE, PAGE_SHIFT, PoolHandle, REF_BEGIN, REF_END, REF_INVALID_BIT,
    Reference, Topology,
};

use crate::error::{HeapError, HeapResult};
use crate::heap::Heap;

/// The failed-construction cursor.
pub const NULL_ITERATOR: IteratorHandle = IteratorHandle::NULL;

/// Returned by `iterator_next`/`iterator_prev` past either end.
pub const ITERATOR_END: IteratorHandle = IteratorHandle::NULL;

// Word layout of a complex cursor's auxiliary pool.
const CXI_SELF: usize = 0;
const CXI_POOL: usize = 1;
const CXI_REFS: usize = 2;
const CXI_PREV: usize = 3;
const CXI_CURSOR: usize = 4;
const CXI_NEXT: usize = 5;
const CXI_DEPTH: usize = 6;
const CXI_STACK: usize = 7;

impl Heap {
    /// Reference to the record at `absolute_index` of `pool`.
    pub fn pool_get_ref(&self, pool: PoolHandle, absolute_index: u64) -> Reference {
        debug_assert!(absolute_index >> PAGE_SHIFT <= u16::MAX as u64);
        Reference::new(pool.raw())
            .with_raw_index((absolute_index & (PAGE - 1)) as u16)
            .with_subpool_id((absolute_index >> PAGE_SHIFT) as u16)
    }

    /// Cursor over `pool` starting at its first record.
    pub fn iterator_from_pool(&self, pool: PoolHandle) -> HeapResult<IteratorHandle> {
        if pool.is_null() {
            return Err(HeapError::NullPool);
        }
        self.iterator_common(self.pool_get_ref(pool, 0))
    }

    /// Cursor starting at `reference`.
    pub fn iterator_from_reference(&self, reference: Reference) -> HeapResult<IteratorHandle> {
        if reference.is_null() {
            return Err(HeapError::NullReference);
        }
        self.iterator_common(reference)
    }

    fn iterator_common(&self, reference: Reference) -> HeapResult<IteratorHandle> {
        let row = self.types.row(reference.type_id())?;
        let kind = match row.topology {
            Topology::None => IterKind::Simple,
            Topology::List => IterKind::List,
            // Tree cursors need the pool handle; use iterator_new.
            Topology::BTree | Topology::NTree => return Err(HeapError::IteratorMismatch),
        };
        Ok(IteratorHandle::from_reference(reference, kind))
    }

    /// The canonical constructor: builds whichever cursor the pool's
    /// topology calls for. Either handle may be null when the other one
    /// determines the cursor (a list root alone, or a plain pool alone).
    pub fn iterator_new(&self, pool: PoolHandle, root: Reference) -> HeapResult<IteratorHandle> {
        match (pool.is_null(), root.is_null()) {
            (true, true) => Err(HeapError::NullReference),
            (true, false) => self.iterator_from_reference(root),
            (false, true) => self.iterator_from_pool(pool),
            (false, false) => {
                let row = self.types.row(pool.type_id())?;
                match row.topology {
                    Topology::None => Ok(IteratorHandle::from_reference(root, IterKind::Simple)),
                    Topology::List => Ok(IteratorHandle::from_reference(root, IterKind::List)),
                    Topology::BTree | Topology::NTree => {
                        self.complex_iterator_new(pool, root, row.ref_fields)
                    }
                }
            }
        }
    }

    fn complex_iterator_new(
        &self,
        pool: PoolHandle,
        root: Reference,
        ref_fields: usize,
    ) -> HeapResult<IteratorHandle> {
        let mut aux = self.pool_create(self.word_type)?;
        if let Err(e) = self.pool_grow(&mut aux, CXI_STACK as u64) {
            let _ = self.pool_destroy(&mut aux);
            return Err(e);
        }
        let words = self.pool_slot(aux.pool_id())?.base as *mut u64;
        // SAFETY: the auxiliary pool holds at least CXI_STACK words.
        unsafe {
            words.add(CXI_SELF).write(aux.raw());
            words.add(CXI_POOL).write(pool.raw());
            words.add(CXI_REFS).write(ref_fields as u64);
            words.add(CXI_PREV).write(REF_BEGIN);
            words.add(CXI_CURSOR).write(REF_BEGIN);
            words.add(CXI_NEXT).write(root.absolute_index());
            words.add(CXI_DEPTH).write(0);
        }
        Ok(IteratorHandle::NULL
            .with_type_id(pool.type_id())
            .with_pool_id(aux.pool_id())
            .with_kind(IterKind::Complex))
    }

    /// Release a cursor and null the caller's handle. Only complex cursors
    /// own memory, but destroying the others does no harm.
    pub fn iterator_destroy(&self, iterator: &mut IteratorHandle) -> HeapResult {
        if iterator.kind() == IterKind::Complex && !iterator.is_null() {
            let words = self.cxi_words(*iterator)?;
            // SAFETY: word 0 of a live complex cursor is its pool handle.
            let mut aux = PoolHandle::new(unsafe { words.add(CXI_SELF).read() });
            self.pool_destroy(&mut aux)?;
        }
        *iterator = NULL_ITERATOR;
        Ok(())
    }

    /// Advance to the next element, or [`ITERATOR_END`]. The pool handle is
    /// only consulted by simple cursors (it carries the population); linked
    /// cursors accept a null pool.
    pub fn iterator_next(&self, pool: PoolHandle, iterator: IteratorHandle) -> IteratorHandle {
        match iterator.kind() {
            IterKind::Simple => self.simple_next(pool, iterator),
            IterKind::List | IterKind::ListCompact => self.list_next(iterator),
            IterKind::Complex => self.complex_next(iterator),
        }
    }

    /// Step back one element. Defined only for simple cursors; list links
    /// are one-way.
    pub fn iterator_prev(&self, iterator: IteratorHandle) -> IteratorHandle {
        if iterator.kind() != IterKind::Simple {
            return ITERATOR_END;
        }
        let absolute = iterator.absolute_index();
        if absolute == 0 {
            return ITERATOR_END;
        }
        iterator.with_absolute_index(absolute - 1)
    }

    /// Pointer to a field of the element under the cursor.
    pub fn iterator_get_field(
        &self,
        iterator: IteratorHandle,
        field_nr: usize,
    ) -> HeapResult<NonNull<u8>> {
        if iterator.kind() != IterKind::Complex {
            return self.get_field(iterator.as_reference(), field_nr);
        }
        let reference = self.cxi_cursor_ref(iterator)?;
        self.get_field(reference, field_nr)
    }

    /// Write a field of the element under the cursor.
    pub fn iterator_set_field(
        &self,
        iterator: IteratorHandle,
        field_nr: usize,
        data: &[u8],
    ) -> HeapResult {
        if iterator.kind() != IterKind::Complex {
            return self.set_field(iterator.as_reference(), field_nr, data);
        }
        let reference = self.cxi_cursor_ref(iterator)?;
        self.set_field(reference, field_nr, data)
    }

    /// Splice `reference` in directly after the cursor of a list iterator.
    pub fn iterator_list_insert(
        &self,
        iterator: IteratorHandle,
        reference: Reference,
    ) -> HeapResult {
        if !matches!(iterator.kind(), IterKind::List | IterKind::ListCompact) {
            return Err(HeapError::IteratorMismatch);
        }
        let cursor = iterator.as_reference();
        let next = self.get_field_reference(cursor, 0)?;
        self.set_field_reference(reference, 0, next)?;
        self.set_field_reference(cursor, 0, reference)
    }

    /// Unlink the element after the cursor of a list iterator. The record's
    /// storage is not reclaimed until the pool is collected — unlinking is
    /// deliberately free.
    pub fn iterator_list_remove(&self, iterator: IteratorHandle) -> HeapResult {
        if !matches!(iterator.kind(), IterKind::List | IterKind::ListCompact) {
            return Err(HeapError::IteratorMismatch);
        }
        let cursor = iterator.as_reference();
        let next = self.get_field_reference(cursor, 0)?;
        if next.is_null() {
            return Err(HeapError::NoSuccessor);
        }
        let next_next = self.get_field_reference(next, 0)?;
        self.set_field_reference(cursor, 0, next_next)
    }

    fn simple_next(&self, pool: PoolHandle, iterator: IteratorHandle) -> IteratorHandle {
        if pool.is_null() {
            return ITERATOR_END;
        }
        let next = iterator.absolute_index() + 1;
        if next < pool.population() {
            iterator.with_absolute_index(next)
        } else {
            ITERATOR_END
        }
    }

    fn list_next(&self, iterator: IteratorHandle) -> IteratorHandle {
        let next = match self.get_field_reference(iterator.as_reference(), 0) {
            Ok(next) => next,
            Err(_) => return ITERATOR_END,
        };
        if next.is_null() {
            return ITERATOR_END;
        }
        iterator.with_absolute_index(next.absolute_index())
    }

    fn complex_next(&self, iterator: IteratorHandle) -> IteratorHandle {
        let words = match self.cxi_words(iterator) {
            Ok(words) => words,
            Err(_) => return ITERATOR_END,
        };
        // SAFETY: live complex cursor; header words are in range.
        let ref_fields = unsafe { words.add(CXI_REFS).read() };
        if ref_fields == 2 {
            self.btree_next(iterator)
        } else {
            self.ntree_next(iterator)
        }
    }

    /// In-order step: push the left spine of `next`, pop into the cursor,
    /// arm `next` with the popped node's right child.
    fn btree_next(&self, iterator: IteratorHandle) -> IteratorHandle {
        let Ok(words) = self.cxi_words(iterator) else {
            return ITERATOR_END;
        };
        // SAFETY: header words of a live complex cursor.
        let (mut next, depth) =
            unsafe { (words.add(CXI_NEXT).read(), words.add(CXI_DEPTH).read()) };
        if next == REF_END && depth == 0 {
            return ITERATOR_END;
        }

        while next != REF_END {
            if self.cxi_push(iterator, next).is_err() {
                return ITERATOR_END;
            }
            next = self.cxi_field_ref(iterator, next, 0);
        }
        let cursor = match self.cxi_pop(iterator) {
            Ok(cursor) => cursor,
            Err(_) => return ITERATOR_END,
        };
        let next = self.cxi_field_ref(iterator, cursor, 1);

        let Ok(words) = self.cxi_words(iterator) else {
            return ITERATOR_END;
        };
        // SAFETY: header words; the stack may have moved the base, which
        // cxi_words re-resolved.
        unsafe {
            let previous = words.add(CXI_CURSOR).read();
            words.add(CXI_PREV).write(previous);
            words.add(CXI_CURSOR).write(cursor);
            words.add(CXI_NEXT).write(next);
        }
        iterator
    }

    /// Pre-order step: push the children of `next` right-to-left, visit
    /// `next`, pop the new `next`.
    fn ntree_next(&self, iterator: IteratorHandle) -> IteratorHandle {
        let Ok(words) = self.cxi_words(iterator) else {
            return ITERATOR_END;
        };
        // SAFETY: header words of a live complex cursor.
        let (next, ref_fields) =
            unsafe { (words.add(CXI_NEXT).read(), words.add(CXI_REFS).read()) };
        if next == REF_END {
            return ITERATOR_END;
        }

        for field_nr in (0..ref_fields as usize).rev() {
            let child = self.cxi_field_ref(iterator, next, field_nr);
            if child == REF_END {
                continue;
            }
            if self.cxi_push(iterator, child).is_err() {
                return ITERATOR_END;
            }
        }
        let popped = match self.cxi_pop(iterator) {
            Ok(popped) => popped,
            Err(_) => return ITERATOR_END,
        };

        let Ok(words) = self.cxi_words(iterator) else {
            return ITERATOR_END;
        };
        // SAFETY: header words, freshly resolved base.
        unsafe {
            let previous = words.add(CXI_CURSOR).read();
            words.add(CXI_PREV).write(previous);
            words.add(CXI_CURSOR).write(next);
            words.add(CXI_NEXT).write(popped);
        }
        iterator
    }

    /// Base of a complex cursor's word pool. Must be re-resolved after any
    /// operation that can grow or shrink the stack.
    fn cxi_words(&self, iterator: IteratorHandle) -> HeapResult<*mut u64> {
        Ok(self.pool_slot(iterator.pool_id())?.base as *mut u64)
    }

    /// Reference of the element under a complex cursor.
    fn cxi_cursor_ref(&self, iterator: IteratorHandle) -> HeapResult<Reference> {
        let words = self.cxi_words(iterator)?;
        // SAFETY: header words of a live complex cursor.
        let (cursor, target) =
            unsafe { (words.add(CXI_CURSOR).read(), words.add(CXI_POOL).read()) };
        if cursor & REF_INVALID_BIT != 0 {
            return Err(HeapError::NullReference);
        }
        Ok(self.pool_get_ref(PoolHandle::new(target), cursor))
    }

    /// Decode reference field `field_nr` of the element at `absolute` in the
    /// iterated pool, as an absolute index. Null and unresolvable links both
    /// come back as [`REF_END`].
    fn cxi_field_ref(&self, iterator: IteratorHandle, absolute: u64, field_nr: usize) -> u64 {
        let Ok(words) = self.cxi_words(iterator) else {
            return REF_END;
        };
        // SAFETY: header word of a live complex cursor.
        let target = PoolHandle::new(unsafe { words.add(CXI_POOL).read() });
        let holder = self.pool_get_ref(target, absolute);
        match self.get_field_reference(holder, field_nr) {
            Ok(reference) if reference.is_null() => REF_END,
            Ok(reference) => reference.absolute_index(),
            Err(_) => REF_END,
        }
    }

    /// Push onto the traversal stack, growing the word pool by one slot.
    fn cxi_push(&self, iterator: IteratorHandle, value: u64) -> HeapResult {
        let words = self.cxi_words(iterator)?;
        // SAFETY: header word of a live complex cursor.
        let mut aux = PoolHandle::new(unsafe { words.add(CXI_SELF).read() });
        self.pool_alloc(&mut aux)?;
        // Growing may have moved the base.
        let words = self.cxi_words(iterator)?;
        // SAFETY: the pool now holds CXI_STACK + depth + 1 words.
        unsafe {
            words.add(CXI_SELF).write(aux.raw());
            let depth = words.add(CXI_DEPTH).read();
            words.add(CXI_STACK + depth as usize).write(value);
            words.add(CXI_DEPTH).write(depth + 1);
        }
        Ok(())
    }

    /// Pop from the traversal stack, returning [`REF_END`] when empty.
    fn cxi_pop(&self, iterator: IteratorHandle) -> HeapResult<u64> {
        let words = self.cxi_words(iterator)?;
        // SAFETY: header words of a live complex cursor.
        let depth = unsafe { words.add(CXI_DEPTH).read() };
        if depth == 0 {
            return Ok(REF_END);
        }
        let value = unsafe { words.add(CXI_STACK + depth as usize - 1).read() };
        unsafe { words.add(CXI_DEPTH).write(depth - 1) };

        let mut aux = PoolHandle::new(unsafe { words.add(CXI_SELF).read() });
        self.pool_shrink(&mut aux, 1)?;
        // Shrinking may have moved the base.
        let words = self.cxi_words(iterator)?;
        // SAFETY: header word, freshly resolved base.
        unsafe { words.add(CXI_SELF).write(aux.raw()) };
        Ok(value)
    }
}
