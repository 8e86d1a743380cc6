//! Compacting collector.
//!
//! Collection rewrites one pool into a fresh pool of the same type, walking
//! the topology recorded for the record type and copying only what the
//! caller's roots reach. Roots are raw locations pushed onto an internal
//! stack (itself a word pool); they are rewritten in place as their
//! structures move, and the old pool is destroyed at the end.
//!
//! Placement is topology-specific: list chains are laid out linearly so
//! every link becomes a `+1` near delta; binary trees are placed in order,
//! preserving in-order iteration; wider trees allocate each node's children
//! contiguously so siblings stay adjacent.
//!
//! The movers run on explicit work stacks — recursion depth is bounded by
//! memory, not the call stack — and a per-collection visited bitmap refuses
//! anything that is not a forest: a record reached twice (a cycle, or
//! sharing between roots) aborts with [`HeapError::CyclicTopology`].
//!
//! # Failure contract
//!
//! An error mid-collection destroys the partial destination pool, but roots
//! already processed have been rewritten and the rest have not. That state
//! is not recoverable; the caller is expected to terminate.

use alloc::vec;
use alloc::vec::Vec;

use log::{debug, info, warn};

use laneheap_abi::{LocalRef, PAGE, PAGE_SHIFT, PoolHandle, REF_NOT_FOUND, RefTag, Reference, Topology};

use crate::error::{HeapError, HeapResult};
use crate::heap::Heap;
use crate::type_table::FieldOffset;

/// Root stack bookkeeping. The stack lives in a word pool so it can grow
/// without bound; `roots` counts the pointers currently pushed.
pub(crate) struct CollectorState {
    pub root_pool: PoolHandle,
    pub roots: u64,
}

impl CollectorState {
    pub const fn new() -> Self {
        Self {
            root_pool: PoolHandle::NULL,
            roots: 0,
        }
    }
}

/// One bit per source record; set on first visit, trips on the second.
struct Visited {
    bits: Vec<u64>,
}

impl Visited {
    fn new(population: u64) -> Self {
        Self {
            bits: vec![0u64; population.div_ceil(64) as usize],
        }
    }

    /// Mark `index`; false if it was already marked (or out of range).
    fn mark(&mut self, index: u64) -> bool {
        let word = (index / 64) as usize;
        let bit = 1u64 << (index % 64);
        match self.bits.get_mut(word) {
            Some(slot) if *slot & bit == 0 => {
                *slot |= bit;
                true
            }
            _ => false,
        }
    }
}

/// Work-stack frames of the in-order binary-tree mover.
enum BtreeFrame {
    /// Walk into a subtree (may be null).
    Enter(Reference),
    /// Left subtree placed; materialise this node.
    Emit(Reference),
    /// Right subtree placed; patch it into this new node.
    FixRight(Reference),
}

impl Heap {
    /// Reserve the collector's root stack. Idempotent; cheap enough to call
    /// eagerly, costs nothing if collection is never used.
    pub fn gc_init(&self) -> HeapResult {
        let mut state = self.collector.lock();
        if !state.root_pool.is_null() {
            return Ok(());
        }
        state.root_pool = self.pool_create(self.word_type)?;
        debug!("gc_init: root stack ready");
        Ok(())
    }

    /// Push a root location for the next collection.
    ///
    /// Only roots referring into the pool about to be collected may be
    /// pushed.
    ///
    /// # Safety
    ///
    /// `root` must point to a live `Reference` that stays valid and
    /// otherwise untouched until `collect_pool` returns; the collector
    /// reads and rewrites it through this pointer.
    pub unsafe fn push_root(&self, root: *mut Reference) -> HeapResult {
        let mut state = self.collector.lock();
        if state.root_pool.is_null() {
            return Err(HeapError::CollectorUninit);
        }
        let mut pool = state.root_pool;
        self.pool_alloc(&mut pool)?;
        state.root_pool = pool;
        let words = self.pool_slot(pool.pool_id())?.base as *mut u64;
        // SAFETY: the stack pool holds at least roots + 1 words.
        unsafe { words.add(state.roots as usize).write(root as u64) };
        state.roots += 1;
        Ok(())
    }

    fn pop_root(&self, state: &mut CollectorState) -> HeapResult<Option<*mut Reference>> {
        if state.roots == 0 {
            return Ok(None);
        }
        state.roots -= 1;
        let words = self.pool_slot(state.root_pool.pool_id())?.base as *mut u64;
        // SAFETY: roots words are live in the stack pool.
        let pointer = unsafe { words.add(state.roots as usize).read() } as *mut Reference;
        let mut pool = state.root_pool;
        self.pool_shrink(&mut pool, 1)?;
        state.root_pool = pool;
        Ok(Some(pointer))
    }

    /// Collect `pool`: move everything reachable from the pushed roots into
    /// a fresh pool, rewrite the roots, destroy the old pool and replace
    /// the handle.
    ///
    /// On error the partial destination is destroyed and the old pool is
    /// left mapped, but roots may already be rewritten — see the module
    /// documentation for the failure contract.
    pub fn collect_pool(&self, pool: &mut PoolHandle) -> HeapResult {
        let src = *pool;
        if src.is_null() {
            return Err(HeapError::NullPool);
        }
        let mut state = self.collector.lock();
        if state.root_pool.is_null() {
            return Err(HeapError::CollectorUninit);
        }
        let row = self.types.row(src.type_id())?;
        let topology = row.topology;
        let ref_fields = row.ref_fields;

        let mut dst = self.pool_create(src.type_id())?;
        let mut visited = Visited::new(src.population());

        let result = (|| -> HeapResult {
            while let Some(root_ptr) = self.pop_root(&mut state)? {
                // SAFETY: push_root's contract keeps the location alive and
                // exclusive for the duration of the collection.
                let root = unsafe { root_ptr.read() };
                let new_root = if root.is_null() {
                    Reference::NULL
                } else {
                    match topology {
                        Topology::List => {
                            let moved =
                                self.move_list(&mut dst, src, root.absolute_index(), &mut visited)?;
                            self.pool_get_ref(dst, moved)
                        }
                        Topology::BTree => self.move_btree(&mut dst, root, &mut visited)?,
                        Topology::NTree | Topology::None => {
                            let new_root = self.pool_alloc(&mut dst)?;
                            self.move_ntree(&mut dst, root, new_root, ref_fields, &mut visited)?;
                            new_root
                        }
                    }
                };
                // SAFETY: as above.
                unsafe { root_ptr.write(new_root) };
            }
            Ok(())
        })();

        if let Err(error) = result {
            warn!(
                "collect_pool: pool {} aborted ({}); roots may be inconsistent",
                src.pool_id(),
                error
            );
            // The partial destination may already own far-reference entries.
            let _ = self.delete_all_for_pool(dst);
            let _ = self.pool_destroy(&mut dst);
            return Err(error);
        }

        // Far-reference entries of the source are dead with it; unvisited
        // records (unlinked list nodes, junk allocations) may still own some.
        self.delete_all_for_pool(src)?;

        let mut old = *pool;
        self.pool_destroy(&mut old)?;
        info!(
            "collect_pool: pool {} compacted into pool {} ({} live of {})",
            src.pool_id(),
            dst.pool_id(),
            dst.population(),
            src.population()
        );
        *pool = dst;
        Ok(())
    }

    /// Move the chain starting at `src_index` into `dst`, linearised so
    /// every surviving link is a `+1` delta. Far links are resolved and
    /// their table entries dropped on the way. Returns the new absolute
    /// index of the head.
    fn move_list(
        &self,
        dst: &mut PoolHandle,
        src: PoolHandle,
        mut src_index: u64,
        visited: &mut Visited,
    ) -> HeapResult<u64> {
        let row = self.types.row(src.type_id())?;
        let head = self.pool_alloc(dst)?;
        let start_index = head.absolute_index();
        let mut dst_index = start_index;
        let src_slot = self.pool_slot(src.pool_id())?;
        let subpool_bytes = src_slot.subpool_bytes;

        while src_index != REF_NOT_FOUND {
            if !visited.mark(src_index) {
                return Err(HeapError::CyclicTopology);
            }
            // Re-resolve every round: the destination grows inside the loop.
            let dst_slot = self.pool_slot(dst.pool_id())?;
            // SAFETY: both indices are inside their pools' mapped ranges.
            let src_spool = unsafe {
                src_slot
                    .base
                    .add((src_index >> PAGE_SHIFT) as usize * subpool_bytes)
            };
            let dst_spool = unsafe {
                dst_slot
                    .base
                    .add((dst_index >> PAGE_SHIFT) as usize * subpool_bytes)
            };
            let src_at = (src_index & (PAGE - 1)) as usize;
            let dst_at = (dst_index & (PAGE - 1)) as usize;

            // SAFETY: the link lane is the leading u16 lane of the subpool.
            let link = LocalRef::new(unsafe { (src_spool as *const u16).add(src_at).read() });
            let mut next_index = REF_NOT_FOUND;
            if link.is_long() {
                let tag = RefTag::from_parts(
                    src.pool_id(),
                    (src_index >> PAGE_SHIFT) as u16,
                    src_at as u16,
                    link,
                );
                next_index = self.expand_local_reference(tag);
                let _ = self.delete_reference(tag);
            } else if !link.is_null() {
                next_index = (src_index as i64 + link.delta()) as u64;
            }

            // SAFETY: destination link lane cell.
            unsafe {
                (dst_spool as *mut u16).add(dst_at).write(if next_index == REF_NOT_FOUND {
                    LocalRef::NULL.raw()
                } else {
                    LocalRef::near(1).raw()
                });
                copy_record_lanes(dst_spool, src_spool, dst_at, src_at, &row.fields[1..]);
            }

            if next_index != REF_NOT_FOUND {
                self.pool_alloc(dst)?;
                dst_index += 1;
            }
            src_index = next_index;
        }
        Ok(start_index)
    }

    /// Move a binary tree in order, so the new pool iterates identically.
    /// Explicit-stack rendition of the in-order walk: left subtree, node,
    /// right subtree, with the freshly placed subtree root handed up
    /// through `placed`.
    fn move_btree(
        &self,
        dst: &mut PoolHandle,
        root: Reference,
        visited: &mut Visited,
    ) -> HeapResult<Reference> {
        let mut placed = Reference::NULL;
        let mut stack: Vec<BtreeFrame> = Vec::new();
        stack.push(BtreeFrame::Enter(root));

        while let Some(frame) = stack.pop() {
            match frame {
                BtreeFrame::Enter(node) => {
                    if node.is_null() {
                        placed = Reference::NULL;
                        continue;
                    }
                    if !visited.mark(node.absolute_index()) {
                        return Err(HeapError::CyclicTopology);
                    }
                    stack.push(BtreeFrame::Emit(node));
                    stack.push(BtreeFrame::Enter(self.get_field_reference(node, 0)?));
                }
                BtreeFrame::Emit(node) => {
                    let new_node = self.pool_alloc(dst)?;
                    self.copy_value_fields(node, new_node, 2)?;
                    self.set_field_reference(new_node, 0, placed)?;
                    stack.push(BtreeFrame::FixRight(new_node));
                    stack.push(BtreeFrame::Enter(self.get_field_reference(node, 1)?));
                }
                BtreeFrame::FixRight(new_node) => {
                    self.set_field_reference(new_node, 1, placed)?;
                    placed = new_node;
                }
            }
        }
        Ok(placed)
    }

    /// Move an n-ary tree, allocating each node's surviving children
    /// contiguously so siblings stay adjacent, then descending child-first.
    /// Also covers topology-free types (`ref_fields == 0`), where each root
    /// is a single record.
    fn move_ntree(
        &self,
        dst: &mut PoolHandle,
        root: Reference,
        new_root: Reference,
        ref_fields: usize,
        visited: &mut Visited,
    ) -> HeapResult {
        let mut stack: Vec<(Reference, Reference)> = vec![(root, new_root)];

        while let Some((node, new_node)) = stack.pop() {
            if !visited.mark(node.absolute_index()) {
                return Err(HeapError::CyclicTopology);
            }
            self.copy_value_fields(node, new_node, ref_fields)?;

            let first_child = stack.len();
            for field_nr in 0..ref_fields {
                let child = self.get_field_reference(node, field_nr)?;
                if child.is_null() {
                    continue;
                }
                let new_child = self.pool_alloc(dst)?;
                self.set_field_reference(new_node, field_nr, new_child)?;
                stack.push((child, new_child));
            }
            // Descend into child 0 first, like the traversal order.
            stack[first_child..].reverse();
        }
        Ok(())
    }

    /// Copy the non-reference fields of one record to its replacement.
    fn copy_value_fields(&self, src: Reference, dst: Reference, from: usize) -> HeapResult {
        let row = self.types.row(src.type_id())?;
        for field_nr in from..row.field_count() {
            let size = row.fields[field_nr].size;
            let src_ptr = self.get_field(src, field_nr)?;
            // SAFETY: a live field pointer spans the field's size.
            let data = unsafe { core::slice::from_raw_parts(src_ptr.as_ptr(), size) };
            self.set_field(dst, field_nr, data)?;
        }
        Ok(())
    }
}

/// Copy one record's lanes between subpools, skipping the first `skip`
/// fields (already handled by the caller). Specialised stores for the
/// power-of-two sizes, bulk copy otherwise.
///
/// # Safety
/// Both subpool bases must be mapped and the indices in range; source and
/// destination must not alias the same record.
unsafe fn copy_record_lanes(
    dst_spool: *mut u8,
    src_spool: *const u8,
    dst_index: usize,
    src_index: usize,
    fields: &[FieldOffset],
) {
    for field in fields {
        let dst = dst_spool.add(field.offset * PAGE as usize);
        let src = src_spool.add(field.offset * PAGE as usize);
        match field.size {
            1 => dst.add(dst_index).write(src.add(src_index).read()),
            2 => (dst as *mut u16)
                .add(dst_index)
                .write((src as *const u16).add(src_index).read()),
            4 => (dst as *mut u32)
                .add(dst_index)
                .write((src as *const u32).add(src_index).read()),
            8 => (dst as *mut u64)
                .add(dst_index)
                .write((src as *const u64).add(src_index).read()),
            _ => core::ptr::copy_nonoverlapping(
                src.add(field.size * src_index),
                dst.add(field.size * dst_index),
                field.size,
            ),
        }
    }
}
