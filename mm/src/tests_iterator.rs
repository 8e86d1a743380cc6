//! Cursor behaviour across the four kinds.

use laneheap_abi::{IterKind, PAGE, PoolHandle, Reference};

use crate::error::HeapError;
use crate::heap::Heap;
use crate::iterator::ITERATOR_END;
use crate::test_fixtures::*;

#[test]
fn test_simple_iterator_walks_population() {
    let heap = fixture_heap();
    let mut pool = heap.pool_create(WORD_TYPE).unwrap();
    for i in 0u64..100 {
        let r = heap.pool_alloc(&mut pool).unwrap();
        heap.set_field(r, 0, &i.to_ne_bytes()).unwrap();
    }

    let mut it = heap.iterator_from_pool(pool).unwrap();
    assert_eq!(it.kind(), IterKind::Simple);
    let mut seen = Vec::new();
    loop {
        let ptr = heap.iterator_get_field(it, 0).unwrap();
        seen.push(unsafe { (ptr.as_ptr() as *const u64).read() });
        let next = heap.iterator_next(pool, it);
        if next == ITERATOR_END {
            break;
        }
        it = next;
    }
    assert_eq!(seen, (0u64..100).collect::<Vec<_>>());

    // And back again.
    let mut walked_back = 1;
    loop {
        let prev = heap.iterator_prev(it);
        if prev == ITERATOR_END {
            break;
        }
        walked_back += 1;
        it = prev;
    }
    assert_eq!(walked_back, 100);

    heap.pool_destroy(&mut pool).unwrap();
}

#[test]
fn test_simple_iterator_exact_page_boundary() {
    let heap = fixture_heap();
    let mut pool = heap.pool_create(WORD_TYPE).unwrap();
    heap.pool_grow(&mut pool, PAGE).unwrap();

    let mut it = heap.iterator_from_pool(pool).unwrap();
    let mut count = 1u64;
    loop {
        let next = heap.iterator_next(pool, it);
        if next == ITERATOR_END {
            break;
        }
        count += 1;
        it = next;
    }
    assert_eq!(count, PAGE);

    // Crossing into a second subpool keeps striding.
    heap.pool_grow(&mut pool, 5).unwrap();
    let mut it = heap.iterator_from_pool(pool).unwrap();
    let mut count = 1u64;
    loop {
        let next = heap.iterator_next(pool, it);
        if next == ITERATOR_END {
            break;
        }
        count += 1;
        it = next;
    }
    assert_eq!(count, PAGE + 5);

    heap.pool_destroy(&mut pool).unwrap();
}

#[test]
fn test_list_insert_after_head_iterates_in_reverse() {
    let heap = fixture_heap();
    let mut pool = heap.pool_create(LIST_NODE_TYPE).unwrap();
    let head = heap.pool_alloc(&mut pool).unwrap();
    heap.set_field(head, 1, &u64::MAX.to_ne_bytes()).unwrap();

    let it = heap.iterator_from_reference(head).unwrap();
    assert_eq!(it.kind(), IterKind::List);
    for i in 0u64..10_000 {
        let node = heap.pool_alloc(&mut pool).unwrap();
        heap.set_field(node, 1, &i.to_ne_bytes()).unwrap();
        heap.iterator_list_insert(it, node).unwrap();
    }

    // Head first, then every insertion in reverse order.
    let mut cursor = heap.iterator_next(PoolHandle::NULL, it);
    let mut expected = 10_000u64;
    while cursor != ITERATOR_END {
        expected -= 1;
        let ptr = heap.iterator_get_field(cursor, 1).unwrap();
        assert_eq!(unsafe { (ptr.as_ptr() as *const u64).read() }, expected);
        cursor = heap.iterator_next(PoolHandle::NULL, cursor);
    }
    assert_eq!(expected, 0);

    heap.pool_destroy(&mut pool).unwrap();
}

#[test]
fn test_list_remove_after() {
    let heap = fixture_heap();
    let mut pool = heap.pool_create(LIST_NODE_TYPE).unwrap();
    let head = heap.pool_alloc(&mut pool).unwrap();
    let it = heap.iterator_from_reference(head).unwrap();
    for i in 0u64..3 {
        let node = heap.pool_alloc(&mut pool).unwrap();
        heap.set_field(node, 1, &i.to_ne_bytes()).unwrap();
        heap.iterator_list_insert(it, node).unwrap();
    }

    heap.iterator_list_remove(it).unwrap();
    heap.iterator_list_remove(it).unwrap();
    heap.iterator_list_remove(it).unwrap();
    assert_eq!(heap.iterator_list_remove(it), Err(HeapError::NoSuccessor));

    // Unlinked nodes are not reclaimed.
    assert_eq!(pool.population(), 4);

    heap.pool_destroy(&mut pool).unwrap();
}

#[test]
fn test_list_iterator_follows_far_links() {
    let heap = fixture_heap();
    let mut pool = heap.pool_create(LIST_NODE_TYPE).unwrap();
    heap.pool_grow(&mut pool, 3 * PAGE).unwrap();

    // A three-element chain whose hops are both beyond near reach.
    let a = heap.pool_get_ref(pool, 0);
    let b = heap.pool_get_ref(pool, PAGE + 10);
    let c = heap.pool_get_ref(pool, 2 * PAGE + 500);
    heap.set_field_reference(a, 0, b).unwrap();
    heap.set_field_reference(b, 0, c).unwrap();
    for (r, v) in [(a, 1u64), (b, 2), (c, 3)] {
        heap.set_field(r, 1, &v.to_ne_bytes()).unwrap();
    }

    let mut values = Vec::new();
    let mut it = heap.iterator_from_reference(a).unwrap();
    loop {
        let ptr = heap.iterator_get_field(it, 1).unwrap();
        values.push(unsafe { (ptr.as_ptr() as *const u64).read() });
        let next = heap.iterator_next(PoolHandle::NULL, it);
        if next == ITERATOR_END {
            break;
        }
        it = next;
    }
    assert_eq!(values, vec![1, 2, 3]);

    heap.pool_destroy(&mut pool).unwrap();
}

#[test]
fn test_iterator_prev_only_for_simple() {
    let heap = fixture_heap();
    let mut pool = heap.pool_create(LIST_NODE_TYPE).unwrap();
    let head = heap.pool_alloc(&mut pool).unwrap();
    let it = heap.iterator_from_reference(head).unwrap();
    assert_eq!(heap.iterator_prev(it), ITERATOR_END);
    heap.pool_destroy(&mut pool).unwrap();
}

fn bst_insert(heap: &Heap, pool: &mut PoolHandle, root: Reference, value: u64) {
    let mut node = root;
    loop {
        let node_value = read_word(heap, node, 2);
        let side = if value < node_value { 0 } else { 1 };
        let child = heap.get_field_reference(node, side).unwrap();
        if child.is_null() {
            let fresh = heap.pool_alloc(pool).unwrap();
            heap.set_field(fresh, 2, &value.to_ne_bytes()).unwrap();
            heap.set_field_reference(node, side, fresh).unwrap();
            return;
        }
        node = child;
    }
}

#[test]
fn test_btree_iterator_yields_sorted_keys() {
    let heap = fixture_heap();
    let mut pool = heap.pool_create(TREE_NODE_TYPE).unwrap();

    let root = heap.pool_alloc(&mut pool).unwrap();
    heap.set_field(root, 2, &mixed_key(0).to_ne_bytes()).unwrap();
    let mut expected = vec![mixed_key(0)];
    for i in 1u64..10_000 {
        let key = mixed_key(i);
        bst_insert(&heap, &mut pool, root, key);
        expected.push(key);
    }
    expected.sort_unstable();

    let mut it = heap.iterator_new(pool, root).unwrap();
    assert_eq!(it.kind(), IterKind::Complex);
    let mut keys = Vec::new();
    loop {
        let next = heap.iterator_next(PoolHandle::NULL, it);
        if next == ITERATOR_END {
            break;
        }
        let ptr = heap.iterator_get_field(it, 2).unwrap();
        keys.push(unsafe { (ptr.as_ptr() as *const u64).read() });
    }
    assert_eq!(keys, expected);

    heap.iterator_destroy(&mut it).unwrap();
    assert!(it.is_null());
    heap.pool_destroy(&mut pool).unwrap();
}

#[test]
fn test_ntree_iterator_preorder_with_sparse_children() {
    let heap = fixture_heap();
    let mut pool = heap.pool_create(OCT_NODE_TYPE).unwrap();

    // root -> children at slots 0, 3, 7; the slot-0 child has one child of
    // its own at slot 1. Pre-order left-to-right is fixed by construction.
    let root = heap.pool_alloc(&mut pool).unwrap();
    let c0 = heap.pool_alloc(&mut pool).unwrap();
    let c0_1 = heap.pool_alloc(&mut pool).unwrap();
    let c3 = heap.pool_alloc(&mut pool).unwrap();
    let c7 = heap.pool_alloc(&mut pool).unwrap();
    heap.set_field_reference(root, 0, c0).unwrap();
    heap.set_field_reference(root, 3, c3).unwrap();
    heap.set_field_reference(root, 7, c7).unwrap();
    heap.set_field_reference(c0, 1, c0_1).unwrap();
    for (order, node) in [root, c0, c0_1, c3, c7].iter().enumerate() {
        heap.set_field(*node, 8, &(order as u64).to_ne_bytes()).unwrap();
    }

    let mut it = heap.iterator_new(pool, root).unwrap();
    let mut order = Vec::new();
    loop {
        let next = heap.iterator_next(PoolHandle::NULL, it);
        if next == ITERATOR_END {
            break;
        }
        let ptr = heap.iterator_get_field(it, 8).unwrap();
        order.push(unsafe { (ptr.as_ptr() as *const u64).read() });
    }
    assert_eq!(order, vec![0, 1, 2, 3, 4]);

    heap.iterator_destroy(&mut it).unwrap();
    heap.pool_destroy(&mut pool).unwrap();
}

#[test]
fn test_complex_iterator_field_access_before_first_step() {
    let heap = fixture_heap();
    let mut pool = heap.pool_create(TREE_NODE_TYPE).unwrap();
    let root = heap.pool_alloc(&mut pool).unwrap();

    let mut it = heap.iterator_new(pool, root).unwrap();
    // The cursor sits before the first element until the first step.
    assert!(heap.iterator_get_field(it, 2).is_err());

    assert_ne!(heap.iterator_next(PoolHandle::NULL, it), ITERATOR_END);
    heap.iterator_set_field(it, 2, &7u64.to_ne_bytes()).unwrap();
    assert_eq!(read_word(&heap, root, 2), 7);

    heap.iterator_destroy(&mut it).unwrap();
    heap.pool_destroy(&mut pool).unwrap();
}

#[test]
fn test_iterator_new_null_combinations() {
    let heap = fixture_heap();
    let mut pool = heap.pool_create(LIST_NODE_TYPE).unwrap();
    let head = heap.pool_alloc(&mut pool).unwrap();

    assert!(
        heap.iterator_new(PoolHandle::NULL, Reference::NULL)
            .is_err()
    );
    let from_root = heap
        .iterator_new(PoolHandle::NULL, head)
        .unwrap();
    assert_eq!(from_root.kind(), IterKind::List);
    let from_pool = heap.iterator_new(pool, Reference::NULL).unwrap();
    assert_eq!(from_pool.kind(), IterKind::List);
    assert_eq!(from_pool.as_reference().absolute_index(), 0);

    heap.pool_destroy(&mut pool).unwrap();
}
