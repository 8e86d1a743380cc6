//! Bulk-map behaviour over lanes and list chains.

use laneheap_abi::{PAGE, PoolHandle};

use crate::error::HeapError;
use crate::iterator::ITERATOR_END;
use crate::test_fixtures::*;

fn square_words(src: &[u8], dst: &mut [u8]) {
    let v = u64::from_ne_bytes(src.try_into().unwrap());
    dst.copy_from_slice(&(v * v).to_ne_bytes());
}

#[test]
fn test_field_map_streams_all_subpools() {
    let heap = fixture_heap();
    let mut src = heap.pool_create(WORD_TYPE).unwrap();
    let mut dst = heap.pool_create(WORD_TYPE).unwrap();

    // One full subpool plus a remainder.
    let count = PAGE + 1904;
    heap.pool_grow(&mut src, count).unwrap();
    for i in 0..count {
        let r = heap.pool_get_ref(src, i);
        heap.set_field(r, 0, &i.to_ne_bytes()).unwrap();
    }

    heap.field_map(src, &mut dst, 0, square_words).unwrap();
    assert_eq!(dst.population(), count);

    let out = heap.pool_to_array(dst).unwrap().as_ptr() as *const u64;
    for i in 0..count {
        assert_eq!(unsafe { out.add(i as usize).read() }, i * i);
    }

    heap.pool_destroy(&mut src).unwrap();
    heap.pool_destroy(&mut dst).unwrap();
}

#[test]
fn test_field_map_converts_between_widths() {
    let heap = fixture_heap();
    let mut src = heap.pool_create(RECORD_TYPE).unwrap();
    let mut dst = heap.pool_create(WORD_TYPE).unwrap();

    heap.pool_grow(&mut src, 300).unwrap();
    for i in 0u64..300 {
        let r = heap.pool_get_ref(src, i);
        heap.set_field(r, 1, &[(i % 251) as u8]).unwrap();
    }

    heap.field_map(src, &mut dst, 1, |s, d| {
        d.copy_from_slice(&(s[0] as u64 * 2).to_ne_bytes());
    })
    .unwrap();

    let out = heap.pool_to_array(dst).unwrap().as_ptr() as *const u64;
    for i in 0u64..300 {
        assert_eq!(unsafe { out.add(i as usize).read() }, (i % 251) * 2);
    }

    heap.pool_destroy(&mut src).unwrap();
    heap.pool_destroy(&mut dst).unwrap();
}

#[test]
fn test_field_map_rejects_aliasing() {
    let heap = fixture_heap();
    let mut pool = heap.pool_create(WORD_TYPE).unwrap();
    heap.pool_grow(&mut pool, 4).unwrap();
    let mut alias = pool;
    assert_eq!(
        heap.field_map(pool, &mut alias, 0, |_, _| {}),
        Err(HeapError::AliasedPools)
    );
    heap.pool_destroy(&mut pool).unwrap();
}

#[test]
fn test_field_list_map_squares_survivors() {
    let heap = fixture_heap();
    let mut pool = heap.pool_create(LIST_NODE_TYPE).unwrap();
    let mut dst = heap.pool_create(WORD_TYPE).unwrap();

    // Build an ascending 200k chain behind an advancing cursor.
    let head = heap.pool_alloc(&mut pool).unwrap();
    heap.set_field(head, 1, &0u64.to_ne_bytes()).unwrap();
    let mut it = heap.iterator_from_reference(head).unwrap();
    for i in 1u64..200_000 {
        let node = heap.pool_alloc(&mut pool).unwrap();
        heap.set_field(node, 1, &i.to_ne_bytes()).unwrap();
        heap.iterator_list_insert(it, node).unwrap();
        it = heap.iterator_next(PoolHandle::NULL, it);
    }

    // Unlink roughly half of it, deterministically.
    let mut it = heap.iterator_from_reference(head).unwrap();
    let mut coin = 0u64;
    loop {
        coin += 1;
        if mixed_key(coin) & 1 == 1 {
            if heap.iterator_list_remove(it).is_err() {
                break;
            }
        } else {
            let next = heap.iterator_next(PoolHandle::NULL, it);
            if next == ITERATOR_END {
                break;
            }
            it = next;
        }
    }

    // Survivor keys in list order.
    let mut survivors = Vec::new();
    let mut it = heap.iterator_from_reference(head).unwrap();
    loop {
        survivors.push(read_word(&heap, it.as_reference(), 1));
        let next = heap.iterator_next(PoolHandle::NULL, it);
        if next == ITERATOR_END {
            break;
        }
        it = next;
    }
    assert!(survivors.len() < 200_000);

    heap.field_list_map(head, &mut dst, 1, square_words).unwrap();
    assert_eq!(dst.population(), survivors.len() as u64);

    let out = heap.pool_to_array(dst).unwrap().as_ptr() as *const u64;
    for (i, key) in survivors.iter().enumerate() {
        assert_eq!(unsafe { out.add(i).read() }, key * key);
    }

    heap.pool_destroy(&mut pool).unwrap();
    heap.pool_destroy(&mut dst).unwrap();
}

#[test]
fn test_field_list_map_rejects_null_head() {
    let heap = fixture_heap();
    let mut dst = heap.pool_create(WORD_TYPE).unwrap();
    assert_eq!(
        heap.field_list_map(laneheap_abi::Reference::NULL, &mut dst, 1, |_, _| {}),
        Err(HeapError::NullReference)
    );
    heap.pool_destroy(&mut dst).unwrap();
}
