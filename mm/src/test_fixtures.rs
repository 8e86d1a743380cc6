//! Shared fixtures for the in-crate test modules: a representative type
//! set (primitives, nested composites, list, binary tree, octree) and a
//! deterministic key mixer so tests never depend on an RNG.

use laneheap_abi::{Topology, TypeDesc};

use crate::heap::Heap;

/// 1-byte primitive.
pub const BYTE_TYPE: u16 = 0;
/// 8-byte primitive.
pub const WORD_TYPE: u16 = 1;
/// Global reference to a word.
pub const WORD_REF_TYPE: u16 = 2;
/// byte + byte + byte + word.
pub const RECORD_TYPE: u16 = 3;
/// word + record + record (nested composite).
pub const NESTED_TYPE: u16 = 4;
/// Local reference to a list node.
pub const LIST_LINK_TYPE: u16 = 5;
/// link + word + word, list topology.
pub const LIST_NODE_TYPE: u16 = 6;
/// Local reference to a tree node.
pub const TREE_LINK_TYPE: u16 = 7;
/// link + link + word + word, binary-tree topology.
pub const TREE_NODE_TYPE: u16 = 8;
/// Local reference to an octree node.
pub const OCT_LINK_TYPE: u16 = 9;
/// 8 links + word + word, n-ary topology.
pub const OCT_NODE_TYPE: u16 = 10;

pub fn basic_types() -> alloc::vec::Vec<TypeDesc> {
    alloc::vec![
        TypeDesc::primitive(BYTE_TYPE, 1),
        TypeDesc::primitive(WORD_TYPE, 8),
        TypeDesc::global_ref(WORD_REF_TYPE, WORD_TYPE),
        TypeDesc::composite(
            RECORD_TYPE,
            Topology::None,
            &[BYTE_TYPE, BYTE_TYPE, BYTE_TYPE, WORD_TYPE],
        ),
        TypeDesc::composite(
            NESTED_TYPE,
            Topology::None,
            &[WORD_TYPE, RECORD_TYPE, RECORD_TYPE],
        ),
        TypeDesc::local_ref(LIST_LINK_TYPE, LIST_NODE_TYPE),
        TypeDesc::composite(
            LIST_NODE_TYPE,
            Topology::List,
            &[LIST_LINK_TYPE, WORD_TYPE, WORD_TYPE],
        ),
        TypeDesc::local_ref(TREE_LINK_TYPE, TREE_NODE_TYPE),
        TypeDesc::composite(
            TREE_NODE_TYPE,
            Topology::BTree,
            &[TREE_LINK_TYPE, TREE_LINK_TYPE, WORD_TYPE, WORD_TYPE],
        ),
        TypeDesc::local_ref(OCT_LINK_TYPE, OCT_NODE_TYPE),
        TypeDesc::composite(
            OCT_NODE_TYPE,
            Topology::NTree,
            &[
                OCT_LINK_TYPE,
                OCT_LINK_TYPE,
                OCT_LINK_TYPE,
                OCT_LINK_TYPE,
                OCT_LINK_TYPE,
                OCT_LINK_TYPE,
                OCT_LINK_TYPE,
                OCT_LINK_TYPE,
                WORD_TYPE,
                WORD_TYPE,
            ],
        ),
    ]
}

pub fn fixture_heap() -> Heap {
    Heap::new(&basic_types()).expect("fixture type set must build")
}

/// Read an 8-byte field back as a u64.
pub fn read_word(heap: &Heap, reference: laneheap_abi::Reference, field_nr: usize) -> u64 {
    let ptr = heap.get_field(reference, field_nr).expect("field pointer");
    unsafe { (ptr.as_ptr() as *const u64).read() }
}

/// Raw 16-bit cell of a reference lane, for asserting the stored encoding.
pub fn read_link_cell(heap: &Heap, reference: laneheap_abi::Reference, field_nr: usize) -> u16 {
    let ptr = heap.get_field(reference, field_nr).expect("field pointer");
    unsafe { (ptr.as_ptr() as *const u16).read() }
}

/// Deterministic 64-bit key sequence (splitmix-style) for tests that need
/// well-spread values.
pub fn mixed_key(i: u64) -> u64 {
    let mut z = i.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
