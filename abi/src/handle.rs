//! Packed handle words.
//!
//! Every pool, object reference and iterator is a 64-bit little-endian word
//! with the same field layout, so callers can store them in plain integers
//! and the allocator can convert between the three views with bit masks
//! instead of reinterpretation:
//!
//! ```text
//! bits  0..16   type_id
//! bits 16..32   subpool_id
//! bits 32..48   pool_id
//! bits 48..60   index            (slot inside the subpool)
//! bit  60       FULL             (pool cursors) / low iterator-kind bit
//! bit  61       EXTENDED         (pool cursors) / high iterator-kind bit
//! bits 62..64   gc state
//! ```
//!
//! The distinct newtypes prevent a pool cursor from being passed where an
//! object reference is expected; conversions are explicit and cheap.
//!
//! A [`LocalRef`] is the 16-bit form stored inside reference lanes: a signed
//! 13-bit delta for the near case, or a field-slot number with the long bit
//! set for the far case. A [`RefTag`] names one far reference field globally
//! and keys the expansion table.

use bitflags::bitflags;

use crate::{ABS_INDEX_MAX, PAGE, PAGE_SHIFT};

bitflags! {
    /// Flag bits of the handle index word (bits 12 and 13 of the top u16).
    ///
    /// On iterator handles the same two bits hold the [`IterKind`] instead.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RefFlags: u16 {
        /// The cursor subpool is completely populated. Distinguishes
        /// `index == 0` of an empty subpool from one filled exactly to its
        /// boundary.
        const FULL = 1 << 12;
        /// The referee does not live at the encoded slot directly.
        const EXTENDED = 1 << 13;
    }
}

/// Cursor kind carried in the flag bits of an [`IteratorHandle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum IterKind {
    /// Stride over every occupied slot in allocation order.
    Simple = 0,
    /// Follow the leading reference lane until null.
    List = 1,
    /// A list known to have no deletion holes. Currently traversed exactly
    /// like [`IterKind::List`].
    ListCompact = 2,
    /// Tree traversal with out-of-word state in an auxiliary pool.
    Complex = 3,
}

impl IterKind {
    #[inline]
    pub const fn from_bits(bits: u16) -> Self {
        match bits & 0b11 {
            0 => IterKind::Simple,
            1 => IterKind::List,
            2 => IterKind::ListCompact,
            _ => IterKind::Complex,
        }
    }
}

macro_rules! packed_word {
    ($name:ident) => {
        impl $name {
            /// The null word. No valid handle is ever zero because pool id
            /// zero is never allocated.
            pub const NULL: Self = Self(0);

            #[inline]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn raw(self) -> u64 {
                self.0
            }

            #[inline]
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }

            #[inline]
            pub const fn type_id(self) -> u16 {
                self.0 as u16
            }

            #[inline]
            pub const fn subpool_id(self) -> u16 {
                (self.0 >> 16) as u16
            }

            #[inline]
            pub const fn pool_id(self) -> u16 {
                (self.0 >> 32) as u16
            }

            /// Slot index inside the cursor subpool (12 bits).
            #[inline]
            pub const fn index(self) -> u16 {
                ((self.0 >> 48) as u16) & 0x0FFF
            }

            /// The whole top u16, flags included.
            #[inline]
            pub const fn raw_index(self) -> u16 {
                (self.0 >> 48) as u16
            }

            #[inline]
            pub fn flags(self) -> RefFlags {
                RefFlags::from_bits_truncate(self.raw_index())
            }

            #[inline]
            pub const fn with_type_id(self, type_id: u16) -> Self {
                Self((self.0 & !0xFFFF) | type_id as u64)
            }

            #[inline]
            pub const fn with_subpool_id(self, subpool_id: u16) -> Self {
                Self((self.0 & !(0xFFFF << 16)) | ((subpool_id as u64) << 16))
            }

            #[inline]
            pub const fn with_pool_id(self, pool_id: u16) -> Self {
                Self((self.0 & !(0xFFFF << 32)) | ((pool_id as u64) << 32))
            }

            /// Replace the 12-bit index, leaving the flag bits alone.
            #[inline]
            pub const fn with_index(self, index: u16) -> Self {
                Self((self.0 & !(0x0FFF << 48)) | (((index as u64) & 0x0FFF) << 48))
            }

            /// Replace the whole top u16, flags included.
            #[inline]
            pub const fn with_raw_index(self, raw_index: u16) -> Self {
                Self((self.0 & !(0xFFFF << 48)) | ((raw_index as u64) << 48))
            }

            /// Index of the slot counted from the start of the pool.
            #[inline]
            pub const fn absolute_index(self) -> u64 {
                (self.subpool_id() as u64) * PAGE + self.index() as u64
            }

            /// Re-point the word at an absolute index, preserving identity
            /// and flag bits.
            #[inline]
            pub fn with_absolute_index(self, abs: u64) -> Self {
                debug_assert!(abs <= ABS_INDEX_MAX);
                self.with_subpool_id((abs >> PAGE_SHIFT) as u16)
                    .with_index((abs & (PAGE - 1)) as u16)
            }
        }
    };
}

/// Reference to one allocated record in a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Reference(pub u64);

/// A pool cursor: identifies the pool and carries the population cursor
/// (next free subpool/index pair plus the [`RefFlags::FULL`] bit).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PoolHandle(pub u64);

/// An iteration cursor. Same shape as [`Reference`] with the kind in the
/// flag bits; complex cursors store their pool id in the `pool_id` lane and
/// keep the rest of their state in an auxiliary pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct IteratorHandle(pub u64);

packed_word!(Reference);
packed_word!(PoolHandle);
packed_word!(IteratorHandle);

impl PoolHandle {
    /// Number of allocated records, holes included.
    #[inline]
    pub const fn population(self) -> u64 {
        let base = (self.subpool_id() as u64) * PAGE + self.index() as u64;
        if self.index() == 0 && self.raw_index() & RefFlags::FULL.bits() != 0 {
            base + PAGE
        } else {
            base
        }
    }

    #[inline]
    pub const fn is_full(self) -> bool {
        self.raw_index() & RefFlags::FULL.bits() != 0
    }

    #[inline]
    pub const fn with_full(self, full: bool) -> Self {
        let cleared = self.0 & !((RefFlags::FULL.bits() as u64) << 48);
        if full {
            Self(cleared | ((RefFlags::FULL.bits() as u64) << 48))
        } else {
            Self(cleared)
        }
    }
}

impl Reference {
    #[inline]
    pub const fn is_extended(self) -> bool {
        self.raw_index() & RefFlags::EXTENDED.bits() != 0
    }
}

impl IteratorHandle {
    const KIND_SHIFT: u32 = 60;

    #[inline]
    pub const fn kind(self) -> IterKind {
        IterKind::from_bits((self.0 >> Self::KIND_SHIFT) as u16)
    }

    #[inline]
    pub const fn with_kind(self, kind: IterKind) -> Self {
        Self((self.0 & !(0b11 << Self::KIND_SHIFT)) | ((kind as u64) << Self::KIND_SHIFT))
    }

    /// The underlying object reference, kind bits cleared.
    #[inline]
    pub const fn as_reference(self) -> Reference {
        Reference(self.0 & !(0b11 << Self::KIND_SHIFT))
    }

    #[inline]
    pub const fn from_reference(reference: Reference, kind: IterKind) -> Self {
        Self(reference.0).with_kind(kind)
    }
}

/// The 16-bit reference form stored inside a local-reference lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct LocalRef(pub u16);

impl LocalRef {
    /// Null encoding: near with delta zero.
    pub const NULL: Self = Self(0);

    const INDEX_MASK: u16 = 0x1FFF;
    const LONG_BIT: u16 = 1 << 13;

    #[inline]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Near encoding of a signed delta in `(-PAGE, PAGE)`.
    #[inline]
    pub fn near(delta: i64) -> Self {
        debug_assert!(delta > -(PAGE as i64) && delta < PAGE as i64);
        Self((delta as u16) & Self::INDEX_MASK)
    }

    /// Far encoding carrying the holder's field slot.
    #[inline]
    pub fn far(slot: u16) -> Self {
        debug_assert!(slot <= Self::INDEX_MASK);
        Self((slot & Self::INDEX_MASK) | Self::LONG_BIT)
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_long(self) -> bool {
        self.0 & Self::LONG_BIT != 0
    }

    /// Sign-extended 13-bit delta of a near reference.
    #[inline]
    pub const fn delta(self) -> i64 {
        (((self.0 << 3) as i16) >> 3) as i64
    }

    /// Field slot of a far reference.
    #[inline]
    pub const fn slot(self) -> u16 {
        self.0 & Self::INDEX_MASK
    }

    #[inline]
    pub const fn gc_state(self) -> u8 {
        (self.0 >> 14) as u8
    }
}

/// Key of one far local-reference field in the expansion table:
///
/// ```text
/// bits  0..16   encoded local reference (far form, slot number)
/// bits 16..32   holder subpool id
/// bits 32..48   holder pool id
/// bits 48..64   holder index
/// ```
///
/// The slot participates in the key so one holder record may own several
/// far references.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct RefTag(pub u64);

impl RefTag {
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Tag for a field of `holder`: the holder word with its type-id lane
    /// replaced by the encoded slot reference.
    #[inline]
    pub const fn for_holder(holder: Reference, slot_ref: LocalRef) -> Self {
        Self((holder.0 & !0xFFFF) | slot_ref.raw() as u64)
    }

    #[inline]
    pub const fn from_parts(pool_id: u16, subpool_id: u16, index: u16, slot_ref: LocalRef) -> Self {
        Self(
            slot_ref.raw() as u64
                | ((subpool_id as u64) << 16)
                | ((pool_id as u64) << 32)
                | ((index as u64) << 48),
        )
    }

    #[inline]
    pub const fn local_ref(self) -> LocalRef {
        LocalRef(self.0 as u16)
    }

    #[inline]
    pub const fn subpool_id(self) -> u16 {
        (self.0 >> 16) as u16
    }

    #[inline]
    pub const fn pool_id(self) -> u16 {
        (self.0 >> 32) as u16
    }

    #[inline]
    pub const fn index(self) -> u16 {
        (self.0 >> 48) as u16
    }
}
