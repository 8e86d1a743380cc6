//! Unified error type for the allocator.
//!
//! One consolidated enum instead of per-module error types: the type table,
//! pool geometry, reference codec, expansion table and collector share most
//! of their failure modes (allocation failure, null handles, range checks),
//! so splitting them would duplicate variants at every boundary.

use core::fmt;

/// Unified allocator error.
///
/// Variants are grouped by the subsystem that typically produces them, but
/// any operation may surface any variant (the collector, for instance,
/// reports codec and geometry errors unchanged).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// Backing memory for a subpool, table or stack could not be obtained.
    NoMemory,
    /// The 16-bit pool id space is exhausted. Ids are never reused.
    PoolLimit,
    /// Operation on a null or destroyed pool handle.
    NullPool,
    /// Operation on a null reference.
    NullReference,
    /// The reference carries the extended bit and cannot be addressed
    /// directly.
    ExtendedReference,
    /// Shrink request exceeds the pool population.
    ShrinkUnderflow,
    /// Field number out of range for the record type.
    FieldOutOfRange { field: usize },
    /// `set_field` buffer length differs from the field size.
    FieldSizeMismatch { expected: usize, got: usize },
    /// Reference operation on a field that is not a local reference.
    NotReferenceField { field: usize },
    /// The target of a local reference lives in a different pool.
    CrossPool,
    /// Source and destination of a bulk map are the same pool.
    AliasedPools,
    /// Expansion-table lookup missed.
    RefNotFound,
    /// Expansion-table insert with a null tag or a sentinel value.
    InvalidTag,
    /// Iterator operation on the wrong cursor kind.
    IteratorMismatch,
    /// `remove-after` with no element after the cursor.
    NoSuccessor,
    /// Collector used before `gc_init`.
    CollectorUninit,
    /// A record was reached twice during collection; the pool does not form
    /// a forest and cannot be compacted.
    CyclicTopology,
    /// More than 2^16 - 2 caller types.
    TooManyTypes,
    /// Type id referenced by a descriptor does not exist.
    UnknownType { type_id: u16 },
    /// Descriptor ids must equal their position in the set.
    NonDenseTypeId { type_id: u16, expected: u16 },
    /// Primitive descriptor with a zero byte size.
    ZeroSizePrimitive { type_id: u16 },
    /// Composite descriptor with no fields.
    EmptyComposite { type_id: u16 },
    /// Composite nesting exceeds the flattening bound (self-referential
    /// composites land here).
    NestingTooDeep { type_id: u16 },
    /// Flattened field count does not fit the 13-bit slot encoding.
    TooManyFields { type_id: u16 },
    /// Declared topology disagrees with the leading-reference count.
    TopologyMismatch { type_id: u16 },
    /// A local-reference field appears after a non-reference field.
    RefNotLeading { type_id: u16 },
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMemory => write!(f, "out of memory"),
            Self::PoolLimit => write!(f, "pool id space exhausted"),
            Self::NullPool => write!(f, "null or destroyed pool handle"),
            Self::NullReference => write!(f, "null reference"),
            Self::ExtendedReference => write!(f, "extended reference cannot be addressed"),
            Self::ShrinkUnderflow => write!(f, "shrink request exceeds pool population"),
            Self::FieldOutOfRange { field } => write!(f, "field {} out of range", field),
            Self::FieldSizeMismatch { expected, got } => {
                write!(f, "field expects {} bytes, got {}", expected, got)
            }
            Self::NotReferenceField { field } => {
                write!(f, "field {} is not a local reference", field)
            }
            Self::CrossPool => write!(f, "reference target lives in a different pool"),
            Self::AliasedPools => write!(f, "map source and destination are the same pool"),
            Self::RefNotFound => write!(f, "expansion table has no entry for the tag"),
            Self::InvalidTag => write!(f, "null tag or sentinel value in expansion insert"),
            Self::IteratorMismatch => write!(f, "operation not defined for this iterator kind"),
            Self::NoSuccessor => write!(f, "no element after the cursor"),
            Self::CollectorUninit => write!(f, "collector not initialised"),
            Self::CyclicTopology => write!(f, "pool is not a forest; collection refused"),
            Self::TooManyTypes => write!(f, "too many type descriptors"),
            Self::UnknownType { type_id } => write!(f, "unknown type id {}", type_id),
            Self::NonDenseTypeId { type_id, expected } => {
                write!(f, "type id {} at position {}; ids must be dense", type_id, expected)
            }
            Self::ZeroSizePrimitive { type_id } => {
                write!(f, "primitive type {} has zero size", type_id)
            }
            Self::EmptyComposite { type_id } => write!(f, "composite type {} has no fields", type_id),
            Self::NestingTooDeep { type_id } => {
                write!(f, "composite type {} nests too deeply", type_id)
            }
            Self::TooManyFields { type_id } => {
                write!(f, "flattened field count of type {} exceeds the slot encoding", type_id)
            }
            Self::TopologyMismatch { type_id } => {
                write!(f, "declared topology of type {} disagrees with its reference fields", type_id)
            }
            Self::RefNotLeading { type_id } => {
                write!(f, "type {} has a local reference after a value field", type_id)
            }
        }
    }
}

/// Convenience result type for allocator operations.
pub type HeapResult<T = ()> = Result<T, HeapError>;
