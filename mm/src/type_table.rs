//! Flattened runtime type table.
//!
//! Descriptors arrive as a tree (composites name other types by id); pools
//! need a flat view: for each type, the ordered list of leaf fields with
//! their byte sizes and record offsets. The table is built once at heap
//! construction and is immutable afterwards — readers need no
//! synchronisation.
//!
//! Build is two-pass per descriptor, like the descriptors' own shape:
//! a measuring pass computes `(type_size, flattened_field_count)` so the
//! row storage can be sized, then a filling pass assigns each leaf field
//! its running byte offset within the record.

use alloc::boxed::Box;
use alloc::vec::Vec;

use laneheap_abi::{Topology, TypeClass, TypeDesc, TypeKind};

use crate::error::{HeapError, HeapResult};

/// Flattened composites may nest this deep. Generous for real type sets;
/// mainly a guard against self-referential composite descriptors.
const MAX_NESTING: usize = 16;

/// Byte size of a stored global reference.
const GLOBAL_REF_BYTES: usize = 8;

/// Byte size of a stored local reference.
const LOCAL_REF_BYTES: usize = 2;

/// Most fields a flattened record may have: slot numbers are encoded in the
/// 13-bit index of a far local reference.
const MAX_FIELDS: usize = 1 << 13;

/// One leaf field of a flattened record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldOffset {
    /// Leaf type of the field (primitive or reference id).
    pub type_id: u16,
    /// Field size in bytes; also the element stride of its lane.
    pub size: usize,
    /// Byte offset of the field within one record. The lane of this field
    /// starts `offset * PAGE` bytes into each subpool.
    pub offset: usize,
}

/// Everything the allocator knows about one type id.
#[derive(Debug)]
pub struct TypeRow {
    pub class: TypeClass,
    /// For reference classes, the type the reference points at.
    pub referee: u16,
    /// Record size in bytes: the sum of all leaf field sizes.
    pub size: usize,
    /// Number of leading local-reference fields.
    pub ref_fields: usize,
    /// Declared traversal shape; validated against `ref_fields`.
    pub topology: Topology,
    /// Flattened leaf fields in record order.
    pub fields: Box<[FieldOffset]>,
}

impl TypeRow {
    #[inline]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

/// The read-only table, indexed by type id.
#[derive(Debug)]
pub struct TypeTable {
    rows: Box<[TypeRow]>,
}

impl TypeTable {
    /// Flatten a descriptor set. Ids must be dense and every referenced id
    /// must exist in the set.
    pub fn build(descs: &[TypeDesc]) -> HeapResult<TypeTable> {
        if descs.len() >= u16::MAX as usize {
            return Err(HeapError::TooManyTypes);
        }
        for (position, desc) in descs.iter().enumerate() {
            if desc.type_id as usize != position {
                return Err(HeapError::NonDenseTypeId {
                    type_id: desc.type_id,
                    expected: position as u16,
                });
            }
        }

        let mut rows = Vec::with_capacity(descs.len());
        for desc in descs {
            rows.push(Self::build_row(descs, desc)?);
        }
        Ok(TypeTable {
            rows: rows.into_boxed_slice(),
        })
    }

    fn build_row(descs: &[TypeDesc], desc: &TypeDesc) -> HeapResult<TypeRow> {
        let (size, field_count) = measure(descs, desc, 0)?;
        if field_count > MAX_FIELDS {
            return Err(HeapError::TooManyFields {
                type_id: desc.type_id,
            });
        }

        let mut fields = Vec::with_capacity(field_count);
        let mut offset = 0usize;
        fill_offsets(descs, desc, &mut fields, &mut offset)?;
        debug_assert_eq!(offset, size);
        debug_assert_eq!(fields.len(), field_count);

        let (referee, topology) = match &desc.kind {
            TypeKind::LocalRef { referee } | TypeKind::GlobalRef { referee } => {
                if *referee as usize >= descs.len() {
                    return Err(HeapError::UnknownType { type_id: *referee });
                }
                (*referee, Topology::None)
            }
            TypeKind::Composite { topology, .. } => (0, *topology),
            TypeKind::Primitive { .. } => (0, Topology::None),
        };

        // Traversal shape only means something for composites; a pool of
        // bare reference cells has no record-level link convention.
        let mut ref_fields = 0;
        if desc.class() == TypeClass::Composite {
            ref_fields = fields
                .iter()
                .take_while(|f| descs[f.type_id as usize].class() == TypeClass::LocalRef)
                .count();
            if fields[ref_fields..]
                .iter()
                .any(|f| descs[f.type_id as usize].class() == TypeClass::LocalRef)
            {
                return Err(HeapError::RefNotLeading {
                    type_id: desc.type_id,
                });
            }
            let topology_fits = match topology {
                Topology::None => ref_fields == 0,
                Topology::List => ref_fields == 1,
                Topology::BTree => ref_fields == 2,
                Topology::NTree => ref_fields >= 3,
            };
            if !topology_fits {
                return Err(HeapError::TopologyMismatch {
                    type_id: desc.type_id,
                });
            }
        }

        Ok(TypeRow {
            class: desc.class(),
            referee,
            size,
            ref_fields,
            topology,
            fields: fields.into_boxed_slice(),
        })
    }

    #[inline]
    pub fn row(&self, type_id: u16) -> HeapResult<&TypeRow> {
        self.rows
            .get(type_id as usize)
            .ok_or(HeapError::UnknownType { type_id })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Measuring pass: `(record_size, flattened_field_count)`.
fn measure(descs: &[TypeDesc], desc: &TypeDesc, depth: usize) -> HeapResult<(usize, usize)> {
    match &desc.kind {
        TypeKind::Primitive { size } => {
            if *size == 0 {
                return Err(HeapError::ZeroSizePrimitive {
                    type_id: desc.type_id,
                });
            }
            Ok((*size, 1))
        }
        TypeKind::GlobalRef { .. } => Ok((GLOBAL_REF_BYTES, 1)),
        TypeKind::LocalRef { .. } => Ok((LOCAL_REF_BYTES, 1)),
        TypeKind::Composite { fields, .. } => {
            if depth >= MAX_NESTING {
                return Err(HeapError::NestingTooDeep {
                    type_id: desc.type_id,
                });
            }
            if fields.is_empty() {
                return Err(HeapError::EmptyComposite {
                    type_id: desc.type_id,
                });
            }
            let mut size = 0;
            let mut count = 0;
            for &field_id in fields {
                let field_desc = descs
                    .get(field_id as usize)
                    .ok_or(HeapError::UnknownType { type_id: field_id })?;
                let (s, c) = measure(descs, field_desc, depth + 1)?;
                size += s;
                count += c;
            }
            Ok((size, count))
        }
    }
}

/// Filling pass: append leaf fields with running offsets.
///
/// The measuring pass has already validated the descriptor graph, so the
/// lookups here cannot fail; the depth guard is not re-checked.
fn fill_offsets(
    descs: &[TypeDesc],
    desc: &TypeDesc,
    out: &mut Vec<FieldOffset>,
    offset: &mut usize,
) -> HeapResult {
    let size = match &desc.kind {
        TypeKind::Primitive { size } => *size,
        TypeKind::GlobalRef { .. } => GLOBAL_REF_BYTES,
        TypeKind::LocalRef { .. } => LOCAL_REF_BYTES,
        TypeKind::Composite { fields, .. } => {
            for &field_id in fields {
                let field_desc = descs
                    .get(field_id as usize)
                    .ok_or(HeapError::UnknownType { type_id: field_id })?;
                fill_offsets(descs, field_desc, out, offset)?;
            }
            return Ok(());
        }
    };
    out.push(FieldOffset {
        type_id: desc.type_id,
        size,
        offset: *offset,
    });
    *offset += size;
    Ok(())
}
