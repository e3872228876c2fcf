//! Column storage model
//!
//! A column is the pairing of a typed storage buffer with a null overlay,
//! plus the sort/duplicate tags the planner uses to pick algorithms and an
//! optional specialized storage for fast-path lookups.

use std::sync::Arc;

use crate::strings::StringId;
use crate::types::{DuplicateState, Nullability, SortState, StorageType};
use crate::util::{BitVector, Slab};

// ============================================================================
// Storage
// ============================================================================

/// Physical storage for column values.
///
/// For sparse-null columns the buffer holds only the non-null rows; for
/// non-null and dense-null columns it holds one slot per row. `Id` columns
/// carry only a row count: the value of row i is i.
#[derive(Debug, Clone)]
pub enum Storage {
    Id { size: u32 },
    Uint32(Vec<u32>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Double(Vec<f64>),
    String(Vec<StringId>),
}

impl Storage {
    /// Creates empty storage of the given type.
    pub fn with_type(ty: StorageType) -> Storage {
        match ty {
            StorageType::Id => Storage::Id { size: 0 },
            StorageType::Uint32 => Storage::Uint32(Vec::new()),
            StorageType::Int32 => Storage::Int32(Vec::new()),
            StorageType::Int64 => Storage::Int64(Vec::new()),
            StorageType::Double => Storage::Double(Vec::new()),
            StorageType::String => Storage::String(Vec::new()),
        }
    }

    pub fn storage_type(&self) -> StorageType {
        match self {
            Storage::Id { .. } => StorageType::Id,
            Storage::Uint32(_) => StorageType::Uint32,
            Storage::Int32(_) => StorageType::Int32,
            Storage::Int64(_) => StorageType::Int64,
            Storage::Double(_) => StorageType::Double,
            Storage::String(_) => StorageType::String,
        }
    }

    /// Number of stored elements (row count for Id storage).
    pub fn len(&self) -> usize {
        match self {
            Storage::Id { size } => *size as usize,
            Storage::Uint32(v) => v.len(),
            Storage::Int32(v) => v.len(),
            Storage::Int64(v) => v.len(),
            Storage::Double(v) => v.len(),
            Storage::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        match self {
            Storage::Id { size } => *size = 0,
            Storage::Uint32(v) => v.clear(),
            Storage::Int32(v) => v.clear(),
            Storage::Int64(v) => v.clear(),
            Storage::Double(v) => v.clear(),
            Storage::String(v) => v.clear(),
        }
    }

    pub fn shrink_to_fit(&mut self) {
        match self {
            Storage::Id { .. } => {}
            Storage::Uint32(v) => v.shrink_to_fit(),
            Storage::Int32(v) => v.shrink_to_fit(),
            Storage::Int64(v) => v.shrink_to_fit(),
            Storage::Double(v) => v.shrink_to_fit(),
            Storage::String(v) => v.shrink_to_fit(),
        }
    }

    pub fn as_uint32(&self) -> &[u32] {
        match self {
            Storage::Uint32(v) => v,
            _ => unreachable!("storage is not Uint32"),
        }
    }

    pub fn as_int32(&self) -> &[i32] {
        match self {
            Storage::Int32(v) => v,
            _ => unreachable!("storage is not Int32"),
        }
    }

    pub fn as_int64(&self) -> &[i64] {
        match self {
            Storage::Int64(v) => v,
            _ => unreachable!("storage is not Int64"),
        }
    }

    pub fn as_double(&self) -> &[f64] {
        match self {
            Storage::Double(v) => v,
            _ => unreachable!("storage is not Double"),
        }
    }

    pub fn as_string(&self) -> &[StringId] {
        match self {
            Storage::String(v) => v,
            _ => unreachable!("storage is not String"),
        }
    }
}

// ============================================================================
// Null storage
// ============================================================================

/// Distinguishes the three sparse-null sub-variants. The planner and cursor
/// consult this to know which read path is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SparseVariant {
    /// No popcount side table: random cell access is illegal.
    Plain,
    /// Popcount table valid forever.
    PopcountAlways,
    /// Popcount table valid only until `Finalize`.
    PopcountUntilFinalization,
}

/// Side data for the non-null bitmap of a sparse column.
#[derive(Debug, Clone, Default)]
pub struct SparseNulls {
    /// Bit i set iff row i is non-null.
    pub bit_vector: BitVector,
    /// Per-64-bit-word running count of set bits; empty when the variant does
    /// not carry it (or after finalization cleared it).
    pub prefix_popcount: Vec<u32>,
}

/// Null overlay of a column.
#[derive(Debug, Clone)]
pub enum NullStorage {
    /// No nulls; no side data.
    NonNull,
    /// Nulls do not reserve a storage slot.
    Sparse(SparseNulls, SparseVariant),
    /// Nulls reserve a storage slot with an unspecified value.
    Dense(BitVector),
}

impl NullStorage {
    /// Creates empty null storage for the given nullability.
    pub fn with_nullability(n: Nullability) -> NullStorage {
        match n {
            Nullability::NonNull => NullStorage::NonNull,
            Nullability::SparseNull => {
                NullStorage::Sparse(SparseNulls::default(), SparseVariant::Plain)
            }
            Nullability::SparseNullWithPopcountAlways => {
                NullStorage::Sparse(SparseNulls::default(), SparseVariant::PopcountAlways)
            }
            Nullability::SparseNullWithPopcountUntilFinalization => NullStorage::Sparse(
                SparseNulls::default(),
                SparseVariant::PopcountUntilFinalization,
            ),
            Nullability::DenseNull => NullStorage::Dense(BitVector::new()),
        }
    }

    pub fn nullability(&self) -> Nullability {
        match self {
            NullStorage::NonNull => Nullability::NonNull,
            NullStorage::Sparse(_, SparseVariant::Plain) => Nullability::SparseNull,
            NullStorage::Sparse(_, SparseVariant::PopcountAlways) => {
                Nullability::SparseNullWithPopcountAlways
            }
            NullStorage::Sparse(_, SparseVariant::PopcountUntilFinalization) => {
                Nullability::SparseNullWithPopcountUntilFinalization
            }
            NullStorage::Dense(_) => Nullability::DenseNull,
        }
    }

    /// The null bitvector, or None for non-null columns.
    pub fn bit_vector(&self) -> Option<&BitVector> {
        match self {
            NullStorage::NonNull => None,
            NullStorage::Sparse(s, _) => Some(&s.bit_vector),
            NullStorage::Dense(bv) => Some(bv),
        }
    }

    pub fn sparse(&self) -> &SparseNulls {
        match self {
            NullStorage::Sparse(s, _) => s,
            _ => unreachable!("null storage is not sparse"),
        }
    }

    pub fn sparse_mut(&mut self) -> &mut SparseNulls {
        match self {
            NullStorage::Sparse(s, _) => s,
            _ => unreachable!("null storage is not sparse"),
        }
    }
}

// ============================================================================
// Specialized storage
// ============================================================================

/// Optional alternative representation of a column for fast-path lookups.
#[derive(Debug, Clone, Default)]
pub enum SpecializedStorage {
    #[default]
    None,
    /// O(1) equality for non-null, sorted, duplicate-free Uint32 columns with
    /// a small maximum value. `bit_vector` has bit v set iff v occurs in the
    /// column; the hit's storage index is the prefix popcount of v. Memory is
    /// O(max(value)), which is why it is only built when
    /// max(value) < 16 * len(column).
    SmallValueEq {
        bit_vector: BitVector,
        prefix_popcount: Slab<u32>,
    },
}

impl SpecializedStorage {
    pub fn is_small_value_eq(&self) -> bool {
        matches!(self, SpecializedStorage::SmallValueEq { .. })
    }
}

// ============================================================================
// Column and Index
// ============================================================================

/// A complete column.
#[derive(Debug, Clone)]
pub struct Column {
    pub storage: Storage,
    pub nulls: NullStorage,
    pub sort_state: SortState,
    pub duplicate_state: DuplicateState,
    pub specialized: SpecializedStorage,
    /// Bumped on every `set_cell`; combined with the dataframe's non-column
    /// counter for cursor staleness checks.
    pub mutations: u32,
}

impl Column {
    pub fn new(
        storage: Storage,
        nulls: NullStorage,
        sort_state: SortState,
        duplicate_state: DuplicateState,
    ) -> Self {
        Self {
            storage,
            nulls,
            sort_state,
            duplicate_state,
            specialized: SpecializedStorage::None,
            mutations: 0,
        }
    }

    pub fn storage_type(&self) -> StorageType {
        self.storage.storage_type()
    }

    pub fn nullability(&self) -> Nullability {
        self.nulls.nullability()
    }
}

/// An external sort order over a column subset.
///
/// The permutation vector is shared so an index can be attached to any copy
/// of the dataframe it was built from.
#[derive(Debug, Clone)]
pub struct Index {
    columns: Vec<u32>,
    permutation: Arc<Vec<u32>>,
}

impl Index {
    pub fn new(columns: Vec<u32>, permutation: Arc<Vec<u32>>) -> Self {
        Self {
            columns,
            permutation,
        }
    }

    /// The columns this index orders, most significant first.
    pub fn columns(&self) -> &[u32] {
        &self.columns
    }

    /// Row indices in index order.
    pub fn permutation(&self) -> &Arc<Vec<u32>> {
        &self.permutation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_with_type() {
        for ty in StorageType::ALL {
            let s = Storage::with_type(ty);
            assert_eq!(s.storage_type(), ty);
            assert_eq!(s.len(), 0);
        }
    }

    #[test]
    fn test_null_storage_nullability_round_trip() {
        for n in [
            Nullability::NonNull,
            Nullability::SparseNull,
            Nullability::SparseNullWithPopcountAlways,
            Nullability::SparseNullWithPopcountUntilFinalization,
            Nullability::DenseNull,
        ] {
            assert_eq!(NullStorage::with_nullability(n).nullability(), n);
        }
    }
}
