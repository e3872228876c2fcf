//! Ad-hoc dataframe building
//!
//! Column-by-column push API for building a dataframe when the shape is not
//! known up front. Types are inferred on first push (or declared via
//! options), sort and duplicate states are inferred at build time, integer
//! storage is downcast to the narrowest lossless type, and an implicit
//! `_auto_id` column is appended as the primary key.

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::dataframe::column::{
    Column, NullStorage, SparseNulls, SparseVariant, SpecializedStorage, Storage,
};
use crate::dataframe::{Dataframe, AUTO_ID_COLUMN};
use crate::error::{Error, ErrorCode, Result};
use crate::strings::{StringId, StringPool};
use crate::types::{DuplicateState, SortState};
use crate::util::{BitVector, Slab};

// ============================================================================
// Options
// ============================================================================

/// Declared type of a built column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdhocColumnType {
    Int64,
    Double,
    String,
}

/// How built columns represent nulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdhocNullability {
    /// Sparse storage without popcount: smallest, but no random cell access.
    #[default]
    Sparse,
    /// Sparse storage with an always-valid popcount table.
    SparseWithPopcount,
    /// Dense storage: one slot per row.
    Dense,
}

/// Options for `AdhocDataframeBuilder`.
#[derive(Debug, Clone, Default)]
pub struct AdhocDataframeBuilderOptions {
    /// Optional declared column types; inferred from the first push when
    /// empty.
    pub types: Vec<AdhocColumnType>,
    pub nullability: AdhocNullability,
}

// ============================================================================
// Builder
// ============================================================================

#[derive(Default)]
struct ColumnState {
    storage: Option<Storage>,
    null_overlay: Option<BitVector>,
    // Rows pushed before the column's type was known; backfilled with a
    // type-appropriate zero once the first typed value arrives.
    pending_placeholders: u32,
}

/// Builds a dataframe by pushing values column by column.
pub struct AdhocDataframeBuilder<'p> {
    pool: &'p mut StringPool,
    column_names: Vec<String>,
    states: Vec<ColumnState>,
    nullability: AdhocNullability,
    error: Option<Error>,
}

impl<'p> AdhocDataframeBuilder<'p> {
    pub fn new(
        names: Vec<String>,
        pool: &'p mut StringPool,
        options: AdhocDataframeBuilderOptions,
    ) -> Self {
        debug_assert!(options.types.is_empty() || options.types.len() == names.len());
        let mut states: Vec<ColumnState> = Vec::with_capacity(names.len());
        for i in 0..names.len() {
            let mut state = ColumnState::default();
            if let Some(ty) = options.types.get(i) {
                state.storage = Some(match ty {
                    AdhocColumnType::Int64 => Storage::Int64(Vec::new()),
                    AdhocColumnType::Double => Storage::Double(Vec::new()),
                    AdhocColumnType::String => Storage::String(Vec::new()),
                });
            }
            states.push(state);
        }
        Self {
            pool,
            column_names: names,
            states,
            nullability: options.nullability,
            error: None,
        }
    }

    // === Push API ===

    pub fn push_int64(&mut self, col: u32, value: i64) {
        self.ensure_typed(col, AdhocColumnType::Int64);
        let mut mismatch = false;
        match &mut self.states[col as usize].storage {
            Some(Storage::Int64(v)) => v.push(value),
            // Integers are representable as doubles; coerce rather than
            // reject once a column has become Double.
            Some(Storage::Double(v)) => v.push(value as f64),
            Some(_) => mismatch = true,
            None => unreachable!("ensure_typed populated the storage"),
        }
        if mismatch {
            self.set_type_error(col, "integer");
            return;
        }
        self.push_non_null_bit(col);
    }

    pub fn push_double(&mut self, col: u32, value: f64) {
        self.ensure_typed(col, AdhocColumnType::Double);
        let mut mismatch = false;
        let state = &mut self.states[col as usize];
        match &mut state.storage {
            Some(Storage::Double(v)) => v.push(value),
            Some(Storage::Int64(ints)) => {
                // Promote the whole column to Double.
                let mut doubles: Vec<f64> = ints.iter().map(|&i| i as f64).collect();
                doubles.push(value);
                state.storage = Some(Storage::Double(doubles));
                log::debug!(
                    "column '{}' promoted from int to double",
                    self.column_names[col as usize]
                );
            }
            Some(_) => mismatch = true,
            None => unreachable!("ensure_typed populated the storage"),
        }
        if mismatch {
            self.set_type_error(col, "double");
            return;
        }
        self.push_non_null_bit(col);
    }

    pub fn push_string(&mut self, col: u32, value: &str) {
        self.ensure_typed(col, AdhocColumnType::String);
        let id = self.pool.intern(value);
        let mut mismatch = false;
        match &mut self.states[col as usize].storage {
            Some(Storage::String(v)) => v.push(id),
            Some(_) => mismatch = true,
            None => unreachable!("ensure_typed populated the storage"),
        }
        if mismatch {
            self.set_type_error(col, "string");
            return;
        }
        self.push_non_null_bit(col);
    }

    pub fn push_null(&mut self, col: u32) {
        let dense = self.nullability == AdhocNullability::Dense;
        self.ensure_null_overlay(col);
        let state = &mut self.states[col as usize];
        state
            .null_overlay
            .as_mut()
            .unwrap_or_else(|| unreachable!())
            .push(false);
        if dense {
            match &mut state.storage {
                Some(storage) => push_zero(storage),
                // Type still unknown; account for the dense slot later.
                None => state.pending_placeholders += 1,
            }
        }
    }

    /// Pushes `count` placeholder rows into a column whose type may not be
    /// known yet. Placeholders become type-appropriate zeros once the first
    /// typed value arrives.
    pub fn push_placeholder(&mut self, col: u32, count: u32) {
        let state = &mut self.states[col as usize];
        match &mut state.storage {
            Some(storage) => {
                for _ in 0..count {
                    push_zero(storage);
                }
            }
            None => state.pending_placeholders += count,
        }
        if let Some(overlay) = state.null_overlay.as_mut() {
            for _ in 0..count {
                overlay.push(true);
            }
        }
    }

    // === Build ===

    /// Finalizes the pushed data into a dataframe.
    pub fn build(mut self) -> Result<Dataframe> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        let mut row_count: Option<u64> = None;
        let mut columns: Vec<Arc<Column>> = Vec::with_capacity(self.states.len());

        for (i, mut state) in std::mem::take(&mut self.states).into_iter().enumerate() {
            let non_null_count;
            let column = match state.storage.take() {
                None => {
                    non_null_count = state.pending_placeholders as u64;
                    Arc::new(Column::new(
                        Storage::Uint32(vec![0; state.pending_placeholders as usize]),
                        make_null_storage(state.null_overlay.take(), self.nullability),
                        SortState::Unsorted,
                        DuplicateState::HasDuplicates,
                    ))
                }
                Some(Storage::Int64(data)) => {
                    non_null_count = data.len() as u64;
                    let summary = summarize_ints(&data, state.null_overlay.is_some());
                    let storage = integer_storage(data, &summary);
                    let specialized = small_value_eq(&storage, &summary);
                    let mut column = Column::new(
                        storage,
                        make_null_storage(state.null_overlay.take(), self.nullability),
                        integer_sort_state(&summary),
                        if summary.is_nullable || summary.has_duplicates {
                            DuplicateState::HasDuplicates
                        } else {
                            DuplicateState::NoDuplicates
                        },
                    );
                    column.specialized = specialized;
                    Arc::new(column)
                }
                Some(Storage::Double(data)) => {
                    non_null_count = data.len() as u64;
                    let is_nullable = state.null_overlay.is_some();
                    let is_sorted = data.windows(2).all(|w| w[0] <= w[1]);
                    Arc::new(Column::new(
                        Storage::Double(data),
                        make_null_storage(state.null_overlay.take(), self.nullability),
                        if is_sorted && !is_nullable {
                            SortState::Sorted
                        } else {
                            SortState::Unsorted
                        },
                        DuplicateState::HasDuplicates,
                    ))
                }
                Some(Storage::String(data)) => {
                    non_null_count = data.len() as u64;
                    let is_nullable = state.null_overlay.is_some();
                    let is_sorted = data
                        .windows(2)
                        .all(|w| self.pool.get(w[0]) <= self.pool.get(w[1]));
                    Arc::new(Column::new(
                        Storage::String(data),
                        make_null_storage(state.null_overlay.take(), self.nullability),
                        if is_sorted && !is_nullable {
                            SortState::Sorted
                        } else {
                            SortState::Unsorted
                        },
                        DuplicateState::HasDuplicates,
                    ))
                }
                Some(other) => unreachable!("builder storage cannot be {other:?}"),
            };

            let current = match column.nulls.bit_vector() {
                Some(bv) => bv.len() as u64,
                None => non_null_count,
            };
            if let Some(expected) = row_count {
                if current != expected {
                    return Err(Error::with_message(
                        ErrorCode::RowCountMismatch,
                        format!(
                            "row count mismatch in column '{}': expected {expected}, got {current}",
                            self.column_names[i]
                        ),
                    ));
                }
            } else {
                row_count = Some(current);
            }
            columns.push(column);
        }

        let row_count = row_count.unwrap_or(0) as u32;
        // An implicit id column acts as the primary key even when no other
        // column could.
        let mut column_names = std::mem::take(&mut self.column_names);
        column_names.push(AUTO_ID_COLUMN.to_owned());
        columns.push(Arc::new(Column::new(
            Storage::Id { size: row_count },
            NullStorage::NonNull,
            SortState::IdSorted,
            DuplicateState::NoDuplicates,
        )));
        Ok(Dataframe::from_parts(true, column_names, columns, row_count))
    }

    // === Internals ===

    fn ensure_typed(&mut self, col: u32, ty: AdhocColumnType) {
        let state = &mut self.states[col as usize];
        if state.storage.is_some() {
            return;
        }
        let pending = state.pending_placeholders as usize;
        state.storage = Some(match ty {
            AdhocColumnType::Int64 => Storage::Int64(vec![0; pending]),
            AdhocColumnType::Double => Storage::Double(vec![0.0; pending]),
            AdhocColumnType::String => Storage::String(vec![StringId::NULL; pending]),
        });
        state.pending_placeholders = 0;
    }

    fn ensure_null_overlay(&mut self, col: u32) {
        let state = &mut self.states[col as usize];
        if state.null_overlay.is_some() {
            return;
        }
        // All rows so far were non-null.
        let rows = match (&state.storage, self.nullability) {
            (Some(s), _) => s.len() as u32,
            (None, _) => state.pending_placeholders,
        };
        state.null_overlay = Some(BitVector::with_size(rows, true));
    }

    fn push_non_null_bit(&mut self, col: u32) {
        if let Some(overlay) = self.states[col as usize].null_overlay.as_mut() {
            overlay.push(true);
        }
    }

    fn set_type_error(&mut self, col: u32, pushed: &str) {
        if self.error.is_none() {
            self.error = Some(Error::with_message(
                ErrorCode::TypeMismatch,
                format!(
                    "column '{}' cannot accept a {pushed} value",
                    self.column_names[col as usize]
                ),
            ));
        }
    }
}

// ============================================================================
// Build-time analysis
// ============================================================================

struct IntegerColumnSummary {
    is_id_sorted: bool,
    is_setid_sorted: bool,
    is_sorted: bool,
    min: i64,
    max: i64,
    has_duplicates: bool,
    is_nullable: bool,
}

fn summarize_ints(data: &[i64], is_nullable: bool) -> IntegerColumnSummary {
    let mut seen: FxHashSet<i64> = FxHashSet::default();
    seen.reserve(data.len());
    let mut summary = IntegerColumnSummary {
        is_id_sorted: data.is_empty() || data[0] == 0,
        is_setid_sorted: data.is_empty() || data[0] == 0,
        is_sorted: true,
        min: data.first().copied().unwrap_or(0),
        max: data.first().copied().unwrap_or(0),
        has_duplicates: false,
        is_nullable,
    };
    if let Some(&first) = data.first() {
        seen.insert(first);
    }
    for (j, window) in data.windows(2).enumerate() {
        let (prev, cur) = (window[0], window[1]);
        let j = (j + 1) as i64;
        summary.is_id_sorted = summary.is_id_sorted && cur == j;
        summary.is_setid_sorted = summary.is_setid_sorted && (cur == prev || cur == j);
        summary.is_sorted = summary.is_sorted && prev <= cur;
        summary.min = summary.min.min(cur);
        summary.max = summary.max.max(cur);
        summary.has_duplicates = summary.has_duplicates || !seen.insert(cur);
    }
    summary
}

// Downcast to the narrowest type representing the whole range, or become an
// Id column when the values are exactly 0..n.
fn integer_storage(data: Vec<i64>, summary: &IntegerColumnSummary) -> Storage {
    // Nullable id-like columns stay numeric: the planner assumes Id columns
    // never carry a null overlay.
    if summary.is_id_sorted && !summary.is_nullable {
        return Storage::Id {
            size: data.len() as u32,
        };
    }
    if summary.min >= 0 && summary.max <= u32::MAX as i64 {
        return Storage::Uint32(data.into_iter().map(|v| v as u32).collect());
    }
    if summary.min >= i32::MIN as i64 && summary.max <= i32::MAX as i64 {
        return Storage::Int32(data.into_iter().map(|v| v as i32).collect());
    }
    Storage::Int64(data)
}

fn integer_sort_state(summary: &IntegerColumnSummary) -> SortState {
    if summary.is_nullable {
        return SortState::Unsorted;
    }
    if summary.is_id_sorted {
        return SortState::IdSorted;
    }
    if summary.is_setid_sorted {
        return SortState::SetIdSorted;
    }
    if summary.is_sorted {
        return SortState::Sorted;
    }
    SortState::Unsorted
}

fn small_value_eq(storage: &Storage, summary: &IntegerColumnSummary) -> SpecializedStorage {
    // Already-sorted id-like representations have faster probes.
    if summary.is_id_sorted || summary.is_setid_sorted {
        return SpecializedStorage::None;
    }
    let data = match storage {
        Storage::Uint32(v) => v,
        _ => return SpecializedStorage::None,
    };
    if !summary.is_sorted || summary.is_nullable || summary.has_duplicates {
        return SpecializedStorage::None;
    }
    // Memory is O(max value); only worth it when the domain is dense.
    if summary.max >= 16 * data.len() as i64 {
        return SpecializedStorage::None;
    }
    let size = data.last().map_or(0, |&v| v + 1);
    let mut bit_vector = BitVector::with_size(size, false);
    for &v in data {
        bit_vector.set(v);
    }
    let prefix_popcount = Slab::from(bit_vector.prefix_popcount());
    SpecializedStorage::SmallValueEq {
        bit_vector,
        prefix_popcount,
    }
}

fn make_null_storage(overlay: Option<BitVector>, nullability: AdhocNullability) -> NullStorage {
    match overlay {
        None => NullStorage::NonNull,
        Some(bit_vector) => match nullability {
            AdhocNullability::Dense => NullStorage::Dense(bit_vector),
            AdhocNullability::SparseWithPopcount => {
                let prefix_popcount = bit_vector.prefix_popcount();
                NullStorage::Sparse(
                    SparseNulls {
                        bit_vector,
                        prefix_popcount,
                    },
                    SparseVariant::PopcountAlways,
                )
            }
            AdhocNullability::Sparse => NullStorage::Sparse(
                SparseNulls {
                    bit_vector,
                    prefix_popcount: Vec::new(),
                },
                SparseVariant::Plain,
            ),
        },
    }
}

fn push_zero(storage: &mut Storage) {
    match storage {
        Storage::Int64(v) => v.push(0),
        Storage::Double(v) => v.push(0.0),
        Storage::String(v) => v.push(StringId::NULL),
        other => unreachable!("builder storage cannot be {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataframe::CellValue;
    use crate::types::{Nullability, StorageType};

    fn names(n: &[&str]) -> Vec<String> {
        n.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_build_infers_id_column() {
        let mut pool = StringPool::new();
        let mut b = AdhocDataframeBuilder::new(
            names(&["id"]),
            &mut pool,
            AdhocDataframeBuilderOptions::default(),
        );
        for i in 0..5 {
            b.push_int64(0, i);
        }
        let df = b.build().unwrap();
        assert_eq!(df.row_count(), 5);
        let spec = df.create_spec();
        assert_eq!(spec.column_specs[0].storage_type, StorageType::Id);
        assert_eq!(spec.column_specs[0].sort_state, SortState::IdSorted);
        assert_eq!(
            spec.column_specs[0].duplicate_state,
            DuplicateState::NoDuplicates
        );
        // The implicit primary key is appended.
        assert_eq!(df.column_names().last().unwrap(), AUTO_ID_COLUMN);
    }

    #[test]
    fn test_build_infers_setid_sorted() {
        let mut pool = StringPool::new();
        let mut b = AdhocDataframeBuilder::new(
            names(&["c"]),
            &mut pool,
            AdhocDataframeBuilderOptions::default(),
        );
        for v in [0i64, 0, 0, 3, 3, 5, 5, 7, 7, 7] {
            b.push_int64(0, v);
        }
        let df = b.build().unwrap();
        let spec = df.create_spec();
        assert_eq!(spec.column_specs[0].storage_type, StorageType::Uint32);
        assert_eq!(spec.column_specs[0].sort_state, SortState::SetIdSorted);
    }

    #[test]
    fn test_build_downcasts_to_int32() {
        let mut pool = StringPool::new();
        let mut b = AdhocDataframeBuilder::new(
            names(&["c"]),
            &mut pool,
            AdhocDataframeBuilderOptions::default(),
        );
        for v in [-5i64, 100, 42] {
            b.push_int64(0, v);
        }
        let df = b.build().unwrap();
        assert_eq!(
            df.create_spec().column_specs[0].storage_type,
            StorageType::Int32
        );
    }

    #[test]
    fn test_build_small_value_eq() {
        let mut pool = StringPool::new();
        let mut b = AdhocDataframeBuilder::new(
            names(&["c"]),
            &mut pool,
            AdhocDataframeBuilderOptions::default(),
        );
        // Sorted, unique, dense-domain values which are not setid-sorted.
        for v in [1i64, 3, 4, 6, 9] {
            b.push_int64(0, v);
        }
        let df = b.build().unwrap();
        // The column shape that qualifies: sorted uint32 without duplicates.
        let spec = df.create_spec();
        assert_eq!(spec.column_specs[0].sort_state, SortState::Sorted);
        assert_eq!(
            spec.column_specs[0].duplicate_state,
            DuplicateState::NoDuplicates
        );
    }

    #[test]
    fn test_build_nullable_sparse_with_popcount() {
        let mut pool = StringPool::new();
        let mut b = AdhocDataframeBuilder::new(
            names(&["c"]),
            &mut pool,
            AdhocDataframeBuilderOptions {
                types: vec![],
                nullability: AdhocNullability::SparseWithPopcount,
            },
        );
        b.push_int64(0, 10);
        b.push_null(0);
        b.push_int64(0, 20);
        let df = b.build().unwrap();
        assert_eq!(
            df.create_spec().column_specs[0].nullability,
            Nullability::SparseNullWithPopcountAlways
        );
        assert_eq!(df.get_cell(0, 0, &pool), CellValue::Uint32(10));
        assert_eq!(df.get_cell(1, 0, &pool), CellValue::Null);
        assert_eq!(df.get_cell(2, 0, &pool), CellValue::Uint32(20));
    }

    #[test]
    fn test_placeholder_backfill() {
        let mut pool = StringPool::new();
        let mut b = AdhocDataframeBuilder::new(
            names(&["a", "b"]),
            &mut pool,
            AdhocDataframeBuilderOptions::default(),
        );
        // Column b's type is unknown for the first two rows.
        b.push_int64(0, 1);
        b.push_placeholder(1, 1);
        b.push_int64(0, 2);
        b.push_placeholder(1, 1);
        b.push_int64(0, 3);
        b.push_int64(1, 7);
        let df = b.build().unwrap();
        assert_eq!(df.row_count(), 3);
        assert_eq!(df.get_cell(0, 1, &pool), CellValue::Uint32(0));
        assert_eq!(df.get_cell(2, 1, &pool), CellValue::Uint32(7));
    }

    #[test]
    fn test_row_count_mismatch() {
        let mut pool = StringPool::new();
        let mut b = AdhocDataframeBuilder::new(
            names(&["a", "b"]),
            &mut pool,
            AdhocDataframeBuilderOptions::default(),
        );
        b.push_int64(0, 1);
        b.push_int64(0, 2);
        b.push_int64(1, 1);
        let err = b.build().unwrap_err();
        assert_eq!(err.code(), ErrorCode::RowCountMismatch);
    }

    #[test]
    fn test_int_to_double_promotion() {
        let mut pool = StringPool::new();
        let mut b = AdhocDataframeBuilder::new(
            names(&["c"]),
            &mut pool,
            AdhocDataframeBuilderOptions::default(),
        );
        b.push_int64(0, 1);
        b.push_double(0, 2.5);
        let df = b.build().unwrap();
        assert_eq!(
            df.create_spec().column_specs[0].storage_type,
            StorageType::Double
        );
        assert_eq!(df.get_cell(0, 0, &pool), CellValue::Double(1.0));
        assert_eq!(df.get_cell(1, 0, &pool), CellValue::Double(2.5));
    }

    #[test]
    fn test_string_into_int_column_is_error() {
        let mut pool = StringPool::new();
        let mut b = AdhocDataframeBuilder::new(
            names(&["c"]),
            &mut pool,
            AdhocDataframeBuilderOptions::default(),
        );
        b.push_int64(0, 1);
        b.push_string(0, "oops");
        let err = b.build().unwrap_err();
        assert_eq!(err.code(), ErrorCode::TypeMismatch);
    }
}
