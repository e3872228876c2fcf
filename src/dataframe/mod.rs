//! Columnar dataframe
//!
//! A dataframe is an ordered set of named, typed columns with a shared row
//! count. Rows are inserted while mutable; `finalize` freezes the schema and
//! shrinks buffers, after which the dataframe can be cheaply copied and
//! queried from multiple cursors in parallel.

pub mod builder;
pub mod column;
pub mod tree;

use std::sync::Arc;

use crate::error::{Error, ErrorCode, Result};
use crate::executor::cursor::Cursor;
use crate::executor::plan::QueryPlan;
use crate::executor::wherecode::QueryPlanBuilder;
use crate::strings::{StringId, StringPool};
use crate::types::{
    ColumnSpec, DataframeSpec, DistinctSpec, DuplicateState, FilterSpec, LimitSpec, SortDirection,
    SortSpec, SortState,
};
use crate::util::BitVector;
use crate::vdbe::value::NoFilterValueFetcher;

use column::{Column, Index, NullStorage, SparseVariant, Storage};

/// Name of the implicit primary-key column.
pub const AUTO_ID_COLUMN: &str = "_auto_id";

// ============================================================================
// Cell values
// ============================================================================

/// A value being written into a row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InsertValue {
    Null,
    /// Placeholder for Id columns; the value is the row index.
    Id,
    Uint32(u32),
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(StringId),
}

/// A value read from a cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellValue<'a> {
    Null,
    Id(u32),
    Uint32(u32),
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(&'a str),
}

// ============================================================================
// Dataframe
// ============================================================================

/// A columnar table supporting planned queries.
#[derive(Debug)]
pub struct Dataframe {
    column_names: Vec<String>,
    columns: Vec<Arc<Column>>,
    indexes: Vec<Index>,
    row_count: u32,
    // Counts structural mutations (row inserts, clears, index changes,
    // finalization). Cell-level mutations are counted per column.
    non_column_mutations: u32,
    finalized: bool,
}

impl Dataframe {
    /// Creates an empty dataframe from a spec.
    pub fn new(spec: &DataframeSpec) -> Self {
        debug_assert_eq!(spec.column_names.len(), spec.column_specs.len());
        let columns = spec
            .column_specs
            .iter()
            .map(|cs| {
                Arc::new(Column::new(
                    Storage::with_type(cs.storage_type),
                    NullStorage::with_nullability(cs.nullability),
                    cs.sort_state,
                    cs.duplicate_state,
                ))
            })
            .collect();
        Self {
            column_names: spec.column_names.clone(),
            columns,
            indexes: Vec::new(),
            row_count: 0,
            non_column_mutations: 0,
            finalized: false,
        }
    }

    pub(crate) fn from_parts(
        finalized: bool,
        column_names: Vec<String>,
        columns: Vec<Arc<Column>>,
        row_count: u32,
    ) -> Self {
        let mut df = Self {
            column_names,
            columns,
            indexes: Vec::new(),
            row_count,
            non_column_mutations: 0,
            finalized: false,
        };
        if finalized {
            df.finalize();
        }
        df
    }

    // === Accessors ===

    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    pub fn column_count(&self) -> u32 {
        self.columns.len() as u32
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn finalized(&self) -> bool {
        self.finalized
    }

    pub(crate) fn columns(&self) -> &[Arc<Column>] {
        &self.columns
    }

    pub(crate) fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    /// The index of the column named `name`, if any.
    pub fn index_of_column(&self, name: &str) -> Option<u32> {
        self.column_names
            .iter()
            .position(|n| n == name)
            .map(|i| i as u32)
    }

    /// Total mutation count, combining structural and per-column cell
    /// mutations. Cursors snapshot this to detect staleness.
    pub fn mutations(&self) -> u64 {
        let mut total = self.non_column_mutations as u64;
        for col in &self.columns {
            total += col.mutations as u64;
        }
        total
    }

    /// The declared shape of this dataframe.
    pub fn create_spec(&self) -> DataframeSpec {
        DataframeSpec {
            column_names: self.column_names.clone(),
            column_specs: self
                .columns
                .iter()
                .map(|c| ColumnSpec {
                    storage_type: c.storage_type(),
                    nullability: c.nullability(),
                    sort_state: c.sort_state,
                    duplicate_state: c.duplicate_state,
                })
                .collect(),
        }
    }

    fn col_mut(&mut self, i: usize) -> &mut Column {
        Arc::make_mut(&mut self.columns[i])
    }

    // === Row mutation ===

    /// Appends a row. Values must match the column types; Id columns take
    /// `InsertValue::Id`. Must not be called on a finalized dataframe.
    pub fn insert_row(&mut self, values: &[InsertValue]) {
        assert!(!self.finalized, "insert on a finalized dataframe");
        debug_assert_eq!(values.len(), self.columns.len());
        for (i, value) in values.iter().enumerate() {
            self.insert_cell(i, *value);
        }
        self.row_count += 1;
        self.non_column_mutations += 1;
    }

    fn insert_cell(&mut self, i: usize, value: InsertValue) {
        let col = self.col_mut(i);
        // A null-string sentinel written to a nullable column is a null; on a
        // non-null column it is a caller bug.
        let value = match (value, &col.nulls) {
            (InsertValue::String(id), NullStorage::NonNull) => {
                debug_assert!(!id.is_null());
                value
            }
            (InsertValue::String(id), _) if id.is_null() => InsertValue::Null,
            _ => value,
        };
        match &mut col.nulls {
            NullStorage::NonNull => {
                debug_assert!(!matches!(value, InsertValue::Null));
                push_value(&mut col.storage, value);
            }
            NullStorage::Sparse(nulls, variant) => {
                let has_value = !matches!(value, InsertValue::Null);
                let with_popcount = matches!(
                    variant,
                    SparseVariant::PopcountAlways | SparseVariant::PopcountUntilFinalization
                );
                if with_popcount && nulls.bit_vector.len() % 64 == 0 {
                    let prefix = if nulls.bit_vector.is_empty() {
                        0
                    } else {
                        let last = nulls.bit_vector.len() - 1;
                        nulls.prefix_popcount.last().copied().unwrap_or(0)
                            + nulls.bit_vector.count_set_bits_in_word(last)
                    };
                    nulls.prefix_popcount.push(prefix);
                }
                nulls.bit_vector.push(has_value);
                if has_value {
                    push_value(&mut col.storage, value);
                }
            }
            NullStorage::Dense(bv) => {
                let has_value = !matches!(value, InsertValue::Null);
                bv.push(has_value);
                if has_value {
                    push_value(&mut col.storage, value);
                } else {
                    push_default(&mut col.storage);
                }
            }
        }
    }

    /// Overwrites the cell at `(row, col)`. Must not be called on a
    /// finalized dataframe; sparse columns require a popcount variant.
    pub fn set_cell(&mut self, row: u32, col: u32, value: InsertValue) {
        assert!(!self.finalized, "set_cell on a finalized dataframe");
        let column = self.col_mut(col as usize);
        column.mutations += 1;
        let value = match (&value, &column.nulls) {
            (InsertValue::String(id), NullStorage::NonNull) => {
                debug_assert!(!id.is_null());
                value
            }
            (InsertValue::String(id), _) if id.is_null() => InsertValue::Null,
            _ => value,
        };
        match &mut column.nulls {
            NullStorage::NonNull => {
                debug_assert!(!matches!(value, InsertValue::Null));
                set_storage_value(&mut column.storage, row, value);
            }
            NullStorage::Dense(bv) => {
                if matches!(value, InsertValue::Null) {
                    bv.clear(row);
                } else {
                    bv.set(row);
                    set_storage_value(&mut column.storage, row, value);
                }
            }
            NullStorage::Sparse(nulls, variant) => {
                assert!(
                    !matches!(variant, SparseVariant::Plain),
                    "set_cell on a sparse column without popcount"
                );
                let word = (row / 64) as usize;
                let storage_idx = nulls.prefix_popcount[word]
                    + nulls.bit_vector.count_set_bits_until_in_word(row);
                let was_set = nulls.bit_vector.is_set(row);
                if matches!(value, InsertValue::Null) {
                    if was_set {
                        remove_storage_slot(&mut column.storage, storage_idx);
                        for entry in nulls.prefix_popcount.iter_mut().skip(word + 1) {
                            *entry -= 1;
                        }
                    }
                    nulls.bit_vector.clear(row);
                } else {
                    if !was_set {
                        insert_storage_slot(&mut column.storage, storage_idx);
                        for entry in nulls.prefix_popcount.iter_mut().skip(word + 1) {
                            *entry += 1;
                        }
                    }
                    set_storage_value(&mut column.storage, storage_idx, value);
                    nulls.bit_vector.set(row);
                }
            }
        }
    }

    // === Cell reads ===

    /// The value of cell `(row, col)`.
    ///
    /// Sparse-null columns require a popcount variant; plain `SparseNull`
    /// has no random-access path and panics.
    pub fn get_cell<'p>(&'p self, row: u32, col: u32, pool: &'p StringPool) -> CellValue<'p> {
        debug_assert!(row < self.row_count);
        let column = &self.columns[col as usize];
        let storage_idx = match &column.nulls {
            NullStorage::NonNull => row,
            NullStorage::Dense(bv) => {
                if !bv.is_set(row) {
                    return CellValue::Null;
                }
                row
            }
            NullStorage::Sparse(nulls, variant) => {
                assert!(
                    !matches!(variant, SparseVariant::Plain),
                    "get_cell on a sparse column without popcount"
                );
                if !nulls.bit_vector.is_set(row) {
                    return CellValue::Null;
                }
                nulls.prefix_popcount[(row / 64) as usize]
                    + nulls.bit_vector.count_set_bits_until_in_word(row)
            }
        };
        match &column.storage {
            Storage::Id { .. } => CellValue::Id(storage_idx),
            Storage::Uint32(v) => CellValue::Uint32(v[storage_idx as usize]),
            Storage::Int32(v) => CellValue::Int32(v[storage_idx as usize]),
            Storage::Int64(v) => CellValue::Int64(v[storage_idx as usize]),
            Storage::Double(v) => CellValue::Double(v[storage_idx as usize]),
            Storage::String(v) => {
                let id = v[storage_idx as usize];
                debug_assert!(!id.is_null());
                CellValue::String(pool.get(id))
            }
        }
    }

    // === Lifecycle ===

    /// Removes all rows, keeping the schema. Not allowed once finalized.
    pub fn clear(&mut self) {
        assert!(!self.finalized, "clear on a finalized dataframe");
        for i in 0..self.columns.len() {
            let col = self.col_mut(i);
            col.storage.clear();
            match &mut col.nulls {
                NullStorage::NonNull => {}
                NullStorage::Sparse(nulls, _) => {
                    nulls.bit_vector.clear_and_shrink();
                    nulls.prefix_popcount.clear();
                }
                NullStorage::Dense(bv) => bv.clear_and_shrink(),
            }
        }
        self.row_count = 0;
        self.non_column_mutations += 1;
    }

    /// Freezes the schema: shrinks buffers, drops until-finalization
    /// popcount tables. Idempotent. Once finalized, only indexes may change.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        for i in 0..self.columns.len() {
            let col = self.col_mut(i);
            col.storage.shrink_to_fit();
            match &mut col.nulls {
                NullStorage::NonNull => {}
                NullStorage::Sparse(nulls, variant) => {
                    nulls.bit_vector.shrink_to_fit();
                    match variant {
                        SparseVariant::Plain => {}
                        SparseVariant::PopcountAlways => nulls.prefix_popcount.shrink_to_fit(),
                        SparseVariant::PopcountUntilFinalization => {
                            nulls.prefix_popcount.clear();
                            nulls.prefix_popcount.shrink_to_fit();
                        }
                    }
                }
                NullStorage::Dense(bv) => bv.shrink_to_fit(),
            }
        }
        // Cursors holding cached storage references must refresh: buffers may
        // have been reallocated by shrinking.
        self.non_column_mutations += 1;
    }

    /// Shallow copy of a finalized dataframe; columns and indexes are
    /// shared.
    pub fn copy_finalized(&self) -> Dataframe {
        assert!(self.finalized, "copy of a non-finalized dataframe");
        Dataframe {
            column_names: self.column_names.clone(),
            columns: self.columns.clone(),
            indexes: self.indexes.clone(),
            row_count: self.row_count,
            non_column_mutations: self.non_column_mutations,
            finalized: true,
        }
    }

    // === Indexes ===

    /// Builds (but does not attach) an index over `cols` by running an
    /// internal sort query. The index can be attached to any copy of this
    /// dataframe.
    pub fn build_index(&self, cols: &[u32], pool: &StringPool) -> Result<Index> {
        let sorts: Vec<SortSpec> = cols
            .iter()
            .map(|&col| SortSpec {
                col,
                direction: SortDirection::Ascending,
            })
            .collect();
        let mut filters: Vec<FilterSpec> = Vec::new();
        let plan = self.plan_query(
            &mut filters,
            &[],
            &sorts,
            LimitSpec::default(),
            0,
        )?;
        let mut cursor = self.prepare_cursor(&plan, pool);
        let mut fetcher = NoFilterValueFetcher;
        cursor.execute(&mut fetcher);
        let mut permutation = Vec::with_capacity(self.row_count as usize);
        while !cursor.eof() {
            permutation.push(cursor.row_index());
            cursor.next();
        }
        Ok(Index::new(cols.to_vec(), Arc::new(permutation)))
    }

    /// Attaches an index. Only allowed on finalized dataframes.
    pub fn add_index(&mut self, index: Index) {
        assert!(self.finalized, "indexes require a finalized dataframe");
        self.indexes.push(index);
        self.non_column_mutations += 1;
    }

    /// Detaches the index at `position`.
    pub fn remove_index_at(&mut self, position: u32) {
        assert!(self.finalized, "indexes require a finalized dataframe");
        self.indexes.remove(position as usize);
        self.non_column_mutations += 1;
    }

    // === Structural transforms ===

    /// Keeps only the rows at `indices`, which must be sorted and
    /// duplicate-free. Gathers in place column by column.
    pub fn select_rows(mut self, indices: &[u32]) -> Dataframe {
        assert!(self.finalized, "select_rows requires a finalized dataframe");
        for i in 1..indices.len() {
            debug_assert!(indices[i - 1] < indices[i]);
        }
        let count = indices.len();
        for i in 0..self.columns.len() {
            let col = Arc::make_mut(&mut self.columns[i]);
            match &mut col.nulls {
                NullStorage::NonNull => gather_storage(&mut col.storage, indices, count),
                NullStorage::Dense(bv) => {
                    gather_storage(&mut col.storage, indices, count);
                    gather_bits_in_place(bv, indices);
                }
                NullStorage::Sparse(nulls, variant) => {
                    // Sparse storage is addressed by storage index, so the
                    // kept rows must be translated before gathering. The
                    // translated indices stay ascending, keeping the
                    // in-place gather safe.
                    let prefix = nulls.bit_vector.prefix_popcount();
                    let storage_indices: Vec<u32> = indices
                        .iter()
                        .filter(|&&row| nulls.bit_vector.is_set(row))
                        .map(|&row| {
                            prefix[(row / 64) as usize]
                                + nulls.bit_vector.count_set_bits_until_in_word(row)
                        })
                        .collect();
                    gather_storage(&mut col.storage, &storage_indices, storage_indices.len());
                    gather_bits_in_place(&mut nulls.bit_vector, indices);
                    if matches!(variant, SparseVariant::PopcountAlways) {
                        nulls.prefix_popcount = nulls.bit_vector.prefix_popcount();
                    } else {
                        nulls.prefix_popcount.clear();
                    }
                }
            }
        }
        self.row_count = count as u32;
        self.indexes.clear();
        self.non_column_mutations += 1;
        self
    }

    /// Concatenates two finalized dataframes of equal row count, excluding
    /// their `_auto_id` columns; a fresh `_auto_id` is appended if either
    /// side had one.
    pub fn horizontal_concat(left: Dataframe, right: Dataframe) -> Result<Dataframe> {
        assert!(left.finalized && right.finalized);
        if left.row_count != right.row_count {
            return Err(Error::with_message(
                ErrorCode::RowCountMismatch,
                format!(
                    "horizontal concat: left has {} rows, right has {}",
                    left.row_count, right.row_count
                ),
            ));
        }
        let row_count = left.row_count;
        let mut column_names = Vec::new();
        let mut columns = Vec::new();
        let mut had_auto_id = false;
        for df in [left, right] {
            for (name, col) in df.column_names.into_iter().zip(df.columns) {
                if name == AUTO_ID_COLUMN {
                    had_auto_id = true;
                } else {
                    column_names.push(name);
                    columns.push(col);
                }
            }
        }
        {
            let mut seen = std::collections::HashSet::new();
            for name in &column_names {
                if !seen.insert(name.clone()) {
                    return Err(Error::with_message(
                        ErrorCode::Internal,
                        format!("horizontal concat: duplicate column name '{name}'"),
                    ));
                }
            }
        }
        if had_auto_id {
            column_names.push(AUTO_ID_COLUMN.to_owned());
            columns.push(Arc::new(Column::new(
                Storage::Id { size: row_count },
                NullStorage::NonNull,
                SortState::IdSorted,
                DuplicateState::NoDuplicates,
            )));
        }
        Ok(Dataframe::from_parts(true, column_names, columns, row_count))
    }

    // === Query ===

    /// Compiles filters/distinct/sort/limit into an executable plan.
    /// `cols_used` is a bitmap of columns the caller will fetch; bit 63
    /// covers every column at index >= 63.
    pub fn plan_query(
        &self,
        filter_specs: &mut Vec<FilterSpec>,
        distinct_specs: &[DistinctSpec],
        sort_specs: &[SortSpec],
        limit_spec: LimitSpec,
        cols_used: u64,
    ) -> Result<QueryPlan> {
        QueryPlanBuilder::build(
            self.row_count,
            &self.columns,
            &self.indexes,
            filter_specs,
            distinct_specs,
            sort_specs,
            limit_spec,
            cols_used,
        )
    }

    /// Creates a cursor over this dataframe for the given plan. The cursor
    /// snapshots the columns, so it stays usable (but stale) if this
    /// dataframe is mutated afterwards; see `Cursor::is_stale`.
    pub fn prepare_cursor<'p>(&self, plan: &QueryPlan, pool: &'p StringPool) -> Cursor<'p> {
        Cursor::new(self, plan, pool)
    }
}

// ============================================================================
// Storage write helpers
// ============================================================================

fn push_value(storage: &mut Storage, value: InsertValue) {
    match (storage, value) {
        (Storage::Id { size }, InsertValue::Id) => *size += 1,
        (Storage::Uint32(v), InsertValue::Uint32(x)) => v.push(x),
        (Storage::Int32(v), InsertValue::Int32(x)) => v.push(x),
        (Storage::Int64(v), InsertValue::Int64(x)) => v.push(x),
        (Storage::Double(v), InsertValue::Double(x)) => v.push(x),
        (Storage::String(v), InsertValue::String(x)) => v.push(x),
        (storage, value) => unreachable!("value {value:?} does not match storage {storage:?}"),
    }
}

fn push_default(storage: &mut Storage) {
    match storage {
        Storage::Id { size } => *size += 1,
        Storage::Uint32(v) => v.push(0),
        Storage::Int32(v) => v.push(0),
        Storage::Int64(v) => v.push(0),
        Storage::Double(v) => v.push(0.0),
        Storage::String(v) => v.push(StringId::from_raw(0)),
    }
}

fn set_storage_value(storage: &mut Storage, idx: u32, value: InsertValue) {
    let idx = idx as usize;
    match (storage, value) {
        (Storage::Uint32(v), InsertValue::Uint32(x)) => v[idx] = x,
        (Storage::Int32(v), InsertValue::Int32(x)) => v[idx] = x,
        (Storage::Int64(v), InsertValue::Int64(x)) => v[idx] = x,
        (Storage::Double(v), InsertValue::Double(x)) => v[idx] = x,
        (Storage::String(v), InsertValue::String(x)) => v[idx] = x,
        (storage, value) => unreachable!("value {value:?} does not match storage {storage:?}"),
    }
}

fn insert_storage_slot(storage: &mut Storage, idx: u32) {
    let idx = idx as usize;
    match storage {
        Storage::Uint32(v) => v.insert(idx, 0),
        Storage::Int32(v) => v.insert(idx, 0),
        Storage::Int64(v) => v.insert(idx, 0),
        Storage::Double(v) => v.insert(idx, 0.0),
        Storage::String(v) => v.insert(idx, StringId::from_raw(0)),
        Storage::Id { .. } => unreachable!("Id storage has no slots"),
    }
}

fn remove_storage_slot(storage: &mut Storage, idx: u32) {
    let idx = idx as usize;
    match storage {
        Storage::Uint32(v) => drop(v.remove(idx)),
        Storage::Int32(v) => drop(v.remove(idx)),
        Storage::Int64(v) => drop(v.remove(idx)),
        Storage::Double(v) => drop(v.remove(idx)),
        Storage::String(v) => drop(v.remove(idx)),
        Storage::Id { .. } => unreachable!("Id storage has no slots"),
    }
}

// Indices are sorted ascending, so indices[i] >= i and the gather never
// overwrites unread data.
fn gather_in_place<T: Copy>(v: &mut Vec<T>, indices: &[u32]) {
    for (i, &idx) in indices.iter().enumerate() {
        v[i] = v[idx as usize];
    }
    v.truncate(indices.len());
}

fn gather_storage(storage: &mut Storage, indices: &[u32], count: usize) {
    match storage {
        Storage::Id { size } => *size = count as u32,
        Storage::Uint32(v) => gather_in_place(v, indices),
        Storage::Int32(v) => gather_in_place(v, indices),
        Storage::Int64(v) => gather_in_place(v, indices),
        Storage::Double(v) => gather_in_place(v, indices),
        Storage::String(v) => gather_in_place(v, indices),
    }
}

fn gather_bits_in_place(bv: &mut BitVector, indices: &[u32]) {
    for (i, &idx) in indices.iter().enumerate() {
        let value = bv.is_set(idx);
        bv.change(i as u32, value);
    }
    bv.resize(indices.len() as u32, false);
}
