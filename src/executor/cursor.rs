//! Cursors
//!
//! A cursor materializes a plan's register-init descriptors against a live
//! dataframe, runs the interpreter, and iterates the output span. Each
//! result row occupies `output_per_row` slots: the row index first, then one
//! precomputed storage offset per projected nullable column (u32::MAX
//! meaning null).
//!
//! Preparation snapshots the dataframe's columns by shared ownership, so a
//! cursor keeps reading a consistent snapshot even if the dataframe is
//! mutated afterwards; `is_stale` reports when that has happened so the
//! caller can re-prepare.

use std::sync::Arc;

use crate::dataframe::column::{Column, Storage};
use crate::dataframe::{CellValue, Dataframe};
use crate::executor::plan::{ExecutionParams, QueryPlan, RegisterInit, RegisterInitKind};
use crate::strings::StringPool;
use crate::vdbe::engine::Interpreter;
use crate::vdbe::registers::RegValue;
use crate::vdbe::value::ValueFetcher;

// Resolves register-init descriptors against the dataframe. Storage and
// bitvector registers hold column numbers which the interpreter dereferences
// lazily; index registers share the permutation vector.
pub(crate) fn apply_register_inits(
    interpreter: &mut Interpreter<'_>,
    inits: &[RegisterInit],
    df: &Dataframe,
) {
    for init in inits {
        let value = match init.kind {
            // Id columns have no storage; the row index is the value.
            RegisterInitKind::Id => RegValue::Storage(None),
            RegisterInitKind::Uint32
            | RegisterInitKind::Int32
            | RegisterInitKind::Int64
            | RegisterInitKind::Double
            | RegisterInitKind::String => RegValue::Storage(Some(init.source_index as u32)),
            RegisterInitKind::NullBitvector => RegValue::NullBv(init.source_index as u32),
            RegisterInitKind::IndexVector => RegValue::IndexPerm(
                df.indexes()[init.source_index as usize].permutation().clone(),
            ),
            RegisterInitKind::SmallValueEqBitvector => {
                RegValue::SmallValueBv(init.source_index as u32)
            }
            RegisterInitKind::SmallValueEqPopcount => {
                RegValue::SmallValuePopcount(init.source_index as u32)
            }
        };
        interpreter.set_register(init.dest_register, value);
    }
}

/// Iterates the rows produced by one plan execution.
pub struct Cursor<'a> {
    pool: &'a StringPool,
    // Shared-ownership snapshot of the columns at preparation time, used for
    // cell reads.
    columns: Vec<Arc<Column>>,
    interpreter: Interpreter<'a>,
    params: ExecutionParams,
    col_to_output_offset: Vec<u32>,
    // Position and length in output-slot units.
    pos: u32,
    len: u32,
    mutations_at_prepare: u64,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(df: &Dataframe, plan: &QueryPlan, pool: &'a StringPool) -> Self {
        let mut interpreter = Interpreter::new(
            &plan.bytecode,
            plan.params.register_count,
            df.columns(),
            pool,
        );
        apply_register_inits(&mut interpreter, &plan.register_inits, df);
        Self {
            pool,
            columns: df.columns().to_vec(),
            interpreter,
            params: plan.params,
            col_to_output_offset: plan.col_to_output_offset.to_vec(),
            pos: 0,
            len: 0,
            mutations_at_prepare: df.mutations(),
        }
    }

    /// Runs the plan. The fetcher is consulted for every filter value the
    /// plan consumes.
    pub fn execute<F: ValueFetcher>(&mut self, fetcher: &mut F) {
        self.interpreter.execute(fetcher);
        self.pos = 0;
        self.len = self
            .interpreter
            .span_elements(self.params.output_register)
            .len() as u32;
    }

    /// True once every result row has been consumed.
    pub fn eof(&self) -> bool {
        self.pos >= self.len
    }

    /// Advances to the next result row.
    pub fn next(&mut self) {
        self.pos += self.params.output_per_row;
    }

    /// The dataframe row index of the current result row.
    pub fn row_index(&self) -> u32 {
        self.output()[self.pos as usize]
    }

    /// The value of `col` for the current result row. Only columns included
    /// in the plan's `cols_used` bitmap may be fetched.
    pub fn cell(&self, col: u32) -> CellValue<'_> {
        let offset = self.col_to_output_offset[col as usize];
        let storage_idx = self.output()[(self.pos + offset) as usize];
        if storage_idx == u32::MAX {
            return CellValue::Null;
        }
        // The offset slot already went through null translation, so the
        // value reads straight out of storage.
        let column = &self.columns[col as usize];
        match &column.storage {
            Storage::Id { .. } => CellValue::Id(storage_idx),
            Storage::Uint32(v) => CellValue::Uint32(v[storage_idx as usize]),
            Storage::Int32(v) => CellValue::Int32(v[storage_idx as usize]),
            Storage::Int64(v) => CellValue::Int64(v[storage_idx as usize]),
            Storage::Double(v) => CellValue::Double(v[storage_idx as usize]),
            Storage::String(v) => {
                let id = v[storage_idx as usize];
                debug_assert!(!id.is_null());
                CellValue::String(self.pool.get(id))
            }
        }
    }

    /// Number of result rows.
    pub fn result_row_count(&self) -> u32 {
        if self.params.output_per_row == 0 {
            0
        } else {
            self.len / self.params.output_per_row
        }
    }

    /// Whether `df` has been mutated since this cursor was prepared. A stale
    /// cursor keeps reading its preparation-time snapshot and must be
    /// re-prepared to observe the mutations.
    pub fn is_stale(&self, df: &Dataframe) -> bool {
        df.mutations() != self.mutations_at_prepare
    }

    fn output(&self) -> &[u32] {
        self.interpreter.span_elements(self.params.output_register)
    }
}
