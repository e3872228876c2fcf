//! Tree transformation
//!
//! A tree dataframe carries a node id column at index 0 and a parent-id
//! column at index 1 (nullable; roots have a null parent). The transformer
//! normalizes the parent column to a flat u32 buffer (u32::MAX for roots),
//! builds child-to-parent and parent-to-child structures via the bytecode
//! VM, and supports filtering with reparenting: removed nodes' children are
//! attached to their nearest surviving ancestor.
//!
//! Filters reuse the query planner's filter pipeline as a subroutine, so a
//! tree filter benefits from the same sorted/indexed probes as a query.
//! `into_dataframe` executes the accumulated bytecode and materializes the
//! surviving rows as a single dataframe with fresh `_tree_id` and
//! `_tree_parent_id` columns prepended.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::dataframe::column::{Column, NullStorage, Storage};
use crate::dataframe::{Dataframe, AUTO_ID_COLUMN};
use crate::error::Result;
use crate::executor::cursor::apply_register_inits;
use crate::executor::plan::RegisterInit;
use crate::executor::wherecode::{FilterResult, IndicesReg, QueryPlanBuilder};
use crate::strings::StringPool;
use crate::types::{DuplicateState, FilterSpec, SortState};
use crate::util::{BitVector, Slab};
use crate::vdbe::builder::BytecodeBuilder;
use crate::vdbe::engine::Interpreter;
use crate::vdbe::ops::{self, opcode};
use crate::vdbe::registers::{Range, RegHandle, RegValue, Span};
use crate::vdbe::value::ValueFetcher;

/// Sentinel parent value for root nodes.
pub const NO_PARENT: u32 = u32::MAX;

/// Name of the node-id column a transformation prepends.
pub const TREE_ID_COLUMN: &str = "_tree_id";

/// Name of the parent-id column a transformation prepends. Dense-null so
/// parent cells stay randomly accessible.
pub const TREE_PARENT_ID_COLUMN: &str = "_tree_parent_id";

// Scratch slot ids; one buffer per concern, reused across filter calls.
const PARENT_SLOT: u32 = 0;
const ORIGINAL_ROWS_SLOT: u32 = 1;
const FILTER_SCRATCH1_SLOT: u32 = 2;
const FILTER_SCRATCH2_SLOT: u32 = 3;
const P2C_OFFSETS_SLOT: u32 = 4;
const P2C_CHILDREN_SLOT: u32 = 5;
const P2C_ROOTS_SLOT: u32 = 6;
const P2C_SCRATCH_SLOT: u32 = 7;
const FILTER_INDICES_SLOT: u32 = 8;

/// Accumulates tree operations as bytecode and executes them on demand.
pub struct TreeTransformer<'p> {
    df: Dataframe,
    pool: &'p StringPool,
    builder: BytecodeBuilder,
    scope_id: u32,
    register_inits: SmallVec<[RegisterInit; 16]>,
    filter_value_count: u32,

    // Register holding the normalized parent buffer; populated directly at
    // execution time.
    parent_buffer_reg: RegHandle<Slab<u32>>,
    parent_span: RegHandle<Span>,
    original_rows_span: RegHandle<Span>,
    keep_bv_reg: RegHandle<crate::util::BitVector>,

    p2c_offsets: RegHandle<Span>,
    p2c_children: RegHandle<Span>,
    p2c_roots: RegHandle<Span>,

    initialized: bool,
    p2c_stale: bool,
}

impl<'p> TreeTransformer<'p> {
    /// Takes ownership of a tree dataframe. The dataframe is finalized if it
    /// was not already.
    pub fn new(mut df: Dataframe, pool: &'p StringPool) -> Self {
        df.finalize();
        let mut builder = BytecodeBuilder::new();
        let scope_id = builder.create_cache_scope();
        let parent_buffer_reg = builder.allocate_register::<Slab<u32>>();
        let keep_bv_reg = builder.allocate_register::<crate::util::BitVector>();
        Self {
            df,
            pool,
            builder,
            scope_id,
            register_inits: SmallVec::new(),
            filter_value_count: 0,
            parent_buffer_reg,
            parent_span: RegHandle::none(),
            original_rows_span: RegHandle::none(),
            keep_bv_reg,
            p2c_offsets: RegHandle::none(),
            p2c_children: RegHandle::none(),
            p2c_roots: RegHandle::none(),
            initialized: false,
            p2c_stale: true,
        }
    }

    /// The underlying dataframe (for column metadata).
    pub fn df(&self) -> &Dataframe {
        &self.df
    }

    /// Total filter value slots consumed by accumulated filters; the fetcher
    /// passed to `into_dataframe` must cover `0..filter_value_count`.
    pub fn filter_value_count(&self) -> u32 {
        self.filter_value_count
    }

    /// Keeps only nodes matching `specs`, reparenting surviving children of
    /// removed nodes to their nearest surviving ancestor. May be called
    /// multiple times; filters apply in order.
    pub fn filter(&mut self, specs: &mut Vec<FilterSpec>) -> Result<()> {
        let row_count = self.df.row_count();
        self.ensure_tree_structure();

        // Compile the filters against the base dataframe into an index span.
        let range = self.builder.allocate_register::<Range>();
        {
            let bc = self.builder.add_opcode(opcode::INIT_RANGE);
            ops::InitRangeArgs {
                size: row_count,
                dest_register: range,
            }
            .encode(bc);
        }
        let result: FilterResult = QueryPlanBuilder::filter_subroutine(
            &mut self.builder,
            self.scope_id,
            IndicesReg::Range(range),
            row_count,
            self.df.columns(),
            self.df.indexes(),
            specs,
            self.filter_value_count,
        )?;
        self.filter_value_count = result.filter_value_count;
        self.register_inits.extend(result.register_inits);

        let indices = match result.indices {
            IndicesReg::Span(span) => span,
            IndicesReg::Range(r) => {
                // Materialize the surviving range.
                let scratch = self.allocate_scratch(FILTER_INDICES_SLOT, row_count);
                let bc = self.builder.add_opcode(opcode::IOTA);
                ops::IotaArgs {
                    source_register: r,
                    update_register: scratch,
                }
                .encode(bc);
                scratch
            }
        };

        // Convert surviving indices to a keep bitvector and filter the tree.
        {
            let bc = self.builder.add_opcode(opcode::INDEX_SPAN_TO_BITVECTOR);
            ops::IndexSpanToBitvectorArgs {
                indices_register: indices,
                bitvector_size: row_count,
                dest_register: self.keep_bv_reg,
            }
            .encode(bc);
        }
        self.ensure_parent_to_child_structure(row_count);
        let scratch1 = self.allocate_scratch(FILTER_SCRATCH1_SLOT, row_count * 2);
        let scratch2 = self.allocate_scratch(FILTER_SCRATCH2_SLOT, row_count);
        {
            let bc = self.builder.add_opcode(opcode::FILTER_TREE);
            ops::FilterTreeArgs {
                offsets_register: self.p2c_offsets,
                children_register: self.p2c_children,
                roots_register: self.p2c_roots,
                keep_bitvector_register: self.keep_bv_reg,
                parent_span_register: self.parent_span,
                original_rows_span_register: self.original_rows_span,
                scratch1_register: scratch1,
                scratch2_register: scratch2,
            }
            .encode(bc);
        }
        // The child-to-parent structure changed shape.
        self.p2c_stale = true;
        Ok(())
    }

    /// Executes the accumulated bytecode and materializes the surviving rows
    /// as a dataframe: a fresh `_tree_id` column (node index), a dense-null
    /// `_tree_parent_id` column, the surviving data columns (shared, not
    /// copied), and a fresh implicit `_auto_id`.
    pub fn into_dataframe<F: ValueFetcher>(mut self, fetcher: &mut F) -> Result<Dataframe> {
        self.ensure_tree_structure();

        let normalized = normalize_parent_column(&self.df);
        let (parents, original_rows) = {
            let mut interpreter = Interpreter::new(
                self.builder.bytecode(),
                self.builder.register_count(),
                self.df.columns(),
                self.pool,
            );
            interpreter.set_register(
                self.parent_buffer_reg.index,
                RegValue::Slab(Slab::from(normalized)),
            );
            apply_register_inits(&mut interpreter, &self.register_inits, &self.df);
            interpreter.execute(fetcher);

            let parents: Vec<u32> = interpreter.span_elements(self.parent_span).to_vec();
            let original_rows: Vec<u32> =
                interpreter.span_elements(self.original_rows_span).to_vec();
            (parents, original_rows)
        };

        let surviving = self.df.select_rows(&original_rows);
        let row_count = surviving.row_count();

        let mut parent_bv = BitVector::with_size(row_count, false);
        let mut parent_values = vec![0u32; row_count as usize];
        for (i, &p) in parents.iter().enumerate() {
            if p != NO_PARENT {
                parent_bv.set(i as u32);
                parent_values[i] = p;
            }
        }

        let mut column_names = vec![
            TREE_ID_COLUMN.to_owned(),
            TREE_PARENT_ID_COLUMN.to_owned(),
        ];
        let mut columns: Vec<Arc<Column>> = vec![
            Arc::new(Column::new(
                Storage::Id { size: row_count },
                NullStorage::NonNull,
                SortState::IdSorted,
                DuplicateState::NoDuplicates,
            )),
            Arc::new(Column::new(
                Storage::Uint32(parent_values),
                NullStorage::Dense(parent_bv),
                SortState::Unsorted,
                DuplicateState::HasDuplicates,
            )),
        ];

        // The surviving data columns are shared as-is; a trailing implicit
        // `_auto_id` is replaced by a fresh one covering the new row count.
        let names = surviving.column_names();
        let had_auto_id = names.last().map_or(false, |n| n == AUTO_ID_COLUMN);
        let data_count = names.len() - had_auto_id as usize;
        for i in 0..data_count {
            column_names.push(names[i].clone());
            columns.push(surviving.columns()[i].clone());
        }
        column_names.push(AUTO_ID_COLUMN.to_owned());
        columns.push(Arc::new(Column::new(
            Storage::Id { size: row_count },
            NullStorage::NonNull,
            SortState::IdSorted,
            DuplicateState::NoDuplicates,
        )));
        Ok(Dataframe::from_parts(true, column_names, columns, row_count))
    }

    // Emits the one-time child-to-parent structure setup.
    fn ensure_tree_structure(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        let row_count = self.df.row_count();
        self.parent_span = self.allocate_scratch(PARENT_SLOT, row_count);
        self.original_rows_span = self.allocate_scratch(ORIGINAL_ROWS_SLOT, row_count);
        let bc = self.builder.add_opcode(opcode::MAKE_CHILD_TO_PARENT_TREE);
        ops::MakeChildToParentTreeStructureArgs {
            parent_id_buffer_register: self.parent_buffer_reg,
            row_count,
            parent_span_register: self.parent_span,
            original_rows_span_register: self.original_rows_span,
        }
        .encode(bc);
    }

    // Rebuilds the CSR if a previous operation invalidated it. Buffers are
    // sized for the original row count, which bounds every later shape.
    fn ensure_parent_to_child_structure(&mut self, row_count: u32) {
        if !self.p2c_stale {
            return;
        }
        self.p2c_stale = false;
        self.p2c_offsets = self.allocate_scratch(P2C_OFFSETS_SLOT, row_count + 1);
        self.p2c_children = self.allocate_scratch(P2C_CHILDREN_SLOT, row_count);
        self.p2c_roots = self.allocate_scratch(P2C_ROOTS_SLOT, row_count);
        let scratch = self.allocate_scratch(P2C_SCRATCH_SLOT, row_count);
        let bc = self.builder.add_opcode(opcode::MAKE_PARENT_TO_CHILD_TREE);
        ops::MakeParentToChildTreeStructureArgs {
            parent_span_register: self.parent_span,
            scratch_register: scratch,
            offsets_register: self.p2c_offsets,
            children_register: self.p2c_children,
            roots_register: self.p2c_roots,
        }
        .encode(bc);
    }

    fn allocate_scratch(&mut self, slot: u32, size: u32) -> RegHandle<Span> {
        let scratch = self.builder.get_or_create_scratch_registers(slot);
        let bc = self.builder.add_opcode(opcode::ALLOCATE_INDICES);
        ops::AllocateIndicesArgs {
            size,
            dest_slab_register: scratch.slab,
            dest_span_register: scratch.span,
        }
        .encode(bc);
        scratch.span
    }
}

// Flattens the parent-id column (index 1) into a u32 buffer with NO_PARENT
// for null parents.
fn normalize_parent_column(df: &Dataframe) -> Vec<u32> {
    let column = &df.columns()[1];
    let row_count = df.row_count();
    let mut out = Vec::with_capacity(row_count as usize);
    let value_at = |storage_idx: u32| -> u32 {
        match &column.storage {
            Storage::Id { .. } => storage_idx,
            Storage::Uint32(v) => v[storage_idx as usize],
            Storage::Int32(v) => v[storage_idx as usize] as u32,
            Storage::Int64(v) => v[storage_idx as usize] as u32,
            other => unreachable!("parent-id column must be integral: {other:?}"),
        }
    };
    match &column.nulls {
        NullStorage::NonNull => {
            for row in 0..row_count {
                out.push(value_at(row));
            }
        }
        NullStorage::Dense(bv) => {
            for row in 0..row_count {
                out.push(if bv.is_set(row) { value_at(row) } else { NO_PARENT });
            }
        }
        NullStorage::Sparse(nulls, _) => {
            // Walk the bitvector with a running popcount so plain sparse
            // columns (no popcount table) normalize too.
            let mut storage_idx = 0u32;
            for row in 0..row_count {
                if nulls.bit_vector.is_set(row) {
                    out.push(value_at(storage_idx));
                    storage_idx += 1;
                } else {
                    out.push(NO_PARENT);
                }
            }
        }
    }
    out
}
