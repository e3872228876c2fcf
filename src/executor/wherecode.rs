//! Query planning
//!
//! Translates filter/distinct/sort/limit specifications into bytecode. The
//! planner orders filters by a selectivity preference, narrows a contiguous
//! row range with sorted and specialized probes first, then applies an index
//! when one covers the remaining equality filters, and only then falls back
//! to linear filters over materialized index sets. Cost and row-count
//! estimates are updated at every opcode emission.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::dataframe::column::{Column, Index};
use crate::error::Result;
use crate::executor::plan::{QueryPlan, RegisterInit, RegisterInitKind};
use crate::types::{
    BoundModifier, DistinctSpec, DuplicateState, FilterSpec, LimitSpec, MinMaxOp, NonStringOp,
    NullOp, Op, RangeOp, SortDirection, SortSpec, SortState, StorageType, StringOp,
};
use crate::util::Slab;
use crate::vdbe::builder::{BytecodeBuilder, CachedRegKind};
use crate::vdbe::ops::{self, opcode, Bytecode, Cost};
use crate::vdbe::registers::{NullBvPtr, Range, RegHandle, Span, StoragePtr, StringRankMap};
use crate::vdbe::value::CastFilterValueResult;

// ============================================================================
// Public types
// ============================================================================

/// The register currently holding the candidate row set: a contiguous range
/// until something forces materialization into an index span.
#[derive(Debug, Clone, Copy)]
pub enum IndicesReg {
    Range(RegHandle<Range>),
    Span(RegHandle<Span>),
}

/// Result of the standalone filter subroutine.
pub struct FilterResult {
    pub indices: IndicesReg,
    pub register_inits: SmallVec<[RegisterInit; 16]>,
    /// Total filter value slots consumed, including `first_value_index`.
    pub filter_value_count: u32,
}

// Filter preference classes; lower applies earlier.
const PREF_ID_EQ: u32 = 0;
const PREF_SET_ID_SORTED_EQ: u32 = 1;
const PREF_ID_INEQUALITY: u32 = 2;
const PREF_NUMERIC_SORTED_EQ: u32 = 3;
const PREF_NUMERIC_SORTED_INEQUALITY: u32 = 4;
const PREF_STRING_SORTED_EQ: u32 = 5;
const PREF_STRING_SORTED_INEQUALITY: u32 = 6;
const PREF_LEAST: u32 = 7;

fn filter_preference(fs: &FilterSpec, col: &Column) -> u32 {
    let ct = col.storage_type();
    let non_null = col.nullability().is_non_null();
    let numeric = matches!(
        ct,
        StorageType::Uint32 | StorageType::Int32 | StorageType::Int64 | StorageType::Double
    );
    if non_null && ct.is_id() && fs.op.is_eq() {
        return PREF_ID_EQ;
    }
    if non_null
        && ct == StorageType::Uint32
        && col.sort_state == SortState::SetIdSorted
        && fs.op.is_eq()
    {
        return PREF_SET_ID_SORTED_EQ;
    }
    if non_null && ct.is_id() && fs.op.is_inequality() {
        return PREF_ID_INEQUALITY;
    }
    if non_null && col.sort_state == SortState::Sorted && numeric && fs.op.is_eq() {
        return PREF_NUMERIC_SORTED_EQ;
    }
    if non_null && col.sort_state == SortState::Sorted && numeric && fs.op.is_inequality() {
        return PREF_NUMERIC_SORTED_INEQUALITY;
    }
    if non_null && col.sort_state == SortState::Sorted && ct.is_string() && fs.op.is_eq() {
        return PREF_STRING_SORTED_EQ;
    }
    if non_null && col.sort_state == SortState::Sorted && ct.is_string() && fs.op.is_inequality() {
        return PREF_STRING_SORTED_INEQUALITY;
    }
    PREF_LEAST
}

// Bound modifier and binary-search flavor for a range op.
fn sorted_filter_args(op: Op) -> (BoundModifier, RangeOp) {
    match op {
        Op::Eq => (BoundModifier::BothBounds, RangeOp::EqualRange),
        Op::Lt => (BoundModifier::EndBound, RangeOp::LowerBound),
        Op::Le => (BoundModifier::EndBound, RangeOp::UpperBound),
        Op::Gt => (BoundModifier::BeginBound, RangeOp::UpperBound),
        Op::Ge => (BoundModifier::BeginBound, RangeOp::LowerBound),
        _ => unreachable!("not a range op: {op:?}"),
    }
}

fn storage_init_kind(ty: StorageType) -> RegisterInitKind {
    match ty {
        StorageType::Id => RegisterInitKind::Id,
        StorageType::Uint32 => RegisterInitKind::Uint32,
        StorageType::Int32 => RegisterInitKind::Int32,
        StorageType::Int64 => RegisterInitKind::Int64,
        StorageType::Double => RegisterInitKind::Double,
        StorageType::String => RegisterInitKind::String,
    }
}

// How an emitted opcode changes the running row-count estimates.
#[derive(Debug, Clone, Copy)]
enum RowCountModifier {
    Unchanged,
    NonEqualityFilter,
    EqualityFilter(DuplicateState),
    OneRow,
    ZeroRow,
    LimitOffset { limit: u32, offset: u32 },
}

// Which column to copy into a row layout and how.
struct RowLayoutParams {
    column: u32,
    replace_string_with_rank: bool,
    invert_copied_bits: bool,
}

// The best index for the unhandled equality filters: position in the index
// list plus the filter spec positions it covers, in index column order.
struct BestIndex {
    index_idx: u32,
    spec_idxs: Vec<u32>,
}

// ============================================================================
// QueryPlanBuilder
// ============================================================================

/// Builds a `QueryPlan` from query specifications.
pub struct QueryPlanBuilder<'a, 'b> {
    columns: &'a [Arc<Column>],
    indexes: &'a [Index],
    plan: QueryPlan,
    indices_reg: IndicesReg,
    builder: &'b mut BytecodeBuilder,
    scope_id: u32,
}

impl<'a, 'b> QueryPlanBuilder<'a, 'b> {
    /// Builds a complete plan.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        row_count: u32,
        columns: &[Arc<Column>],
        indexes: &[Index],
        filter_specs: &mut Vec<FilterSpec>,
        distinct_specs: &[DistinctSpec],
        sort_specs: &[SortSpec],
        limit_spec: LimitSpec,
        cols_used: u64,
    ) -> Result<QueryPlan> {
        let mut bcb = BytecodeBuilder::new();
        let scope_id = bcb.create_cache_scope();

        // Start from a range covering every row.
        let range = bcb.allocate_register::<Range>();
        {
            let bc = bcb.add_opcode(opcode::INIT_RANGE);
            ops::InitRangeArgs {
                size: row_count,
                dest_register: range,
            }
            .encode(bc);
        }

        let mut planner = QueryPlanBuilder {
            columns,
            indexes,
            plan: QueryPlan::default(),
            indices_reg: IndicesReg::Range(range),
            builder: &mut bcb,
            scope_id,
        };
        planner.plan.params.max_row_count = row_count;
        planner.plan.params.estimated_row_count = row_count;

        planner.filter(filter_specs)?;
        planner.distinct(distinct_specs);
        if planner.can_use_min_max(sort_specs, &limit_spec) {
            planner.min_max(&sort_specs[0]);
            planner.output(LimitSpec::default(), cols_used);
        } else {
            planner.sort(sort_specs);
            planner.output(limit_spec, cols_used);
        }

        let mut plan = planner.plan;
        plan.params.register_count = bcb.register_count();
        plan.bytecode = bcb.into_bytecode();
        log::debug!(
            "planned query: {} opcodes, est {} rows (max {}), cost {:.1}",
            plan.bytecode.len(),
            plan.params.estimated_row_count,
            plan.params.max_row_count,
            plan.params.estimated_cost,
        );
        Ok(plan)
    }

    /// Applies only the filter pipeline into an existing builder. Used by
    /// the tree transformer to reuse filter planning. `first_value_index` is
    /// the first free filter value slot.
    #[allow(clippy::too_many_arguments)]
    pub fn filter_subroutine(
        builder: &'b mut BytecodeBuilder,
        scope_id: u32,
        input: IndicesReg,
        row_count: u32,
        columns: &'a [Arc<Column>],
        indexes: &'a [Index],
        filter_specs: &mut Vec<FilterSpec>,
        first_value_index: u32,
    ) -> Result<FilterResult> {
        let mut planner = QueryPlanBuilder {
            columns,
            indexes,
            plan: QueryPlan::default(),
            indices_reg: input,
            builder,
            scope_id,
        };
        planner.plan.params.max_row_count = row_count;
        planner.plan.params.estimated_row_count = row_count;
        planner.plan.params.filter_value_count = first_value_index;
        planner.filter(filter_specs)?;
        Ok(FilterResult {
            indices: planner.indices_reg,
            register_inits: planner.plan.register_inits,
            filter_value_count: planner.plan.params.filter_value_count,
        })
    }

    fn column(&self, idx: u32) -> &Column {
        &self.columns[idx as usize]
    }

    // ========================================================================
    // Filter planning
    // ========================================================================

    fn filter(&mut self, specs: &mut Vec<FilterSpec>) -> Result<()> {
        // Most selective and cheapest first.
        let columns = self.columns;
        specs.sort_by_key(|fs| filter_preference(fs, &columns[fs.col as usize]));

        let mut handled = vec![false; specs.len()];

        // Phase 1: sorted constraints narrow the contiguous range.
        for i in 0..specs.len() {
            if handled[i] {
                continue;
            }
            if !specs[i].op.is_non_null_op() || specs[i].op == Op::In {
                continue;
            }
            if self.try_sorted_constraint(&mut specs[i]) {
                handled[i] = true;
            }
        }

        // Phase 2: the index covering the longest prefix of unhandled
        // equality filters.
        if let Some(best) = self.best_index(specs, &handled) {
            self.index_constraints(specs, &mut handled, best);
        }

        // Phase 3: everything else.
        for i in 0..specs.len() {
            if handled[i] {
                continue;
            }
            let col_idx = specs[i].col;
            let ct = self.column(col_idx).storage_type();
            let op = specs[i].op;

            if op == Op::In {
                self.in_constraint(&mut specs[i], ct);
                continue;
            }
            if let Some(null_op) = match op {
                Op::IsNull => Some(NullOp::IsNull),
                Op::IsNotNull => Some(NullOp::IsNotNull),
                _ => None,
            } {
                self.null_constraint(null_op, &mut specs[i]);
                continue;
            }

            if !ct.is_string() {
                match NonStringOp::from_op(op) {
                    Some(ns_op) => {
                        let result = self.cast_filter_value(&mut specs[i], ct);
                        self.non_string_constraint(col_idx, ct, ns_op, result);
                    }
                    // Glob/Regex against a numeric column can never match.
                    None => self.set_guaranteed_to_be_empty(),
                }
                continue;
            }

            let s_op = StringOp::from_op(op).unwrap_or_else(|| unreachable!());
            let result = self.cast_filter_value(&mut specs[i], ct);
            self.string_constraint(col_idx, s_op, result)?;
        }
        Ok(())
    }

    fn try_sorted_constraint(&mut self, fs: &mut FilterSpec) -> bool {
        let col = self.column(fs.col);
        let ct = col.storage_type();
        let sort_state = col.sort_state;
        let duplicate_state = col.duplicate_state;
        let is_small_value_eq = col.specialized.is_small_value_eq();
        if !col.nullability().is_non_null() || sort_state == SortState::Unsorted {
            return false;
        }
        if !fs.op.is_range_op() {
            return false;
        }
        // Sorted constraints always run first, so the candidate set must
        // still be the initial range.
        let range_reg = match self.indices_reg {
            IndicesReg::Range(r) => r,
            IndicesReg::Span(_) => unreachable!("sorted constraint after materialization"),
        };

        let op = fs.op;
        let value_reg = self.cast_filter_value(fs, ct);

        if ct == StorageType::Uint32 && sort_state == SortState::SetIdSorted && op.is_eq() {
            let storage = self.storage_register_for(fs.col, ct);
            let bc = self.add_opcode(
                opcode::UINT32_SET_ID_SORTED_EQ,
                RowCountModifier::EqualityFilter(duplicate_state),
            );
            ops::Uint32SetIdSortedEqArgs {
                storage_register: storage,
                val_register: value_reg,
                update_register: range_reg,
            }
            .encode(bc);
            return true;
        }

        if is_small_value_eq && op.is_eq() {
            let bv = self.small_value_eq_bv_register_for(fs.col);
            let popcount = self.small_value_eq_popcount_register_for(fs.col);
            let bc = self.add_opcode(
                opcode::SPECIALIZED_STORAGE_SMALL_VALUE_EQ,
                RowCountModifier::EqualityFilter(duplicate_state),
            );
            ops::SpecializedStorageSmallValueEqArgs {
                small_value_bv_register: bv,
                small_value_popcount_register: popcount,
                val_register: value_reg,
                update_register: range_reg,
            }
            .encode(bc);
            return true;
        }

        let (bound, range_op) = sorted_filter_args(op);
        let modifier = if op.is_eq() {
            RowCountModifier::EqualityFilter(duplicate_state)
        } else {
            RowCountModifier::NonEqualityFilter
        };
        let storage = self.storage_register_for(fs.col, ct);
        let bc = self.add_opcode(opcode::sorted_filter(ct, range_op), modifier);
        ops::SortedFilterArgs {
            storage_register: storage,
            val_register: value_reg,
            update_register: range_reg,
            write_result_to: bound.index(),
        }
        .encode(bc);
        true
    }

    fn best_index(&self, specs: &[FilterSpec], handled: &[bool]) -> Option<BestIndex> {
        // With at most one candidate row an index cannot help.
        if self.plan.params.max_row_count <= 1 {
            return None;
        }
        let mut best: Option<BestIndex> = None;
        for (i, index) in self.indexes.iter().enumerate() {
            let mut covered = Vec::new();
            for &column in index.columns() {
                let found = specs.iter().enumerate().find(|(spec_idx, spec)| {
                    !handled[*spec_idx] && spec.col == column && spec.op.is_eq()
                });
                match found {
                    Some((spec_idx, _)) => covered.push(spec_idx as u32),
                    None => break,
                }
            }
            if covered.len() > best.as_ref().map_or(0, |b| b.spec_idxs.len()) {
                best = Some(BestIndex {
                    index_idx: i as u32,
                    spec_idxs: covered,
                });
            }
        }
        best
    }

    fn index_constraints(
        &mut self,
        specs: &mut [FilterSpec],
        handled: &mut [bool],
        best: BestIndex,
    ) {
        let mut source = self.index_register_for(best.index_idx);
        let dest = self.builder.allocate_register::<Span>();
        for &spec_idx in &best.spec_idxs {
            let fs = &mut specs[spec_idx as usize];
            let col_idx = fs.col;
            let column = self.column(col_idx);
            let ct = column.storage_type();
            let nullability = column.nullability();
            let duplicate_state = column.duplicate_state;
            let value_reg = self.cast_filter_value(fs, ct);
            let popcount = if nullability.is_sparse() {
                self.prefix_popcount_register_for(col_idx)
            } else {
                // Unwritten register; the interpreter treats it as absent.
                self.builder.allocate_register::<Slab<u32>>()
            };
            let storage = self.storage_register_for(col_idx, ct);
            let null_bv = self.null_bv_register_for(col_idx);
            let bc = self.add_opcode(
                opcode::indexed_filter_eq(ct, nullability.collapse()),
                RowCountModifier::EqualityFilter(duplicate_state),
            );
            ops::IndexedFilterEqArgs {
                storage_register: storage,
                null_bv_register: null_bv,
                filter_value_reg: value_reg,
                popcount_register: popcount,
                source_register: source,
                dest_register: dest,
            }
            .encode(bc);
            // Subsequent filters narrow the narrowed span.
            source = dest;
            handled[spec_idx as usize] = true;
        }

        let range_reg = match self.indices_reg {
            IndicesReg::Range(r) => r,
            IndicesReg::Span(_) => unreachable!("index constraints require a range"),
        };
        let output_slab = self.builder.allocate_register::<Slab<u32>>();
        let output_span = self.builder.allocate_register::<Span>();
        {
            let size = self.plan.params.max_row_count;
            let bc = self.add_opcode(opcode::ALLOCATE_INDICES, RowCountModifier::Unchanged);
            ops::AllocateIndicesArgs {
                size,
                dest_slab_register: output_slab,
                dest_span_register: output_span,
            }
            .encode(bc);
        }
        {
            let bc = self.add_opcode(
                opcode::COPY_SPAN_INTERSECTING_RANGE,
                RowCountModifier::Unchanged,
            );
            ops::CopySpanIntersectingRangeArgs {
                source_register: dest,
                source_range_register: range_reg,
                update_register: output_span,
            }
            .encode(bc);
        }
        self.indices_reg = IndicesReg::Span(output_span);
    }

    fn in_constraint(&mut self, fs: &mut FilterSpec, ct: StorageType) {
        let value_list = self
            .builder
            .allocate_register::<crate::vdbe::value::CastFilterValueListResult>();
        {
            let fval_handle = self.plan.params.filter_value_count;
            let bc = self.add_opcode(
                opcode::cast_filter_value_list(ct),
                RowCountModifier::Unchanged,
            );
            ops::CastFilterValueListArgs {
                fval_handle,
                write_register: value_list,
                op: Op::Eq.index(),
            }
            .encode(bc);
            fs.value_index = Some(self.plan.params.filter_value_count);
            self.plan.params.filter_value_count += 1;
        }
        let update = self.ensure_indices_are_in_slab();
        self.prune_null_indices(fs.col, update);
        let source = self.translate_non_null_indices(fs.col, update, false);
        {
            let storage = self.storage_register_for(fs.col, ct);
            let bc = self.add_opcode(opcode::in_filter(ct), RowCountModifier::NonEqualityFilter);
            ops::InArgs {
                storage_register: storage,
                value_list_register: value_list,
                source_register: source,
                update_register: update,
            }
            .encode(bc);
        }
        self.maybe_release_scratch();
    }

    fn null_constraint(&mut self, op: NullOp, fs: &mut FilterSpec) {
        // Assigned even when no bytecode is needed, so the caller knows the
        // constraint was absorbed.
        fs.value_index = Some(self.plan.params.filter_value_count);
        self.plan.params.filter_value_count += 1;

        let nullability = self.column(fs.col).nullability();
        if nullability.is_non_null() {
            if op == NullOp::IsNull {
                self.set_guaranteed_to_be_empty();
            }
            return;
        }
        let indices = self.ensure_indices_are_in_slab();
        let null_bv = self.null_bv_register_for(fs.col);
        let bc = self.add_opcode(opcode::null_filter(op), RowCountModifier::NonEqualityFilter);
        ops::NullFilterArgs {
            null_bv_register: null_bv,
            update_register: indices,
        }
        .encode(bc);
    }

    fn non_string_constraint(
        &mut self,
        col_idx: u32,
        ct: StorageType,
        op: NonStringOp,
        result: RegHandle<CastFilterValueResult>,
    ) {
        let column = self.column(col_idx);
        let duplicate_state = column.duplicate_state;
        let non_null = column.nullability().is_non_null();
        if matches!(self.indices_reg, IndicesReg::Range(_)) && op == NonStringOp::Eq && non_null {
            // Id equality would have been handled by the sorted phase.
            debug_assert!(!ct.is_id());
            self.add_linear_filter_eq(col_idx, ct, result);
            return;
        }
        let update = self.ensure_indices_are_in_slab();
        self.prune_null_indices(col_idx, update);
        let source = self.translate_non_null_indices(col_idx, update, false);
        {
            let modifier = if op == NonStringOp::Eq {
                RowCountModifier::EqualityFilter(duplicate_state)
            } else {
                RowCountModifier::NonEqualityFilter
            };
            let storage = self.storage_register_for(col_idx, ct);
            let bc = self.add_opcode(opcode::non_string_filter(ct, op), modifier);
            ops::NonStringFilterArgs {
                storage_register: storage,
                val_register: result,
                source_register: source,
                update_register: update,
            }
            .encode(bc);
        }
        self.maybe_release_scratch();
    }

    fn string_constraint(
        &mut self,
        col_idx: u32,
        op: StringOp,
        result: RegHandle<CastFilterValueResult>,
    ) -> Result<()> {
        let column = self.column(col_idx);
        let duplicate_state = column.duplicate_state;
        let non_null = column.nullability().is_non_null();
        if op == StringOp::Eq && matches!(self.indices_reg, IndicesReg::Range(_)) && non_null {
            self.add_linear_filter_eq(col_idx, StorageType::String, result);
            return Ok(());
        }
        #[cfg(not(feature = "regex"))]
        if op == StringOp::Regex {
            return Err(crate::error::Error::with_message(
                crate::error::ErrorCode::Unsupported,
                "regex filters require the `regex` feature",
            ));
        }
        let update = self.ensure_indices_are_in_slab();
        self.prune_null_indices(col_idx, update);
        let source = self.translate_non_null_indices(col_idx, update, false);
        {
            let modifier = if op == StringOp::Eq {
                RowCountModifier::EqualityFilter(duplicate_state)
            } else {
                RowCountModifier::NonEqualityFilter
            };
            let storage = self.storage_register_for(col_idx, StorageType::String);
            let bc = self.add_opcode(opcode::string_filter(op), modifier);
            ops::StringFilterArgs {
                storage_register: storage,
                val_register: result,
                source_register: source,
                update_register: update,
            }
            .encode(bc);
        }
        self.maybe_release_scratch();
        Ok(())
    }

    // First equality on a non-null column while the candidate set is still a
    // range: scan once, writing matches into a fresh span, instead of
    // materializing the whole range.
    fn add_linear_filter_eq(
        &mut self,
        col_idx: u32,
        ct: StorageType,
        result: RegHandle<CastFilterValueResult>,
    ) {
        let range_reg = match self.indices_reg {
            IndicesReg::Range(r) => r,
            IndicesReg::Span(_) => unreachable!("linear filter requires a range"),
        };
        let duplicate_state = self.column(col_idx).duplicate_state;
        let slab = self.builder.allocate_register::<Slab<u32>>();
        let span = self.builder.allocate_register::<Span>();
        {
            let size = self.plan.params.max_row_count;
            let bc = self.add_opcode(opcode::ALLOCATE_INDICES, RowCountModifier::Unchanged);
            ops::AllocateIndicesArgs {
                size,
                dest_slab_register: slab,
                dest_span_register: span,
            }
            .encode(bc);
        }
        {
            let storage = self.storage_register_for(col_idx, ct);
            let bc = self.add_opcode(
                opcode::linear_filter_eq(ct),
                RowCountModifier::EqualityFilter(duplicate_state),
            );
            ops::LinearFilterEqArgs {
                storage_register: storage,
                filter_value_reg: result,
                popcount_register: RegHandle::none(),
                source_register: range_reg,
                update_register: span,
            }
            .encode(bc);
        }
        self.indices_reg = IndicesReg::Span(span);
    }

    // ========================================================================
    // Distinct / sort / min-max
    // ========================================================================

    fn distinct(&mut self, distinct_specs: &[DistinctSpec]) {
        if distinct_specs.is_empty() {
            return;
        }
        let params: Vec<RowLayoutParams> = distinct_specs
            .iter()
            .map(|spec| RowLayoutParams {
                column: spec.col,
                replace_string_with_rank: false,
                invert_copied_bits: false,
            })
            .collect();
        let stride = self.row_layout_stride(&params);
        let indices = self.ensure_indices_are_in_slab();
        let buffer = self.copy_to_row_layout(stride, indices, RegHandle::none(), &params);
        let bc = self.add_opcode(opcode::DISTINCT, RowCountModifier::NonEqualityFilter);
        ops::DistinctArgs {
            buffer_register: buffer,
            total_row_stride: stride as u32,
            indices_register: indices,
        }
        .encode(bc);
    }

    fn sort(&mut self, sort_specs: &[SortSpec]) {
        if sort_specs.is_empty() {
            return;
        }

        // A single key over a column already sorted the right way needs no
        // sort at all; the reversed direction is just a reverse.
        if sort_specs.len() == 1 {
            let spec = sort_specs[0];
            let col = self.column(spec.col);
            if col.nullability().is_non_null() && col.sort_state.is_any_sorted() {
                match spec.direction {
                    SortDirection::Ascending => return,
                    SortDirection::Descending => {
                        let indices = self.ensure_indices_are_in_slab();
                        let bc = self.add_opcode(opcode::REVERSE, RowCountModifier::Unchanged);
                        ops::ReverseArgs {
                            update_register: indices,
                        }
                        .encode(bc);
                        return;
                    }
                }
            }
        }

        let indices = self.ensure_indices_are_in_slab();

        let has_string_keys = sort_specs
            .iter()
            .any(|spec| self.column(spec.col).storage_type().is_string());
        let mut rank_map: RegHandle<StringRankMap> = RegHandle::none();
        if has_string_keys {
            rank_map = self.builder.allocate_register::<StringRankMap>();
            {
                let bc = self.add_opcode(opcode::INIT_RANK_MAP, RowCountModifier::Unchanged);
                ops::InitRankMapArgs {
                    dest_register: rank_map,
                }
                .encode(bc);
            }

            // Collect each string key's distinct ids. Nullable columns get
            // their indices copied to scratch, null-pruned and translated so
            // the main index set is untouched.
            for spec in sort_specs {
                let column = self.column(spec.col);
                if !column.storage_type().is_string() {
                    continue;
                }
                let nullability = column.nullability();
                let translated = if nullability.is_non_null() {
                    indices
                } else {
                    let scratch = self.get_or_create_scratch_span();
                    {
                        let bc = self.add_opcode(opcode::STRIDE_COPY, RowCountModifier::Unchanged);
                        ops::StrideCopyArgs {
                            source_register: indices,
                            update_register: scratch,
                            stride: 1,
                        }
                        .encode(bc);
                    }
                    self.prune_null_indices(spec.col, scratch);
                    let translated = self.translate_non_null_indices(spec.col, scratch, true);
                    debug_assert_eq!(translated.index, scratch.index);
                    translated
                };
                {
                    let storage = self.storage_register_for(spec.col, StorageType::String);
                    let bc = self.add_opcode(
                        opcode::COLLECT_ID_INTO_RANK_MAP,
                        RowCountModifier::Unchanged,
                    );
                    ops::CollectIdIntoRankMapArgs {
                        storage_register: storage,
                        source_register: translated,
                        rank_map_register: rank_map,
                    }
                    .encode(bc);
                }
                self.maybe_release_scratch();
            }

            let bc = self.add_opcode(opcode::FINALIZE_RANKS_IN_MAP, RowCountModifier::Unchanged);
            ops::FinalizeRanksInMapArgs {
                update_register: rank_map,
            }
            .encode(bc);
        }

        let params: Vec<RowLayoutParams> = sort_specs
            .iter()
            .map(|spec| RowLayoutParams {
                column: spec.col,
                replace_string_with_rank: self.column(spec.col).storage_type().is_string(),
                invert_copied_bits: spec.direction == SortDirection::Descending,
            })
            .collect();
        let stride = self.row_layout_stride(&params);
        let buffer = self.copy_to_row_layout(stride, indices, rank_map, &params);
        let bc = self.add_opcode(opcode::SORT_ROW_LAYOUT, RowCountModifier::Unchanged);
        ops::SortRowLayoutArgs {
            buffer_register: buffer,
            total_row_stride: stride as u32,
            indices_register: indices,
        }
        .encode(bc);
    }

    fn can_use_min_max(&self, sort_specs: &[SortSpec], limit: &LimitSpec) -> bool {
        sort_specs.len() == 1
            && self
                .column(sort_specs[0].col)
                .nullability()
                .is_non_null()
            && limit.limit == Some(1)
            && limit.offset.unwrap_or(0) == 0
    }

    fn min_max(&mut self, spec: &SortSpec) {
        let ct = self.column(spec.col).storage_type();
        let mm = match spec.direction {
            SortDirection::Ascending => MinMaxOp::Min,
            SortDirection::Descending => MinMaxOp::Max,
        };
        let indices = self.ensure_indices_are_in_slab();
        let storage = self.storage_register_for(spec.col, ct);
        let bc = self.add_opcode(opcode::find_min_max_index(ct, mm), RowCountModifier::OneRow);
        ops::FindMinMaxIndexArgs {
            storage_register: storage,
            update_register: indices,
        }
        .encode(bc);
    }

    // ========================================================================
    // Output shaping
    // ========================================================================

    fn output(&mut self, limit: LimitSpec, cols_used: u64) {
        struct ColAndOffset {
            col: u32,
            offset: u32,
        }

        let mut null_cols: Vec<ColAndOffset> = Vec::new();
        self.plan.params.output_per_row = 1;
        for _ in 0..self.columns.len() {
            self.plan.col_to_output_offset.push(0);
        }

        for i in 0..self.columns.len() as u32 {
            // Columns at index >= 63 share the 64th bit.
            let mask = 1u64 << i.min(63);
            if cols_used & mask == 0 {
                continue;
            }
            if self.column(i).nullability().is_non_null() {
                // Directly addressed by row index.
                continue;
            }
            let offset = self.plan.params.output_per_row;
            self.plan.params.output_per_row += 1;
            self.plan.col_to_output_offset[i as usize] = offset;
            null_cols.push(ColAndOffset { col: i, offset });
        }

        let in_memory_indices = self.ensure_indices_are_in_slab();
        if limit.limit.is_some() || limit.offset.is_some() {
            let offset = limit.offset.unwrap_or(0);
            let limit_value = limit.limit.unwrap_or(u32::MAX);
            let bc = self.add_opcode(
                opcode::LIMIT_OFFSET_INDICES,
                RowCountModifier::LimitOffset {
                    limit: limit_value,
                    offset,
                },
            );
            ops::LimitOffsetIndicesArgs {
                offset_value: offset,
                limit_value,
                update_register: in_memory_indices,
            }
            .encode(bc);
        }

        let output_register;
        if self.plan.params.output_per_row > 1 {
            let slab = self.builder.allocate_register::<Slab<u32>>();
            let span = self.builder.allocate_register::<Span>();
            {
                let size = self.plan.params.max_row_count * self.plan.params.output_per_row;
                let bc = self.add_opcode(opcode::ALLOCATE_INDICES, RowCountModifier::Unchanged);
                ops::AllocateIndicesArgs {
                    size,
                    dest_slab_register: slab,
                    dest_span_register: span,
                }
                .encode(bc);
            }
            {
                let stride = self.plan.params.output_per_row;
                let bc = self.add_opcode(opcode::STRIDE_COPY, RowCountModifier::Unchanged);
                ops::StrideCopyArgs {
                    source_register: in_memory_indices,
                    update_register: span,
                    stride,
                }
                .encode(bc);
            }
            for ColAndOffset { col, offset } in null_cols {
                let stride = self.plan.params.output_per_row;
                if self.column(col).nullability().is_sparse() {
                    let popcount = self.prefix_popcount_register_for(col);
                    let null_bv = self.null_bv_register_for(col);
                    let bc =
                        self.add_opcode(opcode::STRIDE_TRANSLATE_SPARSE, RowCountModifier::Unchanged);
                    ops::StrideTranslateAndCopySparseNullIndicesArgs {
                        null_bv_register: null_bv,
                        popcount_register: popcount,
                        update_register: span,
                        offset,
                        stride,
                    }
                    .encode(bc);
                } else {
                    let null_bv = self.null_bv_register_for(col);
                    let bc =
                        self.add_opcode(opcode::STRIDE_COPY_DENSE, RowCountModifier::Unchanged);
                    ops::StrideCopyDenseNullIndicesArgs {
                        null_bv_register: null_bv,
                        update_register: span,
                        offset,
                        stride,
                    }
                    .encode(bc);
                }
            }
            output_register = span;
        } else {
            debug_assert!(null_cols.is_empty());
            output_register = in_memory_indices;
        }
        self.plan.params.output_register = output_register;
    }

    // ========================================================================
    // Row layout emission
    // ========================================================================

    fn row_layout_stride(&self, params: &[RowLayoutParams]) -> u16 {
        debug_assert!(!params.is_empty());
        let mut stride = 0u16;
        for p in params {
            let col = self.column(p.column);
            let null_byte = !col.nullability().is_non_null() as u16;
            stride += null_byte + col.storage_type().row_layout_size() as u16;
        }
        stride
    }

    fn copy_to_row_layout(
        &mut self,
        stride: u16,
        indices: RegHandle<Span>,
        rank_map: RegHandle<StringRankMap>,
        params: &[RowLayoutParams],
    ) -> RegHandle<Slab<u8>> {
        let buffer = self.builder.allocate_register::<Slab<u8>>();
        {
            let buffer_size = self.plan.params.max_row_count * stride as u32;
            let bc = self.add_opcode(
                opcode::ALLOCATE_ROW_LAYOUT_BUFFER,
                RowCountModifier::Unchanged,
            );
            ops::AllocateRowLayoutBufferArgs {
                buffer_size,
                dest_buffer_register: buffer,
            }
            .encode(bc);
        }
        let mut offset = 0u16;
        for p in params {
            let col = self.column(p.column);
            let ct = col.storage_type();
            let nullability = col.nullability();
            let popcount = if nullability.is_sparse() {
                self.prefix_popcount_register_for(p.column)
            } else {
                RegHandle::none()
            };
            let storage = self.storage_register_for(p.column, ct);
            let null_bv = self.null_bv_register_for(p.column);
            let rank_map_register = if p.replace_string_with_rank {
                rank_map
            } else {
                RegHandle::none()
            };
            {
                let bc = self.add_opcode(
                    opcode::copy_to_row_layout(ct, nullability.collapse()),
                    RowCountModifier::Unchanged,
                );
                ops::CopyToRowLayoutArgs {
                    storage_register: storage,
                    null_bv_register: null_bv,
                    source_indices_register: indices,
                    dest_buffer_register: buffer,
                    row_layout_offset: offset,
                    row_layout_stride: stride,
                    invert_copied_bits: p.invert_copied_bits as u32,
                    popcount_register: popcount,
                    rank_map_register,
                }
                .encode(bc);
            }
            offset += !nullability.is_non_null() as u16 + ct.row_layout_size() as u16;
        }
        debug_assert_eq!(offset, stride);
        buffer
    }

    // ========================================================================
    // Index set plumbing
    // ========================================================================

    // Materializes the candidate range into an index slab if it is not
    // already one.
    fn ensure_indices_are_in_slab(&mut self) -> RegHandle<Span> {
        let range_reg = match self.indices_reg {
            IndicesReg::Span(span) => return span,
            IndicesReg::Range(r) => r,
        };
        let slab = self.builder.allocate_register::<Slab<u32>>();
        let span = self.builder.allocate_register::<Span>();
        {
            let size = self.plan.params.max_row_count;
            let bc = self.add_opcode(opcode::ALLOCATE_INDICES, RowCountModifier::Unchanged);
            ops::AllocateIndicesArgs {
                size,
                dest_slab_register: slab,
                dest_span_register: span,
            }
            .encode(bc);
        }
        {
            let bc = self.add_opcode(opcode::IOTA, RowCountModifier::Unchanged);
            ops::IotaArgs {
                source_register: range_reg,
                update_register: span,
            }
            .encode(bc);
        }
        self.indices_reg = IndicesReg::Span(span);
        span
    }

    // A filter that statically matches nothing.
    fn set_guaranteed_to_be_empty(&mut self) {
        let slab = self.builder.allocate_register::<Slab<u32>>();
        let span = self.builder.allocate_register::<Span>();
        let bc = self.add_opcode(opcode::ALLOCATE_INDICES, RowCountModifier::ZeroRow);
        ops::AllocateIndicesArgs {
            size: 0,
            dest_slab_register: slab,
            dest_span_register: span,
        }
        .encode(bc);
        self.indices_reg = IndicesReg::Span(span);
    }

    fn prune_null_indices(&mut self, col: u32, indices: RegHandle<Span>) {
        if self.column(col).nullability().is_non_null() {
            return;
        }
        let null_bv = self.null_bv_register_for(col);
        let bc = self.add_opcode(
            opcode::null_filter(NullOp::IsNotNull),
            RowCountModifier::NonEqualityFilter,
        );
        ops::NullFilterArgs {
            null_bv_register: null_bv,
            update_register: indices,
        }
        .encode(bc);
    }

    // Translates non-null row indices to storage indices for sparse columns;
    // in place or into the scratch span.
    fn translate_non_null_indices(
        &mut self,
        col: u32,
        indices: RegHandle<Span>,
        in_place: bool,
    ) -> RegHandle<Span> {
        if !self.column(col).nullability().is_sparse() {
            return indices;
        }
        let update = if in_place {
            indices
        } else {
            self.get_or_create_scratch_span()
        };
        let popcount = self.prefix_popcount_register_for(col);
        let null_bv = self.null_bv_register_for(col);
        let bc = self.add_opcode(
            opcode::TRANSLATE_SPARSE_NULL_INDICES,
            RowCountModifier::Unchanged,
        );
        ops::TranslateSparseNullIndicesArgs {
            null_bv_register: null_bv,
            popcount_register: popcount,
            source_register: indices,
            update_register: update,
        }
        .encode(bc);
        update
    }

    fn get_or_create_scratch_span(&mut self) -> RegHandle<Span> {
        let scratch = self.builder.get_or_create_scratch_registers(0);
        {
            let size = self.plan.params.max_row_count;
            let bc = self.add_opcode(opcode::ALLOCATE_INDICES, RowCountModifier::Unchanged);
            ops::AllocateIndicesArgs {
                size,
                dest_slab_register: scratch.slab,
                dest_span_register: scratch.span,
            }
            .encode(bc);
        }
        self.builder.mark_scratch_in_use(0);
        scratch.span
    }

    fn maybe_release_scratch(&mut self) {
        self.builder.release_scratch(0);
    }

    // ========================================================================
    // Cached registers and their init descriptors
    // ========================================================================

    fn storage_register_for(&mut self, col: u32, ty: StorageType) -> RegHandle<StoragePtr> {
        let (reg, inserted) = self.builder.get_or_allocate_cached_register::<StoragePtr>(
            self.scope_id,
            CachedRegKind::Storage,
            col,
        );
        if inserted {
            self.plan.register_inits.push(RegisterInit {
                dest_register: reg.index,
                kind: storage_init_kind(ty),
                source_index: col as u16,
            });
        }
        reg
    }

    fn null_bv_register_for(&mut self, col: u32) -> RegHandle<NullBvPtr> {
        let (reg, inserted) = self.builder.get_or_allocate_cached_register::<NullBvPtr>(
            self.scope_id,
            CachedRegKind::NullBv,
            col,
        );
        if inserted {
            self.plan.register_inits.push(RegisterInit {
                dest_register: reg.index,
                kind: RegisterInitKind::NullBitvector,
                source_index: col as u16,
            });
        }
        reg
    }

    fn prefix_popcount_register_for(&mut self, col: u32) -> RegHandle<Slab<u32>> {
        let (reg, inserted) = self.builder.get_or_allocate_cached_register::<Slab<u32>>(
            self.scope_id,
            CachedRegKind::PrefixPopcount,
            col,
        );
        if inserted {
            let null_bv = self.null_bv_register_for(col);
            let bc = self.add_opcode(opcode::PREFIX_POPCOUNT, RowCountModifier::Unchanged);
            ops::PrefixPopcountArgs {
                null_bv_register: null_bv,
                dest_register: reg,
            }
            .encode(bc);
        }
        reg
    }

    fn small_value_eq_bv_register_for(&mut self, col: u32) -> RegHandle<NullBvPtr> {
        let (reg, inserted) = self.builder.get_or_allocate_cached_register::<NullBvPtr>(
            self.scope_id,
            CachedRegKind::SmallValueEqBv,
            col,
        );
        if inserted {
            self.plan.register_inits.push(RegisterInit {
                dest_register: reg.index,
                kind: RegisterInitKind::SmallValueEqBitvector,
                source_index: col as u16,
            });
        }
        reg
    }

    fn small_value_eq_popcount_register_for(&mut self, col: u32) -> RegHandle<Slab<u32>> {
        let (reg, inserted) = self.builder.get_or_allocate_cached_register::<Slab<u32>>(
            self.scope_id,
            CachedRegKind::SmallValueEqPopcount,
            col,
        );
        if inserted {
            self.plan.register_inits.push(RegisterInit {
                dest_register: reg.index,
                kind: RegisterInitKind::SmallValueEqPopcount,
                source_index: col as u16,
            });
        }
        reg
    }

    fn index_register_for(&mut self, pos: u32) -> RegHandle<Span> {
        let (reg, inserted) = self.builder.get_or_allocate_cached_register::<Span>(
            self.scope_id,
            CachedRegKind::IndexPerm,
            pos,
        );
        if inserted {
            self.plan.register_inits.push(RegisterInit {
                dest_register: reg.index,
                kind: RegisterInitKind::IndexVector,
                source_index: pos as u16,
            });
        }
        reg
    }

    fn cast_filter_value(
        &mut self,
        fs: &mut FilterSpec,
        ct: StorageType,
    ) -> RegHandle<CastFilterValueResult> {
        let value_reg = self.builder.allocate_register::<CastFilterValueResult>();
        let fval_handle = self.plan.params.filter_value_count;
        let op = fs.op;
        let bc = self.add_opcode(opcode::cast_filter_value(ct), RowCountModifier::Unchanged);
        ops::CastFilterValueArgs {
            fval_handle,
            write_register: value_reg,
            op: op.index(),
        }
        .encode(bc);
        fs.value_index = Some(fval_handle);
        self.plan.params.filter_value_count += 1;
        value_reg
    }

    // ========================================================================
    // Cost and row-count accounting
    // ========================================================================

    fn add_opcode(&mut self, option: u32, rc: RowCountModifier) -> &mut Bytecode {
        const FIXED_BYTECODE_COST: f64 = 5.0;
        let params = &mut self.plan.params;
        let est = params.estimated_row_count as f64;
        let cost = ops::opcode_cost(option);
        match cost {
            Cost::Fixed(c) => params.estimated_cost += c,
            Cost::LogPerRow(c) => {
                params.estimated_cost += if params.estimated_row_count == 0 {
                    FIXED_BYTECODE_COST
                } else {
                    c * est.log2()
                };
            }
            Cost::LinearPerRow(c) => {
                params.estimated_cost += if params.estimated_row_count == 0 {
                    FIXED_BYTECODE_COST
                } else {
                    c * est
                };
            }
            Cost::LogLinearPerRow(c) => {
                params.estimated_cost += if params.estimated_row_count == 0 {
                    FIXED_BYTECODE_COST
                } else {
                    c * est * est.log2()
                };
            }
            Cost::PostOperationLinearPerRow(_) => {}
        }

        match rc {
            RowCountModifier::Unchanged => {}
            RowCountModifier::NonEqualityFilter => {
                if params.estimated_row_count > 1 {
                    params.estimated_row_count /= 2;
                }
            }
            RowCountModifier::EqualityFilter(duplicate_state) => match duplicate_state {
                DuplicateState::HasDuplicates => {
                    if params.estimated_row_count > 1 {
                        let est = params.estimated_row_count as f64;
                        let new_count = est / (2.0 * est.log2());
                        params.estimated_row_count = (new_count as u32).max(1);
                    }
                }
                DuplicateState::NoDuplicates => {
                    params.estimated_row_count = params.estimated_row_count.min(1);
                    params.max_row_count = params.max_row_count.min(1);
                }
            },
            RowCountModifier::OneRow => {
                params.estimated_row_count = params.estimated_row_count.min(1);
                params.max_row_count = params.max_row_count.min(1);
            }
            RowCountModifier::ZeroRow => {
                params.estimated_row_count = 0;
                params.max_row_count = 0;
            }
            RowCountModifier::LimitOffset { limit, offset } => {
                let removed = params.max_row_count.min(offset);
                params.max_row_count -= removed;
                params.max_row_count = params.max_row_count.min(limit);
                params.estimated_row_count = params.max_row_count;
            }
        }

        if let Cost::PostOperationLinearPerRow(c) = cost {
            params.estimated_cost += c * params.estimated_row_count as f64;
        }
        self.builder.add_opcode(option)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataframe::column::{NullStorage, Storage};
    use crate::types::Nullability;

    fn col(ty: StorageType, n: Nullability, sort: SortState, dup: DuplicateState) -> Arc<Column> {
        Arc::new(Column::new(
            Storage::with_type(ty),
            NullStorage::with_nullability(n),
            sort,
            dup,
        ))
    }

    #[test]
    fn test_filter_preference_ordering() {
        let id_col = col(
            StorageType::Id,
            Nullability::NonNull,
            SortState::IdSorted,
            DuplicateState::NoDuplicates,
        );
        let setid_col = col(
            StorageType::Uint32,
            Nullability::NonNull,
            SortState::SetIdSorted,
            DuplicateState::HasDuplicates,
        );
        let unsorted_col = col(
            StorageType::Int64,
            Nullability::NonNull,
            SortState::Unsorted,
            DuplicateState::HasDuplicates,
        );
        let eq = |c| FilterSpec::new(c, 0, Op::Eq);
        assert_eq!(filter_preference(&eq(0), &id_col), PREF_ID_EQ);
        assert_eq!(filter_preference(&eq(0), &setid_col), PREF_SET_ID_SORTED_EQ);
        assert_eq!(filter_preference(&eq(0), &unsorted_col), PREF_LEAST);
        let lt = FilterSpec::new(0, 0, Op::Lt);
        assert_eq!(filter_preference(&lt, &id_col), PREF_ID_INEQUALITY);
    }

    #[test]
    fn test_plan_shape_for_simple_eq() {
        // A sorted non-null column filtered by equality should plan a sorted
        // probe on the range, not a scan.
        let columns = vec![col(
            StorageType::Int64,
            Nullability::NonNull,
            SortState::Sorted,
            DuplicateState::HasDuplicates,
        )];
        let mut specs = vec![FilterSpec::new(0, 0, Op::Eq)];
        let plan = QueryPlanBuilder::build(
            100,
            &columns,
            &[],
            &mut specs,
            &[],
            &[],
            LimitSpec::default(),
            1,
        )
        .unwrap();
        let strings = plan.bytecode_to_string();
        assert!(strings.iter().any(|s| s.starts_with("SortedFilter")), "{strings:?}");
        assert_eq!(specs[0].value_index, Some(0));
        assert_eq!(plan.params.filter_value_count, 1);
    }

    #[test]
    fn test_plan_eq_unsorted_uses_linear_filter() {
        let columns = vec![col(
            StorageType::Int64,
            Nullability::NonNull,
            SortState::Unsorted,
            DuplicateState::HasDuplicates,
        )];
        let mut specs = vec![FilterSpec::new(0, 0, Op::Eq)];
        let plan = QueryPlanBuilder::build(
            100,
            &columns,
            &[],
            &mut specs,
            &[],
            &[],
            LimitSpec::default(),
            1,
        )
        .unwrap();
        let strings = plan.bytecode_to_string();
        assert!(
            strings.iter().any(|s| s.starts_with("LinearFilterEq")),
            "{strings:?}"
        );
    }

    #[test]
    fn test_equality_on_no_duplicates_caps_max_rows() {
        let columns = vec![col(
            StorageType::Int64,
            Nullability::NonNull,
            SortState::Sorted,
            DuplicateState::NoDuplicates,
        )];
        let mut specs = vec![FilterSpec::new(0, 0, Op::Eq)];
        let plan = QueryPlanBuilder::build(
            1000,
            &columns,
            &[],
            &mut specs,
            &[],
            &[],
            LimitSpec::default(),
            1,
        )
        .unwrap();
        assert_eq!(plan.max_row_count(), 1);
        assert_eq!(plan.estimated_row_count(), 1);
    }

    #[test]
    fn test_is_null_on_non_null_column_returns_nothing() {
        let columns = vec![col(
            StorageType::Int64,
            Nullability::NonNull,
            SortState::Unsorted,
            DuplicateState::HasDuplicates,
        )];
        let mut specs = vec![FilterSpec::new(0, 0, Op::IsNull)];
        let plan = QueryPlanBuilder::build(
            50,
            &columns,
            &[],
            &mut specs,
            &[],
            &[],
            LimitSpec::default(),
            1,
        )
        .unwrap();
        assert_eq!(plan.max_row_count(), 0);
    }

    #[test]
    fn test_output_per_row_counts_nullable_projections() {
        let columns = vec![
            col(
                StorageType::Int64,
                Nullability::SparseNullWithPopcountAlways,
                SortState::Unsorted,
                DuplicateState::HasDuplicates,
            ),
            col(
                StorageType::Int64,
                Nullability::NonNull,
                SortState::Unsorted,
                DuplicateState::HasDuplicates,
            ),
        ];
        let mut specs = vec![];
        let plan = QueryPlanBuilder::build(
            10,
            &columns,
            &[],
            &mut specs,
            &[],
            &[],
            LimitSpec::default(),
            0b11,
        )
        .unwrap();
        // One slot for the row index plus one for the sparse column.
        assert_eq!(plan.params.output_per_row, 2);
        assert_eq!(plan.col_to_output_offset[0], 1);
        assert_eq!(plan.col_to_output_offset[1], 0);
    }

    #[test]
    fn test_limit_offset_row_counts() {
        let columns = vec![col(
            StorageType::Id,
            Nullability::NonNull,
            SortState::IdSorted,
            DuplicateState::NoDuplicates,
        )];
        let mut specs = vec![];
        let plan = QueryPlanBuilder::build(
            100,
            &columns,
            &[],
            &mut specs,
            &[],
            &[],
            LimitSpec {
                limit: Some(10),
                offset: Some(95),
            },
            1,
        )
        .unwrap();
        assert_eq!(plan.max_row_count(), 5);
    }
}
