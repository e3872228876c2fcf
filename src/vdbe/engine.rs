//! Bytecode interpreter
//!
//! A single-threaded dispatch loop over the instruction stream. Each opcode
//! reads and writes registers; filter opcodes compact candidate index sets,
//! sort opcodes build and order row layouts, and the cast opcodes pull
//! client filter values through the `ValueFetcher`.
//!
//! Register values that reference column data hold column indices which are
//! resolved against a shared-ownership snapshot of the dataframe columns
//! taken when the interpreter is built, so no raw pointers survive in either
//! the plan or the register file and executions keep reading a consistent
//! snapshot even if the source dataframe is mutated afterwards.

use std::sync::Arc;

use crate::dataframe::column::{Column, SpecializedStorage, Storage};
use crate::strings::{StringId, StringPool};
use crate::types::{
    BoundModifier, CollapsedNullability, MinMaxOp, NonStringOp, NullOp, Op, RangeOp, StorageType,
    StringOp,
};
use crate::util::{BitVector, GlobMatcher, Slab};
use crate::vdbe::cast;
use crate::vdbe::ops::*;
use crate::vdbe::registers::{
    NullBvPtr, Range, RegHandle, RegValue, Span, StoragePtr, StringRankMap,
};
use crate::vdbe::sort;
use crate::vdbe::value::{
    CastFilterValueListResult, CastFilterValueResult, CastValue, CastValueList, Validity,
    ValueFetcher,
};

// ============================================================================
// Binary search over index space
// ============================================================================

/// First index in `[b, e)` for which `is_less(i)` is false. `is_less` must be
/// monotone (true prefix, then false).
fn lower_bound_by(b: u32, e: u32, is_less: impl Fn(u32) -> bool) -> u32 {
    let mut lo = b;
    let mut hi = e;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if is_less(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

// ============================================================================
// Interpreter
// ============================================================================

/// Executes a plan's bytecode against a register file.
pub struct Interpreter<'a> {
    bytecode: Vec<Bytecode>,
    registers: Vec<RegValue>,
    // Shared ownership pins the column data a plan reads; a dataframe
    // mutated after cursor preparation copies-on-write and leaves this
    // snapshot intact.
    columns: Vec<Arc<Column>>,
    pool: &'a StringPool,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        bytecode: &[Bytecode],
        register_count: u32,
        columns: &[Arc<Column>],
        pool: &'a StringPool,
    ) -> Self {
        let mut registers = Vec::with_capacity(register_count as usize);
        registers.resize_with(register_count as usize, RegValue::default);
        Self {
            bytecode: bytecode.to_vec(),
            registers,
            columns: columns.to_vec(),
            pool,
        }
    }

    /// Writes a register directly. Used by cursors and the tree transformer
    /// to materialize register-init descriptors before execution.
    pub fn set_register(&mut self, index: u32, value: RegValue) {
        self.registers[index as usize] = value;
    }

    /// Runs every instruction in order.
    pub fn execute<F: ValueFetcher>(&mut self, fetcher: &mut F) {
        for i in 0..self.bytecode.len() {
            let bc = self.bytecode[i];
            self.step(&bc, fetcher);
        }
    }

    /// The elements of the span held in `h`. Valid until the next execution.
    pub fn span_elements(&self, h: RegHandle<Span>) -> &[u32] {
        let span = self.span(h);
        self.span_slice(span)
    }

    // ========================================================================
    // Register access helpers
    // ========================================================================

    fn range(&self, h: RegHandle<Range>) -> Range {
        match &self.registers[h.index as usize] {
            RegValue::Range(r) => *r,
            other => unreachable!("register {} is not a range: {other:?}", h.index),
        }
    }

    fn set_range(&mut self, h: RegHandle<Range>, r: Range) {
        self.registers[h.index as usize] = RegValue::Range(r);
    }

    fn span(&self, h: RegHandle<Span>) -> Span {
        match &self.registers[h.index as usize] {
            RegValue::Span(s) => *s,
            // An index permutation register reads as a span over its whole
            // buffer.
            RegValue::IndexPerm(p) => Span {
                buffer: h.index,
                b: 0,
                e: p.len() as u32,
            },
            other => unreachable!("register {} is not a span: {other:?}", h.index),
        }
    }

    fn set_span(&mut self, h: RegHandle<Span>, s: Span) {
        self.registers[h.index as usize] = RegValue::Span(s);
    }

    fn buffer(&self, reg: u32) -> &[u32] {
        match &self.registers[reg as usize] {
            RegValue::Slab(s) => s.as_slice(),
            RegValue::IndexPerm(p) => p.as_slice(),
            other => unreachable!("register {reg} is not an index buffer: {other:?}"),
        }
    }

    fn span_slice(&self, s: Span) -> &[u32] {
        &self.buffer(s.buffer)[s.b as usize..s.e as usize]
    }

    // Takes an owned u32 buffer out of its register for mutation; must be
    // paired with `put_buffer`.
    fn take_buffer(&mut self, reg: u32) -> Slab<u32> {
        match std::mem::take(&mut self.registers[reg as usize]) {
            RegValue::Slab(s) => s,
            other => unreachable!("register {reg} is not an owned slab: {other:?}"),
        }
    }

    fn put_buffer(&mut self, reg: u32, slab: Slab<u32>) {
        self.registers[reg as usize] = RegValue::Slab(slab);
    }

    fn take_row_layout(&mut self, h: RegHandle<Slab<u8>>) -> Slab<u8> {
        match std::mem::take(&mut self.registers[h.index as usize]) {
            RegValue::RowLayout(s) => s,
            other => unreachable!("register {} is not a row layout: {other:?}", h.index),
        }
    }

    fn put_row_layout(&mut self, h: RegHandle<Slab<u8>>, slab: Slab<u8>) {
        self.registers[h.index as usize] = RegValue::RowLayout(slab);
    }

    fn row_layout(&self, h: RegHandle<Slab<u8>>) -> &[u8] {
        match &self.registers[h.index as usize] {
            RegValue::RowLayout(s) => s.as_slice(),
            other => unreachable!("register {} is not a row layout: {other:?}", h.index),
        }
    }

    fn cast_result(&self, h: RegHandle<CastFilterValueResult>) -> &CastFilterValueResult {
        match &self.registers[h.index as usize] {
            RegValue::CastResult(r) => r,
            other => unreachable!("register {} is not a cast result: {other:?}", h.index),
        }
    }

    fn storage(&self, h: RegHandle<StoragePtr>) -> Option<&Storage> {
        let col = match &self.registers[h.index as usize] {
            RegValue::Storage(c) => *c,
            other => unreachable!("register {} is not a storage ref: {other:?}", h.index),
        };
        col.map(|c| &self.columns[c as usize].storage)
    }

    // Clones the column Arc behind a storage register (None for Id columns),
    // detaching the data borrow from `self` so filters can compact span
    // registers while reading it.
    fn storage_column(&self, h: RegHandle<StoragePtr>) -> Option<Arc<Column>> {
        let col = match &self.registers[h.index as usize] {
            RegValue::Storage(c) => *c,
            other => unreachable!("register {} is not a storage ref: {other:?}", h.index),
        };
        col.map(|c| self.columns[c as usize].clone())
    }

    fn data_u32(&self, h: RegHandle<StoragePtr>) -> &[u32] {
        match self.storage(h) {
            Some(Storage::Uint32(v)) => v,
            other => unreachable!("storage is not Uint32: {other:?}"),
        }
    }

    fn data_i32(&self, h: RegHandle<StoragePtr>) -> &[i32] {
        match self.storage(h) {
            Some(Storage::Int32(v)) => v,
            other => unreachable!("storage is not Int32: {other:?}"),
        }
    }

    fn data_i64(&self, h: RegHandle<StoragePtr>) -> &[i64] {
        match self.storage(h) {
            Some(Storage::Int64(v)) => v,
            other => unreachable!("storage is not Int64: {other:?}"),
        }
    }

    fn data_f64(&self, h: RegHandle<StoragePtr>) -> &[f64] {
        match self.storage(h) {
            Some(Storage::Double(v)) => v,
            other => unreachable!("storage is not Double: {other:?}"),
        }
    }

    fn data_str(&self, h: RegHandle<StoragePtr>) -> &[StringId] {
        match self.storage(h) {
            Some(Storage::String(v)) => v,
            other => unreachable!("storage is not String: {other:?}"),
        }
    }

    fn null_bv(&self, h: RegHandle<NullBvPtr>) -> Option<&BitVector> {
        if h.is_none() {
            return None;
        }
        let col = match &self.registers[h.index as usize] {
            RegValue::NullBv(c) => *c,
            RegValue::Empty => return None,
            other => unreachable!("register {} is not a null bitvector: {other:?}", h.index),
        };
        self.columns[col as usize].nulls.bit_vector()
    }

    fn popcount(&self, h: RegHandle<Slab<u32>>) -> Option<&[u32]> {
        if h.is_none() {
            return None;
        }
        match &self.registers[h.index as usize] {
            RegValue::Popcount(s) => Some(s.as_slice()),
            RegValue::Empty => None,
            other => unreachable!("register {} is not a popcount: {other:?}", h.index),
        }
    }

    fn small_value_bv(&self, h: RegHandle<NullBvPtr>) -> &BitVector {
        let col = match &self.registers[h.index as usize] {
            RegValue::SmallValueBv(c) => *c,
            other => unreachable!("register {} is not a small-value bv: {other:?}", h.index),
        };
        match &self.columns[col as usize].specialized {
            SpecializedStorage::SmallValueEq { bit_vector, .. } => bit_vector,
            SpecializedStorage::None => unreachable!("column {col} has no specialized storage"),
        }
    }

    fn small_value_popcount(&self, h: RegHandle<Slab<u32>>) -> &[u32] {
        let col = match &self.registers[h.index as usize] {
            RegValue::SmallValuePopcount(c) => *c,
            other => {
                unreachable!("register {} is not a small-value popcount: {other:?}", h.index)
            }
        };
        match &self.columns[col as usize].specialized {
            SpecializedStorage::SmallValueEq {
                prefix_popcount, ..
            } => prefix_popcount.as_slice(),
            SpecializedStorage::None => unreachable!("column {col} has no specialized storage"),
        }
    }

    fn take_rank_map(&mut self, h: RegHandle<StringRankMap>) -> Option<StringRankMap> {
        if h.is_none() {
            return None;
        }
        match std::mem::take(&mut self.registers[h.index as usize]) {
            RegValue::RankMap(m) => Some(m),
            RegValue::Empty => None,
            other => unreachable!("register {} is not a rank map: {other:?}", h.index),
        }
    }

    fn put_rank_map(&mut self, h: RegHandle<StringRankMap>, m: StringRankMap) {
        self.registers[h.index as usize] = RegValue::RankMap(m);
    }

    // Degrades the candidate set for an invalid cast. Returns true when the
    // cast produced a usable value.
    fn handle_invalid_cast_span(&mut self, validity: Validity, update: RegHandle<Span>) -> bool {
        match validity {
            Validity::Valid => true,
            Validity::AllMatch => false,
            Validity::NoneMatch => {
                let mut s = self.span(update);
                s.e = s.b;
                self.set_span(update, s);
                false
            }
        }
    }

    fn handle_invalid_cast_range(&mut self, validity: Validity, update: RegHandle<Range>) -> bool {
        match validity {
            Validity::Valid => true,
            Validity::AllMatch => false,
            Validity::NoneMatch => {
                let mut r = self.range(update);
                r.e = r.b;
                self.set_range(update, r);
                false
            }
        }
    }

    // Compacts `update` in place, keeping the i-th element iff
    // `keep(source[i])`. Source and update must be equal-sized; they are
    // commonly the same register.
    fn filter_keep(
        &mut self,
        source: Span,
        update_h: RegHandle<Span>,
        mut keep: impl FnMut(u32) -> bool,
    ) {
        let mut update = self.span(update_h);
        debug_assert_eq!(source.size(), update.size());
        let mut slab = self.take_buffer(update.buffer);
        if source.buffer == update.buffer {
            let (b, e) = (update.b as usize, update.e as usize);
            let buf = slab.as_mut_slice();
            let mut w = b;
            for r in b..e {
                let v = buf[r];
                if keep(v) {
                    buf[w] = v;
                    w += 1;
                }
            }
            update.e = w as u32;
        } else {
            let src = self.span_slice(source).to_vec();
            let buf = slab.as_mut_slice();
            let b = update.b as usize;
            let mut w = b;
            for (i, &sv) in src.iter().enumerate() {
                let original = buf[b + i];
                if keep(sv) {
                    buf[w] = original;
                    w += 1;
                }
            }
            update.e = w as u32;
        }
        self.put_buffer(update.buffer, slab);
        self.set_span(update_h, update);
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn step<F: ValueFetcher>(&mut self, bc: &Bytecode, fetcher: &mut F) {
        match classify(bc.option) {
            Family::InitRange => self.op_init_range(bc),
            Family::AllocateIndices => self.op_allocate_indices(bc),
            Family::Iota => self.op_iota(bc),
            Family::CastFilterValue(ty) => self.op_cast_filter_value(ty, bc, fetcher),
            Family::CastFilterValueList(ty) => self.op_cast_filter_value_list(ty, bc, fetcher),
            Family::SortedFilter(ty, range_op) => self.op_sorted_filter(ty, range_op, bc),
            Family::Uint32SetIdSortedEq => self.op_set_id_sorted_eq(bc),
            Family::SpecializedStorageSmallValueEq => self.op_small_value_eq(bc),
            Family::LinearFilterEq(ty) => self.op_linear_filter_eq(ty, bc),
            Family::NonStringFilter(ty, op) => self.op_non_string_filter(ty, op, bc),
            Family::StringFilter(op) => self.op_string_filter(op, bc),
            Family::NullFilter(op) => self.op_null_filter(op, bc),
            Family::StrideCopy => self.op_stride_copy(bc),
            Family::StrideTranslateAndCopySparseNullIndices => self.op_stride_translate(bc),
            Family::StrideCopyDenseNullIndices => self.op_stride_copy_dense(bc),
            Family::PrefixPopcount => self.op_prefix_popcount(bc),
            Family::TranslateSparseNullIndices => self.op_translate_sparse(bc),
            Family::AllocateRowLayoutBuffer => self.op_allocate_row_layout(bc),
            Family::CopyToRowLayout(ty, n) => self.op_copy_to_row_layout(ty, n, bc),
            Family::Distinct => self.op_distinct(bc),
            Family::LimitOffsetIndices => self.op_limit_offset(bc),
            Family::FindMinMaxIndex(ty, mm) => self.op_find_min_max(ty, mm, bc),
            Family::IndexedFilterEq(ty, n) => self.op_indexed_filter_eq(ty, n, bc),
            Family::CopySpanIntersectingRange => self.op_copy_span_intersecting_range(bc),
            Family::InitRankMap => self.op_init_rank_map(bc),
            Family::CollectIdIntoRankMap => self.op_collect_id_into_rank_map(bc),
            Family::FinalizeRanksInMap => self.op_finalize_ranks(bc),
            Family::SortRowLayout => self.op_sort_row_layout(bc),
            Family::In(ty) => self.op_in(ty, bc),
            Family::Reverse => self.op_reverse(bc),
            Family::MakeChildToParentTreeStructure => self.op_make_child_to_parent(bc),
            Family::MakeParentToChildTreeStructure => self.op_make_parent_to_child(bc),
            Family::IndexSpanToBitvector => self.op_index_span_to_bitvector(bc),
            Family::FilterTree => self.op_filter_tree(bc),
        }
    }

    // ========================================================================
    // Index construction
    // ========================================================================

    fn op_init_range(&mut self, bc: &Bytecode) {
        let args = InitRangeArgs::decode(bc);
        self.set_range(args.dest_register, Range { b: 0, e: args.size });
    }

    fn op_allocate_indices(&mut self, bc: &Bytecode) {
        let args = AllocateIndicesArgs::decode(bc);
        let size = args.size as usize;
        let reuse = matches!(
            &self.registers[args.dest_slab_register.index as usize],
            RegValue::Slab(s) if s.len() >= size
        );
        if !reuse {
            self.registers[args.dest_slab_register.index as usize] =
                RegValue::Slab(Slab::alloc(size));
        }
        self.set_span(
            args.dest_span_register,
            Span {
                buffer: args.dest_slab_register.index,
                b: 0,
                e: args.size,
            },
        );
    }

    fn op_iota(&mut self, bc: &Bytecode) {
        let args = IotaArgs::decode(bc);
        let source = self.range(args.source_register);
        let mut update = self.span(args.update_register);
        debug_assert!(source.size() <= update.size());
        let mut slab = self.take_buffer(update.buffer);
        let buf = slab.as_mut_slice();
        for (i, v) in (source.b..source.e).enumerate() {
            buf[update.b as usize + i] = v;
        }
        update.e = update.b + source.size();
        self.put_buffer(update.buffer, slab);
        self.set_span(args.update_register, update);
    }

    fn op_reverse(&mut self, bc: &Bytecode) {
        let args = ReverseArgs::decode(bc);
        let update = self.span(args.update_register);
        let mut slab = self.take_buffer(update.buffer);
        slab.as_mut_slice()[update.b as usize..update.e as usize].reverse();
        self.put_buffer(update.buffer, slab);
    }

    fn op_stride_copy(&mut self, bc: &Bytecode) {
        let args = StrideCopyArgs::decode(bc);
        let source = self.span(args.source_register);
        let mut update = self.span(args.update_register);
        let stride = args.stride;
        debug_assert!(source.size() * stride <= update.size());
        debug_assert_ne!(source.buffer, update.buffer);
        let mut slab = self.take_buffer(update.buffer);
        {
            let src = self.span_slice(source);
            let buf = slab.as_mut_slice();
            let mut w = update.b as usize;
            for &v in src {
                buf[w] = v;
                w += stride as usize;
            }
        }
        update.e = update.b + source.size() * stride;
        self.put_buffer(update.buffer, slab);
        self.set_span(args.update_register, update);
    }

    fn op_copy_span_intersecting_range(&mut self, bc: &Bytecode) {
        let args = CopySpanIntersectingRangeArgs::decode(bc);
        let source = self.span(args.source_register);
        let range = self.range(args.source_range_register);
        let mut update = self.span(args.update_register);
        debug_assert!(source.size() <= update.size());
        let mut slab = self.take_buffer(update.buffer);
        {
            let src = self.span_slice(source).to_vec();
            let buf = slab.as_mut_slice();
            let mut w = update.b as usize;
            for v in src {
                buf[w] = v;
                if v >= range.b && v < range.e {
                    w += 1;
                }
            }
            update.e = w as u32;
        }
        self.put_buffer(update.buffer, slab);
        self.set_span(args.update_register, update);
    }

    // ========================================================================
    // Null handling
    // ========================================================================

    fn op_prefix_popcount(&mut self, bc: &Bytecode) {
        let args = PrefixPopcountArgs::decode(bc);
        // Already computed on a previous execution.
        if matches!(
            &self.registers[args.dest_register.index as usize],
            RegValue::Popcount(_)
        ) {
            return;
        }
        let popcount = {
            let bv = self.null_bv(args.null_bv_register).unwrap_or_else(|| {
                unreachable!("prefix popcount requires a null bitvector")
            });
            bv.prefix_popcount()
        };
        self.registers[args.dest_register.index as usize] =
            RegValue::Popcount(Slab::from(popcount));
    }

    fn op_null_filter(&mut self, op: NullOp, bc: &Bytecode) {
        let args = NullFilterArgs::decode(bc);
        let mut update = self.span(args.update_register);
        let mut slab = self.take_buffer(update.buffer);
        let kept = {
            let bv = self
                .null_bv(args.null_bv_register)
                .unwrap_or_else(|| unreachable!("null filter requires a null bitvector"));
            let buf = &mut slab.as_mut_slice()[update.b as usize..update.e as usize];
            match op {
                NullOp::IsNotNull => bv.pack_left::<false>(buf),
                NullOp::IsNull => bv.pack_left::<true>(buf),
            }
        };
        update.e = update.b + kept as u32;
        self.put_buffer(update.buffer, slab);
        self.set_span(args.update_register, update);
    }

    fn op_translate_sparse(&mut self, bc: &Bytecode) {
        let args = TranslateSparseNullIndicesArgs::decode(bc);
        let source = self.span(args.source_register);
        let mut update = self.span(args.update_register);
        debug_assert!(source.size() <= update.size());
        let mut slab = self.take_buffer(update.buffer);
        {
            let bv = self
                .null_bv(args.null_bv_register)
                .unwrap_or_else(|| unreachable!("translate requires a null bitvector"));
            let popcount = self
                .popcount(args.popcount_register)
                .unwrap_or_else(|| unreachable!("translate requires a popcount"))
                .to_vec();
            let buf = slab.as_mut_slice();
            if source.buffer == update.buffer {
                for i in update.b as usize..update.e as usize {
                    let s = buf[i];
                    buf[i] = popcount[(s / 64) as usize] + bv.count_set_bits_until_in_word(s);
                }
            } else {
                let src = self.span_slice(source).to_vec();
                for (i, &s) in src.iter().enumerate() {
                    buf[update.b as usize + i] =
                        popcount[(s / 64) as usize] + bv.count_set_bits_until_in_word(s);
                }
                update.e = update.b + src.len() as u32;
            }
        }
        self.put_buffer(update.buffer, slab);
        self.set_span(args.update_register, update);
    }

    fn op_stride_translate(&mut self, bc: &Bytecode) {
        let args = StrideTranslateAndCopySparseNullIndicesArgs::decode(bc);
        let update = self.span(args.update_register);
        let (offset, stride) = (args.offset as usize, args.stride as usize);
        let mut slab = self.take_buffer(update.buffer);
        {
            let bv = self
                .null_bv(args.null_bv_register)
                .unwrap_or_else(|| unreachable!("stride translate requires a null bitvector"));
            let popcount = self
                .popcount(args.popcount_register)
                .unwrap_or_else(|| unreachable!("stride translate requires a popcount"))
                .to_vec();
            let buf = slab.as_mut_slice();
            let mut i = update.b as usize;
            while i < update.e as usize {
                let index = buf[i];
                buf[i + offset] = if bv.is_set(index) {
                    popcount[(index / 64) as usize] + bv.count_set_bits_until_in_word(index)
                } else {
                    u32::MAX
                };
                i += stride;
            }
        }
        self.put_buffer(update.buffer, slab);
    }

    fn op_stride_copy_dense(&mut self, bc: &Bytecode) {
        let args = StrideCopyDenseNullIndicesArgs::decode(bc);
        let update = self.span(args.update_register);
        let (offset, stride) = (args.offset as usize, args.stride as usize);
        let mut slab = self.take_buffer(update.buffer);
        {
            let bv = self
                .null_bv(args.null_bv_register)
                .unwrap_or_else(|| unreachable!("stride dense copy requires a null bitvector"));
            let buf = slab.as_mut_slice();
            let mut i = update.b as usize;
            while i < update.e as usize {
                let index = buf[i];
                buf[i + offset] = if bv.is_set(index) { index } else { u32::MAX };
                i += stride;
            }
        }
        self.put_buffer(update.buffer, slab);
    }

    // ========================================================================
    // Filter value casting
    // ========================================================================

    fn op_cast_filter_value<F: ValueFetcher>(
        &mut self,
        ty: StorageType,
        bc: &Bytecode,
        fetcher: &mut F,
    ) {
        let args = CastFilterValueArgs::decode(bc);
        let op = Op::from_index(args.op);
        let ftype = fetcher.value_type(args.fval_handle);
        let result = match ty {
            StorageType::Id => {
                let op = NonStringOp::from_op(op).unwrap_or_else(|| unreachable!());
                let (validity, out) =
                    cast::cast_to_integer::<u32, F>(args.fval_handle, ftype, fetcher, op);
                make_result(validity, out.map(CastValue::Id))
            }
            StorageType::Uint32 => {
                let op = NonStringOp::from_op(op).unwrap_or_else(|| unreachable!());
                let (validity, out) =
                    cast::cast_to_integer::<u32, F>(args.fval_handle, ftype, fetcher, op);
                make_result(validity, out.map(CastValue::Uint32))
            }
            StorageType::Int32 => {
                let op = NonStringOp::from_op(op).unwrap_or_else(|| unreachable!());
                let (validity, out) =
                    cast::cast_to_integer::<i32, F>(args.fval_handle, ftype, fetcher, op);
                make_result(validity, out.map(CastValue::Int32))
            }
            StorageType::Int64 => {
                let op = NonStringOp::from_op(op).unwrap_or_else(|| unreachable!());
                let (validity, out) =
                    cast::cast_to_integer::<i64, F>(args.fval_handle, ftype, fetcher, op);
                make_result(validity, out.map(CastValue::Int64))
            }
            StorageType::Double => {
                let op = NonStringOp::from_op(op).unwrap_or_else(|| unreachable!());
                let (validity, out) = cast::cast_to_double(args.fval_handle, ftype, fetcher, op);
                make_result(validity, out.map(CastValue::Double))
            }
            StorageType::String => {
                let op = StringOp::from_op(op).unwrap_or_else(|| unreachable!());
                let (validity, out) = cast::cast_to_string(args.fval_handle, ftype, fetcher, op);
                make_result(validity, out.map(CastValue::String))
            }
        };
        self.registers[args.write_register.index as usize] = RegValue::CastResult(result);
    }

    fn op_cast_filter_value_list<F: ValueFetcher>(
        &mut self,
        ty: StorageType,
        bc: &Bytecode,
        fetcher: &mut F,
    ) {
        let args = CastFilterValueListArgs::decode(bc);
        let op = Op::from_index(args.op);
        let handle = args.fval_handle;

        let mut all_match = false;
        macro_rules! collect_ints {
            ($t:ty, $variant:ident) => {{
                let op = NonStringOp::from_op(op).unwrap_or_else(|| unreachable!());
                let mut out: Vec<$t> = Vec::new();
                let mut has_more = fetcher.iterator_init(handle);
                while has_more {
                    let ftype = fetcher.value_type(handle);
                    let (validity, v) = cast::cast_to_integer::<$t, F>(handle, ftype, fetcher, op);
                    match validity {
                        Validity::Valid => out.push(v.unwrap_or_else(|| unreachable!())),
                        Validity::AllMatch => {
                            all_match = true;
                            break;
                        }
                        Validity::NoneMatch => {}
                    }
                    has_more = fetcher.iterator_next(handle);
                }
                CastValueList::$variant(out)
            }};
        }

        let values = match ty {
            StorageType::Id => collect_ints!(u32, Id),
            StorageType::Uint32 => collect_ints!(u32, Uint32),
            StorageType::Int32 => collect_ints!(i32, Int32),
            StorageType::Int64 => collect_ints!(i64, Int64),
            StorageType::Double => {
                let op = NonStringOp::from_op(op).unwrap_or_else(|| unreachable!());
                let mut out: Vec<f64> = Vec::new();
                let mut has_more = fetcher.iterator_init(handle);
                while has_more {
                    let ftype = fetcher.value_type(handle);
                    let (validity, v) = cast::cast_to_double(handle, ftype, fetcher, op);
                    match validity {
                        Validity::Valid => out.push(v.unwrap_or_else(|| unreachable!())),
                        Validity::AllMatch => {
                            all_match = true;
                            break;
                        }
                        Validity::NoneMatch => {}
                    }
                    has_more = fetcher.iterator_next(handle);
                }
                CastValueList::Double(out)
            }
            StorageType::String => {
                // Mapping list elements to pool ids only works for equality;
                // the planner rejects everything else.
                let op = StringOp::from_op(op).unwrap_or_else(|| unreachable!());
                debug_assert_eq!(op, StringOp::Eq);
                let mut out: Vec<StringId> = Vec::new();
                let mut has_more = fetcher.iterator_init(handle);
                while has_more {
                    let ftype = fetcher.value_type(handle);
                    let (validity, v) = cast::cast_to_string(handle, ftype, fetcher, op);
                    match validity {
                        Validity::Valid => {
                            let s = v.unwrap_or_else(|| unreachable!());
                            // An unknown string cannot equal any stored value.
                            if let Some(id) = self.pool.get_id(&s) {
                                out.push(id);
                            }
                        }
                        Validity::AllMatch => {
                            all_match = true;
                            break;
                        }
                        Validity::NoneMatch => {}
                    }
                    has_more = fetcher.iterator_next(handle);
                }
                CastValueList::String(out)
            }
        };

        let result = if all_match {
            CastFilterValueListResult::all_match()
        } else if list_is_empty(&values) {
            CastFilterValueListResult::none_match()
        } else {
            CastFilterValueListResult::valid(values)
        };
        self.registers[args.write_register.index as usize] = RegValue::CastListResult(result);
    }

    // ========================================================================
    // Sorted / specialized filters
    // ========================================================================

    fn op_sorted_filter(&mut self, ty: StorageType, range_op: RangeOp, bc: &Bytecode) {
        let args = SortedFilterArgs::decode(bc);
        let value = self.cast_result(args.val_register).clone();
        if !self.handle_invalid_cast_range(value.validity, args.update_register) {
            return;
        }
        let mut r = self.range(args.update_register);
        let bound = BoundModifier::from_index(args.write_result_to);

        if ty.is_id() {
            let v = match value.value {
                CastValue::Id(v) => v,
                other => unreachable!("cast value is not an id: {other:?}"),
            };
            match range_op {
                RangeOp::EqualRange => {
                    let in_bounds = v >= r.b && v < r.e;
                    r.b = v;
                    r.e = v + in_bounds as u32;
                }
                RangeOp::LowerBound | RangeOp::UpperBound => {
                    let effective = v + (range_op == RangeOp::UpperBound) as u32;
                    let is_begin = bound == BoundModifier::BeginBound;
                    let new_b = if is_begin { r.b.max(effective) } else { r.b };
                    let new_e = if !is_begin { r.e.min(effective) } else { r.e };
                    r.b = new_b;
                    r.e = new_b.max(new_e);
                }
            }
            self.set_range(args.update_register, r);
            return;
        }

        match ty {
            StorageType::Uint32 => {
                let data = self.data_u32(args.storage_register);
                let v = expect_u32(&value.value);
                sorted_filter_on(data, v, range_op, bound, &mut r);
            }
            StorageType::Int32 => {
                let data = self.data_i32(args.storage_register);
                let v = expect_i32(&value.value);
                sorted_filter_on(data, v, range_op, bound, &mut r);
            }
            StorageType::Int64 => {
                let data = self.data_i64(args.storage_register);
                let v = expect_i64(&value.value);
                sorted_filter_on(data, v, range_op, bound, &mut r);
            }
            StorageType::Double => {
                let data = self.data_f64(args.storage_register);
                let v = expect_f64(&value.value);
                sorted_filter_on(data, v, range_op, bound, &mut r);
            }
            StorageType::String => {
                let data = self.data_str(args.storage_register);
                let v = expect_str(&value.value);
                let pool = self.pool;
                sorted_filter_by(
                    r.b,
                    r.e,
                    |i| pool.get(data[i as usize]) < v,
                    |i| pool.get(data[i as usize]) <= v,
                    |i| pool.get(data[i as usize]) == v,
                    range_op,
                    bound,
                    &mut r,
                );
            }
            StorageType::Id => unreachable!(),
        }
        self.set_range(args.update_register, r);
    }

    fn op_set_id_sorted_eq(&mut self, bc: &Bytecode) {
        let args = Uint32SetIdSortedEqArgs::decode(bc);
        let value = self.cast_result(args.val_register).clone();
        if !self.handle_invalid_cast_range(value.validity, args.update_register) {
            return;
        }
        let mut r = self.range(args.update_register);
        let v = expect_u32(&value.value);
        let data = self.data_u32(args.storage_register);
        // First occurrence of v is at index v; copies are contiguous.
        let start = v.clamp(r.b, r.e);
        let mut end = start;
        while end < r.e && data[end as usize] == v {
            end += 1;
        }
        r.b = start;
        r.e = end;
        self.set_range(args.update_register, r);
    }

    fn op_small_value_eq(&mut self, bc: &Bytecode) {
        let args = SpecializedStorageSmallValueEqArgs::decode(bc);
        let value = self.cast_result(args.val_register).clone();
        if !self.handle_invalid_cast_range(value.validity, args.update_register) {
            return;
        }
        let mut r = self.range(args.update_register);
        let v = expect_u32(&value.value);
        let bv = self.small_value_bv(args.small_value_bv_register);
        let popcount = self.small_value_popcount(args.small_value_popcount_register);
        let k = if v < bv.len() && bv.is_set(v) {
            popcount[(v / 64) as usize] + bv.count_set_bits_until_in_word(v)
        } else {
            r.e
        };
        let in_bounds = r.b <= k && k < r.e;
        r.b = if in_bounds { k } else { r.e };
        r.e = if in_bounds { k + 1 } else { r.b };
        self.set_range(args.update_register, r);
    }

    fn op_linear_filter_eq(&mut self, ty: StorageType, bc: &Bytecode) {
        let args = LinearFilterEqArgs::decode(bc);
        let value = self.cast_result(args.filter_value_reg).clone();
        let mut range = self.range(args.source_register);
        let mut update = self.span(args.update_register);
        debug_assert!(range.size() <= update.size());

        if value.validity != Validity::Valid {
            // NoneMatch empties the range; AllMatch keeps every row. Either
            // way the surviving range is materialized into the span.
            if value.validity == Validity::NoneMatch {
                range.e = range.b;
            }
            let mut slab = self.take_buffer(update.buffer);
            let buf = slab.as_mut_slice();
            for (i, v) in (range.b..range.e).enumerate() {
                buf[update.b as usize + i] = v;
            }
            update.e = update.b + range.size();
            self.put_buffer(update.buffer, slab);
            self.set_span(args.update_register, update);
            return;
        }

        let mut slab = self.take_buffer(update.buffer);
        let kept = {
            let buf = slab.as_mut_slice();
            let mut w = update.b as usize;
            match ty {
                StorageType::Uint32 => {
                    let data = self.data_u32(args.storage_register);
                    let v = expect_u32(&value.value);
                    for i in range.b..range.e {
                        if data[i as usize] == v {
                            buf[w] = i;
                            w += 1;
                        }
                    }
                }
                StorageType::Int32 => {
                    let data = self.data_i32(args.storage_register);
                    let v = expect_i32(&value.value);
                    for i in range.b..range.e {
                        if data[i as usize] == v {
                            buf[w] = i;
                            w += 1;
                        }
                    }
                }
                StorageType::Int64 => {
                    let data = self.data_i64(args.storage_register);
                    let v = expect_i64(&value.value);
                    for i in range.b..range.e {
                        if data[i as usize] == v {
                            buf[w] = i;
                            w += 1;
                        }
                    }
                }
                StorageType::Double => {
                    let data = self.data_f64(args.storage_register);
                    let v = expect_f64(&value.value);
                    for i in range.b..range.e {
                        if data[i as usize] == v {
                            buf[w] = i;
                            w += 1;
                        }
                    }
                }
                StorageType::String => {
                    let data = self.data_str(args.storage_register);
                    let v = expect_str(&value.value);
                    if let Some(id) = self.pool.get_id(v) {
                        for i in range.b..range.e {
                            if data[i as usize] == id {
                                buf[w] = i;
                                w += 1;
                            }
                        }
                    }
                }
                StorageType::Id => unreachable!("linear filter does not apply to Id columns"),
            }
            w
        };
        update.e = kept as u32;
        self.put_buffer(update.buffer, slab);
        self.set_span(args.update_register, update);
    }

    // ========================================================================
    // Comparison filters
    // ========================================================================

    fn op_non_string_filter(&mut self, ty: StorageType, op: NonStringOp, bc: &Bytecode) {
        let args = NonStringFilterArgs::decode(bc);
        let value = self.cast_result(args.val_register).clone();
        if !self.handle_invalid_cast_span(value.validity, args.update_register) {
            return;
        }
        let source = self.span(args.source_register);
        let storage_col = self.storage_column(args.storage_register);
        match ty {
            StorageType::Id => {
                let v = match value.value {
                    CastValue::Id(v) => v,
                    other => unreachable!("cast value is not an id: {other:?}"),
                };
                self.filter_keep(source, args.update_register, |idx| cmp_by(idx, v, op));
            }
            StorageType::Uint32 => {
                let data = storage_u32(storage_col.as_ref().map(|c| &c.storage));
                let v = expect_u32(&value.value);
                self.filter_keep(source, args.update_register, |s| {
                    cmp_by(data[s as usize], v, op)
                });
            }
            StorageType::Int32 => {
                let data = storage_i32(storage_col.as_ref().map(|c| &c.storage));
                let v = expect_i32(&value.value);
                self.filter_keep(source, args.update_register, |s| {
                    cmp_by(data[s as usize], v, op)
                });
            }
            StorageType::Int64 => {
                let data = storage_i64(storage_col.as_ref().map(|c| &c.storage));
                let v = expect_i64(&value.value);
                self.filter_keep(source, args.update_register, |s| {
                    cmp_by(data[s as usize], v, op)
                });
            }
            StorageType::Double => {
                let data = storage_f64(storage_col.as_ref().map(|c| &c.storage));
                let v = expect_f64(&value.value);
                self.filter_keep(source, args.update_register, |s| {
                    cmp_by(data[s as usize], v, op)
                });
            }
            StorageType::String => unreachable!("string columns use StringFilter"),
        }
    }

    fn op_string_filter(&mut self, op: StringOp, bc: &Bytecode) {
        let args = StringFilterArgs::decode(bc);
        let value = self.cast_result(args.val_register).clone();
        if !self.handle_invalid_cast_span(value.validity, args.update_register) {
            return;
        }
        let val = expect_str(&value.value).to_owned();
        let source = self.span(args.source_register);
        let storage_col = self
            .storage_column(args.storage_register)
            .unwrap_or_else(|| unreachable!("string filter requires storage"));
        let data = storage_str(Some(&storage_col.storage));
        let pool = self.pool;

        match op {
            StringOp::Eq => match pool.get_id(&val) {
                Some(id) => {
                    self.filter_keep(source, args.update_register, |s| data[s as usize] == id)
                }
                None => {
                    let mut update = self.span(args.update_register);
                    update.e = update.b;
                    self.set_span(args.update_register, update);
                }
            },
            StringOp::Ne => match pool.get_id(&val) {
                Some(id) => {
                    self.filter_keep(source, args.update_register, |s| data[s as usize] != id)
                }
                None => self.filter_keep(source, args.update_register, |_| true),
            },
            StringOp::Lt => {
                self.filter_keep(source, args.update_register, |s| {
                    pool.get(data[s as usize]) < val.as_str()
                });
            }
            StringOp::Le => {
                self.filter_keep(source, args.update_register, |s| {
                    pool.get(data[s as usize]) <= val.as_str()
                });
            }
            StringOp::Gt => {
                self.filter_keep(source, args.update_register, |s| {
                    pool.get(data[s as usize]) > val.as_str()
                });
            }
            StringOp::Ge => {
                self.filter_keep(source, args.update_register, |s| {
                    pool.get(data[s as usize]) >= val.as_str()
                });
            }
            StringOp::Glob => {
                let matcher = GlobMatcher::from_pattern(&val);
                if matcher.is_literal() {
                    match pool.get_id(&val) {
                        Some(id) => self
                            .filter_keep(source, args.update_register, |s| data[s as usize] == id),
                        None => {
                            let mut update = self.span(args.update_register);
                            update.e = update.b;
                            self.set_span(args.update_register, update);
                        }
                    }
                } else if (source.size() as usize) < pool.len() {
                    self.filter_keep(source, args.update_register, |s| {
                        matcher.matches(pool.get(data[s as usize]))
                    });
                } else {
                    // More candidate rows than pool entries: precompute the
                    // match set per pool id.
                    let mut matches = BitVector::with_size(pool.max_id(), false);
                    for (id, s) in pool.iter() {
                        if matcher.matches(s) {
                            matches.set(id.raw());
                        }
                    }
                    self.filter_keep(source, args.update_register, |s| {
                        matches.is_set(data[s as usize].raw())
                    });
                }
            }
            StringOp::Regex => self.string_filter_regex(&val, source, args, data),
        }
    }

    #[cfg(feature = "regex")]
    fn string_filter_regex(
        &mut self,
        pattern: &str,
        source: Span,
        args: StringFilterArgs,
        data: &[StringId],
    ) {
        let pool = self.pool;
        match regex::Regex::new(pattern) {
            Ok(re) => {
                self.filter_keep(source, args.update_register, |s| {
                    re.is_match(pool.get(data[s as usize]))
                });
            }
            Err(_) => {
                // A pattern that fails to compile matches nothing.
                let mut update = self.span(args.update_register);
                update.e = update.b;
                self.set_span(args.update_register, update);
            }
        }
    }

    #[cfg(not(feature = "regex"))]
    fn string_filter_regex(
        &mut self,
        _pattern: &str,
        _source: Span,
        _args: StringFilterArgs,
        _data: &[StringId],
    ) {
        unreachable!("regex filters are rejected at plan time without the regex feature")
    }

    fn op_in(&mut self, ty: StorageType, bc: &Bytecode) {
        let args = InArgs::decode(bc);
        let list = match &self.registers[args.value_list_register.index as usize] {
            RegValue::CastListResult(r) => r.clone(),
            other => unreachable!("register is not a cast list: {other:?}"),
        };
        if !self.handle_invalid_cast_span(list.validity, args.update_register) {
            return;
        }
        let source = self.span(args.source_register);
        let storage_col = self.storage_column(args.storage_register);

        // Membership via a bitvector when the value domain is small enough,
        // otherwise a linear scan of the list.
        match (ty, &list.values) {
            (StorageType::Id, CastValueList::Id(vals)) => {
                if let Some(bv) = in_bitvector(vals) {
                    self.filter_keep(source, args.update_register, |idx| {
                        idx < bv.len() && bv.is_set(idx)
                    });
                } else {
                    let vals = vals.clone();
                    self.filter_keep(source, args.update_register, |idx| vals.contains(&idx));
                }
            }
            (StorageType::Uint32, CastValueList::Uint32(vals)) => {
                let data = storage_u32(storage_col.as_ref().map(|c| &c.storage));
                if let Some(bv) = in_bitvector(vals) {
                    self.filter_keep(source, args.update_register, |s| {
                        let v = data[s as usize];
                        v < bv.len() && bv.is_set(v)
                    });
                } else {
                    let vals = vals.clone();
                    self.filter_keep(source, args.update_register, |s| {
                        vals.contains(&data[s as usize])
                    });
                }
            }
            (StorageType::Int32, CastValueList::Int32(vals)) => {
                let data = storage_i32(storage_col.as_ref().map(|c| &c.storage));
                let vals = vals.clone();
                self.filter_keep(source, args.update_register, |s| {
                    vals.contains(&data[s as usize])
                });
            }
            (StorageType::Int64, CastValueList::Int64(vals)) => {
                let data = storage_i64(storage_col.as_ref().map(|c| &c.storage));
                let vals = vals.clone();
                self.filter_keep(source, args.update_register, |s| {
                    vals.contains(&data[s as usize])
                });
            }
            (StorageType::Double, CastValueList::Double(vals)) => {
                let data = storage_f64(storage_col.as_ref().map(|c| &c.storage));
                let vals = vals.clone();
                self.filter_keep(source, args.update_register, |s| {
                    vals.contains(&data[s as usize])
                });
            }
            (StorageType::String, CastValueList::String(vals)) => {
                let data = storage_str(storage_col.as_ref().map(|c| &c.storage));
                let vals = vals.clone();
                self.filter_keep(source, args.update_register, |s| {
                    vals.contains(&data[s as usize])
                });
            }
            (ty, list) => unreachable!("mismatched IN list {list:?} for {ty:?}"),
        }
    }

    fn op_indexed_filter_eq(&mut self, ty: StorageType, n: CollapsedNullability, bc: &Bytecode) {
        let args = IndexedFilterEqArgs::decode(bc);
        let value = self.cast_result(args.filter_value_reg).clone();
        let source = self.span(args.source_register);
        let mut dest = source;
        match value.validity {
            Validity::NoneMatch => {
                dest.e = dest.b;
                self.set_span(args.dest_register, dest);
                return;
            }
            Validity::AllMatch => {
                self.set_span(args.dest_register, dest);
                return;
            }
            Validity::Valid => {}
        }

        let bv = self.null_bv(args.null_bv_register);
        let popcount = self.popcount(args.popcount_register).map(|p| p.to_vec());
        let perm = self.buffer(source.buffer);

        // Maps a permutation entry to its storage index; u32::MAX for null
        // rows, which order below every value.
        let to_storage = |row: u32| -> u32 {
            match n {
                CollapsedNullability::NonNull => row,
                CollapsedNullability::SparseNull => {
                    let bv = bv.unwrap_or_else(|| unreachable!("sparse needs a bitvector"));
                    if !bv.is_set(row) {
                        return u32::MAX;
                    }
                    let pc = popcount
                        .as_ref()
                        .unwrap_or_else(|| unreachable!("sparse needs a popcount"));
                    pc[(row / 64) as usize] + bv.count_set_bits_until_in_word(row)
                }
                CollapsedNullability::DenseNull => {
                    let bv = bv.unwrap_or_else(|| unreachable!("dense needs a bitvector"));
                    if bv.is_set(row) {
                        row
                    } else {
                        u32::MAX
                    }
                }
            }
        };

        macro_rules! narrow {
            ($data:expr, $v:expr, $lt:expr, $gt:expr) => {{
                let data = $data;
                let v = $v;
                dest.b = lower_bound_by(source.b, source.e, |o| {
                    let s = to_storage(perm[o as usize]);
                    if s == u32::MAX {
                        true
                    } else {
                        $lt(data[s as usize], v)
                    }
                });
                dest.e = lower_bound_by(dest.b, source.e, |o| {
                    let s = to_storage(perm[o as usize]);
                    if s == u32::MAX {
                        true
                    } else {
                        !$gt(data[s as usize], v)
                    }
                });
            }};
        }

        match ty {
            StorageType::Uint32 => {
                narrow!(
                    self.data_u32(args.storage_register),
                    expect_u32(&value.value),
                    |a: u32, b: u32| a < b,
                    |a: u32, b: u32| a > b
                )
            }
            StorageType::Int32 => {
                narrow!(
                    self.data_i32(args.storage_register),
                    expect_i32(&value.value),
                    |a: i32, b: i32| a < b,
                    |a: i32, b: i32| a > b
                )
            }
            StorageType::Int64 => {
                narrow!(
                    self.data_i64(args.storage_register),
                    expect_i64(&value.value),
                    |a: i64, b: i64| a < b,
                    |a: i64, b: i64| a > b
                )
            }
            StorageType::Double => {
                narrow!(
                    self.data_f64(args.storage_register),
                    expect_f64(&value.value),
                    |a: f64, b: f64| a < b,
                    |a: f64, b: f64| a > b
                )
            }
            StorageType::String => {
                let data = self.data_str(args.storage_register);
                let v = expect_str(&value.value);
                let pool = self.pool;
                dest.b = lower_bound_by(source.b, source.e, |o| {
                    let s = to_storage(perm[o as usize]);
                    s == u32::MAX || pool.get(data[s as usize]) < v
                });
                dest.e = lower_bound_by(dest.b, source.e, |o| {
                    let s = to_storage(perm[o as usize]);
                    s == u32::MAX || pool.get(data[s as usize]) <= v
                });
            }
            StorageType::Id => unreachable!("indexed filter does not apply to Id columns"),
        }
        self.set_span(args.dest_register, dest);
    }

    fn op_find_min_max(&mut self, ty: StorageType, mm: MinMaxOp, bc: &Bytecode) {
        let args = FindMinMaxIndexArgs::decode(bc);
        let mut update = self.span(args.update_register);
        if update.is_empty() {
            return;
        }

        let best = {
            let indices = self.span_slice(update);
            match ty {
                StorageType::Id => match mm {
                    MinMaxOp::Min => *indices.iter().min().unwrap_or_else(|| unreachable!()),
                    MinMaxOp::Max => *indices.iter().max().unwrap_or_else(|| unreachable!()),
                },
                StorageType::Uint32 => {
                    let data = self.data_u32(args.storage_register);
                    best_index(indices, mm, |i| data[i as usize])
                }
                StorageType::Int32 => {
                    let data = self.data_i32(args.storage_register);
                    best_index(indices, mm, |i| data[i as usize])
                }
                StorageType::Int64 => {
                    let data = self.data_i64(args.storage_register);
                    best_index(indices, mm, |i| data[i as usize])
                }
                StorageType::Double => {
                    let data = self.data_f64(args.storage_register);
                    best_index(indices, mm, |i| data[i as usize])
                }
                StorageType::String => {
                    let data = self.data_str(args.storage_register);
                    let pool = self.pool;
                    best_index(indices, mm, |i| pool.get(data[i as usize]))
                }
            }
        };
        let mut slab = self.take_buffer(update.buffer);
        slab[update.b as usize] = best;
        update.e = update.b + 1;
        self.put_buffer(update.buffer, slab);
        self.set_span(args.update_register, update);
    }

    // ========================================================================
    // Row layout
    // ========================================================================

    fn op_allocate_row_layout(&mut self, bc: &Bytecode) {
        let args = AllocateRowLayoutBufferArgs::decode(bc);
        if matches!(
            &self.registers[args.dest_buffer_register.index as usize],
            RegValue::RowLayout(_)
        ) {
            return;
        }
        self.registers[args.dest_buffer_register.index as usize] =
            RegValue::RowLayout(Slab::alloc(args.buffer_size as usize));
    }

    fn op_copy_to_row_layout(&mut self, ty: StorageType, n: CollapsedNullability, bc: &Bytecode) {
        let args = CopyToRowLayoutArgs::decode(bc);
        let source = self.span(args.source_indices_register);
        let invert = args.invert_copied_bits != 0;
        let stride = args.row_layout_stride as usize;
        let mut layout = self.take_row_layout(args.dest_buffer_register);
        {
            let indices = self.span_slice(source).to_vec();
            let bv = self.null_bv(args.null_bv_register);
            let popcount = self.popcount(args.popcount_register).map(|p| p.to_vec());
            let rank_map = if args.rank_map_register.is_none() {
                None
            } else {
                match &self.registers[args.rank_map_register.index as usize] {
                    RegValue::RankMap(m) => Some(m),
                    RegValue::Empty => None,
                    other => unreachable!("register is not a rank map: {other:?}"),
                }
            };
            let storage = self.storage(args.storage_register);
            let buf = layout.as_mut_slice();
            let mut dest = args.row_layout_offset as usize;

            for &row in &indices {
                let (is_non_null, storage_index) = match n {
                    CollapsedNullability::NonNull => (true, row),
                    CollapsedNullability::SparseNull => {
                        let bv = bv.unwrap_or_else(|| unreachable!("sparse needs a bitvector"));
                        if bv.is_set(row) {
                            let pc = popcount
                                .as_ref()
                                .unwrap_or_else(|| unreachable!("sparse needs a popcount"));
                            (
                                true,
                                pc[(row / 64) as usize] + bv.count_set_bits_until_in_word(row),
                            )
                        } else {
                            (false, u32::MAX)
                        }
                    }
                    CollapsedNullability::DenseNull => {
                        let bv = bv.unwrap_or_else(|| unreachable!("dense needs a bitvector"));
                        (bv.is_set(row), row)
                    }
                };

                let mut offset = 0usize;
                if n != CollapsedNullability::NonNull {
                    let byte: u8 = if is_non_null { 0xFF } else { 0x00 };
                    buf[dest] = if invert { !byte } else { byte };
                    offset = 1;
                }

                if is_non_null {
                    match ty {
                        StorageType::Id => {
                            write_encoded(&mut buf[dest + offset..], &sort::encode_u32(storage_index), invert)
                        }
                        StorageType::Uint32 => {
                            let data = storage_u32(storage);
                            write_encoded(
                                &mut buf[dest + offset..],
                                &sort::encode_u32(data[storage_index as usize]),
                                invert,
                            )
                        }
                        StorageType::Int32 => {
                            let data = storage_i32(storage);
                            write_encoded(
                                &mut buf[dest + offset..],
                                &sort::encode_i32(data[storage_index as usize]),
                                invert,
                            )
                        }
                        StorageType::Int64 => {
                            let data = storage_i64(storage);
                            write_encoded(
                                &mut buf[dest + offset..],
                                &sort::encode_i64(data[storage_index as usize]),
                                invert,
                            )
                        }
                        StorageType::Double => {
                            let data = storage_f64(storage);
                            write_encoded(
                                &mut buf[dest + offset..],
                                &sort::encode_f64(data[storage_index as usize]),
                                invert,
                            )
                        }
                        StorageType::String => {
                            let data = storage_str(storage);
                            let id = data[storage_index as usize];
                            let encoded = match rank_map {
                                Some(map) => {
                                    let rank = map.get(&id).copied().unwrap_or_else(|| {
                                        unreachable!("rank map is missing id {id:?}")
                                    });
                                    sort::encode_u32(rank)
                                }
                                None => sort::encode_u32(id.raw()),
                            };
                            write_encoded(&mut buf[dest + offset..], &encoded, invert)
                        }
                    }
                } else {
                    let width = ty.row_layout_size() as usize;
                    buf[dest + offset..dest + offset + width].fill(0);
                }
                dest += stride;
            }
        }
        self.put_row_layout(args.dest_buffer_register, layout);
    }

    fn op_distinct(&mut self, bc: &Bytecode) {
        let args = DistinctArgs::decode(bc);
        let mut update = self.span(args.indices_register);
        if update.is_empty() {
            return;
        }
        let mut slab = self.take_buffer(update.buffer);
        let kept = {
            let layout = self.row_layout(args.buffer_register);
            sort::distinct_rows(
                layout,
                args.total_row_stride as usize,
                &mut slab.as_mut_slice()[update.b as usize..update.e as usize],
            )
        };
        update.e = update.b + kept as u32;
        self.put_buffer(update.buffer, slab);
        self.set_span(args.indices_register, update);
    }

    fn op_sort_row_layout(&mut self, bc: &Bytecode) {
        let args = SortRowLayoutArgs::decode(bc);
        let update = self.span(args.indices_register);
        if update.size() <= 1 {
            return;
        }
        let mut slab = self.take_buffer(update.buffer);
        {
            let layout = self.row_layout(args.buffer_register);
            sort::sort_row_layout(
                layout,
                args.total_row_stride as usize,
                &mut slab.as_mut_slice()[update.b as usize..update.e as usize],
            );
        }
        self.put_buffer(update.buffer, slab);
    }

    fn op_init_rank_map(&mut self, bc: &Bytecode) {
        let args = InitRankMapArgs::decode(bc);
        match &mut self.registers[args.dest_register.index as usize] {
            RegValue::RankMap(m) => m.clear(),
            slot => *slot = RegValue::RankMap(StringRankMap::default()),
        }
    }

    fn op_collect_id_into_rank_map(&mut self, bc: &Bytecode) {
        let args = CollectIdIntoRankMapArgs::decode(bc);
        let mut map = self
            .take_rank_map(args.rank_map_register)
            .unwrap_or_else(|| unreachable!("rank map register not initialized"));
        {
            let source = self.span(args.source_register);
            let data = self.data_str(args.storage_register);
            for &s in self.span_slice(source) {
                map.entry(data[s as usize]).or_insert(0);
            }
        }
        self.put_rank_map(args.rank_map_register, map);
    }

    fn op_finalize_ranks(&mut self, bc: &Bytecode) {
        let args = FinalizeRanksInMapArgs::decode(bc);
        let mut map = self
            .take_rank_map(args.update_register)
            .unwrap_or_else(|| unreachable!("rank map register not initialized"));
        sort::finalize_ranks(self.pool, &mut map);
        self.put_rank_map(args.update_register, map);
    }

    // ========================================================================
    // Limit / offset
    // ========================================================================

    fn op_limit_offset(&mut self, bc: &Bytecode) {
        let args = LimitOffsetIndicesArgs::decode(bc);
        let mut span = self.span(args.update_register);
        let actual_offset = args.offset_value.min(span.size());
        span.b += actual_offset;
        let actual_limit = args.limit_value.min(span.size());
        span.e = span.b + actual_limit;
        self.set_span(args.update_register, span);
    }

    // ========================================================================
    // Tree structure
    // ========================================================================

    fn op_make_child_to_parent(&mut self, bc: &Bytecode) {
        let args = MakeChildToParentTreeStructureArgs::decode(bc);
        let n = args.row_count as usize;

        let mut parent_span = self.span(args.parent_span_register);
        let mut parent_slab = self.take_buffer(parent_span.buffer);
        {
            let parents = match &self.registers[args.parent_id_buffer_register.index as usize] {
                RegValue::Slab(s) => s.as_slice(),
                other => unreachable!("register is not a parent buffer: {other:?}"),
            };
            parent_slab.as_mut_slice()[parent_span.b as usize..parent_span.b as usize + n]
                .copy_from_slice(&parents[..n]);
        }
        parent_span.e = parent_span.b + n as u32;
        self.put_buffer(parent_span.buffer, parent_slab);
        self.set_span(args.parent_span_register, parent_span);

        let mut rows_span = self.span(args.original_rows_span_register);
        let mut rows_slab = self.take_buffer(rows_span.buffer);
        for (i, slot) in rows_slab.as_mut_slice()[rows_span.b as usize..rows_span.b as usize + n]
            .iter_mut()
            .enumerate()
        {
            *slot = i as u32;
        }
        rows_span.e = rows_span.b + n as u32;
        self.put_buffer(rows_span.buffer, rows_slab);
        self.set_span(args.original_rows_span_register, rows_span);
    }

    fn op_make_parent_to_child(&mut self, bc: &Bytecode) {
        let args = MakeParentToChildTreeStructureArgs::decode(bc);
        let parent_span = self.span(args.parent_span_register);
        let parents = self.span_slice(parent_span).to_vec();
        let n = parents.len();

        let mut offsets_span = self.span(args.offsets_register);
        let mut children_span = self.span(args.children_register);
        let mut roots_span = self.span(args.roots_register);

        let mut offsets = self.take_buffer(offsets_span.buffer);
        let mut children = self.take_buffer(children_span.buffer);
        let mut roots = self.take_buffer(roots_span.buffer);
        let scratch_span = self.span(args.scratch_register);
        let mut scratch = self.take_buffer(scratch_span.buffer);

        let counts = &mut scratch.as_mut_slice()[scratch_span.b as usize..];
        counts[..n].fill(0);
        let mut root_count = 0u32;
        for &p in &parents {
            if p == u32::MAX {
                root_count += 1;
            } else {
                counts[p as usize] += 1;
            }
        }

        let ob = offsets_span.b as usize;
        offsets[ob] = 0;
        for i in 0..n {
            offsets[ob + i + 1] = offsets[ob + i] + counts[i];
        }
        offsets_span.e = offsets_span.b + n as u32 + 1;
        children_span.e = children_span.b + (n as u32 - root_count);
        roots_span.e = roots_span.b + root_count;

        // Second pass reuses counts as countdown write cursors: the write
        // position for parent p is offsets[p + 1] - remaining.
        let mut root_idx = roots_span.b as usize;
        for (i, &p) in parents.iter().enumerate() {
            if p == u32::MAX {
                roots[root_idx] = i as u32;
                root_idx += 1;
            } else {
                let pos = offsets[ob + p as usize + 1] - counts[p as usize];
                children[children_span.b as usize + pos as usize] = i as u32;
                counts[p as usize] -= 1;
            }
        }

        self.put_buffer(offsets_span.buffer, offsets);
        self.put_buffer(children_span.buffer, children);
        self.put_buffer(roots_span.buffer, roots);
        self.put_buffer(scratch_span.buffer, scratch);
        self.set_span(args.offsets_register, offsets_span);
        self.set_span(args.children_register, children_span);
        self.set_span(args.roots_register, roots_span);
    }

    fn op_index_span_to_bitvector(&mut self, bc: &Bytecode) {
        let args = IndexSpanToBitvectorArgs::decode(bc);
        let indices = self.span(args.indices_register);
        let mut bv = match std::mem::take(&mut self.registers[args.dest_register.index as usize]) {
            RegValue::BitVec(mut bv) => {
                bv.resize(args.bitvector_size, false);
                bv.clear_all_bits();
                bv
            }
            RegValue::Empty => BitVector::with_size(args.bitvector_size, false),
            other => unreachable!("register is not a bitvector: {other:?}"),
        };
        for &i in self.span_slice(indices) {
            bv.set(i);
        }
        self.registers[args.dest_register.index as usize] = RegValue::BitVec(bv);
    }

    fn op_filter_tree(&mut self, bc: &Bytecode) {
        let args = FilterTreeArgs::decode(bc);
        let mut parent_span = self.span(args.parent_span_register);
        let mut rows_span = self.span(args.original_rows_span_register);
        let old_count = parent_span.size() as usize;
        if old_count == 0 {
            return;
        }

        let offsets = self.span_slice(self.span(args.offsets_register)).to_vec();
        let children = self.span_slice(self.span(args.children_register)).to_vec();
        let roots = self.span_slice(self.span(args.roots_register)).to_vec();
        let keep = match &self.registers[args.keep_bitvector_register.index as usize] {
            RegValue::BitVec(bv) => bv.clone(),
            other => unreachable!("register is not a keep bitvector: {other:?}"),
        };

        let scratch1_span = self.span(args.scratch1_register);
        let scratch2_span = self.span(args.scratch2_register);
        let mut scratch1 = self.take_buffer(scratch1_span.buffer);
        let mut scratch2 = self.take_buffer(scratch2_span.buffer);
        let mut parent_slab = self.take_buffer(parent_span.buffer);
        let mut rows_slab = self.take_buffer(rows_span.buffer);

        {
            let s1 = &mut scratch1.as_mut_slice()[scratch1_span.b as usize..];
            let (surviving_ancestor, queue) = s1.split_at_mut(old_count);
            let old_to_new = &mut scratch2.as_mut_slice()[scratch2_span.b as usize..];
            surviving_ancestor[..old_count].fill(u32::MAX);
            old_to_new[..old_count].fill(u32::MAX);

            // BFS computing each node's nearest surviving ancestor (itself
            // when kept).
            let mut queue_end = 0usize;
            for &root in &roots {
                if keep.is_set(root) {
                    surviving_ancestor[root as usize] = root;
                }
                queue[queue_end] = root;
                queue_end += 1;
            }
            let mut queue_idx = 0usize;
            while queue_idx < queue_end {
                let node = queue[queue_idx];
                queue_idx += 1;
                let node_ancestor = surviving_ancestor[node as usize];
                let cs = offsets[node as usize];
                let ce = offsets[node as usize + 1];
                for &child in &children[cs as usize..ce as usize] {
                    surviving_ancestor[child as usize] = if keep.is_set(child) {
                        child
                    } else {
                        node_ancestor
                    };
                    queue[queue_end] = child;
                    queue_end += 1;
                }
            }

            let mut new_count = 0u32;
            for i in 0..old_count {
                if keep.is_set(i as u32) {
                    old_to_new[i] = new_count;
                    new_count += 1;
                }
            }

            // Compact parents and original rows in increasing old order; the
            // write position never passes the read position.
            let parents = &mut parent_slab.as_mut_slice()[parent_span.b as usize..];
            let orig_rows = &mut rows_slab.as_mut_slice()[rows_span.b as usize..];
            for i in 0..old_count {
                if !keep.is_set(i as u32) {
                    continue;
                }
                let new_i = old_to_new[i] as usize;
                let old_parent = parents[i];
                let new_parent = if old_parent == u32::MAX {
                    u32::MAX
                } else {
                    let anc = surviving_ancestor[old_parent as usize];
                    if anc == u32::MAX {
                        u32::MAX
                    } else {
                        old_to_new[anc as usize]
                    }
                };
                let row = orig_rows[i];
                parents[new_i] = new_parent;
                orig_rows[new_i] = row;
            }
            parent_span.e = parent_span.b + new_count;
            rows_span.e = rows_span.b + new_count;
        }

        self.put_buffer(scratch1_span.buffer, scratch1);
        self.put_buffer(scratch2_span.buffer, scratch2);
        self.put_buffer(parent_span.buffer, parent_slab);
        self.put_buffer(rows_span.buffer, rows_slab);
        self.set_span(args.parent_span_register, parent_span);
        self.set_span(args.original_rows_span_register, rows_span);
    }
}

// ============================================================================
// Free helpers
// ============================================================================

fn make_result(validity: Validity, value: Option<CastValue>) -> CastFilterValueResult {
    match validity {
        Validity::Valid => {
            CastFilterValueResult::valid(value.unwrap_or_else(|| unreachable!()))
        }
        Validity::AllMatch => CastFilterValueResult::all_match(),
        Validity::NoneMatch => CastFilterValueResult::none_match(),
    }
}

fn list_is_empty(list: &CastValueList) -> bool {
    match list {
        CastValueList::Id(v) | CastValueList::Uint32(v) => v.is_empty(),
        CastValueList::Int32(v) => v.is_empty(),
        CastValueList::Int64(v) => v.is_empty(),
        CastValueList::Double(v) => v.is_empty(),
        CastValueList::String(v) => v.is_empty(),
    }
}

fn expect_u32(v: &CastValue) -> u32 {
    match v {
        CastValue::Uint32(x) => *x,
        other => unreachable!("cast value is not a u32: {other:?}"),
    }
}

fn expect_i32(v: &CastValue) -> i32 {
    match v {
        CastValue::Int32(x) => *x,
        other => unreachable!("cast value is not an i32: {other:?}"),
    }
}

fn expect_i64(v: &CastValue) -> i64 {
    match v {
        CastValue::Int64(x) => *x,
        other => unreachable!("cast value is not an i64: {other:?}"),
    }
}

fn expect_f64(v: &CastValue) -> f64 {
    match v {
        CastValue::Double(x) => *x,
        other => unreachable!("cast value is not a double: {other:?}"),
    }
}

fn expect_str(v: &CastValue) -> &str {
    match v {
        CastValue::String(s) => s,
        other => unreachable!("cast value is not a string: {other:?}"),
    }
}

fn cmp_by<T: PartialOrd + PartialEq>(a: T, b: T, op: NonStringOp) -> bool {
    match op {
        NonStringOp::Eq => a == b,
        NonStringOp::Ne => a != b,
        NonStringOp::Lt => a < b,
        NonStringOp::Le => a <= b,
        NonStringOp::Gt => a > b,
        NonStringOp::Ge => a >= b,
    }
}

// Binary-search narrowing for sorted PartialOrd storage.
fn sorted_filter_on<T: PartialOrd + Copy>(
    data: &[T],
    v: T,
    range_op: RangeOp,
    bound: BoundModifier,
    r: &mut Range,
) {
    sorted_filter_by(
        r.b,
        r.e,
        |i| data[i as usize] < v,
        |i| data[i as usize] <= v,
        |i| data[i as usize] == v,
        range_op,
        bound,
        r,
    );
}

#[allow(clippy::too_many_arguments)]
fn sorted_filter_by(
    b: u32,
    e: u32,
    is_less: impl Fn(u32) -> bool,
    is_less_eq: impl Fn(u32) -> bool,
    is_eq: impl Fn(u32) -> bool,
    range_op: RangeOp,
    bound: BoundModifier,
    r: &mut Range,
) {
    match range_op {
        RangeOp::EqualRange => {
            debug_assert_eq!(bound, BoundModifier::BothBounds);
            let eq_start = lower_bound_by(b, e, &is_less);
            // The equal run is usually tiny; scan a few elements before
            // paying for a second binary search.
            let mut eq_end = eq_start;
            let limit = (eq_start + 16).min(e);
            loop {
                if eq_end == e {
                    break;
                }
                if eq_end == limit {
                    eq_end = lower_bound_by(eq_end, e, &is_less_eq);
                    break;
                }
                if !is_eq(eq_end) {
                    break;
                }
                eq_end += 1;
            }
            r.b = eq_start;
            r.e = eq_end;
        }
        RangeOp::LowerBound => {
            let pos = lower_bound_by(b, e, &is_less);
            match bound {
                BoundModifier::BeginBound => r.b = pos,
                _ => r.e = pos,
            }
        }
        RangeOp::UpperBound => {
            let pos = lower_bound_by(b, e, &is_less_eq);
            match bound {
                BoundModifier::BeginBound => r.b = pos,
                _ => r.e = pos,
            }
        }
    }
    if r.e < r.b {
        r.e = r.b;
    }
}

fn best_index<V: PartialOrd>(indices: &[u32], mm: MinMaxOp, value_of: impl Fn(u32) -> V) -> u32 {
    let mut best_idx = indices[0];
    let mut best_val = value_of(best_idx);
    for &i in &indices[1..] {
        let v = value_of(i);
        let better = match mm {
            MinMaxOp::Min => v < best_val,
            MinMaxOp::Max => v > best_val,
        };
        if better {
            best_idx = i;
            best_val = v;
        }
    }
    best_idx
}

// Builds a membership bitvector when the value domain is dense enough to be
// worth the memory.
fn in_bitvector(vals: &[u32]) -> Option<BitVector> {
    let max = vals.iter().copied().max().unwrap_or(0);
    if max as usize > vals.len() * 16 {
        return None;
    }
    let mut bv = BitVector::with_size(max + 1, false);
    for &v in vals {
        bv.set(v);
    }
    Some(bv)
}

fn storage_u32(storage: Option<&Storage>) -> &[u32] {
    match storage {
        Some(Storage::Uint32(v)) => v,
        other => unreachable!("storage is not Uint32: {other:?}"),
    }
}

fn storage_i32(storage: Option<&Storage>) -> &[i32] {
    match storage {
        Some(Storage::Int32(v)) => v,
        other => unreachable!("storage is not Int32: {other:?}"),
    }
}

fn storage_i64(storage: Option<&Storage>) -> &[i64] {
    match storage {
        Some(Storage::Int64(v)) => v,
        other => unreachable!("storage is not Int64: {other:?}"),
    }
}

fn storage_f64(storage: Option<&Storage>) -> &[f64] {
    match storage {
        Some(Storage::Double(v)) => v,
        other => unreachable!("storage is not Double: {other:?}"),
    }
}

fn storage_str(storage: Option<&Storage>) -> &[StringId] {
    match storage {
        Some(Storage::String(v)) => v,
        other => unreachable!("storage is not String: {other:?}"),
    }
}

fn write_encoded(dest: &mut [u8], bytes: &[u8], invert: bool) {
    if invert {
        for (d, &s) in dest.iter_mut().zip(bytes) {
            *d = !s;
        }
    } else {
        dest[..bytes.len()].copy_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vdbe::builder::BytecodeBuilder;
    use crate::vdbe::value::NoFilterValueFetcher;

    // Drives the dispatch loop directly: materialize a range, iota it,
    // reverse, then window it with limit/offset.
    #[test]
    fn test_dispatch_loop_index_pipeline() {
        let mut b = BytecodeBuilder::new();
        let range = b.allocate_register::<Range>();
        let slab = b.allocate_register::<Slab<u32>>();
        let span = b.allocate_register::<Span>();
        {
            let bc = b.add_opcode(opcode::INIT_RANGE);
            InitRangeArgs {
                size: 10,
                dest_register: range,
            }
            .encode(bc);
        }
        {
            let bc = b.add_opcode(opcode::ALLOCATE_INDICES);
            AllocateIndicesArgs {
                size: 10,
                dest_slab_register: slab,
                dest_span_register: span,
            }
            .encode(bc);
        }
        {
            let bc = b.add_opcode(opcode::IOTA);
            IotaArgs {
                source_register: range,
                update_register: span,
            }
            .encode(bc);
        }
        {
            let bc = b.add_opcode(opcode::REVERSE);
            ReverseArgs {
                update_register: span,
            }
            .encode(bc);
        }
        {
            let bc = b.add_opcode(opcode::LIMIT_OFFSET_INDICES);
            LimitOffsetIndicesArgs {
                offset_value: 2,
                limit_value: 3,
                update_register: span,
            }
            .encode(bc);
        }

        let columns: Vec<Arc<Column>> = Vec::new();
        let pool = StringPool::new();
        let mut interpreter =
            Interpreter::new(b.bytecode(), b.register_count(), &columns, &pool);
        interpreter.execute(&mut NoFilterValueFetcher);
        assert_eq!(interpreter.span_elements(span), &[7, 6, 5]);
    }

    // A second execution must reuse the allocated slab and recompute spans.
    #[test]
    fn test_allocate_indices_reuses_slab_across_executions() {
        let mut b = BytecodeBuilder::new();
        let range = b.allocate_register::<Range>();
        let slab = b.allocate_register::<Slab<u32>>();
        let span = b.allocate_register::<Span>();
        {
            let bc = b.add_opcode(opcode::INIT_RANGE);
            InitRangeArgs {
                size: 4,
                dest_register: range,
            }
            .encode(bc);
        }
        {
            let bc = b.add_opcode(opcode::ALLOCATE_INDICES);
            AllocateIndicesArgs {
                size: 4,
                dest_slab_register: slab,
                dest_span_register: span,
            }
            .encode(bc);
        }
        {
            let bc = b.add_opcode(opcode::IOTA);
            IotaArgs {
                source_register: range,
                update_register: span,
            }
            .encode(bc);
        }
        let columns: Vec<Arc<Column>> = Vec::new();
        let pool = StringPool::new();
        let mut interpreter =
            Interpreter::new(b.bytecode(), b.register_count(), &columns, &pool);
        interpreter.execute(&mut NoFilterValueFetcher);
        assert_eq!(interpreter.span_elements(span), &[0, 1, 2, 3]);
        interpreter.execute(&mut NoFilterValueFetcher);
        assert_eq!(interpreter.span_elements(span), &[0, 1, 2, 3]);
    }

    #[test]
    fn test_lower_bound_by() {
        let data = [1u32, 3, 3, 3, 7, 9];
        let lb = lower_bound_by(0, data.len() as u32, |i| data[i as usize] < 3);
        assert_eq!(lb, 1);
        let ub = lower_bound_by(0, data.len() as u32, |i| data[i as usize] <= 3);
        assert_eq!(ub, 4);
        let none = lower_bound_by(0, data.len() as u32, |i| data[i as usize] < 100);
        assert_eq!(none, 6);
    }

    #[test]
    fn test_sorted_filter_equal_range_long_run() {
        // A run longer than the 16-element scan window exercises the
        // fallback binary search.
        let mut data = vec![1u32; 40];
        data.splice(0..0, [0u32; 3]);
        data.push(2);
        let mut r = Range {
            b: 0,
            e: data.len() as u32,
        };
        sorted_filter_on(&data, 1, RangeOp::EqualRange, BoundModifier::BothBounds, &mut r);
        assert_eq!(r, Range { b: 3, e: 43 });
    }

    #[test]
    fn test_in_bitvector_sparse_rejected() {
        assert!(in_bitvector(&[1_000_000]).is_none());
        let bv = in_bitvector(&[3, 5]).unwrap();
        assert!(bv.is_set(3));
        assert!(bv.is_set(5));
        assert!(!bv.is_set(4));
    }

    #[test]
    fn test_best_index() {
        let vals = [5.0f64, -1.0, 3.0];
        let idx = best_index(&[0, 1, 2], MinMaxOp::Min, |i| vals[i as usize]);
        assert_eq!(idx, 1);
        let idx = best_index(&[0, 1, 2], MinMaxOp::Max, |i| vals[i as usize]);
        assert_eq!(idx, 0);
    }
}
