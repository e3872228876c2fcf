//! Bytecode instructions
//!
//! A query plan is a flat sequence of 40-byte instructions: a 4-byte opcode
//! (`option`) plus 36 bytes of argument data at fixed offsets. Instructions
//! are plain bytes so plans serialize by memcpy.
//!
//! Templated opcode families (e.g. a filter specialized per storage type and
//! comparison op) occupy contiguous opcode ranges; the concrete opcode for
//! tags `(t1, t2)` is `base + t1 * count2 + t2`. `classify` decodes an
//! opcode back into its family and tags for dispatch and printing.

use crate::types::{
    CollapsedNullability, MinMaxOp, NonStringOp, NullOp, RangeOp, StorageType, StringOp,
};
use crate::util::Slab;
use crate::vdbe::registers::{
    NullBvPtr, Range, RegHandle, Span, StoragePtr, StringRankMap,
};
use crate::vdbe::value::{CastFilterValueListResult, CastFilterValueResult};

// ============================================================================
// Instruction record
// ============================================================================

/// A single bytecode instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bytecode {
    /// Opcode determining the instruction type.
    pub option: u32,
    /// Argument data at fixed per-instruction offsets.
    pub args: [u8; 36],
}

impl Bytecode {
    pub fn new(option: u32) -> Self {
        Self {
            option,
            args: [0; 36],
        }
    }
}

/// A scalar that can live in an instruction's argument buffer.
pub trait BytecodeArg: Copy {
    fn read(buf: &[u8; 36], off: &mut usize) -> Self;
    fn write(self, buf: &mut [u8; 36], off: &mut usize);
}

impl BytecodeArg for u32 {
    fn read(buf: &[u8; 36], off: &mut usize) -> Self {
        let v = u32::from_le_bytes(buf[*off..*off + 4].try_into().unwrap());
        *off += 4;
        v
    }
    fn write(self, buf: &mut [u8; 36], off: &mut usize) {
        buf[*off..*off + 4].copy_from_slice(&self.to_le_bytes());
        *off += 4;
    }
}

impl BytecodeArg for u16 {
    fn read(buf: &[u8; 36], off: &mut usize) -> Self {
        let v = u16::from_le_bytes(buf[*off..*off + 2].try_into().unwrap());
        *off += 2;
        v
    }
    fn write(self, buf: &mut [u8; 36], off: &mut usize) {
        buf[*off..*off + 2].copy_from_slice(&self.to_le_bytes());
        *off += 2;
    }
}

impl<T> BytecodeArg for RegHandle<T> {
    fn read(buf: &[u8; 36], off: &mut usize) -> Self {
        RegHandle::new(u32::read(buf, off))
    }
    fn write(self, buf: &mut [u8; 36], off: &mut usize) {
        self.index.write(buf, off);
    }
}

macro_rules! bytecode_args {
    ($($(#[$meta:meta])* $name:ident { $($field:ident: $ty:ty),* $(,)? })*) => {$(
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name {
            $(pub $field: $ty,)*
        }

        impl $name {
            pub fn decode(bc: &Bytecode) -> Self {
                let mut off = 0usize;
                $(let $field = <$ty as BytecodeArg>::read(&bc.args, &mut off);)*
                let _ = off;
                Self { $($field,)* }
            }

            pub fn encode(&self, bc: &mut Bytecode) {
                let mut off = 0usize;
                $(<$ty as BytecodeArg>::write(self.$field, &mut bc.args, &mut off);)*
                debug_assert!(off <= 36);
            }
        }
    )*};
}

// ============================================================================
// Argument layouts
// ============================================================================

bytecode_args! {
    /// Initializes a range register to `{0, size}`.
    InitRangeArgs {
        size: u32,
        dest_register: RegHandle<Range>,
    }

    /// Allocates a slab of `size` indices (reusing an existing slab when it
    /// is already large enough) and points the span register at `[0, size)`.
    AllocateIndicesArgs {
        size: u32,
        dest_slab_register: RegHandle<Slab<u32>>,
        dest_span_register: RegHandle<Span>,
    }

    /// Writes `source.b .. source.b + n` into the span.
    IotaArgs {
        source_register: RegHandle<Range>,
        update_register: RegHandle<Span>,
    }

    /// Casts the client filter value in slot `fval_handle` to the column
    /// type; `op` (an `Op` index) steers directional rounding and the
    /// all/none-match downgrades.
    CastFilterValueArgs {
        fval_handle: u32,
        write_register: RegHandle<CastFilterValueResult>,
        op: u32,
    }

    /// IN-clause variant of `CastFilterValue`: iterates the value list.
    CastFilterValueListArgs {
        fval_handle: u32,
        write_register: RegHandle<CastFilterValueListResult>,
        op: u32,
    }

    /// Narrows a range on a sorted column by binary search. The range-op tag
    /// picks equal-range/lower-bound/upper-bound; `write_result_to` (a
    /// `BoundModifier` index) says which bound the result lands in.
    SortedFilterArgs {
        storage_register: RegHandle<StoragePtr>,
        val_register: RegHandle<CastFilterValueResult>,
        update_register: RegHandle<Range>,
        write_result_to: u32,
    }

    /// Equality on a SetIdSorted Uint32 column: the first occurrence of `v`
    /// is at index `v` and copies are contiguous.
    Uint32SetIdSortedEqArgs {
        storage_register: RegHandle<StoragePtr>,
        val_register: RegHandle<CastFilterValueResult>,
        update_register: RegHandle<Range>,
    }

    /// O(1) equality via a column's SmallValueEq specialized storage.
    SpecializedStorageSmallValueEqArgs {
        small_value_bv_register: RegHandle<NullBvPtr>,
        small_value_popcount_register: RegHandle<Slab<u32>>,
        val_register: RegHandle<CastFilterValueResult>,
        update_register: RegHandle<Range>,
    }

    /// Single linear scan of a range writing matching indices to a span.
    /// Used for the first equality on a non-null column to avoid
    /// materializing the full index set.
    LinearFilterEqArgs {
        storage_register: RegHandle<StoragePtr>,
        filter_value_reg: RegHandle<CastFilterValueResult>,
        popcount_register: RegHandle<Slab<u32>>,
        source_register: RegHandle<Range>,
        update_register: RegHandle<Span>,
    }

    /// Compacts `update` in place keeping indices whose storage value
    /// satisfies the comparison. Values are looked up through `source`
    /// (storage indices); kept elements come from `update` (row indices).
    NonStringFilterArgs {
        storage_register: RegHandle<StoragePtr>,
        val_register: RegHandle<CastFilterValueResult>,
        source_register: RegHandle<Span>,
        update_register: RegHandle<Span>,
    }

    /// String comparison filter; layout identical to `NonStringFilterArgs`.
    StringFilterArgs {
        storage_register: RegHandle<StoragePtr>,
        val_register: RegHandle<CastFilterValueResult>,
        source_register: RegHandle<Span>,
        update_register: RegHandle<Span>,
    }

    /// Keeps span indices whose null bit matches the null-op tag.
    NullFilterArgs {
        null_bv_register: RegHandle<NullBvPtr>,
        update_register: RegHandle<Span>,
    }

    /// Copies `source` into `update` at the given stride and sets
    /// `update.e = update.b + n * stride`.
    StrideCopyArgs {
        source_register: RegHandle<Span>,
        update_register: RegHandle<Span>,
        stride: u32,
    }

    /// For each stride-row of `update`, writes the sparse-null storage
    /// translation of the row index at `offset` within the row (u32::MAX
    /// for null rows).
    StrideTranslateAndCopySparseNullIndicesArgs {
        null_bv_register: RegHandle<NullBvPtr>,
        popcount_register: RegHandle<Slab<u32>>,
        update_register: RegHandle<Span>,
        offset: u32,
        stride: u32,
    }

    /// Dense-null variant: the storage index is the row index itself when
    /// non-null, u32::MAX otherwise.
    StrideCopyDenseNullIndicesArgs {
        null_bv_register: RegHandle<NullBvPtr>,
        update_register: RegHandle<Span>,
        offset: u32,
        stride: u32,
    }

    /// Computes the prefix popcount of a null bitvector into a slab.
    /// Skipped if the destination register is already populated, so the
    /// result is cached across executions.
    PrefixPopcountArgs {
        null_bv_register: RegHandle<NullBvPtr>,
        dest_register: RegHandle<Slab<u32>>,
    }

    /// Translates non-null row indices into sparse storage indices. Every
    /// index in `source` must be non-null (apply `NullFilter<IsNotNull>`
    /// first).
    TranslateSparseNullIndicesArgs {
        null_bv_register: RegHandle<NullBvPtr>,
        popcount_register: RegHandle<Slab<u32>>,
        source_register: RegHandle<Span>,
        update_register: RegHandle<Span>,
    }

    /// Allocates (or reuses) a row-layout byte buffer.
    AllocateRowLayoutBufferArgs {
        buffer_size: u32,
        dest_buffer_register: RegHandle<Slab<u8>>,
    }

    /// Encodes one column of each source row into the row-layout buffer
    /// using the order-preserving byte encoding; nullable columns write a
    /// leading 0xFF/0x00 null byte. Descending keys set
    /// `invert_copied_bits`.
    CopyToRowLayoutArgs {
        storage_register: RegHandle<StoragePtr>,
        null_bv_register: RegHandle<NullBvPtr>,
        source_indices_register: RegHandle<Span>,
        dest_buffer_register: RegHandle<Slab<u8>>,
        row_layout_offset: u16,
        row_layout_stride: u16,
        invert_copied_bits: u32,
        popcount_register: RegHandle<Slab<u32>>,
        rank_map_register: RegHandle<StringRankMap>,
    }

    /// Keeps the first row for each distinct row-layout byte string.
    DistinctArgs {
        buffer_register: RegHandle<Slab<u8>>,
        total_row_stride: u32,
        indices_register: RegHandle<Span>,
    }

    /// Advances the span by `offset` then caps its length at `limit`
    /// (u32::MAX = no limit).
    LimitOffsetIndicesArgs {
        offset_value: u32,
        limit_value: u32,
        update_register: RegHandle<Span>,
    }

    /// Reduces the span to the single index holding the min/max value.
    FindMinMaxIndexArgs {
        storage_register: RegHandle<StoragePtr>,
        update_register: RegHandle<Span>,
    }

    /// Narrows an index-permutation span to the equal range of the filter
    /// value by binary search, where the sort key of index i is the storage
    /// value at its (nullability-dependent) storage index. Nulls order below
    /// everything.
    IndexedFilterEqArgs {
        storage_register: RegHandle<StoragePtr>,
        null_bv_register: RegHandle<NullBvPtr>,
        filter_value_reg: RegHandle<CastFilterValueResult>,
        popcount_register: RegHandle<Slab<u32>>,
        source_register: RegHandle<Span>,
        dest_register: RegHandle<Span>,
    }

    /// Copies source-span indices that fall inside the range into `update`.
    CopySpanIntersectingRangeArgs {
        source_register: RegHandle<Span>,
        source_range_register: RegHandle<Range>,
        update_register: RegHandle<Span>,
    }

    /// Creates (or clears) a string-id-to-rank map register.
    InitRankMapArgs {
        dest_register: RegHandle<StringRankMap>,
    }

    /// Inserts the string ids referenced by the span into the rank map with
    /// placeholder ranks.
    CollectIdIntoRankMapArgs {
        storage_register: RegHandle<StoragePtr>,
        source_register: RegHandle<Span>,
        rank_map_register: RegHandle<StringRankMap>,
    }

    /// Sorts the collected ids lexicographically and writes each id's rank
    /// back into the map.
    FinalizeRanksInMapArgs {
        update_register: RegHandle<StringRankMap>,
    }

    /// Stable-sorts the span by the row-layout bytes of each index.
    SortRowLayoutArgs {
        buffer_register: RegHandle<Slab<u8>>,
        total_row_stride: u32,
        indices_register: RegHandle<Span>,
    }

    /// Membership filter against a cast value list.
    InArgs {
        storage_register: RegHandle<StoragePtr>,
        value_list_register: RegHandle<CastFilterValueListResult>,
        source_register: RegHandle<Span>,
        update_register: RegHandle<Span>,
    }

    /// Reverses the span in place.
    ReverseArgs {
        update_register: RegHandle<Span>,
    }

    /// Copies the normalized parent-id buffer into `parent_span` and writes
    /// the identity permutation into `original_rows_span`.
    MakeChildToParentTreeStructureArgs {
        parent_id_buffer_register: RegHandle<Slab<u32>>,
        row_count: u32,
        parent_span_register: RegHandle<Span>,
        original_rows_span_register: RegHandle<Span>,
    }

    /// Builds the parent-to-child CSR (offsets, children, roots) from the
    /// parent span. `scratch` must hold n u32s for child counts.
    MakeParentToChildTreeStructureArgs {
        parent_span_register: RegHandle<Span>,
        scratch_register: RegHandle<Span>,
        offsets_register: RegHandle<Span>,
        children_register: RegHandle<Span>,
        roots_register: RegHandle<Span>,
    }

    /// Sets a bit for every index in the span.
    IndexSpanToBitvectorArgs {
        indices_register: RegHandle<Span>,
        bitvector_size: u32,
        dest_register: RegHandle<crate::util::BitVector>,
    }

    /// BFS over the CSR keeping bitset nodes; children of removed nodes are
    /// reparented to the nearest surviving ancestor. `scratch1` holds 2n
    /// u32s (ancestors + queue), `scratch2` n u32s.
    FilterTreeArgs {
        offsets_register: RegHandle<Span>,
        children_register: RegHandle<Span>,
        roots_register: RegHandle<Span>,
        keep_bitvector_register: RegHandle<crate::util::BitVector>,
        parent_span_register: RegHandle<Span>,
        original_rows_span_register: RegHandle<Span>,
        scratch1_register: RegHandle<Span>,
        scratch2_register: RegHandle<Span>,
    }
}

// ============================================================================
// Opcode index space
// ============================================================================

/// Opcode base indices. Templated families reserve one opcode per tag
/// combination; `classify` maps an opcode back to its family and tags.
pub mod opcode {
    use crate::types::{CollapsedNullability, MinMaxOp, NonStringOp, NullOp, RangeOp, StorageType, StringOp};

    pub const CAST_FILTER_VALUE: u32 = 0;
    pub const CAST_FILTER_VALUE_LIST: u32 = CAST_FILTER_VALUE + StorageType::COUNT;
    pub const INIT_RANGE: u32 = CAST_FILTER_VALUE_LIST + StorageType::COUNT;
    pub const ALLOCATE_INDICES: u32 = INIT_RANGE + 1;
    pub const IOTA: u32 = ALLOCATE_INDICES + 1;
    pub const SORTED_FILTER: u32 = IOTA + 1;
    pub const UINT32_SET_ID_SORTED_EQ: u32 = SORTED_FILTER + StorageType::COUNT * RangeOp::COUNT;
    pub const SPECIALIZED_STORAGE_SMALL_VALUE_EQ: u32 = UINT32_SET_ID_SORTED_EQ + 1;
    pub const LINEAR_FILTER_EQ: u32 = SPECIALIZED_STORAGE_SMALL_VALUE_EQ + 1;
    pub const NON_STRING_FILTER: u32 = LINEAR_FILTER_EQ + (StorageType::COUNT - 1);
    pub const STRING_FILTER: u32 = NON_STRING_FILTER + (StorageType::COUNT - 1) * NonStringOp::COUNT;
    pub const NULL_FILTER: u32 = STRING_FILTER + StringOp::COUNT;
    pub const STRIDE_COPY: u32 = NULL_FILTER + NullOp::COUNT;
    pub const STRIDE_TRANSLATE_SPARSE: u32 = STRIDE_COPY + 1;
    pub const STRIDE_COPY_DENSE: u32 = STRIDE_TRANSLATE_SPARSE + 1;
    pub const PREFIX_POPCOUNT: u32 = STRIDE_COPY_DENSE + 1;
    pub const TRANSLATE_SPARSE_NULL_INDICES: u32 = PREFIX_POPCOUNT + 1;
    pub const ALLOCATE_ROW_LAYOUT_BUFFER: u32 = TRANSLATE_SPARSE_NULL_INDICES + 1;
    pub const COPY_TO_ROW_LAYOUT: u32 = ALLOCATE_ROW_LAYOUT_BUFFER + 1;
    pub const DISTINCT: u32 =
        COPY_TO_ROW_LAYOUT + StorageType::COUNT * CollapsedNullability::COUNT;
    pub const LIMIT_OFFSET_INDICES: u32 = DISTINCT + 1;
    pub const FIND_MIN_MAX_INDEX: u32 = LIMIT_OFFSET_INDICES + 1;
    pub const INDEXED_FILTER_EQ: u32 = FIND_MIN_MAX_INDEX + StorageType::COUNT * MinMaxOp::COUNT;
    pub const COPY_SPAN_INTERSECTING_RANGE: u32 =
        INDEXED_FILTER_EQ + (StorageType::COUNT - 1) * CollapsedNullability::COUNT;
    pub const INIT_RANK_MAP: u32 = COPY_SPAN_INTERSECTING_RANGE + 1;
    pub const COLLECT_ID_INTO_RANK_MAP: u32 = INIT_RANK_MAP + 1;
    pub const FINALIZE_RANKS_IN_MAP: u32 = COLLECT_ID_INTO_RANK_MAP + 1;
    pub const SORT_ROW_LAYOUT: u32 = FINALIZE_RANKS_IN_MAP + 1;
    pub const IN_FILTER: u32 = SORT_ROW_LAYOUT + 1;
    pub const REVERSE: u32 = IN_FILTER + StorageType::COUNT;
    pub const MAKE_CHILD_TO_PARENT_TREE: u32 = REVERSE + 1;
    pub const MAKE_PARENT_TO_CHILD_TREE: u32 = MAKE_CHILD_TO_PARENT_TREE + 1;
    pub const INDEX_SPAN_TO_BITVECTOR: u32 = MAKE_PARENT_TO_CHILD_TREE + 1;
    pub const FILTER_TREE: u32 = INDEX_SPAN_TO_BITVECTOR + 1;
    pub const COUNT: u32 = FILTER_TREE + 1;

    /// Opcode for `CastFilterValue<ty>`.
    pub fn cast_filter_value(ty: StorageType) -> u32 {
        CAST_FILTER_VALUE + ty.index()
    }

    /// Opcode for `CastFilterValueList<ty>`.
    pub fn cast_filter_value_list(ty: StorageType) -> u32 {
        CAST_FILTER_VALUE_LIST + ty.index()
    }

    /// Opcode for `SortedFilter<ty, range_op>`.
    pub fn sorted_filter(ty: StorageType, range_op: RangeOp) -> u32 {
        SORTED_FILTER + ty.index() * RangeOp::COUNT + range_op.index()
    }

    /// Opcode for `LinearFilterEq<ty>`; `ty` must not be Id.
    pub fn linear_filter_eq(ty: StorageType) -> u32 {
        debug_assert!(!ty.is_id());
        LINEAR_FILTER_EQ + (ty.index() - 1)
    }

    /// Opcode for `NonStringFilter<ty, op>`; `ty` must not be String.
    pub fn non_string_filter(ty: StorageType, op: NonStringOp) -> u32 {
        debug_assert!(!ty.is_string());
        NON_STRING_FILTER + ty.index() * NonStringOp::COUNT + op.index()
    }

    /// Opcode for `StringFilter<op>`.
    pub fn string_filter(op: StringOp) -> u32 {
        STRING_FILTER + op.index()
    }

    /// Opcode for `NullFilter<op>`.
    pub fn null_filter(op: NullOp) -> u32 {
        NULL_FILTER + op.index()
    }

    /// Opcode for `CopyToRowLayout<ty, nullability>`.
    pub fn copy_to_row_layout(ty: StorageType, n: CollapsedNullability) -> u32 {
        COPY_TO_ROW_LAYOUT + ty.index() * CollapsedNullability::COUNT + n.index()
    }

    /// Opcode for `FindMinMaxIndex<ty, op>`.
    pub fn find_min_max_index(ty: StorageType, op: MinMaxOp) -> u32 {
        FIND_MIN_MAX_INDEX + ty.index() * MinMaxOp::COUNT + op.index()
    }

    /// Opcode for `IndexedFilterEq<ty, nullability>`; `ty` must not be Id.
    pub fn indexed_filter_eq(ty: StorageType, n: CollapsedNullability) -> u32 {
        debug_assert!(!ty.is_id());
        INDEXED_FILTER_EQ + (ty.index() - 1) * CollapsedNullability::COUNT + n.index()
    }

    /// Opcode for `In<ty>`.
    pub fn in_filter(ty: StorageType) -> u32 {
        IN_FILTER + ty.index()
    }
}

// ============================================================================
// Family classification
// ============================================================================

/// An opcode decoded into its family and tag parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Family {
    CastFilterValue(StorageType),
    CastFilterValueList(StorageType),
    InitRange,
    AllocateIndices,
    Iota,
    SortedFilter(StorageType, RangeOp),
    Uint32SetIdSortedEq,
    SpecializedStorageSmallValueEq,
    LinearFilterEq(StorageType),
    NonStringFilter(StorageType, NonStringOp),
    StringFilter(StringOp),
    NullFilter(NullOp),
    StrideCopy,
    StrideTranslateAndCopySparseNullIndices,
    StrideCopyDenseNullIndices,
    PrefixPopcount,
    TranslateSparseNullIndices,
    AllocateRowLayoutBuffer,
    CopyToRowLayout(StorageType, CollapsedNullability),
    Distinct,
    LimitOffsetIndices,
    FindMinMaxIndex(StorageType, MinMaxOp),
    IndexedFilterEq(StorageType, CollapsedNullability),
    CopySpanIntersectingRange,
    InitRankMap,
    CollectIdIntoRankMap,
    FinalizeRanksInMap,
    SortRowLayout,
    In(StorageType),
    Reverse,
    MakeChildToParentTreeStructure,
    MakeParentToChildTreeStructure,
    IndexSpanToBitvector,
    FilterTree,
}

/// Decodes an opcode into its family and tags.
pub fn classify(option: u32) -> Family {
    use opcode::*;
    if option < CAST_FILTER_VALUE_LIST {
        return Family::CastFilterValue(StorageType::from_index(option - CAST_FILTER_VALUE));
    }
    if option < INIT_RANGE {
        return Family::CastFilterValueList(StorageType::from_index(option - CAST_FILTER_VALUE_LIST));
    }
    if option == INIT_RANGE {
        return Family::InitRange;
    }
    if option == ALLOCATE_INDICES {
        return Family::AllocateIndices;
    }
    if option == IOTA {
        return Family::Iota;
    }
    if option < UINT32_SET_ID_SORTED_EQ {
        let offset = option - SORTED_FILTER;
        return Family::SortedFilter(
            StorageType::from_index(offset / RangeOp::COUNT),
            RangeOp::from_index(offset % RangeOp::COUNT),
        );
    }
    if option == UINT32_SET_ID_SORTED_EQ {
        return Family::Uint32SetIdSortedEq;
    }
    if option == SPECIALIZED_STORAGE_SMALL_VALUE_EQ {
        return Family::SpecializedStorageSmallValueEq;
    }
    if option < NON_STRING_FILTER {
        return Family::LinearFilterEq(StorageType::from_index(option - LINEAR_FILTER_EQ + 1));
    }
    if option < STRING_FILTER {
        let offset = option - NON_STRING_FILTER;
        return Family::NonStringFilter(
            StorageType::from_index(offset / NonStringOp::COUNT),
            NonStringOp::from_index(offset % NonStringOp::COUNT),
        );
    }
    if option < NULL_FILTER {
        return Family::StringFilter(StringOp::from_index(option - STRING_FILTER));
    }
    if option < STRIDE_COPY {
        return Family::NullFilter(NullOp::from_index(option - NULL_FILTER));
    }
    if option == STRIDE_COPY {
        return Family::StrideCopy;
    }
    if option == STRIDE_TRANSLATE_SPARSE {
        return Family::StrideTranslateAndCopySparseNullIndices;
    }
    if option == STRIDE_COPY_DENSE {
        return Family::StrideCopyDenseNullIndices;
    }
    if option == PREFIX_POPCOUNT {
        return Family::PrefixPopcount;
    }
    if option == TRANSLATE_SPARSE_NULL_INDICES {
        return Family::TranslateSparseNullIndices;
    }
    if option == ALLOCATE_ROW_LAYOUT_BUFFER {
        return Family::AllocateRowLayoutBuffer;
    }
    if option < DISTINCT {
        let offset = option - COPY_TO_ROW_LAYOUT;
        return Family::CopyToRowLayout(
            StorageType::from_index(offset / CollapsedNullability::COUNT),
            CollapsedNullability::from_index(offset % CollapsedNullability::COUNT),
        );
    }
    if option == DISTINCT {
        return Family::Distinct;
    }
    if option == LIMIT_OFFSET_INDICES {
        return Family::LimitOffsetIndices;
    }
    if option < INDEXED_FILTER_EQ {
        let offset = option - FIND_MIN_MAX_INDEX;
        return Family::FindMinMaxIndex(
            StorageType::from_index(offset / MinMaxOp::COUNT),
            MinMaxOp::from_index(offset % MinMaxOp::COUNT),
        );
    }
    if option < COPY_SPAN_INTERSECTING_RANGE {
        let offset = option - INDEXED_FILTER_EQ;
        return Family::IndexedFilterEq(
            StorageType::from_index(offset / CollapsedNullability::COUNT + 1),
            CollapsedNullability::from_index(offset % CollapsedNullability::COUNT),
        );
    }
    if option == COPY_SPAN_INTERSECTING_RANGE {
        return Family::CopySpanIntersectingRange;
    }
    if option == INIT_RANK_MAP {
        return Family::InitRankMap;
    }
    if option == COLLECT_ID_INTO_RANK_MAP {
        return Family::CollectIdIntoRankMap;
    }
    if option == FINALIZE_RANKS_IN_MAP {
        return Family::FinalizeRanksInMap;
    }
    if option == SORT_ROW_LAYOUT {
        return Family::SortRowLayout;
    }
    if option < REVERSE {
        return Family::In(StorageType::from_index(option - IN_FILTER));
    }
    if option == REVERSE {
        return Family::Reverse;
    }
    if option == MAKE_CHILD_TO_PARENT_TREE {
        return Family::MakeChildToParentTreeStructure;
    }
    if option == MAKE_PARENT_TO_CHILD_TREE {
        return Family::MakeParentToChildTreeStructure;
    }
    if option == INDEX_SPAN_TO_BITVECTOR {
        return Family::IndexSpanToBitvector;
    }
    if option == FILTER_TREE {
        return Family::FilterTree;
    }
    unreachable!("invalid opcode {option}")
}

// ============================================================================
// Cost model
// ============================================================================

/// Cost category of one opcode, consumed by the planner's running estimate.
#[derive(Debug, Clone, Copy)]
pub enum Cost {
    Fixed(f64),
    LogPerRow(f64),
    LinearPerRow(f64),
    LogLinearPerRow(f64),
    /// Linear in the row count *after* the operation (limit/offset).
    PostOperationLinearPerRow(f64),
}

/// The cost category for an opcode.
pub fn opcode_cost(option: u32) -> Cost {
    match classify(option) {
        Family::InitRange => Cost::Fixed(5.0),
        Family::AllocateIndices => Cost::Fixed(30.0),
        Family::Iota => Cost::LinearPerRow(10.0),
        Family::CastFilterValue(_) => Cost::Fixed(5.0),
        Family::CastFilterValueList(_) => Cost::Fixed(1000.0),
        Family::SortedFilter(ty, _) => {
            if ty.is_id() {
                Cost::Fixed(20.0)
            } else {
                Cost::LogPerRow(10.0)
            }
        }
        Family::Uint32SetIdSortedEq => Cost::Fixed(100.0),
        Family::SpecializedStorageSmallValueEq => Cost::Fixed(10.0),
        Family::LinearFilterEq(_) => Cost::LinearPerRow(7.0),
        Family::NonStringFilter(..) => Cost::LinearPerRow(5.0),
        Family::StringFilter(_) => Cost::LinearPerRow(15.0),
        Family::NullFilter(_) => Cost::LinearPerRow(5.0),
        Family::StrideCopy => Cost::LinearPerRow(15.0),
        Family::StrideTranslateAndCopySparseNullIndices => Cost::LinearPerRow(10.0),
        Family::StrideCopyDenseNullIndices => Cost::LinearPerRow(5.0),
        Family::PrefixPopcount => Cost::LinearPerRow(20.0),
        Family::TranslateSparseNullIndices => Cost::LinearPerRow(10.0),
        Family::AllocateRowLayoutBuffer => Cost::Fixed(10.0),
        Family::CopyToRowLayout(..) => Cost::LinearPerRow(5.0),
        Family::Distinct => Cost::LinearPerRow(7.0),
        Family::LimitOffsetIndices => Cost::PostOperationLinearPerRow(2.0),
        Family::FindMinMaxIndex(..) => Cost::LinearPerRow(2.0),
        Family::IndexedFilterEq(..) => Cost::LogPerRow(10.0),
        Family::CopySpanIntersectingRange => Cost::LinearPerRow(5.0),
        Family::InitRankMap => Cost::Fixed(10.0),
        Family::CollectIdIntoRankMap => Cost::LinearPerRow(10.0),
        Family::FinalizeRanksInMap => Cost::LogLinearPerRow(20.0),
        Family::SortRowLayout => Cost::LogLinearPerRow(10.0),
        Family::In(_) => Cost::LinearPerRow(10.0),
        Family::Reverse => Cost::LinearPerRow(2.0),
        Family::MakeChildToParentTreeStructure => Cost::LinearPerRow(10.0),
        Family::MakeParentToChildTreeStructure => Cost::LinearPerRow(15.0),
        Family::IndexSpanToBitvector => Cost::LinearPerRow(5.0),
        Family::FilterTree => Cost::LinearPerRow(20.0),
    }
}

// ============================================================================
// Debug printing
// ============================================================================

lazy_static::lazy_static! {
    static ref OPCODE_NAMES: Vec<String> = {
        (0..opcode::COUNT).map(|option| match classify(option) {
            Family::CastFilterValue(t) => format!("CastFilterValue<{t:?}>"),
            Family::CastFilterValueList(t) => format!("CastFilterValueList<{t:?}>"),
            Family::SortedFilter(t, r) => format!("SortedFilter<{t:?}, {r:?}>"),
            Family::LinearFilterEq(t) => format!("LinearFilterEq<{t:?}>"),
            Family::NonStringFilter(t, o) => format!("NonStringFilter<{t:?}, {o:?}>"),
            Family::StringFilter(o) => format!("StringFilter<{o:?}>"),
            Family::NullFilter(o) => format!("NullFilter<{o:?}>"),
            Family::CopyToRowLayout(t, n) => format!("CopyToRowLayout<{t:?}, {n:?}>"),
            Family::FindMinMaxIndex(t, m) => format!("FindMinMaxIndex<{t:?}, {m:?}>"),
            Family::IndexedFilterEq(t, n) => format!("IndexedFilterEq<{t:?}, {n:?}>"),
            Family::In(t) => format!("In<{t:?}>"),
            other => format!("{other:?}"),
        }).collect()
    };
}

/// The display name of an opcode.
pub fn opcode_name(option: u32) -> &'static str {
    &OPCODE_NAMES[option as usize]
}

/// Renders one instruction as `Name(args…)` for plan inspection.
pub fn bytecode_to_string(bc: &Bytecode) -> String {
    let name = opcode_name(bc.option);
    let args = match classify(bc.option) {
        Family::InitRange => format!("{:?}", InitRangeArgs::decode(bc)),
        Family::AllocateIndices => format!("{:?}", AllocateIndicesArgs::decode(bc)),
        Family::Iota => format!("{:?}", IotaArgs::decode(bc)),
        Family::CastFilterValue(_) => format!("{:?}", CastFilterValueArgs::decode(bc)),
        Family::CastFilterValueList(_) => format!("{:?}", CastFilterValueListArgs::decode(bc)),
        Family::SortedFilter(..) => format!("{:?}", SortedFilterArgs::decode(bc)),
        Family::Uint32SetIdSortedEq => format!("{:?}", Uint32SetIdSortedEqArgs::decode(bc)),
        Family::SpecializedStorageSmallValueEq => {
            format!("{:?}", SpecializedStorageSmallValueEqArgs::decode(bc))
        }
        Family::LinearFilterEq(_) => format!("{:?}", LinearFilterEqArgs::decode(bc)),
        Family::NonStringFilter(..) => format!("{:?}", NonStringFilterArgs::decode(bc)),
        Family::StringFilter(_) => format!("{:?}", StringFilterArgs::decode(bc)),
        Family::NullFilter(_) => format!("{:?}", NullFilterArgs::decode(bc)),
        Family::StrideCopy => format!("{:?}", StrideCopyArgs::decode(bc)),
        Family::StrideTranslateAndCopySparseNullIndices => {
            format!("{:?}", StrideTranslateAndCopySparseNullIndicesArgs::decode(bc))
        }
        Family::StrideCopyDenseNullIndices => {
            format!("{:?}", StrideCopyDenseNullIndicesArgs::decode(bc))
        }
        Family::PrefixPopcount => format!("{:?}", PrefixPopcountArgs::decode(bc)),
        Family::TranslateSparseNullIndices => {
            format!("{:?}", TranslateSparseNullIndicesArgs::decode(bc))
        }
        Family::AllocateRowLayoutBuffer => {
            format!("{:?}", AllocateRowLayoutBufferArgs::decode(bc))
        }
        Family::CopyToRowLayout(..) => format!("{:?}", CopyToRowLayoutArgs::decode(bc)),
        Family::Distinct => format!("{:?}", DistinctArgs::decode(bc)),
        Family::LimitOffsetIndices => format!("{:?}", LimitOffsetIndicesArgs::decode(bc)),
        Family::FindMinMaxIndex(..) => format!("{:?}", FindMinMaxIndexArgs::decode(bc)),
        Family::IndexedFilterEq(..) => format!("{:?}", IndexedFilterEqArgs::decode(bc)),
        Family::CopySpanIntersectingRange => {
            format!("{:?}", CopySpanIntersectingRangeArgs::decode(bc))
        }
        Family::InitRankMap => format!("{:?}", InitRankMapArgs::decode(bc)),
        Family::CollectIdIntoRankMap => format!("{:?}", CollectIdIntoRankMapArgs::decode(bc)),
        Family::FinalizeRanksInMap => format!("{:?}", FinalizeRanksInMapArgs::decode(bc)),
        Family::SortRowLayout => format!("{:?}", SortRowLayoutArgs::decode(bc)),
        Family::In(_) => format!("{:?}", InArgs::decode(bc)),
        Family::Reverse => format!("{:?}", ReverseArgs::decode(bc)),
        Family::MakeChildToParentTreeStructure => {
            format!("{:?}", MakeChildToParentTreeStructureArgs::decode(bc))
        }
        Family::MakeParentToChildTreeStructure => {
            format!("{:?}", MakeParentToChildTreeStructureArgs::decode(bc))
        }
        Family::IndexSpanToBitvector => format!("{:?}", IndexSpanToBitvectorArgs::decode(bc)),
        Family::FilterTree => format!("{:?}", FilterTreeArgs::decode(bc)),
    };
    format!("{name}{args}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundModifier, Op};

    #[test]
    fn test_classify_is_total_and_consistent() {
        // Every opcode classifies, and re-deriving the opcode from the
        // decoded tags gets back the original index.
        for option in 0..opcode::COUNT {
            match classify(option) {
                Family::CastFilterValue(t) => {
                    assert_eq!(opcode::cast_filter_value(t), option)
                }
                Family::CastFilterValueList(t) => {
                    assert_eq!(opcode::cast_filter_value_list(t), option)
                }
                Family::SortedFilter(t, r) => assert_eq!(opcode::sorted_filter(t, r), option),
                Family::LinearFilterEq(t) => assert_eq!(opcode::linear_filter_eq(t), option),
                Family::NonStringFilter(t, o) => {
                    assert_eq!(opcode::non_string_filter(t, o), option)
                }
                Family::StringFilter(o) => assert_eq!(opcode::string_filter(o), option),
                Family::NullFilter(o) => assert_eq!(opcode::null_filter(o), option),
                Family::CopyToRowLayout(t, n) => {
                    assert_eq!(opcode::copy_to_row_layout(t, n), option)
                }
                Family::FindMinMaxIndex(t, m) => {
                    assert_eq!(opcode::find_min_max_index(t, m), option)
                }
                Family::IndexedFilterEq(t, n) => {
                    assert_eq!(opcode::indexed_filter_eq(t, n), option)
                }
                Family::In(t) => assert_eq!(opcode::in_filter(t), option),
                _ => {}
            }
        }
    }

    #[test]
    fn test_args_round_trip() {
        let mut bc = Bytecode::new(opcode::SORTED_FILTER);
        SortedFilterArgs {
            storage_register: RegHandle::new(3),
            val_register: RegHandle::new(4),
            update_register: RegHandle::new(5),
            write_result_to: BoundModifier::EndBound.index(),
        }
        .encode(&mut bc);
        let decoded = SortedFilterArgs::decode(&bc);
        assert_eq!(decoded.storage_register.index, 3);
        assert_eq!(decoded.val_register.index, 4);
        assert_eq!(decoded.update_register.index, 5);
        assert_eq!(decoded.write_result_to, BoundModifier::EndBound.index());
    }

    #[test]
    fn test_copy_to_row_layout_args_fit() {
        let mut bc = Bytecode::new(opcode::COPY_TO_ROW_LAYOUT);
        CopyToRowLayoutArgs {
            storage_register: RegHandle::new(1),
            null_bv_register: RegHandle::new(2),
            source_indices_register: RegHandle::new(3),
            dest_buffer_register: RegHandle::new(4),
            row_layout_offset: 9,
            row_layout_stride: 13,
            invert_copied_bits: 1,
            popcount_register: RegHandle::new(5),
            rank_map_register: RegHandle::none(),
        }
        .encode(&mut bc);
        let d = CopyToRowLayoutArgs::decode(&bc);
        assert_eq!(d.row_layout_offset, 9);
        assert_eq!(d.row_layout_stride, 13);
        assert_eq!(d.invert_copied_bits, 1);
        assert!(d.rank_map_register.is_none());
        assert_eq!(d.popcount_register.index, 5);
    }

    #[test]
    fn test_bytecode_to_string() {
        let mut bc = Bytecode::new(opcode::INIT_RANGE);
        InitRangeArgs {
            size: 10,
            dest_register: RegHandle::new(0),
        }
        .encode(&mut bc);
        let s = bytecode_to_string(&bc);
        assert!(s.starts_with("InitRange"));
        assert!(s.contains("size: 10"));
    }

    #[test]
    fn test_opcode_op_encoding_round_trip() {
        // Op indices survive the u32 round trip through the args buffer.
        let mut bc = Bytecode::new(opcode::cast_filter_value(StorageType::Int64));
        CastFilterValueArgs {
            fval_handle: 2,
            write_register: RegHandle::new(7),
            op: Op::Ge.index(),
        }
        .encode(&mut bc);
        assert_eq!(CastFilterValueArgs::decode(&bc).op, Op::Ge.index());
    }
}
