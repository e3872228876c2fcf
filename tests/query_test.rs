//! End-to-end query tests: plan, execute, iterate.

use frameql::dataframe::{CellValue, Dataframe, InsertValue};
use frameql::types::{
    ColumnSpec, DataframeSpec, DistinctSpec, DuplicateState, FilterSpec, LimitSpec, Nullability,
    Op, SortDirection, SortSpec, SortState, StorageType,
};
use frameql::vdbe::{FetchedType, ValueFetcher};
use frameql::{QueryPlan, StringPool};

// ============================================================================
// Test fetcher
// ============================================================================

#[derive(Debug, Clone)]
enum Value {
    Null,
    Int(i64),
    Double(f64),
    Str(String),
    List(Vec<Value>),
}

struct TestFetcher {
    values: Vec<Value>,
    iter_pos: Vec<usize>,
}

impl TestFetcher {
    fn new(values: Vec<Value>) -> Self {
        let iter_pos = vec![0; values.len()];
        Self { values, iter_pos }
    }

    fn current(&self, i: u32) -> &Value {
        match &self.values[i as usize] {
            Value::List(items) => &items[self.iter_pos[i as usize]],
            scalar => scalar,
        }
    }
}

impl ValueFetcher for TestFetcher {
    fn value_type(&mut self, i: u32) -> FetchedType {
        match self.current(i) {
            Value::Null => FetchedType::Null,
            Value::Int(_) => FetchedType::Int64,
            Value::Double(_) => FetchedType::Double,
            Value::Str(_) => FetchedType::String,
            Value::List(_) => unreachable!("nested lists are not a thing"),
        }
    }

    fn int64_value(&mut self, i: u32) -> i64 {
        match self.current(i) {
            Value::Int(v) => *v,
            other => unreachable!("not an int: {other:?}"),
        }
    }

    fn double_value(&mut self, i: u32) -> f64 {
        match self.current(i) {
            Value::Double(v) => *v,
            other => unreachable!("not a double: {other:?}"),
        }
    }

    fn string_value(&mut self, i: u32) -> &str {
        match &self.values[i as usize] {
            Value::Str(s) => s,
            Value::List(items) => match &items[self.iter_pos[i as usize]] {
                Value::Str(s) => s,
                other => unreachable!("not a string: {other:?}"),
            },
            other => unreachable!("not a string: {other:?}"),
        }
    }

    fn iterator_init(&mut self, i: u32) -> bool {
        self.iter_pos[i as usize] = 0;
        match &self.values[i as usize] {
            Value::List(items) => !items.is_empty(),
            _ => unreachable!("not a list"),
        }
    }

    fn iterator_next(&mut self, i: u32) -> bool {
        self.iter_pos[i as usize] += 1;
        match &self.values[i as usize] {
            Value::List(items) => self.iter_pos[i as usize] < items.len(),
            _ => unreachable!("not a list"),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn single_column_spec(
    ty: StorageType,
    nullability: Nullability,
    sort_state: SortState,
    duplicate_state: DuplicateState,
) -> DataframeSpec {
    DataframeSpec {
        column_names: vec!["c".into()],
        column_specs: vec![ColumnSpec {
            storage_type: ty,
            nullability,
            sort_state,
            duplicate_state,
        }],
    }
}

// Runs the query and collects row indices.
fn run(
    df: &Dataframe,
    pool: &StringPool,
    filters: &mut Vec<FilterSpec>,
    distinct: &[DistinctSpec],
    sorts: &[SortSpec],
    limit: LimitSpec,
    values: Vec<Value>,
) -> Vec<u32> {
    let plan = df
        .plan_query(filters, distinct, sorts, limit, 1)
        .expect("planning failed");
    run_plan(df, pool, &plan, values)
}

fn run_plan(df: &Dataframe, pool: &StringPool, plan: &QueryPlan, values: Vec<Value>) -> Vec<u32> {
    let mut cursor = df.prepare_cursor(plan, pool);
    let mut fetcher = TestFetcher::new(values);
    cursor.execute(&mut fetcher);
    let mut rows = Vec::new();
    while !cursor.eof() {
        rows.push(cursor.row_index());
        cursor.next();
    }
    rows
}

fn uint32_df(values: &[u32], sort_state: SortState, duplicate_state: DuplicateState) -> Dataframe {
    let mut df = Dataframe::new(&single_column_spec(
        StorageType::Uint32,
        Nullability::NonNull,
        sort_state,
        duplicate_state,
    ));
    for &v in values {
        df.insert_row(&[InsertValue::Uint32(v)]);
    }
    df.finalize();
    df
}

// ============================================================================
// Concrete scenarios
// ============================================================================

#[test]
fn test_set_id_sorted_equality() {
    let pool = StringPool::new();
    let df = uint32_df(
        &[0, 0, 0, 3, 3, 5, 5, 7, 7, 7],
        SortState::SetIdSorted,
        DuplicateState::HasDuplicates,
    );

    for (value, expected) in [
        (3i64, vec![3u32, 4]),
        (4, vec![]),
        (0, vec![0, 1, 2]),
    ] {
        let mut filters = vec![FilterSpec::new(0, 0, Op::Eq)];
        let rows = run(
            &df,
            &pool,
            &mut filters,
            &[],
            &[],
            LimitSpec::default(),
            vec![Value::Int(value)],
        );
        assert_eq!(rows, expected, "c = {value}");
    }
}

#[test]
fn test_sorted_range_filters() {
    let pool = StringPool::new();
    let df = uint32_df(
        &[1, 3, 5, 7, 9, 11],
        SortState::Sorted,
        DuplicateState::NoDuplicates,
    );
    let mut filters = vec![FilterSpec::new(0, 0, Op::Ge)];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[],
        LimitSpec::default(),
        vec![Value::Int(5)],
    );
    assert_eq!(rows, vec![2, 3, 4, 5]);

    let mut filters = vec![FilterSpec::new(0, 0, Op::Lt)];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[],
        LimitSpec::default(),
        vec![Value::Int(5)],
    );
    assert_eq!(rows, vec![0, 1]);
}

#[test]
fn test_in_filter_with_bitvector() {
    let pool = StringPool::new();
    let df = uint32_df(
        &[5, 3, 7, 5, 3, 9],
        SortState::Unsorted,
        DuplicateState::HasDuplicates,
    );
    let mut filters = vec![FilterSpec::new(0, 0, Op::In)];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[],
        LimitSpec::default(),
        vec![Value::List(vec![Value::Int(3), Value::Int(5)])],
    );
    assert_eq!(rows, vec![0, 1, 3, 4]);
}

#[test]
fn test_empty_in_list_matches_nothing() {
    let pool = StringPool::new();
    let df = uint32_df(
        &[5, 3, 7],
        SortState::Unsorted,
        DuplicateState::HasDuplicates,
    );
    let mut filters = vec![FilterSpec::new(0, 0, Op::In)];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[],
        LimitSpec::default(),
        vec![Value::List(vec![])],
    );
    assert_eq!(rows, Vec::<u32>::new());
}

#[test]
fn test_string_glob() {
    let mut pool = StringPool::new();
    let mut df = Dataframe::new(&single_column_spec(
        StorageType::String,
        Nullability::NonNull,
        SortState::Unsorted,
        DuplicateState::HasDuplicates,
    ));
    for s in ["foo", "bar", "foo", "baz"] {
        let id = pool.intern(s);
        df.insert_row(&[InsertValue::String(id)]);
    }
    df.finalize();

    // A pattern with no wildcards degenerates to equality.
    let mut filters = vec![FilterSpec::new(0, 0, Op::Glob)];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[],
        LimitSpec::default(),
        vec![Value::Str("foo".into())],
    );
    assert_eq!(rows, vec![0, 2]);

    let mut filters = vec![FilterSpec::new(0, 0, Op::Glob)];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[],
        LimitSpec::default(),
        vec![Value::Str("ba*".into())],
    );
    assert_eq!(rows, vec![1, 3]);
}

#[test]
fn test_string_comparisons() {
    let mut pool = StringPool::new();
    let mut df = Dataframe::new(&single_column_spec(
        StorageType::String,
        Nullability::NonNull,
        SortState::Unsorted,
        DuplicateState::HasDuplicates,
    ));
    for s in ["apple", "banana", "cherry"] {
        let id = pool.intern(s);
        df.insert_row(&[InsertValue::String(id)]);
    }
    df.finalize();

    let mut filters = vec![FilterSpec::new(0, 0, Op::Ne)];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[],
        LimitSpec::default(),
        vec![Value::Str("banana".into())],
    );
    assert_eq!(rows, vec![0, 2]);

    let mut filters = vec![FilterSpec::new(0, 0, Op::Lt)];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[],
        LimitSpec::default(),
        vec![Value::Str("banana".into())],
    );
    assert_eq!(rows, vec![0]);

    // An equality against a string the pool has never seen matches nothing.
    let mut filters = vec![FilterSpec::new(0, 0, Op::Eq)];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[],
        LimitSpec::default(),
        vec![Value::Str("durian".into())],
    );
    assert_eq!(rows, Vec::<u32>::new());
}

#[test]
fn test_sort_nullable_column_nulls_first() {
    let pool = StringPool::new();
    let mut df = Dataframe::new(&single_column_spec(
        StorageType::Int64,
        Nullability::SparseNullWithPopcountAlways,
        SortState::Unsorted,
        DuplicateState::HasDuplicates,
    ));
    for v in [None, Some(2i64), None, Some(1)] {
        df.insert_row(&[v.map_or(InsertValue::Null, InsertValue::Int64)]);
    }
    df.finalize();

    let mut filters = vec![];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[SortSpec {
            col: 0,
            direction: SortDirection::Ascending,
        }],
        LimitSpec::default(),
        vec![],
    );
    // Ascending puts nulls at the start, stable within the null run.
    assert_eq!(rows, vec![0, 2, 3, 1]);
}

#[test]
fn test_sort_descending_doubles_with_null() {
    let pool = StringPool::new();
    let mut df = Dataframe::new(&single_column_spec(
        StorageType::Double,
        Nullability::SparseNullWithPopcountAlways,
        SortState::Unsorted,
        DuplicateState::HasDuplicates,
    ));
    // NaN was normalized to null on ingestion; -0.0 orders below +0.0.
    for v in [None, Some(1.0f64), Some(-0.0), Some(0.0), Some(-1.0)] {
        df.insert_row(&[v.map_or(InsertValue::Null, InsertValue::Double)]);
    }
    df.finalize();

    let mut filters = vec![];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[SortSpec {
            col: 0,
            direction: SortDirection::Descending,
        }],
        LimitSpec::default(),
        vec![],
    );
    assert_eq!(rows, vec![1, 3, 2, 4, 0]);
}

#[test]
fn test_sort_by_strings_uses_ranks() {
    let mut pool = StringPool::new();
    let mut df = Dataframe::new(&single_column_spec(
        StorageType::String,
        Nullability::NonNull,
        SortState::Unsorted,
        DuplicateState::HasDuplicates,
    ));
    // Interning order deliberately differs from lexicographic order.
    for s in ["cherry", "apple", "durian", "banana"] {
        let id = pool.intern(s);
        df.insert_row(&[InsertValue::String(id)]);
    }
    df.finalize();

    let mut filters = vec![];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[SortSpec {
            col: 0,
            direction: SortDirection::Ascending,
        }],
        LimitSpec::default(),
        vec![],
    );
    assert_eq!(rows, vec![1, 3, 0, 2]);
}

#[test]
fn test_sort_on_sorted_column_elided_and_reversed() {
    let pool = StringPool::new();
    let df = uint32_df(
        &[1, 2, 3, 4],
        SortState::Sorted,
        DuplicateState::NoDuplicates,
    );
    let mut filters = vec![];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[SortSpec {
            col: 0,
            direction: SortDirection::Ascending,
        }],
        LimitSpec::default(),
        vec![],
    );
    assert_eq!(rows, vec![0, 1, 2, 3]);

    let mut filters = vec![];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[SortSpec {
            col: 0,
            direction: SortDirection::Descending,
        }],
        LimitSpec::default(),
        vec![],
    );
    assert_eq!(rows, vec![3, 2, 1, 0]);
}

#[test]
fn test_distinct() {
    let pool = StringPool::new();
    let df = uint32_df(
        &[5, 3, 5, 3, 9, 5],
        SortState::Unsorted,
        DuplicateState::HasDuplicates,
    );
    let mut filters = vec![];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[DistinctSpec { col: 0 }],
        &[],
        LimitSpec::default(),
        vec![],
    );
    assert_eq!(rows, vec![0, 1, 4]);
}

#[test]
fn test_min_max_fast_path() {
    let pool = StringPool::new();
    let df = uint32_df(
        &[7, 3, 9, 1, 5],
        SortState::Unsorted,
        DuplicateState::NoDuplicates,
    );
    let limit_one = LimitSpec {
        limit: Some(1),
        offset: None,
    };
    let mut filters = vec![];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[SortSpec {
            col: 0,
            direction: SortDirection::Ascending,
        }],
        limit_one,
        vec![],
    );
    assert_eq!(rows, vec![3]);

    let mut filters = vec![];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[SortSpec {
            col: 0,
            direction: SortDirection::Descending,
        }],
        limit_one,
        vec![],
    );
    assert_eq!(rows, vec![2]);
}

// ============================================================================
// Boundary behaviors
// ============================================================================

#[test]
fn test_empty_dataframe_returns_no_rows() {
    let pool = StringPool::new();
    let df = uint32_df(&[], SortState::Sorted, DuplicateState::NoDuplicates);
    let mut filters = vec![FilterSpec::new(0, 0, Op::Eq)];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[],
        LimitSpec::default(),
        vec![Value::Int(1)],
    );
    assert_eq!(rows, Vec::<u32>::new());
}

#[test]
fn test_limit_offset_boundaries() {
    let pool = StringPool::new();
    let df = uint32_df(
        &[0, 1, 2, 3, 4],
        SortState::Sorted,
        DuplicateState::NoDuplicates,
    );

    // Offset beyond the result set.
    let mut filters = vec![];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[],
        LimitSpec {
            limit: None,
            offset: Some(10),
        },
        vec![],
    );
    assert_eq!(rows, Vec::<u32>::new());

    // Limit of zero.
    let mut filters = vec![];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[],
        LimitSpec {
            limit: Some(0),
            offset: None,
        },
        vec![],
    );
    assert_eq!(rows, Vec::<u32>::new());

    // Plain offset + limit window.
    let mut filters = vec![];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[],
        LimitSpec {
            limit: Some(2),
            offset: Some(1),
        },
        vec![],
    );
    assert_eq!(rows, vec![1, 2]);
}

#[test]
fn test_cast_overflow_downgrades() {
    let pool = StringPool::new();
    let df = uint32_df(
        &[1, 2, 3],
        SortState::Sorted,
        DuplicateState::NoDuplicates,
    );

    // int64 overflowing u32: equality can never match.
    let mut filters = vec![FilterSpec::new(0, 0, Op::Eq)];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[],
        LimitSpec::default(),
        vec![Value::Int(1 << 40)],
    );
    assert_eq!(rows, Vec::<u32>::new());

    // ... while "less than a huge value" trivially holds for every row.
    let mut filters = vec![FilterSpec::new(0, 0, Op::Lt)];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[],
        LimitSpec::default(),
        vec![Value::Int(1 << 40)],
    );
    assert_eq!(rows, vec![0, 1, 2]);

    // Null filter values never match.
    let mut filters = vec![FilterSpec::new(0, 0, Op::Eq)];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[],
        LimitSpec::default(),
        vec![Value::Null],
    );
    assert_eq!(rows, Vec::<u32>::new());

    // A fractional double can Ne-match everything.
    let mut filters = vec![FilterSpec::new(0, 0, Op::Ne)];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[],
        LimitSpec::default(),
        vec![Value::Double(1.5)],
    );
    assert_eq!(rows, vec![0, 1, 2]);
}

// ============================================================================
// Plan serialization
// ============================================================================

#[test]
fn test_plan_serialization_round_trip_and_execution() {
    let pool = StringPool::new();
    let df = uint32_df(
        &[5, 3, 7, 5, 3, 9],
        SortState::Unsorted,
        DuplicateState::HasDuplicates,
    );
    let mut filters = vec![FilterSpec::new(0, 0, Op::Eq)];
    let plan = df
        .plan_query(
            &mut filters,
            &[],
            &[],
            LimitSpec::default(),
            1,
        )
        .unwrap();

    let serialized = plan.serialize();
    let decoded = QueryPlan::deserialize(&serialized).unwrap();
    assert_eq!(decoded, plan);
    // Byte-for-byte: re-serializing is identical.
    assert_eq!(decoded.serialize(), serialized);

    let rows_original = run_plan(&df, &pool, &plan, vec![Value::Int(5)]);
    let rows_decoded = run_plan(&df, &pool, &decoded, vec![Value::Int(5)]);
    assert_eq!(rows_original, vec![0, 3]);
    assert_eq!(rows_decoded, rows_original);
}

// ============================================================================
// Indexes
// ============================================================================

#[test]
fn test_index_query_matches_unindexed_query() {
    let pool = StringPool::new();
    let values = [13u32, 5, 9, 5, 13, 2, 5, 9];
    let plain = uint32_df(&values, SortState::Unsorted, DuplicateState::HasDuplicates);
    let mut indexed = plain.copy_finalized();
    let index = indexed.build_index(&[0], &pool).unwrap();
    indexed.add_index(index);

    for needle in [5i64, 13, 2, 4] {
        let mut filters = vec![FilterSpec::new(0, 0, Op::Eq)];
        let without = run(
            &plain,
            &pool,
            &mut filters,
            &[],
            &[],
            LimitSpec::default(),
            vec![Value::Int(needle)],
        );
        let mut filters = vec![FilterSpec::new(0, 0, Op::Eq)];
        let with = run(
            &indexed,
            &pool,
            &mut filters,
            &[],
            &[],
            LimitSpec::default(),
            vec![Value::Int(needle)],
        );
        let mut expected: Vec<u32> = (0..values.len() as u32)
            .filter(|&i| values[i as usize] as i64 == needle)
            .collect();
        expected.sort_unstable();
        let mut with_sorted = with.clone();
        with_sorted.sort_unstable();
        assert_eq!(with_sorted, expected, "needle {needle}");
        let mut without_sorted = without;
        without_sorted.sort_unstable();
        assert_eq!(without_sorted, expected, "needle {needle}");
    }
}

// ============================================================================
// Cursor cell access
// ============================================================================

#[test]
fn test_cursor_cells_match_dataframe_cells() {
    let mut pool = StringPool::new();
    let spec = DataframeSpec {
        column_names: vec!["id".into(), "num".into(), "name".into()],
        column_specs: vec![
            ColumnSpec {
                storage_type: StorageType::Id,
                nullability: Nullability::NonNull,
                sort_state: SortState::IdSorted,
                duplicate_state: DuplicateState::NoDuplicates,
            },
            ColumnSpec {
                storage_type: StorageType::Int64,
                nullability: Nullability::SparseNullWithPopcountAlways,
                sort_state: SortState::Unsorted,
                duplicate_state: DuplicateState::HasDuplicates,
            },
            ColumnSpec {
                storage_type: StorageType::String,
                nullability: Nullability::NonNull,
                sort_state: SortState::Unsorted,
                duplicate_state: DuplicateState::HasDuplicates,
            },
        ],
    };
    let mut df = Dataframe::new(&spec);
    let names = ["ab", "cd", "ef", "gh", "ij"];
    for (i, name) in names.iter().enumerate() {
        let num = if i % 2 == 0 {
            InsertValue::Int64(i as i64 * 100)
        } else {
            InsertValue::Null
        };
        let id = pool.intern(name);
        df.insert_row(&[InsertValue::Id, num, InsertValue::String(id)]);
    }
    df.finalize();

    // Project all three columns, filtered to rows with id >= 1.
    let mut filters = vec![FilterSpec::new(0, 0, Op::Ge)];
    let plan = df
        .plan_query(&mut filters, &[], &[], LimitSpec::default(), 0b111)
        .unwrap();
    let mut cursor = df.prepare_cursor(&plan, &pool);
    let mut fetcher = TestFetcher::new(vec![Value::Int(1)]);
    cursor.execute(&mut fetcher);

    let mut seen = 0;
    while !cursor.eof() {
        let row = cursor.row_index();
        for col in 0..3 {
            assert_eq!(
                cursor.cell(col),
                df.get_cell(row, col, &pool),
                "row {row} col {col}"
            );
        }
        seen += 1;
        cursor.next();
    }
    assert_eq!(seen, 4);
}

#[test]
fn test_is_null_and_is_not_null() {
    let pool = StringPool::new();
    let mut df = Dataframe::new(&single_column_spec(
        StorageType::Int64,
        Nullability::DenseNull,
        SortState::Unsorted,
        DuplicateState::HasDuplicates,
    ));
    for v in [Some(1i64), None, Some(3), None] {
        df.insert_row(&[v.map_or(InsertValue::Null, InsertValue::Int64)]);
    }
    df.finalize();

    let mut filters = vec![FilterSpec::new(0, 0, Op::IsNull)];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[],
        LimitSpec::default(),
        vec![Value::Null],
    );
    assert_eq!(rows, vec![1, 3]);

    let mut filters = vec![FilterSpec::new(0, 0, Op::IsNotNull)];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[],
        LimitSpec::default(),
        vec![Value::Null],
    );
    assert_eq!(rows, vec![0, 2]);
}

#[test]
fn test_filter_on_nullable_column_skips_nulls() {
    let pool = StringPool::new();
    let mut df = Dataframe::new(&single_column_spec(
        StorageType::Int64,
        Nullability::SparseNullWithPopcountAlways,
        SortState::Unsorted,
        DuplicateState::HasDuplicates,
    ));
    for v in [Some(10i64), None, Some(20), None, Some(10)] {
        df.insert_row(&[v.map_or(InsertValue::Null, InsertValue::Int64)]);
    }
    df.finalize();

    let mut filters = vec![FilterSpec::new(0, 0, Op::Eq)];
    let rows = run(
        &df,
        &pool,
        &mut filters,
        &[],
        &[],
        LimitSpec::default(),
        vec![Value::Int(10)],
    );
    assert_eq!(rows, vec![0, 4]);

    // Cell reads through the cursor see the nulls of unmatched... rows that
    // matched are all non-null here; project and check them.
    let mut filters = vec![FilterSpec::new(0, 0, Op::Gt)];
    let plan = df
        .plan_query(&mut filters, &[], &[], LimitSpec::default(), 1)
        .unwrap();
    let mut cursor = df.prepare_cursor(&plan, &pool);
    let mut fetcher = TestFetcher::new(vec![Value::Int(0)]);
    cursor.execute(&mut fetcher);
    let mut values = Vec::new();
    while !cursor.eof() {
        match cursor.cell(0) {
            CellValue::Int64(v) => values.push(v),
            other => panic!("unexpected cell {other:?}"),
        }
        cursor.next();
    }
    assert_eq!(values, vec![10, 20, 10]);
}

#[test]
fn test_cursor_staleness() {
    let pool = StringPool::new();
    let mut df = Dataframe::new(&single_column_spec(
        StorageType::Uint32,
        Nullability::NonNull,
        SortState::Unsorted,
        DuplicateState::HasDuplicates,
    ));
    df.insert_row(&[InsertValue::Uint32(1)]);
    let mut filters = vec![];
    let plan = df
        .plan_query(&mut filters, &[], &[], LimitSpec::default(), 1)
        .unwrap();

    let mut cursor = df.prepare_cursor(&plan, &pool);
    let mut fetcher = TestFetcher::new(vec![]);
    cursor.execute(&mut fetcher);
    assert!(!cursor.is_stale(&df));

    // Mutating the dataframe while the cursor is live makes it stale; the
    // cursor keeps serving its preparation-time snapshot.
    df.insert_row(&[InsertValue::Uint32(2)]);
    assert!(cursor.is_stale(&df));
    assert_eq!(cursor.row_index(), 0);
    assert_eq!(cursor.result_row_count(), 1);

    // Cell-level mutations advance the counter as well.
    let fresh = df.prepare_cursor(&plan, &pool);
    assert!(!fresh.is_stale(&df));
    df.set_cell(0, 0, InsertValue::Uint32(9));
    assert!(fresh.is_stale(&df));

    // Re-preparing picks up the current mutation counter.
    let reprepared = df.prepare_cursor(&plan, &pool);
    assert!(!reprepared.is_stale(&df));
}

#[test]
fn test_multi_filter_query() {
    let pool = StringPool::new();
    let spec = DataframeSpec {
        column_names: vec!["a".into(), "b".into()],
        column_specs: vec![
            ColumnSpec {
                storage_type: StorageType::Uint32,
                nullability: Nullability::NonNull,
                sort_state: SortState::Sorted,
                duplicate_state: DuplicateState::HasDuplicates,
            },
            ColumnSpec {
                storage_type: StorageType::Int64,
                nullability: Nullability::NonNull,
                sort_state: SortState::Unsorted,
                duplicate_state: DuplicateState::HasDuplicates,
            },
        ],
    };
    let mut df = Dataframe::new(&spec);
    let rows: [(u32, i64); 6] = [(1, 9), (2, 8), (2, 7), (3, 8), (3, 9), (4, 8)];
    for (a, b) in rows {
        df.insert_row(&[InsertValue::Uint32(a), InsertValue::Int64(b)]);
    }
    df.finalize();

    // a in [2, 3] (sorted range probes) and b == 8 (linear on the span).
    let mut filters = vec![
        FilterSpec::new(0, 0, Op::Ge),
        FilterSpec::new(0, 1, Op::Le),
        FilterSpec::new(1, 2, Op::Eq),
    ];
    let plan = df
        .plan_query(&mut filters, &[], &[], LimitSpec::default(), 0b11)
        .unwrap();
    // value_index maps back to the client's values by planner order.
    let mut values = vec![Value::Null, Value::Null, Value::Null];
    for f in &filters {
        let slot = f.value_index.unwrap() as usize;
        values[slot] = match f.source_index {
            0 => Value::Int(2),
            1 => Value::Int(3),
            2 => Value::Int(8),
            _ => unreachable!(),
        };
    }
    let rows = run_plan(&df, &pool, &plan, values);
    assert_eq!(rows, vec![1, 3]);
}
