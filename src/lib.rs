//! FrameQL - columnar dataframe query engine compiled to a bytecode VM
//!
//! Given a collection of typed columns and a declarative query (filters,
//! distinct, sort, limit, column projection), the planner produces a
//! serializable plan of bytecode instructions which a register-based
//! interpreter executes to yield the ordered set of matching row indices,
//! plus the per-row storage offsets needed to materialize output cells.

// Allow dead code during development - some components are implemented
// but not yet integrated into the full execution pipeline
#![allow(dead_code)]

pub mod dataframe;
pub mod error;
pub mod executor;
pub mod strings;
pub mod types;
pub mod util;
pub mod vdbe;

// Re-export main public types
pub use error::{Error, ErrorCode, Result};

pub use dataframe::{
    builder::{AdhocColumnType, AdhocDataframeBuilder, AdhocDataframeBuilderOptions, AdhocNullability},
    tree::{TreeTransformer, NO_PARENT, TREE_ID_COLUMN, TREE_PARENT_ID_COLUMN},
    CellValue, Dataframe, InsertValue, AUTO_ID_COLUMN,
};

pub use executor::{Cursor, QueryPlan};

pub use strings::{StringId, StringPool};

pub use types::{
    ColumnSpec, DataframeSpec, DistinctSpec, DuplicateState, FilterSpec, LimitSpec, Nullability,
    Op, SortDirection, SortSpec, SortState, StorageType,
};

pub use vdbe::{FetchedType, NoFilterValueFetcher, ValueFetcher};
