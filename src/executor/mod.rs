//! Query planning and execution
//!
//! `wherecode` compiles query specifications into bytecode, `plan` carries
//! the serializable result, and `cursor` executes plans against a live
//! dataframe.

pub mod cursor;
pub mod plan;
pub mod wherecode;

pub use cursor::Cursor;
pub use plan::{ExecutionParams, QueryPlan, RegisterInit, RegisterInitKind};
pub use wherecode::{FilterResult, IndicesReg, QueryPlanBuilder};
