//! Utility data structures

pub mod bitvec;
pub mod glob;
pub mod slab;

pub use bitvec::BitVector;
pub use glob::GlobMatcher;
pub use slab::Slab;
