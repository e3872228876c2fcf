//! Query plans
//!
//! A plan bundles the bytecode, the execution parameters and the
//! register-initialization descriptors. Plans carry no pointers: register
//! inits name columns and indexes by number and the cursor resolves them
//! against the live dataframe.
//!
//! Plans serialize to a base64 string over a fixed binary layout:
//! execution params, then the instruction array, then the column output
//! offsets, then the register inits. No versioning is implied; plans are not
//! persisted across software versions.

use base64::Engine;
use smallvec::SmallVec;

use crate::error::{Error, ErrorCode, Result};
use crate::vdbe::ops::{bytecode_to_string, Bytecode};
use crate::vdbe::registers::{RegHandle, Span};

// ============================================================================
// Register initialization
// ============================================================================

/// What a register should be initialized with before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RegisterInitKind {
    /// Storage of an Id column: resolves to "no storage", the row index is
    /// the value.
    Id = 0,
    Uint32 = 1,
    Int32 = 2,
    Int64 = 3,
    Double = 4,
    String = 5,
    /// The column's null bitvector.
    NullBitvector = 6,
    /// An index's permutation vector; `source_index` is the index position.
    IndexVector = 7,
    SmallValueEqBitvector = 8,
    SmallValueEqPopcount = 9,
}

impl RegisterInitKind {
    fn from_u8(v: u8) -> Option<RegisterInitKind> {
        Some(match v {
            0 => RegisterInitKind::Id,
            1 => RegisterInitKind::Uint32,
            2 => RegisterInitKind::Int32,
            3 => RegisterInitKind::Int64,
            4 => RegisterInitKind::Double,
            5 => RegisterInitKind::String,
            6 => RegisterInitKind::NullBitvector,
            7 => RegisterInitKind::IndexVector,
            8 => RegisterInitKind::SmallValueEqBitvector,
            9 => RegisterInitKind::SmallValueEqPopcount,
            _ => return None,
        })
    }
}

/// One register-initialization descriptor. Serialized as 8 bytes:
/// `dest_register: u32, kind: u8, source_index: u16, pad: u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterInit {
    pub dest_register: u32,
    pub kind: RegisterInitKind,
    /// Column index for storage/bitvector kinds; index position for
    /// `IndexVector`.
    pub source_index: u16,
}

// ============================================================================
// Execution parameters
// ============================================================================

/// Parameters required to execute a plan. Serialized as 32 bytes in field
/// order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionParams {
    /// Estimated cost of executing the plan, in the planner's abstract cost
    /// units.
    pub estimated_cost: f64,
    /// Register holding the final output indices span.
    pub output_register: RegHandle<Span>,
    /// Upper bound on the number of rows the plan can return.
    pub max_row_count: u32,
    /// The planner's estimate of the returned row count.
    pub estimated_row_count: u32,
    /// Number of registers the plan uses.
    pub register_count: u32,
    /// Number of client filter values the plan consumes.
    pub filter_value_count: u32,
    /// Number of output slots per result row: 1 for the row index, plus one
    /// per projected nullable column holding its storage offset.
    pub output_per_row: u32,
}

impl Default for ExecutionParams {
    fn default() -> Self {
        Self {
            estimated_cost: 0.0,
            output_register: RegHandle::none(),
            max_row_count: 0,
            estimated_row_count: 0,
            register_count: 0,
            filter_value_count: 0,
            output_per_row: 0,
        }
    }
}

const EXECUTION_PARAMS_SIZE: usize = 32;
const BYTECODE_SIZE: usize = 40;
const REGISTER_INIT_SIZE: usize = 8;

// ============================================================================
// QueryPlan
// ============================================================================

/// An executable, serializable query plan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPlan {
    pub(crate) params: ExecutionParams,
    pub(crate) bytecode: SmallVec<[Bytecode; 16]>,
    /// For each column, the output slot holding its per-row storage offset
    /// (0 for columns addressed directly by row index).
    pub(crate) col_to_output_offset: SmallVec<[u32; 24]>,
    pub(crate) register_inits: SmallVec<[RegisterInit; 16]>,
}

impl QueryPlan {
    /// Upper bound on the number of rows this plan can return.
    pub fn max_row_count(&self) -> u32 {
        self.params.max_row_count
    }

    /// Estimated number of returned rows.
    pub fn estimated_row_count(&self) -> u32 {
        self.params.estimated_row_count
    }

    /// Estimated execution cost.
    pub fn estimated_cost(&self) -> f64 {
        self.params.estimated_cost
    }

    /// Renders each instruction as a string, for plan inspection.
    pub fn bytecode_to_string(&self) -> Vec<String> {
        self.bytecode.iter().map(bytecode_to_string).collect()
    }

    /// Serializes to a base64 ASCII string.
    pub fn serialize(&self) -> String {
        let mut out = Vec::with_capacity(
            EXECUTION_PARAMS_SIZE
                + 8
                + self.bytecode.len() * BYTECODE_SIZE
                + 8
                + self.col_to_output_offset.len() * 4
                + 8
                + self.register_inits.len() * REGISTER_INIT_SIZE,
        );

        out.extend_from_slice(&self.params.estimated_cost.to_le_bytes());
        out.extend_from_slice(&self.params.output_register.index.to_le_bytes());
        out.extend_from_slice(&self.params.max_row_count.to_le_bytes());
        out.extend_from_slice(&self.params.estimated_row_count.to_le_bytes());
        out.extend_from_slice(&self.params.register_count.to_le_bytes());
        out.extend_from_slice(&self.params.filter_value_count.to_le_bytes());
        out.extend_from_slice(&self.params.output_per_row.to_le_bytes());

        out.extend_from_slice(&(self.bytecode.len() as u64).to_le_bytes());
        for bc in &self.bytecode {
            out.extend_from_slice(&bc.option.to_le_bytes());
            out.extend_from_slice(&bc.args);
        }

        out.extend_from_slice(&(self.col_to_output_offset.len() as u64).to_le_bytes());
        for offset in &self.col_to_output_offset {
            out.extend_from_slice(&offset.to_le_bytes());
        }

        out.extend_from_slice(&(self.register_inits.len() as u64).to_le_bytes());
        for init in &self.register_inits {
            out.extend_from_slice(&init.dest_register.to_le_bytes());
            out.push(init.kind as u8);
            out.extend_from_slice(&init.source_index.to_le_bytes());
            out.push(0);
        }

        base64::engine::general_purpose::STANDARD.encode(out)
    }

    /// Reconstructs a plan from `serialize` output.
    pub fn deserialize(serialized: &str) -> Result<QueryPlan> {
        let corrupt = || Error::with_message(ErrorCode::Internal, "corrupt serialized plan");
        let raw = base64::engine::general_purpose::STANDARD
            .decode(serialized)
            .map_err(|_| corrupt())?;
        let mut cursor = Reader { buf: &raw, pos: 0 };

        let mut plan = QueryPlan {
            params: ExecutionParams {
                estimated_cost: f64::from_le_bytes(cursor.bytes::<8>().ok_or_else(corrupt)?),
                output_register: RegHandle::new(cursor.u32().ok_or_else(corrupt)?),
                max_row_count: cursor.u32().ok_or_else(corrupt)?,
                estimated_row_count: cursor.u32().ok_or_else(corrupt)?,
                register_count: cursor.u32().ok_or_else(corrupt)?,
                filter_value_count: cursor.u32().ok_or_else(corrupt)?,
                output_per_row: cursor.u32().ok_or_else(corrupt)?,
            },
            ..QueryPlan::default()
        };

        let bytecode_count = cursor.u64().ok_or_else(corrupt)?;
        for _ in 0..bytecode_count {
            let option = cursor.u32().ok_or_else(corrupt)?;
            let args = cursor.bytes::<36>().ok_or_else(corrupt)?;
            plan.bytecode.push(Bytecode { option, args });
        }

        let cols = cursor.u64().ok_or_else(corrupt)?;
        for _ in 0..cols {
            plan.col_to_output_offset
                .push(cursor.u32().ok_or_else(corrupt)?);
        }

        let inits = cursor.u64().ok_or_else(corrupt)?;
        for _ in 0..inits {
            let dest_register = cursor.u32().ok_or_else(corrupt)?;
            let kind = RegisterInitKind::from_u8(cursor.u8().ok_or_else(corrupt)?)
                .ok_or_else(corrupt)?;
            let source_index = cursor.u16().ok_or_else(corrupt)?;
            let _pad = cursor.u8().ok_or_else(corrupt)?;
            plan.register_inits.push(RegisterInit {
                dest_register,
                kind,
                source_index,
            });
        }

        if cursor.pos != raw.len() {
            return Err(corrupt());
        }
        Ok(plan)
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn bytes<const N: usize>(&mut self) -> Option<[u8; N]> {
        let slice = self.buf.get(self.pos..self.pos + N)?;
        self.pos += N;
        slice.try_into().ok()
    }

    fn u8(&mut self) -> Option<u8> {
        self.bytes::<1>().map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.bytes::<2>().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Option<u32> {
        self.bytes::<4>().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Option<u64> {
        self.bytes::<8>().map(u64::from_le_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vdbe::ops::{opcode, InitRangeArgs};

    #[test]
    fn test_serialize_round_trip() {
        let mut plan = QueryPlan::default();
        plan.params.estimated_cost = 123.5;
        plan.params.output_register = RegHandle::new(7);
        plan.params.max_row_count = 100;
        plan.params.estimated_row_count = 10;
        plan.params.register_count = 9;
        plan.params.filter_value_count = 2;
        plan.params.output_per_row = 3;
        let mut bc = Bytecode::new(opcode::INIT_RANGE);
        InitRangeArgs {
            size: 100,
            dest_register: RegHandle::new(0),
        }
        .encode(&mut bc);
        plan.bytecode.push(bc);
        plan.col_to_output_offset.extend_from_slice(&[0, 1, 0]);
        plan.register_inits.push(RegisterInit {
            dest_register: 4,
            kind: RegisterInitKind::NullBitvector,
            source_index: 1,
        });

        let serialized = plan.serialize();
        assert!(serialized.is_ascii());
        let decoded = QueryPlan::deserialize(&serialized).unwrap();
        assert_eq!(decoded, plan);
    }

    #[test]
    fn test_deserialize_corrupt() {
        assert!(QueryPlan::deserialize("not base64 !!!").is_err());
        assert!(QueryPlan::deserialize("AAAA").is_err());
    }
}
