//! Bytecode builder
//!
//! Low-level emission layer shared by the query planner and the tree
//! transformer: register allocation, scope-keyed register caching (so "the
//! register holding column X's storage" is allocated once per scope), and
//! numbered scratch slots whose Slab+Span register pairs are recycled across
//! planning phases.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::util::Slab;
use crate::vdbe::ops::Bytecode;
use crate::vdbe::registers::{RegHandle, Span};

/// Vector type for instruction streams.
pub type BytecodeVector = SmallVec<[Bytecode; 16]>;

/// Register kinds cached per (scope, kind, column-or-index). The numeric
/// values form the cache key; they never appear in emitted bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CachedRegKind {
    Storage = 0,
    NullBv,
    PrefixPopcount,
    SmallValueEqBv,
    SmallValueEqPopcount,
    IndexPerm,
}

/// A scratch slot's Slab+Span register pair.
#[derive(Debug, Clone, Copy)]
pub struct ScratchRegisters {
    pub slab: RegHandle<Slab<u32>>,
    pub span: RegHandle<Span>,
}

#[derive(Debug, Clone, Copy)]
struct ScratchSlot {
    slab: RegHandle<Slab<u32>>,
    span: RegHandle<Span>,
    in_use: bool,
}

/// Accumulates bytecode and allocates registers.
#[derive(Default)]
pub struct BytecodeBuilder {
    bytecode: BytecodeVector,
    register_count: u32,
    scope_caches: Vec<FxHashMap<u64, u32>>,
    scratch_slots: Vec<Option<ScratchSlot>>,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    // === Register allocation ===

    pub fn allocate_register<T>(&mut self) -> RegHandle<T> {
        let reg = RegHandle::new(self.register_count);
        self.register_count += 1;
        reg
    }

    pub fn register_count(&self) -> u32 {
        self.register_count
    }

    // === Scope-based register caching ===

    /// Creates a new cache scope and returns its id.
    pub fn create_cache_scope(&mut self) -> u32 {
        self.scope_caches.push(FxHashMap::default());
        (self.scope_caches.len() - 1) as u32
    }

    /// Returns the cached register for `(kind, index)` in the scope, or
    /// allocates one. The boolean is true when newly allocated, telling the
    /// caller to emit the one-time initialization for it.
    pub fn get_or_allocate_cached_register<T>(
        &mut self,
        scope_id: u32,
        kind: CachedRegKind,
        index: u32,
    ) -> (RegHandle<T>, bool) {
        let key = ((kind as u64) << 32) | index as u64;
        if let Some(&reg) = self.scope_caches[scope_id as usize].get(&key) {
            return (RegHandle::new(reg), false);
        }
        let reg = self.allocate_register::<T>();
        self.scope_caches[scope_id as usize].insert(key, reg.index);
        (reg, true)
    }

    /// Drops all cached registers for a scope.
    pub fn clear_cache_scope(&mut self, scope_id: u32) {
        self.scope_caches[scope_id as usize].clear();
    }

    // === Scratch slots ===

    /// Returns the slot's register pair, allocating registers on first use.
    /// Does not emit `AllocateIndices`; the caller does, so it can attach
    /// its own cost accounting.
    pub fn get_or_create_scratch_registers(&mut self, slot_id: u32) -> ScratchRegisters {
        if self.scratch_slots.len() <= slot_id as usize {
            self.scratch_slots.resize(slot_id as usize + 1, None);
        }
        if self.scratch_slots[slot_id as usize].is_none() {
            let slab = self.allocate_register::<Slab<u32>>();
            let span = self.allocate_register::<Span>();
            self.scratch_slots[slot_id as usize] = Some(ScratchSlot {
                slab,
                span,
                in_use: false,
            });
        }
        let slot = self.scratch_slots[slot_id as usize].as_ref().unwrap_or_else(|| unreachable!());
        ScratchRegisters {
            slab: slot.slab,
            span: slot.span,
        }
    }

    pub fn mark_scratch_in_use(&mut self, slot_id: u32) {
        if let Some(Some(slot)) = self.scratch_slots.get_mut(slot_id as usize) {
            slot.in_use = true;
        }
    }

    pub fn release_scratch(&mut self, slot_id: u32) {
        if let Some(Some(slot)) = self.scratch_slots.get_mut(slot_id as usize) {
            slot.in_use = false;
        }
    }

    pub fn is_scratch_in_use(&self, slot_id: u32) -> bool {
        matches!(
            self.scratch_slots.get(slot_id as usize),
            Some(Some(slot)) if slot.in_use
        )
    }

    // === Opcode emission ===

    /// Appends an instruction and returns it for argument encoding.
    pub fn add_opcode(&mut self, option: u32) -> &mut Bytecode {
        self.bytecode.push(Bytecode::new(option));
        self.bytecode.last_mut().unwrap_or_else(|| unreachable!())
    }

    pub fn bytecode(&self) -> &BytecodeVector {
        &self.bytecode
    }

    pub fn into_bytecode(self) -> BytecodeVector {
        self.bytecode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vdbe::registers::Range;

    #[test]
    fn test_register_allocation() {
        let mut b = BytecodeBuilder::new();
        let r1 = b.allocate_register::<Range>();
        let r2 = b.allocate_register::<Span>();
        assert_eq!(r1.index, 0);
        assert_eq!(r2.index, 1);
        assert_eq!(b.register_count(), 2);
    }

    #[test]
    fn test_cached_register() {
        let mut b = BytecodeBuilder::new();
        let scope = b.create_cache_scope();
        let (r1, inserted1) =
            b.get_or_allocate_cached_register::<Range>(scope, CachedRegKind::Storage, 3);
        let (r2, inserted2) =
            b.get_or_allocate_cached_register::<Range>(scope, CachedRegKind::Storage, 3);
        assert!(inserted1);
        assert!(!inserted2);
        assert_eq!(r1.index, r2.index);
        // A different column gets a different register.
        let (r3, inserted3) =
            b.get_or_allocate_cached_register::<Range>(scope, CachedRegKind::Storage, 4);
        assert!(inserted3);
        assert_ne!(r1.index, r3.index);
        // Same column, different kind.
        let (r4, inserted4) =
            b.get_or_allocate_cached_register::<Range>(scope, CachedRegKind::NullBv, 3);
        assert!(inserted4);
        assert_ne!(r1.index, r4.index);
    }

    #[test]
    fn test_scratch_slots() {
        let mut b = BytecodeBuilder::new();
        let s1 = b.get_or_create_scratch_registers(0);
        assert!(!b.is_scratch_in_use(0));
        b.mark_scratch_in_use(0);
        assert!(b.is_scratch_in_use(0));
        b.release_scratch(0);
        assert!(!b.is_scratch_in_use(0));
        // The same slot reuses the same registers.
        let s2 = b.get_or_create_scratch_registers(0);
        assert_eq!(s1.slab.index, s2.slab.index);
        assert_eq!(s1.span.index, s2.span.index);
        // A different slot gets fresh registers.
        let s3 = b.get_or_create_scratch_registers(1);
        assert_ne!(s1.slab.index, s3.slab.index);
    }
}
