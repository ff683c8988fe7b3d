//! ARM literal pool: `ldr Rn, =expr` enqueues an expression (often a forward
//! label reference) and emits a placeholder PC-relative load; `.pool`
//! flushes, evaluating every pending expression, deduplicating by the
//! resulting value, and back-patching each pending instruction's offset.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::expression::{self, Arena, EvalEnv, ExprRef};
use crate::symbol_table::SymbolTable;

#[derive(Debug, Clone, Copy)]
struct PendingEntry {
    expr: ExprRef,
    /// Index into `pool.values` once flushed; `None` until then.
    slot: Option<usize>,
}

/// One back-patch request: the instruction's own address and which
/// pending-entry index (into `state.pending`) it reads from.
#[derive(Debug, Clone, Copy)]
pub struct PoolRequest {
    pub pending_index: usize,
}

#[derive(Default)]
struct PoolInner {
    pending: Vec<PendingEntry>,
    /// Values actually written out by the most recent flush, in order.
    flushed_values: Vec<u32>,
    flush_address: Option<i64>,
}

/// Shared per-current-pool-scope state; a new scope starts after each
/// `.pool` flush.
#[derive(Clone, Default)]
pub struct SharedPool(Rc<RefCell<PoolInner>>);

impl SharedPool {
    pub fn new() -> Self {
        SharedPool::default()
    }

    /// Enqueues `expr` (typically a forward reference to a label whose
    /// address isn't known until later passes), returning the pending-entry
    /// index a later [`SharedPool::offset_for`] call uses to compute this
    /// instruction's back-patched immediate.
    pub fn enqueue(&self, expr: ExprRef) -> PoolRequest {
        let mut inner = self.0.borrow_mut();
        let pending_index = inner.pending.len();
        inner.pending.push(PendingEntry { expr, slot: None });
        PoolRequest { pending_index }
    }

    /// Flushes the pool at `pool_address` (already 4-byte aligned by the
    /// caller, which is an `AlignFill` node ahead of the `ArmPool`
    /// command), evaluating every pending expression against this pass's
    /// arena/symbols and deduplicating by the resulting value.
    pub fn flush(&self, pool_address: i64, arena: &Arena, env: &EvalEnv, symbols: &SymbolTable) -> Result<()> {
        let mut inner = self.0.borrow_mut();
        let resolved: Vec<u32> = inner
            .pending
            .iter()
            .map(|entry| expression::evaluate(arena, entry.expr, env, symbols).as_i64().map(|v| v as u32))
            .collect::<Option<Vec<u32>>>()
            .ok_or(Error::MissingPoolEntry)?;
        let mut values: Vec<u32> = Vec::new();
        let mut slots = Vec::with_capacity(resolved.len());
        for value in &resolved {
            let slot = values.iter().position(|v| v == value).unwrap_or_else(|| {
                values.push(*value);
                values.len() - 1
            });
            slots.push(slot);
        }
        for (entry, slot) in inner.pending.iter_mut().zip(slots) {
            entry.slot = Some(slot);
        }
        inner.flushed_values = values;
        inner.flush_address = Some(pool_address);
        Ok(())
    }

    /// Bytes this pool's `ArmPool` command emits once flushed.
    pub fn flushed_bytes(&self) -> Vec<u8> {
        let inner = self.0.borrow();
        inner.flushed_values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn is_flushed(&self) -> bool {
        self.0.borrow().flush_address.is_some()
    }

    /// Computes the back-patched PC-relative offset for `instruction_addr`:
    /// `pool_entry_address - (instruction_address + 8) & ~3` for ARM, `+4`
    /// and non-negative/word-aligned/≤1020 for THUMB.
    pub fn offset_for(&self, request: PoolRequest, instruction_addr: i64, thumb: bool) -> Result<u32> {
        let inner = self.0.borrow();
        let entry = inner.pending.get(request.pending_index).ok_or(Error::MissingPoolEntry)?;
        let slot = entry.slot.ok_or(Error::MissingPoolEntry)?;
        let pool_addr = inner.flush_address.ok_or(Error::MissingPoolEntry)?;
        let entry_addr = pool_addr + (slot as i64) * 4;
        if thumb {
            let offset = entry_addr - (instruction_addr + 4);
            if !(0..=1020).contains(&offset) || offset % 4 != 0 {
                return Err(Error::MissingPoolEntry);
            }
            Ok(offset as u32)
        } else {
            let offset = (entry_addr - (instruction_addr + 8)) & !3;
            if offset.unsigned_abs() > 4095 {
                return Err(Error::MissingPoolEntry);
            }
            Ok(offset.unsigned_abs() as u32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Value;
    use std::path::PathBuf;

    fn env(root: &PathBuf) -> EvalEnv<'_> {
        EvalEnv {
            memory_pos: 0,
            org: 0,
            orga: 0,
            headersize: 0,
            endianness_name: "little",
            output_name: String::new(),
            is_arm: true,
            is_thumb: false,
            root_dir: root,
            in_unknown_block: false,
        }
    }

    #[test]
    fn identical_values_dedup_to_one_slot() {
        let mut arena = Arena::new();
        let root = PathBuf::new();
        let symbols = SymbolTable::new();
        let pool = SharedPool::new();
        let a = pool.enqueue(arena.literal(Value::Integer(0xDEAD_BEEF)));
        let b = pool.enqueue(arena.literal(Value::Integer(0xDEAD_BEEF)));
        let c = pool.enqueue(arena.literal(Value::Integer(0xCAFE_BABE)));
        pool.flush(0x1000, &arena, &env(&root), &symbols).unwrap();
        assert_eq!(pool.offset_for(a, 0x0FF0, false).unwrap(), pool.offset_for(b, 0x0FF0, false).unwrap());
        assert_ne!(pool.offset_for(a, 0x0FF0, false).unwrap(), pool.offset_for(c, 0x0FF0, false).unwrap());
        assert_eq!(pool.flushed_bytes().len(), 8);
    }

    #[test]
    fn thumb_offset_must_be_non_negative_and_aligned() {
        let mut arena = Arena::new();
        let root = PathBuf::new();
        let symbols = SymbolTable::new();
        let pool = SharedPool::new();
        let entry = pool.enqueue(arena.literal(Value::Integer(1)));
        pool.flush(0x100, &arena, &env(&root), &symbols).unwrap();
        assert!(pool.offset_for(entry, 0x200, true).is_err());
    }
}
