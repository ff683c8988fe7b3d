//! The architecture-backend seam: every MIPS and ARM opcode or
//! pseudo-instruction the parser produces is boxed behind this trait so
//! [`crate::command::Command::Instr`] can validate/encode it without
//! knowing which backend owns it.

pub mod arm;
pub mod mips;

use crate::error::Result;
use crate::expression::{Arena, EvalEnv};
use crate::symbol_table::SymbolTable;

/// One parsed opcode or pseudo-instruction, architecture-specific.
///
/// Mirrors the `validate`/`encode` contract every [`crate::command::Command`]
/// variant follows; symbol-file and listing output are handled uniformly by
/// the driver from `mnemonic()` and `size()` rather than per-instruction,
/// since no backend needs bespoke listing output beyond the disassembled
/// text.
pub trait Instruction {
    /// Re-evaluates operand expressions and any backend-specific sizing
    /// (MIPS load-delay `nop` insertion, ARM literal pool range checks).
    /// Returns whether anything observable changed this pass.
    fn validate(&mut self, env: &EvalEnv, symbols: &SymbolTable, arena: &mut Arena) -> Result<bool>;

    /// Current encoded size in bytes; stable once `validate` stops
    /// reporting a change.
    fn size(&self) -> i64;

    /// Emits the final encoded bytes. Only called after the fixed point is
    /// reached, so operand values are final.
    fn encode(&self, env: &EvalEnv, symbols: &SymbolTable, arena: &Arena) -> Result<Vec<u8>>;

    /// Lowercase mnemonic, for listings and error messages.
    fn mnemonic(&self) -> &str;
}

/// Which instruction set mode is currently active, toggled by `.arm`/
/// `.thumb`/architecture-select directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchMode {
    Mips,
    Arm,
    Thumb,
}
