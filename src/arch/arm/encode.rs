//! ARM/THUMB opcode schema and the [`ArmInstruction`] that implements
//! [`crate::arch::Instruction`] over it.
//!
//! As with the MIPS table, only a representative slice of mnemonics is
//! populated; the schema — condition field, operand2 rotated immediate,
//! the `mov`/`mvn`, `and`/`bic`, `cmp`/`cmn` inverted-form fallback, and
//! THUMB's narrower fixed-width operand fields — is what matters.

use super::branch::{arm_branch_offset, thumb_long_branch_halves, thumb_short_branch_offset};
use super::pool::{PoolRequest, SharedPool};
use super::registers::Condition;
use crate::arch::Instruction;
use crate::error::{Error, Result};
use crate::expression::{self, Arena, EvalEnv, ExprRef};
use crate::symbol_table::SymbolTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Rd,
    Rn,
    Rm,
    /// Operand2: register, shifted register, or rotated 8-bit immediate.
    Operand2,
    /// Branch target, encoded per `BranchForm`.
    BranchTarget,
    /// `ldr rd, =value`: encoded as a PC-relative load from the literal pool.
    PoolLoad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchForm {
    ArmRelative,
    ArmToThumb,
    ThumbShort,
    ThumbLong,
}

/// Which alternate-opcode swap applies when an operand2 immediate only fits
/// in inverted form (the `mov`/`mvn`, `and`/`bic`, `cmp`/`cmn` families).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvertedForm {
    None,
    MovMvn,
    AndBic,
    CmpCmn,
}

#[derive(Debug, Clone, Copy)]
pub struct OpcodeRow {
    pub mnemonic: &'static str,
    pub operands: &'static [OperandKind],
    /// Template with the condition nibble (bits 31:28) left as zero; ARM
    /// only. THUMB rows leave the fixed bits set and ignore condition.
    pub template: u32,
    pub thumb: bool,
    pub branch_form: Option<BranchForm>,
    pub inverted: InvertedForm,
    /// Bit position operand2's rotated-immediate/register value starts at
    /// once placed (ARM Data Processing: bits 11:0).
    pub operand2_shift: u32,
}

macro_rules! row {
    ($mnemonic:expr, [$($op:expr),* $(,)?], $template:expr, $thumb:expr, $branch:expr, $inv:expr) => {
        OpcodeRow { mnemonic: $mnemonic, operands: &[$($op),*], template: $template, thumb: $thumb, branch_form: $branch, inverted: $inv, operand2_shift: 0 }
    };
}

use OperandKind::*;

pub const OPCODE_TABLE: &[OpcodeRow] = &[
    row!("mov", [Rd, Operand2], 0x01A0_0000, false, None, InvertedForm::MovMvn),
    row!("mvn", [Rd, Operand2], 0x01E0_0000, false, None, InvertedForm::MovMvn),
    row!("add", [Rd, Rn, Operand2], 0x0080_0000, false, None, InvertedForm::None),
    row!("sub", [Rd, Rn, Operand2], 0x0040_0000, false, None, InvertedForm::None),
    row!("and", [Rd, Rn, Operand2], 0x0000_0000, false, None, InvertedForm::AndBic),
    row!("bic", [Rd, Rn, Operand2], 0x01C0_0000, false, None, InvertedForm::AndBic),
    row!("cmp", [Rn, Operand2], 0x0150_0000, false, None, InvertedForm::CmpCmn),
    row!("cmn", [Rn, Operand2], 0x0170_0000, false, None, InvertedForm::CmpCmn),
    row!("orr", [Rd, Rn, Operand2], 0x0180_0000, false, None, InvertedForm::None),
    row!("eor", [Rd, Rn, Operand2], 0x0020_0000, false, None, InvertedForm::None),
    row!("b", [BranchTarget], 0x0A00_0000, false, Some(BranchForm::ArmRelative), InvertedForm::None),
    row!("bl", [BranchTarget], 0x0B00_0000, false, Some(BranchForm::ArmRelative), InvertedForm::None),
    row!("blx", [BranchTarget], 0xFA00_0000, false, Some(BranchForm::ArmToThumb), InvertedForm::None),
    row!("ldr", [Rd, PoolLoad], 0x051F_0000, false, None, InvertedForm::None),
    row!("bx", [Rm], 0x012F_FF10, false, None, InvertedForm::None),
    row!("b", [BranchTarget], 0xE000, true, Some(BranchForm::ThumbShort), InvertedForm::None),
    row!("bl", [BranchTarget], 0xF000_F800, true, Some(BranchForm::ThumbLong), InvertedForm::None),
];

pub fn candidates(mnemonic: &str, thumb: bool) -> Vec<&'static OpcodeRow> {
    OPCODE_TABLE.iter().filter(|row| row.mnemonic.eq_ignore_ascii_case(mnemonic) && row.thumb == thumb).collect()
}

#[derive(Debug, Clone)]
pub enum Operand {
    Reg(u8),
    /// Operand2 as a plain (not-yet-rotated) value expression; rotation is
    /// chosen at encode time.
    Expr(ExprRef),
    Pool(PoolRequest),
}

pub struct ArmInstruction {
    pub row: &'static OpcodeRow,
    pub operands: Vec<Operand>,
    pub condition: Condition,
    pub pool: Option<SharedPool>,
    last_value: i64,
}

impl ArmInstruction {
    pub fn new(row: &'static OpcodeRow, operands: Vec<Operand>, condition: Condition, pool: Option<SharedPool>) -> Self {
        ArmInstruction { row, operands, condition, pool, last_value: i64::MIN }
    }
}

impl Instruction for ArmInstruction {
    fn validate(&mut self, env: &EvalEnv, symbols: &SymbolTable, arena: &mut Arena) -> Result<bool> {
        let mut value = 0i64;
        for op in &self.operands {
            if let Operand::Expr(expr) = op {
                expression::simplify(arena, *expr, env, symbols, env.in_unknown_block);
                value = expression::evaluate(arena, *expr, env, symbols).as_i64().unwrap_or(0);
            }
        }
        if let Some(Operand::Pool(request)) = self.operands.iter().find(|o| matches!(o, Operand::Pool(_))) {
            if let Some(pool) = &self.pool {
                if pool.is_flushed() {
                    let _ = pool.offset_for(*request, env.memory_pos, self.row.thumb);
                }
            }
        }
        let changed = value != self.last_value;
        self.last_value = value;
        Ok(changed)
    }

    fn size(&self) -> i64 {
        match (self.row.thumb, self.row.branch_form) {
            (true, Some(BranchForm::ThumbLong)) => 4,
            (true, _) => 2,
            _ => 4,
        }
    }

    fn encode(&self, env: &EvalEnv, symbols: &SymbolTable, arena: &Arena) -> Result<Vec<u8>> {
        if let Some(form) = self.row.branch_form {
            return encode_branch(self, form, env, symbols, arena);
        }
        if self.operands.iter().any(|o| matches!(o, Operand::Pool(_))) {
            return encode_pool_load(self, env, symbols, arena);
        }
        encode_data_processing(self, env, symbols, arena)
    }

    fn mnemonic(&self) -> &str {
        self.row.mnemonic
    }
}

fn target_address(instr: &ArmInstruction, env: &EvalEnv, symbols: &SymbolTable, arena: &Arena) -> i64 {
    instr
        .operands
        .iter()
        .find_map(|op| match op {
            Operand::Expr(expr) => Some(expression::evaluate(arena, *expr, env, symbols).as_i64().unwrap_or(0)),
            _ => None,
        })
        .unwrap_or(0)
}

fn encode_branch(instr: &ArmInstruction, form: BranchForm, env: &EvalEnv, symbols: &SymbolTable, arena: &Arena) -> Result<Vec<u8>> {
    let target = target_address(instr, env, symbols, arena);
    match form {
        BranchForm::ArmRelative => {
            let offset = arm_branch_offset(target, env.memory_pos)?;
            let word = (instr.condition.encoding() << 28) | instr.row.template | offset;
            Ok(word.to_le_bytes().to_vec())
        }
        BranchForm::ArmToThumb => {
            let (offset, h_bit) = super::branch::arm_to_thumb_blx_offset(target, env.memory_pos)?;
            let mut word = instr.row.template | offset;
            if h_bit {
                word |= 1 << 24;
            }
            Ok(word.to_le_bytes().to_vec())
        }
        BranchForm::ThumbShort => {
            let offset = thumb_short_branch_offset(target, env.memory_pos)?;
            let halfword = (instr.row.template as u16) | offset as u16;
            Ok(halfword.to_le_bytes().to_vec())
        }
        BranchForm::ThumbLong => {
            let (hi, lo) = thumb_long_branch_halves(target, env.memory_pos)?;
            let first = 0xF000u16 | hi as u16;
            let second = 0xF800u16 | lo as u16;
            let mut bytes = first.to_le_bytes().to_vec();
            bytes.extend_from_slice(&second.to_le_bytes());
            Ok(bytes)
        }
    }
}

fn encode_pool_load(instr: &ArmInstruction, env: &EvalEnv, _symbols: &SymbolTable, _arena: &Arena) -> Result<Vec<u8>> {
    let pool = instr.pool.as_ref().ok_or(Error::MissingPoolEntry)?;
    let request = instr
        .operands
        .iter()
        .find_map(|op| match op {
            Operand::Pool(r) => Some(*r),
            _ => None,
        })
        .ok_or(Error::MissingPoolEntry)?;
    let offset = pool.offset_for(request, env.memory_pos, instr.row.thumb)?;
    let rd = instr
        .operands
        .iter()
        .find_map(|op| match op {
            Operand::Reg(r) => Some(*r),
            _ => None,
        })
        .unwrap_or(0);
    let word = (instr.condition.encoding() << 28) | instr.row.template | ((rd as u32) << 12) | offset;
    Ok(word.to_le_bytes().to_vec())
}

fn encode_data_processing(instr: &ArmInstruction, env: &EvalEnv, symbols: &SymbolTable, arena: &Arena) -> Result<Vec<u8>> {
    let mut word = (instr.condition.encoding() << 28) | instr.row.template;
    let mut rd_seen = false;
    for (kind, op) in instr.row.operands.iter().zip(&instr.operands) {
        match (kind, op) {
            (OperandKind::Rd, Operand::Reg(r)) => {
                word |= (*r as u32) << 12;
                rd_seen = true;
            }
            (OperandKind::Rn, Operand::Reg(r)) => word |= (*r as u32) << 16,
            (OperandKind::Rm, Operand::Reg(r)) => word |= *r as u32,
            (OperandKind::Operand2, Operand::Reg(r)) => word |= *r as u32,
            (OperandKind::Operand2, Operand::Expr(expr)) => {
                let value = expression::evaluate(arena, *expr, env, symbols).as_i64().unwrap_or(0);
                word |= encode_operand2(instr, value)?;
            }
            _ => {}
        }
    }
    let _ = rd_seen;
    Ok(word.to_le_bytes().to_vec())
}

/// Encodes an immediate as ARM's rotated 8-bit-value/4-bit-rotation
/// operand2 form, falling back to the inverted mnemonic's value (`mov
/// #-1` as `mvn #0`, `and #~x` as `bic #x`, `cmp #-x` as `cmn #x`) when the
/// direct value does not fit any rotation.
fn encode_operand2(instr: &ArmInstruction, value: i64) -> Result<u32> {
    if let Some(encoded) = rotate_encode(value as u32) {
        return Ok(0x0200_0000 | encoded);
    }
    let alternate = match instr.row.inverted {
        InvertedForm::MovMvn | InvertedForm::AndBic => !(value as u32),
        InvertedForm::CmpCmn => (-(value as i64)) as u32,
        InvertedForm::None => return Err(Error::InvalidShiftedImmediate),
    };
    rotate_encode(alternate).map(|encoded| 0x0200_0000 | encoded).ok_or(Error::InvalidShiftedImmediate)
}

/// Finds a `(value, rotation)` pair such that `value.rotate_right(rotation
/// * 2) == target`, the form an 8-bit immediate and even rotation amount
/// can represent.
fn rotate_encode(target: u32) -> Option<u32> {
    for rotation in 0..16u32 {
        let rotated = target.rotate_left(rotation * 2);
        if rotated <= 0xFF {
            return Some((rotation << 8) | rotated);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn env(pc: i64) -> EvalEnv<'static> {
        static ROOT: std::sync::OnceLock<PathBuf> = std::sync::OnceLock::new();
        EvalEnv {
            memory_pos: pc,
            org: pc,
            orga: pc,
            headersize: 0,
            endianness_name: "little",
            output_name: String::new(),
            is_arm: true,
            is_thumb: false,
            root_dir: ROOT.get_or_init(|| PathBuf::from(".")),
            in_unknown_block: false,
        }
    }

    #[test]
    fn rotate_encode_finds_a_large_aligned_value() {
        assert_eq!(rotate_encode(0xFF00_0000), Some((4 << 8) | 0xFF));
    }

    #[test]
    fn unrepresentable_immediate_without_inverted_form_is_rejected() {
        let row = candidates("add", false)[0];
        let instr = ArmInstruction::new(row, vec![], Condition::Al, None);
        assert!(encode_operand2(&instr, 0x1234_5678).is_err());
    }

    #[test]
    fn mov_falls_back_to_mvn_form_for_inverted_immediate() {
        let row = candidates("mov", false)[0];
        let instr = ArmInstruction::new(row, vec![], Condition::Al, None);
        // !(-1) == 0, representable directly, so mov #-1 succeeds via mvn #0.
        assert!(encode_operand2(&instr, -1i64).is_ok());
    }

    #[test]
    fn mov_encodes_condition_in_top_nibble() {
        let row = candidates("mov", false)[0];
        let instr = ArmInstruction::new(row, vec![Operand::Reg(0)], Condition::Eq, None);
        let bytes = instr.encode(&env(0), &SymbolTable::new(), &Arena::new()).unwrap();
        let word = u32::from_le_bytes(bytes.try_into().unwrap());
        assert_eq!(word >> 28, Condition::Eq.encoding());
    }
}
