//! Encodes one resolved [`OpcodeRow`] against its parsed operands into a
//! 32-bit word, and performs the per-pass validate work (range checks,
//! load-delay hazard tracking).

use super::delay::{DelayOutcome, SharedDelayState};
use super::opcode::{OpcodeFlags, OpcodeRow, OperandKind};
use crate::arch::Instruction;
use crate::error::{Error, Result};
use crate::expression::{self, Arena, EvalEnv, ExprRef};
use crate::symbol_table::SymbolTable;

/// One parsed operand: either a resolved register number or an expression
/// to be (re-)evaluated every validate pass.
#[derive(Debug, Clone)]
pub enum Operand {
    Reg(u8),
    Expr(ExprRef),
}

pub struct MipsInstruction {
    pub row: &'static OpcodeRow,
    pub operands: Vec<Operand>,
    pub delay: Option<SharedDelayState>,
    pub fix_load_delay: bool,
    last_imm: i64,
    inserted_nop: bool,
}

impl MipsInstruction {
    pub fn new(row: &'static OpcodeRow, operands: Vec<Operand>, delay: Option<SharedDelayState>, fix_load_delay: bool) -> Self {
        MipsInstruction { row, operands, delay, fix_load_delay, last_imm: i64::MIN, inserted_nop: false }
    }

    fn registers_read(&self) -> Vec<u8> {
        // rs/rt (and rd for the rare read-modify-write ops) are reads; rt
        // alone on a load is the *destination*, not a read, and is
        // excluded by construction since loads only ever list it as the
        // write target here.
        self.row
            .operands
            .iter()
            .zip(&self.operands)
            .filter_map(|(kind, op)| match (kind, op) {
                (OperandKind::Rs, Operand::Reg(r)) => Some(*r),
                (OperandKind::Rt, Operand::Reg(r)) if !self.row.flags.has(OpcodeFlags::DELAY_RT) => Some(*r),
                _ => None,
            })
            .collect()
    }

    fn destination_reg(&self) -> Option<u8> {
        if !self.row.flags.has(OpcodeFlags::DELAY_RT) {
            return None;
        }
        self.row.operands.iter().zip(&self.operands).find_map(|(kind, op)| match (kind, op) {
            (OperandKind::Rt, Operand::Reg(r)) => Some(*r),
            _ => None,
        })
    }
}

impl Instruction for MipsInstruction {
    fn validate(&mut self, env: &EvalEnv, symbols: &SymbolTable, arena: &mut Arena) -> Result<bool> {
        let mut imm = 0i64;
        for (kind, op) in self.row.operands.iter().zip(&self.operands) {
            if let (OperandKind::Imm16 | OperandKind::ImmPcRel16 | OperandKind::ImmJump26, Operand::Expr(expr)) = (kind, op) {
                expression::simplify(arena, *expr, env, symbols, env.in_unknown_block);
                imm = expression::evaluate(arena, *expr, env, symbols).as_i64().unwrap_or(0);
            }
        }
        if self.row.flags.has(OpcodeFlags::NEG_IMM) {
            imm = -imm;
        }

        if let Some(delay) = &self.delay {
            let reads = self.registers_read();
            let sets_pending = if self.row.flags.has(OpcodeFlags::DELAY_RT) {
                self.destination_reg()
            } else if self.row.flags.has(OpcodeFlags::DELAY_BRANCH) {
                Some(0xFF) // sentinel: "something is pending", rechecked below only for loads
            } else {
                None
            };
            let ignore_rtd = self.row.flags.has(OpcodeFlags::IGNORE_RTD);
            let outcome = delay.check(&reads, sets_pending, ignore_rtd);
            if outcome == DelayOutcome::Hazard && self.row.flags.has(OpcodeFlags::DELAY_BRANCH) {
                return Err(Error::Other(format!("{}: a branch may not sit in another branch's delay slot", self.row.mnemonic)));
            }
            self.inserted_nop = outcome == DelayOutcome::Hazard && self.fix_load_delay;
        }

        let changed = imm != self.last_imm;
        self.last_imm = imm;
        Ok(changed)
    }

    fn size(&self) -> i64 {
        if self.inserted_nop {
            8
        } else {
            4
        }
    }

    fn encode(&self, env: &EvalEnv, symbols: &SymbolTable, arena: &Arena) -> Result<Vec<u8>> {
        let mut word = self.row.template;
        for (kind, op) in self.row.operands.iter().zip(&self.operands) {
            let value = match op {
                Operand::Reg(r) => *r as i64,
                Operand::Expr(expr) => expression::evaluate(arena, *expr, env, symbols).as_i64().unwrap_or(0),
            };
            word |= place(*kind, value, env.memory_pos)?;
        }
        let mut bytes = word.to_le_bytes().to_vec();
        if self.inserted_nop {
            bytes.extend_from_slice(&[0, 0, 0, 0]);
        }
        Ok(bytes)
    }

    fn mnemonic(&self) -> &str {
        self.row.mnemonic
    }
}

fn place(kind: OperandKind, value: i64, pc: i64) -> Result<u32> {
    Ok(match kind {
        OperandKind::Rs => ((value as u32) & 0x1F) << 21,
        OperandKind::Rt => ((value as u32) & 0x1F) << 16,
        OperandKind::Rd => ((value as u32) & 0x1F) << 11,
        OperandKind::Shamt => ((value as u32) & 0x1F) << 6,
        OperandKind::Imm16 => {
            if !(-0x8000..=0xFFFF).contains(&value) {
                return Err(Error::ValueOutOfRange { value, bits: 16 });
            }
            (value as u32) & 0xFFFF
        }
        OperandKind::ImmPcRel16 => {
            let delta = (value - (pc + 4)) >> 2;
            if !(-(1 << 17)..(1 << 17)).contains(&(delta << 2)) {
                return Err(Error::BranchOutOfRange);
            }
            (delta as u32) & 0xFFFF
        }
        OperandKind::ImmJump26 => ((value as u32) >> 2) & 0x03FF_FFFF,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Arena;
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
            is_arm: false,
            is_thumb: false,
            root_dir: ROOT.get_or_init(|| PathBuf::from(".")),
            in_unknown_block: false,
        }
    }

    #[test]
    fn addu_encodes_rtype_fields() {
        let rows = super::super::opcode::candidates("addu", super::super::opcode::ArchSet::ALL);
        let row = rows[0];
        let instr = MipsInstruction::new(row, vec![Operand::Reg(8), Operand::Reg(9), Operand::Reg(10)], None, false);
        let symbols = SymbolTable::new();
        let arena = Arena::new();
        let bytes = instr.encode(&env(0), &symbols, &arena).unwrap();
        let word = u32::from_le_bytes(bytes.try_into().unwrap());
        assert_eq!(word, 0x0000_0021 | (9 << 21) | (10 << 16) | (8 << 11));
    }

    #[test]
    fn load_then_dependent_use_triggers_fix_up_nop() {
        let lw_rows = super::super::opcode::candidates("lw", super::super::opcode::ArchSet::ALL);
        let addu_rows = super::super::opcode::candidates("addu", super::super::opcode::ArchSet::ALL);
        let delay = super::super::delay::new_shared();
        let mut arena = Arena::new();
        let symbols = SymbolTable::new();
        let imm = {
            use crate::lexer::Lexer;
            use crate::token_stream::TokenStream;
            use std::collections::HashMap;
            let tokens = Lexer::tokenize("0").unwrap();
            let mut stream = TokenStream::new(tokens);
            expression::parse(&mut stream, &HashMap::new(), &mut arena, 0, 0).unwrap()
        };
        let mut lw = MipsInstruction::new(lw_rows[0], vec![Operand::Reg(8), Operand::Expr(imm), Operand::Reg(29)], Some(delay.clone()), true);
        lw.validate(&env(0), &symbols, &mut arena).unwrap();
        let mut addu = MipsInstruction::new(addu_rows[0], vec![Operand::Reg(9), Operand::Reg(8), Operand::Reg(8)], Some(delay), true);
        addu.validate(&env(4), &symbols, &mut arena).unwrap();
        assert_eq!(addu.size(), 8);
    }
}
