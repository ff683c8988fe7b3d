//! The MIPS opcode table schema.
//!
//! The table itself is data — a handful of representative rows are
//! populated here; a full build ships the complete PSX/PS2/PSP/N64/RSP
//! instruction set through the same `OpcodeRow` shape. What matters is the
//! schema: `(mnemonic, operand fields, 32-bit template, allowed archs,
//! excluded archs, flag bits)`.

/// Which MIPS sub-target(s) a row is valid for, as a bitset so a row can
/// name e.g. "PSX or PS2" without duplicating rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchSet(pub u32);

impl ArchSet {
    pub const PSX: ArchSet = ArchSet(1 << 0);
    pub const PS2: ArchSet = ArchSet(1 << 1);
    pub const PSP: ArchSet = ArchSet(1 << 2);
    pub const N64: ArchSet = ArchSet(1 << 3);
    pub const RSP: ArchSet = ArchSet(1 << 4);
    pub const ALL: ArchSet = ArchSet(0x1F);

    pub const fn union(self, other: ArchSet) -> ArchSet {
        ArchSet(self.0 | other.0)
    }

    pub fn contains(self, arch: ArchSet) -> bool {
        self.0 & arch.0 != 0
    }
}

/// Bit flags describing operand encoding/hazard behavior a row needs (the
/// `MO_*` family). Only the ones the driver currently acts on are modeled;
/// the rest are documented for a future expansion of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpcodeFlags(pub u32);

impl OpcodeFlags {
    pub const NONE: OpcodeFlags = OpcodeFlags(0);
    /// Loads set the delay-pending register (`MO_DELAYRT`).
    pub const DELAY_RT: OpcodeFlags = OpcodeFlags(1 << 0);
    /// Branches/jumps set delay-pending and forbid a delay-slot branch (`MO_DELAY`).
    pub const DELAY_BRANCH: OpcodeFlags = OpcodeFlags(1 << 1);
    /// This instruction's own operand read of a pending register is not a
    /// hazard (`MO_IGNORERTD`).
    pub const IGNORE_RTD: OpcodeFlags = OpcodeFlags(1 << 2);
    /// Immediate must be negated before placement (`MO_NEGIMM`).
    pub const NEG_IMM: OpcodeFlags = OpcodeFlags(1 << 3);

    pub fn has(self, flag: OpcodeFlags) -> bool {
        self.0 & flag.0 != 0
    }
}

/// One operand slot: which field of the instruction word it occupies and
/// how to interpret the parsed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// `rs` field, bits 25:21.
    Rs,
    /// `rt` field, bits 20:16.
    Rt,
    /// `rd` field, bits 15:11.
    Rd,
    /// `sa` shift-amount field, bits 10:6.
    Shamt,
    /// Sign-extended 16-bit immediate, bits 15:0.
    Imm16,
    /// PC-relative branch target: `(target - (pc+4)) >> 2`, 16 bits (`MO_IPCR`).
    ImmPcRel16,
    /// Absolute jump target: `target >> 2`, 26 bits (`MO_IPCA`).
    ImmJump26,
}

#[derive(Debug, Clone, Copy)]
pub struct OpcodeRow {
    pub mnemonic: &'static str,
    pub operands: &'static [OperandKind],
    pub template: u32,
    pub arch: ArchSet,
    pub flags: OpcodeFlags,
}

macro_rules! row {
    ($mnemonic:expr, [$($op:expr),* $(,)?], $template:expr, $arch:expr, $flags:expr) => {
        OpcodeRow { mnemonic: $mnemonic, operands: &[$($op),*], template: $template, arch: $arch, flags: $flags }
    };
}

use OperandKind::*;

pub const OPCODE_TABLE: &[OpcodeRow] = &[
    row!("add", [Rd, Rs, Rt], 0x0000_0020, ArchSet::ALL, OpcodeFlags::NONE),
    row!("addu", [Rd, Rs, Rt], 0x0000_0021, ArchSet::ALL, OpcodeFlags::NONE),
    row!("sub", [Rd, Rs, Rt], 0x0000_0022, ArchSet::ALL, OpcodeFlags::NONE),
    row!("subu", [Rd, Rs, Rt], 0x0000_0023, ArchSet::ALL, OpcodeFlags::NONE),
    row!("and", [Rd, Rs, Rt], 0x0000_0024, ArchSet::ALL, OpcodeFlags::NONE),
    row!("or", [Rd, Rs, Rt], 0x0000_0025, ArchSet::ALL, OpcodeFlags::NONE),
    row!("xor", [Rd, Rs, Rt], 0x0000_0026, ArchSet::ALL, OpcodeFlags::NONE),
    row!("nor", [Rd, Rs, Rt], 0x0000_0027, ArchSet::ALL, OpcodeFlags::NONE),
    row!("slt", [Rd, Rs, Rt], 0x0000_002A, ArchSet::ALL, OpcodeFlags::NONE),
    row!("sltu", [Rd, Rs, Rt], 0x0000_002B, ArchSet::ALL, OpcodeFlags::NONE),
    row!("sll", [Rd, Rt, Shamt], 0x0000_0000, ArchSet::ALL, OpcodeFlags::NONE),
    row!("srl", [Rd, Rt, Shamt], 0x0000_0002, ArchSet::ALL, OpcodeFlags::NONE),
    row!("sra", [Rd, Rt, Shamt], 0x0000_0003, ArchSet::ALL, OpcodeFlags::NONE),
    row!("jr", [Rs], 0x0000_0008, ArchSet::ALL, OpcodeFlags::DELAY_BRANCH),
    row!("addi", [Rt, Rs, Imm16], 0x2000_0000, ArchSet::ALL, OpcodeFlags::NONE),
    row!("addiu", [Rt, Rs, Imm16], 0x2400_0000, ArchSet::ALL, OpcodeFlags::NONE),
    row!("andi", [Rt, Rs, Imm16], 0x3000_0000, ArchSet::ALL, OpcodeFlags::NONE),
    row!("ori", [Rt, Rs, Imm16], 0x3400_0000, ArchSet::ALL, OpcodeFlags::NONE),
    row!("xori", [Rt, Rs, Imm16], 0x3800_0000, ArchSet::ALL, OpcodeFlags::NONE),
    row!("slti", [Rt, Rs, Imm16], 0x2800_0000, ArchSet::ALL, OpcodeFlags::NONE),
    row!("sltiu", [Rt, Rs, Imm16], 0x2C00_0000, ArchSet::ALL, OpcodeFlags::NONE),
    row!("lui", [Rt, Imm16], 0x3C00_0000, ArchSet::ALL, OpcodeFlags::NONE),
    row!("lw", [Rt, Imm16, Rs], 0x8C00_0000, ArchSet::ALL, OpcodeFlags::DELAY_RT),
    row!("lb", [Rt, Imm16, Rs], 0x8000_0000, ArchSet::ALL, OpcodeFlags::DELAY_RT),
    row!("lbu", [Rt, Imm16, Rs], 0x9000_0000, ArchSet::ALL, OpcodeFlags::DELAY_RT),
    row!("lh", [Rt, Imm16, Rs], 0x8400_0000, ArchSet::ALL, OpcodeFlags::DELAY_RT),
    row!("lhu", [Rt, Imm16, Rs], 0x9400_0000, ArchSet::ALL, OpcodeFlags::DELAY_RT),
    row!("sw", [Rt, Imm16, Rs], 0xAC00_0000, ArchSet::ALL, OpcodeFlags::NONE),
    row!("sb", [Rt, Imm16, Rs], 0xA000_0000, ArchSet::ALL, OpcodeFlags::NONE),
    row!("sh", [Rt, Imm16, Rs], 0xA400_0000, ArchSet::ALL, OpcodeFlags::NONE),
    row!("beq", [Rs, Rt, ImmPcRel16], 0x1000_0000, ArchSet::ALL, OpcodeFlags::DELAY_BRANCH),
    row!("bne", [Rs, Rt, ImmPcRel16], 0x1400_0000, ArchSet::ALL, OpcodeFlags::DELAY_BRANCH),
    row!("j", [ImmJump26], 0x0800_0000, ArchSet::ALL, OpcodeFlags::DELAY_BRANCH),
    row!("jal", [ImmJump26], 0x0C00_0000, ArchSet::ALL, OpcodeFlags::DELAY_BRANCH),
];

/// Returns every row whose mnemonic matches (case-insensitive) and whose
/// `arch` set contains `active_arch`; opcode resolution then tries each in
/// turn against the parsed operand list.
pub fn candidates(mnemonic: &str, active_arch: ArchSet) -> Vec<&'static OpcodeRow> {
    OPCODE_TABLE
        .iter()
        .filter(|row| row.mnemonic.eq_ignore_ascii_case(mnemonic) && row.arch.contains(active_arch))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_filters_by_mnemonic_and_arch() {
        let rows = candidates("ADDU", ArchSet::PSX);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].mnemonic, "addu");
    }

    #[test]
    fn unknown_mnemonic_yields_no_candidates() {
        assert!(candidates("frobnicate", ArchSet::ALL).is_empty());
    }
}
