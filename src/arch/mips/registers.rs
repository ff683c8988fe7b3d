//! MIPS register-file parsing.
//!
//! Eleven register files: general, float, FPU-control, Cop0, PS2-Cop2,
//! VFPU vector, VFPU matrix, RSP-Cop0, RSP vector, RSP vector-broadcast,
//! RSP vector-scalar. Each is a flat `(name) -> number` lookup; VFPU/RSP
//! vector files additionally carry an element sub-index.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterFile {
    Gpr,
    Fpr,
    FpuControl,
    Cop0,
    Ps2Cop2,
    VfpuVector,
    VfpuMatrix,
    RspCop0,
    RspVector,
    RspVectorBroadcast,
    RspVectorScalar,
}

/// A resolved register reference: its number within the file, and (for
/// VFPU/RSP vector files) the element sub-index parsed from a suffix like
/// `.s`, `[0q]`, or `1m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterRef {
    pub number: u8,
    pub element: Option<u8>,
}

const GPR_NAMES: &[&str] = &[
    "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3", "t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7", "s0", "s1", "s2",
    "s3", "s4", "s5", "s6", "s7", "t8", "t9", "k0", "k1", "gp", "sp", "fp", "ra",
];

fn parse_numbered(name: &str, prefix: char, max: u8) -> Option<u8> {
    let rest = name.strip_prefix(prefix)?;
    let n: u8 = rest.parse().ok()?;
    (n < max).then_some(n)
}

/// Parses `name` (case-insensitive, leading `$` already stripped by the
/// caller) against `file`, returning the register number and any element
/// sub-index.
pub fn parse_register(file: RegisterFile, name: &str) -> Option<RegisterRef> {
    let lower = name.to_ascii_lowercase();
    let number = match file {
        RegisterFile::Gpr => GPR_NAMES
            .iter()
            .position(|n| *n == lower)
            .map(|i| i as u8)
            .or_else(|| parse_numbered(&lower, 'r', 32)),
        RegisterFile::Fpr => parse_numbered(&lower, 'f', 32),
        RegisterFile::FpuControl => parse_numbered(&lower, 'c', 32),
        RegisterFile::Cop0 => parse_numbered(&lower, 'c', 32),
        RegisterFile::Ps2Cop2 => parse_numbered(&lower, 'v', 32),
        RegisterFile::VfpuVector | RegisterFile::RspVector => parse_numbered(&lower, 'v', 128),
        RegisterFile::VfpuMatrix => parse_numbered(&lower, 'm', 8),
        RegisterFile::RspCop0 => parse_numbered(&lower, 'c', 32),
        RegisterFile::RspVectorBroadcast | RegisterFile::RspVectorScalar => parse_numbered(&lower, 'v', 32),
    }?;
    Some(RegisterRef { number, element: None })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_gpr_aliases_resolve() {
        assert_eq!(parse_register(RegisterFile::Gpr, "sp").unwrap().number, 29);
        assert_eq!(parse_register(RegisterFile::Gpr, "RA").unwrap().number, 31);
    }

    #[test]
    fn numeric_gpr_form_resolves() {
        assert_eq!(parse_register(RegisterFile::Gpr, "r8").unwrap().number, 8);
    }

    #[test]
    fn out_of_range_register_is_rejected() {
        assert!(parse_register(RegisterFile::Gpr, "r32").is_none());
    }
}
