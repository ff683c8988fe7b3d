//! ARM register and condition-code parsing.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Eq,
    Ne,
    Cs,
    Cc,
    Mi,
    Pl,
    Vs,
    Vc,
    Hi,
    Ls,
    Ge,
    Lt,
    Gt,
    Le,
    Al,
    Nv,
}

impl Condition {
    pub fn encoding(self) -> u32 {
        use Condition::*;
        match self {
            Eq => 0x0,
            Ne => 0x1,
            Cs => 0x2,
            Cc => 0x3,
            Mi => 0x4,
            Pl => 0x5,
            Vs => 0x6,
            Vc => 0x7,
            Hi => 0x8,
            Ls => 0x9,
            Ge => 0xA,
            Lt => 0xB,
            Gt => 0xC,
            Le => 0xD,
            Al => 0xE,
            Nv => 0xF,
        }
    }

    pub fn parse(suffix: &str) -> Option<Condition> {
        use Condition::*;
        Some(match suffix.to_ascii_lowercase().as_str() {
            "eq" => Eq,
            "ne" => Ne,
            "cs" | "hs" => Cs,
            "cc" | "lo" => Cc,
            "mi" => Mi,
            "pl" => Pl,
            "vs" => Vs,
            "vc" => Vc,
            "hi" => Hi,
            "ls" => Ls,
            "ge" => Ge,
            "lt" => Lt,
            "gt" => Gt,
            "le" => Le,
            "al" => Al,
            "nv" => Nv,
            _ => return None,
        })
    }
}

/// Parses `r0`..`r15` and the named aliases `sp`/`lr`/`pc`.
pub fn parse_gpr(name: &str) -> Option<u8> {
    match name.to_ascii_lowercase().as_str() {
        "sp" => Some(13),
        "lr" => Some(14),
        "pc" => Some(15),
        other => {
            let n: u8 = other.strip_prefix('r')?.parse().ok()?;
            (n < 16).then_some(n)
        }
    }
}

/// Parses `c0`..`c15` coprocessor registers.
pub fn parse_coprocessor_register(name: &str) -> Option<u8> {
    let n: u8 = name.to_ascii_lowercase().strip_prefix('c')?.parse().ok()?;
    (n < 16).then_some(n)
}

/// Parses `p0`..`p15` coprocessor numbers.
pub fn parse_coprocessor_number(name: &str) -> Option<u8> {
    let n: u8 = name.to_ascii_lowercase().strip_prefix('p')?.parse().ok()?;
    (n < 16).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_aliases_resolve() {
        assert_eq!(parse_gpr("sp"), Some(13));
        assert_eq!(parse_gpr("PC"), Some(15));
        assert_eq!(parse_gpr("r4"), Some(4));
    }

    #[test]
    fn condition_aliases_share_an_encoding() {
        assert_eq!(Condition::parse("hs"), Some(Condition::Cs));
        assert_eq!(Condition::parse("lo"), Some(Condition::Cc));
    }
}
