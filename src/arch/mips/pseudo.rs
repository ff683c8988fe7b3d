//! Pseudo-instruction templates: an extended mnemonic expands to a short
//! sequence of real instructions, with an `.if` guard collapsing the
//! common case (a small immediate) to fewer real instructions.
//!
//! Expansion is textual: `%imm%`/`%rs%`/`%rt%`/`%rd%` placeholders in the
//! template are substituted with the concrete operand text, then the
//! result is re-parsed as an ordinary command sequence, here represented
//! as plain strings the real parser feeds back through itself.

/// One extended mnemonic's expansion rule.
pub struct MacroTemplate {
    pub mnemonic: &'static str,
    /// Guard over the immediate's magnitude; `None` means unconditional.
    /// When present, the first arm whose predicate holds is used.
    pub arms: &'static [MacroArm],
}

pub struct MacroArm {
    /// `None` = always matches (fallback arm, listed last).
    pub fits_bits: Option<u32>,
    pub template: &'static str,
}

pub const PSEUDO_TABLE: &[MacroTemplate] = &[
    MacroTemplate {
        mnemonic: "li",
        arms: &[
            MacroArm { fits_bits: Some(16), template: "addiu %rt%, $zero, %imm%" },
            MacroArm { fits_bits: None, template: "lui %rt%, hi(%imm%)\naddiu %rt%, %rt%, lo(%imm%)" },
        ],
    },
    MacroTemplate {
        mnemonic: "la",
        arms: &[MacroArm { fits_bits: None, template: "lui %rt%, hi(%imm%)\naddiu %rt%, %rt%, lo(%imm%)" }],
    },
    MacroTemplate {
        mnemonic: "nop",
        arms: &[MacroArm { fits_bits: None, template: "sll $zero, $zero, 0" }],
    },
    MacroTemplate {
        mnemonic: "move",
        arms: &[MacroArm { fits_bits: None, template: "addu %rd%, %rs%, $zero" }],
    },
    MacroTemplate {
        mnemonic: "abs",
        // (value ^ (value >> 31)) - (value >> 31), the branch-free two's
        // complement absolute value; kept as a single arm since it needs
        // no immediate-size guard.
        arms: &[MacroArm { fits_bits: None, template: "sra $at, %rs%, 31\nxor %rd%, %rs%, $at\nsubu %rd%, %rd%, $at" }],
    },
];

pub fn lookup(mnemonic: &str) -> Option<&'static MacroTemplate> {
    PSEUDO_TABLE.iter().find(|m| m.mnemonic.eq_ignore_ascii_case(mnemonic))
}

/// Picks the first arm whose bit-width guard the immediate fits, or the
/// unconditional fallback. `signed_fits` should treat the guard as a
/// signed range check (`li`'s 16-bit arm admits -0x8000..=0x7FFF, matching
/// the `addiu` immediate it expands to).
pub fn select_arm(template: &MacroTemplate, imm: Option<i64>) -> &'static MacroArm {
    for arm in template.arms {
        match (arm.fits_bits, imm) {
            (None, _) => return arm,
            (Some(bits), Some(v)) => {
                let half = 1i64 << (bits - 1);
                if v >= -half && v < half {
                    return arm;
                }
            }
            (Some(_), None) => {}
        }
    }
    template.arms.last().expect("every template has at least one arm")
}

/// Substitutes `%name%` placeholders with the given operand text.
pub fn expand(template: &str, subs: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in subs {
        out = out.replace(&format!("%{name}%"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn li_collapses_to_one_instruction_for_small_immediate() {
        let template = lookup("li").unwrap();
        let arm = select_arm(template, Some(100));
        assert_eq!(arm.template, "addiu %rt%, $zero, %imm%");
    }

    #[test]
    fn li_splits_into_upper_lower_for_large_immediate() {
        let template = lookup("li").unwrap();
        let arm = select_arm(template, Some(0x0001_0000));
        assert!(arm.template.contains("lui"));
    }

    #[test]
    fn expand_substitutes_every_placeholder() {
        let result = expand("addiu %rt%, $zero, %imm%", &[("rt", "$t0"), ("imm", "5")]);
        assert_eq!(result, "addiu $t0, $zero, 5");
    }
}
