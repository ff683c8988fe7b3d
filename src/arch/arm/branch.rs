//! Branch range checks and encodings for ARM `b`/`bl`/`blx` and THUMB's
//! short (`b`) and long (`bl`/`blx`) forms.

use crate::error::{Error, Result};

/// ARM `b`/`bl`: 24-bit signed word offset, so a ±32MiB byte range.
pub fn arm_branch_offset(target: i64, pc: i64) -> Result<u32> {
    let delta = target - (pc + 8);
    if delta % 4 != 0 {
        return Err(Error::InvalidArgument { argument: "branch target is not word-aligned".into() });
    }
    let word_delta = delta >> 2;
    if !(-(1 << 23)..(1 << 23)).contains(&word_delta) {
        return Err(Error::BranchOutOfRange);
    }
    Ok((word_delta as u32) & 0x00FF_FFFF)
}

/// `blx` to THUMB additionally folds bit 1 of the byte delta into the `H`
/// bit of the opcode rather than requiring word alignment.
pub fn arm_to_thumb_blx_offset(target: i64, pc: i64) -> Result<(u32, bool)> {
    let delta = target - (pc + 8);
    let rounded = delta & !1;
    let word_delta = rounded >> 2;
    if !(-(1 << 23)..(1 << 23)).contains(&word_delta) {
        return Err(Error::BranchOutOfRange);
    }
    let h_bit = (delta & 2) != 0;
    Ok(((word_delta as u32) & 0x00FF_FFFF, h_bit))
}

/// THUMB short `b`: 11-bit signed halfword offset, ±2KiB.
pub fn thumb_short_branch_offset(target: i64, pc: i64) -> Result<u32> {
    let delta = target - (pc + 4);
    if delta % 2 != 0 {
        return Err(Error::InvalidArgument { argument: "branch target is not halfword-aligned".into() });
    }
    let half_delta = delta >> 1;
    if !(-(1 << 10)..(1 << 10)).contains(&half_delta) {
        return Err(Error::BranchOutOfRange);
    }
    Ok((half_delta as u32) & 0x07FF)
}

/// THUMB long `bl`/`blx`: two 16-bit halves each carrying 11 bits of a
/// 22-bit signed halfword offset, ±4MiB.
pub fn thumb_long_branch_halves(target: i64, pc: i64) -> Result<(u32, u32)> {
    let delta = target - (pc + 4);
    if delta % 2 != 0 {
        return Err(Error::InvalidArgument { argument: "branch target is not halfword-aligned".into() });
    }
    let half_delta = delta >> 1;
    if !(-(1 << 21)..(1 << 21)).contains(&half_delta) {
        return Err(Error::BranchOutOfRange);
    }
    let high = ((half_delta >> 11) as u32) & 0x7FF;
    let low = (half_delta as u32) & 0x7FF;
    Ok((high, low))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_branch_offset_rejects_unaligned_target() {
        assert!(arm_branch_offset(0x1001, 0x1000).is_err());
    }

    #[test]
    fn arm_branch_offset_accepts_forward_target() {
        let offset = arm_branch_offset(0x1010, 0x1000).unwrap();
        assert_eq!(offset, (0x1010i64 - 0x1008) as u32 >> 2 & 0x00FF_FFFF);
    }

    #[test]
    fn thumb_long_branch_splits_into_two_elevens() {
        let (hi, lo) = thumb_long_branch_halves(0x10_0000, 0, ).unwrap();
        assert_eq!(hi & !0x7FF, 0);
        assert_eq!(lo & !0x7FF, 0);
    }

    #[test]
    fn branch_beyond_range_is_rejected() {
        assert!(arm_branch_offset(1 << 26, 0).is_err());
    }
}
