//! `set_condition_codes`: the one place every arithmetic/logical instruction routes through
//! to update X/N/Z/V/C, per spec.md §4.2's formulas.

use crate::registers::{ConditionCodes, Size};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpClass {
    Addition,
    Subtraction,
    Other,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct CcrMask {
    pub(crate) x: bool,
    pub(crate) n: bool,
    pub(crate) z: bool,
    pub(crate) v: bool,
    pub(crate) c: bool,
}

impl CcrMask {
    pub(crate) const ALL: Self = Self { x: true, n: true, z: true, v: true, c: true };
    pub(crate) const NZVC: Self = Self { x: false, n: true, z: true, v: true, c: true };
    pub(crate) const NZ: Self = Self { x: false, n: true, z: true, v: false, c: false };
    pub(crate) const Z_ONLY: Self = Self { x: false, n: false, z: true, v: false, c: false };
}

/// `source`/`dest`/`result` are the raw (untruncated) operand bit patterns; `size` picks out
/// which bit is the sign bit and which bits count toward zero.
pub(crate) fn set_condition_codes(
    ccr: &mut ConditionCodes,
    source: u32,
    dest: u32,
    result: u32,
    size: Size,
    class: OpClass,
    mask: CcrMask,
) {
    let s = size.sign_bit(source);
    let d = size.sign_bit(dest);
    let r = size.sign_bit(size.truncate(result));

    let (carry, overflow) = match class {
        OpClass::Addition => (
            (s && d) || (!r && d) || (s && !r),
            (s && d && !r) || (!s && !d && r),
        ),
        OpClass::Subtraction => (
            (s && !d) || (r && !d) || (s && r),
            (!s && d && !r) || (s && !d && r),
        ),
        OpClass::Other => (false, false),
    };

    if mask.c {
        ccr.carry = carry;
    }
    if mask.x {
        ccr.extend = carry;
    }
    if mask.v {
        ccr.overflow = overflow;
    }
    if mask.n {
        ccr.negative = r;
    }
    if mask.z {
        ccr.zero = size.truncate(result) == 0;
    }
}

/// Logical ops (AND/OR/EOR/MOVE/CLR/TST/Scc source...) only ever set N/Z and clear V/C;
/// X is left untouched.
pub(crate) fn set_logical_flags(ccr: &mut ConditionCodes, result: u32, size: Size) {
    ccr.negative = size.sign_bit(result);
    ccr.zero = size.truncate(result) == 0;
    ccr.overflow = false;
    ccr.carry = false;
}
