//! Exact rational numbers.
//!
//! Score moments are printed by the renderer as fixed-point decimals and
//! alterations as `n/d` fractions. Both are kept exact as [`Ratio`]s so that
//! moments can be used as map keys and compared without float noise.

use num_rational::Ratio;

pub type Rational = Ratio<i128>;

pub const ZERO: Rational = Ratio::new_raw(0, 1);

/// Fixed-point decimals carry at most this many fractional digits.
const MAX_FRACTION_DIGITS: usize = 18;

/// `num/den`, or `None` for a zero denominator.
pub fn checked_new(num: i128, den: i128) -> Option<Rational> {
    (den != 0).then(|| Rational::new(num, den))
}

pub fn to_f64(value: Rational) -> f64 {
    *value.numer() as f64 / *value.denom() as f64
}

/// Multiply by an integer and round to the nearest integer, halves away
/// from zero.
pub fn scaled_round(value: Rational, factor: i128) -> i128 {
    (value * factor).round().to_integer()
}

/// Parse integers (`-3`), fractions (`1/2`, `-1/4`) and fixed-point decimals
/// (`0.7500000000000000`).
pub fn parse_rational(text: &str) -> Option<Rational> {
    let text = text.trim();
    if text.contains('/') {
        return text.parse().ok();
    }

    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
        || frac_part.len() > MAX_FRACTION_DIGITS
    {
        return None;
    }

    let mut num: i128 = 0;
    for c in int_part.chars().chain(frac_part.chars()) {
        num = num.checked_mul(10)?.checked_add(i128::from(c as u8 - b'0'))?;
    }
    let den = 10i128.checked_pow(frac_part.len() as u32)?;
    checked_new(if negative { -num } else { num }, den)
}
