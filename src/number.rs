// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::fmt::{Debug, Formatter};
use std::cmp::{Ord, Ordering};
use std::ops::{AddAssign, Div, MulAssign, SubAssign};
use std::rc::Rc;
use std::str::FromStr;

use anyhow::{bail, Result};
use num_traits::cast::ToPrimitive;
use num_traits::Pow;

use serde::ser::Serializer;
use serde::Serialize;

pub type BigInt = i128;

// Base-10 float with half-to-even (banker's) rounding.
type BigFloat = dashu_float::FBig<dashu_float::round::mode::HalfEven, 10>;
const PRECISION: usize = 50;

#[derive(Clone, Debug, PartialEq)]
pub struct BigDecimal {
    d: BigFloat,
}

impl AsRef<BigFloat> for BigDecimal {
    fn as_ref(&self) -> &BigFloat {
        &self.d
    }
}

impl From<BigFloat> for BigDecimal {
    fn from(value: BigFloat) -> Self {
        BigDecimal { d: value }
    }
}

impl BigDecimal {
    fn is_integer(&self) -> bool {
        self.d.floor() == self.d
    }
}

/// Exact numeric value. Integers stay integers until an operation
/// produces a fractional result; mixed operands lift the integer side.
#[derive(Clone)]
pub enum Number {
    Int(BigInt),
    Big(Rc<BigDecimal>),
}

use Number::*;

impl Debug for Number {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Int(i) => i.fmt(f),
            Big(b) => b.d.fmt(f),
        }
    }
}

impl Serialize for Number {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Int(i) => {
                if let Ok(n) = i64::try_from(*i) {
                    n.serialize(serializer)
                } else if let Ok(n) = u64::try_from(*i) {
                    n.serialize(serializer)
                } else {
                    (*i as f64).serialize(serializer)
                }
            }
            Big(_) => match self.as_i64() {
                Some(n) => n.serialize(serializer),
                _ => match self.as_f64() {
                    Some(f) if f.is_finite() => f.serialize(serializer),
                    _ => serializer.serialize_none(),
                },
            },
        }
    }
}

impl From<BigFloat> for Number {
    fn from(n: BigFloat) -> Self {
        Self::Big(Rc::new(BigDecimal::from(
            n.with_precision(PRECISION).value(),
        )))
    }
}

impl From<u64> for Number {
    fn from(n: u64) -> Self {
        Int(n as BigInt)
    }
}

impl From<usize> for Number {
    fn from(n: usize) -> Self {
        Int(n as BigInt)
    }
}

impl From<i64> for Number {
    fn from(n: i64) -> Self {
        Int(n as BigInt)
    }
}

impl From<i128> for Number {
    fn from(n: i128) -> Self {
        Int(n)
    }
}

impl From<f64> for Number {
    fn from(n: f64) -> Self {
        // Reading from float directly is not precise. Serialize to string and read.
        match Self::from_str(&format!("{n}")) {
            Ok(v) => v,
            _ => BigFloat::ZERO.into(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseNumberError;

impl FromStr for Number {
    type Err = ParseNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.contains(['.', 'e', 'E']) {
            if let Ok(i) = BigInt::from_str(s) {
                return Ok(Int(i));
            }
        }
        if let Ok(v) = BigFloat::from_str(s) {
            return Ok(v.into());
        }
        Ok(f64::from_str(s).map_err(|_| ParseNumberError)?.into())
    }
}

impl Number {
    pub const fn zero() -> Number {
        Int(0)
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Int(i) => *i == 0,
            Big(b) => b.d == BigFloat::ZERO,
        }
    }

    pub const fn is_decimal(&self) -> bool {
        matches!(self, Big(_))
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Int(i) => u64::try_from(*i).ok(),
            Big(b) if b.is_integer() => b.d.to_u64(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Int(i) => i64::try_from(*i).ok(),
            Big(b) if b.is_integer() => b.d.to_i64(),
            _ => None,
        }
    }

    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Int(i) => Some(*i),
            Big(b) if b.is_integer() => b.d.to_i128(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Int(i) => Some(*i as f64),
            Big(b) => Some(b.d.to_binary().value().to_f64().value()),
        }
    }

    fn to_big_float(&self) -> BigFloat {
        match self {
            Int(i) => BigFloat::from(*i).with_precision(PRECISION).value(),
            Big(b) => b.d.clone(),
        }
    }

    pub fn is_integer(&self) -> bool {
        match self {
            Int(_) => true,
            Big(b) => b.is_integer(),
        }
    }

    pub fn is_positive(&self) -> bool {
        match self {
            Int(i) => *i > 0,
            Big(b) => b.d.sign() == dashu_base::Sign::Positive && b.d != BigFloat::ZERO,
        }
    }
}

impl Eq for Number {}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Int(a), Int(b)) => a == b,
            (Big(a), Big(b)) => a.d == b.d,
            _ => self.to_big_float() == other.to_big_float(),
        }
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Int(a), Int(b)) => a.cmp(b),
            (Big(a), Big(b)) => a.d.cmp(&b.d),
            _ => self.to_big_float().cmp(&other.to_big_float()),
        }
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Number {
    pub fn add(&self, rhs: &Self) -> Result<Number> {
        if let (Int(a), Int(b)) = (self, rhs) {
            if let Some(c) = a.checked_add(*b) {
                return Ok(Int(c));
            }
        }
        let mut d = self.to_big_float();
        d.add_assign(&rhs.to_big_float());
        Ok(d.into())
    }

    pub fn sub(&self, rhs: &Self) -> Result<Number> {
        if let (Int(a), Int(b)) = (self, rhs) {
            if let Some(c) = a.checked_sub(*b) {
                return Ok(Int(c));
            }
        }
        let mut d = self.to_big_float();
        d.sub_assign(&rhs.to_big_float());
        Ok(d.into())
    }

    pub fn mul(&self, rhs: &Self) -> Result<Number> {
        if let (Int(a), Int(b)) = (self, rhs) {
            if let Some(c) = a.checked_mul(*b) {
                return Ok(Int(c));
            }
        }
        let mut d = self.to_big_float();
        d.mul_assign(&rhs.to_big_float());
        Ok(d.into())
    }

    pub fn divide(&self, rhs: &Self) -> Result<Number> {
        if rhs.is_zero() {
            bail!("div.by_zero");
        }
        if let (Int(a), Int(b)) = (self, rhs) {
            if a % b == 0 {
                return Ok(Int(a / b));
            }
        }
        Ok(self.to_big_float().div(&rhs.to_big_float()).into())
    }

    pub fn modulo(&self, rhs: &Self) -> Result<Number> {
        use dashu_base::RemEuclid;
        if rhs.is_zero() {
            bail!("div.by_zero");
        }
        if let (Int(a), Int(b)) = (self, rhs) {
            return Ok(Int(a.rem_euclid(*b)));
        }
        Ok(self.to_big_float().rem_euclid(&rhs.to_big_float()).into())
    }

    pub fn pow(&self, rhs: &Self) -> Result<Number> {
        if let (Int(a), Int(b)) = (self, rhs) {
            if *b >= 0 {
                if let Ok(e) = u32::try_from(*b) {
                    if let Some(c) = a.checked_pow(e) {
                        return Ok(Int(c));
                    }
                }
            }
        }
        Ok(self.to_big_float().pow(&rhs.to_big_float()).into())
    }

    pub fn neg(&self) -> Number {
        match self {
            Int(i) => Int(-i),
            Big(b) => {
                let mut d = BigFloat::ZERO;
                d.sub_assign(&b.d);
                d.into()
            }
        }
    }

    pub fn abs(&self) -> Number {
        use dashu_base::Abs;
        match self {
            Int(i) => Int(i.abs()),
            Big(b) => b.d.clone().abs().into(),
        }
    }

    pub fn floor(&self) -> Number {
        match self {
            Int(i) => Int(*i),
            Big(b) => b.d.floor().into(),
        }
    }

    pub fn ceil(&self) -> Number {
        match self {
            Int(i) => Int(*i),
            Big(b) => b.d.ceil().into(),
        }
    }

    // Half-to-even, per the rounding mode of the underlying float.
    pub fn round(&self) -> Number {
        match self {
            Int(i) => Int(*i),
            Big(b) => b.d.round().into(),
        }
    }

    pub fn round_dp(&self, dp: u32) -> Result<Number> {
        match self {
            Int(i) => Ok(Int(*i)),
            Big(_) => {
                let scale = Self::ten_pow(dp as i32);
                self.mul(&scale)?.round().divide(&scale)
            }
        }
    }

    pub fn ten_pow(e: i32) -> Number {
        BigFloat::from(10)
            .with_precision(PRECISION)
            .value()
            .pow(&BigFloat::from(e))
            .into()
    }

    /// Decimal text with no exponent and no superfluous fraction digits.
    /// Integral values render without a fraction part.
    pub fn to_canonical_string(&self) -> String {
        match self.as_i128() {
            Some(i) => i.to_string(),
            _ => match self.as_f64() {
                Some(f) => canonical_f64_string(f).unwrap_or_else(|| "null".to_string()),
                _ => "null".to_string(),
            },
        }
    }

    /// Fixed five fraction digits, magnitude truncated toward zero.
    /// Used when rendering currency quantities into triple objects.
    pub fn to_truncated_5dp_string(&self) -> String {
        let scaled = match self.mul(&Int(100_000)) {
            Ok(s) => s,
            _ => return "0.00000".to_string(),
        };
        let t = if scaled >= Int(0) {
            scaled.floor()
        } else {
            scaled.ceil()
        };
        match t.as_i128() {
            Some(i) => {
                let sign = if i < 0 { "-" } else { "" };
                let mag = i.unsigned_abs();
                format!("{sign}{}.{:05}", mag / 100_000, mag % 100_000)
            }
            _ => self.to_canonical_string(),
        }
    }
}

/// Positional rendering of a finite f64 with at most 15 significant
/// digits. Returns None for NaN and infinities (callers emit null).
pub fn canonical_f64_string(x: f64) -> Option<String> {
    if !x.is_finite() {
        return None;
    }
    if x == 0.0 {
        return Some("0".to_string());
    }

    // LowerExp normalizes to d.ddd...e<exp>.
    let s = format!("{x:e}");
    let (mantissa, exp) = s.split_once('e')?;
    let mut exp: i32 = exp.parse().ok()?;
    let (sign, mantissa) = match mantissa.strip_prefix('-') {
        Some(m) => ("-", m),
        _ => ("", mantissa),
    };
    let mut digits: Vec<u8> = mantissa
        .bytes()
        .filter(|b| b.is_ascii_digit())
        .map(|b| b - b'0')
        .collect();

    // Cap at 15 significant digits, rounding the tail half-up.
    if digits.len() > 15 {
        let round_up = digits[15] >= 5;
        digits.truncate(15);
        if round_up {
            let mut i = digits.len();
            loop {
                if i == 0 {
                    digits.insert(0, 1);
                    exp += 1;
                    break;
                }
                i -= 1;
                if digits[i] == 9 {
                    digits[i] = 0;
                } else {
                    digits[i] += 1;
                    break;
                }
            }
        }
    }
    while digits.len() > 1 && digits.last() == Some(&0) {
        digits.pop();
    }

    // Place the decimal point at position exp+1 in the digit string.
    let point = exp + 1;
    let mut out = String::from(sign);
    if point <= 0 {
        out.push_str("0.");
        for _ in 0..(-point) {
            out.push('0');
        }
        for d in &digits {
            out.push((b'0' + d) as char);
        }
    } else if (point as usize) >= digits.len() {
        for d in &digits {
            out.push((b'0' + d) as char);
        }
        for _ in 0..(point as usize - digits.len()) {
            out.push('0');
        }
    } else {
        for (i, d) in digits.iter().enumerate() {
            if i == point as usize {
                out.push('.');
            }
            out.push((b'0' + d) as char);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(s: &str) -> Number {
        match Number::from_str(s) {
            Ok(n) => n,
            _ => Number::zero(),
        }
    }

    #[test]
    fn integer_arithmetic_stays_integral() -> Result<()> {
        let a = Number::from(100_000u64);
        let b = Number::from(15u64);
        assert_eq!(a.add(&b)?.to_canonical_string(), "100015");
        assert_eq!(a.mul(&b)?.to_canonical_string(), "1500000");
        assert!(!a.add(&b)?.is_decimal());
        Ok(())
    }

    #[test]
    fn mixed_promotion_is_exact() -> Result<()> {
        let revenue = Number::from(100_000u64);
        let factor = Number::from(1u64).add(&num("0.15"))?;
        assert_eq!(revenue.mul(&factor)?.to_canonical_string(), "115000");
        Ok(())
    }

    #[test]
    fn division_by_zero_fails() {
        let a = Number::from(1u64);
        assert!(a.divide(&Number::zero()).is_err());
        assert!(a.modulo(&Number::zero()).is_err());
    }

    #[test]
    fn bankers_rounding() {
        assert_eq!(num("2.5").round().to_canonical_string(), "2");
        assert_eq!(num("3.5").round().to_canonical_string(), "4");
        assert_eq!(num("2.4").round().to_canonical_string(), "2");
        assert_eq!(num("-2.5").round().to_canonical_string(), "-2");
    }

    #[test]
    fn truncated_currency_rendering() {
        assert_eq!(num("150").to_truncated_5dp_string(), "150.00000");
        assert_eq!(num("12.345678").to_truncated_5dp_string(), "12.34567");
        assert_eq!(num("-0.000019").to_truncated_5dp_string(), "-0.00001");
    }

    #[test]
    fn canonical_float_rendering() {
        assert_eq!(canonical_f64_string(115000.0).as_deref(), Some("115000"));
        assert_eq!(canonical_f64_string(0.15).as_deref(), Some("0.15"));
        assert_eq!(canonical_f64_string(0.1 + 0.2).as_deref(), Some("0.3"));
        assert_eq!(canonical_f64_string(-0.005).as_deref(), Some("-0.005"));
        assert_eq!(canonical_f64_string(f64::NAN), None);
        assert_eq!(canonical_f64_string(f64::INFINITY), None);
    }
}
