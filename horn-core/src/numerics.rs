use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Div, Mul, Rem, Sub};

use rand::prelude::*;
use serde::{Deserialize, Serialize};

/// First integer a double can no longer represent exactly: an f64
/// mantissa carries 53 bits.
pub const MOST_POSITIVE_EXACT_FLOAT: i64 = 1 << 53;

/// The i64 range expressed as doubles. 2^63 itself is representable as
/// a float but not as an i64 (whose maximum is 2^63 - 1), so the upper
/// bound is taken by negating `i64::MIN as f64` and is exclusive.
const MOST_POSITIVE_I64_FLOAT: f64 = -(i64::MIN as f64);
const MOST_NEGATIVE_I64_FLOAT: f64 = i64::MIN as f64;

/// Numbers in Horn terms: exact integers or doubles. Arithmetic is
/// checked; every operation that can overflow or leave the domain
/// returns `None`, which the caller turns into a silent goal failure.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Integer(i64),
    Float(f64),
}

// Integer/integer arithmetic stays exact and checked; as soon as a
// float is involved the whole operation promotes to f64.
impl Add for Numeric {
    type Output = Option<Self>;

    fn add(self, other: Self) -> Option<Self> {
        match (self, other) {
            (Numeric::Integer(a), Numeric::Integer(b)) => a.checked_add(b).map(Numeric::Integer),
            _ => Some(Numeric::Float(self.as_float() + other.as_float())),
        }
    }
}

impl Sub for Numeric {
    type Output = Option<Self>;

    fn sub(self, other: Self) -> Option<Self> {
        match (self, other) {
            (Numeric::Integer(a), Numeric::Integer(b)) => a.checked_sub(b).map(Numeric::Integer),
            _ => Some(Numeric::Float(self.as_float() - other.as_float())),
        }
    }
}

impl Mul for Numeric {
    type Output = Option<Self>;

    fn mul(self, other: Self) -> Option<Self> {
        match (self, other) {
            (Numeric::Integer(a), Numeric::Integer(b)) => a.checked_mul(b).map(Numeric::Integer),
            _ => Some(Numeric::Float(self.as_float() * other.as_float())),
        }
    }
}

impl Div for Numeric {
    type Output = Option<Self>;

    /// Division is always float division; a zero divisor fails.
    fn div(self, other: Self) -> Option<Self> {
        if other.is_zero() {
            return None;
        }
        Some(Numeric::Float(self.as_float() / other.as_float()))
    }
}

impl Rem for Numeric {
    type Output = Option<Self>;

    fn rem(self, other: Self) -> Option<Self> {
        if other.is_zero() {
            return None;
        }
        match (self, other) {
            (Numeric::Integer(a), Numeric::Integer(b)) => a.checked_rem(b).map(Numeric::Integer),
            _ => Some(Numeric::Float(self.as_float() % other.as_float())),
        }
    }
}

impl Numeric {
    pub fn is_zero(&self) -> bool {
        match self {
            Numeric::Integer(i) => *i == 0,
            Numeric::Float(f) => *f == 0.0,
        }
    }

    fn as_float(&self) -> f64 {
        match self {
            Numeric::Integer(i) => *i as f64,
            Numeric::Float(f) => *f,
        }
    }

    /// Flooring modulo; the result takes the sign of the modulus.
    pub fn modulo(self, other: Self) -> Option<Self> {
        if other.is_zero() {
            return None;
        }
        match (self, other) {
            (Numeric::Integer(a), Numeric::Integer(b)) => a.checked_rem_euclid(b).map(|r| {
                // rem_euclid is non-negative; shift into the modulus' sign.
                if b < 0 && r != 0 {
                    Numeric::Integer(r + b)
                } else {
                    Numeric::Integer(r)
                }
            }),
            _ => {
                let (a, b) = (self.as_float(), other.as_float());
                Some(Numeric::Float(a - b * (a / b).floor()))
            }
        }
    }

    pub fn abs(self) -> Option<Self> {
        match self {
            Numeric::Integer(i) => i.checked_abs().map(Numeric::Integer),
            Numeric::Float(f) => Some(Numeric::Float(f.abs())),
        }
    }

    pub fn min_of(self, other: Self) -> Option<Self> {
        if self <= other {
            Some(self)
        } else if other < self {
            Some(other)
        } else {
            None // NaN on either side
        }
    }

    pub fn max_of(self, other: Self) -> Option<Self> {
        if self >= other {
            Some(self)
        } else if other > self {
            Some(other)
        } else {
            None
        }
    }

    pub fn pow(self, other: Self) -> Option<Self> {
        match (self, other) {
            (Numeric::Integer(a), Numeric::Integer(b)) if (0..=u32::MAX as i64).contains(&b) => {
                a.checked_pow(b as u32).map(Numeric::Integer)
            }
            _ => {
                let r = self.as_float().powf(other.as_float());
                r.is_finite().then(|| Numeric::Float(r))
            }
        }
    }

    /// Square root; negative operands fail.
    pub fn sqrt(self) -> Option<Self> {
        let f = self.as_float();
        (f >= 0.0).then(|| Numeric::Float(f.sqrt()))
    }

    pub fn floor(self) -> Option<Self> {
        match self {
            Numeric::Integer(_) => Some(self),
            Numeric::Float(f) => float_to_integer(f.floor()),
        }
    }

    pub fn ceil(self) -> Option<Self> {
        match self {
            Numeric::Integer(_) => Some(self),
            Numeric::Float(f) => float_to_integer(f.ceil()),
        }
    }

    pub fn round(self) -> Option<Self> {
        match self {
            Numeric::Integer(_) => Some(self),
            Numeric::Float(f) => float_to_integer(f.round()),
        }
    }
}

fn float_to_integer(f: f64) -> Option<Numeric> {
    if f.is_finite() && MOST_NEGATIVE_I64_FLOAT <= f && f < MOST_POSITIVE_I64_FLOAT {
        Some(Numeric::Integer(f as i64))
    } else {
        None
    }
}

impl PartialEq for Numeric {
    fn eq(&self, other: &Self) -> bool {
        matches!(self.partial_cmp(other), Some(Ordering::Equal))
    }
}

impl Eq for Numeric {}

/// A float whose value is exactly some i64, if any. Zeros collapse to
/// plain 0 here, which is what makes `0`, `0.0` and `-0.0` hash alike.
fn as_exact_i64(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && (MOST_NEGATIVE_I64_FLOAT..MOST_POSITIVE_I64_FLOAT).contains(&f) {
        Some(f as i64)
    } else {
        None
    }
}

impl Hash for Numeric {
    /// Values that compare equal must hash equal across both
    /// representations, so anything with an exact integer form hashes
    /// through that form. NaN compares equal to nothing, itself
    /// included, and gets a throwaway hash so table lookups miss.
    fn hash<H>(&self, state: &mut H)
    where
        H: Hasher,
    {
        const INTEGER_TAG: u8 = 0;
        const FLOAT_TAG: u8 = 1;
        match self {
            Numeric::Integer(i) => (INTEGER_TAG, *i).hash(state),
            Numeric::Float(f) if f.is_nan() => (FLOAT_TAG, random::<u64>()).hash(state),
            Numeric::Float(f) => match as_exact_i64(*f) {
                Some(i) => (INTEGER_TAG, i).hash(state),
                None => (FLOAT_TAG, f.to_bits()).hash(state),
            },
        }
    }
}

/// Exact comparison of an i64 against an f64. Casting the integer to
/// f64 rounds beyond 2^53 and would report false ties there, so wide
/// integers are compared on the integer side instead.
fn int_float_cmp(i: i64, f: f64) -> Option<Ordering> {
    if f.is_nan() {
        return None;
    }
    if i.unsigned_abs() < MOST_POSITIVE_EXACT_FLOAT as u64 {
        // The integer converts to f64 without rounding.
        return (i as f64).partial_cmp(&f);
    }
    if f >= MOST_POSITIVE_I64_FLOAT {
        Some(Ordering::Less)
    } else if f < MOST_NEGATIVE_I64_FLOAT {
        Some(Ordering::Greater)
    } else {
        // The float fits in i64 range; truncation is safe because any
        // fractional part it might still carry cannot flip an ordering
        // against an integer this wide.
        i.partial_cmp(&(f as i64))
    }
}

impl PartialOrd for Numeric {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (*self, *other) {
            (Numeric::Integer(a), Numeric::Integer(b)) => a.partial_cmp(&b),
            (Numeric::Float(a), Numeric::Float(b)) => a.partial_cmp(&b),
            (Numeric::Integer(a), Numeric::Float(b)) => int_float_cmp(a, b),
            (Numeric::Float(a), Numeric::Integer(b)) => {
                int_float_cmp(b, a).map(Ordering::reverse)
            }
        }
    }
}

impl From<i64> for Numeric {
    fn from(other: i64) -> Self {
        Self::Integer(other)
    }
}
impl From<f64> for Numeric {
    fn from(other: f64) -> Self {
        Self::Float(other)
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Numeric::Integer(i) => write!(f, "{}", i),
            Numeric::Float(x) => write!(f, "{}", x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::hash_map::DefaultHasher;

    fn hash<T: Hash>(t: &T) -> u64 {
        let mut s = DefaultHasher::new();
        t.hash(&mut s);
        s.finish()
    }

    #[test]
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    /// Mixed integer/double comparison stays exact at every width.
    fn test_mixed_comparison() {
        // Nothing compares equal to NaN.
        assert!(Numeric::Integer(1) != Numeric::Float(f64::NAN));
        assert!(!(Numeric::Integer(1) < Numeric::Float(f64::NAN)));
        assert!(Numeric::Float(f64::NAN) != Numeric::Float(f64::NAN));

        // All zeros equal.
        assert!(Numeric::Integer(0) == Numeric::Float(0.0));
        assert!(Numeric::Integer(0) == Numeric::Float(-0.0));
        assert!(Numeric::Float(0.0) == Numeric::Float(-0.0));

        // Infinity compares greater than all ints.
        assert!(Numeric::Integer(i64::MAX) < Numeric::Float(f64::INFINITY));
        assert!(Numeric::Integer(i64::MIN) > Numeric::Float(f64::NEG_INFINITY));

        // Float representable as long compares correctly.
        assert!(Numeric::Integer(1) == Numeric::Float(1.0));
        assert!(Numeric::Integer(2) > Numeric::Float(1.0));
        assert!(Numeric::Integer(-2) < Numeric::Float(1.0));
        assert!(Numeric::Integer(1 << 52) == Numeric::Float((2.0_f64).powi(52)));
        assert!(Numeric::Integer((1 << 52) + 1) > Numeric::Float((2.0_f64).powi(52)));

        // Long not exactly representable as float compares correctly.
        assert!(Numeric::Integer((1 << 53) + 1) > Numeric::Float((2.0_f64).powi(53)));
        assert!(Numeric::Integer(-(1 << 53) - 1) < Numeric::Float(-(2.0_f64).powi(53)));

        // Float beyond the i64 range compares correctly.
        assert!(Numeric::Integer(1 << 56) < Numeric::Float((2.0_f64).powi(70)));
        assert!(Numeric::Integer(i64::MIN) > Numeric::Float(-(2.0_f64).powi(70)));
        assert!(Numeric::Integer(i64::MAX) < Numeric::Float((2.0_f64).powi(63)));

        // Near-integer floats compare correctly.
        assert!(Numeric::Integer(2) < Numeric::Float(2.1));
        assert!(Numeric::Integer(2) < Numeric::Float(2.0 + 2.0 * f64::EPSILON));
        assert!(Numeric::Integer(2) > Numeric::Float(2.0 - 2.0 * f64::EPSILON));
    }

    #[test]
    fn test_numeric_hash() {
        assert_ne!(
            hash(&Numeric::Float(f64::NAN)),
            hash(&Numeric::Float(f64::NAN))
        );
        assert_eq!(hash(&Numeric::Float(1.0)), hash(&Numeric::Float(1.0)));
        assert_eq!(hash(&Numeric::Float(0.0)), hash(&Numeric::Float(-0.0)));
        assert_eq!(hash(&Numeric::Integer(0)), hash(&Numeric::Float(0.0)));
        assert_eq!(hash(&Numeric::Integer(1)), hash(&Numeric::Float(1.0)));
        assert_ne!(hash(&Numeric::Integer(-1)), hash(&Numeric::Float(1.0)));
    }

    #[test]
    fn test_checked_arithmetic() {
        assert_eq!(
            Numeric::Integer(2) + Numeric::Integer(3),
            Some(Numeric::Integer(5))
        );
        assert_eq!(Numeric::Integer(i64::MAX) + Numeric::Integer(1), None);
        assert_eq!(Numeric::Integer(1) / Numeric::Integer(0), None);
        assert_eq!(Numeric::Float(1.0) / Numeric::Float(0.0), None);
        assert_eq!(Numeric::Integer(7) % Numeric::Integer(0), None);
        assert_eq!(
            Numeric::Integer(7) % Numeric::Integer(2),
            Some(Numeric::Integer(1))
        );
        assert_eq!(
            Numeric::Integer(-7).modulo(Numeric::Integer(2)),
            Some(Numeric::Integer(1))
        );
        assert_eq!(
            Numeric::Integer(7).modulo(Numeric::Integer(-2)),
            Some(Numeric::Integer(-1))
        );
        assert_eq!(Numeric::Integer(-4).sqrt(), None);
        assert_eq!(Numeric::Integer(9).sqrt(), Some(Numeric::Float(3.0)));
        assert_eq!(
            Numeric::Integer(2).pow(Numeric::Integer(10)),
            Some(Numeric::Integer(1024))
        );
        assert_eq!(Numeric::Float(2.5).floor(), Some(Numeric::Integer(2)));
        assert_eq!(Numeric::Float(2.5).ceil(), Some(Numeric::Integer(3)));
        assert_eq!(Numeric::Float(2.5).round(), Some(Numeric::Integer(3)));
    }
}
