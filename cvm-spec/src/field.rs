//! Field arithmetic for the CVM
//!
//! P = 2^251 + 17 * 2^192 + 1
//!
//! Properties:
//! - 252-bit prime, every VM word is an element of this field
//! - P - 1 = 2^192 * (2^59 + 17), so square roots use Tonelli-Shanks
//! - 3 generates the multiplicative group
//!
//! Values are stored as canonical `BigUint`s in `[0, P)`.

use num_bigint::{BigInt, BigUint, Sign};
use num_integer::Integer;
use num_traits::{One, ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign};
use std::sync::LazyLock;

/// The field prime as a `BigUint`.
pub static PRIME: LazyLock<BigUint> =
    LazyLock::new(|| (BigUint::one() << 251) + (BigUint::from(17u32) << 192) + BigUint::one());

/// (P - 1) / 2, the boundary between "positive" and "negative" felts.
static HALF_PRIME: LazyLock<BigUint> = LazyLock::new(|| (&*PRIME - 1u32) >> 1);

/// Number of bits needed to hold any field element.
pub const FELT_BITS: u64 = 252;

/// Smallest quadratic non-residue, used by `sqrt`.
const NON_RESIDUE: u32 = 3;

/// Field element
///
/// Values are stored in canonical form: 0 ≤ value < P
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Felt(BigUint);

impl Felt {
    pub fn zero() -> Self {
        Felt(BigUint::zero())
    }

    pub fn one() -> Self {
        Felt(BigUint::one())
    }

    /// Reduce an arbitrary unsigned integer modulo P
    pub fn new(value: BigUint) -> Self {
        if value < *PRIME {
            Felt(value)
        } else {
            Felt(value % &*PRIME)
        }
    }

    /// Parse a hex string, with or without a `0x` prefix
    pub fn from_hex(s: &str) -> Option<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        BigUint::parse_bytes(digits.as_bytes(), 16).map(Self::new)
    }

    /// Parse a decimal string, possibly negative
    pub fn from_dec_str(s: &str) -> Option<Self> {
        BigInt::parse_bytes(s.as_bytes(), 10).map(Self::from)
    }

    /// Get the canonical value
    #[inline]
    pub fn value(&self) -> &BigUint {
        &self.0
    }

    pub fn to_biguint(&self) -> BigUint {
        self.0.clone()
    }

    /// The value as a `u64`, if it fits
    pub fn to_u64(&self) -> Option<u64> {
        self.0.to_u64()
    }

    pub fn to_usize(&self) -> Option<usize> {
        self.0.to_usize()
    }

    /// Signed representative in (-P/2, P/2]
    pub fn to_signed(&self) -> BigInt {
        if self.0 > *HALF_PRIME {
            BigInt::from_biguint(Sign::Minus, &*PRIME - &self.0)
        } else {
            BigInt::from_biguint(Sign::Plus, self.0.clone())
        }
    }

    /// Signed representative as an `i64`, if it fits
    pub fn to_i64(&self) -> Option<i64> {
        self.to_signed().to_i64()
    }

    /// Number of significant bits
    #[inline]
    pub fn bits(&self) -> u64 {
        self.0.bits()
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_one(&self) -> bool {
        self.0.is_one()
    }

    /// Little-endian bytes, zero padded to `n_bytes`. `None` if the value is wider.
    pub fn to_bytes_le(&self, n_bytes: usize) -> Option<Vec<u8>> {
        if self.0.bits() > (n_bytes as u64) * 8 {
            return None;
        }
        let mut bytes = self.0.to_bytes_le();
        bytes.resize(n_bytes, 0);
        Some(bytes)
    }

    pub fn from_bytes_le(bytes: &[u8]) -> Self {
        Self::new(BigUint::from_bytes_le(bytes))
    }

    /// Compute self^exp mod P
    pub fn pow(&self, exp: &BigUint) -> Self {
        Felt(self.0.modpow(exp, &PRIME))
    }

    /// Multiplicative inverse via Fermat's little theorem. `None` for zero.
    pub fn inverse(&self) -> Option<Self> {
        if self.is_zero() {
            return None;
        }
        Some(self.pow(&(&*PRIME - 2u32)))
    }

    /// Division in the field. `None` when dividing by zero.
    pub fn checked_div(&self, rhs: &Felt) -> Option<Self> {
        rhs.inverse().map(|inv| self * &inv)
    }

    /// Square root (Tonelli-Shanks). Returns the root with the smaller value,
    /// or `None` if `self` is not a quadratic residue.
    pub fn sqrt(&self) -> Option<Self> {
        if self.is_zero() {
            return Some(Self::zero());
        }
        let p_minus_one = &*PRIME - 1u32;
        if !self.pow(&(&p_minus_one >> 1)).is_one() {
            return None;
        }

        let two_adicity = p_minus_one.trailing_zeros().unwrap_or(0);
        let odd_part = &p_minus_one >> two_adicity;

        let mut m = two_adicity;
        let mut c = Felt::from(NON_RESIDUE as u64).pow(&odd_part);
        let mut t = self.pow(&odd_part);
        let mut r = self.pow(&((&odd_part + 1u32) >> 1));

        while !t.is_one() {
            let mut i = 0;
            let mut t_pow = t.clone();
            while !t_pow.is_one() {
                t_pow = &t_pow * &t_pow;
                i += 1;
            }
            let mut b = c.clone();
            for _ in 0..(m - i - 1) {
                b = &b * &b;
            }
            m = i;
            c = &b * &b;
            t = &t * &c;
            r = &r * &b;
        }

        let other = -&r;
        Some(if other.0 < r.0 { other } else { r })
    }
}

// Arithmetic implementations

impl<'a> Add<&'a Felt> for &'a Felt {
    type Output = Felt;

    fn add(self, rhs: &'a Felt) -> Felt {
        let sum = &self.0 + &rhs.0;
        if sum >= *PRIME {
            Felt(sum - &*PRIME)
        } else {
            Felt(sum)
        }
    }
}

impl<'a> Sub<&'a Felt> for &'a Felt {
    type Output = Felt;

    fn sub(self, rhs: &'a Felt) -> Felt {
        if self.0 >= rhs.0 {
            Felt(&self.0 - &rhs.0)
        } else {
            // Add P to avoid underflow
            Felt(&*PRIME - &rhs.0 + &self.0)
        }
    }
}

impl<'a> Mul<&'a Felt> for &'a Felt {
    type Output = Felt;

    fn mul(self, rhs: &'a Felt) -> Felt {
        Felt((&self.0 * &rhs.0) % &*PRIME)
    }
}

impl Neg for &Felt {
    type Output = Felt;

    fn neg(self) -> Felt {
        if self.is_zero() {
            Felt::zero()
        } else {
            Felt(&*PRIME - &self.0)
        }
    }
}

impl Neg for Felt {
    type Output = Felt;

    fn neg(self) -> Felt {
        -&self
    }
}

macro_rules! impl_owned_op {
    ($trait:ident, $method:ident, $assign_trait:ident, $assign_method:ident) => {
        impl $trait for Felt {
            type Output = Felt;

            #[inline]
            fn $method(self, rhs: Felt) -> Felt {
                (&self).$method(&rhs)
            }
        }

        impl $trait<&Felt> for Felt {
            type Output = Felt;

            #[inline]
            fn $method(self, rhs: &Felt) -> Felt {
                (&self).$method(rhs)
            }
        }

        impl $assign_trait<&Felt> for Felt {
            #[inline]
            fn $assign_method(&mut self, rhs: &Felt) {
                *self = (&*self).$method(rhs);
            }
        }

        impl $assign_trait for Felt {
            #[inline]
            fn $assign_method(&mut self, rhs: Felt) {
                *self = (&*self).$method(&rhs);
            }
        }
    };
}

impl_owned_op!(Add, add, AddAssign, add_assign);
impl_owned_op!(Sub, sub, SubAssign, sub_assign);
impl_owned_op!(Mul, mul, MulAssign, mul_assign);

// Conversions

impl From<u64> for Felt {
    #[inline]
    fn from(value: u64) -> Self {
        Felt(BigUint::from(value))
    }
}

impl From<u32> for Felt {
    #[inline]
    fn from(value: u32) -> Self {
        Felt(BigUint::from(value))
    }
}

impl From<usize> for Felt {
    #[inline]
    fn from(value: usize) -> Self {
        Felt(BigUint::from(value))
    }
}

impl From<i64> for Felt {
    fn from(value: i64) -> Self {
        if value >= 0 {
            Felt::from(value as u64)
        } else {
            -Felt::from(value.unsigned_abs())
        }
    }
}

impl From<i32> for Felt {
    fn from(value: i32) -> Self {
        Felt::from(value as i64)
    }
}

impl From<BigUint> for Felt {
    fn from(value: BigUint) -> Self {
        Felt::new(value)
    }
}

impl From<BigInt> for Felt {
    fn from(value: BigInt) -> Self {
        let prime = BigInt::from_biguint(Sign::Plus, PRIME.clone());
        let reduced = value.mod_floor(&prime);
        // mod_floor with a positive modulus is never negative
        Felt(reduced.to_biguint().unwrap_or_default())
    }
}

impl From<&Felt> for BigUint {
    fn from(f: &Felt) -> BigUint {
        f.0.clone()
    }
}

// Display

impl fmt::Display for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::LowerHex for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

// Serde: `0x`-prefixed hex strings

impl Serialize for Felt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#x}", self.0))
    }
}

impl<'de> Deserialize<'de> for Felt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Felt::from_hex(&s)
            .or_else(|| Felt::from_dec_str(&s))
            .ok_or_else(|| serde::de::Error::custom(format!("invalid field element: {s:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(
            PRIME.to_string(),
            "3618502788666131213697322783095070105623107215331596699973092056135872020481"
        );
        assert_eq!(PRIME.bits(), FELT_BITS);
        assert!(Felt::zero().is_zero());
        assert!(Felt::one().is_one());
    }

    #[test]
    fn test_reduce() {
        assert_eq!(Felt::new(PRIME.clone()), Felt::zero());
        assert_eq!(Felt::new(&*PRIME + 1u32), Felt::one());
        assert_eq!(Felt::new(&*PRIME * 2u32), Felt::zero());
    }

    #[test]
    fn test_addition() {
        let a = Felt::from(100u64);
        let b = Felt::from(200u64);
        assert_eq!(a + b, Felt::from(300u64));

        // Wraps around the prime
        let c = Felt::from(-1i64);
        let d = Felt::from(5u64);
        assert_eq!(c + d, Felt::from(4u64));
    }

    #[test]
    fn test_subtraction() {
        let a = Felt::from(5u64);
        let b = Felt::from(10u64);
        assert_eq!(&a - &b, Felt::from(-5i64));
        assert_eq!((&a - &b).to_i64(), Some(-5));
    }

    #[test]
    fn test_multiplication_and_inverse() {
        let a = Felt::from(12345u64);
        let inv = a.inverse().unwrap();
        assert!((&a * &inv).is_one());
        assert!(Felt::zero().inverse().is_none());
        assert_eq!(Felt::from(10u64).checked_div(&Felt::from(5u64)), Some(Felt::from(2u64)));
    }

    #[test]
    fn test_negation() {
        let a = Felt::from(100u64);
        assert!((&a + &(-&a)).is_zero());
        assert_eq!(-Felt::zero(), Felt::zero());
    }

    #[test]
    fn test_signed_representation() {
        assert_eq!(Felt::from(-7i64).to_signed(), BigInt::from(-7));
        assert_eq!(Felt::from(7u64).to_signed(), BigInt::from(7));
        assert_eq!(Felt::from(BigInt::from(-1)), -Felt::one());
    }

    #[test]
    fn test_sqrt() {
        let x = Felt::from(123456789u64);
        let square = &x * &x;
        let root = square.sqrt().unwrap();
        assert_eq!(&root * &root, square);
        assert!(root == x || root == -&x);

        // 3 generates the multiplicative group, so it has no root
        assert!(Felt::from(3u64).sqrt().is_none());
    }

    #[test]
    fn test_bytes() {
        let a = Felt::from(0x0102u64);
        assert_eq!(a.to_bytes_le(3).unwrap(), vec![0x02, 0x01, 0x00]);
        assert!(a.to_bytes_le(1).is_none());
        assert_eq!(Felt::from_bytes_le(&[0x02, 0x01]), a);
    }

    #[test]
    fn test_hex_parsing_and_serde() {
        let a = Felt::from_hex("0x1f").unwrap();
        assert_eq!(a, Felt::from(31u64));
        assert_eq!(format!("{:#x}", a), "0x1f");

        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, "\"0x1f\"");
        let back: Felt = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }
}
