//! prime field used by the cipher and the payout circuit
//!
//! elements live in the scalar field of ed25519,
//! l = 2^252 + 27742317777372353535851937790883648493.
//! arithmetic is delegated to curve25519-dalek's constant-time scalar backend.

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, AddAssign, Mul, Neg, Sub};

use curve25519_dalek::scalar::Scalar;
use zeroize::Zeroize;

use crate::{Error, Result};

/// wire width of one field element
pub const FIELD_BYTES: usize = 32;

/// element of the prime field
#[derive(Clone, Copy, PartialEq, Eq, Zeroize)]
pub struct Fe(Scalar);

impl Fe {
    pub const ZERO: Fe = Fe(Scalar::ZERO);
    pub const ONE: Fe = Fe(Scalar::ONE);

    /// decode a canonical little-endian encoding
    pub fn from_bytes(bytes: &[u8; FIELD_BYTES]) -> Result<Self> {
        Option::<Scalar>::from(Scalar::from_canonical_bytes(*bytes))
            .map(Fe)
            .ok_or_else(|| Error::MalformedCiphertext("non-canonical field element".into()))
    }

    /// decode a slice that must be exactly one field element wide
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; FIELD_BYTES] = bytes.try_into().map_err(|_| {
            Error::MalformedCiphertext(format!(
                "field element must be {} bytes, got {}",
                FIELD_BYTES,
                bytes.len()
            ))
        })?;
        Self::from_bytes(&arr)
    }

    /// reduce 64 uniform bytes into the field
    pub fn from_bytes_wide(bytes: &[u8; 64]) -> Self {
        Fe(Scalar::from_bytes_mod_order_wide(bytes))
    }

    pub fn to_bytes(&self) -> [u8; FIELD_BYTES] {
        self.0.to_bytes()
    }

    /// reveal as u64, failing if the element is out of range
    pub fn to_u64(&self) -> Result<u64> {
        let bytes = self.0.to_bytes();
        if bytes[8..].iter().any(|b| *b != 0) {
            return Err(Error::ValueOutOfRange);
        }
        let mut limb = [0u8; 8];
        limb.copy_from_slice(&bytes[..8]);
        Ok(u64::from_le_bytes(limb))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == Scalar::ZERO
    }

    pub fn square(&self) -> Fe {
        Fe(self.0 * self.0)
    }

    /// multiplicative inverse, zero maps to zero
    pub fn invert(&self) -> Fe {
        Fe(self.0.invert())
    }

    /// x^5, the forward s-box
    pub fn pow5(&self) -> Fe {
        let x2 = self.0 * self.0;
        let x4 = x2 * x2;
        Fe(x4 * self.0)
    }

    /// exponentiation by a public 256-bit exponent (little-endian limbs)
    pub fn pow_limbs(&self, exp: &[u64; 4]) -> Fe {
        let mut acc = Scalar::ONE;
        for limb in exp.iter().rev() {
            for bit in (0..64).rev() {
                acc = acc * acc;
                if (limb >> bit) & 1 == 1 {
                    acc *= self.0;
                }
            }
        }
        Fe(acc)
    }
}

impl From<u64> for Fe {
    fn from(v: u64) -> Self {
        Fe(Scalar::from(v))
    }
}

impl From<u128> for Fe {
    fn from(v: u128) -> Self {
        Fe(Scalar::from(v))
    }
}

impl From<bool> for Fe {
    fn from(v: bool) -> Self {
        if v {
            Fe::ONE
        } else {
            Fe::ZERO
        }
    }
}

impl Add for Fe {
    type Output = Fe;
    fn add(self, rhs: Fe) -> Fe {
        Fe(self.0 + rhs.0)
    }
}

impl AddAssign for Fe {
    fn add_assign(&mut self, rhs: Fe) {
        self.0 += rhs.0;
    }
}

impl Sub for Fe {
    type Output = Fe;
    fn sub(self, rhs: Fe) -> Fe {
        Fe(self.0 - rhs.0)
    }
}

impl Mul for Fe {
    type Output = Fe;
    fn mul(self, rhs: Fe) -> Fe {
        Fe(self.0 * rhs.0)
    }
}

impl Neg for Fe {
    type Output = Fe;
    fn neg(self) -> Fe {
        Fe(-self.0)
    }
}

impl Sum for Fe {
    fn sum<I: Iterator<Item = Fe>>(iter: I) -> Fe {
        iter.fold(Fe::ZERO, |acc, x| acc + x)
    }
}

impl fmt::Debug for Fe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fe({})", hex::encode(self.to_bytes()))
    }
}
