// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Arithmetic in GF(2^8) with the AES reduction polynomial x^8 + x^4 + x^3 + x + 1.
//! Addition is XOR, so the field has characteristic 2 and addition equals subtraction.

use std::ops::{Add, Mul, Sub};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Gf256(pub(crate) u8);

impl Gf256 {
    pub const ZERO: Gf256 = Gf256(0);
    pub const ONE: Gf256 = Gf256(1);

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// The multiplicative inverse, computed as x^254. Returns `None` for zero.
    pub fn inverse(self) -> Option<Gf256> {
        if self.is_zero() {
            return None;
        }
        let mut result = Gf256::ONE;
        let mut base = self;
        let mut exponent = 254u8;
        while exponent > 0 {
            if exponent & 1 == 1 {
                result = result * base;
            }
            base = base * base;
            exponent >>= 1;
        }
        Some(result)
    }
}

impl Add for Gf256 {
    type Output = Gf256;

    fn add(self, rhs: Gf256) -> Gf256 {
        Gf256(self.0 ^ rhs.0)
    }
}

impl Sub for Gf256 {
    type Output = Gf256;

    fn sub(self, rhs: Gf256) -> Gf256 {
        Gf256(self.0 ^ rhs.0)
    }
}

impl Mul for Gf256 {
    type Output = Gf256;

    /// Carry-less peasant multiplication with on-the-fly reduction.
    fn mul(self, rhs: Gf256) -> Gf256 {
        let mut a = self.0;
        let mut b = rhs.0;
        let mut accumulator = 0u8;
        while b != 0 {
            if b & 1 == 1 {
                accumulator ^= a;
            }
            let carry = a & 0x80;
            a <<= 1;
            if carry != 0 {
                a ^= 0x1b;
            }
            b >>= 1;
        }
        Gf256(accumulator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addition_is_xor() {
        assert_eq!(Gf256(0x53) + Gf256(0xca), Gf256(0x99));
        assert_eq!(Gf256(0x53) - Gf256(0xca), Gf256(0x99));
        assert_eq!(Gf256(0x53) + Gf256(0x53), Gf256::ZERO);
    }

    #[test]
    fn test_known_product() {
        // 0x53 * 0xca = 0x01 is the classic AES field example.
        assert_eq!(Gf256(0x53) * Gf256(0xca), Gf256::ONE);
        assert_eq!(Gf256(0x00) * Gf256(0xca), Gf256::ZERO);
        assert_eq!(Gf256::ONE * Gf256(0xca), Gf256(0xca));
    }

    #[test]
    fn test_inverse() {
        assert_eq!(Gf256::ZERO.inverse(), None);
        for x in 1..=255u8 {
            let inverse = Gf256(x).inverse().unwrap();
            assert_eq!(Gf256(x) * inverse, Gf256::ONE);
        }
    }

    #[test]
    fn test_distributivity() {
        for x in [3u8, 0x35, 0x80, 0xff] {
            for y in [7u8, 0x11, 0x90] {
                for z in [1u8, 0x42, 0xfe] {
                    let (x, y, z) = (Gf256(x), Gf256(y), Gf256(z));
                    assert_eq!(x * (y + z), x * y + x * z);
                }
            }
        }
    }
}
