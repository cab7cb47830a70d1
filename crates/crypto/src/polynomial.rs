// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::gf256::Gf256;
use fastcrypto::error::{FastCryptoError::InvalidInput, FastCryptoResult};
use fastcrypto::traits::AllowedRng;

/// A polynomial over GF(2^8) in coefficient form, lowest degree first.
pub(crate) struct Polynomial(Vec<Gf256>);

impl Polynomial {
    /// Sample a random polynomial of the given degree with a fixed constant term.
    pub fn rand<R: AllowedRng>(constant: Gf256, degree: usize, rng: &mut R) -> Self {
        let mut coefficients = Vec::with_capacity(degree + 1);
        coefficients.push(constant);
        let mut buffer = vec![0u8; degree];
        rng.fill_bytes(&mut buffer);
        coefficients.extend(buffer.into_iter().map(Gf256));
        Polynomial(coefficients)
    }

    /// Horner evaluation.
    pub fn eval(&self, x: Gf256) -> Gf256 {
        self.0
            .iter()
            .rev()
            .fold(Gf256::ZERO, |accumulator, coefficient| {
                accumulator * x + *coefficient
            })
    }
}

/// Evaluate at `x` the unique polynomial of degree < `points.len()` passing through all `points`.
/// The x-coordinates must be pairwise distinct.
pub(crate) fn lagrange_eval(x: Gf256, points: &[(Gf256, Gf256)]) -> FastCryptoResult<Gf256> {
    if points.is_empty() {
        return Err(InvalidInput);
    }
    for (i, (xi, _)) in points.iter().enumerate() {
        if points[i + 1..].iter().any(|(xj, _)| xj == xi) {
            return Err(InvalidInput);
        }
    }

    let mut sum = Gf256::ZERO;
    for (i, (xi, yi)) in points.iter().enumerate() {
        let mut numerator = Gf256::ONE;
        let mut denominator = Gf256::ONE;
        for (j, (xj, _)) in points.iter().enumerate() {
            if i != j {
                numerator = numerator * (x - *xj);
                denominator = denominator * (*xi - *xj);
            }
        }
        // Nonzero since the x-coordinates are distinct
        let denominator_inverse = denominator.inverse().ok_or(InvalidInput)?;
        sum = sum + *yi * numerator * denominator_inverse;
    }
    Ok(sum)
}
