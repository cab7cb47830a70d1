// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Byte-wise Shamir secret sharing of [KEY_SIZE] byte secrets over GF(2^8).
//! Share `i` is the evaluation at `x = i` of 32 random polynomials whose
//! constant terms are the secret bytes; index 0 is reserved for the secret.

use crate::gf256::Gf256;
use crate::polynomial::{lagrange_eval, Polynomial};
use crate::KEY_SIZE;
use fastcrypto::error::{FastCryptoError::InvalidInput, FastCryptoResult};
use fastcrypto::traits::AllowedRng;

pub struct SecretSharing {
    pub indices: Vec<u8>,
    pub shares: Vec<[u8; KEY_SIZE]>,
}

/// Split `secret` into `number_of_shares` shares such that any `threshold` of them suffice
/// to reconstruct it.
pub fn split<R: AllowedRng>(
    rng: &mut R,
    secret: [u8; KEY_SIZE],
    threshold: u8,
    number_of_shares: u8,
) -> FastCryptoResult<SecretSharing> {
    if threshold == 0 || threshold > number_of_shares {
        return Err(InvalidInput);
    }

    let polynomials: Vec<Polynomial> = secret
        .iter()
        .map(|byte| Polynomial::rand(Gf256(*byte), (threshold - 1) as usize, rng))
        .collect();

    let indices: Vec<u8> = (1..=number_of_shares).collect();
    let shares = indices
        .iter()
        .map(|index| {
            let mut share = [0u8; KEY_SIZE];
            for (byte, polynomial) in share.iter_mut().zip(&polynomials) {
                *byte = polynomial.eval(Gf256(*index)).0;
            }
            share
        })
        .collect();

    Ok(SecretSharing { indices, shares })
}

/// Reconstruct the secret from the given `(index, share)` pairs.
/// The caller is responsible for providing at least `threshold` genuine shares;
/// fewer shares yield an unrelated value, not an error.
pub fn combine(shares: &[(u8, [u8; KEY_SIZE])]) -> FastCryptoResult<[u8; KEY_SIZE]> {
    interpolate(shares).map(|polynomial| polynomial(0))
}

/// Interpolate the byte-wise polynomials through the given shares and return them
/// as an evaluation closure. Fails on empty input, duplicate or zero indices.
pub fn interpolate(
    shares: &[(u8, [u8; KEY_SIZE])],
) -> FastCryptoResult<impl Fn(u8) -> [u8; KEY_SIZE] + use<>> {
    if shares.is_empty() || shares.iter().any(|(index, _)| *index == 0) {
        return Err(InvalidInput);
    }
    for (i, (index, _)) in shares.iter().enumerate() {
        if shares[i + 1..].iter().any(|(other, _)| other == index) {
            return Err(InvalidInput);
        }
    }

    let shares = shares.to_vec();
    Ok(move |x: u8| {
        let mut result = [0u8; KEY_SIZE];
        for (i, byte) in result.iter_mut().enumerate() {
            let points: Vec<(Gf256, Gf256)> = shares
                .iter()
                .map(|(index, share)| (Gf256(*index), Gf256(share[i])))
                .collect();
            *byte = lagrange_eval(Gf256(x), &points)
                .expect("indices validated above")
                .0;
        }
        result
    })
}
