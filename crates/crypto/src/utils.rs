// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::KEY_SIZE;
use fastcrypto::traits::AllowedRng;

pub(crate) fn xor(a: &[u8; KEY_SIZE], b: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    let mut result = [0u8; KEY_SIZE];
    for (r, (x, y)) in result.iter_mut().zip(a.iter().zip(b)) {
        *r = x ^ y;
    }
    result
}

pub(crate) fn generate_random_bytes<R: AllowedRng>(rng: &mut R) -> [u8; KEY_SIZE] {
    let mut bytes = [0u8; KEY_SIZE];
    rng.fill_bytes(&mut bytes);
    bytes
}
