// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Data encapsulation: authenticated encryption built from HMAC-SHA3-256 as a
//! keystream generator in counter mode plus an encrypt-then-MAC tag over the
//! associated data and the ciphertext. The key must be fresh for every message.

use crate::KEY_SIZE;
use fastcrypto::error::{FastCryptoError::GeneralError, FastCryptoResult};
use fastcrypto::hmac::{hmac_sha3_256, HmacKey};
use fastcrypto::traits::ToFromBytes;

const DST_KEYSTREAM: &[u8] = b"SHROUD-HMAC256-CTR-KEYSTREAM-00";
const DST_MAC: &[u8] = b"SHROUD-HMAC256-CTR-MAC-00";

pub struct Hmac256Ctr;

impl Hmac256Ctr {
    pub fn encrypt(msg: &[u8], aad: &[u8], key: &[u8; KEY_SIZE]) -> (Vec<u8>, [u8; KEY_SIZE]) {
        let blob = apply_keystream(key, msg);
        let mac = compute_mac(key, aad, &blob);
        (blob, mac)
    }

    pub fn decrypt(
        ciphertext: &[u8],
        mac: &[u8; KEY_SIZE],
        aad: &[u8],
        key: &[u8; KEY_SIZE],
    ) -> FastCryptoResult<Vec<u8>> {
        if compute_mac(key, aad, ciphertext) != *mac {
            return Err(GeneralError("Invalid MAC".to_string()));
        }
        Ok(apply_keystream(key, ciphertext))
    }
}

/// XOR the input with keystream blocks `HMAC(key, DST || counter)`.
fn apply_keystream(key: &[u8; KEY_SIZE], input: &[u8]) -> Vec<u8> {
    let hmac_key = HmacKey::from_bytes(key).expect("fixed length");
    input
        .chunks(KEY_SIZE)
        .enumerate()
        .flat_map(|(counter, chunk)| {
            let mut block = DST_KEYSTREAM.to_vec();
            block.extend_from_slice(&(counter as u64).to_be_bytes());
            let keystream = hmac_sha3_256(&hmac_key, &block).digest;
            chunk
                .iter()
                .zip(keystream)
                .map(|(byte, pad)| byte ^ pad)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Tag over the length-prefixed associated data followed by the ciphertext.
fn compute_mac(key: &[u8; KEY_SIZE], aad: &[u8], ciphertext: &[u8]) -> [u8; KEY_SIZE] {
    let mac_key = hmac_sha3_256(&HmacKey::from_bytes(key).expect("fixed length"), DST_MAC).digest;
    let mut data = (aad.len() as u64).to_be_bytes().to_vec();
    data.extend_from_slice(aad);
    data.extend_from_slice(ciphertext);
    hmac_sha3_256(&HmacKey::from_bytes(&mac_key).expect("fixed length"), &data).digest
}
