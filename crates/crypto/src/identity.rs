// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-ciphertext identities. An identity is a length-prefixed policy id
//! followed by a fixed-width random nonce, so the policy id can always be
//! parsed back out unambiguously. The nonce is drawn fresh for every
//! encryption; reusing an identity across two ciphertexts would make their
//! key shares interchangeable.

use fastcrypto::error::{FastCryptoError::InvalidInput, FastCryptoResult};
use fastcrypto::traits::AllowedRng;
use serde::{Deserialize, Serialize};

/// Width of the random per-ciphertext nonce.
pub const NONCE_LENGTH: usize = 5;

/// A policy id must fit in the single-byte length prefix.
pub const MAX_POLICY_ID_LENGTH: usize = 255;

pub type IdentityNonce = [u8; NONCE_LENGTH];

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity(Vec<u8>);

impl Identity {
    /// Build an identity from a policy id and a caller-provided nonce.
    /// Fails with an input error if the policy id is empty or longer than
    /// [MAX_POLICY_ID_LENGTH].
    pub fn derive(policy_id: &[u8], nonce: &IdentityNonce) -> FastCryptoResult<Self> {
        if policy_id.is_empty() || policy_id.len() > MAX_POLICY_ID_LENGTH {
            return Err(InvalidInput);
        }
        let mut bytes = Vec::with_capacity(1 + policy_id.len() + NONCE_LENGTH);
        bytes.push(policy_id.len() as u8);
        bytes.extend_from_slice(policy_id);
        bytes.extend_from_slice(nonce);
        Ok(Identity(bytes))
    }

    /// Build an identity with a nonce drawn from the given CSPRNG.
    pub fn generate<R: AllowedRng>(policy_id: &[u8], rng: &mut R) -> FastCryptoResult<Self> {
        let mut nonce = [0u8; NONCE_LENGTH];
        rng.fill_bytes(&mut nonce);
        Self::derive(policy_id, &nonce)
    }

    /// Parse raw identity bytes back into the `(policy_id, nonce)` pair.
    pub fn parse(bytes: &[u8]) -> FastCryptoResult<(Vec<u8>, IdentityNonce)> {
        let length = *bytes.first().ok_or(InvalidInput)? as usize;
        if length == 0 || bytes.len() != 1 + length + NONCE_LENGTH {
            return Err(InvalidInput);
        }
        let policy_id = bytes[1..1 + length].to_vec();
        let nonce = bytes[1 + length..].try_into().expect("checked length");
        Ok((policy_id, nonce))
    }

    pub fn from_bytes(bytes: &[u8]) -> FastCryptoResult<Self> {
        Self::parse(bytes).map(|_| Identity(bytes.to_vec()))
    }

    pub fn policy_id(&self) -> &[u8] {
        let length = self.0[0] as usize;
        &self.0[1..1 + length]
    }

    pub fn nonce(&self) -> IdentityNonce {
        let length = self.0[0] as usize;
        self.0[1 + length..].try_into().expect("fixed width")
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::thread_rng;

    #[test]
    fn test_derive_and_parse() {
        let identity = Identity::derive(b"policy", &[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(identity.policy_id(), b"policy");
        assert_eq!(identity.nonce(), [1, 2, 3, 4, 5]);

        let (policy_id, nonce) = Identity::parse(identity.as_bytes()).unwrap();
        assert_eq!(policy_id, b"policy".to_vec());
        assert_eq!(nonce, [1, 2, 3, 4, 5]);
        assert_eq!(Identity::from_bytes(identity.as_bytes()).unwrap(), identity);
    }

    #[test]
    fn test_malformed_policy_ids() {
        assert!(Identity::derive(b"", &[0; NONCE_LENGTH]).is_err());
        assert!(Identity::derive(&[0u8; 256], &[0; NONCE_LENGTH]).is_err());
        assert!(Identity::parse(&[]).is_err());
        assert!(Identity::parse(&[0, 1, 2, 3, 4, 5]).is_err());
        // Truncated nonce
        assert!(Identity::parse(&[2, 7, 7, 1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_generated_nonces_are_fresh() {
        let mut rng = thread_rng();
        let a = Identity::generate(b"policy", &mut rng).unwrap();
        let b = Identity::generate(b"policy", &mut rng).unwrap();
        assert_eq!(a.policy_id(), b.policy_id());
        assert_ne!(a, b);
    }
}
