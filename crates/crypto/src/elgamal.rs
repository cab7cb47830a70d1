// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Generic ElGamal encryption over a group. Used to transport derived user secret
//! keys from a key server back to the requester: the requester sends a fresh
//! public key with each request and decrypts the response locally, so the key
//! material is never readable in transit.
//!
//! The verification key lives in a second group with the same scalar field and
//! lets a server bind the encryption key pair to the request it approved.

use fastcrypto::groups::{GroupElement, Scalar};
use fastcrypto::traits::AllowedRng;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct SecretKey<G: GroupElement>(G::ScalarType);

#[derive(Serialize, Deserialize, Clone)]
pub struct PublicKey<G: GroupElement>(G);

#[derive(Serialize, Deserialize, Clone)]
pub struct VerificationKey<G: GroupElement>(G);

#[derive(Serialize, Deserialize, Clone)]
pub struct Encryption<G: GroupElement>(G, G);

/// Generate a fresh key pair along with its verification key.
pub fn genkey<G: GroupElement, VG: GroupElement<ScalarType = G::ScalarType>, R: AllowedRng>(
    rng: &mut R,
) -> (SecretKey<G>, PublicKey<G>, VerificationKey<VG>) {
    let secret = G::ScalarType::rand(rng);
    (
        SecretKey(secret),
        PublicKey(G::generator() * secret),
        VerificationKey(VG::generator() * secret),
    )
}

impl<G: GroupElement> PublicKey<G> {
    pub fn encrypt<R: AllowedRng>(&self, rng: &mut R, msg: &G) -> Encryption<G> {
        let r = G::ScalarType::rand(rng);
        Encryption(G::generator() * r, self.0 * r + msg)
    }
}

impl<G: GroupElement> SecretKey<G> {
    pub fn decrypt(&self, encryption: &Encryption<G>) -> G {
        encryption.1 - encryption.0 * self.0
    }
}

impl<G: GroupElement> VerificationKey<G> {
    pub fn as_element(&self) -> &G {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fastcrypto::groups::bls12381::{G1Element, G2Element, Scalar};
    use fastcrypto::groups::Scalar as _;
    use rand::thread_rng;

    #[test]
    fn test_roundtrip() {
        let mut rng = thread_rng();
        let (sk, pk, _vk) = genkey::<G1Element, G2Element, _>(&mut rng);

        let msg = G1Element::generator() * Scalar::rand(&mut rng);
        let encryption = pk.encrypt(&mut rng, &msg);
        assert_eq!(sk.decrypt(&encryption), msg);
    }

    #[test]
    fn test_decrypt_with_wrong_key() {
        let mut rng = thread_rng();
        let (_, pk, _) = genkey::<G1Element, G2Element, _>(&mut rng);
        let (other_sk, _, _) = genkey::<G1Element, G2Element, _>(&mut rng);

        let msg = G1Element::generator() * Scalar::rand(&mut rng);
        let encryption = pk.encrypt(&mut rng, &msg);
        assert_ne!(other_sk.decrypt(&encryption), msg);
    }
}
