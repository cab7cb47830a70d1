// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Boneh-Franklin identity-based encryption (https://eprint.iacr.org/2001/090)
//! over BLS12-381. A symmetric key can be derived from an identity and a key
//! server's public key, and the holder of the master key can extract the
//! matching user secret key for that identity on demand. Messages are fixed
//! size ([crate::KEY_SIZE]) since only key shares are encrypted this way.

use crate::utils::xor;
use crate::{ObjectId, DST_H1, KEY_SIZE};
use fastcrypto::error::FastCryptoError::{GeneralError, InvalidInput};
use fastcrypto::error::FastCryptoResult;
use fastcrypto::groups::bls12381::{G1Element, G2Element, GTElement, Scalar};
use fastcrypto::groups::{GroupElement, HashToGroupElement, Pairing, Scalar as GenericScalar};
use fastcrypto::hmac::{hkdf_sha3_256, HkdfIkm};
use fastcrypto::serde_helpers::ToFromByteArray;
use fastcrypto::traits::AllowedRng;
use fastcrypto::traits::ToFromBytes;

pub type MasterKey = Scalar;
pub type PublicKey = G2Element;
pub type UserSecretKey = G1Element;
pub type Nonce = G2Element;
pub type Plaintext = [u8; KEY_SIZE];
pub type Ciphertext = [u8; KEY_SIZE];
pub type Randomness = Scalar;
pub type EncryptedRandomness = [u8; KEY_SIZE];

/// Key-derivation context binding a ciphertext to a key server and its share index.
pub type Info = (ObjectId, u8);

pub fn generate_key_pair<R: AllowedRng>(rng: &mut R) -> (MasterKey, PublicKey) {
    let master_key = Scalar::rand(rng);
    (master_key, public_key_from_master_key(&master_key))
}

pub fn public_key_from_master_key(master_key: &MasterKey) -> PublicKey {
    G2Element::generator() * master_key
}

/// Extract the user secret key for an identity: `H(id) * master_key`.
pub fn extract(master_key: &MasterKey, id: &[u8]) -> UserSecretKey {
    G1Element::hash_to_group_element(id) * master_key
}

/// Check that `user_secret_key` is the extraction of `id` under the master key
/// behind `public_key`, via the pairing equation e(usk, g2) == e(H(id), pk).
pub fn verify_user_secret_key(
    user_secret_key: &UserSecretKey,
    id: &[u8],
    public_key: &PublicKey,
) -> FastCryptoResult<()> {
    if user_secret_key.pairing(&G2Element::generator())
        == G1Element::hash_to_group_element(id).pairing(public_key)
    {
        Ok(())
    } else {
        Err(InvalidInput)
    }
}

/// Encrypt a batch of fixed-size plaintexts for the same identity under distinct
/// public keys, reusing one randomness so the batch shares a single nonce.
pub fn encrypt_batched_deterministic(
    randomness: &Randomness,
    plaintexts: &[Plaintext],
    public_keys: &[PublicKey],
    id: &[u8],
    infos: &[Info],
) -> FastCryptoResult<(Nonce, Vec<Ciphertext>)> {
    let batch_size = plaintexts.len();
    if batch_size != public_keys.len() || batch_size != infos.len() {
        return Err(InvalidInput);
    }

    let gid = G1Element::hash_to_group_element(id);
    let gid_r = gid * randomness;
    let nonce = G2Element::generator() * randomness;
    Ok((
        nonce,
        (0..batch_size)
            .map(|i| {
                xor(
                    &kdf(&gid_r.pairing(&public_keys[i]), &nonce, &gid, &infos[i]),
                    &plaintexts[i],
                )
            })
            .collect(),
    ))
}

/// Decrypt using a user secret key extracted for `id`.
pub fn decrypt(
    nonce: &Nonce,
    ciphertext: &Ciphertext,
    secret_key: &UserSecretKey,
    id: &[u8],
    info: &Info,
) -> Plaintext {
    let gid = G1Element::hash_to_group_element(id);
    xor(
        ciphertext,
        &kdf(&secret_key.pairing(nonce), nonce, &gid, info),
    )
}

/// Decrypt using the encryption randomness instead of a user secret key.
/// Used for the consistency check after the randomness has been recovered.
pub fn decrypt_deterministic(
    randomness: &Randomness,
    ciphertext: &Ciphertext,
    public_key: &PublicKey,
    id: &[u8],
    info: &Info,
) -> FastCryptoResult<Plaintext> {
    let gid = G1Element::hash_to_group_element(id);
    let gid_r = gid * randomness;
    let nonce = G2Element::generator() * randomness;
    Ok(xor(
        ciphertext,
        &kdf(&gid_r.pairing(public_key), &nonce, &gid, info),
    ))
}

fn verify_nonce(randomness: &Randomness, nonce: &Nonce) -> FastCryptoResult<()> {
    if G2Element::generator() * randomness != *nonce {
        return Err(GeneralError("Invalid randomness".to_string()));
    }
    Ok(())
}

fn kdf(
    input: &GTElement,
    nonce: &G2Element,
    gid: &G1Element,
    (object_id, index): &Info,
) -> [u8; KEY_SIZE] {
    let mut bytes = input.to_byte_array().to_vec();
    bytes.extend_from_slice(&nonce.to_byte_array());
    bytes.extend_from_slice(&gid.to_byte_array());

    let mut info = object_id.as_bytes().to_vec();
    info.push(*index);

    hkdf_sha3_256(
        &HkdfIkm::from_bytes(&bytes).expect("not fixed length"),
        DST_H1,
        &info,
        KEY_SIZE,
    )
    .expect("valid output length")
    .try_into()
    .expect("same length")
}

/// One-time-pad the encryption randomness under a key derived from the base key.
/// This is the commitment that lets a decryptor recover the randomness and
/// re-derive every share deterministically.
pub fn encrypt_randomness(randomness: &Randomness, key: &[u8; KEY_SIZE]) -> EncryptedRandomness {
    xor(key, &randomness.to_byte_array())
}

pub fn decrypt_and_verify_nonce(
    encrypted_randomness: &EncryptedRandomness,
    derived_key: &[u8; KEY_SIZE],
    nonce: &Nonce,
) -> FastCryptoResult<Randomness> {
    let randomness = Scalar::from_byte_array(&xor(derived_key, encrypted_randomness))?;
    verify_nonce(&randomness, nonce).map(|()| randomness)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::generate_random_bytes;
    use rand::thread_rng;

    #[test]
    fn test_extract_and_verify() {
        let mut rng = thread_rng();
        let (master_key, public_key) = generate_key_pair(&mut rng);
        let usk = extract(&master_key, b"some identity");

        assert!(verify_user_secret_key(&usk, b"some identity", &public_key).is_ok());
        assert!(verify_user_secret_key(&usk, b"other identity", &public_key).is_err());

        let (_, other_public_key) = generate_key_pair(&mut rng);
        assert!(verify_user_secret_key(&usk, b"some identity", &other_public_key).is_err());
    }

    #[test]
    fn test_batched_encrypt_decrypt() {
        let mut rng = thread_rng();
        let keypairs: Vec<_> = (0..3).map(|_| generate_key_pair(&mut rng)).collect();
        let public_keys: Vec<_> = keypairs.iter().map(|(_, pk)| *pk).collect();
        let infos: Vec<Info> = (0..3).map(|i| (ObjectId::random(&mut rng), i)).collect();
        let plaintexts: Vec<Plaintext> =
            (0..3).map(|_| generate_random_bytes(&mut rng)).collect();

        let id = b"identity bytes";
        let randomness = Randomness::rand(&mut rng);
        let (nonce, ciphertexts) =
            encrypt_batched_deterministic(&randomness, &plaintexts, &public_keys, id, &infos)
                .unwrap();

        for i in 0..3 {
            let usk = extract(&keypairs[i].0, id);
            assert_eq!(
                decrypt(&nonce, &ciphertexts[i], &usk, id, &infos[i]),
                plaintexts[i]
            );
            assert_eq!(
                decrypt_deterministic(&randomness, &ciphertexts[i], &public_keys[i], id, &infos[i])
                    .unwrap(),
                plaintexts[i]
            );
        }

        // Mismatched batch lengths are rejected
        assert!(encrypt_batched_deterministic(
            &randomness,
            &plaintexts,
            &public_keys[..2],
            id,
            &infos
        )
        .is_err());
    }

    #[test]
    fn test_encrypted_randomness_roundtrip() {
        let mut rng = thread_rng();
        let randomness = Randomness::rand(&mut rng);
        let nonce = G2Element::generator() * randomness;
        let key = generate_random_bytes(&mut rng);

        let encrypted = encrypt_randomness(&randomness, &key);
        assert_eq!(
            decrypt_and_verify_nonce(&encrypted, &key, &nonce).unwrap(),
            randomness
        );

        // A wrong key either fails to parse as a scalar or fails the nonce check
        let wrong_key = generate_random_bytes(&mut rng);
        assert!(decrypt_and_verify_nonce(&encrypted, &wrong_key, &nonce).is_err());
    }
}
