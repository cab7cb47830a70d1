// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Threshold encryption of payloads against a set of key servers.
//!
//! A payload is encrypted under a fresh symmetric key, the key is secret shared
//! with one share per key server, and each share is IBE encrypted towards the
//! identity of the ciphertext. A server that approves the access policy for an
//! identity can extract the matching user secret key and release it, and any
//! threshold of released keys recovers the payload locally.

use crate::dem::Hmac256Ctr;
use crate::ibe::{decrypt_deterministic, encrypt_batched_deterministic};
use crate::identity::Identity;
use crate::tss::{combine, interpolate, split, SecretSharing};
use fastcrypto::error::FastCryptoError::{GeneralError, InvalidInput};
use fastcrypto::error::FastCryptoResult;
use fastcrypto::groups::Scalar;
use fastcrypto::hmac::{hmac_sha3_256, HmacKey};
use fastcrypto::traits::AllowedRng;
use fastcrypto::traits::ToFromBytes;
use itertools::Itertools;
use rand::thread_rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use crate::utils::generate_random_bytes;

pub mod dem;
pub mod elgamal;
mod gf256;
pub mod ibe;
pub mod identity;
mod polynomial;
pub mod tss;
mod utils;

/// Domain separation tag for the full id construction.
pub const DST_ID: &[u8] = b"SHROUD-TIBE-BLS12381-ID-00";

/// Domain separation tag for the IBE key derivation.
pub const DST_H1: &[u8] = b"SHROUD-TIBE-BLS12381-H1-00";

/// Domain separation tag for deriving purpose keys from the base key.
pub const DST_H3: &[u8] = b"SHROUD-TIBE-BLS12381-H3-00";

pub const KEY_SIZE: usize = 32;

/// The envelope format version this implementation produces and accepts.
pub const ENVELOPE_VERSION: u8 = 0;

/// A 32-byte identifier for on-ledger objects: predicate programs, key server
/// registrations, allowlists, asset collections.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; 32]);

/// The id of a predicate program that key servers evaluate before releasing keys.
pub type ProgramId = ObjectId;

impl ObjectId {
    pub const ZERO: ObjectId = ObjectId([0; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        ObjectId(bytes)
    }

    pub fn into_inner(self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn random<R: AllowedRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        ObjectId(bytes)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

impl FromStr for ObjectId {
    type Err = fastcrypto::error::FastCryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|_| InvalidInput)?;
        Ok(ObjectId(bytes.try_into().map_err(|_| InvalidInput)?))
    }
}

/// A self-contained encrypted payload. Everything needed for a later decryption
/// besides the released user secret keys is carried here.
/// The bcs encoding of this struct is the wire and storage format.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    pub version: u8,
    pub program: ProgramId,
    pub identity: Vec<u8>,
    // The id of each key server together with the index of the share it holds
    pub services: Vec<(ObjectId, u8)>,
    pub threshold: u8,
    pub encapsulation: ShareEncryptions,
    pub ciphertext: Ciphertext,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ShareEncryptions {
    BonehFranklinBLS12381 {
        nonce: ibe::Nonce,
        encrypted_shares: Vec<ibe::Ciphertext>,
        encrypted_randomness: ibe::EncryptedRandomness,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Ciphertext {
    Hmac256Ctr {
        blob: Vec<u8>,
        aad: Option<Vec<u8>>,
        mac: [u8; KEY_SIZE],
    },
    /// Pass-through arm for public content: the blob is the plaintext and
    /// decryption requires no shares.
    Plain { blob: Vec<u8> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum EncryptionInput {
    Hmac256Ctr { data: Vec<u8>, aad: Option<Vec<u8>> },
    Plain { data: Vec<u8> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ServerPublicKeys {
    BonehFranklinBLS12381(Vec<ibe::PublicKey>),
}

pub enum UserSecretKeys {
    BonehFranklinBLS12381(HashMap<ObjectId, ibe::UserSecretKey>),
}

impl Envelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        bcs::to_bytes(self).expect("serialization never fails")
    }

    pub fn from_bytes(bytes: &[u8]) -> FastCryptoResult<Self> {
        bcs::from_bytes(bytes).map_err(|_| InvalidInput)
    }

    /// True for the public pass-through arm.
    pub fn is_plain(&self) -> bool {
        matches!(self.ciphertext, Ciphertext::Plain { .. })
    }
}

/// Encrypt the given input:
///  - generate a random base key and secret share it with one share per key server,
///  - IBE encrypt each share towards the identity under the server's public key,
///  - commit to the encryption randomness under a key derived from the base key,
///  - encrypt the payload under a second derived key.
///
/// Fresh randomness is drawn on every call, so two encryptions of the same
/// plaintext under the same identity produce distinct ciphertext bytes.
pub fn shroud_encrypt(
    program: ProgramId,
    identity: &Identity,
    key_servers: Vec<ObjectId>,
    public_keys: &ServerPublicKeys,
    threshold: u8,
    input: EncryptionInput,
) -> FastCryptoResult<(Envelope, [u8; KEY_SIZE])> {
    let number_of_shares = u8::try_from(key_servers.len()).map_err(|_| InvalidInput)?;
    if threshold > number_of_shares || threshold == 0 {
        return Err(InvalidInput);
    }

    let mut rng = thread_rng();
    let full_id = create_full_id(&program, identity.as_bytes());

    let base_key = generate_random_bytes(&mut rng);

    let SecretSharing { indices, shares } = split(&mut rng, base_key, threshold, number_of_shares)?;
    let services = key_servers.into_iter().zip(indices).collect::<Vec<_>>();

    let encapsulation = match public_keys {
        ServerPublicKeys::BonehFranklinBLS12381(pks) => {
            if pks.len() != number_of_shares as usize {
                return Err(InvalidInput);
            }
            let randomness = ibe::Randomness::rand(&mut rng);

            // The share index doubles as the KDF info, so shares for the same
            // identity under the same public key stay distinguishable.
            let (nonce, encrypted_shares) =
                encrypt_batched_deterministic(&randomness, &shares, pks, &full_id, &services)?;
            let encrypted_randomness = ibe::encrypt_randomness(
                &randomness,
                &derive_key(
                    KeyPurpose::EncryptedRandomness,
                    &base_key,
                    &encrypted_shares,
                    threshold,
                    &services,
                ),
            );
            ShareEncryptions::BonehFranklinBLS12381 {
                nonce,
                encrypted_shares,
                encrypted_randomness,
            }
        }
    };

    let dem_key = derive_key(
        KeyPurpose::Dem,
        &base_key,
        encapsulation.ciphertexts(),
        threshold,
        &services,
    );
    let ciphertext = match input {
        EncryptionInput::Hmac256Ctr { data, aad } => {
            let (blob, mac) = Hmac256Ctr::encrypt(&data, aad.as_deref().unwrap_or(&[]), &dem_key);
            Ciphertext::Hmac256Ctr { blob, aad, mac }
        }
        EncryptionInput::Plain { data } => Ciphertext::Plain { blob: data },
    };

    Ok((
        Envelope {
            version: ENVELOPE_VERSION,
            program,
            identity: identity.as_bytes().to_vec(),
            services,
            threshold,
            encapsulation,
            ciphertext,
        },
        dem_key,
    ))
}

/// Decrypt an envelope:
///  - decapsulate the IBE key per available user secret key and decrypt its share,
///  - if public keys are given, verify all shares are consistent with the
///    encapsulation commitment before combining (reject rather than return garbage),
///  - reconstruct the base key, derive the payload key and decrypt.
///
/// Requires user secret keys for at least `threshold` of the envelope's services.
pub fn shroud_decrypt(
    envelope: &Envelope,
    user_secret_keys: &UserSecretKeys,
    public_keys: Option<&ServerPublicKeys>,
) -> FastCryptoResult<Vec<u8>> {
    let Envelope {
        version,
        program,
        identity,
        services,
        threshold,
        encapsulation,
        ciphertext,
    } = envelope;

    if *version != ENVELOPE_VERSION {
        return Err(InvalidInput);
    }

    // Public pass-through: the blob is the plaintext, no shares involved.
    if let Ciphertext::Plain { blob } = ciphertext {
        return Ok(blob.clone());
    }

    let full_id = create_full_id(program, identity);

    let shares = match (encapsulation, user_secret_keys) {
        (
            ShareEncryptions::BonehFranklinBLS12381 {
                nonce,
                encrypted_shares,
                ..
            },
            UserSecretKeys::BonehFranklinBLS12381(user_secret_keys),
        ) => {
            // One encrypted share per service is required for a valid envelope
            if encrypted_shares.len() != services.len() {
                return Err(InvalidInput);
            }

            let service_indices: Vec<usize> = services
                .iter()
                .enumerate()
                .filter(|(_, (id, _))| user_secret_keys.contains_key(id))
                .map(|(i, _)| i)
                .collect();
            if service_indices.len() < *threshold as usize {
                return Err(InvalidInput);
            }

            service_indices
                .into_iter()
                .map(|i| {
                    let (object_id, index) = services[i];
                    (
                        index,
                        ibe::decrypt(
                            nonce,
                            &encrypted_shares[i],
                            user_secret_keys.get(&object_id).expect("filtered above"),
                            &full_id,
                            &(object_id, index),
                        ),
                    )
                })
                .collect_vec()
        }
    };

    let base_key = match public_keys {
        Some(public_keys) => encapsulation.combine_and_check_share_consistency(
            &shares,
            &full_id,
            services,
            *threshold,
            public_keys,
        )?,
        None => combine(&shares)?,
    };

    let dem_key = derive_key(
        KeyPurpose::Dem,
        &base_key,
        encapsulation.ciphertexts(),
        *threshold,
        services,
    );

    match ciphertext {
        Ciphertext::Hmac256Ctr { blob, aad, mac } => {
            Hmac256Ctr::decrypt(blob, mac, aad.as_deref().unwrap_or(&[]), &dem_key)
        }
        Ciphertext::Plain { .. } => unreachable!("handled above"),
    }
}

/// The full id hashed to the curve for IBE operations:
/// `[len(DST_ID)] || DST_ID || program || identity`.
pub fn create_full_id(program: &ProgramId, identity: &[u8]) -> Vec<u8> {
    debug_assert!(DST_ID.len() < 256);
    let mut full_id = vec![DST_ID.len() as u8];
    full_id.extend_from_slice(DST_ID);
    full_id.extend_from_slice(program.as_bytes());
    full_id.extend_from_slice(identity);
    full_id
}

/// Purposes of keys derived from the base key.
pub enum KeyPurpose {
    /// Encrypts the encapsulation randomness.
    EncryptedRandomness,
    /// Encrypts the payload.
    Dem,
}

impl KeyPurpose {
    fn tag(&self) -> &[u8] {
        match self {
            KeyPurpose::EncryptedRandomness => &[0],
            KeyPurpose::Dem => &[1],
        }
    }
}

/// Derive a purpose key from the base key, bound to the encrypted shares, the
/// threshold and the services. All inputs besides the base key are carried in
/// the envelope, so the derivation is reproducible at decryption.
fn derive_key(
    purpose: KeyPurpose,
    base_key: &[u8; KEY_SIZE],
    encrypted_shares: &[ibe::Ciphertext],
    threshold: u8,
    services: &[(ObjectId, u8)],
) -> [u8; KEY_SIZE] {
    let services = bcs::to_bytes(services).expect("never fails");
    let encrypted_shares = bcs::to_bytes(encrypted_shares).expect("never fails");
    let data = [
        DST_H3,
        purpose.tag(),
        &encrypted_shares,
        &[threshold],
        &services,
    ]
    .concat();
    hmac_sha3_256(&HmacKey::from_bytes(base_key).expect("fixed length"), &data).digest
}

impl ShareEncryptions {
    /// Check that all shares lie on the polynomial reconstructed from the given
    /// subset, by recovering the encryption randomness and re-deriving every
    /// share deterministically. Returns the base key on success.
    fn combine_and_check_share_consistency(
        &self,
        shares: &[(u8, [u8; KEY_SIZE])],
        full_id: &[u8],
        services: &[(ObjectId, u8)],
        threshold: u8,
        public_keys: &ServerPublicKeys,
    ) -> FastCryptoResult<[u8; KEY_SIZE]> {
        // `public_keys` are needed to re-derive the shares deterministically;
        // the key derivation itself only binds to envelope contents.
        let polynomial = interpolate(shares)?;
        let base_key = polynomial(0);

        let all_shares =
            self.decrypt_all_shares(full_id, services, public_keys, &base_key, threshold)?;
        if all_shares
            .into_iter()
            .any(|(index, share)| polynomial(index) != share)
        {
            return Err(GeneralError("Inconsistent shares".to_string()));
        }
        Ok(base_key)
    }

    /// Recover the randomness commitment and decrypt every encrypted share.
    fn decrypt_all_shares(
        &self,
        full_id: &[u8],
        services: &[(ObjectId, u8)],
        public_keys: &ServerPublicKeys,
        base_key: &[u8; KEY_SIZE],
        threshold: u8,
    ) -> FastCryptoResult<Vec<(u8, [u8; KEY_SIZE])>> {
        match self {
            ShareEncryptions::BonehFranklinBLS12381 {
                nonce,
                encrypted_shares,
                encrypted_randomness,
            } => {
                let randomness = ibe::decrypt_and_verify_nonce(
                    encrypted_randomness,
                    &derive_key(
                        KeyPurpose::EncryptedRandomness,
                        base_key,
                        encrypted_shares,
                        threshold,
                        services,
                    ),
                    nonce,
                )?;

                match public_keys {
                    ServerPublicKeys::BonehFranklinBLS12381(public_keys) => {
                        if public_keys.len() != encrypted_shares.len() {
                            return Err(InvalidInput);
                        }
                        public_keys
                            .iter()
                            .zip(encrypted_shares)
                            .zip(services)
                            .map(|((pk, ciphertext), service)| {
                                decrypt_deterministic(&randomness, ciphertext, pk, full_id, service)
                                    .map(|share| (service.1, share))
                            })
                            .collect::<FastCryptoResult<_>>()
                    }
                }
            }
        }
    }

    fn ciphertexts(&self) -> &[ibe::Ciphertext] {
        match self {
            ShareEncryptions::BonehFranklinBLS12381 {
                encrypted_shares, ..
            } => encrypted_shares,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestSetup {
        program: ProgramId,
        identity: Identity,
        services: Vec<ObjectId>,
        keypairs: Vec<(ibe::MasterKey, ibe::PublicKey)>,
        public_keys: ServerPublicKeys,
    }

    fn setup(n: usize) -> TestSetup {
        let mut rng = thread_rng();
        let keypairs: Vec<_> = (0..n).map(|_| ibe::generate_key_pair(&mut rng)).collect();
        TestSetup {
            program: ObjectId::random(&mut rng),
            identity: Identity::generate(b"test policy", &mut rng).unwrap(),
            services: (0..n).map(|_| ObjectId::random(&mut rng)).collect(),
            public_keys: ServerPublicKeys::BonehFranklinBLS12381(
                keypairs.iter().map(|(_, pk)| *pk).collect(),
            ),
            keypairs,
        }
    }

    fn user_secret_keys(setup: &TestSetup, count: usize) -> UserSecretKeys {
        let full_id = create_full_id(&setup.program, setup.identity.as_bytes());
        UserSecretKeys::BonehFranklinBLS12381(
            setup
                .services
                .iter()
                .zip(&setup.keypairs)
                .take(count)
                .map(|(service, (master_key, _))| (*service, ibe::extract(master_key, &full_id)))
                .collect(),
        )
    }

    #[test]
    fn test_roundtrip() {
        let setup = setup(3);
        let data = b"the winning option is option-A";

        let (envelope, _) = shroud_encrypt(
            setup.program,
            &setup.identity,
            setup.services.clone(),
            &setup.public_keys,
            2,
            EncryptionInput::Hmac256Ctr {
                data: data.to_vec(),
                aad: Some(b"vote-pool-7".to_vec()),
            },
        )
        .unwrap();

        // All three keys work, and so do exactly two
        for count in [3, 2] {
            let usks = user_secret_keys(&setup, count);
            let decrypted = shroud_decrypt(&envelope, &usks, Some(&setup.public_keys)).unwrap();
            assert_eq!(decrypted, data.to_vec());
        }

        // One key is below the threshold
        let usks = user_secret_keys(&setup, 1);
        assert!(shroud_decrypt(&envelope, &usks, Some(&setup.public_keys)).is_err());
    }

    #[test]
    fn test_encryption_is_randomized() {
        let setup = setup(3);
        let input = || EncryptionInput::Hmac256Ctr {
            data: b"same plaintext".to_vec(),
            aad: None,
        };

        let (a, _) = shroud_encrypt(
            setup.program,
            &setup.identity,
            setup.services.clone(),
            &setup.public_keys,
            2,
            input(),
        )
        .unwrap();
        let (b, _) = shroud_encrypt(
            setup.program,
            &setup.identity,
            setup.services.clone(),
            &setup.public_keys,
            2,
            input(),
        )
        .unwrap();

        // Same identity, still distinct ciphertext bytes
        assert_eq!(a.identity, b.identity);
        assert_ne!(a.to_bytes(), b.to_bytes());
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_envelope_is_self_contained() {
        let setup = setup(3);
        let (envelope, _) = shroud_encrypt(
            setup.program,
            &setup.identity,
            setup.services.clone(),
            &setup.public_keys,
            2,
            EncryptionInput::Hmac256Ctr {
                data: b"payload".to_vec(),
                aad: None,
            },
        )
        .unwrap();

        let restored = Envelope::from_bytes(&envelope.to_bytes()).unwrap();
        assert_eq!(restored, envelope);

        let usks = user_secret_keys(&setup, 2);
        assert_eq!(
            shroud_decrypt(&restored, &usks, Some(&setup.public_keys)).unwrap(),
            b"payload".to_vec()
        );

        assert!(Envelope::from_bytes(b"not an envelope").is_err());
    }

    #[test]
    fn test_invalid_threshold() {
        let setup = setup(3);
        for threshold in [0, 4] {
            assert!(shroud_encrypt(
                setup.program,
                &setup.identity,
                setup.services.clone(),
                &setup.public_keys,
                threshold,
                EncryptionInput::Plain { data: vec![] },
            )
            .is_err());
        }
    }

    #[test]
    fn test_plain_passthrough() {
        let setup = setup(3);
        let (envelope, _) = shroud_encrypt(
            setup.program,
            &setup.identity,
            setup.services.clone(),
            &setup.public_keys,
            2,
            EncryptionInput::Plain {
                data: b"public description".to_vec(),
            },
        )
        .unwrap();
        assert!(envelope.is_plain());

        // No user secret keys needed
        let usks = UserSecretKeys::BonehFranklinBLS12381(HashMap::new());
        assert_eq!(
            shroud_decrypt(&envelope, &usks, Some(&setup.public_keys)).unwrap(),
            b"public description".to_vec()
        );
    }

    #[test]
    fn test_share_consistency_check() {
        let setup = setup(3);
        let (mut envelope, _) = shroud_encrypt(
            setup.program,
            &setup.identity,
            setup.services.clone(),
            &setup.public_keys,
            2,
            EncryptionInput::Hmac256Ctr {
                data: b"tamper target".to_vec(),
                aad: None,
            },
        )
        .unwrap();

        // Corrupt the last encrypted share
        let ShareEncryptions::BonehFranklinBLS12381 {
            ref mut encrypted_shares,
            ..
        } = envelope.encapsulation;
        encrypted_shares[2][0] = encrypted_shares[2][0].wrapping_add(1);

        // Decrypting with the two untouched shares fails the consistency check
        let usks = user_secret_keys(&setup, 2);
        assert!(shroud_decrypt(&envelope, &usks, Some(&setup.public_keys))
            .is_err_and(|e| e == GeneralError("Inconsistent shares".to_string())));

        // Without the check the two valid shares still decrypt
        assert_eq!(
            shroud_decrypt(&envelope, &usks, None).unwrap(),
            b"tamper target".to_vec()
        );
    }

    #[test]
    fn test_wrong_identity_keys_are_rejected() {
        let mut rng = thread_rng();
        let setup = setup(3);
        let (envelope, _) = shroud_encrypt(
            setup.program,
            &setup.identity,
            setup.services.clone(),
            &setup.public_keys,
            2,
            EncryptionInput::Hmac256Ctr {
                data: b"secret".to_vec(),
                aad: None,
            },
        )
        .unwrap();

        // Keys extracted for a different identity fail the consistency check
        let other_identity = Identity::generate(b"test policy", &mut rng).unwrap();
        let other_full_id = create_full_id(&setup.program, other_identity.as_bytes());
        let usks = UserSecretKeys::BonehFranklinBLS12381(
            setup
                .services
                .iter()
                .zip(&setup.keypairs)
                .take(2)
                .map(|(service, (master_key, _))| {
                    (*service, ibe::extract(master_key, &other_full_id))
                })
                .collect(),
        );
        assert!(shroud_decrypt(&envelope, &usks, Some(&setup.public_keys)).is_err());
    }
}
