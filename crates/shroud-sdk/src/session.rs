// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scoped sessions. A session is an ephemeral Ed25519 keypair that the user
//! authorizes once with a wallet signature over a human-readable challenge.
//! Key requests within the time-to-live are then signed with the session key
//! alone, so the user signs a single message per program per session.

use crate::error::ShroudError;
use crate::time::{checked_duration_since, current_epoch_time, from_mins};
use chrono::{DateTime, Utc};
use crypto::ProgramId;
use fastcrypto::ed25519::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};
use fastcrypto::hash::{Blake2b256, HashFunction};
use fastcrypto::traits::{KeyPair, Signer, ToFromBytes, VerifyingKey};
use rand::thread_rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// The maximum session time-to-live.
pub const MAX_TTL_MIN: u16 = 30;

/// A user address, the Blake2b-256 digest of the user's Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address([u8; 32]);

impl Address {
    pub fn from_public_key(pk: &Ed25519PublicKey) -> Self {
        Address(Blake2b256::digest(pk.as_bytes()).digest)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

/// The human-readable challenge the user signs to authorize a session.
pub fn challenge_message(
    program: &ProgramId,
    vk: &Ed25519PublicKey,
    creation_time: u64,
    ttl_min: u16,
) -> String {
    let res = format!(
        "Accessing keys of program {} for {} mins from {}, session key {}",
        program,
        ttl_min,
        DateTime::<Utc>::from_timestamp((creation_time / 1000) as i64, 0)
            .expect("tested that in the future"),
        vk,
    );
    debug!("Challenge message: {}", res.clone());
    res
}

/// The session certificate, sent along with every key request. The wallet
/// signature binds the ephemeral session key to the user for the given
/// program and time window.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Certificate {
    pub user: Address,
    pub user_pk: Ed25519PublicKey,
    pub session_vk: Ed25519PublicKey,
    pub creation_time: u64,
    pub ttl_min: u16,
    pub signature: Ed25519Signature,
    pub program: ProgramId,
}

impl Certificate {
    /// Verify the certificate is internally consistent: the address matches
    /// the public key, the window is within bounds and still open, and the
    /// wallet signature covers the challenge.
    pub fn verify(&self) -> Result<(), ShroudError> {
        if self.ttl_min > MAX_TTL_MIN {
            return Err(ShroudError::InvalidConfiguration(format!(
                "ttl must be at most {MAX_TTL_MIN} minutes"
            )));
        }
        if self.user != Address::from_public_key(&self.user_pk) {
            return Err(ShroudError::InvalidSignature);
        }
        if checked_duration_since(self.creation_time)
            .is_none_or(|elapsed| elapsed >= from_mins(self.ttl_min))
        {
            return Err(ShroudError::ExpiredSession);
        }
        let message = challenge_message(
            &self.program,
            &self.session_vk,
            self.creation_time,
            self.ttl_min,
        );
        self.user_pk
            .verify(message.as_bytes(), &self.signature)
            .map_err(|_| ShroudError::InvalidSignature)
    }
}

/// A session awaiting the user's wallet signature over its challenge.
pub struct PendingSession {
    program: ProgramId,
    session_kp: Ed25519KeyPair,
    creation_time: u64,
    ttl_min: u16,
}

impl PendingSession {
    pub fn new(program: ProgramId, ttl_min: u16) -> Result<Self, ShroudError> {
        if ttl_min > MAX_TTL_MIN {
            return Err(ShroudError::InvalidConfiguration(format!(
                "ttl must be at most {MAX_TTL_MIN} minutes"
            )));
        }
        Ok(PendingSession {
            program,
            session_kp: Ed25519KeyPair::generate(&mut thread_rng()),
            creation_time: current_epoch_time(),
            ttl_min,
        })
    }

    /// The challenge to present to the user's wallet.
    pub fn challenge(&self) -> String {
        challenge_message(
            &self.program,
            self.session_kp.public(),
            self.creation_time,
            self.ttl_min,
        )
    }

    /// Activate the session with the user's signature over [Self::challenge].
    pub fn finalize(
        self,
        user_pk: Ed25519PublicKey,
        signature: Ed25519Signature,
    ) -> Result<SessionKey, ShroudError> {
        user_pk
            .verify(self.challenge().as_bytes(), &signature)
            .map_err(|_| ShroudError::InvalidSignature)?;
        Ok(SessionKey {
            program: self.program,
            user: Address::from_public_key(&user_pk),
            user_pk,
            session_kp: self.session_kp,
            creation_time: self.creation_time,
            ttl_min: self.ttl_min,
            signature,
        })
    }
}

#[cfg(test)]
impl PendingSession {
    /// A session whose window started at an arbitrary time, for tests that
    /// need one expiring on a sub-minute schedule.
    pub(crate) fn new_backdated(program: ProgramId, ttl_min: u16, creation_time: u64) -> Self {
        PendingSession {
            program,
            session_kp: Ed25519KeyPair::generate(&mut thread_rng()),
            creation_time,
            ttl_min,
        }
    }
}

/// An active session. Holds the ephemeral secret key and the user's
/// authorization, and signs individual key requests.
#[derive(Debug)]
pub struct SessionKey {
    program: ProgramId,
    user: Address,
    user_pk: Ed25519PublicKey,
    session_kp: Ed25519KeyPair,
    creation_time: u64,
    ttl_min: u16,
    signature: Ed25519Signature,
}

impl SessionKey {
    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn user(&self) -> Address {
        self.user
    }

    pub fn session_vk(&self) -> &Ed25519PublicKey {
        self.session_kp.public()
    }

    pub fn is_expired(&self) -> bool {
        checked_duration_since(self.creation_time)
            .is_none_or(|elapsed| elapsed >= from_mins(self.ttl_min))
    }

    pub fn ensure_active(&self) -> Result<(), ShroudError> {
        if self.is_expired() {
            return Err(ShroudError::ExpiredSession);
        }
        Ok(())
    }

    /// Sign a key request with the ephemeral session key.
    pub fn sign_request(&self, message: &[u8]) -> Ed25519Signature {
        self.session_kp.sign(message)
    }

    pub fn certificate(&self) -> Certificate {
        Certificate {
            user: self.user,
            user_pk: self.user_pk.clone(),
            session_vk: self.session_kp.public().clone(),
            creation_time: self.creation_time,
            ttl_min: self.ttl_min,
            signature: self.signature.clone(),
            program: self.program,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto::ObjectId;

    fn user_keypair() -> Ed25519KeyPair {
        Ed25519KeyPair::generate(&mut thread_rng())
    }

    fn active_session(program: ProgramId, ttl_min: u16) -> SessionKey {
        let user = user_keypair();
        let pending = PendingSession::new(program, ttl_min).unwrap();
        let signature = user.sign(pending.challenge().as_bytes());
        pending.finalize(user.public().clone(), signature).unwrap()
    }

    #[test]
    fn test_session_lifecycle() {
        let program = ObjectId::random(&mut thread_rng());
        let session = active_session(program, 10);
        assert!(!session.is_expired());
        assert!(session.ensure_active().is_ok());
        assert_eq!(session.program(), program);
        session.certificate().verify().unwrap();
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let session = active_session(ObjectId::random(&mut thread_rng()), 0);
        assert!(session.is_expired());
        assert_eq!(
            session.ensure_active().unwrap_err(),
            ShroudError::ExpiredSession
        );
        assert_eq!(
            session.certificate().verify().unwrap_err(),
            ShroudError::ExpiredSession
        );
    }

    #[test]
    fn test_wrong_signer_is_rejected() {
        let user = user_keypair();
        let other = user_keypair();
        let pending = PendingSession::new(ObjectId::random(&mut thread_rng()), 10).unwrap();
        let signature = other.sign(pending.challenge().as_bytes());
        assert_eq!(
            pending.finalize(user.public().clone(), signature).unwrap_err(),
            ShroudError::InvalidSignature
        );
    }

    #[test]
    fn test_ttl_above_max_is_rejected() {
        assert!(matches!(
            PendingSession::new(ObjectId::random(&mut thread_rng()), MAX_TTL_MIN + 1),
            Err(ShroudError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_tampered_certificate_is_rejected() {
        let session = active_session(ObjectId::random(&mut thread_rng()), 10);
        let mut certificate = session.certificate();
        certificate.program = ObjectId::random(&mut thread_rng());
        assert_eq!(
            certificate.verify().unwrap_err(),
            ShroudError::InvalidSignature
        );
    }

    #[test]
    fn test_address_is_stable() {
        let user = user_keypair();
        let a = Address::from_public_key(user.public());
        let b = Address::from_public_key(user.public());
        assert_eq!(a, b);
        assert!(a.to_string().starts_with("0x"));
    }
}
