// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Client SDK for threshold-encrypted content gated by on-ledger policies.
//!
//! Content is encrypted locally against a set of key servers, any `threshold`
//! of which must approve the access policy before the content can be
//! decrypted. The primary application is confidential voting: ballots are
//! encrypted at cast time and become readable only to callers the policy
//! admits, typically after the voting window closes.

pub mod config;
pub mod error;
pub mod policy;
pub mod retriever;
pub mod runtime;
pub mod server;
pub mod session;
pub mod store;
pub mod tally;
pub mod testing;
pub mod time;

use crate::config::ClientConfig;
use crate::error::ShroudError;
use crate::policy::PolicyDescriptor;
use crate::retriever::{KeyRetriever, KeyShareSet};
use crate::server::KeyServerApi;
use crate::session::{Address, SessionKey};
use crate::store::{BlobId, BlobStore};
use crate::tally::{Ballot, TallyOutcome, VotePool};
use crypto::identity::Identity;
use crypto::{
    shroud_decrypt, shroud_encrypt, EncryptionInput, Envelope, ProgramId, UserSecretKeys,
    ENVELOPE_VERSION,
};
use fastcrypto::traits::ToFromBytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

pub use crypto::{self, ObjectId};

/// Key of an in-flight share fetch: the session's verification key and the
/// identity being fetched.
type FlightKey = (Vec<u8>, Vec<u8>);

/// The client: encrypts envelopes against its server set and decrypts them
/// back once the servers approve.
///
/// Fetched shares are cached per identity, and concurrent decryptions of the
/// same identity under the same session share a single fetch.
pub struct ShroudClient<S> {
    retriever: KeyRetriever<S>,
    key_cache: Mutex<HashMap<Identity, KeyShareSet>>,
    flights: Mutex<HashMap<FlightKey, Arc<OnceCell<KeyShareSet>>>>,
}

impl<S: KeyServerApi> ShroudClient<S> {
    pub fn new(servers: Vec<S>, config: ClientConfig) -> Result<Self, ShroudError> {
        Ok(ShroudClient {
            retriever: KeyRetriever::new(servers, config)?,
            key_cache: Mutex::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
        })
    }

    pub fn retriever(&self) -> &KeyRetriever<S> {
        &self.retriever
    }

    /// Encrypt `data` under a fresh identity of the given policy. Public
    /// policies produce a pass-through envelope with the data in the clear.
    pub fn encrypt(
        &self,
        program: ProgramId,
        policy: &PolicyDescriptor,
        data: Vec<u8>,
        aad: Option<Vec<u8>>,
    ) -> Result<(Envelope, Identity), ShroudError> {
        let identity = policy
            .derive_identity()
            .map_err(|_| ShroudError::MalformedPolicyId)?;
        let input = if policy.is_public() {
            EncryptionInput::Plain { data }
        } else {
            EncryptionInput::Hmac256Ctr { data, aad }
        };
        let (envelope, _) = shroud_encrypt(
            program,
            &identity,
            self.retriever.servers().iter().map(|s| s.id()).collect(),
            &self.retriever.server_public_keys(),
            self.retriever.config().threshold,
            input,
        )
        .map_err(|e| ShroudError::InvalidConfiguration(e.to_string()))?;
        Ok((envelope, identity))
    }

    /// Encrypt a ballot for an open pool.
    pub fn cast_ballot(
        &self,
        pool: &VotePool,
        voter: Address,
        choice: &str,
    ) -> Result<Ballot, ShroudError> {
        if !pool.can_cast(time::current_epoch_time()) {
            return Err(ShroudError::PoolNotOpen);
        }
        let (envelope, _) = self.encrypt(
            pool.program,
            &pool.policy,
            choice.as_bytes().to_vec(),
            Some(voter.as_bytes().to_vec()),
        )?;
        Ok(Ballot { voter, envelope })
    }

    /// Encrypt a pool's description under its policy and persist the
    /// envelope. The pool leaves `Created` once it references the stored
    /// ciphertext; the description itself is never written in the clear.
    pub async fn fill_pool(
        &self,
        pool: &mut VotePool,
        description: &str,
        store: &impl BlobStore,
    ) -> Result<BlobId, ShroudError> {
        let (envelope, _) = self.encrypt(
            pool.program,
            &pool.policy,
            description.as_bytes().to_vec(),
            None,
        )?;
        let blob_id = store
            .put(&envelope.to_bytes())
            .await
            .map_err(|e| ShroudError::StoreError(e.to_string()))?;
        pool.description = Some(blob_id);
        Ok(blob_id)
    }

    /// Fetch and decrypt a pool's description. `None` while the pool is
    /// still `Created`.
    pub async fn pool_description(
        &self,
        pool: &VotePool,
        store: &impl BlobStore,
        session: &SessionKey,
    ) -> Result<Option<String>, ShroudError> {
        let Some(blob_id) = pool.description else {
            return Ok(None);
        };
        let bytes = store
            .get(&blob_id)
            .await
            .map_err(|e| ShroudError::StoreError(e.to_string()))?
            .ok_or_else(|| ShroudError::StoreError(format!("blob {blob_id} not found")))?;
        let envelope =
            Envelope::from_bytes(&bytes).map_err(|_| ShroudError::MalformedCiphertext)?;
        let plaintext = self.decrypt(&envelope, session).await?;
        String::from_utf8(plaintext)
            .map(Some)
            .map_err(|_| ShroudError::MalformedCiphertext)
    }

    /// Decrypt an envelope, fetching key shares under the session as needed.
    pub async fn decrypt(
        &self,
        envelope: &Envelope,
        session: &SessionKey,
    ) -> Result<Vec<u8>, ShroudError> {
        if envelope.version != ENVELOPE_VERSION {
            return Err(ShroudError::UnsupportedScheme);
        }
        if envelope.is_plain() {
            return shroud_decrypt(
                envelope,
                &UserSecretKeys::BonehFranklinBLS12381(HashMap::new()),
                None,
            )
            .map_err(|_| ShroudError::MalformedCiphertext);
        }

        let identity = Identity::from_bytes(&envelope.identity)
            .map_err(|_| ShroudError::MalformedCiphertext)?;
        let shares = self.shares_for(envelope.program, &identity, session).await?;

        // The servers backing the envelope must cover the threshold
        let covering = envelope
            .services
            .iter()
            .filter(|(id, _)| shares.contains_key(id))
            .count();
        if covering < envelope.threshold as usize {
            return Err(ShroudError::MissingShares);
        }

        shroud_decrypt(
            envelope,
            &UserSecretKeys::BonehFranklinBLS12381(shares),
            Some(&self.retriever.server_public_keys()),
        )
        .map_err(|_| ShroudError::MalformedCiphertext)
    }

    /// Tally a closed pool's ballots under the session.
    pub async fn tally(
        &self,
        pool: &VotePool,
        ballots: &[Ballot],
        session: &SessionKey,
    ) -> Result<TallyOutcome, ShroudError> {
        tally::tally(pool, ballots, session, &self.retriever).await
    }

    /// Cached or freshly fetched shares for an identity. Concurrent callers
    /// for the same identity and session block on one fetch; a failed fetch
    /// leaves nothing behind, so a later call retries.
    async fn shares_for(
        &self,
        program: ProgramId,
        identity: &Identity,
        session: &SessionKey,
    ) -> Result<KeyShareSet, ShroudError> {
        if let Some(shares) = self.key_cache.lock().await.get(identity) {
            debug!("Using cached key shares");
            return Ok(shares.clone());
        }

        let flight_key = (
            session.session_vk().as_bytes().to_vec(),
            identity.as_bytes().to_vec(),
        );
        let cell = self
            .flights
            .lock()
            .await
            .entry(flight_key.clone())
            .or_default()
            .clone();

        let result = cell
            .get_or_try_init(|| async {
                let shares = self
                    .retriever
                    .fetch_key_shares(program, identity, session)
                    .await?;
                self.key_cache
                    .lock()
                    .await
                    .insert(identity.clone(), shares.clone());
                Ok::<_, ShroudError>(shares)
            })
            .await
            .cloned();

        // Completed flights are dropped either way; the share cache is the
        // durable copy
        self.flights.lock().await.remove(&flight_key);
        result
    }
}
