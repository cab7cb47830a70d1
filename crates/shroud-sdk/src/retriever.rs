// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Fetches key shares from the server set. Requests are batched, fanned out
//! concurrently, verified share by share, and retried with backoff while the
//! outcome is still undecided. An identity's outcome is decided as granted
//! once `threshold` verified shares arrive, and as denied once so many
//! servers refused that the threshold is out of reach.

use crate::config::ClientConfig;
use crate::error::ShroudError;
use crate::policy::CheckTransactionBuilder;
use crate::server::{FetchKeyRequest, KeyServerApi, ServerError};
use crate::session::SessionKey;
use crypto::ibe::verify_user_secret_key;
use crypto::identity::Identity;
use crypto::{create_full_id, elgamal, ibe, ObjectId, ProgramId, ServerPublicKeys};
use fastcrypto::groups::bls12381::{G1Element, G2Element};
use futures::stream::{FuturesUnordered, StreamExt};
use rand::thread_rng;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Verified user secret keys for one identity, by server id.
pub type KeyShareSet = HashMap<ObjectId, ibe::UserSecretKey>;

/// Per-identity results of a fetch. Failures are isolated: one denied or
/// unreachable identity never voids the shares of the others.
#[derive(Default)]
pub struct FetchOutcome {
    pub shares: HashMap<Identity, KeyShareSet>,
    pub failures: HashMap<Identity, ShroudError>,
}

pub struct KeyRetriever<S> {
    servers: Vec<S>,
    config: ClientConfig,
}

impl<S: KeyServerApi> KeyRetriever<S> {
    pub fn new(servers: Vec<S>, config: ClientConfig) -> Result<Self, ShroudError> {
        config.validate(servers.len())?;
        Ok(KeyRetriever { servers, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn servers(&self) -> &[S] {
        &self.servers
    }

    pub fn server_public_keys(&self) -> ServerPublicKeys {
        ServerPublicKeys::BonehFranklinBLS12381(
            self.servers.iter().map(|s| s.public_key()).collect(),
        )
    }

    /// Fetch shares for one identity, turning its failure into an error.
    pub async fn fetch_key_shares(
        &self,
        program: ProgramId,
        identity: &Identity,
        session: &SessionKey,
    ) -> Result<KeyShareSet, ShroudError> {
        let mut outcome = self
            .fetch_shares(program, std::slice::from_ref(identity), session)
            .await?;
        match outcome.shares.remove(identity) {
            Some(shares) => Ok(shares),
            None => Err(outcome
                .failures
                .remove(identity)
                .unwrap_or(ShroudError::QuorumUnavailable)),
        }
    }

    /// Fetch shares for many identities, folding them into batched requests.
    /// Fails as a whole only for session-level problems; per-identity
    /// failures land in the outcome.
    pub async fn fetch_shares(
        &self,
        program: ProgramId,
        identities: &[Identity],
        session: &SessionKey,
    ) -> Result<FetchOutcome, ShroudError> {
        if program != session.program() {
            return Err(ShroudError::ScopeMismatch);
        }
        let mut outcome = FetchOutcome::default();
        for batch in identities.chunks(self.config.batch_size) {
            // The session may expire between batches of a long fetch
            session.ensure_active()?;
            let batch_outcome = self.fetch_batch(program, batch, session).await?;
            outcome.shares.extend(batch_outcome.shares);
            outcome.failures.extend(batch_outcome.failures);
        }
        Ok(outcome)
    }

    async fn fetch_batch(
        &self,
        program: ProgramId,
        batch: &[Identity],
        session: &SessionKey,
    ) -> Result<FetchOutcome, ShroudError> {
        let mut builder = CheckTransactionBuilder::new(program);
        for identity in batch {
            builder.add_identity(identity)?;
        }
        let tx = builder.build()?;

        // Fresh transport keys per batch, so no released key is ever
        // decryptable with an earlier batch's secret.
        let (enc_secret, enc_key, enc_verification_key) =
            elgamal::genkey::<G1Element, G2Element, _>(&mut thread_rng());
        let request = FetchKeyRequest::new(&tx, session, enc_key, enc_verification_key);
        let request = &request;

        let identities_by_full_id: HashMap<Vec<u8>, &Identity> = batch
            .iter()
            .map(|identity| (create_full_id(&program, identity.as_bytes()), identity))
            .collect();

        let n = self.servers.len();
        let threshold = self.config.threshold as usize;

        let mut shares: HashMap<&Identity, KeyShareSet> =
            batch.iter().map(|identity| (identity, KeyShareSet::new())).collect();
        let mut denials: HashMap<&Identity, usize> =
            batch.iter().map(|identity| (identity, 0)).collect();
        // Identities are decided once the threshold is met or out of reach
        let decided = |shares: &HashMap<&Identity, KeyShareSet>,
                       denials: &HashMap<&Identity, usize>| {
            batch.iter().all(|identity| {
                shares[identity].len() >= threshold || denials[identity] > n - threshold
            })
        };

        let mut pending: Vec<usize> = (0..n).collect();
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.backoff(attempt - 1)).await;
                // The session may expire during the backoff; an expired
                // certificate would only be refused server-side and miscount
                // as a policy denial
                session.ensure_active()?;
            }

            let mut responses: FuturesUnordered<_> = pending
                .iter()
                .map(|&i| {
                    let server = &self.servers[i];
                    async move { (i, server.fetch_key(request).await) }
                })
                .collect();

            let mut unavailable = Vec::new();
            while let Some((i, result)) = responses.next().await {
                match result {
                    Ok(response) => {
                        let server_id = self.servers[i].id();
                        let public_key = self.servers[i].public_key();
                        for granted in response.granted {
                            let Some(identity) = identities_by_full_id.get(granted.id.as_slice())
                            else {
                                warn!("Server {server_id} granted an unrequested key, ignoring");
                                continue;
                            };
                            let user_secret_key = enc_secret.decrypt(&granted.encrypted_key);
                            if verify_user_secret_key(&user_secret_key, &granted.id, &public_key)
                                .is_err()
                            {
                                warn!("Server {server_id} released an invalid key, ignoring");
                                continue;
                            }
                            shares
                                .get_mut(identity)
                                .expect("initialized above")
                                .insert(server_id, user_secret_key);
                        }
                        for denied in response.denied {
                            if let Some(identity) = identities_by_full_id.get(denied.as_slice()) {
                                *denials.get_mut(identity).expect("initialized above") += 1;
                            }
                        }
                    }
                    Err(ServerError::Refused(msg)) => {
                        // A whole-request refusal denies every identity in it
                        debug!("Server {} refused the request: {msg}", self.servers[i].id());
                        for identity in batch {
                            *denials.get_mut(identity).expect("initialized above") += 1;
                        }
                    }
                    Err(ServerError::Unavailable(msg)) => {
                        debug!("Server {} unavailable: {msg}", self.servers[i].id());
                        unavailable.push(i);
                    }
                }
                if decided(&shares, &denials) {
                    break;
                }
            }
            drop(responses);

            pending = unavailable;
            if pending.is_empty() || decided(&shares, &denials) {
                break;
            }
        }

        let mut outcome = FetchOutcome::default();
        for identity in batch {
            let identity_shares = shares.remove(identity).expect("initialized above");
            if identity_shares.len() >= threshold {
                outcome.shares.insert(identity.clone(), identity_shares);
            } else if denials[identity] > n - threshold {
                // Never expose a below-threshold share set for a denied
                // identity
                outcome
                    .failures
                    .insert(identity.clone(), ShroudError::PolicyDenied);
            } else {
                outcome
                    .failures
                    .insert(identity.clone(), ShroudError::QuorumUnavailable);
            }
        }
        Ok(outcome)
    }
}
