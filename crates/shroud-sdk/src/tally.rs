// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Vote pools and the tally. A pool names the predicate program, the access
//! policy, the voting window and the options. Ballots are envelopes encrypted
//! under per-ballot identities of the pool's policy. After the window closes,
//! the tally fetches key shares for all ballots in batches and decrypts them
//! into one row per ballot, in ballot order.

use crate::error::ShroudError;
use crate::policy::PolicyDescriptor;
use crate::retriever::{FetchOutcome, KeyRetriever, KeyShareSet};
use crate::server::KeyServerApi;
use crate::session::{Address, SessionKey};
use crate::store::BlobId;
use crate::time::current_epoch_time;
use crypto::identity::Identity;
use crypto::{shroud_decrypt, Envelope, ProgramId, UserSecretKeys};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A cast ballot: the voter's address and the encrypted choice.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ballot {
    pub voter: Address,
    pub envelope: Envelope,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VotePoolState {
    /// Created, the encrypted description is not yet stored.
    Created,
    /// Description ciphertext stored, voting window not yet open.
    Filled,
    /// Accepting ballots.
    Open,
    /// Window passed, results not yet recorded.
    Closed,
    /// Results recorded.
    ResultsRevealed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VotePool {
    pub program: ProgramId,
    pub policy: PolicyDescriptor,
    /// Window start, milliseconds since the UNIX epoch.
    pub start: u64,
    /// Window end, exclusive.
    pub end: u64,
    pub options: Vec<String>,
    /// Content address of the description envelope. The description is
    /// stored only as ciphertext, see [crate::ShroudClient::fill_pool].
    pub description: Option<BlobId>,
    pub results: Option<Vec<TallyRow>>,
}

impl VotePool {
    /// The pool's state is derived, never stored.
    pub fn state(&self, now: u64) -> VotePoolState {
        if self.results.is_some() {
            VotePoolState::ResultsRevealed
        } else if self.description.is_none() {
            VotePoolState::Created
        } else if now < self.start {
            VotePoolState::Filled
        } else if now < self.end {
            VotePoolState::Open
        } else {
            VotePoolState::Closed
        }
    }

    pub fn can_cast(&self, now: u64) -> bool {
        self.state(now) == VotePoolState::Open
    }

    /// Derive a fresh per-ballot identity under the pool's policy.
    pub fn ballot_identity(&self) -> Result<Identity, ShroudError> {
        self.policy
            .derive_identity()
            .map_err(|_| ShroudError::MalformedPolicyId)
    }

    pub fn record_results(&mut self, rows: Vec<TallyRow>) -> Result<(), ShroudError> {
        match self.state(current_epoch_time()) {
            VotePoolState::Closed => {
                self.results = Some(rows);
                Ok(())
            }
            VotePoolState::ResultsRevealed => Err(ShroudError::InvalidConfiguration(
                "results already recorded".to_string(),
            )),
            _ => Err(ShroudError::TallyBeforeClose),
        }
    }
}

/// One ballot's decrypted choice. `None` when the ballot could not be
/// decrypted; the row is kept so every ballot stays visible in the output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyRow {
    pub voter: Address,
    pub choice: Option<String>,
}

/// The tally output: one row per ballot in ballot order, counts per known
/// option, and the reason for every undecrypted ballot by its index.
#[derive(Debug)]
pub struct TallyOutcome {
    pub rows: Vec<TallyRow>,
    pub counts: HashMap<String, u64>,
    pub failures: Vec<(usize, ShroudError)>,
}

/// Count rows against the pool's options. Rows whose choice is not a known
/// option are kept in the output but never counted.
fn count_rows(options: &[String], rows: &[TallyRow]) -> HashMap<String, u64> {
    let mut counts: HashMap<String, u64> = options.iter().map(|o| (o.clone(), 0)).collect();
    for row in rows {
        if let Some(choice) = &row.choice {
            if let Some(count) = counts.get_mut(choice) {
                *count += 1;
            }
        }
    }
    counts
}

/// Decrypt and count all ballots of a closed pool.
///
/// Key shares for all ballot identities are fetched in batches, several
/// batches in flight at once, and each ballot is decrypted locally. A ballot
/// that cannot be decrypted yields a row with no choice and an entry in
/// `failures`; it never aborts the tally.
pub async fn tally<S: KeyServerApi>(
    pool: &VotePool,
    ballots: &[Ballot],
    session: &SessionKey,
    retriever: &KeyRetriever<S>,
) -> Result<TallyOutcome, ShroudError> {
    match pool.state(current_epoch_time()) {
        VotePoolState::Closed | VotePoolState::ResultsRevealed => {}
        _ => return Err(ShroudError::TallyBeforeClose),
    }

    // An identity reused across different envelopes makes their shares
    // interchangeable; flag all involved ballots instead of decrypting
    let mut envelopes_by_identity: HashMap<&[u8], &Envelope> = HashMap::new();
    let mut collisions: HashSet<&[u8]> = HashSet::new();
    for ballot in ballots {
        match envelopes_by_identity.entry(ballot.envelope.identity.as_slice()) {
            std::collections::hash_map::Entry::Occupied(entry) => {
                if *entry.get() != &ballot.envelope {
                    collisions.insert(ballot.envelope.identity.as_slice());
                }
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(&ballot.envelope);
            }
        }
    }

    // Shares are only needed for sealed, non-colliding ballots of this pool
    let identities: Vec<Identity> = ballots
        .iter()
        .filter(|ballot| {
            !ballot.envelope.is_plain()
                && ballot.envelope.program == pool.program
                && !collisions.contains(ballot.envelope.identity.as_slice())
        })
        .filter_map(|ballot| Identity::from_bytes(&ballot.envelope.identity).ok())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    let config = retriever.config();
    let fetched: Vec<Result<FetchOutcome, ShroudError>> =
        stream::iter(identities.chunks(config.batch_size).map(|chunk| {
            retriever.fetch_shares(pool.program, chunk, session)
        }))
        .buffer_unordered(config.tally_concurrency)
        .collect()
        .await;

    let mut shares: HashMap<Identity, KeyShareSet> = HashMap::new();
    let mut fetch_failures: HashMap<Identity, ShroudError> = HashMap::new();
    for outcome in fetched {
        let outcome = outcome?;
        shares.extend(outcome.shares);
        fetch_failures.extend(outcome.failures);
    }

    let public_keys = retriever.server_public_keys();
    let mut rows = Vec::with_capacity(ballots.len());
    let mut failures = Vec::new();
    for (index, ballot) in ballots.iter().enumerate() {
        let choice = decrypt_ballot(
            ballot,
            pool,
            &collisions,
            &shares,
            &fetch_failures,
            &public_keys,
        );
        match choice {
            Ok(choice) => rows.push(TallyRow {
                voter: ballot.voter,
                choice: Some(choice),
            }),
            Err(e) => {
                debug!("Ballot {index} from {} not counted: {e}", ballot.voter);
                failures.push((index, e));
                rows.push(TallyRow {
                    voter: ballot.voter,
                    choice: None,
                });
            }
        }
    }

    let counts = count_rows(&pool.options, &rows);
    Ok(TallyOutcome {
        rows,
        counts,
        failures,
    })
}

fn decrypt_ballot(
    ballot: &Ballot,
    pool: &VotePool,
    collisions: &HashSet<&[u8]>,
    shares: &HashMap<Identity, KeyShareSet>,
    fetch_failures: &HashMap<Identity, ShroudError>,
    public_keys: &crypto::ServerPublicKeys,
) -> Result<String, ShroudError> {
    if collisions.contains(ballot.envelope.identity.as_slice()) {
        return Err(ShroudError::IdentityCollision);
    }
    if ballot.envelope.program != pool.program {
        return Err(ShroudError::ScopeMismatch);
    }

    let plaintext = if ballot.envelope.is_plain() {
        shroud_decrypt(
            &ballot.envelope,
            &UserSecretKeys::BonehFranklinBLS12381(HashMap::new()),
            None,
        )
        .map_err(|_| ShroudError::MalformedCiphertext)?
    } else {
        let identity = Identity::from_bytes(&ballot.envelope.identity)
            .map_err(|_| ShroudError::MalformedCiphertext)?;
        let identity_shares = match shares.get(&identity) {
            Some(identity_shares) => identity_shares.clone(),
            None => {
                return Err(fetch_failures
                    .get(&identity)
                    .cloned()
                    .unwrap_or(ShroudError::MissingShares));
            }
        };
        shroud_decrypt(
            &ballot.envelope,
            &UserSecretKeys::BonehFranklinBLS12381(identity_shares),
            Some(public_keys),
        )
        .map_err(|_| ShroudError::MalformedCiphertext)?
    };

    String::from_utf8(plaintext).map_err(|_| ShroudError::MalformedCiphertext)
}
