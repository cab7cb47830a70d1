// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Access policies and the check transaction that key servers evaluate.
//!
//! A policy descriptor names the condition a caller must satisfy, and its bcs
//! encoding is the policy id embedded in every identity. A check transaction
//! folds the identities of one or more envelopes into a single simulate-only
//! request, one call per identity, that a key server runs against the ledger
//! before releasing keys.

use crate::error::ShroudError;
use crypto::identity::{Identity, MAX_POLICY_ID_LENGTH};
use crypto::ProgramId;
use fastcrypto::error::FastCryptoResult;
use serde::{Deserialize, Serialize};

/// Upper bound on the number of calls folded into one check transaction.
pub const MAX_CALLS: usize = 100;

/// The condition a caller must satisfy before key servers release keys for an
/// identity carrying this policy.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyDescriptor {
    /// No condition. Content under this policy is stored as plaintext.
    Public,
    /// The caller's address must be on the referenced allowlist.
    Allowlist(crypto::ObjectId),
    /// The caller must own at least one asset of the referenced collection.
    AssetOwnership(crypto::ObjectId),
}

impl PolicyDescriptor {
    /// The policy id is the bcs encoding of the descriptor.
    pub fn policy_id(&self) -> Vec<u8> {
        bcs::to_bytes(self).expect("serialization never fails")
    }

    pub fn from_policy_id(bytes: &[u8]) -> Result<Self, ShroudError> {
        if bytes.len() > MAX_POLICY_ID_LENGTH {
            return Err(ShroudError::PolicyIdTooLarge);
        }
        bcs::from_bytes(bytes).map_err(|_| ShroudError::MalformedPolicyId)
    }

    pub fn is_public(&self) -> bool {
        matches!(self, PolicyDescriptor::Public)
    }

    /// Derive a fresh identity under this policy, with a random nonce.
    pub fn derive_identity(&self) -> FastCryptoResult<Identity> {
        Identity::generate(&self.policy_id(), &mut rand::thread_rng())
    }
}

/// One policy evaluation: the predicate to run and the identity it guards.
/// The predicate bytes are the policy id parsed out of the identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckCall {
    pub predicate: Vec<u8>,
    pub identity: Vec<u8>,
}

/// A simulate-only transaction evaluated by key servers. Never executed or
/// committed, only run against current ledger state to answer "may this
/// caller access these identities".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckTransaction {
    pub program: ProgramId,
    pub calls: Vec<CheckCall>,
}

impl CheckTransaction {
    pub fn to_bytes(&self) -> Vec<u8> {
        bcs::to_bytes(self).expect("serialization never fails")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ShroudError> {
        bcs::from_bytes(bytes).map_err(|_| ShroudError::MalformedPolicyId)
    }

    /// Reject transactions a key server must not evaluate: empty or oversized
    /// batches, identities that do not parse, predicates that are not valid
    /// policy ids, and calls whose identity embeds a different policy than
    /// the predicate claims.
    pub fn validate(&self) -> Result<(), ShroudError> {
        if self.calls.is_empty() || self.calls.len() > MAX_CALLS {
            return Err(ShroudError::MalformedPolicyId);
        }
        for call in &self.calls {
            let (policy_id, _) =
                Identity::parse(&call.identity).map_err(|_| ShroudError::MalformedPolicyId)?;
            if policy_id != call.predicate {
                return Err(ShroudError::MalformedPolicyId);
            }
            let descriptor = PolicyDescriptor::from_policy_id(&call.predicate)?;
            // Public identities never reach a key server
            if descriptor.is_public() {
                return Err(ShroudError::MalformedPolicyId);
            }
        }
        Ok(())
    }
}

/// Builds a [CheckTransaction] by folding identities, deduplicating repeats.
pub struct CheckTransactionBuilder {
    program: ProgramId,
    calls: Vec<CheckCall>,
}

impl CheckTransactionBuilder {
    pub fn new(program: ProgramId) -> Self {
        CheckTransactionBuilder {
            program,
            calls: Vec::new(),
        }
    }

    pub fn add_identity(&mut self, identity: &Identity) -> Result<(), ShroudError> {
        let (predicate, _) =
            Identity::parse(identity.as_bytes()).map_err(|_| ShroudError::MalformedPolicyId)?;
        let call = CheckCall {
            predicate,
            identity: identity.as_bytes().to_vec(),
        };
        if !self.calls.contains(&call) {
            self.calls.push(call);
        }
        Ok(())
    }

    pub fn build(self) -> Result<CheckTransaction, ShroudError> {
        let tx = CheckTransaction {
            program: self.program,
            calls: self.calls,
        };
        tx.validate()?;
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto::ObjectId;
    use rand::thread_rng;

    fn allowlist_policy() -> PolicyDescriptor {
        PolicyDescriptor::Allowlist(ObjectId::random(&mut thread_rng()))
    }

    #[test]
    fn test_policy_id_roundtrip() {
        for policy in [
            PolicyDescriptor::Public,
            allowlist_policy(),
            PolicyDescriptor::AssetOwnership(ObjectId::random(&mut thread_rng())),
        ] {
            let id = policy.policy_id();
            assert_eq!(PolicyDescriptor::from_policy_id(&id).unwrap(), policy);
        }
        assert_eq!(
            PolicyDescriptor::from_policy_id(b"garbage").unwrap_err(),
            ShroudError::MalformedPolicyId
        );
    }

    #[test]
    fn test_identity_carries_policy_id() {
        let policy = allowlist_policy();
        let identity = policy.derive_identity().unwrap();
        assert_eq!(identity.policy_id(), policy.policy_id());
    }

    #[test]
    fn test_builder_folds_and_dedupes() {
        let policy = allowlist_policy();
        let a = policy.derive_identity().unwrap();
        let b = policy.derive_identity().unwrap();

        let mut builder = CheckTransactionBuilder::new(ObjectId::random(&mut thread_rng()));
        builder.add_identity(&a).unwrap();
        builder.add_identity(&b).unwrap();
        builder.add_identity(&a).unwrap();
        let tx = builder.build().unwrap();

        assert_eq!(tx.calls.len(), 2);
        assert_eq!(tx.calls[0].identity, a.as_bytes());
        assert_eq!(tx.calls[1].identity, b.as_bytes());
        tx.validate().unwrap();

        let restored = CheckTransaction::from_bytes(&tx.to_bytes()).unwrap();
        assert_eq!(restored, tx);
    }

    #[test]
    fn test_validate_rejects_mismatched_predicate() {
        let identity = allowlist_policy().derive_identity().unwrap();
        let tx = CheckTransaction {
            program: ObjectId::random(&mut thread_rng()),
            calls: vec![CheckCall {
                predicate: allowlist_policy().policy_id(),
                identity: identity.as_bytes().to_vec(),
            }],
        };
        assert_eq!(tx.validate().unwrap_err(), ShroudError::MalformedPolicyId);
    }

    #[test]
    fn test_validate_rejects_empty_and_public() {
        let program = ObjectId::random(&mut thread_rng());
        let empty = CheckTransaction {
            program,
            calls: vec![],
        };
        assert!(empty.validate().is_err());

        let identity = PolicyDescriptor::Public.derive_identity().unwrap();
        let mut builder = CheckTransactionBuilder::new(program);
        builder.add_identity(&identity).unwrap();
        assert!(builder.build().is_err());
    }
}
