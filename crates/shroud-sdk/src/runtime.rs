// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The ledger seam. Key servers evaluate check transactions against some
//! policy runtime; the SDK only assumes the [PolicyRuntime] contract and
//! ships an in-memory ledger for tests and local development.

use crate::policy::{CheckTransaction, PolicyDescriptor};
use crate::session::Address;
use anyhow::anyhow;
use crypto::ObjectId;
use rand::thread_rng;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Simulate-only evaluation of a check transaction: one verdict per call,
/// in call order. Evaluation never mutates ledger state.
#[allow(async_fn_in_trait)]
pub trait PolicyRuntime: Send + Sync {
    async fn simulate(&self, tx: &CheckTransaction, caller: &Address)
        -> anyhow::Result<Vec<bool>>;
}

#[derive(Default)]
struct LedgerState {
    allowlists: HashMap<ObjectId, HashSet<Address>>,
    collections: HashMap<ObjectId, HashSet<Address>>,
}

/// An in-memory ledger holding allowlists and asset collections.
#[derive(Default)]
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_allowlist(&self) -> ObjectId {
        let id = ObjectId::random(&mut thread_rng());
        self.state.write().await.allowlists.insert(id, HashSet::new());
        id
    }

    pub async fn add_to_allowlist(&self, allowlist: ObjectId, member: Address) {
        self.state
            .write()
            .await
            .allowlists
            .entry(allowlist)
            .or_default()
            .insert(member);
    }

    pub async fn remove_from_allowlist(&self, allowlist: ObjectId, member: &Address) {
        if let Some(members) = self.state.write().await.allowlists.get_mut(&allowlist) {
            members.remove(member);
        }
    }

    pub async fn create_collection(&self) -> ObjectId {
        let id = ObjectId::random(&mut thread_rng());
        self.state
            .write()
            .await
            .collections
            .insert(id, HashSet::new());
        id
    }

    pub async fn mint_asset(&self, collection: ObjectId, owner: Address) {
        self.state
            .write()
            .await
            .collections
            .entry(collection)
            .or_default()
            .insert(owner);
    }

    async fn check(&self, descriptor: &PolicyDescriptor, caller: &Address) -> bool {
        let state = self.state.read().await;
        match descriptor {
            // Public content is never gated on the ledger
            PolicyDescriptor::Public => false,
            PolicyDescriptor::Allowlist(id) => state
                .allowlists
                .get(id)
                .is_some_and(|members| members.contains(caller)),
            PolicyDescriptor::AssetOwnership(id) => state
                .collections
                .get(id)
                .is_some_and(|owners| owners.contains(caller)),
        }
    }
}

impl PolicyRuntime for InMemoryLedger {
    async fn simulate(
        &self,
        tx: &CheckTransaction,
        caller: &Address,
    ) -> anyhow::Result<Vec<bool>> {
        tx.validate().map_err(|e| anyhow!("invalid transaction: {e}"))?;
        let mut verdicts = Vec::with_capacity(tx.calls.len());
        for call in &tx.calls {
            let descriptor = PolicyDescriptor::from_policy_id(&call.predicate)
                .map_err(|e| anyhow!("invalid predicate: {e}"))?;
            verdicts.push(self.check(&descriptor, caller).await);
        }
        Ok(verdicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::CheckTransactionBuilder;
    use fastcrypto::ed25519::Ed25519KeyPair;
    use fastcrypto::traits::KeyPair;

    fn address() -> Address {
        Address::from_public_key(Ed25519KeyPair::generate(&mut thread_rng()).public())
    }

    #[tokio::test]
    async fn test_allowlist_gating() {
        let ledger = InMemoryLedger::new();
        let allowlist = ledger.create_allowlist().await;
        let member = address();
        let outsider = address();
        ledger.add_to_allowlist(allowlist, member).await;

        let policy = PolicyDescriptor::Allowlist(allowlist);
        let mut builder = CheckTransactionBuilder::new(ObjectId::random(&mut thread_rng()));
        builder
            .add_identity(&policy.derive_identity().unwrap())
            .unwrap();
        let tx = builder.build().unwrap();

        assert_eq!(ledger.simulate(&tx, &member).await.unwrap(), vec![true]);
        assert_eq!(ledger.simulate(&tx, &outsider).await.unwrap(), vec![false]);

        ledger.remove_from_allowlist(allowlist, &member).await;
        assert_eq!(ledger.simulate(&tx, &member).await.unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn test_asset_ownership_gating() {
        let ledger = InMemoryLedger::new();
        let collection = ledger.create_collection().await;
        let owner = address();
        ledger.mint_asset(collection, owner).await;

        let policy = PolicyDescriptor::AssetOwnership(collection);
        let mut builder = CheckTransactionBuilder::new(ObjectId::random(&mut thread_rng()));
        builder
            .add_identity(&policy.derive_identity().unwrap())
            .unwrap();
        let tx = builder.build().unwrap();

        assert_eq!(ledger.simulate(&tx, &owner).await.unwrap(), vec![true]);
        assert_eq!(ledger.simulate(&tx, &address()).await.unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn test_unknown_object_denies() {
        let ledger = InMemoryLedger::new();
        let policy = PolicyDescriptor::Allowlist(ObjectId::random(&mut thread_rng()));
        let mut builder = CheckTransactionBuilder::new(ObjectId::random(&mut thread_rng()));
        builder
            .add_identity(&policy.derive_identity().unwrap())
            .unwrap();
        let tx = builder.build().unwrap();
        assert_eq!(ledger.simulate(&tx, &address()).await.unwrap(), vec![false]);
    }
}
