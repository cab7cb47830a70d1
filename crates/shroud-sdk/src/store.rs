// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Content-addressed blob storage for serialized envelopes. The SDK only
//! assumes the [BlobStore] contract; the in-memory store is for tests and
//! local development.

use anyhow::bail;
use fastcrypto::hash::{Blake2b256, HashFunction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;

/// The Blake2b-256 digest of a blob's content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobId([u8; 32]);

impl BlobId {
    pub fn for_bytes(data: &[u8]) -> Self {
        BlobId(Blake2b256::digest(data).digest)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({self})")
    }
}

#[allow(async_fn_in_trait)]
pub trait BlobStore: Send + Sync {
    /// Store a blob and return its content address.
    async fn put(&self, data: &[u8]) -> anyhow::Result<BlobId>;

    /// Fetch a blob, verifying it matches its address. `None` if unknown.
    async fn get(&self, id: &BlobId) -> anyhow::Result<Option<Vec<u8>>>;
}

#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<BlobId, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for InMemoryBlobStore {
    async fn put(&self, data: &[u8]) -> anyhow::Result<BlobId> {
        let id = BlobId::for_bytes(data);
        self.blobs.write().await.insert(id, data.to_vec());
        Ok(id)
    }

    async fn get(&self, id: &BlobId) -> anyhow::Result<Option<Vec<u8>>> {
        match self.blobs.read().await.get(id) {
            Some(data) => {
                if BlobId::for_bytes(data) != *id {
                    bail!("blob {id} does not match its content address");
                }
                Ok(Some(data.clone()))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = InMemoryBlobStore::new();
        let id = store.put(b"sealed ballot").await.unwrap();
        assert_eq!(id, BlobId::for_bytes(b"sealed ballot"));
        assert_eq!(
            store.get(&id).await.unwrap(),
            Some(b"sealed ballot".to_vec())
        );
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let store = InMemoryBlobStore::new();
        let id = BlobId::for_bytes(b"never stored");
        assert!(store.get(&id).await.unwrap().is_none());
    }
}
