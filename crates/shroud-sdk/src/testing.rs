// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! An in-process key server backed by [InMemoryLedger], running the same
//! checks a production server runs: certificate verification, request
//! signature verification, transaction validation, scope check, policy
//! simulation, and ElGamal-encrypted key release.

use crate::policy::CheckTransaction;
use crate::runtime::{InMemoryLedger, PolicyRuntime};
use crate::server::{FetchKeyRequest, FetchKeyResponse, GrantedKey, KeyServerApi, ServerError};
use crypto::{create_full_id, ibe, ObjectId};
use rand::thread_rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub struct MockKeyServer {
    id: ObjectId,
    master_key: ibe::MasterKey,
    public_key: ibe::PublicKey,
    ledger: Arc<InMemoryLedger>,
    requests: AtomicUsize,
    failing: AtomicBool,
}

impl MockKeyServer {
    pub fn new(ledger: Arc<InMemoryLedger>) -> Self {
        let mut rng = thread_rng();
        let (master_key, public_key) = ibe::generate_key_pair(&mut rng);
        MockKeyServer {
            id: ObjectId::random(&mut rng),
            master_key,
            public_key,
            ledger,
            requests: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Number of fetch requests received, including failed ones.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Make the server answer [ServerError::Unavailable] until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    async fn handle(&self, request: &FetchKeyRequest) -> Result<FetchKeyResponse, ServerError> {
        request
            .certificate
            .verify()
            .map_err(|e| ServerError::Refused(e.to_string()))?;

        let tx = CheckTransaction::from_bytes(&request.tx_bytes)
            .map_err(|e| ServerError::Refused(e.to_string()))?;
        tx.validate()
            .map_err(|e| ServerError::Refused(e.to_string()))?;
        request
            .verify_signature(&tx)
            .map_err(|e| ServerError::Refused(e.to_string()))?;

        // The session must be scoped to the program it requests keys for
        if tx.program != request.certificate.program {
            return Err(ServerError::Refused("program scope mismatch".to_string()));
        }

        let verdicts = self
            .ledger
            .simulate(&tx, &request.certificate.user)
            .await
            .map_err(|e| ServerError::Unavailable(e.to_string()))?;

        let mut rng = thread_rng();
        let mut response = FetchKeyResponse::default();
        for (call, approved) in tx.calls.iter().zip(verdicts) {
            let full_id = create_full_id(&tx.program, &call.identity);
            if approved {
                let user_secret_key = ibe::extract(&self.master_key, &full_id);
                response.granted.push(GrantedKey {
                    id: full_id,
                    encrypted_key: request.enc_key.encrypt(&mut rng, &user_secret_key),
                });
            } else {
                response.denied.push(full_id);
            }
        }
        Ok(response)
    }
}

impl KeyServerApi for MockKeyServer {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn public_key(&self) -> ibe::PublicKey {
        self.public_key
    }

    async fn fetch_key(&self, request: &FetchKeyRequest) -> Result<FetchKeyResponse, ServerError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServerError::Unavailable("injected failure".to_string()));
        }
        self.handle(request).await
    }
}
