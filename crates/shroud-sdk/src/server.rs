// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The key server interface: request and response types, the request signing
//! format, and an HTTP client implementation.

use crate::error::ShroudError;
use crate::policy::CheckTransaction;
use crate::session::{Certificate, SessionKey};
use crypto::{elgamal, ibe, ObjectId};
use fastcrypto::ed25519::Ed25519Signature;
use fastcrypto::groups::bls12381::G1Element;
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use std::fmt;
use tracing::debug;

pub type ElGamalPublicKey = elgamal::PublicKey<ibe::UserSecretKey>;
pub type ElGamalEncryption = elgamal::Encryption<ibe::UserSecretKey>;
pub type ElGamalVerificationKey = elgamal::VerificationKey<ibe::PublicKey>;
pub type ElGamalSecretKey = elgamal::SecretKey<G1Element>;

/// A full id, see [crypto::create_full_id].
pub type KeyId = Vec<u8>;

/// A user secret key released by a server, ElGamal encrypted towards the
/// requester's ephemeral key.
#[derive(Serialize, Deserialize, Clone)]
pub struct GrantedKey {
    pub id: KeyId,
    pub encrypted_key: ElGamalEncryption,
}

/// The server's verdicts for one request: keys it released and identities it
/// refused. An identity missing from both lists means the server failed to
/// evaluate it and a retry may help.
#[derive(Serialize, Deserialize, Default)]
pub struct FetchKeyResponse {
    pub granted: Vec<GrantedKey>,
    pub denied: Vec<KeyId>,
}

#[serde_as]
#[derive(Serialize, Deserialize, Clone)]
pub struct FetchKeyRequest {
    #[serde_as(as = "Base64")]
    pub tx_bytes: Vec<u8>,
    pub enc_key: ElGamalPublicKey,
    pub enc_verification_key: ElGamalVerificationKey,
    pub request_signature: Ed25519Signature,
    pub certificate: Certificate,
}

#[derive(Serialize, Deserialize)]
struct RequestFormat {
    tx_bytes: Vec<u8>,
    enc_key: Vec<u8>,
    enc_verification_key: Vec<u8>,
}

/// The message the session key signs for a fetch request. Binds the check
/// transaction to the ephemeral encryption keys, so a server never releases
/// keys encrypted towards a key pair the session did not choose.
pub fn signed_request(
    tx: &CheckTransaction,
    enc_key: &ElGamalPublicKey,
    enc_verification_key: &ElGamalVerificationKey,
) -> Vec<u8> {
    let req = RequestFormat {
        tx_bytes: tx.to_bytes(),
        enc_key: bcs::to_bytes(enc_key).expect("should serialize"),
        enc_verification_key: bcs::to_bytes(enc_verification_key).expect("should serialize"),
    };
    bcs::to_bytes(&req).expect("should serialize")
}

impl FetchKeyRequest {
    /// Build a signed request for the given transaction under the session.
    pub fn new(
        tx: &CheckTransaction,
        session: &SessionKey,
        enc_key: ElGamalPublicKey,
        enc_verification_key: ElGamalVerificationKey,
    ) -> Self {
        let request_signature =
            session.sign_request(&signed_request(tx, &enc_key, &enc_verification_key));
        FetchKeyRequest {
            tx_bytes: tx.to_bytes(),
            enc_key,
            enc_verification_key,
            request_signature,
            certificate: session.certificate(),
        }
    }

    /// Server-side validation of the request signature against the session
    /// key named in the certificate.
    pub fn verify_signature(&self, tx: &CheckTransaction) -> Result<(), ShroudError> {
        use fastcrypto::traits::VerifyingKey;
        let message = signed_request(tx, &self.enc_key, &self.enc_verification_key);
        self.certificate
            .session_vk
            .verify(&message, &self.request_signature)
            .map_err(|_| ShroudError::InvalidSignature)
    }
}

/// How a key server call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// The server refused the request outright. Counts towards a policy
    /// denial and is not retried.
    Refused(String),
    /// Transport failure or server-side error. Retried with backoff.
    Unavailable(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Refused(msg) => write!(f, "refused: {msg}"),
            ServerError::Unavailable(msg) => write!(f, "unavailable: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {}

/// A key server as seen by the client.
#[allow(async_fn_in_trait)]
pub trait KeyServerApi: Send + Sync {
    /// The server's registered object id.
    fn id(&self) -> ObjectId;

    /// The server's IBE public key, used to verify released keys.
    fn public_key(&self) -> ibe::PublicKey;

    async fn fetch_key(&self, request: &FetchKeyRequest) -> Result<FetchKeyResponse, ServerError>;
}

impl<T: KeyServerApi> KeyServerApi for std::sync::Arc<T> {
    fn id(&self) -> ObjectId {
        (**self).id()
    }

    fn public_key(&self) -> ibe::PublicKey {
        (**self).public_key()
    }

    async fn fetch_key(&self, request: &FetchKeyRequest) -> Result<FetchKeyResponse, ServerError> {
        (**self).fetch_key(request).await
    }
}

/// Error body returned by key servers on refusal.
#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    message: Option<String>,
}

/// A key server reached over HTTP. Requests go to `{url}/v1/fetch_key` as
/// JSON.
pub struct HttpKeyServer {
    id: ObjectId,
    public_key: ibe::PublicKey,
    url: String,
    client: reqwest::Client,
}

impl HttpKeyServer {
    pub fn new(id: ObjectId, public_key: ibe::PublicKey, url: String) -> Self {
        HttpKeyServer {
            id,
            public_key,
            url,
            client: reqwest::Client::new(),
        }
    }
}

impl KeyServerApi for HttpKeyServer {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn public_key(&self) -> ibe::PublicKey {
        self.public_key
    }

    async fn fetch_key(&self, request: &FetchKeyRequest) -> Result<FetchKeyResponse, ServerError> {
        let response = self
            .client
            .post(format!("{}/v1/fetch_key", self.url))
            .json(request)
            .send()
            .await
            .map_err(|e| ServerError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<FetchKeyResponse>()
                .await
                .map_err(|e| ServerError::Unavailable(e.to_string()));
        }

        let body = response
            .json::<ErrorResponse>()
            .await
            .map_err(|e| ServerError::Unavailable(e.to_string()));
        debug!("Key server {} returned {}: {:?}", self.id, status, body.as_ref().map(|b| &b.error));
        match body {
            Ok(body) if status == reqwest::StatusCode::FORBIDDEN => Err(ServerError::Refused(
                body.message.unwrap_or(body.error),
            )),
            Ok(body) => Err(ServerError::Unavailable(body.message.unwrap_or(body.error))),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{CheckTransactionBuilder, PolicyDescriptor};
    use crate::session::PendingSession;
    use fastcrypto::ed25519::Ed25519KeyPair;
    use fastcrypto::groups::bls12381::G2Element;
    use fastcrypto::traits::{KeyPair, Signer};
    use rand::thread_rng;

    #[test]
    fn test_request_signature_roundtrip() {
        let mut rng = thread_rng();
        let program = ObjectId::random(&mut rng);

        let user = Ed25519KeyPair::generate(&mut rng);
        let pending = PendingSession::new(program, 10).unwrap();
        let signature = user.sign(pending.challenge().as_bytes());
        let session = pending.finalize(user.public().clone(), signature).unwrap();

        let policy = PolicyDescriptor::Allowlist(ObjectId::random(&mut rng));
        let mut builder = CheckTransactionBuilder::new(program);
        builder
            .add_identity(&policy.derive_identity().unwrap())
            .unwrap();
        let tx = builder.build().unwrap();

        let (_, enc_key, enc_vk) = elgamal::genkey::<G1Element, G2Element, _>(&mut rng);
        let request = FetchKeyRequest::new(&tx, &session, enc_key, enc_vk);
        request.verify_signature(&tx).unwrap();

        // A different transaction does not verify
        let mut other = CheckTransactionBuilder::new(program);
        other
            .add_identity(&policy.derive_identity().unwrap())
            .unwrap();
        assert!(request.verify_signature(&other.build().unwrap()).is_err());
    }

    #[test]
    fn test_request_serde_roundtrip() {
        let mut rng = thread_rng();
        let program = ObjectId::random(&mut rng);

        let user = Ed25519KeyPair::generate(&mut rng);
        let pending = PendingSession::new(program, 10).unwrap();
        let signature = user.sign(pending.challenge().as_bytes());
        let session = pending.finalize(user.public().clone(), signature).unwrap();

        let policy = PolicyDescriptor::Allowlist(ObjectId::random(&mut rng));
        let mut builder = CheckTransactionBuilder::new(program);
        builder
            .add_identity(&policy.derive_identity().unwrap())
            .unwrap();
        let tx = builder.build().unwrap();

        let (_, enc_key, enc_vk) = elgamal::genkey::<G1Element, G2Element, _>(&mut rng);
        let request = FetchKeyRequest::new(&tx, &session, enc_key, enc_vk);

        let json = serde_json::to_string(&request).unwrap();
        let restored: FetchKeyRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.tx_bytes, request.tx_bytes);
        restored.verify_signature(&tx).unwrap();
    }
}
