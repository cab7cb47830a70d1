// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Errors surfaced to callers of the SDK. Each variant maps to a distinct
/// failure the caller can act on, see [ShroudError::is_retryable].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShroudError {
    /// The session has passed its time-to-live.
    ExpiredSession,
    /// The session was created for a different predicate program.
    ScopeMismatch,
    /// A user or session signature failed verification.
    InvalidSignature,
    /// Enough key servers refused the request that the threshold can no
    /// longer be reached. Not retryable.
    PolicyDenied,
    /// Too few key servers answered to reach the threshold, without a
    /// definitive policy denial. Retryable.
    QuorumUnavailable,
    /// The caller holds fewer key shares than the ciphertext's threshold.
    MissingShares,
    /// The ciphertext failed to parse or decrypt.
    MalformedCiphertext,
    /// The policy id was empty or failed to parse.
    MalformedPolicyId,
    /// The policy id exceeds the maximum length.
    PolicyIdTooLarge,
    /// The envelope uses a version or scheme this implementation does not know.
    UnsupportedScheme,
    /// Two different envelopes claim the same identity.
    IdentityCollision,
    /// Ballots cannot be tallied while the pool is still open.
    TallyBeforeClose,
    /// Ballots can only be cast while the pool's window is open.
    PoolNotOpen,
    /// The blob store failed to persist or serve a blob.
    StoreError(String),
    /// The client configuration is unusable.
    InvalidConfiguration(String),
}

impl ShroudError {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShroudError::ExpiredSession => "ExpiredSession",
            ShroudError::ScopeMismatch => "ScopeMismatch",
            ShroudError::InvalidSignature => "InvalidSignature",
            ShroudError::PolicyDenied => "PolicyDenied",
            ShroudError::QuorumUnavailable => "QuorumUnavailable",
            ShroudError::MissingShares => "MissingShares",
            ShroudError::MalformedCiphertext => "MalformedCiphertext",
            ShroudError::MalformedPolicyId => "MalformedPolicyId",
            ShroudError::PolicyIdTooLarge => "PolicyIdTooLarge",
            ShroudError::UnsupportedScheme => "UnsupportedScheme",
            ShroudError::IdentityCollision => "IdentityCollision",
            ShroudError::TallyBeforeClose => "TallyBeforeClose",
            ShroudError::PoolNotOpen => "PoolNotOpen",
            ShroudError::StoreError(_) => "StoreError",
            ShroudError::InvalidConfiguration(_) => "InvalidConfiguration",
        }
    }

    /// Whether retrying the same call later can succeed without any other
    /// state changing.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ShroudError::QuorumUnavailable)
    }
}

impl fmt::Display for ShroudError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShroudError::InvalidConfiguration(msg) | ShroudError::StoreError(msg) => {
                write!(f, "{}: {msg}", self.as_str())
            }
            other => write!(f, "{}", other.as_str()),
        }
    }
}

impl std::error::Error for ShroudError {}
