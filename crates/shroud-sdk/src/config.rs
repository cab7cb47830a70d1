// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::ShroudError;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Client-side tuning knobs. All fields have defaults, so a config file only
/// needs to name what it overrides.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Key shares required to decrypt an envelope.
    #[serde(default = "default_threshold")]
    pub threshold: u8,

    /// Identities folded into one fetch request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Extra rounds to retry unavailable servers before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff between retry rounds, doubled per round.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Concurrent fetch batches during a tally.
    #[serde(default = "default_tally_concurrency")]
    pub tally_concurrency: usize,
}

fn default_threshold() -> u8 {
    2
}

fn default_batch_size() -> usize {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_tally_concurrency() -> usize {
    4
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            threshold: default_threshold(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            tally_concurrency: default_tally_concurrency(),
        }
    }
}

impl ClientConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path.as_ref())
            .with_context(|| format!("cannot open config file {:?}", path.as_ref()))?;
        serde_yaml::from_reader(file).context("cannot parse config file")
    }

    pub fn validate(&self, server_count: usize) -> Result<(), ShroudError> {
        if self.threshold == 0 || self.threshold as usize > server_count {
            return Err(ShroudError::InvalidConfiguration(format!(
                "threshold {} must be between 1 and the number of servers ({server_count})",
                self.threshold
            )));
        }
        if self.batch_size == 0 {
            return Err(ShroudError::InvalidConfiguration(
                "batch_size must be positive".to_string(),
            ));
        }
        if self.tally_concurrency == 0 {
            return Err(ShroudError::InvalidConfiguration(
                "tally_concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Backoff before retry round `attempt`, doubling per round.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms << attempt.min(8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.threshold, 2);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_backoff_ms, 250);
        assert_eq!(config.tally_concurrency, 4);
        config.validate(3).unwrap();
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: ClientConfig = serde_yaml::from_str("threshold: 3\nbatch_size: 5\n").unwrap();
        assert_eq!(config.threshold, 3);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.max_retries, default_max_retries());
    }

    #[test]
    fn test_validation() {
        let mut config = ClientConfig::default();
        assert!(config.validate(1).is_err());
        config.threshold = 0;
        assert!(config.validate(3).is_err());
        config.threshold = 2;
        config.batch_size = 0;
        assert!(config.validate(3).is_err());
    }

    #[test]
    fn test_backoff_doubles() {
        let config = ClientConfig::default();
        assert_eq!(config.backoff(0), Duration::from_millis(250));
        assert_eq!(config.backoff(1), Duration::from_millis(500));
        assert_eq!(config.backoff(2), Duration::from_millis(1000));
    }
}
