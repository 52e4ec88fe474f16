//! process-wide network configuration
//!
//! loaded once at startup, shared as `Arc<NetworkConfig>`, never mutated.
//!
//! ```toml
//! network_public_key = "8f40...c2"
//! namespace = "dark-market"
//! max_pending_secs = 600
//! retention_secs = 86400
//! zero_winner_policy = "refund"
//! node_id = 3
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::correlator::{NodeCounterOffsets, OffsetGenerator, TimeRandomOffsets};
use crate::keys::NetworkPublicKey;
use crate::{Error, Result};

const DEFAULT_NAMESPACE: &str = "dark-market";
const DEFAULT_MAX_PENDING_SECS: u64 = 600;
const DEFAULT_RETENTION_SECS: u64 = 86_400;

/// what to do when nobody bet on the winning side
///
/// a business rule, not a cryptographic one. in both cases the resolution
/// surfaces `NoWinningBets` to the caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZeroWinnerPolicy {
    /// mark the market failed under its declared side; the creator may
    /// void it afterwards
    #[default]
    Fail,
    /// void the market, every bettor may reclaim their stake
    Refund,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    #[serde(with = "hex_key")]
    pub network_public_key: NetworkPublicKey,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_max_pending")]
    pub max_pending_secs: u64,
    /// how long finished computations stay pollable
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
    #[serde(default)]
    pub zero_winner_policy: ZeroWinnerPolicy,
    /// set for multi-instance deployments; switches offsets to node-id + counter
    #[serde(default)]
    pub node_id: Option<u16>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.into()
}

fn default_max_pending() -> u64 {
    DEFAULT_MAX_PENDING_SECS
}

fn default_retention() -> u64 {
    DEFAULT_RETENTION_SECS
}

impl NetworkConfig {
    pub fn new(network_public_key: NetworkPublicKey) -> Self {
        Self {
            network_public_key,
            namespace: default_namespace(),
            max_pending_secs: DEFAULT_MAX_PENDING_SECS,
            retention_secs: DEFAULT_RETENTION_SECS,
            zero_winner_policy: ZeroWinnerPolicy::default(),
            node_id: None,
        }
    }

    pub fn with_zero_winner_policy(mut self, policy: ZeroWinnerPolicy) -> Self {
        self.zero_winner_policy = policy;
        self
    }

    pub fn with_max_pending_secs(mut self, secs: u64) -> Self {
        self.max_pending_secs = secs;
        self
    }

    pub fn with_retention_secs(mut self, secs: u64) -> Self {
        self.retention_secs = secs;
        self
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&contents)?;
        tracing::info!(
            path = %path.display(),
            namespace = %config.namespace,
            "loaded network config"
        );
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::Config("namespace must not be empty".into()));
        }
        if !self
            .namespace
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(Error::Config(format!(
                "namespace {:?} may only contain [A-Za-z0-9_-]",
                self.namespace
            )));
        }
        if self.max_pending_secs == 0 {
            return Err(Error::Config("max_pending_secs must be positive".into()));
        }
        Ok(())
    }

    /// offset scheme matching the deployment shape
    pub fn offset_generator(&self) -> Box<dyn OffsetGenerator> {
        match self.node_id {
            Some(id) => Box::new(NodeCounterOffsets::new(id)),
            None => Box::new(TimeRandomOffsets::new()),
        }
    }
}

mod hex_key {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::keys::PublicKey;

    pub fn serialize<S: Serializer>(key: &PublicKey, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&key.to_hex())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<PublicKey, D::Error> {
        let s = String::deserialize(d)?;
        PublicKey::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_ephemeral_keypair;

    #[test]
    fn test_toml_roundtrip() {
        let pk = generate_ephemeral_keypair().public_key;
        let config = NetworkConfig::new(pk).with_zero_winner_policy(ZeroWinnerPolicy::Refund);
        let s = config.to_toml_string().unwrap();
        assert_eq!(NetworkConfig::from_toml_str(&s).unwrap(), config);
    }

    #[test]
    fn test_defaults() {
        let pk = generate_ephemeral_keypair().public_key;
        let config =
            NetworkConfig::from_toml_str(&format!("network_public_key = \"{}\"", pk.to_hex()))
                .unwrap();
        assert_eq!(config.namespace, "dark-market");
        assert_eq!(config.max_pending_secs, 600);
        assert_eq!(config.retention_secs, 86_400);
        assert_eq!(config.zero_winner_policy, ZeroWinnerPolicy::Fail);
        assert_eq!(config.node_id, None);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(NetworkConfig::from_toml_str("network_public_key = \"abcd\"").is_err());
        assert!(NetworkConfig::from_toml_str("namespace = \"x\"").is_err());

        let pk = generate_ephemeral_keypair().public_key;
        let bad_ns = format!(
            "network_public_key = \"{}\"\nnamespace = \"a:b\"",
            pk.to_hex()
        );
        assert!(matches!(
            NetworkConfig::from_toml_str(&bad_ns),
            Err(Error::Config(_))
        ));
        let unknown = format!("network_public_key = \"{}\"\nfoo = 1", pk.to_hex());
        assert!(NetworkConfig::from_toml_str(&unknown).is_err());
    }

    #[test]
    fn test_node_id_switches_offsets() {
        let pk = generate_ephemeral_keypair().public_key;
        let mut config = NetworkConfig::new(pk);
        config.node_id = Some(9);
        assert_eq!(config.offset_generator().next_offset().0 >> 48, 9);
    }
}
