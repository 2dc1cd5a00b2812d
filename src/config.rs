// Copyright 2024 Trestle Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//! # Relayer Configuration

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::message::{DomainId, ResourceId};

const fn default_enabled() -> bool {
    true
}

const fn default_max_gas_price() -> u64 {
    20_000_000_000 // 20 gwei
}

const fn default_gas_multiplier() -> f64 {
    1.0
}

const fn default_gas_limit() -> u64 {
    2_000_000
}

const fn default_block_confirmations() -> u64 {
    10
}

const fn default_block_retry_interval() -> u64 {
    5
}

/// TrestleRelayerConfig is the configuration for the trestle relayer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct TrestleRelayerConfig {
    /// EVM based networks and their configuration.
    ///
    /// a map between chain name and its configuration.
    #[serde(default)]
    pub evm: HashMap<String, EvmChainConfig>,
    /// How fungible amounts learn the token precision on each side of a
    /// transfer.
    #[serde(default)]
    pub decimals: DecimalsConfig,
}

impl TrestleRelayerConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, chain) in &self.evm {
            chain.validate().map_err(|e| {
                tracing::error!(chain = %name, "Invalid chain configuration: {}", e);
                e
            })?;
        }
        self.decimals.validate()
    }
}

/// Configuration of the decimal-adjustment step of the processing chain.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct DecimalsConfig {
    /// Where token precision comes from.
    #[serde(default)]
    pub source: DecimalsSource,
    /// Precision table, consumed by the `static` and `per-resource`
    /// sources and ignored by `auto`.
    #[serde(default)]
    pub table: Vec<DecimalsEntry>,
}

/// Where the decimal-adjustment processor learns token precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DecimalsSource {
    /// Read `decimals()` from the token contracts, resolved through the
    /// bridge's resource routing, and cache the results.
    #[default]
    Auto,
    /// A static table with one precision per chain.
    Static,
    /// A static table with one precision per chain and resource.
    PerResource,
}

/// One row of the precision table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DecimalsEntry {
    pub domain_id: DomainId,
    /// Required for the `per-resource` source, not allowed otherwise.
    pub resource_id: Option<ResourceId>,
    pub decimals: u8,
}

impl DecimalsConfig {
    pub fn validate(&self) -> Result<()> {
        match self.source {
            DecimalsSource::Auto => Ok(()),
            DecimalsSource::Static => {
                if self.table.is_empty() {
                    return Err(Error::Generic("decimals table is empty for the static source"));
                }
                let mut seen = HashSet::new();
                for entry in &self.table {
                    if entry.resource_id.is_some() {
                        return Err(Error::Generic(
                            "static decimals entries must not carry a resource-id",
                        ));
                    }
                    if !seen.insert(entry.domain_id) {
                        return Err(Error::Generic("duplicate domain in the decimals table"));
                    }
                }
                Ok(())
            }
            DecimalsSource::PerResource => {
                if self.table.is_empty() {
                    return Err(Error::Generic(
                        "decimals table is empty for the per-resource source",
                    ));
                }
                let mut seen = HashSet::new();
                for entry in &self.table {
                    let Some(resource_id) = entry.resource_id else {
                        return Err(Error::Generic(
                            "per-resource decimals entries require a resource-id",
                        ));
                    };
                    if !seen.insert((entry.domain_id, resource_id)) {
                        return Err(Error::Generic(
                            "duplicate (domain, resource) in the decimals table",
                        ));
                    }
                }
                Ok(())
            }
        }
    }

    /// The table as the per-chain processor consumes it.
    pub fn domain_table(&self) -> HashMap<DomainId, u8> {
        self.table
            .iter()
            .map(|entry| (entry.domain_id, entry.decimals))
            .collect()
    }

    /// The table as the per-resource processor consumes it.
    pub fn resource_table(&self) -> HashMap<DomainId, HashMap<ResourceId, u8>> {
        let mut out: HashMap<DomainId, HashMap<ResourceId, u8>> = HashMap::new();
        for entry in &self.table {
            if let Some(resource_id) = entry.resource_id {
                out.entry(entry.domain_id)
                    .or_default()
                    .insert(resource_id, entry.decimals);
            }
        }
        out
    }
}

/// EvmChainConfig is the configuration of one EVM chain the relayer serves.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EvmChainConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// One-byte identifier of this chain within the bridge deployment.
    pub domain_id: DomainId,
    /// Http(s) endpoint for the chain's JSON-RPC node.
    #[serde(skip_serializing)]
    pub http_endpoint: url::Url,
    /// The bridge contract that emits deposits and accepts votes.
    pub bridge: Address,
    /// Handler contracts speaking the ERC-20 payload schema.
    #[serde(default)]
    pub erc20_handlers: Vec<Address>,
    /// Handler contracts speaking the ERC-721 payload schema.
    #[serde(default)]
    pub erc721_handlers: Vec<Address>,
    /// Handler contracts speaking the generic payload schema.
    #[serde(default)]
    pub generic_handlers: Vec<Address>,
    /// The private key of the relayer account on this chain:
    /// a raw `0x`-prefixed hex key, or `$VAR` to read that hex key from the
    /// environment.
    #[serde(skip_serializing)]
    pub private_key: PrivateKey,
    /// Optionally, an account to receive rewards for relaying.
    pub beneficiary: Option<Address>,
    /// Ceiling in wei applied to both gas markets.
    #[serde(default = "default_max_gas_price")]
    pub max_gas_price: u64,
    /// Multiplier applied to legacy gas price suggestions.
    #[serde(default = "default_gas_multiplier")]
    pub gas_multiplier: f64,
    /// Gas limit attached to vote and execution transactions.
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    /// First block to scan when no checkpoint exists.
    #[serde(default)]
    pub start_block: u64,
    /// Depth below the chain head before a block is scanned. At least 1.
    #[serde(default = "default_block_confirmations")]
    pub block_confirmations: u64,
    /// Seconds between scanner retries while the head is unavailable or too
    /// shallow.
    #[serde(default = "default_block_retry_interval")]
    pub block_retry_interval: u64,
    /// Start scanning at the current chain head, ignoring `start-block` and
    /// any checkpoint.
    #[serde(default)]
    pub latest_block: bool,
    /// Ignore the persisted checkpoint and start from `start-block`.
    #[serde(default)]
    pub fresh_start: bool,
}

impl EvmChainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_confirmations < 1 {
            return Err(Error::Generic("block-confirmations has to be >= 1"));
        }
        if !self.gas_multiplier.is_finite() || self.gas_multiplier <= 0.0 {
            return Err(Error::Generic("gas-multiplier must be a positive number"));
        }
        Ok(())
    }

    pub fn max_gas_price(&self) -> U256 {
        U256::from(self.max_gas_price)
    }

    pub fn gas_limit(&self) -> U256 {
        U256::from(self.gas_limit)
    }
}

/// PrivateKey represents a private key.
#[derive(Clone)]
pub struct PrivateKey(H256);

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PrivateKey").finish()
    }
}

impl PrivateKey {
    /// A wallet for this key, bound to a chain id for replay protection.
    pub fn wallet(&self, chain_id: u64) -> Result<LocalWallet> {
        let wallet = LocalWallet::from_bytes(self.0.as_bytes())?;
        Ok(wallet.with_chain_id(chain_id))
    }
}

impl From<H256> for PrivateKey {
    fn from(secret: H256) -> Self {
        Self(secret)
    }
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct PrivateKeyVisitor;
        impl serde::de::Visitor<'_> for PrivateKeyVisitor {
            type Value = H256;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("hex string or an env var containing a hex string in it")
            }

            fn visit_str<E>(self, value: &str) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if let Some(var) = value.strip_prefix('$') {
                    tracing::trace!("Reading {} from env", var);
                    let value = std::env::var(var).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "error while loading this env {var}: {e}",
                        ))
                    })?;
                    H256::from_str(&value).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "{e}\n expected a 66 chars string (including the 0x prefix) but found {} chars",
                            value.len()
                        ))
                    })
                } else if value.starts_with("0x") {
                    H256::from_str(value).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "{e}\n got {} chars but expected a 66 chars string (including the 0x prefix)",
                            value.len()
                        ))
                    })
                } else {
                    Err(serde::de::Error::custom(
                        "expected a 0x-prefixed hex key or a $VAR env reference",
                    ))
                }
            }
        }

        let secret = deserializer.deserialize_str(PrivateKeyVisitor)?;
        Ok(Self(secret))
    }
}

/// Loads and validates the relayer configuration from a TOML file.
pub fn load<P: AsRef<Path>>(path: P) -> Result<TrestleRelayerConfig> {
    let config = config::Config::builder()
        .add_source(config::File::from(path.as_ref()))
        .build()?;
    let config: TrestleRelayerConfig = config.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const KEY: &str = "0x0101010101010101010101010101010101010101010101010101010101010101";

    fn chain_toml(extra: &str) -> String {
        format!(
            r#"
            [evm.goerli]
            domain-id = 1
            http-endpoint = "http://localhost:8545"
            bridge = "0x1234567890123456789012345678901234567890"
            erc20-handlers = ["0x0987654321098765432109876543210987654321"]
            private-key = "{KEY}"
            {extra}
            "#
        )
    }

    fn load_str(toml: &str) -> Result<TrestleRelayerConfig> {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        file.write_all(toml.as_bytes()).unwrap();
        load(file.path())
    }

    #[test]
    fn defaults_fill_the_optional_fields() {
        let config = load_str(&chain_toml("")).unwrap();
        let chain = &config.evm["goerli"];
        assert!(chain.enabled);
        assert_eq!(chain.domain_id, 1);
        assert_eq!(chain.max_gas_price, 20_000_000_000);
        assert_eq!(chain.gas_limit, 2_000_000);
        assert_eq!(chain.block_confirmations, 10);
        assert_eq!(chain.block_retry_interval, 5);
        assert_eq!(chain.start_block, 0);
        assert!(!chain.fresh_start);
        assert!(!chain.latest_block);
        assert_eq!(chain.erc20_handlers.len(), 1);
        assert!(chain.erc721_handlers.is_empty());
    }

    #[test]
    fn zero_confirmations_are_rejected() {
        let err = load_str(&chain_toml("block-confirmations = 0")).unwrap_err();
        assert!(err.to_string().contains("block-confirmations"));
    }

    #[test]
    fn nonpositive_gas_multiplier_is_rejected() {
        let err = load_str(&chain_toml("gas-multiplier = 0.0")).unwrap_err();
        assert!(err.to_string().contains("gas-multiplier"));
    }

    #[test]
    fn private_key_can_come_from_the_environment() {
        std::env::set_var("TRESTLE_TEST_PRIVATE_KEY", KEY);
        let toml = chain_toml("").replace(KEY, "$TRESTLE_TEST_PRIVATE_KEY");
        let config = load_str(&toml).unwrap();
        let wallet = config.evm["goerli"].private_key.wallet(5).unwrap();
        assert_eq!(wallet.chain_id(), 5);
    }

    #[test]
    fn private_key_without_prefix_is_rejected() {
        let toml = chain_toml("").replace(KEY, "not-a-key");
        assert!(load_str(&toml).is_err());
    }

    #[test]
    fn decimals_default_to_the_auto_source() {
        let config = load_str(&chain_toml("")).unwrap();
        assert_eq!(config.decimals.source, DecimalsSource::Auto);
        assert!(config.decimals.table.is_empty());
    }

    #[test]
    fn static_decimals_table_parses() {
        let toml = format!(
            r#"{}
            [decimals]
            source = "static"

            [[decimals.table]]
            domain-id = 1
            decimals = 18

            [[decimals.table]]
            domain-id = 2
            decimals = 2
            "#,
            chain_toml("")
        );
        let config = load_str(&toml).unwrap();
        assert_eq!(config.decimals.source, DecimalsSource::Static);
        let table = config.decimals.domain_table();
        assert_eq!(table[&1], 18);
        assert_eq!(table[&2], 2);
    }

    #[test]
    fn per_resource_decimals_table_parses() {
        let rid = format!("0x{}", "03".repeat(32));
        let toml = format!(
            r#"{}
            [decimals]
            source = "per-resource"

            [[decimals.table]]
            domain-id = 1
            resource-id = "{rid}"
            decimals = 18
            "#,
            chain_toml("")
        );
        let config = load_str(&toml).unwrap();
        assert_eq!(config.decimals.source, DecimalsSource::PerResource);
        let table = config.decimals.resource_table();
        assert_eq!(table[&1][&crate::message::ResourceId([0x03; 32])], 18);
    }

    #[test]
    fn static_source_with_an_empty_table_is_rejected() {
        let toml = format!(
            r#"{}
            [decimals]
            source = "static"
            "#,
            chain_toml("")
        );
        let err = load_str(&toml).unwrap_err();
        assert!(err.to_string().contains("decimals table is empty"));
    }

    #[test]
    fn per_resource_entries_require_a_resource_id() {
        let toml = format!(
            r#"{}
            [decimals]
            source = "per-resource"

            [[decimals.table]]
            domain-id = 1
            decimals = 18
            "#,
            chain_toml("")
        );
        let err = load_str(&toml).unwrap_err();
        assert!(err.to_string().contains("require a resource-id"));
    }

    #[test]
    fn duplicate_static_domains_are_rejected() {
        let toml = format!(
            r#"{}
            [decimals]
            source = "static"

            [[decimals.table]]
            domain-id = 1
            decimals = 18

            [[decimals.table]]
            domain-id = 1
            decimals = 2
            "#,
            chain_toml("")
        );
        let err = load_str(&toml).unwrap_err();
        assert!(err.to_string().contains("duplicate domain"));
    }
}
