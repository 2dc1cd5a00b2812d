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
//! # EVM Chain Client
//!
//! A thin RPC layer over an ethers HTTP provider. The [`ChainClient`] trait
//! is the seam the listener scans through, so tests can drive the scanner
//! with a scripted chain.

use std::sync::Arc;
use std::time::Duration;

use ethers::abi::{self, ParamType};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockNumber, Bytes, Filter, Log, TransactionRequest, H256, U256,
};
use ethers::utils::keccak256;

use crate::error::{Error, Result};
use crate::message::ResourceId;

/// Signature of the deposit event emitted by the bridge contract.
pub const DEPOSIT_SIGNATURE: &str = "Deposit(uint8,bytes32,uint64)";

/// Topic0 of the deposit event filter.
pub fn deposit_topic() -> H256 {
    H256::from(keccak256(DEPOSIT_SIGNATURE.as_bytes()))
}

/// A raw deposit event, decoded from a log and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositLog {
    pub destination_domain_id: u8,
    pub resource_id: ResourceId,
    pub deposit_nonce: u64,
    pub sender_address: Address,
    pub data: Bytes,
    pub handler_response: Bytes,
    pub deposit_tx_hash: H256,
    pub deposit_block: u64,
}

impl DepositLog {
    /// Decodes a deposit from a raw log: the destination domain, resource id
    /// and nonce come from the indexed topics, the sender, deposit data and
    /// handler response from the ABI-encoded data section.
    pub fn try_from_log(log: Log) -> Result<Self> {
        if log.topics.len() != 4 {
            return Err(Error::InvalidDepositLog {
                reason: format!("expected 4 topics, found {}", log.topics.len()),
            });
        }
        let destination_domain_id =
            U256::from_big_endian(log.topics[1].as_bytes()).low_u64() as u8;
        let resource_id = ResourceId::from(log.topics[2]);
        let deposit_nonce = U256::from_big_endian(log.topics[3].as_bytes()).low_u64();

        let mut tokens = abi::decode(
            &[ParamType::Address, ParamType::Bytes, ParamType::Bytes],
            &log.data,
        )
        .map_err(|e| Error::InvalidDepositLog {
            reason: format!("undecodable data section: {e}"),
        })?;
        // decoded in declaration order: sender, data, handlerResponse
        let handler_response = tokens.pop().and_then(|t| t.into_bytes());
        let data = tokens.pop().and_then(|t| t.into_bytes());
        let sender = tokens.pop().and_then(|t| t.into_address());
        let (sender_address, data, handler_response) = match (sender, data, handler_response) {
            (Some(s), Some(d), Some(h)) => (s, d, h),
            _ => {
                return Err(Error::InvalidDepositLog {
                    reason: "data section tokens of unexpected type".into(),
                })
            }
        };

        let deposit_tx_hash = log.transaction_hash.ok_or(Error::InvalidDepositLog {
            reason: "log is missing its transaction hash".into(),
        })?;
        let deposit_block = log
            .block_number
            .ok_or(Error::InvalidDepositLog {
                reason: "log is missing its block number".into(),
            })?
            .as_u64();

        Ok(Self {
            destination_domain_id,
            resource_id,
            deposit_nonce,
            sender_address,
            data: data.into(),
            handler_response: handler_response.into(),
            deposit_tx_hash,
            deposit_block,
        })
    }
}

/// The chain surface the listener scans through.
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
    /// Height of the chain head.
    async fn latest_block(&self) -> Result<u64>;

    /// All deposit events emitted by the bridge contract in the inclusive
    /// block range `from..=to`. Individual undecodable logs are skipped with
    /// a warning; only the filter query itself can fail.
    async fn fetch_deposit_logs(
        &self,
        bridge: Address,
        from: u64,
        to: u64,
    ) -> Result<Vec<DepositLog>>;
}

/// An RPC client for one EVM chain, shared by the listener, the voter and
/// the signer of that chain.
#[derive(Debug, Clone)]
pub struct EvmClient {
    provider: Arc<Provider<Http>>,
    chain_id: u64,
}

impl EvmClient {
    /// Connects to the endpoint and caches the node's chain id.
    pub async fn connect(endpoint: &url::Url) -> Result<Self> {
        tracing::info!(url = %endpoint, "Connecting to evm chain...");
        let provider = Provider::<Http>::try_from(endpoint.as_str())
            .map_err(|_| Error::Generic("invalid http endpoint"))?
            .interval(Duration::from_millis(6u64));
        let chain_id = provider.get_chainid().await?.as_u64();
        Ok(Self {
            provider: Arc::new(provider),
            chain_id,
        })
    }

    /// The chain id reported by the node at connection time.
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Read-only contract call against the latest state.
    pub async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(calldata).into();
        Ok(self.provider.call(&tx, None).await?)
    }

    /// Submits an already-signed transaction and returns its hash without
    /// waiting for inclusion.
    pub async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256> {
        let pending = self.provider.send_raw_transaction(raw).await?;
        Ok(*pending)
    }

    /// The account nonce as seen by the node's mempool.
    pub async fn pending_nonce(&self, address: Address) -> Result<U256> {
        Ok(self
            .provider
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await?)
    }

    pub async fn suggest_gas_price(&self) -> Result<U256> {
        Ok(self.provider.get_gas_price().await?)
    }

    pub async fn suggest_gas_tip(&self) -> Result<U256> {
        Ok(self
            .provider
            .request("eth_maxPriorityFeePerGas", ())
            .await?)
    }

    /// Raw log query, for event surfaces beyond the deposit filter.
    pub async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        Ok(self.provider.get_logs(filter).await?)
    }

    /// Base fee of the latest block; `None` on pre-London chains, which
    /// selects the legacy gas path.
    pub async fn base_fee(&self) -> Result<Option<U256>> {
        let head = self
            .provider
            .get_block(BlockNumber::Latest)
            .await?
            .ok_or(Error::Generic("node returned no latest block"))?;
        Ok(head.base_fee_per_gas)
    }
}

#[async_trait::async_trait]
impl ChainClient for EvmClient {
    async fn latest_block(&self) -> Result<u64> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }

    async fn fetch_deposit_logs(
        &self,
        bridge: Address,
        from: u64,
        to: u64,
    ) -> Result<Vec<DepositLog>> {
        let filter = Filter::new()
            .address(bridge)
            .topic0(deposit_topic())
            .from_block(from)
            .to_block(to);
        let logs = self.provider.get_logs(&filter).await?;
        let mut deposits = Vec::with_capacity(logs.len());
        for log in logs {
            match DepositLog::try_from_log(log) {
                Ok(deposit) => deposits.push(deposit),
                Err(e) => tracing::warn!("Skipping undecodable deposit log: {}", e),
            }
        }
        Ok(deposits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::Token;
    use ethers::types::U64;

    fn deposit_log(dest: u8, nonce: u64) -> Log {
        let data = abi::encode(&[
            Token::Address(Address::repeat_byte(0x55)),
            Token::Bytes(vec![1, 2, 3]),
            Token::Bytes(vec![]),
        ]);
        Log {
            address: Address::repeat_byte(0x0B),
            topics: vec![
                deposit_topic(),
                H256::from_low_u64_be(dest as u64),
                H256::repeat_byte(0x03),
                H256::from_low_u64_be(nonce),
            ],
            data: data.into(),
            block_number: Some(U64::from(742u64)),
            transaction_hash: Some(H256::repeat_byte(0x11)),
            ..Default::default()
        }
    }

    #[test]
    fn deposit_log_decodes_topics_and_data() {
        let decoded = DepositLog::try_from_log(deposit_log(2, 9)).unwrap();
        assert_eq!(decoded.destination_domain_id, 2);
        assert_eq!(decoded.resource_id, ResourceId([0x03; 32]));
        assert_eq!(decoded.deposit_nonce, 9);
        assert_eq!(decoded.sender_address, Address::repeat_byte(0x55));
        assert_eq!(decoded.data.to_vec(), vec![1, 2, 3]);
        assert!(decoded.handler_response.is_empty());
        assert_eq!(decoded.deposit_block, 742);
    }

    #[test]
    fn deposit_log_with_missing_topics_is_rejected() {
        let mut log = deposit_log(2, 9);
        log.topics.truncate(2);
        let err = DepositLog::try_from_log(log).unwrap_err();
        assert!(matches!(err, Error::InvalidDepositLog { .. }));
    }

    #[test]
    fn deposit_log_with_garbage_data_is_rejected() {
        let mut log = deposit_log(2, 9);
        log.data = vec![0xFF; 7].into();
        let err = DepositLog::try_from_log(log).unwrap_err();
        assert!(matches!(err, Error::InvalidDepositLog { .. }));
    }
}
