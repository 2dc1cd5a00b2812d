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
//! # Transaction Signer
//!
//! One signer per chain, owning the private key and the local nonce counter.
//! Submissions are serialized through an internal lock so nonces issue as a
//! gap-free, strictly increasing sequence; the lock wraps exactly
//! prepare - sign - send - bump and is never held across channel operations.

use std::time::Duration;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, TransactionRequest, H256, U256};
use tokio::sync::Mutex;

use crate::client::EvmClient;
use crate::error::{Error, Result};
use crate::gas::{legacy_gas_price, london_fees};

/// Gas parameters of one chain, fixed at startup.
#[derive(Debug, Clone, Copy)]
pub struct GasConfig {
    /// Hard ceiling in wei for both gas markets.
    pub max_gas_price: U256,
    /// Multiplier applied to the node's legacy gas price suggestion.
    pub multiplier: f64,
    /// Gas limit attached to every submitted transaction.
    pub limit: U256,
}

/// The fee fields of a prepared transaction, one variant per gas market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeMode {
    Legacy {
        gas_price: U256,
    },
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

/// A fully priced set of transaction options. A fresh value is produced for
/// every submission; nothing here is shared or mutated in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOpts {
    pub nonce: U256,
    pub fee: FeeMode,
    pub gas_limit: U256,
}

/// Signs and submits transactions for a single account on a single chain.
pub struct TxSigner {
    wallet: LocalWallet,
    address: Address,
    chain_id: u64,
    gas: GasConfig,
    /// Local nonce counter, authoritative while the process runs. `None`
    /// until the first submission initializes it from the node's mempool.
    nonce: Mutex<Option<U256>>,
}

const NONCE_INIT_ATTEMPTS: usize = 10;
const NONCE_INIT_BACKOFF: Duration = Duration::from_secs(1);

impl TxSigner {
    pub fn new(wallet: LocalWallet, chain_id: u64, gas: GasConfig) -> Self {
        let wallet = wallet.with_chain_id(chain_id);
        let address = wallet.address();
        Self {
            wallet,
            address,
            chain_id,
            gas,
            nonce: Mutex::new(None),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs and submits a contract call, returning its transaction hash.
    ///
    /// Holds the signer lock for the whole prepare - sign - send - bump
    /// sequence. The nonce is bumped only after the node accepted the
    /// transaction; a `nonce too low` / `already known` rejection triggers a
    /// resync from the mempool and a single retry.
    #[tracing::instrument(skip_all, fields(to = ?to, signer = ?self.address))]
    pub async fn send(&self, client: &EvmClient, to: Address, calldata: Bytes) -> Result<H256> {
        let mut slot = self.nonce.lock().await;
        let nonce = self.current_nonce(client, &mut slot).await?;
        let opts = self.prepare_opts(client, nonce).await?;
        let tx = self.build_tx(to, calldata.clone(), &opts);

        match self.sign_and_send(client, &tx).await {
            Ok(hash) => {
                *slot = Some(nonce + U256::one());
                Ok(hash)
            }
            Err(e) if is_nonce_mismatch(&e) => {
                tracing::warn!("Nonce rejected by the node, resyncing from the mempool: {}", e);
                let fresh = client.pending_nonce(self.address).await?;
                let opts = self.prepare_opts(client, fresh).await?;
                let tx = self.build_tx(to, calldata, &opts);
                let hash = self.sign_and_send(client, &tx).await?;
                *slot = Some(fresh + U256::one());
                Ok(hash)
            }
            Err(e) => Err(e),
        }
    }

    async fn sign_and_send(&self, client: &EvmClient, tx: &TypedTransaction) -> Result<H256> {
        let signature = self.wallet.sign_transaction(tx).await?;
        client.send_raw_transaction(tx.rlp_signed(&signature)).await
    }

    /// Returns the local nonce, lazily initializing it from the node's
    /// pending transaction count.
    async fn current_nonce(&self, client: &EvmClient, slot: &mut Option<U256>) -> Result<U256> {
        if let Some(nonce) = *slot {
            return Ok(nonce);
        }
        for attempt in 1..=NONCE_INIT_ATTEMPTS {
            match client.pending_nonce(self.address).await {
                Ok(nonce) => {
                    *slot = Some(nonce);
                    return Ok(nonce);
                }
                Err(e) => {
                    tracing::warn!(attempt, "Unable to fetch the account nonce: {}", e);
                    tokio::time::sleep(NONCE_INIT_BACKOFF).await;
                }
            }
        }
        Err(Error::Generic("failed to initialize the account nonce"))
    }

    /// Prices a transaction against the current chain head. Returns a fresh
    /// options value; a base fee in the head selects the EIP-1559 path,
    /// otherwise the legacy one.
    async fn prepare_opts(&self, client: &EvmClient, nonce: U256) -> Result<TxOpts> {
        let fee = match client.base_fee().await? {
            Some(base_fee) => {
                tracing::debug!(%base_fee, "head carries a base fee, using the london market");
                let tip = client.suggest_gas_tip().await?;
                let (tip, max_fee) = london_fees(base_fee, tip, self.gas.max_gas_price)?;
                FeeMode::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: tip,
                }
            }
            None => {
                let suggested = client.suggest_gas_price().await?;
                FeeMode::Legacy {
                    gas_price: legacy_gas_price(
                        suggested,
                        self.gas.multiplier,
                        self.gas.max_gas_price,
                    ),
                }
            }
        };
        Ok(TxOpts {
            nonce,
            fee,
            gas_limit: self.gas.limit,
        })
    }

    fn build_tx(&self, to: Address, calldata: Bytes, opts: &TxOpts) -> TypedTransaction {
        match opts.fee {
            FeeMode::Legacy { gas_price } => TransactionRequest::new()
                .from(self.address)
                .to(to)
                .data(calldata)
                .nonce(opts.nonce)
                .gas(opts.gas_limit)
                .gas_price(gas_price)
                .chain_id(self.chain_id)
                .into(),
            FeeMode::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => Eip1559TransactionRequest::new()
                .from(self.address)
                .to(to)
                .data(calldata)
                .nonce(opts.nonce)
                .gas(opts.gas_limit)
                .max_fee_per_gas(max_fee_per_gas)
                .max_priority_fee_per_gas(max_priority_fee_per_gas)
                .chain_id(self.chain_id)
                .into(),
        }
    }
}

impl std::fmt::Debug for TxSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxSigner")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

/// Whether a submission error is the node telling us our nonce view drifted.
pub fn is_nonce_mismatch(error: &Error) -> bool {
    let text = error.to_string().to_lowercase();
    text.contains("nonce too low") || text.contains("already known")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn signer() -> TxSigner {
        let wallet = LocalWallet::from_str(
            "0x0101010101010101010101010101010101010101010101010101010101010101",
        )
        .unwrap();
        TxSigner::new(
            wallet,
            5,
            GasConfig {
                max_gas_price: U256::from(20_000_000_000u64),
                multiplier: 1.0,
                limit: U256::from(2_000_000u64),
            },
        )
    }

    #[test]
    fn legacy_opts_build_a_legacy_transaction() {
        let signer = signer();
        let opts = TxOpts {
            nonce: U256::from(3u64),
            fee: FeeMode::Legacy {
                gas_price: U256::from(7u64),
            },
            gas_limit: U256::from(2_000_000u64),
        };
        let tx = signer.build_tx(Address::repeat_byte(0x0B), Bytes::default(), &opts);
        match tx {
            TypedTransaction::Legacy(inner) => {
                assert_eq!(inner.nonce, Some(U256::from(3u64)));
                assert_eq!(inner.gas_price, Some(U256::from(7u64)));
                assert_eq!(inner.gas, Some(U256::from(2_000_000u64)));
                assert_eq!(inner.chain_id, Some(5u64.into()));
            }
            other => panic!("expected a legacy transaction, got {other:?}"),
        }
    }

    #[test]
    fn london_opts_build_an_eip1559_transaction() {
        let signer = signer();
        let opts = TxOpts {
            nonce: U256::from(4u64),
            fee: FeeMode::Eip1559 {
                max_fee_per_gas: U256::from(202u64),
                max_priority_fee_per_gas: U256::from(2u64),
            },
            gas_limit: U256::from(2_000_000u64),
        };
        let tx = signer.build_tx(Address::repeat_byte(0x0B), Bytes::default(), &opts);
        match tx {
            TypedTransaction::Eip1559(inner) => {
                assert_eq!(inner.nonce, Some(U256::from(4u64)));
                assert_eq!(inner.max_fee_per_gas, Some(U256::from(202u64)));
                assert_eq!(inner.max_priority_fee_per_gas, Some(U256::from(2u64)));
            }
            other => panic!("expected an eip1559 transaction, got {other:?}"),
        }
    }

    #[test]
    fn nonce_mismatch_classification() {
        assert!(is_nonce_mismatch(&Error::Generic("nonce too low")));
        assert!(is_nonce_mismatch(&Error::VoteRejected {
            reason: "Transaction already known".into(),
        }));
        assert!(!is_nonce_mismatch(&Error::Generic("out of gas")));
    }
}
