use std::sync::Arc;

use tokio::sync::broadcast;

use crate::client::EvmClient;
use crate::config;
use crate::error::{Error, Result};
use crate::signer::{GasConfig, TxSigner};

/// Shared state every task in the relayer hangs off of: the configuration
/// and the shutdown broadcast.
#[derive(Clone)]
pub struct RelayerContext {
    pub config: config::TrestleRelayerConfig,
    /// Broadcast channel with close-like semantics: one send fans out to
    /// every task's receiver.
    notify_shutdown: broadcast::Sender<()>,
}

impl RelayerContext {
    pub fn new(config: config::TrestleRelayerConfig) -> Self {
        let (notify_shutdown, _) = broadcast::channel(2);
        Self {
            config,
            notify_shutdown,
        }
    }

    /// A fresh receiver on the shutdown broadcast; every task holds one and
    /// races its work against it.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.notify_shutdown.subscribe()
    }

    /// Asks every running task to wind down.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
        tracing::trace!("Sent shutdown signal to all of the system.");
    }

    pub fn evm_config(&self, chain_name: &str) -> Result<&config::EvmChainConfig> {
        self.config
            .evm
            .get(chain_name)
            .ok_or_else(|| Error::ChainNotFound {
                chain_id: chain_name.to_string(),
            })
    }

    pub async fn evm_client(&self, chain_name: &str) -> Result<Arc<EvmClient>> {
        let chain_config = self.evm_config(chain_name)?;
        let client = EvmClient::connect(&chain_config.http_endpoint).await?;
        Ok(Arc::new(client))
    }

    pub fn evm_signer(&self, chain_name: &str, chain_id: u64) -> Result<Arc<TxSigner>> {
        let chain_config = self.evm_config(chain_name)?;
        let wallet = chain_config.private_key.wallet(chain_id)?;
        let gas = GasConfig {
            max_gas_price: chain_config.max_gas_price(),
            multiplier: chain_config.gas_multiplier,
            limit: chain_config.gas_limit(),
        };
        Ok(Arc::new(TxSigner::new(wallet, chain_id, gas)))
    }
}
