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
//! # EVM Chain
//!
//! One [`EvmChain`] per configured network, owning that network's client,
//! signer, listener and voter. Construction is linear: client, then signer,
//! then the contract-facing pieces on top.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::client::EvmClient;
use crate::config::EvmChainConfig;
use crate::context::RelayerContext;
use crate::contracts::BridgeContract;
use crate::error::Result;
use crate::handler::{DepositEventHandler, HandlerKind, HandlerRegistry};
use crate::listener::{EvmListener, ListenerConfig};
use crate::message::{DomainId, Message};
use crate::store::{resolve_start_block, BlockStore};
use crate::voter::{EvmVoter, ProposalEventWatcher, ProposalTracker};

/// Everything the relayer runs for a single EVM network.
pub struct EvmChain {
    name: String,
    config: EvmChainConfig,
    client: Arc<EvmClient>,
    listener: EvmListener<EvmClient, DepositEventHandler<BridgeContract>>,
    voter: EvmVoter,
    watcher: ProposalEventWatcher,
    store: Arc<dyn BlockStore>,
}

impl EvmChain {
    /// Wires up a chain from its configuration: client, signer, handler
    /// registry, listener and a subscription voter.
    pub async fn setup(
        name: &str,
        ctx: &RelayerContext,
        store: Arc<dyn BlockStore>,
    ) -> Result<Self> {
        let config = ctx.evm_config(name)?.clone();
        let client = ctx.evm_client(name).await?;
        let signer = ctx.evm_signer(name, client.chain_id())?;
        let bridge = BridgeContract::new(config.bridge, client.clone());

        let mut registry = HandlerRegistry::default();
        for address in &config.erc20_handlers {
            registry.register(*address, HandlerKind::Erc20);
        }
        for address in &config.erc721_handlers {
            registry.register(*address, HandlerKind::Erc721);
        }
        for address in &config.generic_handlers {
            registry.register(*address, HandlerKind::Generic);
        }
        if registry.is_empty() {
            tracing::warn!(
                chain = %name,
                "No handler contracts registered; every deposit on this chain will be skipped"
            );
        }

        let handler = DepositEventHandler::new(registry, bridge.clone());
        let listener = EvmListener::new(
            client.clone(),
            handler,
            ListenerConfig {
                domain_id: config.domain_id,
                bridge_address: config.bridge,
                block_delay: config.block_confirmations,
                block_retry_interval: Duration::from_secs(config.block_retry_interval),
            },
        );

        // visible marker for operators comparing against deployments that
        // truncated proposal ids to the low nonce byte
        tracing::info!(
            chain = %name,
            "Proposal ids derive from the full 64-bit deposit nonce"
        );
        let tracker = Arc::new(ProposalTracker::default());
        let watcher = ProposalEventWatcher::new(
            client.clone(),
            bridge.clone(),
            signer.clone(),
            tracker.clone(),
            Duration::from_secs(config.block_retry_interval),
        );
        let voter = EvmVoter::with_subscription(client.clone(), bridge, signer, tracker);

        Ok(Self {
            name: name.to_string(),
            config,
            client,
            listener,
            voter,
            watcher,
            store,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain_id(&self) -> DomainId {
        self.config.domain_id
    }

    pub fn client(&self) -> Arc<EvmClient> {
        self.client.clone()
    }

    pub fn bridge_address(&self) -> ethers::types::Address {
        self.config.bridge
    }

    /// Scans this chain for deposits and feeds them into `events`. Runs
    /// until cancelled; only start-block resolution can fail, which is
    /// fatal for the process.
    #[tracing::instrument(skip_all, fields(chain = %self.name))]
    pub async fn poll_events(&self, events: mpsc::Sender<Message>) -> Result<()> {
        tracing::info!("Polling Blocks...");
        let start_block = resolve_start_block(
            &*self.store,
            self.client.as_ref(),
            self.config.domain_id,
            self.config.start_block,
            self.config.latest_block,
            self.config.fresh_start,
        )
        .await?;
        self.listener
            .listen(Some(start_block), self.store.clone(), events)
            .await
    }

    /// Follows this chain's proposal lifecycle events. Runs until cancelled.
    pub async fn watch_proposals(&self) -> Result<()> {
        self.watcher.run().await
    }

    /// Votes the proposal for a message destined to this chain.
    pub async fn write(&self, message: &Message) -> Result<()> {
        self.voter.vote(message).await
    }
}
