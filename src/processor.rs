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
//! # Message Processors
//!
//! Processors rewrite messages in transit, between the router and the
//! voter, in configuration order. The ones here re-scale fungible transfer
//! amounts between chains whose token contracts use different decimal
//! precision, so the economic value crosses the bridge intact. Scaling down
//! floors; the truncated dust stays on the source chain.

use std::collections::HashMap;
use std::sync::Arc;

use ethers::types::U256;
use parking_lot::RwLock;

use crate::client::EvmClient;
use crate::contracts::{BridgeContract, Erc20Contract, Erc20HandlerContract};
use crate::error::{Error, Result};
use crate::message::{DomainId, Message, Payload, ResourceId, TransferKind};

/// A step in the message-processing chain. Processors may mutate the
/// message payload in place; the first error drops the message.
#[async_trait::async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, message: &mut Message) -> Result<()>;
}

/// Re-scales an amount from `source_decimals` to `dest_decimals`.
///
/// Scaling down floors. Scaling up can overflow the 32-byte wire amount,
/// which is reported as an error rather than wrapping.
fn adjust_amount(amount: U256, source_decimals: u8, dest_decimals: u8) -> Result<U256> {
    if source_decimals > dest_decimals {
        let diff = (source_decimals - dest_decimals) as usize;
        Ok(amount / U256::exp10(diff))
    } else if source_decimals < dest_decimals {
        let diff = (dest_decimals - source_decimals) as usize;
        amount
            .checked_mul(U256::exp10(diff))
            .ok_or(Error::Generic("adjusted amount overflows 32 bytes"))
    } else {
        Ok(amount)
    }
}

/// Applies an adjustment to the fungible amount of a message, if it has one.
fn adjust_message(
    message: &mut Message,
    source_decimals: u8,
    dest_decimals: u8,
) -> Result<()> {
    if let Payload::Fungible { amount, .. } = &mut message.payload {
        let adjusted = adjust_amount(*amount, source_decimals, dest_decimals)?;
        if adjusted != *amount {
            tracing::info!(
                "amount {} adjusted to {} from chain {} to chain {}",
                amount,
                adjusted,
                message.source,
                message.destination,
            );
        }
        *amount = adjusted;
    }
    Ok(())
}

/// Decimal adjustment driven by a static per-chain table: every resource on
/// a chain is assumed to use that chain's precision.
#[derive(Debug, Clone)]
pub struct DecimalAdjustProcessor {
    decimals: HashMap<DomainId, u8>,
}

impl DecimalAdjustProcessor {
    pub fn new(decimals: HashMap<DomainId, u8>) -> Self {
        Self { decimals }
    }

    fn decimals_for(&self, domain_id: DomainId) -> Result<u8> {
        self.decimals
            .get(&domain_id)
            .copied()
            .ok_or(Error::Generic("no decimals configured for domain"))
    }
}

#[async_trait::async_trait]
impl MessageProcessor for DecimalAdjustProcessor {
    async fn process(&self, message: &mut Message) -> Result<()> {
        if message.kind() != TransferKind::FungibleTransfer {
            return Ok(());
        }
        let source = self.decimals_for(message.source)?;
        let dest = self.decimals_for(message.destination)?;
        adjust_message(message, source, dest)
    }
}

/// Decimal adjustment driven by a per-(chain, resource) table, for
/// deployments where precision differs per token.
#[derive(Debug, Clone)]
pub struct ResourceDecimalAdjustProcessor {
    decimals: HashMap<DomainId, HashMap<ResourceId, u8>>,
}

impl ResourceDecimalAdjustProcessor {
    pub fn new(decimals: HashMap<DomainId, HashMap<ResourceId, u8>>) -> Self {
        Self { decimals }
    }

    fn decimals_for(&self, domain_id: DomainId, resource_id: ResourceId) -> Result<u8> {
        self.decimals
            .get(&domain_id)
            .ok_or(Error::Generic("no decimals configured for domain"))?
            .get(&resource_id)
            .copied()
            .ok_or(Error::Generic("no decimals configured for resource"))
    }
}

#[async_trait::async_trait]
impl MessageProcessor for ResourceDecimalAdjustProcessor {
    async fn process(&self, message: &mut Message) -> Result<()> {
        if message.kind() != TransferKind::FungibleTransfer {
            return Ok(());
        }
        let source = self.decimals_for(message.source, message.resource_id)?;
        let dest = self.decimals_for(message.destination, message.resource_id)?;
        adjust_message(message, source, dest)
    }
}

/// One chain's lookup path for the auto processor: its client and the
/// bridge that routes resource ids to handlers.
#[derive(Debug, Clone)]
pub struct DecimalSource {
    pub client: Arc<EvmClient>,
    pub bridge_address: ethers::types::Address,
}

/// Decimal adjustment that discovers precision on-chain: the bridge maps
/// the resource to its handler, the handler to the token contract, and the
/// token reports `decimals()`. Results are cached for the process lifetime;
/// tokens do not change decimals, so the cache never invalidates.
pub struct AutoDecimalAdjustProcessor {
    chains: HashMap<DomainId, DecimalSource>,
    cache: RwLock<HashMap<(DomainId, ResourceId), u8>>,
}

impl AutoDecimalAdjustProcessor {
    pub fn new(chains: HashMap<DomainId, DecimalSource>) -> Self {
        Self {
            chains,
            cache: RwLock::new(HashMap::new()),
        }
    }

    async fn decimals_for(&self, domain_id: DomainId, resource_id: ResourceId) -> Result<u8> {
        if let Some(cached) = self.cache.read().get(&(domain_id, resource_id)) {
            return Ok(*cached);
        }
        let source = self
            .chains
            .get(&domain_id)
            .ok_or(Error::Generic("no chain configured for domain"))?;
        let bridge = BridgeContract::new(source.bridge_address, source.client.clone());
        let handler_address = bridge.resource_id_to_handler_address(resource_id).await?;
        let handler = Erc20HandlerContract::new(handler_address, source.client.clone());
        let token_address = handler
            .resource_id_to_token_contract_address(resource_id)
            .await?;
        let token = Erc20Contract::new(token_address, source.client.clone());
        let decimals = token.decimals().await?;
        // last writer wins; the value is idempotent
        self.cache.write().insert((domain_id, resource_id), decimals);
        Ok(decimals)
    }
}

#[async_trait::async_trait]
impl MessageProcessor for AutoDecimalAdjustProcessor {
    async fn process(&self, message: &mut Message) -> Result<()> {
        if message.kind() != TransferKind::FungibleTransfer {
            return Ok(());
        }
        let source = self
            .decimals_for(message.source, message.resource_id)
            .await?;
        let dest = self
            .decimals_for(message.destination, message.resource_id)
            .await?;
        adjust_message(message, source, dest)
    }
}
