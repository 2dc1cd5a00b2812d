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
//! # Handler Registry and Deposit Decoding
//!
//! Each chain carries an immutable map of handler contract addresses to the
//! payload schema they speak. The listener filters broadly against the
//! bridge contract; the decoder here resolves each log's handler through the
//! bridge's resource routing and dispatches to the matching payload decoder.

use std::collections::HashMap;

use ethers::types::Address;

use crate::client::DepositLog;
use crate::contracts::BridgeContract;
use crate::error::{Error, Result};
use crate::message::{DomainId, Message, Payload, ResourceId};

/// The payload schema a handler contract speaks.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HandlerKind {
    Erc20,
    Erc721,
    Generic,
}

/// Immutable dispatch table from handler contract address to payload kind.
/// Built from configuration once, before the chain starts.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Address, HandlerKind>,
}

impl HandlerRegistry {
    pub fn register(&mut self, address: Address, kind: HandlerKind) {
        self.handlers.insert(address, kind);
    }

    pub fn kind_of(&self, address: &Address) -> Option<HandlerKind> {
        self.handlers.get(address).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Resolves the handler contract responsible for a resource id. Implemented
/// by the bridge contract; tests substitute a fixed table.
#[async_trait::async_trait]
pub trait HandlerAddressResolver: Send + Sync {
    async fn handler_address_for(&self, resource_id: ResourceId) -> Result<Address>;
}

#[async_trait::async_trait]
impl HandlerAddressResolver for BridgeContract {
    async fn handler_address_for(&self, resource_id: ResourceId) -> Result<Address> {
        self.resource_id_to_handler_address(resource_id).await
    }
}

/// Turns raw deposit logs into canonical [`Message`]s.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_deposit(&self, source: DomainId, log: DepositLog) -> Result<Message>;
}

/// The production event handler: bridge lookup + registry dispatch.
#[derive(Debug)]
pub struct DepositEventHandler<R> {
    registry: HandlerRegistry,
    resolver: R,
}

impl<R> DepositEventHandler<R> {
    pub fn new(registry: HandlerRegistry, resolver: R) -> Self {
        Self { registry, resolver }
    }
}

#[async_trait::async_trait]
impl<R: HandlerAddressResolver> EventHandler for DepositEventHandler<R> {
    async fn handle_deposit(&self, source: DomainId, log: DepositLog) -> Result<Message> {
        let handler_address = self.resolver.handler_address_for(log.resource_id).await?;
        let kind = self
            .registry
            .kind_of(&handler_address)
            .ok_or(Error::UnknownHandler {
                address: handler_address,
            })?;
        let payload = match kind {
            HandlerKind::Erc20 => Payload::decode_fungible(&log.data)?,
            HandlerKind::Erc721 => Payload::decode_non_fungible(&log.data)?,
            HandlerKind::Generic => Payload::decode_generic(&log.data)?,
        };
        Ok(Message {
            source,
            destination: log.destination_domain_id,
            resource_id: log.resource_id,
            deposit_nonce: log.deposit_nonce,
            deposit_block: log.deposit_block,
            deposit_tx_hash: log.deposit_tx_hash,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Bytes, H256, U256};

    struct FixedResolver(Address);

    #[async_trait::async_trait]
    impl HandlerAddressResolver for FixedResolver {
        async fn handler_address_for(&self, _resource_id: ResourceId) -> Result<Address> {
            Ok(self.0)
        }
    }

    fn fungible_log() -> DepositLog {
        let payload = Payload::Fungible {
            amount: U256::from(14_555u64),
            recipient: vec![0xAA; 20].into(),
        };
        DepositLog {
            destination_domain_id: 2,
            resource_id: ResourceId([0x03; 32]),
            deposit_nonce: 9,
            sender_address: Address::repeat_byte(0x55),
            data: payload.encode(),
            handler_response: Bytes::default(),
            deposit_tx_hash: H256::repeat_byte(0x11),
            deposit_block: 742,
        }
    }

    #[tokio::test]
    async fn registered_handler_decodes_into_a_message() {
        let handler_address = Address::repeat_byte(0x0A);
        let mut registry = HandlerRegistry::default();
        registry.register(handler_address, HandlerKind::Erc20);
        let handler = DepositEventHandler::new(registry, FixedResolver(handler_address));

        let msg = handler.handle_deposit(1, fungible_log()).await.unwrap();
        assert_eq!(msg.source, 1);
        assert_eq!(msg.destination, 2);
        assert_eq!(msg.deposit_nonce, 9);
        assert!(matches!(
            msg.payload,
            Payload::Fungible { amount, .. } if amount == U256::from(14_555u64)
        ));
    }

    #[tokio::test]
    async fn unknown_handler_is_a_skippable_error() {
        let handler = DepositEventHandler::new(
            HandlerRegistry::default(),
            FixedResolver(Address::repeat_byte(0x0A)),
        );
        let err = handler.handle_deposit(1, fungible_log()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownHandler { .. }));
    }
}
