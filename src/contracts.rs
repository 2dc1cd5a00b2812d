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
//! # Contract Bindings
//!
//! Hand-rolled call encoders for the three contract surfaces the relayer
//! consumes: the bridge, the ERC-20 handler, and ERC-20 tokens. The ABIs are
//! small enough that selectors plus `ethers::abi` tokens beat generated
//! bindings here.

use std::sync::Arc;

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, H256};
use ethers::utils::keccak256;

use crate::client::EvmClient;
use crate::error::{Error, Result};
use crate::message::ResourceId;
use crate::proposal::Proposal;

/// First four bytes of the keccak-256 hash of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn calldata(signature: &str, args: &[Token]) -> Bytes {
    let mut out = selector(signature).to_vec();
    out.extend_from_slice(&abi::encode(args));
    out.into()
}

fn decode_single(kind: ParamType, raw: &Bytes) -> Result<Token> {
    let mut tokens = abi::decode(&[kind], raw)?;
    tokens.pop().ok_or(Error::Generic("empty contract return value"))
}

/// The bridge contract of one chain: resource routing reads plus the two
/// proposal write entry points.
#[derive(Debug, Clone)]
pub struct BridgeContract {
    address: Address,
    client: Arc<EvmClient>,
}

impl BridgeContract {
    pub fn new(address: Address, client: Arc<EvmClient>) -> Self {
        Self { address, client }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Resolves the handler contract responsible for a resource id.
    pub async fn resource_id_to_handler_address(
        &self,
        resource_id: ResourceId,
    ) -> Result<Address> {
        let calldata = calldata(
            "_resourceIDToHandlerAddress(bytes32)",
            &[Token::FixedBytes(resource_id.0.to_vec())],
        );
        let raw = self.client.call(self.address, calldata).await?;
        decode_single(ParamType::Address, &raw)?
            .into_address()
            .ok_or(Error::Generic("handler lookup returned a non-address"))
    }

    /// Calldata for `voteProposal(uint8,uint64,bytes32,bytes32)`.
    pub fn vote_proposal_calldata(&self, proposal: &Proposal) -> Bytes {
        vote_proposal_calldata(proposal)
    }

    /// Calldata for `executeProposal(uint8,uint64,bytes,bytes32)`.
    pub fn execute_proposal_calldata(&self, proposal: &Proposal) -> Bytes {
        execute_proposal_calldata(proposal)
    }
}

fn vote_proposal_calldata(proposal: &Proposal) -> Bytes {
    calldata(
        "voteProposal(uint8,uint64,bytes32,bytes32)",
        &[
            Token::Uint(proposal.source.into()),
            Token::Uint(proposal.deposit_nonce.into()),
            Token::FixedBytes(proposal.resource_id.0.to_vec()),
            Token::FixedBytes(proposal.data_hash().as_bytes().to_vec()),
        ],
    )
}

fn execute_proposal_calldata(proposal: &Proposal) -> Bytes {
    calldata(
        "executeProposal(uint8,uint64,bytes,bytes32)",
        &[
            Token::Uint(proposal.source.into()),
            Token::Uint(proposal.deposit_nonce.into()),
            Token::Bytes(proposal.data.to_vec()),
            Token::FixedBytes(proposal.resource_id.0.to_vec()),
        ],
    )
}

/// The ERC-20 handler contract: maps resource ids to token contracts.
#[derive(Debug, Clone)]
pub struct Erc20HandlerContract {
    address: Address,
    client: Arc<EvmClient>,
}

impl Erc20HandlerContract {
    pub fn new(address: Address, client: Arc<EvmClient>) -> Self {
        Self { address, client }
    }

    pub async fn resource_id_to_token_contract_address(
        &self,
        resource_id: ResourceId,
    ) -> Result<Address> {
        tracing::debug!("Getting token address from resourceID {}", resource_id);
        let calldata = calldata(
            "_resourceIDToTokenContractAddress(bytes32)",
            &[Token::FixedBytes(resource_id.0.to_vec())],
        );
        let raw = self.client.call(self.address, calldata).await?;
        decode_single(ParamType::Address, &raw)?
            .into_address()
            .ok_or(Error::Generic("token lookup returned a non-address"))
    }
}

/// A plain ERC-20 token contract; only `decimals()` is consumed.
#[derive(Debug, Clone)]
pub struct Erc20Contract {
    address: Address,
    client: Arc<EvmClient>,
}

impl Erc20Contract {
    pub fn new(address: Address, client: Arc<EvmClient>) -> Self {
        Self { address, client }
    }

    pub async fn decimals(&self) -> Result<u8> {
        let raw = self.client.call(self.address, calldata("decimals()", &[])).await?;
        let value = decode_single(ParamType::Uint(8), &raw)?
            .into_uint()
            .ok_or(Error::Generic("decimals() returned a non-integer"))?;
        Ok(value.low_u64() as u8)
    }
}

/// Signature of the proposal lifecycle event emitted by the bridge contract.
pub const PROPOSAL_EVENT_SIGNATURE: &str = "ProposalEvent(uint8,uint64,uint8,bytes32)";

/// Topic0 of the proposal event filter.
pub fn proposal_event_topic() -> H256 {
    H256::from(keccak256(PROPOSAL_EVENT_SIGNATURE.as_bytes()))
}

/// A decoded `ProposalEvent(uint8 originDomainID, uint64 depositNonce,
/// uint8 status, bytes32 dataHash)` log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProposalEvent {
    pub origin_domain_id: u8,
    pub deposit_nonce: u64,
    pub status: u8,
    pub data_hash: H256,
}

impl ProposalEvent {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let tokens = abi::decode(
            &[
                ParamType::Uint(8),
                ParamType::Uint(64),
                ParamType::Uint(8),
                ParamType::FixedBytes(32),
            ],
            data,
        )?;
        match tokens.as_slice() {
            [Token::Uint(origin), Token::Uint(nonce), Token::Uint(status), Token::FixedBytes(hash)]
                if hash.len() == 32 =>
            {
                Ok(Self {
                    origin_domain_id: origin.low_u64() as u8,
                    deposit_nonce: nonce.low_u64(),
                    status: status.low_u64() as u8,
                    data_hash: H256::from_slice(hash),
                })
            }
            _ => Err(Error::Generic("malformed proposal event data")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matches_known_values() {
        // canonical ERC-20 selectors
        assert_eq!(selector("decimals()"), [0x31, 0x3c, 0xe5, 0x67]);
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
    }

    fn proposal() -> Proposal {
        Proposal {
            source: 1,
            deposit_nonce: 7,
            resource_id: ResourceId([0x03; 32]),
            data: vec![0xAA; 4].into(),
            handler_address: Address::repeat_byte(0x0A),
            bridge_address: Address::repeat_byte(0x0B),
            deposit_tx_hash: H256::zero(),
            deposit_block: 1,
        }
    }

    #[test]
    fn vote_calldata_layout() {
        let raw = vote_proposal_calldata(&proposal());
        // selector + 4 static words
        assert_eq!(raw.len(), 4 + 32 * 4);
        assert_eq!(&raw[..4], selector("voteProposal(uint8,uint64,bytes32,bytes32)"));
        // nonce occupies the second argument word
        assert_eq!(raw[4 + 63], 7);
    }

    #[test]
    fn execute_calldata_carries_the_data_blob() {
        let proposal = proposal();
        let raw = execute_proposal_calldata(&proposal);
        assert_eq!(&raw[..4], selector("executeProposal(uint8,uint64,bytes,bytes32)"));
        // dynamic `bytes` argument lands at the tail of the encoding
        assert!(raw.windows(4).any(|w| w == [0xAA; 4]));
    }

    #[test]
    fn proposal_event_round_trips() {
        let encoded = abi::encode(&[
            Token::Uint(1u8.into()),
            Token::Uint(9u64.into()),
            Token::Uint(2u8.into()),
            Token::FixedBytes(vec![0x0D; 32]),
        ]);
        let event = ProposalEvent::decode(&encoded).unwrap();
        assert_eq!(event.origin_domain_id, 1);
        assert_eq!(event.deposit_nonce, 9);
        assert_eq!(event.status, 2);
        assert_eq!(event.data_hash, H256::repeat_byte(0x0D));
    }
}
