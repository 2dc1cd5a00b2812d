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

use ethers::types::{Address, Bytes, H256};
use ethers::utils::keccak256;

use crate::error::{Error, Result};
use crate::message::{DomainId, Message, ResourceId};

/// The destination-chain representation of a pending deposit awaiting
/// relayer votes. Derived from a [`Message`] at voting time, after the
/// processor chain has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    /// Source domain where the deposit was initiated.
    pub source: DomainId,
    /// Nonce of the deposit on the source chain.
    pub deposit_nonce: u64,
    pub resource_id: ResourceId,
    /// The payload re-encoded into the blob the destination handler expects.
    pub data: Bytes,
    pub handler_address: Address,
    pub bridge_address: Address,
    /// Transaction hash of the deposit transaction.
    pub deposit_tx_hash: H256,
    /// Block the deposit transaction was included in.
    pub deposit_block: u64,
}

impl Proposal {
    pub fn from_message(msg: &Message, handler_address: Address, bridge_address: Address) -> Self {
        Self {
            source: msg.source,
            deposit_nonce: msg.deposit_nonce,
            resource_id: msg.resource_id,
            data: msg.payload.encode(),
            handler_address,
            bridge_address,
            deposit_tx_hash: msg.deposit_tx_hash,
            deposit_block: msg.deposit_block,
        }
    }

    /// The value committed on-chain by a vote:
    /// `keccak256(handlerAddress || data)`.
    pub fn data_hash(&self) -> H256 {
        let mut buf = Vec::with_capacity(20 + self.data.len());
        buf.extend_from_slice(self.handler_address.as_bytes());
        buf.extend_from_slice(&self.data);
        H256::from(keccak256(buf))
    }

    /// Local identity of the proposal, see [`proposal_id`].
    pub fn id(&self) -> H256 {
        proposal_id(self.source, self.deposit_nonce)
    }
}

/// Computes the local proposal identity:
/// `keccak256(source || depositNonce as 8 bytes big-endian)`.
///
/// Earlier bridge relayers derived this from the low byte of the nonce only,
/// which collides after 256 deposits per source. The id here covers the full
/// nonce width; the divergence is logged at chain startup so operators
/// comparing against legacy deployments can account for it.
pub fn proposal_id(source: DomainId, deposit_nonce: u64) -> H256 {
    let mut buf = [0u8; 9];
    buf[0] = source;
    buf[1..].copy_from_slice(&deposit_nonce.to_be_bytes());
    H256::from(keccak256(buf))
}

/// Lifecycle of a proposal on the destination bridge contract, as reported
/// by its `ProposalEvent` logs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProposalStatus {
    Inactive,
    Active,
    Passed,
    Executed,
    Cancelled,
}

impl TryFrom<u8> for ProposalStatus {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Inactive),
            1 => Ok(Self::Active),
            2 => Ok(Self::Passed),
            3 => Ok(Self::Executed),
            4 => Ok(Self::Cancelled),
            _ => Err(Error::Generic("unknown proposal status")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;
    use ethers::types::U256;

    fn message(nonce: u64) -> Message {
        Message {
            source: 1,
            destination: 2,
            resource_id: ResourceId([3u8; 32]),
            deposit_nonce: nonce,
            deposit_block: 742,
            deposit_tx_hash: H256::repeat_byte(0x11),
            payload: Payload::Fungible {
                amount: U256::from(14_555u64),
                recipient: vec![0xBB; 20].into(),
            },
        }
    }

    #[test]
    fn data_hash_commits_to_handler_and_data() {
        let msg = message(1);
        let handler_a = Address::repeat_byte(0x0A);
        let handler_b = Address::repeat_byte(0x0B);
        let bridge = Address::repeat_byte(0x0C);
        let a = Proposal::from_message(&msg, handler_a, bridge);
        let b = Proposal::from_message(&msg, handler_b, bridge);
        assert_ne!(a.data_hash(), b.data_hash());
        // same inputs, same hash
        assert_eq!(a.data_hash(), Proposal::from_message(&msg, handler_a, bridge).data_hash());
    }

    #[test]
    fn ids_cover_the_full_nonce_width() {
        // nonces 1 and 257 share their low byte; a truncated id would collide.
        assert_ne!(proposal_id(1, 1), proposal_id(1, 257));
        assert_ne!(proposal_id(1, 1), proposal_id(2, 1));
        assert_eq!(proposal_id(1, 42), proposal_id(1, 42));
    }

    #[test]
    fn status_round_trips_wire_values() {
        for (value, status) in [
            (0u8, ProposalStatus::Inactive),
            (1, ProposalStatus::Active),
            (2, ProposalStatus::Passed),
            (3, ProposalStatus::Executed),
            (4, ProposalStatus::Cancelled),
        ] {
            assert_eq!(ProposalStatus::try_from(value).unwrap(), status);
        }
        assert!(ProposalStatus::try_from(5).is_err());
    }
}
