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
//! # Bridge Messages
//!
//! The canonical in-flight record of a deposit. A [`Message`] is produced by
//! the listener from a raw deposit log, may be rewritten by message
//! processors while in transit, and is consumed by the voter on the
//! destination chain.

use ethers::types::{Bytes, H256, U256};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One-byte chain identifier, unique within a bridge deployment.
pub type DomainId = u8;

/// Opaque 32-byte identifier addressing a logical asset route across chains.
///
/// Assigned by the bridge contract and immutable afterwards. Serializes as
/// a `0x`-prefixed hex string, the form resource ids appear in everywhere
/// else (configuration files, explorers, bridge admin tooling).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ResourceId(pub [u8; 32]);

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for ResourceId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct ResourceIdVisitor;
        impl serde::de::Visitor<'_> for ResourceIdVisitor {
            type Value = ResourceId;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a 0x-prefixed 32-byte hex string")
            }

            fn visit_str<E>(self, value: &str) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let raw = value.strip_prefix("0x").unwrap_or(value);
                let bytes = hex::decode(raw).map_err(E::custom)?;
                let bytes: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| E::custom("expected exactly 32 bytes"))?;
                Ok(ResourceId(bytes))
            }
        }
        deserializer.deserialize_str(ResourceIdVisitor)
    }
}

impl std::fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResourceId(0x{})", hex::encode(self.0))
    }
}

impl From<[u8; 32]> for ResourceId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl From<H256> for ResourceId {
    fn from(hash: H256) -> Self {
        Self(hash.to_fixed_bytes())
    }
}

/// The kind of cross-chain transfer a message carries.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferKind {
    FungibleTransfer,
    NonFungibleTransfer,
    Generic,
}

impl std::fmt::Display for TransferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FungibleTransfer => write!(f, "FungibleTransfer"),
            Self::NonFungibleTransfer => write!(f, "NonFungibleTransfer"),
            Self::Generic => write!(f, "GenericTransfer"),
        }
    }
}

/// The typed payload of a message, one variant per transfer kind.
///
/// Each variant round-trips with the deposit `data` blob the handler
/// contracts emit and consume. Fields are mutated in place by message
/// processors (the amount of a fungible transfer in particular), so
/// [`Payload::encode`] must be called only after the processor chain ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// An ERC-20 style transfer: an amount and the recipient on the
    /// destination chain.
    Fungible { amount: U256, recipient: Bytes },
    /// An ERC-721 style transfer: a token id, the recipient, and the token
    /// metadata blob.
    NonFungible {
        token_id: U256,
        recipient: Bytes,
        metadata: Bytes,
    },
    /// An arbitrary call payload for generic handlers.
    Generic { metadata: Bytes },
}

impl Payload {
    pub fn kind(&self) -> TransferKind {
        match self {
            Self::Fungible { .. } => TransferKind::FungibleTransfer,
            Self::NonFungible { .. } => TransferKind::NonFungibleTransfer,
            Self::Generic { .. } => TransferKind::Generic,
        }
    }

    /// Decodes a fungible deposit blob:
    /// `amount (32 bytes BE) || recipient length (32 bytes BE) || recipient`.
    pub fn decode_fungible(data: &[u8]) -> Result<Self> {
        let amount = read_word(data, 0, "amount")?;
        let recipient = read_bytes(data, 32, "recipient")?;
        Ok(Self::Fungible {
            amount,
            recipient: recipient.into(),
        })
    }

    /// Decodes a non-fungible deposit blob:
    /// `tokenID (32) || recipient length (32) || recipient || metadata length (32) || metadata`.
    pub fn decode_non_fungible(data: &[u8]) -> Result<Self> {
        let token_id = read_word(data, 0, "tokenID")?;
        let recipient = read_bytes(data, 32, "recipient")?;
        let metadata_offset = 64 + recipient.len();
        let metadata = read_bytes(data, metadata_offset, "metadata")?;
        Ok(Self::NonFungible {
            token_id,
            recipient: recipient.into(),
            metadata: metadata.into(),
        })
    }

    /// Decodes a generic deposit blob: `metadata length (32) || metadata`.
    pub fn decode_generic(data: &[u8]) -> Result<Self> {
        let metadata = read_bytes(data, 0, "metadata")?;
        Ok(Self::Generic {
            metadata: metadata.into(),
        })
    }

    /// Re-encodes the payload into the deposit `data` blob the destination
    /// handler expects. This is the inverse of the `decode_*` constructors.
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::new();
        match self {
            Self::Fungible { amount, recipient } => {
                out.extend_from_slice(&word(*amount));
                out.extend_from_slice(&word(U256::from(recipient.len())));
                out.extend_from_slice(recipient);
            }
            Self::NonFungible {
                token_id,
                recipient,
                metadata,
            } => {
                out.extend_from_slice(&word(*token_id));
                out.extend_from_slice(&word(U256::from(recipient.len())));
                out.extend_from_slice(recipient);
                out.extend_from_slice(&word(U256::from(metadata.len())));
                out.extend_from_slice(metadata);
            }
            Self::Generic { metadata } => {
                out.extend_from_slice(&word(U256::from(metadata.len())));
                out.extend_from_slice(metadata);
            }
        }
        out.into()
    }
}

fn word(value: U256) -> [u8; 32] {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    buf
}

fn read_word(data: &[u8], offset: usize, field: &str) -> Result<U256> {
    let end = offset
        .checked_add(32)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| Error::InvalidDepositLog {
            reason: format!("deposit data too short for {field} at offset {offset}"),
        })?;
    Ok(U256::from_big_endian(&data[offset..end]))
}

/// Reads a `length (32 bytes BE) || bytes` pair starting at `offset`.
fn read_bytes(data: &[u8], offset: usize, field: &str) -> Result<Vec<u8>> {
    let len = read_word(data, offset, field)?;
    if len > U256::from(usize::MAX) {
        return Err(Error::InvalidDepositLog {
            reason: format!("{field} length does not fit in memory"),
        });
    }
    let len = len.as_usize();
    let start = offset + 32;
    let end = start
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| Error::InvalidDepositLog {
            reason: format!(
                "{field} length {len} exceeds the {} remaining bytes",
                data.len().saturating_sub(start)
            ),
        })?;
    Ok(data[start..end].to_vec())
}

/// The canonical in-flight record of a single deposit.
///
/// `(source, deposit_nonce)` uniquely identifies a message forever; the
/// destination bridge contract relies on that pair for replay protection, so
/// re-emitting a message after a crash is harmless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub source: DomainId,
    pub destination: DomainId,
    pub resource_id: ResourceId,
    pub deposit_nonce: u64,
    pub deposit_block: u64,
    pub deposit_tx_hash: H256,
    pub payload: Payload,
}

impl Message {
    pub fn kind(&self) -> TransferKind {
        self.payload.kind()
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}(source={}, destination={}, nonce={}, resourceID={})",
            self.kind(),
            self.source,
            self.destination,
            self.deposit_nonce,
            self.resource_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> Bytes {
        Bytes::from(vec![0xAAu8; 20])
    }

    #[test]
    fn fungible_payload_round_trips() {
        let payload = Payload::Fungible {
            amount: U256::from(145_556u64),
            recipient: recipient(),
        };
        let encoded = payload.encode();
        assert_eq!(encoded.len(), 32 + 32 + 20);
        let decoded = Payload::decode_fungible(&encoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn non_fungible_payload_round_trips() {
        let payload = Payload::NonFungible {
            token_id: U256::from(7u64),
            recipient: recipient(),
            metadata: Bytes::from(b"ipfs://QmToken".to_vec()),
        };
        let decoded = Payload::decode_non_fungible(&payload.encode()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn generic_payload_round_trips_empty_metadata() {
        let payload = Payload::Generic {
            metadata: Bytes::default(),
        };
        let encoded = payload.encode();
        assert_eq!(encoded.len(), 32);
        let decoded = Payload::decode_generic(&encoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let err = Payload::decode_fungible(&[0u8; 40]).unwrap_err();
        assert!(matches!(err, Error::InvalidDepositLog { .. }));
    }

    #[test]
    fn overlong_recipient_length_is_rejected() {
        let mut data = vec![0u8; 64];
        // recipient length claims 4096 bytes but none follow.
        data[63] = 0x10;
        data[62] = 0x10;
        let err = Payload::decode_fungible(&data).unwrap_err();
        assert!(matches!(err, Error::InvalidDepositLog { .. }));
    }

    #[test]
    fn resource_id_serde_uses_hex_strings() {
        let rid = ResourceId([0x03; 32]);
        let json = serde_json::to_string(&rid).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "03".repeat(32)));
        let back: ResourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rid);
        // wrong width fails
        assert!(serde_json::from_str::<ResourceId>("\"0x0303\"").is_err());
    }
}
