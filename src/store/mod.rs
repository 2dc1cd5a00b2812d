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
//! # Block Store Module
//!
//! A durable map from bridge domain to the last block the listener finished
//! scanning. A checkpoint for block `b` is only ever written after every
//! deposit in blocks `<= b` was emitted downstream, so a crash between
//! emission and checkpoint replays deposits rather than losing them; the
//! destination bridge deduplicates on `(source, depositNonce)`.

use crate::client::ChainClient;
use crate::error::Result;
use crate::message::DomainId;

/// A module for managing in-memory storage of checkpoints.
pub mod mem;
/// A module for setting up and managing a [Sled](https://sled.rs)-based database.
pub mod sled;

/// Durable per-domain scan checkpoints. Implementations serialize writes per
/// domain; checkpoints are monotonically non-decreasing in practice because
/// the single listener per domain is the only writer.
pub trait BlockStore: Send + Sync {
    /// Persists `block` as the last fully-scanned block for the domain.
    /// Atomic per key.
    fn store_block(&self, domain_id: DomainId, block: u64) -> Result<()>;

    /// The last persisted checkpoint for the domain, if any.
    fn last_block(&self, domain_id: DomainId) -> Result<Option<u64>>;
}

impl<S: BlockStore + ?Sized> BlockStore for std::sync::Arc<S> {
    fn store_block(&self, domain_id: DomainId, block: u64) -> Result<()> {
        S::store_block(self, domain_id, block)
    }

    fn last_block(&self, domain_id: DomainId) -> Result<Option<u64>> {
        S::last_block(self, domain_id)
    }
}

/// Decides where a chain's listener starts scanning.
///
/// - `fresh_start` ignores any persisted checkpoint and starts at the
///   configured block;
/// - `use_latest` starts at the current chain head;
/// - otherwise scanning resumes one past the persisted checkpoint, but never
///   before the configured start block.
pub async fn resolve_start_block<S, C>(
    store: &S,
    client: &C,
    domain_id: DomainId,
    configured_start: u64,
    use_latest: bool,
    fresh_start: bool,
) -> Result<u64>
where
    S: BlockStore + ?Sized,
    C: ChainClient + ?Sized,
{
    if fresh_start {
        return Ok(configured_start);
    }
    if use_latest {
        return client.latest_block().await;
    }
    match store.last_block(domain_id)? {
        Some(persisted) => Ok(std::cmp::max(persisted + 1, configured_start)),
        None => Ok(configured_start),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DepositLog;
    use crate::error::Result;
    use crate::store::mem::InMemoryBlockStore;
    use ethers::types::Address;

    struct FixedHead(u64);

    #[async_trait::async_trait]
    impl ChainClient for FixedHead {
        async fn latest_block(&self) -> Result<u64> {
            Ok(self.0)
        }

        async fn fetch_deposit_logs(
            &self,
            _bridge: Address,
            _from: u64,
            _to: u64,
        ) -> Result<Vec<DepositLog>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn fresh_start_ignores_the_checkpoint() {
        let store = InMemoryBlockStore::default();
        store.store_block(1, 900).unwrap();
        let start = resolve_start_block(&store, &FixedHead(1000), 1, 100, false, true)
            .await
            .unwrap();
        assert_eq!(start, 100);
    }

    #[tokio::test]
    async fn latest_flag_starts_at_the_chain_head() {
        let store = InMemoryBlockStore::default();
        store.store_block(1, 900).unwrap();
        let start = resolve_start_block(&store, &FixedHead(1000), 1, 100, true, false)
            .await
            .unwrap();
        assert_eq!(start, 1000);
    }

    #[tokio::test]
    async fn checkpoint_resumes_one_past_the_persisted_block() {
        let store = InMemoryBlockStore::default();
        store.store_block(1, 741).unwrap();
        let start = resolve_start_block(&store, &FixedHead(1000), 1, 100, false, false)
            .await
            .unwrap();
        assert_eq!(start, 742);
    }

    #[tokio::test]
    async fn configured_start_wins_over_an_older_checkpoint() {
        let store = InMemoryBlockStore::default();
        store.store_block(1, 50).unwrap();
        let start = resolve_start_block(&store, &FixedHead(1000), 1, 100, false, false)
            .await
            .unwrap();
        assert_eq!(start, 100);
    }

    #[tokio::test]
    async fn missing_checkpoint_falls_back_to_the_configured_start() {
        let store = InMemoryBlockStore::default();
        let start = resolve_start_block(&store, &FixedHead(1000), 1, 100, false, false)
            .await
            .unwrap();
        assert_eq!(start, 100);
    }
}
