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
//! # Deposit Listener
//!
//! The per-chain block scanner. It walks the chain in bounded batches,
//! staying a configured number of confirmations behind the head, decodes
//! every deposit log in the batch into a [`Message`], and checkpoints the
//! scanned height after each batch. Transient RPC failures never kill the
//! task; the scanner simply retries without advancing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::client::ChainClient;
use crate::handler::EventHandler;
use crate::message::{DomainId, Message};
use crate::store::BlockStore;

/// A single log filter request spans at most `BLOCK_BATCH_SPAN + 1` blocks.
const BLOCK_BATCH_SPAN: u64 = 99;

/// Static parameters of one chain's scanner.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub domain_id: DomainId,
    pub bridge_address: ethers::types::Address,
    /// Required depth below the chain head before a block is scanned.
    pub block_delay: u64,
    /// Sleep between retries when the head is unavailable or not yet deep
    /// enough.
    pub block_retry_interval: Duration,
}

/// Scans one chain for deposit events and emits them as canonical messages.
pub struct EvmListener<C, H> {
    client: Arc<C>,
    handler: H,
    config: ListenerConfig,
}

impl<C, H> EvmListener<C, H>
where
    C: ChainClient,
    H: EventHandler,
{
    pub fn new(client: Arc<C>, handler: H, config: ListenerConfig) -> Self {
        Self {
            client,
            handler,
            config,
        }
    }

    /// Runs the scan loop forever. Cancellation happens by dropping this
    /// future (the chain runner races it against the shutdown signal), or by
    /// closing the events channel, which makes the loop return cleanly.
    ///
    /// A `None` start block means "start at the current head".
    #[tracing::instrument(skip_all, fields(domain = %self.config.domain_id))]
    pub async fn listen<S: BlockStore>(
        &self,
        start_block: Option<u64>,
        store: S,
        events: mpsc::Sender<Message>,
    ) -> crate::error::Result<()> {
        let domain_id = self.config.domain_id;
        let mut start_block = start_block;
        loop {
            let head = match self.client.latest_block().await {
                Ok(head) => head,
                Err(e) => {
                    tracing::error!("Unable to get latest block: {}", e);
                    tokio::time::sleep(self.config.block_retry_interval).await;
                    continue;
                }
            };
            let start = *start_block.get_or_insert(head);

            // stay below the head until the batch has enough confirmations
            if head.saturating_sub(start) < self.config.block_delay {
                tokio::time::sleep(self.config.block_retry_interval).await;
                continue;
            }

            let confirmed_head = head - self.config.block_delay;
            let end = std::cmp::min(confirmed_head, start + BLOCK_BATCH_SPAN);

            let logs = match self
                .client
                .fetch_deposit_logs(self.config.bridge_address, start, end)
                .await
            {
                Ok(logs) => logs,
                Err(e) => {
                    // a failed filter query is either misconfiguration or a
                    // transient network problem; retry without advancing
                    tracing::error!(domain_id, "Unable to filter logs: {}", e);
                    continue;
                }
            };

            for log in logs {
                tracing::debug!(
                    "Deposit log found from sender: {:?} in block: {} with destinationDomainId: {}, resourceID: {}, depositNonce: {}",
                    log.sender_address,
                    log.deposit_block,
                    log.destination_domain_id,
                    log.resource_id,
                    log.deposit_nonce,
                );
                match self.handler.handle_deposit(domain_id, log).await {
                    Ok(message) => {
                        tracing::debug!("Resolved message {}", message);
                        if events.send(message).await.is_err() {
                            tracing::debug!("Events channel closed, stopping the listener");
                            return Ok(());
                        }
                    }
                    // a single bad log must not block its siblings
                    Err(e @ crate::error::Error::UnknownHandler { .. }) => {
                        tracing::warn!(domain_id, "Skipping deposit: {}", e)
                    }
                    Err(e) => tracing::error!(start, end, domain_id, "{}", e),
                }
            }

            if crossed_progress_boundary(start, end) {
                tracing::debug!(
                    block = (end / 20) * 20,
                    domain_id,
                    "Queried block for deposit events"
                );
            }

            // best effort: the next batch re-checkpoints anyway
            if let Err(e) = store.store_block(domain_id, end) {
                tracing::error!(block = end, "Failed to write latest block to blockstore: {}", e);
            }
            start_block = Some(end + 1);
        }
    }
}

/// Whether the batch `start..=end` stepped over a 20-block mark, which is
/// when scan progress is worth logging.
fn crossed_progress_boundary(start: u64, end: u64) -> bool {
    start % 20 == 0 || start / 20 != end / 20
}
