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
//! # Relayer
//!
//! Wires the per-chain pieces together: every chain's listener feeds one
//! shared outbound channel, a router task forwards each message into the
//! inbound channel of its destination chain, and one voter task per chain
//! drains that inbound channel serially. Per-source ordering survives the
//! whole path, and destination-side voting is serialized by construction.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::chain::EvmChain;
use crate::context::RelayerContext;
use crate::error::{Error, Result};
use crate::message::{DomainId, Message};
use crate::processor::MessageProcessor;

const CHANNEL_CAPACITY: usize = 100;

/// The set of chains this process serves, plus the processors every message
/// passes through before it is voted.
pub struct Relayer {
    chains: Vec<Arc<EvmChain>>,
    processors: Arc<Vec<Box<dyn MessageProcessor>>>,
}

impl Relayer {
    pub fn new(
        chains: Vec<Arc<EvmChain>>,
        processors: Vec<Box<dyn MessageProcessor>>,
    ) -> Result<Self> {
        ensure_unique_domains(&chains.iter().map(|c| c.domain_id()).collect::<Vec<_>>())?;
        Ok(Self {
            chains,
            processors: Arc::new(processors),
        })
    }

    /// Spawns every background task: one listener and one voter per chain,
    /// one proposal watcher per chain, and the shared router. Fatal errors
    /// land on `sys_err`; everything winds down on the context's shutdown
    /// broadcast.
    pub fn start(&self, ctx: &RelayerContext, sys_err: mpsc::Sender<Error>) {
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(CHANNEL_CAPACITY);
        let mut inbound: HashMap<DomainId, mpsc::Sender<Message>> = HashMap::new();

        for chain in &self.chains {
            // listener
            {
                let chain = chain.clone();
                let out_tx = out_tx.clone();
                let sys_err = sys_err.clone();
                let mut shutdown = ctx.shutdown_signal();
                tokio::spawn(async move {
                    tokio::select! {
                        result = chain.poll_events(out_tx) => {
                            if let Err(e) = result {
                                let _ = sys_err.send(e).await;
                            }
                        }
                        _ = shutdown.recv() => {}
                    }
                });
            }

            // proposal lifecycle watcher
            {
                let chain = chain.clone();
                let name = chain.name().to_string();
                let mut shutdown = ctx.shutdown_signal();
                tokio::spawn(async move {
                    tokio::select! {
                        result = chain.watch_proposals() => {
                            if let Err(e) = result {
                                tracing::error!(chain = %name, "Proposal watcher stopped: {}", e);
                            }
                        }
                        _ = shutdown.recv() => {}
                    }
                });
            }

            // voter: the single consumer of this chain's inbound channel,
            // so votes (and therefore nonces) issue in arrival order
            let (in_tx, mut in_rx) = mpsc::channel::<Message>(CHANNEL_CAPACITY);
            inbound.insert(chain.domain_id(), in_tx);
            {
                let chain = chain.clone();
                let processors = self.processors.clone();
                let mut shutdown = ctx.shutdown_signal();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = shutdown.recv() => return,
                            maybe = in_rx.recv() => {
                                let Some(mut message) = maybe else { return };
                                if let Err(e) = apply_processors(&processors, &mut message).await {
                                    tracing::error!(%message, "Dropping message: {}", e);
                                    continue;
                                }
                                if let Err(e) = chain.write(&message).await {
                                    tracing::error!(%message, "Failed to vote: {}", e);
                                }
                            }
                        }
                    }
                });
            }
        }
        drop(out_tx);

        // router
        let mut shutdown = ctx.shutdown_signal();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    maybe = out_rx.recv() => {
                        let Some(message) = maybe else { return };
                        route(message, &inbound).await;
                    }
                }
            }
        });
    }
}

/// Forwards a message into its destination chain's inbound channel.
/// Messages for unconfigured destinations are dropped with a warning.
async fn route(message: Message, inbound: &HashMap<DomainId, mpsc::Sender<Message>>) {
    match inbound.get(&message.destination) {
        Some(tx) => {
            if tx.send(message).await.is_err() {
                tracing::warn!("Destination chain stopped accepting messages");
            }
        }
        None => tracing::warn!(%message, "No chain configured for the destination domain"),
    }
}

async fn apply_processors(
    processors: &[Box<dyn MessageProcessor>],
    message: &mut Message,
) -> Result<()> {
    for processor in processors {
        processor.process(message).await?;
    }
    Ok(())
}

fn ensure_unique_domains(domains: &[DomainId]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for domain in domains {
        if !seen.insert(*domain) {
            return Err(Error::Generic("duplicate domain id in configuration"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Payload, ResourceId};
    use ethers::types::H256;

    fn message(destination: DomainId) -> Message {
        Message {
            source: 1,
            destination,
            resource_id: ResourceId([0x01; 32]),
            deposit_nonce: 1,
            deposit_block: 1,
            deposit_tx_hash: H256::zero(),
            payload: Payload::Generic {
                metadata: Default::default(),
            },
        }
    }

    #[tokio::test]
    async fn routes_by_destination_domain() {
        let (tx2, mut rx2) = mpsc::channel(4);
        let (tx3, mut rx3) = mpsc::channel(4);
        let inbound = HashMap::from([(2u8, tx2), (3u8, tx3)]);

        route(message(2), &inbound).await;
        route(message(3), &inbound).await;
        // unroutable: dropped, not delivered anywhere
        route(message(9), &inbound).await;

        assert_eq!(rx2.recv().await.unwrap().destination, 2);
        assert_eq!(rx3.recv().await.unwrap().destination, 3);
        assert!(rx2.try_recv().is_err());
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn duplicate_domains_are_rejected() {
        assert!(ensure_unique_domains(&[1, 2, 3]).is_ok());
        assert!(ensure_unique_domains(&[1, 2, 1]).is_err());
    }
}
