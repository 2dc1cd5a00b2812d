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
//! # Proposal Voter
//!
//! Consumes messages destined for this chain and casts the matching votes
//! on the bridge contract. Voting is idempotent on-chain, so the plain
//! voter can simply fire and rely on the contract; the subscription voter
//! additionally follows `ProposalEvent` logs to skip proposals that already
//! executed and to trigger execution once a proposal passes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Filter, H256};
use futures::TryFutureExt;
use parking_lot::RwLock;

use crate::client::{ChainClient, EvmClient};
use crate::contracts::{proposal_event_topic, BridgeContract, ProposalEvent};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::proposal::{proposal_id, Proposal, ProposalStatus};
use crate::signer::TxSigner;

const MAX_SUBMIT_ATTEMPTS: usize = 5;
const SUBMIT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// How a vote submission ended, from the node's point of view.
enum SubmitOutcome {
    /// The contract reports this relayer already voted; success.
    AlreadyVoted,
    /// Reverted for any other reason; the message is dropped.
    Reverted(String),
    /// The transaction never reached the chain; worth retrying.
    Transport(Error),
    /// Pricing the transaction is impossible under the configured ceiling.
    Unpriceable(Error),
}

fn classify_submit_error(error: Error) -> SubmitOutcome {
    if matches!(error, Error::GasPolicy { .. }) {
        return SubmitOutcome::Unpriceable(error);
    }
    let text = error.to_string().to_lowercase();
    if text.contains("already voted") {
        SubmitOutcome::AlreadyVoted
    } else if text.contains("revert") {
        SubmitOutcome::Reverted(error.to_string())
    } else {
        SubmitOutcome::Transport(error)
    }
}

/// Shared proposal state between a voter and its event watcher.
///
/// Votes this relayer cast are remembered until the proposal executes, so
/// the watcher can submit the execution call once quorum is reached.
#[derive(Default)]
pub struct ProposalTracker {
    executed: RwLock<HashSet<H256>>,
    voted: RwLock<HashMap<H256, Proposal>>,
}

impl ProposalTracker {
    pub fn is_executed(&self, id: H256) -> bool {
        self.executed.read().contains(&id)
    }

    pub fn mark_voted(&self, proposal: Proposal) {
        self.voted.write().insert(proposal.id(), proposal);
    }

    pub fn voted_proposal(&self, id: H256) -> Option<Proposal> {
        self.voted.read().get(&id).cloned()
    }

    pub fn mark_executed(&self, id: H256) {
        self.executed.write().insert(id);
        self.voted.write().remove(&id);
    }
}

/// Casts votes for one destination chain. All submissions are serialized
/// through the chain's single [`TxSigner`].
pub struct EvmVoter {
    client: Arc<EvmClient>,
    bridge: BridgeContract,
    signer: Arc<TxSigner>,
    tracker: Option<Arc<ProposalTracker>>,
}

impl EvmVoter {
    /// A plain polling voter: fire the vote and rely on the bridge contract
    /// being idempotent.
    pub fn new(client: Arc<EvmClient>, bridge: BridgeContract, signer: Arc<TxSigner>) -> Self {
        Self {
            client,
            bridge,
            signer,
            tracker: None,
        }
    }

    /// A voter paired with a [`ProposalEventWatcher`]; the watcher must be
    /// running for executed-proposal short-circuiting and execution to work.
    pub fn with_subscription(
        client: Arc<EvmClient>,
        bridge: BridgeContract,
        signer: Arc<TxSigner>,
        tracker: Arc<ProposalTracker>,
    ) -> Self {
        Self {
            client,
            bridge,
            signer,
            tracker: Some(tracker),
        }
    }

    /// Builds the proposal for a message and votes for it.
    #[tracing::instrument(skip_all, fields(msg = %message))]
    pub async fn vote(&self, message: &Message) -> Result<()> {
        let handler_address = self
            .bridge
            .resource_id_to_handler_address(message.resource_id)
            .await?;
        let proposal = Proposal::from_message(message, handler_address, self.bridge.address());

        if let Some(tracker) = &self.tracker {
            if tracker.is_executed(proposal.id()) {
                tracing::debug!("Proposal already executed, skipping the vote");
                return Ok(());
            }
        }

        let calldata = self.bridge.vote_proposal_calldata(&proposal);
        for attempt in 1..=MAX_SUBMIT_ATTEMPTS {
            match self
                .signer
                .send(&self.client, self.bridge.address(), calldata.clone())
                .await
            {
                Ok(tx_hash) => {
                    tracing::info!(
                        %tx_hash,
                        data_hash = %proposal.data_hash(),
                        "Voted proposal"
                    );
                    if let Some(tracker) = &self.tracker {
                        tracker.mark_voted(proposal);
                    }
                    return Ok(());
                }
                Err(e) => match classify_submit_error(e) {
                    SubmitOutcome::AlreadyVoted => {
                        tracing::debug!("Proposal already voted by this relayer");
                        return Ok(());
                    }
                    SubmitOutcome::Reverted(reason) => {
                        return Err(Error::VoteRejected { reason });
                    }
                    SubmitOutcome::Unpriceable(e) => return Err(e),
                    SubmitOutcome::Transport(e) => {
                        tracing::warn!(attempt, "Vote submission failed: {}", e);
                        tokio::time::sleep(SUBMIT_RETRY_INTERVAL).await;
                    }
                },
            }
        }
        Err(Error::Generic(
            "vote dropped after repeated transport failures",
        ))
    }
}

/// Follows the bridge's `ProposalEvent` logs. Over plain HTTP endpoints a
/// polling filter is the subscription; the watcher keeps its own cursor and
/// never checkpoints it, since missing an event only costs a redundant
/// (contract-gated) vote or execution.
pub struct ProposalEventWatcher {
    client: Arc<EvmClient>,
    bridge: BridgeContract,
    signer: Arc<TxSigner>,
    tracker: Arc<ProposalTracker>,
    poll_interval: Duration,
}

impl ProposalEventWatcher {
    pub fn new(
        client: Arc<EvmClient>,
        bridge: BridgeContract,
        signer: Arc<TxSigner>,
        tracker: Arc<ProposalTracker>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            bridge,
            signer,
            tracker,
            poll_interval,
        }
    }

    /// Runs until dropped; restarts itself on provider errors.
    #[tracing::instrument(skip_all, fields(bridge = ?self.bridge.address()))]
    pub async fn run(&self) -> Result<()> {
        let backoff = backoff::ExponentialBackoff {
            max_elapsed_time: None,
            ..Default::default()
        };
        let task = || async {
            let mut cursor = self
                .client
                .latest_block()
                .map_err(backoff::Error::transient)
                .await?;
            loop {
                tokio::time::sleep(self.poll_interval).await;
                let head = self
                    .client
                    .latest_block()
                    .map_err(backoff::Error::transient)
                    .await?;
                if head <= cursor {
                    continue;
                }
                let filter = Filter::new()
                    .address(self.bridge.address())
                    .topic0(proposal_event_topic())
                    .from_block(cursor + 1)
                    .to_block(head);
                let logs = self
                    .client
                    .get_logs(&filter)
                    .map_err(backoff::Error::transient)
                    .await?;
                for log in logs {
                    match ProposalEvent::decode(&log.data) {
                        Ok(event) => self.handle_event(event).await,
                        Err(e) => tracing::warn!("Skipping undecodable proposal event: {}", e),
                    }
                }
                cursor = head;
            }
        };
        backoff::future::retry(backoff, task).await
    }

    async fn handle_event(&self, event: ProposalEvent) {
        let status = match ProposalStatus::try_from(event.status) {
            Ok(status) => status,
            Err(_) => {
                tracing::warn!(status = event.status, "Proposal event with unknown status");
                return;
            }
        };
        let id = proposal_id(event.origin_domain_id, event.deposit_nonce);
        match status {
            ProposalStatus::Executed | ProposalStatus::Cancelled => {
                tracing::debug!(
                    origin = event.origin_domain_id,
                    nonce = event.deposit_nonce,
                    ?status,
                    "Proposal reached a terminal status"
                );
                self.tracker.mark_executed(id);
            }
            ProposalStatus::Passed => {
                let Some(proposal) = self.tracker.voted_proposal(id) else {
                    // passed without our vote on record; another relayer's
                    // execution will carry it over the line
                    return;
                };
                tracing::info!(
                    origin = event.origin_domain_id,
                    nonce = event.deposit_nonce,
                    "Proposal passed, submitting execution"
                );
                let calldata = self.bridge.execute_proposal_calldata(&proposal);
                match self
                    .signer
                    .send(&self.client, self.bridge.address(), calldata)
                    .await
                {
                    // execution is gated on-chain, a duplicate simply reverts
                    Ok(tx_hash) => tracing::info!(%tx_hash, "Executed proposal"),
                    Err(e) => tracing::warn!("Proposal execution failed: {}", e),
                }
            }
            ProposalStatus::Inactive | ProposalStatus::Active => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ResourceId;
    use ethers::types::Address;

    fn proposal(nonce: u64) -> Proposal {
        Proposal {
            source: 1,
            deposit_nonce: nonce,
            resource_id: ResourceId([0x03; 32]),
            data: vec![0xAA; 4].into(),
            handler_address: Address::repeat_byte(0x0A),
            bridge_address: Address::repeat_byte(0x0B),
            deposit_tx_hash: H256::zero(),
            deposit_block: 1,
        }
    }

    #[test]
    fn already_voted_reverts_count_as_success() {
        let outcome = classify_submit_error(Error::VoteRejected {
            reason: "execution reverted: relayer already voted".into(),
        });
        assert!(matches!(outcome, SubmitOutcome::AlreadyVoted));
    }

    #[test]
    fn other_reverts_drop_the_message() {
        let outcome = classify_submit_error(Error::VoteRejected {
            reason: "execution reverted: resource ID not mapped".into(),
        });
        assert!(matches!(outcome, SubmitOutcome::Reverted(_)));
    }

    #[test]
    fn transport_errors_are_retryable() {
        let outcome = classify_submit_error(Error::Generic("connection reset by peer"));
        assert!(matches!(outcome, SubmitOutcome::Transport(_)));
    }

    #[test]
    fn gas_policy_errors_abort_without_retry() {
        let outcome = classify_submit_error(Error::GasPolicy {
            max_fee: 1.into(),
            tip: 2.into(),
            max_gas_price: 1.into(),
        });
        assert!(matches!(outcome, SubmitOutcome::Unpriceable(_)));
    }

    #[test]
    fn tracker_retires_proposals_on_execution() {
        let tracker = ProposalTracker::default();
        let p = proposal(7);
        let id = p.id();
        tracker.mark_voted(p);
        assert!(tracker.voted_proposal(id).is_some());
        assert!(!tracker.is_executed(id));

        tracker.mark_executed(id);
        assert!(tracker.is_executed(id));
        assert!(tracker.voted_proposal(id).is_none());
    }
}
