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
//! # Trestle Relayer
//!
//! A cross-chain bridge relayer. Each configured EVM chain is scanned for
//! deposit events behind a confirmation delay; every deposit becomes a
//! canonical message, travels through the processing chain (decimal
//! re-scaling between heterogeneous token contracts, most importantly), and
//! is voted as a proposal on its destination chain's bridge contract. The
//! bridge contracts themselves hold the quorum logic; this process only
//! observes and votes.
//!
//! Scan progress is checkpointed per chain in a sled database, so a restart
//! resumes where the previous run stopped. The checkpoint is written after
//! messages are emitted, which makes delivery at-least-once; destination
//! bridges deduplicate on `(source, depositNonce)`.

#![deny(unsafe_code)]

/// The per-chain lifecycle: construction and the listener/voter pair.
pub mod chain;
/// RPC client for EVM chains.
pub mod client;
/// Configuration loading and validation.
pub mod config;
/// Shared relayer context and shutdown signalling.
pub mod context;
/// Call encoders for the bridge, handler and token contracts.
pub mod contracts;
/// Error types of the relayer.
pub mod error;
/// Gas pricing policy for both gas markets.
pub mod gas;
/// Handler registry and deposit decoding.
pub mod handler;
/// The per-chain deposit scanner.
pub mod listener;
/// Canonical bridge messages.
pub mod message;
/// The in-transit message processing chain.
pub mod processor;
/// Proposals and their on-chain lifecycle.
pub mod proposal;
/// Cross-chain wiring: router and task supervision.
pub mod relayer;
/// Transaction signing and nonce discipline.
pub mod signer;
/// Durable scan checkpoints.
pub mod store;
/// Proposal voting on destination chains.
pub mod voter;
