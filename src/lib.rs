//! ledgerline - a per-account proof-of-work ledger node
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Blocks, per-account chains and block verification
//! - [`transaction`] - Transaction types and verification
//! - [`ledger`] - Transfer and mining protocols under per-account locks
//!
//! ## Encoding & Cryptography
//! - [`codec`] - Fixed-layout binary headers
//! - [`crypto`] - Hashing, signatures and verification (secp256k1)
//!
//! ## Consensus
//! - [`miner`] - Proof-of-work checks and nonce search
//! - [`sync`] - Peer set and longest-valid-chain reconciliation
//!
//! ## State Management
//! - [`persistence`] - Key-value storage (SQLite, in-memory) and chain layout
//!
//! ## Networking & Integration
//! - [`network`] - HTTP chain fetches and UDP block propagation
//! - [`node`] - Async node tying ledger, peers and transport together
//! - [`api`] - HTTP API (feature `api`)
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod ledger;
pub mod transaction;

// ============================================================================
// Encoding & Cryptography
// ============================================================================
pub mod codec;
pub mod crypto;

// ============================================================================
// Consensus & Mining
// ============================================================================
pub mod miner;
pub mod sync;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;

// ============================================================================
// Networking
// ============================================================================
pub mod network;
pub mod node;

// ============================================================================
// Integration
// ============================================================================
#[cfg(feature = "api")]
pub mod api;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
