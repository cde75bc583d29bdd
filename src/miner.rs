//! Proof-of-work: prefix checks and nonce search.
//!
//! A hash satisfies a prefix when its first `prefix.len()` bytes equal the
//! prefix byte for byte. The prefixes are all-zero in practice, but this is a
//! byte comparison, not a leading-zero-bit count.

use crate::crypto::Sha256Hash;
use crate::error::{ChainError, Result};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};

/// Byte that fills every proof-of-work prefix.
pub const POW_PREFIX_BYTE: u8 = 0;

pub const TRANSACTION_POW_COMPLEXITY: usize = 1;
pub const BLOCK_POW_COMPLEXITY: usize = 2;

/// Which kind of header a prefix applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Transaction,
    Block,
}

/// Per-kind difficulty, in prefix bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PowConfig {
    #[serde(default = "default_transaction_difficulty")]
    pub transaction_difficulty: usize,
    #[serde(default = "default_block_difficulty")]
    pub block_difficulty: usize,
}

fn default_transaction_difficulty() -> usize {
    TRANSACTION_POW_COMPLEXITY
}

fn default_block_difficulty() -> usize {
    BLOCK_POW_COMPLEXITY
}

impl Default for PowConfig {
    fn default() -> Self {
        Self {
            transaction_difficulty: TRANSACTION_POW_COMPLEXITY,
            block_difficulty: BLOCK_POW_COMPLEXITY,
        }
    }
}

impl PowConfig {
    /// No work at all; every hash passes.
    pub fn trivial() -> Self {
        Self {
            transaction_difficulty: 0,
            block_difficulty: 0,
        }
    }

    pub fn difficulty(&self, kind: MessageKind) -> usize {
        match kind {
            MessageKind::Transaction => self.transaction_difficulty,
            MessageKind::Block => self.block_difficulty,
        }
    }

    pub fn prefix(&self, kind: MessageKind) -> Vec<u8> {
        vec![POW_PREFIX_BYTE; self.difficulty(kind)]
    }
}

/// True iff `hash` starts with `prefix`. An empty prefix always passes; a
/// prefix longer than the hash never does.
pub fn check_proof_of_work(prefix: &[u8], hash: &[u8]) -> bool {
    hash.len() >= prefix.len() && hash[..prefix.len()] == *prefix
}

/// A header whose hash depends on a mutable nonce.
pub trait Minable {
    fn nonce(&self) -> u32;
    fn set_nonce(&mut self, nonce: u32);
    fn pow_hash(&self) -> Result<Sha256Hash>;
}

/// Linear nonce search starting at the header's current nonce.
///
/// Runs on the calling thread until the prefix is met, `cancel` is raised, or
/// the `u32` nonce space is exhausted. On success the header keeps the winning
/// nonce and it is returned.
pub fn mine<H: Minable>(header: &mut H, prefix: &[u8], cancel: &AtomicBool) -> Result<u32> {
    loop {
        if check_proof_of_work(prefix, &header.pow_hash()?) {
            return Ok(header.nonce());
        }
        if cancel.load(Ordering::Relaxed) {
            return Err(ChainError::MiningCancelled);
        }
        let next = header
            .nonce()
            .checked_add(1)
            .ok_or(ChainError::NonceExhausted)?;
        header.set_nonce(next);
    }
}
