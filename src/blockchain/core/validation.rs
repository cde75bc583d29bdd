use crate::crypto::verify_signature;
use crate::error::{ChainError, Result};
use crate::miner::check_proof_of_work;

use super::chain::{Block, Chain};

/// Checks proof-of-work on the header hash and the signature by `origin`.
/// Transactions inside the block are not re-verified.
pub fn validate_block(block: &Block, pow_prefix: &[u8]) -> Result<()> {
    let hash = block.hash()?;
    if !check_proof_of_work(pow_prefix, &hash) {
        return Err(ChainError::VerificationFailed(format!(
            "block {} does not meet the proof-of-work prefix",
            hex::encode(hash)
        )));
    }
    verify_signature(&block.header.origin, &block.signature, &hash).map_err(|e| {
        ChainError::VerificationFailed(format!("block {}: {}", hex::encode(hash), e))
    })
}

pub fn verify_block(block: &Block, pow_prefix: &[u8]) -> bool {
    match validate_block(block, pow_prefix) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "block rejected");
            false
        }
    }
}

/// A sentinel first, then blocks that each pass [`verify_block`]. Links
/// between blocks are not checked.
pub fn verify_chain(blocks: &[Block], pow_prefix: &[u8]) -> bool {
    match blocks.split_first() {
        Some((first, rest)) if first.is_sentinel() => {
            rest.iter().all(|block| verify_block(block, pow_prefix))
        }
        _ => false,
    }
}

impl Chain {
    pub fn is_valid(&self, pow_prefix: &[u8]) -> bool {
        verify_chain(&self.blocks, pow_prefix)
    }
}
