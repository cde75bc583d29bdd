use crate::codec::hex_hash;
use crate::crypto::Sha256Hash;
use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};

use super::chain::{Block, Chain};

/// Persisted summary of an account: a cache of what the block log implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub balance: i64,
    #[serde(with = "hex_hash")]
    pub latest_hash: Sha256Hash,
}

impl AccountRecord {
    pub fn from_chain(chain: &Chain) -> Self {
        AccountRecord {
            balance: chain.balance,
            latest_hash: chain.latest_hash,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Sum of the transaction amounts in `block`.
pub fn block_delta(block: &Block) -> Result<i64> {
    block
        .transactions
        .iter()
        .try_fold(0i64, |sum, tx| sum.checked_add(tx.header.amount))
        .ok_or_else(|| ChainError::MalformedInput("block amounts overflow".to_string()))
}
