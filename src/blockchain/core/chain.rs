use crate::codec::{
    hex_hash, put_slot, put_u32, text_bytes, Align, Reader, BLOCK_HEADER_SIZE, NETWORK_KEY_SIZE,
};
use crate::crypto::{sha256, Keypair, Sha256Hash};
use crate::error::{ChainError, Result};
use crate::miner::{self, Minable};
use crate::transaction::{decode_transactions, encode_transactions, now_timestamp, Transaction};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;

use super::state::block_delta;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Public key of the node that built the block, or the hex hash of the
    /// debit block for a mirrored credit.
    #[serde(with = "text_bytes")]
    pub origin: Vec<u8>,
    pub timestamp: u32,
    #[serde(with = "hex_hash")]
    pub prev_block: Sha256Hash,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(BLOCK_HEADER_SIZE);
        put_slot(&mut buf, &self.origin, NETWORK_KEY_SIZE, Align::Left)?;
        put_u32(&mut buf, self.timestamp);
        buf.extend_from_slice(&self.prev_block);
        put_u32(&mut buf, self.nonce);
        debug_assert_eq!(buf.len(), BLOCK_HEADER_SIZE);
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BLOCK_HEADER_SIZE {
            return Err(ChainError::MalformedInput(format!(
                "block header needs {} bytes, got {}",
                BLOCK_HEADER_SIZE,
                bytes.len()
            )));
        }
        Self::read(&mut Reader::new(bytes))
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            origin: reader.slot(NETWORK_KEY_SIZE, Align::Left)?,
            timestamp: reader.u32()?,
            prev_block: reader.hash()?,
            nonce: reader.u32()?,
        })
    }

    pub fn hash(&self) -> Result<Sha256Hash> {
        Ok(sha256(&self.encode()?))
    }
}

impl Minable for BlockHeader {
    fn nonce(&self) -> u32 {
        self.nonce
    }

    fn set_nonce(&mut self, nonce: u32) {
        self.nonce = nonce;
    }

    fn pow_hash(&self) -> Result<Sha256Hash> {
        self.hash()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    #[serde(with = "text_bytes")]
    pub signature: Vec<u8>,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(origin: Vec<u8>, prev_block: Sha256Hash, timestamp: u32) -> Self {
        Block {
            header: BlockHeader {
                origin,
                timestamp,
                prev_block,
                nonce: 0,
            },
            signature: Vec::new(),
            transactions: Vec::new(),
        }
    }

    /// The anchor every chain starts from.
    pub fn sentinel() -> Self {
        Self::new(Vec::new(), [0u8; 32], 0)
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Self::sentinel()
    }

    /// Inserts keeping transactions ordered by timestamp; equal timestamps
    /// keep arrival order.
    pub fn add_transaction(&mut self, tx: Transaction) {
        let position = self
            .transactions
            .iter()
            .position(|existing| existing.header.timestamp > tx.header.timestamp)
            .unwrap_or(self.transactions.len());
        self.transactions.insert(position, tx);
    }

    pub fn hash(&self) -> Result<Sha256Hash> {
        self.header.hash()
    }

    /// Net balance change this block applies to its chain.
    pub fn delta(&self) -> Result<i64> {
        block_delta(self)
    }

    pub fn mine(&mut self, prefix: &[u8], cancel: &AtomicBool) -> Result<u32> {
        miner::mine(&mut self.header, prefix, cancel)
    }

    pub fn sign(&mut self, keypair: &Keypair) -> Result<()> {
        self.signature = keypair.sign(&self.hash()?)?;
        Ok(())
    }

    /// Builds the credit block for the receiving chain.
    ///
    /// Every transaction is mirrored, `origin` carries the hex hash of this
    /// block, and nonce and signature are copied as they are. The result is
    /// linked to `prev_block` on the receiving chain and trusted because the
    /// debit was; it does not verify on its own.
    pub fn mirror(&self, prev_block: Sha256Hash, timestamp: u32) -> Result<Block> {
        let debit_hash = self.hash()?;
        let transactions = self
            .transactions
            .iter()
            .map(Transaction::mirrored)
            .collect::<Result<Vec<_>>>()?;
        Ok(Block {
            header: BlockHeader {
                origin: hex::encode(debit_hash).into_bytes(),
                timestamp,
                prev_block,
                nonce: self.header.nonce,
            },
            signature: self.signature.clone(),
            transactions,
        })
    }

    /// `header || signature slot || transactions`
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = self.header.encode()?;
        put_slot(&mut buf, &self.signature, NETWORK_KEY_SIZE, Align::Right)?;
        buf.extend_from_slice(&encode_transactions(&self.transactions)?);
        Ok(buf)
    }

    /// Decodes a whole block; every byte after the signature slot must belong
    /// to a transaction.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BLOCK_HEADER_SIZE + NETWORK_KEY_SIZE {
            return Err(ChainError::MalformedInput(format!(
                "block needs at least {} bytes, got {}",
                BLOCK_HEADER_SIZE + NETWORK_KEY_SIZE,
                bytes.len()
            )));
        }
        let mut reader = Reader::new(bytes);
        let header = BlockHeader::read(&mut reader)?;
        let signature = reader.slot(NETWORK_KEY_SIZE, Align::Right)?;
        let transactions = decode_transactions(reader.remaining())?;
        Ok(Block {
            header,
            signature,
            transactions,
        })
    }
}

/// One account's chain with its derived balance and head hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    #[serde(with = "text_bytes")]
    pub owner: Vec<u8>,
    pub blocks: Vec<Block>,
    pub balance: i64,
    #[serde(with = "hex_hash")]
    pub latest_hash: Sha256Hash,
}

// Every chain holds at least the sentinel.
#[allow(clippy::len_without_is_empty)]
impl Chain {
    /// A chain holding only the sentinel block.
    pub fn new(owner: Vec<u8>) -> Result<Self> {
        let sentinel = Block::sentinel();
        Ok(Chain {
            owner,
            latest_hash: sentinel.hash()?,
            blocks: vec![sentinel],
            balance: 0,
        })
    }

    /// Rebuilds a chain and its derived state from an ordered block list.
    /// A list that does not open with the sentinel gets one prepended. No
    /// verification happens here; see [`Chain::is_valid`].
    pub fn from_blocks(owner: Vec<u8>, blocks: Vec<Block>) -> Result<Self> {
        let mut chain = Chain::new(owner)?;
        let mut blocks = blocks.into_iter().peekable();
        if blocks.peek().is_some_and(Block::is_sentinel) {
            blocks.next();
        }
        for block in blocks {
            chain.append(block)?;
        }
        Ok(chain)
    }

    pub fn append(&mut self, block: Block) -> Result<()> {
        let balance = self.balance.checked_add(block.delta()?).ok_or_else(|| {
            ChainError::MalformedInput("block would overflow the account balance".to_string())
        })?;
        self.latest_hash = block.hash()?;
        self.balance = balance;
        self.blocks.push(block);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn head(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Timestamp for the next block: now, but never earlier than the head.
    pub fn next_timestamp(&self) -> u32 {
        let head = self.head().map_or(0, |block| block.header.timestamp);
        now_timestamp().max(head)
    }
}
