use crate::codec::{
    hex_bytes, hex_hash, put_i64, put_slot, put_u32, text_bytes, Align, Reader,
    NETWORK_KEY_SIZE, TRANSACTION_HEADER_SIZE,
};
use crate::crypto::{sha256, Keypair, Sha256Hash};
use crate::error::{ChainError, Result};
use crate::miner::{self, Minable};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;

/// Payload sizes must fit the header's `u32` length field.
pub fn payload_length(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        ChainError::MalformedInput(format!("payload of {} bytes is too large", len))
    })
}

/// Current UNIX time in seconds, as carried in headers.
pub fn now_timestamp() -> u32 {
    u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHeader {
    #[serde(with = "text_bytes")]
    pub from: Vec<u8>,
    #[serde(with = "text_bytes")]
    pub to: Vec<u8>,
    /// Signed delta applied to the balance of the chain this transaction lands on.
    pub amount: i64,
    pub timestamp: u32,
    #[serde(with = "hex_hash")]
    pub payload_hash: Sha256Hash,
    pub payload_length: u32,
    pub nonce: u32,
}

impl TransactionHeader {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(TRANSACTION_HEADER_SIZE);
        put_slot(&mut buf, &self.from, NETWORK_KEY_SIZE, Align::Left)?;
        put_slot(&mut buf, &self.to, NETWORK_KEY_SIZE, Align::Right)?;
        put_i64(&mut buf, self.amount);
        put_u32(&mut buf, self.timestamp);
        buf.extend_from_slice(&self.payload_hash);
        put_u32(&mut buf, self.payload_length);
        put_u32(&mut buf, self.nonce);
        debug_assert_eq!(buf.len(), TRANSACTION_HEADER_SIZE);
        Ok(buf)
    }

    /// Reads one header from the front of `bytes`; trailing bytes are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < TRANSACTION_HEADER_SIZE {
            return Err(ChainError::MalformedInput(format!(
                "transaction header needs {} bytes, got {}",
                TRANSACTION_HEADER_SIZE,
                bytes.len()
            )));
        }
        let mut reader = Reader::new(bytes);
        Self::read(&mut reader)
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            from: reader.slot(NETWORK_KEY_SIZE, Align::Left)?,
            to: reader.slot(NETWORK_KEY_SIZE, Align::Right)?,
            amount: reader.i64()?,
            timestamp: reader.u32()?,
            payload_hash: reader.hash()?,
            payload_length: reader.u32()?,
            nonce: reader.u32()?,
        })
    }

    pub fn hash(&self) -> Result<Sha256Hash> {
        Ok(sha256(&self.encode()?))
    }
}

impl Minable for TransactionHeader {
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
pub struct Transaction {
    pub header: TransactionHeader,
    #[serde(with = "text_bytes")]
    pub signature: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
}

impl Transaction {
    /// Builds an unsigned, unmined transaction stamped with the current time.
    pub fn new(from: Vec<u8>, to: Vec<u8>, amount: i64, payload: Vec<u8>) -> Result<Self> {
        let header = TransactionHeader {
            from,
            to,
            amount,
            timestamp: now_timestamp(),
            payload_hash: sha256(&payload),
            payload_length: payload_length(payload.len())?,
            nonce: 0,
        };
        Ok(Transaction {
            header,
            signature: Vec::new(),
            payload,
        })
    }

    /// A payment of `value` from `from` to `to`: the payer's chain moves by `-value`.
    pub fn payment(from: Vec<u8>, to: Vec<u8>, value: i64, payload: Vec<u8>) -> Result<Self> {
        let amount = value.checked_neg().ok_or_else(|| {
            ChainError::MalformedInput(format!("payment of {} cannot be debited", value))
        })?;
        Self::new(from, to, amount, payload)
    }

    pub fn hash(&self) -> Result<Sha256Hash> {
        self.header.hash()
    }

    /// Searches for a nonce meeting `prefix`. Must run before [`Transaction::sign`].
    pub fn mine(&mut self, prefix: &[u8], cancel: &AtomicBool) -> Result<u32> {
        miner::mine(&mut self.header, prefix, cancel)
    }

    pub fn sign(&mut self, keypair: &Keypair) -> Result<()> {
        self.signature = keypair.sign(&self.hash()?)?;
        Ok(())
    }

    /// The receiver-side leg: endpoints swapped, amount negated, everything
    /// else (signature included) carried over unchanged.
    pub fn mirrored(&self) -> Result<Self> {
        let amount = self.header.amount.checked_neg().ok_or_else(|| {
            ChainError::MalformedInput("amount cannot be negated".to_string())
        })?;
        let mut credit = self.clone();
        credit.header.from = self.header.to.clone();
        credit.header.to = self.header.from.clone();
        credit.header.amount = amount;
        Ok(credit)
    }

    /// `header || signature slot || payload`
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.payload.len() != self.header.payload_length as usize {
            return Err(ChainError::MalformedInput(format!(
                "payload is {} bytes but header declares {}",
                self.payload.len(),
                self.header.payload_length
            )));
        }
        let mut buf = self.header.encode()?;
        put_slot(&mut buf, &self.signature, NETWORK_KEY_SIZE, Align::Right)?;
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Decodes one transaction and returns it with the unread remainder.
    pub fn decode(bytes: &[u8]) -> Result<(Self, &[u8])> {
        if bytes.len() < TRANSACTION_HEADER_SIZE + NETWORK_KEY_SIZE {
            return Err(ChainError::MalformedInput(format!(
                "transaction needs at least {} bytes, got {}",
                TRANSACTION_HEADER_SIZE + NETWORK_KEY_SIZE,
                bytes.len()
            )));
        }
        let mut reader = Reader::new(bytes);
        let header = TransactionHeader::read(&mut reader)?;
        let signature = reader.slot(NETWORK_KEY_SIZE, Align::Right)?;
        let payload = reader.take(header.payload_length as usize)?.to_vec();
        let tx = Transaction {
            header,
            signature,
            payload,
        };
        Ok((tx, reader.remaining()))
    }
}

/// Concatenated wire form of a transaction sequence.
pub fn encode_transactions(transactions: &[Transaction]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for tx in transactions {
        buf.extend_from_slice(&tx.encode()?);
    }
    Ok(buf)
}

/// Decodes back-to-back transactions until the input is exhausted.
pub fn decode_transactions(mut bytes: &[u8]) -> Result<Vec<Transaction>> {
    let mut transactions = Vec::new();
    while !bytes.is_empty() {
        let (tx, rest) = Transaction::decode(bytes)?;
        transactions.push(tx);
        bytes = rest;
    }
    Ok(transactions)
}
