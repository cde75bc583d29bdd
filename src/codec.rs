//! Fixed-layout binary framing shared by transaction and block headers.
//!
//! Every header field lives in a slot of fixed width so that hashing and wire
//! transmission are unambiguous. Integers are little-endian. Variable-length
//! key material (public keys, signatures) is zero-padded into a
//! [`NETWORK_KEY_SIZE`] slot on encode and zero-stripped on decode, which makes
//! a key that is itself all zero bytes indistinguishable from padding.

use crate::error::{ChainError, Result};

/// Width of every key or signature slot on the wire.
pub const NETWORK_KEY_SIZE: usize = 128;

/// Width of a SHA-256 digest slot.
pub const HASH_SIZE: usize = 32;

/// from + to + amount + timestamp + payload hash + payload length + nonce
pub const TRANSACTION_HEADER_SIZE: usize =
    NETWORK_KEY_SIZE + NETWORK_KEY_SIZE + 8 + 4 + HASH_SIZE + 4 + 4;

/// origin + timestamp + previous block hash + nonce
pub const BLOCK_HEADER_SIZE: usize = NETWORK_KEY_SIZE + 4 + HASH_SIZE + 4;

/// Where a short value sits inside its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    /// Value first, zero padding after it. Used by the leading field of a header.
    Left,
    /// Zero padding first, value after it.
    Right,
}

/// Appends `value` to `buf` framed into a slot of exactly `width` bytes.
///
/// A value longer than the slot is an encoding error; it is never truncated.
pub fn put_slot(buf: &mut Vec<u8>, value: &[u8], width: usize, align: Align) -> Result<()> {
    if value.len() > width {
        return Err(ChainError::MalformedInput(format!(
            "field of {} bytes does not fit a {}-byte slot",
            value.len(),
            width
        )));
    }
    let padding = width - value.len();
    match align {
        Align::Left => {
            buf.extend_from_slice(value);
            buf.resize(buf.len() + padding, 0);
        }
        Align::Right => {
            buf.resize(buf.len() + padding, 0);
            buf.extend_from_slice(value);
        }
    }
    Ok(())
}

/// Removes the zero padding that [`put_slot`] added.
pub fn strip_slot(slot: &[u8], align: Align) -> Vec<u8> {
    match align {
        Align::Left => {
            let end = slot.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
            slot[..end].to_vec()
        }
        Align::Right => {
            let start = slot.iter().position(|b| *b != 0).unwrap_or(slot.len());
            slot[start..].to_vec()
        }
    }
}

pub fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn put_i64(buf: &mut Vec<u8>, value: i64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Forward-only cursor over an input buffer. Every read fails with
/// [`ChainError::MalformedInput`] instead of returning short data.
#[derive(Debug)]
pub struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.data.len() < len {
            return Err(ChainError::MalformedInput(format!(
                "needed {} bytes, {} available",
                len,
                self.data.len()
            )));
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    pub fn u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    pub fn i64(&mut self) -> Result<i64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(raw))
    }

    pub fn hash(&mut self) -> Result<[u8; HASH_SIZE]> {
        let mut raw = [0u8; HASH_SIZE];
        raw.copy_from_slice(self.take(HASH_SIZE)?);
        Ok(raw)
    }

    pub fn slot(&mut self, width: usize, align: Align) -> Result<Vec<u8>> {
        Ok(strip_slot(self.take(width)?, align))
    }

    pub fn remaining(&self) -> &'a [u8] {
        self.data
    }
}

/// Serde adapter for key and signature fields: the bytes are the textual
/// encoding of the key, so they are carried as a JSON string.
pub mod text_bytes {
    use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let text = std::str::from_utf8(value)
            .map_err(|_| S::Error::custom("key material is not textual"))?;
        serializer.serialize_str(text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        if text.as_bytes().contains(&0) {
            return Err(D::Error::custom("key material must not contain NUL bytes"));
        }
        Ok(text.into_bytes())
    }
}

/// Serde adapter carrying arbitrary bytes as a hex string.
pub mod hex_bytes {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(D::Error::custom)
    }
}

/// Serde adapter carrying a 32-byte digest as a hex string.
pub mod hex_hash {
    use super::HASH_SIZE;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8; HASH_SIZE], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[u8; HASH_SIZE], D::Error> {
        let text = String::deserialize(deserializer)?;
        let mut out = [0u8; HASH_SIZE];
        hex::decode_to_slice(text, &mut out).map_err(D::Error::custom)?;
        Ok(out)
    }
}
