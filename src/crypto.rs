//! Cryptographic primitives for ledgerline
//!
//! Keys and signatures leave this module as lowercase hex text. A public key is
//! the two 32-byte curve coordinates `X || Y`; a private key is the 32-byte
//! scalar; a signature is the two 32-byte ECDSA scalars `r || s`. Text never
//! contains a zero byte, so it survives the codec's zero-stripping intact.

use crate::error::ChainError;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, SECRET_KEY_SIZE, UNCOMPRESSED_PUBLIC_KEY_SIZE},
    ecdsa::Signature,
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A thread-safe, lazily initialized Secp256k1 context.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Tag byte secp256k1 uses in front of an uncompressed point.
const UNCOMPRESSED_TAG: u8 = 0x04;

/// Raw size of `X || Y`.
pub const PUBLIC_KEY_RAW_SIZE: usize = UNCOMPRESSED_PUBLIC_KEY_SIZE - 1;

pub type Sha256Hash = [u8; 32];

/// SHA-256 over arbitrary bytes. Used for header identity and payload integrity.
pub fn sha256(data: &[u8]) -> Sha256Hash {
    Sha256::digest(data).into()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keypair {
    #[serde(with = "crate::codec::text_bytes")]
    pub public: Vec<u8>,
    #[serde(with = "crate::codec::text_bytes")]
    pub private: Vec<u8>,
}

impl Keypair {
    /// Generates a new random keypair using the OS random number generator.
    pub fn generate() -> Self {
        let secret_key = SecretKey::new(&mut OsRng);
        Self::from_secret_key(&secret_key)
    }

    fn from_secret_key(secret_key: &SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, secret_key);
        let uncompressed = public_key.serialize_uncompressed();
        Keypair {
            public: hex::encode(&uncompressed[1..]).into_bytes(),
            private: hex::encode(secret_key.secret_bytes()).into_bytes(),
        }
    }

    /// Rebuilds a keypair from the textual private key; the public key is derived.
    pub fn from_private(private: &[u8]) -> Result<Self, ChainError> {
        let secret_key = decode_secret_key(private)?;
        Ok(Self::from_secret_key(&secret_key))
    }

    /// Signs a 32-byte digest. Fresh randomness is mixed into the nonce, so two
    /// signatures over the same digest differ but both verify.
    pub fn sign(&self, hash: &[u8]) -> Result<Vec<u8>, ChainError> {
        let secret_key = decode_secret_key(&self.private)?;
        let message = Message::from_digest_slice(hash)
            .map_err(|e| ChainError::CryptoFailure(format!("Failed to create message: {}", e)))?;

        let mut noncedata = [0u8; 32];
        OsRng.fill_bytes(&mut noncedata);
        let signature =
            SECP256K1_CONTEXT.sign_ecdsa_with_noncedata(&message, &secret_key, &noncedata);

        let compact: [u8; COMPACT_SIGNATURE_SIZE] = signature.serialize_compact();
        Ok(hex::encode(compact).into_bytes())
    }
}

fn decode_hex(label: &str, text: &[u8], expected: usize) -> Result<Vec<u8>, ChainError> {
    let raw = hex::decode(text)
        .map_err(|e| ChainError::CryptoFailure(format!("Invalid {} encoding: {}", label, e)))?;
    if raw.len() != expected {
        return Err(ChainError::CryptoFailure(format!(
            "{} must be exactly {} bytes, got {}",
            label,
            expected,
            raw.len()
        )));
    }
    Ok(raw)
}

fn decode_secret_key(text: &[u8]) -> Result<SecretKey, ChainError> {
    let raw = decode_hex("Secret key", text, SECRET_KEY_SIZE)?;
    SecretKey::from_slice(&raw)
        .map_err(|e| ChainError::CryptoFailure(format!("Invalid secret key bytes: {}", e)))
}

/// Parses a textual `X || Y` public key back into a curve point.
pub fn decode_public_key(text: &[u8]) -> Result<PublicKey, ChainError> {
    let raw = decode_hex("Public key", text, PUBLIC_KEY_RAW_SIZE)?;
    let mut tagged = Vec::with_capacity(UNCOMPRESSED_PUBLIC_KEY_SIZE);
    tagged.push(UNCOMPRESSED_TAG);
    tagged.extend_from_slice(&raw);
    PublicKey::from_slice(&tagged)
        .map_err(|e| ChainError::CryptoFailure(format!("Invalid public key: {}", e)))
}

/// Strict form of [`verify`] that reports why a check failed.
pub fn verify_signature(public_key: &[u8], signature: &[u8], hash: &[u8]) -> Result<(), ChainError> {
    let public_key = decode_public_key(public_key)?;
    let raw_signature = decode_hex("Signature", signature, COMPACT_SIGNATURE_SIZE)?;
    let signature = Signature::from_compact(&raw_signature)
        .map_err(|e| ChainError::CryptoFailure(format!("Invalid signature: {}", e)))?;
    let message = Message::from_digest_slice(hash)
        .map_err(|e| ChainError::CryptoFailure(format!("Failed to create message: {}", e)))?;

    SECP256K1_CONTEXT
        .verify_ecdsa(&message, &signature, &public_key)
        .map_err(|_| ChainError::CryptoFailure("Signature verification failed".to_string()))
}

/// ECDSA verification predicate. Malformed keys or signatures fail closed.
pub fn verify(public_key: &[u8], signature: &[u8], hash: &[u8]) -> bool {
    match verify_signature(public_key, signature, hash) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "signature rejected");
            false
        }
    }
}
