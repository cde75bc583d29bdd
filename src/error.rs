//! Error types for ledgerline

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// Too few bytes, or a field that does not fit its fixed slot.
    #[error("Malformed input: {0}")]
    MalformedInput(String),
    /// Key or signature material that cannot be decoded.
    #[error("Cryptographic error: {0}")]
    CryptoFailure(String),
    #[error("Verification failed: {0}")]
    VerificationFailed(String),
    #[error("Peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },
    #[error("Peer {peer} returned invalid data: {reason}")]
    PeerDataInvalid { peer: String, reason: String },
    #[error("Storage error: {0}")]
    StorageFailure(String),
    #[error("Mining cancelled")]
    MiningCancelled,
    #[error("Nonce space exhausted without meeting the proof-of-work prefix")]
    NonceExhausted,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Io(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for ChainError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::StorageFailure(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
