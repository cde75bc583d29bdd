/// Verification of transactions, separated from type definitions
use crate::crypto::{self, sha256};
use crate::miner::check_proof_of_work;
use crate::transaction::types::Transaction;
use serde::Serialize;

/// Outcome of each independent transaction check. All three are always
/// evaluated so a rejection can name every failing check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransactionCheck {
    /// Payload digest and length match the header.
    pub payload: bool,
    pub proof_of_work: bool,
    /// Signature by `from` over the header hash.
    pub signature: bool,
}

impl TransactionCheck {
    pub fn passed(&self) -> bool {
        self.payload && self.proof_of_work && self.signature
    }

    pub fn failures(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        if !self.payload {
            failed.push("payload");
        }
        if !self.proof_of_work {
            failed.push("proof_of_work");
        }
        if !self.signature {
            failed.push("signature");
        }
        failed
    }
}

impl Transaction {
    pub fn check(&self, pow_prefix: &[u8]) -> TransactionCheck {
        let payload = sha256(&self.payload) == self.header.payload_hash
            && self.payload.len() == self.header.payload_length as usize;

        let (proof_of_work, signature) = match self.hash() {
            Ok(header_hash) => (
                check_proof_of_work(pow_prefix, &header_hash),
                crypto::verify(&self.header.from, &self.signature, &header_hash),
            ),
            Err(e) => {
                tracing::debug!(error = %e, "transaction header does not encode");
                (false, false)
            }
        };

        let check = TransactionCheck {
            payload,
            proof_of_work,
            signature,
        };
        tracing::debug!(
            payload = check.payload,
            proof_of_work = check.proof_of_work,
            signature = check.signature,
            "transaction.check"
        );
        check
    }

    pub fn verify(&self, pow_prefix: &[u8]) -> bool {
        self.check(pow_prefix).passed()
    }
}

pub fn check_transaction(tx: &Transaction, pow_prefix: &[u8]) -> TransactionCheck {
    tx.check(pow_prefix)
}

/// Free-function form of [`Transaction::verify`].
pub fn verify_transaction(tx: &Transaction, pow_prefix: &[u8]) -> bool {
    tx.verify(pow_prefix)
}
