//! Transaction module split into types and validation for better modularity

pub mod types;
pub mod validation;

pub use types::*;
pub use validation::{check_transaction, verify_transaction, TransactionCheck};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{NETWORK_KEY_SIZE, TRANSACTION_HEADER_SIZE};
    use crate::crypto::{sha256, Keypair};
    use crate::error::ChainError;
    use std::sync::atomic::AtomicBool;

    fn signed_payment(payer: &Keypair, payee: &Keypair, value: i64, prefix: &[u8]) -> Transaction {
        let mut tx = Transaction::payment(
            payer.public.clone(),
            payee.public.clone(),
            value,
            b"invoice 42".to_vec(),
        ).unwrap();
        tx.mine(prefix, &AtomicBool::new(false)).unwrap();
        tx.sign(payer).unwrap();
        tx
    }

    #[test]
    fn test_new_transaction_fills_payload_fields() {
        let tx = Transaction::new(b"a".to_vec(), b"b".to_vec(), 5, b"hello".to_vec()).unwrap();
        assert_eq!(tx.header.payload_hash, sha256(b"hello"));
        assert_eq!(tx.header.payload_length, 5);
        assert_eq!(tx.header.nonce, 0);
        assert!(tx.signature.is_empty());
        assert!(tx.header.timestamp > 0);
    }

    #[test]
    fn test_payment_debits_the_payer() {
        let tx = Transaction::payment(b"a".to_vec(), b"b".to_vec(), 10, Vec::new()).unwrap();
        assert_eq!(tx.header.amount, -10);

        let credit = tx.mirrored().unwrap();
        assert_eq!(credit.header.from, b"b".to_vec());
        assert_eq!(credit.header.to, b"a".to_vec());
        assert_eq!(credit.header.amount, 10);
    }

    #[test]
    fn test_mirror_of_min_amount_is_rejected() {
        let tx = Transaction::new(b"a".to_vec(), b"b".to_vec(), i64::MIN, Vec::new()).unwrap();
        assert!(tx.mirrored().is_err());
    }

    #[test]
    fn test_payment_of_min_value_is_rejected() {
        let result = Transaction::payment(b"a".to_vec(), b"b".to_vec(), i64::MIN, Vec::new());
        assert!(matches!(result, Err(ChainError::MalformedInput(_))));
        let max = Transaction::payment(b"a".to_vec(), b"b".to_vec(), i64::MAX, Vec::new()).unwrap();
        assert_eq!(max.header.amount, -i64::MAX);
    }

    #[test]
    fn test_payload_length_must_fit_header_field() {
        assert_eq!(payload_length(5).unwrap(), 5);
        assert_eq!(payload_length(u32::MAX as usize).unwrap(), u32::MAX);
        assert!(matches!(
            payload_length(u32::MAX as usize + 1),
            Err(ChainError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_header_round_trip() {
        let payer = Keypair::generate();
        let payee = Keypair::generate();
        let tx = signed_payment(&payer, &payee, 3, &[]);

        let bytes = tx.header.encode().unwrap();
        assert_eq!(bytes.len(), TRANSACTION_HEADER_SIZE);
        assert_eq!(TransactionHeader::decode(&bytes).unwrap(), tx.header);
    }

    #[test]
    fn test_header_with_empty_sender_round_trips() {
        let tx = Transaction::new(Vec::new(), b"node".to_vec(), 1, b"Mine".to_vec()).unwrap();
        let bytes = tx.header.encode().unwrap();
        assert_eq!(TransactionHeader::decode(&bytes).unwrap(), tx.header);
    }

    #[test]
    fn test_header_decode_rejects_short_input() {
        let result = TransactionHeader::decode(&[0u8; TRANSACTION_HEADER_SIZE - 1]);
        assert!(matches!(result, Err(ChainError::MalformedInput(_))));
    }

    #[test]
    fn test_oversized_key_fails_encoding() {
        let tx = Transaction::new(vec![b'k'; NETWORK_KEY_SIZE + 1], b"b".to_vec(), 1, Vec::new()).unwrap();
        assert!(matches!(tx.header.encode(), Err(ChainError::MalformedInput(_))));
        assert!(tx.hash().is_err());
    }

    #[test]
    fn test_transaction_decode_returns_remainder() {
        let payer = Keypair::generate();
        let payee = Keypair::generate();
        let tx = signed_payment(&payer, &payee, 1, &[]);

        let mut bytes = tx.encode().unwrap();
        bytes.extend_from_slice(b"rest");
        let (decoded, rest) = Transaction::decode(&bytes).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(rest, b"rest");
    }

    #[test]
    fn test_transaction_decode_rejects_truncated_payload() {
        let tx = Transaction::new(b"a".to_vec(), b"b".to_vec(), 1, vec![7u8; 16]).unwrap();
        let bytes = tx.encode().unwrap();
        let result = Transaction::decode(&bytes[..bytes.len() - 1]);
        assert!(matches!(result, Err(ChainError::MalformedInput(_))));
    }

    #[test]
    fn test_transaction_stream_decodes_every_entry() {
        // The last entry has an empty payload and sits exactly at the minimum size.
        let first = Transaction::new(b"a".to_vec(), b"b".to_vec(), 1, b"xyz".to_vec()).unwrap();
        let second = Transaction::new(b"b".to_vec(), b"c".to_vec(), 2, Vec::new()).unwrap();
        let bytes = encode_transactions(&[first.clone(), second.clone()]).unwrap();

        let decoded = decode_transactions(&bytes).unwrap();
        assert_eq!(decoded, vec![first, second]);
        assert!(decode_transactions(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn test_verify_accepts_mined_and_signed_transaction() {
        let payer = Keypair::generate();
        let payee = Keypair::generate();
        let prefix = [0u8];
        let tx = signed_payment(&payer, &payee, 10, &prefix);

        let check = tx.check(&prefix);
        assert!(check.passed(), "failed checks: {:?}", check.failures());
        // Pure function of immutable state.
        assert!(verify_transaction(&tx, &prefix));
        assert!(verify_transaction(&tx, &prefix));
    }

    #[test]
    fn test_verify_reports_each_failing_check() {
        let payer = Keypair::generate();
        let payee = Keypair::generate();
        let mut tx = signed_payment(&payer, &payee, 10, &[]);

        tx.payload = b"tampered".to_vec();
        let check = check_transaction(&tx, &[]);
        assert!(!check.payload);
        assert!(check.proof_of_work);
        assert!(check.signature);
        assert_eq!(check.failures(), vec!["payload"]);
    }

    #[test]
    fn test_amount_is_covered_by_signature() {
        let payer = Keypair::generate();
        let payee = Keypair::generate();
        let mut tx = signed_payment(&payer, &payee, 10, &[]);

        tx.header.amount = 1_000;
        let check = tx.check(&[]);
        assert!(check.payload);
        assert!(!check.signature);
    }

    #[test]
    fn test_signature_by_someone_else_is_rejected() {
        let payer = Keypair::generate();
        let payee = Keypair::generate();
        let mut tx = Transaction::payment(payer.public.clone(), payee.public.clone(), 1, Vec::new()).unwrap();
        tx.sign(&payee).unwrap();
        assert!(!tx.verify(&[]));
    }

    #[test]
    fn test_unmined_transaction_usually_fails_pow() {
        let payer = Keypair::generate();
        let payee = Keypair::generate();
        let mut tx = signed_payment(&payer, &payee, 1, &[]);
        // Force a nonce whose hash does not start with two zero bytes.
        while tx.hash().unwrap()[..2] == [0, 0] {
            tx.header.nonce += 1;
        }
        tx.sign(&payer).unwrap();
        let check = tx.check(&[0, 0]);
        assert!(!check.proof_of_work);
        assert!(check.signature);
    }
}
