//! Transfer and mining protocols over per-account chains.
//!
//! Every write to an account's chain happens while holding that account's
//! lock, so two requests never both extend the same head. A transfer takes
//! the payer's lock for the debit leg, releases it, then takes the payee's
//! lock for the credit leg: the pair is not atomic across the two accounts.

use crate::blockchain::{Block, Chain};
use crate::crypto::Keypair;
use crate::error::{ChainError, Result};
use crate::miner::{MessageKind, PowConfig};
use crate::persistence::ChainStore;
use crate::transaction::Transaction;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Payload carried by mining reward transactions.
pub const MINING_PAYLOAD: &[u8] = b"Mine";

pub const DEFAULT_MINING_REWARD: i64 = 1;

/// One mutex per public key. An entry exists only while some caller holds
/// or waits on it, so the map is bounded by the number of in-flight requests.
#[derive(Default)]
pub struct AccountLocks {
    locks: Mutex<HashMap<Vec<u8>, Arc<Mutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` while holding the lock of `pk`.
    pub fn with_lock<T>(&self, pk: &[u8], work: impl FnOnce() -> T) -> T {
        let lock = self
            .locks
            .lock()
            .entry(pk.to_vec())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock();
            work()
        };
        drop(lock);
        self.release(pk);
        result
    }

    /// Clones are only handed out under the map lock, so a count of one here
    /// means no other caller holds or waits on the entry.
    fn release(&self, pk: &[u8]) {
        let mut locks = self.locks.lock();
        if locks.get(pk).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(pk);
        }
    }
}

/// The two blocks a transfer appends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    /// Appended to the payer's chain.
    pub debit: Block,
    /// Appended to the payee's chain.
    pub credit: Block,
}

pub struct Ledger {
    store: ChainStore,
    identity: Keypair,
    pow: PowConfig,
    reward: i64,
    locks: AccountLocks,
    cancel: Arc<AtomicBool>,
}

impl Ledger {
    pub fn new(store: ChainStore, identity: Keypair, pow: PowConfig, reward: i64) -> Self {
        Self {
            store,
            identity,
            pow,
            reward,
            locks: AccountLocks::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn identity(&self) -> &Keypair {
        &self.identity
    }

    pub fn prefix(&self, kind: MessageKind) -> Vec<u8> {
        self.pow.prefix(kind)
    }

    /// Loads `pk`'s chain. A stale aggregate record is rewritten under the
    /// account lock from a chain reloaded there.
    pub fn load_chain(&self, pk: &[u8]) -> Result<Chain> {
        let chain = self.store.load_chain(pk)?;
        if !self.store.record_is_stale(&chain)? {
            return Ok(chain);
        }
        self.locks.with_lock(pk, || -> Result<Chain> {
            let chain = self.store.load_chain(pk)?;
            self.store.repair_record(&chain)?;
            Ok(chain)
        })
    }

    /// Verifies `tx`, then appends a debit block to the payer's chain and the
    /// mirrored credit block to the payee's chain.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<TransferReceipt> {
        let check = tx.check(&self.prefix(MessageKind::Transaction));
        if !check.passed() {
            let failed = check.failures().join(", ");
            warn!(failed = %failed, "transaction rejected");
            return Err(ChainError::VerificationFailed(format!(
                "transaction failed checks: {}",
                failed
            )));
        }
        // The credit leg must be buildable before the debit commits.
        tx.mirrored()?;

        let payer = tx.header.from.clone();
        let payee = tx.header.to.clone();
        let amount = tx.header.amount;

        let debit = self.locks.with_lock(&payer, || -> Result<Block> {
            let mut chain = self.store.load_chain(&payer)?;
            let mut block = Block::new(
                self.identity.public.clone(),
                chain.latest_hash,
                chain.next_timestamp(),
            );
            block.add_transaction(tx);
            self.seal(&mut block)?;
            self.store.commit(&mut chain, block.clone())?;
            Ok(block)
        })?;

        let credit = self.locks.with_lock(&payee, || -> Result<Block> {
            let mut chain = self.store.load_chain(&payee)?;
            let timestamp = chain.next_timestamp().max(debit.header.timestamp);
            let block = debit.mirror(chain.latest_hash, timestamp)?;
            self.store.commit(&mut chain, block.clone()).map_err(|e| {
                error!(error = %e, "credit leg failed after the debit was committed");
                e
            })?;
            Ok(block)
        })?;

        info!(
            from = %String::from_utf8_lossy(&payer),
            to = %String::from_utf8_lossy(&payee),
            amount,
            "transfer committed"
        );
        Ok(TransferReceipt { debit, credit })
    }

    /// Mints the reward into the node's own chain.
    pub fn mine_reward(&self) -> Result<Block> {
        let owner = self.identity.public.clone();
        let mut tx = Transaction::new(
            Vec::new(),
            owner.clone(),
            self.reward,
            MINING_PAYLOAD.to_vec(),
        )?;
        tx.mine(&self.prefix(MessageKind::Transaction), &self.cancel)?;
        tx.sign(&self.identity)?;

        self.locks.with_lock(&owner, || -> Result<Block> {
            let mut chain = self.store.load_chain(&owner)?;
            let mut block = Block::new(owner.clone(), chain.latest_hash, chain.next_timestamp());
            block.add_transaction(tx);
            self.seal(&mut block)?;
            self.store.commit(&mut chain, block.clone())?;

            info!(length = chain.len(), balance = chain.balance, "block mined");
            Ok(block)
        })
    }

    /// Substitutes the stored chain for `chain.owner` if `chain` is still
    /// strictly longer than what is stored. Returns whether it was written.
    pub fn replace_chain(&self, chain: &Chain) -> Result<bool> {
        self.locks.with_lock(&chain.owner, || -> Result<bool> {
            let stored = self.store.load_chain(&chain.owner)?;
            if chain.len() <= stored.len() {
                warn!(
                    account = %String::from_utf8_lossy(&chain.owner),
                    stored = stored.len(),
                    candidate = chain.len(),
                    "stored chain grew past the candidate, keeping it"
                );
                return Ok(false);
            }
            self.store.replace_chain(chain)?;
            Ok(true)
        })
    }

    /// Stops every running and future nonce search.
    pub fn shutdown(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn seal(&self, block: &mut Block) -> Result<()> {
        block.mine(&self.prefix(MessageKind::Block), &self.cancel)?;
        block.sign(&self.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{verify_block, AccountRecord};
    use crate::persistence::{InMemoryStore, KvStore, DEFAULT_NAMESPACE};

    fn ledger_with(pow: PowConfig) -> Ledger {
        let store = ChainStore::new(Arc::new(InMemoryStore::new()), DEFAULT_NAMESPACE);
        Ledger::new(store, Keypair::generate(), pow, DEFAULT_MINING_REWARD)
    }

    fn payment(ledger: &Ledger, payer: &Keypair, payee: &Keypair, value: i64) -> Transaction {
        let mut tx = Transaction::payment(payer.public.clone(), payee.public.clone(), value, Vec::new()).unwrap();
        tx.mine(&ledger.prefix(MessageKind::Transaction), &AtomicBool::new(false))
            .unwrap();
        tx.sign(payer).unwrap();
        tx
    }

    #[test]
    fn test_transfer_moves_value_between_chains() {
        let ledger = ledger_with(PowConfig::trivial());
        let alice = Keypair::generate();
        let bob = Keypair::generate();

        let receipt = ledger
            .submit_transaction(payment(&ledger, &alice, &bob, 10))
            .unwrap();

        let a = ledger.load_chain(&alice.public).unwrap();
        let b = ledger.load_chain(&bob.public).unwrap();
        assert_eq!(a.balance, -10);
        assert_eq!(b.balance, 10);
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);

        let credit_tx = &b.blocks[1].transactions[0];
        assert_eq!(credit_tx.header.from, bob.public);
        assert_eq!(credit_tx.header.amount, 10);
        assert_eq!(b.blocks[1], receipt.credit);
        assert_eq!(
            receipt.credit.header.origin,
            hex::encode(receipt.debit.hash().unwrap()).into_bytes()
        );
    }

    #[test]
    fn test_debit_block_verifies_and_credit_does_not() {
        let pow = PowConfig {
            transaction_difficulty: 1,
            block_difficulty: 1,
        };
        let ledger = ledger_with(pow);
        let alice = Keypair::generate();
        let bob = Keypair::generate();

        let receipt = ledger
            .submit_transaction(payment(&ledger, &alice, &bob, 3))
            .unwrap();
        let prefix = ledger.prefix(MessageKind::Block);
        assert!(verify_block(&receipt.debit, &prefix));
        assert!(!verify_block(&receipt.credit, &prefix));
        assert!(ledger.load_chain(&alice.public).unwrap().is_valid(&prefix));
    }

    #[test]
    fn test_rejected_transaction_names_failures_and_writes_nothing() {
        let ledger = ledger_with(PowConfig::trivial());
        let alice = Keypair::generate();
        let bob = Keypair::generate();
        let mut tx = payment(&ledger, &alice, &bob, 10);
        tx.payload = b"changed".to_vec();

        match ledger.submit_transaction(tx) {
            Err(ChainError::VerificationFailed(msg)) => assert!(msg.contains("payload")),
            other => panic!("expected verification failure, got {:?}", other),
        }
        assert_eq!(ledger.load_chain(&alice.public).unwrap().len(), 1);
        assert_eq!(ledger.load_chain(&bob.public).unwrap().len(), 1);
    }

    #[test]
    fn test_mine_reward_credits_node_chain() {
        let ledger = ledger_with(PowConfig::trivial());
        let first = ledger.mine_reward().unwrap();
        ledger.mine_reward().unwrap();

        let chain = ledger.load_chain(&ledger.identity().public).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.balance, 2 * DEFAULT_MINING_REWARD);
        assert_eq!(chain.blocks[2].header.prev_block, first.hash().unwrap());

        let tx = &first.transactions[0];
        assert!(tx.header.from.is_empty());
        assert_eq!(tx.payload, MINING_PAYLOAD);
        assert!(chain.is_valid(&[]));
    }

    #[test]
    fn test_blocks_link_to_previous_head() {
        let ledger = ledger_with(PowConfig::trivial());
        let alice = Keypair::generate();
        let bob = Keypair::generate();
        for value in [1, 2, 3] {
            ledger
                .submit_transaction(payment(&ledger, &alice, &bob, value))
                .unwrap();
        }
        let chain = ledger.load_chain(&bob.public).unwrap();
        assert_eq!(chain.balance, 6);
        for pair in chain.blocks.windows(2) {
            assert_eq!(pair[1].header.prev_block, pair[0].hash().unwrap());
            assert!(pair[1].header.timestamp >= pair[0].header.timestamp);
        }
    }

    #[test]
    fn test_concurrent_transfers_to_one_payee() {
        let ledger = ledger_with(PowConfig::trivial());
        let payee = Keypair::generate();
        let payers: Vec<Keypair> = (0..8).map(|_| Keypair::generate()).collect();

        std::thread::scope(|scope| {
            for payer in &payers {
                let ledger = &ledger;
                let payee = &payee;
                scope.spawn(move || {
                    ledger
                        .submit_transaction(payment(ledger, payer, payee, 5))
                        .unwrap();
                });
            }
        });

        let chain = ledger.load_chain(&payee.public).unwrap();
        assert_eq!(chain.len(), payers.len() + 1);
        assert_eq!(chain.balance, 5 * payers.len() as i64);
    }

    #[test]
    fn test_account_locks_are_released_after_use() {
        let ledger = ledger_with(PowConfig::trivial());
        let payee = Keypair::generate();
        for _ in 0..4 {
            let payer = Keypair::generate();
            ledger
                .submit_transaction(payment(&ledger, &payer, &payee, 1))
                .unwrap();
        }
        ledger.mine_reward().unwrap();
        assert!(ledger.locks.locks.lock().is_empty());

        let locks = AccountLocks::new();
        let held = locks.with_lock(b"a", || locks.with_lock(b"b", || locks.locks.lock().len()));
        assert_eq!(held, 2);
        assert!(locks.locks.lock().is_empty());
    }

    #[test]
    fn test_replace_chain_refuses_a_chain_no_longer_than_stored() {
        let ledger = ledger_with(PowConfig::trivial());
        let owner = ledger.identity().public.clone();
        ledger.mine_reward().unwrap();
        let mut candidate = ledger.load_chain(&owner).unwrap();
        let extra = Block::new(owner.clone(), candidate.latest_hash, candidate.next_timestamp());
        candidate.append(extra).unwrap();

        // The stored chain grows to the candidate's length meanwhile.
        ledger.mine_reward().unwrap();
        assert!(!ledger.replace_chain(&candidate).unwrap());
        let stored = ledger.load_chain(&owner).unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored.balance, 2);

        let mut longer = stored.clone();
        let extra = Block::new(owner.clone(), longer.latest_hash, longer.next_timestamp());
        longer.append(extra).unwrap();
        assert!(ledger.replace_chain(&longer).unwrap());
        assert_eq!(ledger.load_chain(&owner).unwrap().len(), 4);
    }

    #[test]
    fn test_load_chain_repairs_stale_aggregate() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
        let store = ChainStore::new(kv.clone(), DEFAULT_NAMESPACE);
        let ledger = Ledger::new(store.clone(), Keypair::generate(), PowConfig::trivial(), 1);
        let owner = ledger.identity().public.clone();
        ledger.mine_reward().unwrap();

        let bogus = AccountRecord {
            balance: -7,
            latest_hash: [9u8; 32],
        };
        kv.put(DEFAULT_NAMESPACE, &owner, &bogus.encode().unwrap()).unwrap();

        let chain = ledger.load_chain(&owner).unwrap();
        assert_eq!(chain.balance, 1);
        let record = store.load_record(&owner).unwrap().unwrap();
        assert_eq!(record, AccountRecord::from_chain(&chain));
    }

    #[test]
    fn test_shutdown_cancels_mining() {
        let ledger = ledger_with(PowConfig {
            transaction_difficulty: 0,
            block_difficulty: 32,
        });
        ledger.shutdown();
        assert!(ledger.is_shut_down());
        assert!(matches!(ledger.mine_reward(), Err(ChainError::MiningCancelled)));
        assert_eq!(ledger.load_chain(&ledger.identity().public).unwrap().len(), 1);
    }
}
