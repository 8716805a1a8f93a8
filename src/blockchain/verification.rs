//! Transaction, pool and chain validation.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;

use super::block::Block;
use super::crypto::{Address, Signer};
use super::proof::ProofOfWork;
use super::transaction::Transaction;

/// Stateless validator shared by the ledger and peer sync
#[derive(Clone)]
pub struct Verifier {
    proof_of_work: ProofOfWork,
    signer: Arc<dyn Signer>,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("proof_of_work", &self.proof_of_work)
            .finish()
    }
}

impl Verifier {
    pub fn new(proof_of_work: ProofOfWork, signer: Arc<dyn Signer>) -> Self {
        Verifier {
            proof_of_work,
            signer,
        }
    }

    pub fn proof_of_work(&self) -> &ProofOfWork {
        &self.proof_of_work
    }

    /// Checks the sender's signature over the canonical message
    pub fn verify_signature(&self, transaction: &Transaction) -> bool {
        match transaction.canonical_message() {
            Ok(message) => self.signer.verify(
                transaction.sender(),
                &message,
                transaction.signature(),
            ),
            Err(_) => false,
        }
    }

    /// Validates a single transaction against `balance_of`.
    ///
    /// Rewards bypass every check. Anything else needs a sane amount, enough
    /// funds and a valid signature.
    pub fn verify_transaction<F>(&self, transaction: &Transaction, balance_of: F) -> bool
    where
        F: Fn(&Address) -> f64,
    {
        if transaction.is_reward() {
            return true;
        }

        let amount = transaction.amount();
        if !amount.is_finite() || amount < 0.0 {
            return false;
        }

        balance_of(transaction.sender()) >= amount && self.verify_signature(transaction)
    }

    /// Validates every pool entry with full balance and signature checks.
    ///
    /// Entries are replayed in admission order: each one is checked against
    /// the sender's confirmed balance less the sender's earlier pool entries.
    pub fn verify_all_pending<F>(&self, pool: &[Transaction], confirmed_balance_of: F) -> bool
    where
        F: Fn(&Address) -> f64,
    {
        let mut spent: HashMap<&Address, f64> = HashMap::new();

        for transaction in pool {
            let already_spent = spent.get(transaction.sender()).copied().unwrap_or(0.0);
            let valid = self.verify_transaction(transaction, |address| {
                confirmed_balance_of(address) - already_spent
            });

            if !valid {
                return false;
            }

            *spent.entry(transaction.sender()).or_insert(0.0) += transaction.amount();
        }

        true
    }

    /// Checks that the chain starts at the fixed genesis block, then linkage
    /// and proof for every block after it
    pub fn verify_chain(&self, chain: &[Block]) -> bool {
        match chain.first() {
            None => return false,
            Some(first) if *first != Block::genesis() => {
                warn!("Chain does not start at the genesis block");
                return false;
            }
            Some(_) => {}
        }

        for window in chain.windows(2) {
            let (previous, block) = (&window[0], &window[1]);

            if block.previous_hash() != previous.calculate_hash() {
                warn!("Block {} does not link to its predecessor", block.index());
                return false;
            }

            if !self
                .proof_of_work
                .verify(block.body(), block.previous_hash(), block.proof())
            {
                warn!("Proof of work is invalid for block {}", block.index());
                return false;
            }
        }

        true
    }
}
