use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{error, info, warn};
use thiserror::Error;

use super::block::Block;
use super::crypto::Address;
use super::proof::MiningError;
use super::storage::{PersistenceStore, Snapshot, StorageError};
use super::transaction::Transaction;
use super::verification::Verifier;

/// Amount credited to the miner of each block
pub const MINING_REWARD: f64 = 10.0;

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("No wallet configured, mining is unavailable")]
    NoIdentity,

    #[error("Chain tip moved while mining on parent {expected}")]
    StaleTip { expected: String },

    #[error("Pending transaction failed re-verification: {0}")]
    InvalidPending(String),

    #[error("Invalid proof of work for block {0}")]
    InvalidProof(u64),

    #[error("Block {index} does not extend the local chain: {reason}")]
    Linkage { index: u64, reason: String },

    #[error("Mining error: {0}")]
    MiningError(#[from] MiningError),
}

/// Everything needed to solve and later commit a block, captured at one
/// chain tip.
#[derive(Debug, Clone)]
pub struct MiningJob {
    pub index: u64,
    pub previous_hash: String,
    pub body: Vec<Transaction>,
    pub miner: Address,
}

#[derive(Debug)]
struct LedgerState {
    /// Never empty: genesis is always present
    chain: Vec<Block>,
    pending: Vec<Transaction>,
    peers: BTreeSet<String>,
    identity: Option<Address>,
}

impl LedgerState {
    fn genesis() -> Self {
        LedgerState {
            chain: vec![Block::genesis()],
            pending: Vec::new(),
            peers: BTreeSet::new(),
            identity: None,
        }
    }

    fn tip(&self) -> &Block {
        self.chain.last().expect("chain always holds the genesis block")
    }

    /// Confirmed receipts minus confirmed sends, optionally minus pending sends
    fn balance_of(&self, address: &Address, include_pending: bool) -> f64 {
        let mut balance = 0.0;

        for transaction in self.chain.iter().flat_map(|block| block.transactions()) {
            if transaction.recipient() == address {
                balance += transaction.amount();
            }
            if transaction.sender() == address {
                balance -= transaction.amount();
            }
        }

        if include_pending {
            for transaction in &self.pending {
                if transaction.sender() == address {
                    balance -= transaction.amount();
                }
            }
        }

        balance
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            chain: self.chain.clone(),
            pending: self.pending.clone(),
            peers: self.peers.clone(),
        }
    }

    fn drop_included(&mut self, included: &[Transaction]) {
        self.pending.retain(|transaction| !included.contains(transaction));
    }
}

/// The node's chain, pending pool and peer set.
///
/// All mutations run under one write lock; reads hand out owned copies.
pub struct Ledger {
    state: RwLock<LedgerState>,
    needs_resolution: AtomicBool,
    verifier: Verifier,
    mining_reward: f64,
    storage: Option<Arc<dyn PersistenceStore>>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("state", &self.state)
            .field("needs_resolution", &self.needs_resolution)
            .field("verifier", &self.verifier)
            .finish()
    }
}

impl Ledger {
    /// Creates an in-memory ledger holding only the genesis block
    pub fn new(verifier: Verifier) -> Self {
        Ledger {
            state: RwLock::new(LedgerState::genesis()),
            needs_resolution: AtomicBool::new(false),
            verifier,
            mining_reward: MINING_REWARD,
            storage: None,
        }
    }

    /// Creates a ledger backed by `storage`, restoring the saved state.
    ///
    /// A missing, unreadable or invalid saved chain means starting from
    /// genesis with an empty pool and no peers.
    pub fn with_storage(verifier: Verifier, storage: Arc<dyn PersistenceStore>) -> Self {
        let mut state = LedgerState::genesis();

        match storage.load() {
            Ok(snapshot) if verifier.verify_chain(&snapshot.chain) => {
                info!(
                    "Loaded chain of {} blocks, {} pending transactions, {} peers",
                    snapshot.chain.len(),
                    snapshot.pending.len(),
                    snapshot.peers.len()
                );
                state.chain = snapshot.chain;
                state.pending = snapshot.pending;
                state.peers = snapshot.peers;

                // A pool saved alongside an older chain may hold confirmed entries
                let confirmed: Vec<Transaction> = state
                    .chain
                    .iter()
                    .flat_map(|block| block.body().iter().cloned())
                    .collect();
                let before = state.pending.len();
                state.drop_included(&confirmed);
                if state.pending.len() < before {
                    warn!(
                        "Dropped {} stored pending transactions already in the chain",
                        before - state.pending.len()
                    );
                }
            }
            Ok(_) => {
                warn!("Stored chain failed verification, starting from genesis");
            }
            Err(StorageError::NotFound(_)) => {
                info!("No existing blockchain found in storage, starting from genesis");
            }
            Err(err) => {
                warn!("Failed to load blockchain from storage: {}", err);
            }
        }

        let ledger = Ledger {
            state: RwLock::new(state),
            needs_resolution: AtomicBool::new(false),
            verifier,
            mining_reward: MINING_REWARD,
            storage: Some(storage),
        };
        ledger.persist(&ledger.read_state());
        ledger
    }

    fn read_state(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Saves the durable state. Failures are logged; memory stays authoritative.
    fn persist(&self, state: &LedgerState) {
        if let Some(storage) = &self.storage {
            if let Err(err) = storage.save(&state.snapshot()) {
                error!("Failed to persist ledger state: {}", err);
            }
        }
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    pub fn identity(&self) -> Option<Address> {
        self.read_state().identity.clone()
    }

    /// Sets the address that receives mining rewards
    pub fn set_identity(&self, identity: Option<Address>) {
        self.write_state().identity = identity;
    }

    pub fn chain(&self) -> Vec<Block> {
        self.read_state().chain.clone()
    }

    pub fn last_block(&self) -> Block {
        self.read_state().tip().clone()
    }

    pub fn pending(&self) -> Vec<Transaction> {
        self.read_state().pending.clone()
    }

    /// Spendable balance: confirmed receipts less confirmed and pending sends.
    /// Pending receipts are not counted.
    pub fn balance_of(&self, address: &Address) -> f64 {
        self.read_state().balance_of(address, true)
    }

    /// The node's own balance, `None` when no identity is configured
    pub fn own_balance(&self) -> Option<f64> {
        let state = self.read_state();
        let identity = state.identity.as_ref()?;
        Some(state.balance_of(identity, true))
    }

    /// Validates the local chain
    pub fn is_valid(&self) -> bool {
        self.verifier.verify_chain(&self.read_state().chain)
    }

    /// Re-checks every pending transaction with full balance and signature checks
    pub fn verify_pending(&self) -> bool {
        let state = self.read_state();
        self.verifier
            .verify_all_pending(&state.pending, |address| state.balance_of(address, false))
    }

    /// Admits a transaction into the pending pool.
    ///
    /// Rejection leaves the pool untouched.
    pub fn add_transaction(&self, transaction: Transaction) -> Result<(), LedgerError> {
        if transaction.is_reward() {
            return Err(LedgerError::InvalidTransaction(
                "reward transactions are only created by mining".to_string(),
            ));
        }

        let mut state = self.write_state();

        if !self
            .verifier
            .verify_transaction(&transaction, |address| state.balance_of(address, true))
        {
            return Err(LedgerError::InvalidTransaction(format!(
                "{} cannot send {} (bad signature or insufficient funds)",
                transaction.sender(),
                transaction.amount()
            )));
        }

        info!(
            "Admitted transaction {} -> {} of {}",
            transaction.sender(),
            transaction.recipient(),
            transaction.amount()
        );
        state.pending.push(transaction);
        self.persist(&state);

        Ok(())
    }

    /// Snapshots the tip and pool so the proof can be solved without the lock
    pub fn prepare_mining(&self) -> Result<MiningJob, LedgerError> {
        let state = self.read_state();
        let miner = state.identity.clone().ok_or(LedgerError::NoIdentity)?;
        let tip = state.tip();

        Ok(MiningJob {
            index: tip.index() + 1,
            previous_hash: tip.calculate_hash(),
            body: state.pending.clone(),
            miner,
        })
    }

    /// Appends the block solved for `job`.
    ///
    /// Fails without mutating anything if the tip moved since the job was
    /// prepared or if a snapshot transaction no longer carries a valid
    /// signature. Transactions admitted during the solve stay pending.
    pub fn commit_mined(&self, job: MiningJob, proof: u64) -> Result<Block, LedgerError> {
        let mut state = self.write_state();

        if state.tip().calculate_hash() != job.previous_hash {
            return Err(LedgerError::StaleTip {
                expected: job.previous_hash,
            });
        }

        if let Some(bad) = job
            .body
            .iter()
            .find(|transaction| !self.verifier.verify_signature(transaction))
        {
            return Err(LedgerError::InvalidPending(format!(
                "signature from {} does not verify",
                bad.sender()
            )));
        }

        let reward = Transaction::reward(job.miner, self.mining_reward);
        let block = Block::mined(job.index, job.previous_hash, job.body, reward, proof);

        state.drop_included(block.body());
        state.chain.push(block.clone());
        self.persist(&state);

        info!(
            "Mined block {} with {} transactions",
            block.index(),
            block.transactions().len()
        );
        Ok(block)
    }

    /// Mines a block over the current pool, blocking until solved or cancelled
    pub fn mine_block(&self, cancel: &AtomicBool) -> Result<Block, LedgerError> {
        let job = self.prepare_mining()?;
        let proof = self
            .verifier
            .proof_of_work()
            .solve(&job.body, &job.previous_hash, cancel)?;
        self.commit_mined(job, proof)
    }

    /// Appends a block mined by a peer if it extends the local tip
    pub fn add_remote_block(&self, block: Block) -> Result<(), LedgerError> {
        if !self
            .verifier
            .proof_of_work()
            .verify(block.body(), block.previous_hash(), block.proof())
        {
            return Err(LedgerError::InvalidProof(block.index()));
        }

        let mut state = self.write_state();
        let tip = state.tip();

        if tip.calculate_hash() != block.previous_hash() {
            return Err(LedgerError::Linkage {
                index: block.index(),
                reason: "previous hash does not match the local tip".to_string(),
            });
        }
        if block.index() != tip.index() + 1 {
            return Err(LedgerError::Linkage {
                index: block.index(),
                reason: format!("expected index {}", tip.index() + 1),
            });
        }

        state.drop_included(block.transactions());
        info!("Accepted remote block {}", block.index());
        state.chain.push(block);
        self.persist(&state);

        Ok(())
    }

    /// Replaces the local chain with `candidate` if it is strictly longer and
    /// valid. The pending pool is discarded on replacement.
    pub fn adopt_chain(&self, candidate: Vec<Block>) -> bool {
        let mut state = self.write_state();

        if candidate.len() <= state.chain.len() {
            return false;
        }
        if !self.verifier.verify_chain(&candidate) {
            warn!("Refusing invalid chain of {} blocks", candidate.len());
            return false;
        }

        info!(
            "Replacing local chain of {} blocks with {} blocks, dropping {} pending transactions",
            state.chain.len(),
            candidate.len(),
            state.pending.len()
        );
        state.chain = candidate;
        state.pending.clear();
        self.persist(&state);

        true
    }

    pub fn needs_resolution(&self) -> bool {
        self.needs_resolution.load(Ordering::SeqCst)
    }

    pub fn mark_needs_resolution(&self) {
        self.needs_resolution.store(true, Ordering::SeqCst);
    }

    pub fn clear_needs_resolution(&self) {
        self.needs_resolution.store(false, Ordering::SeqCst);
    }

    /// Adds a peer. Returns whether the set changed.
    pub fn add_peer(&self, address: &str) -> bool {
        let address = address.trim();
        if address.is_empty() {
            return false;
        }

        let mut state = self.write_state();
        let changed = state.peers.insert(address.to_string());
        if changed {
            info!("Added peer {}", address);
            self.persist(&state);
        }
        changed
    }

    /// Removes a peer. Returns whether the set changed.
    pub fn remove_peer(&self, address: &str) -> bool {
        let mut state = self.write_state();
        let changed = state.peers.remove(address.trim());
        if changed {
            info!("Removed peer {}", address);
            self.persist(&state);
        }
        changed
    }

    /// Known peers in sorted order
    pub fn peers(&self) -> Vec<String> {
        self.read_state().peers.iter().cloned().collect()
    }
}
