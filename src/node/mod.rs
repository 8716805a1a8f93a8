// Node module
//
// The node-facing operations consumed by the HTTP API: wallet handling,
// transaction submission, mining, inbound peer traffic and conflict
// resolution, all routed through the ledger.

mod shutdown;

pub use shutdown::Shutdown;

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use log::{info, warn};
use thiserror::Error;

use crate::blockchain::crypto::CryptoError;
use crate::blockchain::transaction::TransactionError;
use crate::blockchain::{Address, Block, Ledger, LedgerError, Transaction, Wallet};
use crate::network::{BroadcastOutcome, PeerSync};

/// Errors surfaced by node operations
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Ledger error: {0}")]
    LedgerError(#[from] LedgerError),

    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Wallet error: {0}")]
    WalletError(#[from] CryptoError),

    #[error("No wallet loaded")]
    NoWallet,

    #[error("Chain conflict detected, resolve conflicts before mining")]
    ResolutionRequired,

    #[error("System error: {0}")]
    SystemError(String),
}

/// Where a transaction entered this node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Submitted by this node's user; broadcast after admission
    Local,
    /// Relayed by a peer; never rebroadcast
    Remote,
}

/// Outcome of an inbound block from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReceipt {
    /// The block extended our tip
    Accepted,
    /// The block is ahead of us; we flagged ourselves for resolution
    Behind,
    /// Our chain is at least as long or has diverged
    Conflict(String),
    /// The block itself is invalid
    Rejected(String),
}

/// A node: one ledger, its peer sync and the wallet that signs for it
pub struct Node {
    ledger: Arc<Ledger>,
    sync: PeerSync,
    wallet: RwLock<Option<Wallet>>,
    wallet_path: PathBuf,
    shutdown: Shutdown,
}

impl Node {
    pub fn new(ledger: Arc<Ledger>, sync: PeerSync, wallet_path: PathBuf, shutdown: Shutdown) -> Self {
        Node {
            ledger,
            sync,
            wallet: RwLock::new(None),
            wallet_path,
            shutdown,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Installs `wallet` as the node's signing key and mining identity
    pub fn use_wallet(&self, wallet: Wallet) -> Address {
        let address = wallet.address().clone();
        self.ledger.set_identity(Some(address.clone()));
        *self.wallet.write().unwrap_or_else(PoisonError::into_inner) = Some(wallet);
        address
    }

    fn wallet(&self) -> Option<Wallet> {
        self.wallet
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Generates a new keypair, saves it and makes it the node identity
    pub fn create_wallet(&self) -> Result<Address, NodeError> {
        let wallet = Wallet::new();
        wallet.save(&self.wallet_path)?;
        info!("Created wallet {}", wallet.address());
        Ok(self.use_wallet(wallet))
    }

    /// Loads the keypair saved at the configured wallet path
    pub fn load_wallet(&self) -> Result<Address, NodeError> {
        let wallet = Wallet::load(&self.wallet_path)?;
        info!("Loaded wallet {}", wallet.address());
        Ok(self.use_wallet(wallet))
    }

    /// Signs a transfer from the node wallet and admits it locally
    pub async fn submit_transaction(
        &self,
        recipient: Address,
        amount: f64,
    ) -> Result<(Transaction, BroadcastOutcome), NodeError> {
        let wallet = self.wallet().ok_or(NodeError::NoWallet)?;
        let transaction = Transaction::signed(&wallet, recipient, amount)?;
        let outcome = self.add_transaction(transaction.clone(), Origin::Local).await?;
        Ok((transaction, outcome))
    }

    /// Admits a transaction; only local ones are broadcast
    pub async fn add_transaction(
        &self,
        transaction: Transaction,
        origin: Origin,
    ) -> Result<BroadcastOutcome, NodeError> {
        self.ledger.add_transaction(transaction.clone())?;

        match origin {
            Origin::Local => {
                let outcome = self.sync.broadcast_transaction(&transaction).await;
                if outcome.is_rejected() {
                    warn!("A peer rejected a locally admitted transaction; it stays pending here");
                }
                Ok(outcome)
            }
            Origin::Remote => Ok(BroadcastOutcome::default()),
        }
    }

    /// Mines on a blocking worker so the runtime stays responsive, then
    /// broadcasts the new block
    pub async fn mine_block(&self) -> Result<(Block, BroadcastOutcome), NodeError> {
        if self.ledger.needs_resolution() {
            return Err(NodeError::ResolutionRequired);
        }

        let ledger = self.ledger.clone();
        let cancel = self.shutdown.flag();
        let block = tokio::task::spawn_blocking(move || ledger.mine_block(&cancel))
            .await
            .map_err(|e| NodeError::SystemError(e.to_string()))??;

        let outcome = self.sync.broadcast_block(&block).await;
        Ok((block, outcome))
    }

    /// Handles a block announced by a peer
    pub fn receive_block(&self, block: Block) -> BlockReceipt {
        let tip = self.ledger.last_block();
        let index = block.index();

        if index == tip.index() + 1 {
            match self.ledger.add_remote_block(block) {
                Ok(()) => BlockReceipt::Accepted,
                Err(err @ LedgerError::Linkage { .. }) => BlockReceipt::Conflict(err.to_string()),
                Err(err) => BlockReceipt::Rejected(err.to_string()),
            }
        } else if index > tip.index() + 1 {
            info!("Peer block {} is ahead of local tip {}", index, tip.index());
            self.ledger.mark_needs_resolution();
            BlockReceipt::Behind
        } else {
            BlockReceipt::Conflict(format!(
                "local chain already has {} blocks",
                tip.index() + 1
            ))
        }
    }

    pub async fn resolve_conflicts(&self) -> bool {
        self.sync.resolve().await
    }
}
