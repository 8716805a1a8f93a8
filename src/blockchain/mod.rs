// Blockchain module
//
// This module contains the ledger and consensus engine:
// - Transaction and Block value types
// - Proof of work
// - Verification of transactions, pools and chains
// - The ledger (chain, pending pool, peer set)
// - Persistent storage
// - Cryptography utilities

pub mod block;
pub mod crypto;
pub mod ledger;
pub mod proof;
pub mod storage;
pub mod transaction;
pub mod verification;

// Re-export main components for easier access
pub use block::Block;
pub use crypto::{Address, DigitalSignature, Ed25519Signer, Signer, Wallet};
pub use ledger::{Ledger, LedgerError, MINING_REWARD};
pub use proof::ProofOfWork;
pub use storage::{BlockchainStorage, PersistenceStore};
pub use transaction::Transaction;
pub use verification::Verifier;
