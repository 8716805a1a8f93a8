use std::collections::BTreeSet;
use std::path::Path;

use log::warn;
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{TransactionError, TransactionResult, Transactional};
use sled::{Db, Tree};
use thiserror::Error;

use super::block::Block;
use super::transaction::Transaction;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Item not found: {0}")]
    NotFound(String),
}

/// Durable node state: the chain, the pending pool and the peer set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub chain: Vec<Block>,
    pub pending: Vec<Transaction>,
    pub peers: BTreeSet<String>,
}

/// Loads and saves the ledger's durable state
pub trait PersistenceStore: Send + Sync {
    /// Loads the last saved state. `NotFound` means nothing was saved yet.
    fn load(&self) -> Result<Snapshot, StorageError>;

    /// Replaces the saved state with `snapshot`
    fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError>;
}

/// sled-backed store
pub struct BlockchainStorage {
    /// The database instance
    db: Db,

    /// Blocks keyed by big-endian index
    blocks: Tree,

    /// Pending transactions keyed by big-endian pool position
    pending: Tree,

    /// Peer addresses, value unused
    peers: Tree,
}

impl std::fmt::Debug for BlockchainStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainStorage").finish()
    }
}

impl BlockchainStorage {
    /// Opens (or creates) the database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;

        let blocks = db.open_tree("blocks")?;
        let pending = db.open_tree("pending")?;
        let peers = db.open_tree("peers")?;

        Ok(Self {
            db,
            blocks,
            pending,
            peers,
        })
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
        bincode::serialize(value).map_err(|e| StorageError::SerializationError(e.to_string()))
    }

    fn decode_all<T: DeserializeOwned>(tree: &Tree, kind: &str) -> Result<Vec<T>, StorageError> {
        let mut items = Vec::new();

        // Keys are big-endian, so iteration follows insertion order
        for result in tree.iter() {
            let (_, value) = result?;
            let item = bincode::deserialize::<T>(&value).map_err(|e| {
                StorageError::DeserializationError(format!("Failed to deserialize {}: {}", kind, e))
            })?;
            items.push(item);
        }

        Ok(items)
    }

    fn block_key(index: u64) -> [u8; 8] {
        index.to_be_bytes()
    }

    /// Number of leading blocks of `chain` already stored unchanged.
    ///
    /// Stored blocks always form a prefix-consistent copy of the last saved
    /// chain, so the walk stops at the first stored block that matches.
    fn stored_prefix(&self, chain: &[Block]) -> Result<usize, StorageError> {
        for (position, block) in chain.iter().enumerate().rev() {
            if let Some(stored) = self.blocks.get(Self::block_key(block.index()))? {
                if stored[..] == Self::encode(block)?[..] {
                    return Ok(position + 1);
                }
            }
        }
        Ok(0)
    }
}

impl PersistenceStore for BlockchainStorage {
    fn load(&self) -> Result<Snapshot, StorageError> {
        let chain: Vec<Block> = Self::decode_all(&self.blocks, "block")?;

        if chain.is_empty() {
            return Err(StorageError::NotFound("No blocks found in storage".to_string()));
        }

        for (position, block) in chain.iter().enumerate() {
            if block.index() != position as u64 {
                return Err(StorageError::DeserializationError(format!(
                    "Stored chain has a gap at index {}",
                    position
                )));
            }
        }

        let pending = Self::decode_all(&self.pending, "transaction")?;

        let mut peers = BTreeSet::new();
        for key in self.peers.iter().keys() {
            let key = key?;
            match String::from_utf8(key.to_vec()) {
                Ok(peer) => {
                    peers.insert(peer);
                }
                Err(e) => warn!("Skipping unreadable peer entry: {}", e),
            }
        }

        Ok(Snapshot {
            chain,
            pending,
            peers,
        })
    }

    /// Writes the blocks past the stored prefix and rewrites the pool and
    /// peer set, all in one transaction.
    fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let kept = self.stored_prefix(&snapshot.chain)?;

        let new_blocks = snapshot.chain[kept..]
            .iter()
            .map(|block| Ok((Self::block_key(block.index()), Self::encode(block)?)))
            .collect::<Result<Vec<_>, StorageError>>()?;

        let stale_blocks = self
            .blocks
            .range(Self::block_key(snapshot.chain.len() as u64)..)
            .keys()
            .collect::<Result<Vec<_>, sled::Error>>()?;

        let pending = snapshot
            .pending
            .iter()
            .enumerate()
            .map(|(position, tx)| Ok(((position as u64).to_be_bytes(), Self::encode(tx)?)))
            .collect::<Result<Vec<_>, StorageError>>()?;

        let old_pending = self.pending.iter().keys().collect::<Result<Vec<_>, sled::Error>>()?;
        let old_peers = self.peers.iter().keys().collect::<Result<Vec<_>, sled::Error>>()?;

        let result: TransactionResult<(), StorageError> = (&self.blocks, &self.pending, &self.peers)
            .transaction(|(blocks, pending_tree, peers)| {
                for key in &stale_blocks {
                    blocks.remove(key.clone())?;
                }
                for (key, value) in &new_blocks {
                    blocks.insert(&key[..], value.as_slice())?;
                }

                for key in &old_pending {
                    pending_tree.remove(key.clone())?;
                }
                for (key, value) in &pending {
                    pending_tree.insert(&key[..], value.as_slice())?;
                }

                for key in &old_peers {
                    peers.remove(key.clone())?;
                }
                for peer in &snapshot.peers {
                    peers.insert(peer.as_bytes(), Vec::<u8>::new())?;
                }

                Ok(())
            });

        result.map_err(|err| match err {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => StorageError::DatabaseError(err),
        })?;

        self.flush()
    }
}
