use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::crypto::sha256_hex;
use super::transaction::{CanonicalSignedTransaction, Transaction};

/// Proof stored in the genesis block
pub const GENESIS_PROOF: u64 = 100;

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Index of the block in the chain
    index: u64,

    /// Hash of the previous block, empty for genesis
    previous_hash: String,

    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    timestamp: DateTime<Utc>,

    /// Transactions in insertion order; a mined block carries its reward last
    transactions: Vec<Transaction>,

    /// Proof of work (nonce)
    proof: u64,
}

/// Hash input for a block. Key order is fixed by declaration order.
#[derive(Serialize)]
struct CanonicalBlock<'a> {
    index: u64,
    previous_hash: &'a str,
    timestamp: String,
    proof: u64,
    transactions: Vec<CanonicalSignedTransaction<'a>>,
}

impl Block {
    /// The fixed first block shared by every node
    pub fn genesis() -> Self {
        Block {
            index: 0,
            previous_hash: String::new(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            transactions: Vec::new(),
            proof: GENESIS_PROOF,
        }
    }

    /// Builds a freshly mined block.
    ///
    /// The reward is always placed after the body, so [`Block::body`] yields
    /// exactly the transactions the proof was solved over.
    ///
    /// # Arguments
    ///
    /// * `index` - The index of the block in the chain
    /// * `previous_hash` - The hash of the previous block
    /// * `body` - The pending transactions the proof was computed over
    /// * `reward` - The mining reward transaction
    /// * `proof` - The proof of work (nonce)
    pub fn mined(
        index: u64,
        previous_hash: String,
        body: Vec<Transaction>,
        reward: Transaction,
        proof: u64,
    ) -> Self {
        let mut transactions = body;
        transactions.push(reward);

        Block {
            index,
            previous_hash,
            timestamp: Utc::now(),
            transactions,
            proof,
        }
    }

    /// Reassembles a block from its parts, e.g. when rebuilding one received
    /// from a peer. No validation happens here.
    pub fn from_parts(
        index: u64,
        previous_hash: String,
        timestamp: DateTime<Utc>,
        transactions: Vec<Transaction>,
        proof: u64,
    ) -> Self {
        Block {
            index,
            previous_hash,
            timestamp,
            transactions,
            proof,
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn proof(&self) -> u64 {
        self.proof
    }

    /// Every transaction except the trailing reward
    pub fn body(&self) -> &[Transaction] {
        match self.transactions.split_last() {
            Some((_, body)) => body,
            None => &[],
        }
    }

    /// The trailing reward transaction, if any
    pub fn reward(&self) -> Option<&Transaction> {
        self.transactions.last()
    }

    /// Calculates the hash of the block
    ///
    /// # Returns
    ///
    /// The SHA-256 hash of the canonical block form as a hexadecimal string
    pub fn calculate_hash(&self) -> String {
        let canonical = CanonicalBlock {
            index: self.index,
            previous_hash: &self.previous_hash,
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            proof: self.proof,
            transactions: self
                .transactions
                .iter()
                .map(Transaction::canonical_signed)
                .collect(),
        };

        // Plain strings and numbers only; serialization cannot fail.
        let block_string = serde_json::to_string(&canonical).unwrap_or_default();

        sha256_hex(block_string.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Address;

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis();

        assert_eq!(genesis.index(), 0);
        assert_eq!(genesis.previous_hash(), "");
        assert_eq!(genesis.proof(), GENESIS_PROOF);
        assert_eq!(genesis.timestamp().timestamp(), 0);
        assert!(genesis.transactions().is_empty());
        assert!(genesis.body().is_empty());
        assert!(genesis.reward().is_none());

        // Every node derives the same genesis hash
        assert_eq!(genesis.calculate_hash(), Block::genesis().calculate_hash());
    }

    #[test]
    fn test_mined_block_places_reward_last() {
        let body = vec![Transaction::reward(Address("recipient1".to_string()), 10.0)];
        let reward = Transaction::reward(Address("miner".to_string()), 10.0);

        let block = Block::mined(1, "previous_hash".to_string(), body.clone(), reward.clone(), 100);

        assert_eq!(block.index(), 1);
        assert_eq!(block.proof(), 100);
        assert_eq!(block.previous_hash(), "previous_hash");
        assert_eq!(block.body(), body.as_slice());
        assert_eq!(block.reward(), Some(&reward));
        assert_eq!(block.transactions().len(), 2);
    }

    #[test]
    fn test_calculate_hash() {
        let reward = Transaction::reward(Address("recipient".to_string()), 10.0);
        let block = Block::mined(1, "previous_hash".to_string(), Vec::new(), reward, 100);

        let hash = block.calculate_hash();
        assert_eq!(hash.len(), 64); // SHA-256 hash is 64 characters in hex
        assert_eq!(hash, block.clone().calculate_hash());
    }

    #[test]
    fn test_hash_covers_proof_and_linkage() {
        let reward = Transaction::reward(Address("recipient".to_string()), 10.0);
        let block = Block::mined(1, "abc".to_string(), Vec::new(), reward, 7);

        let other_proof = Block::from_parts(
            block.index(),
            block.previous_hash().to_string(),
            block.timestamp(),
            block.transactions().to_vec(),
            8,
        );
        let other_link = Block::from_parts(
            block.index(),
            "abd".to_string(),
            block.timestamp(),
            block.transactions().to_vec(),
            7,
        );

        assert_ne!(block.calculate_hash(), other_proof.calculate_hash());
        assert_ne!(block.calculate_hash(), other_link.calculate_hash());
    }

    #[test]
    fn test_hash_survives_json_round_trip() {
        let reward = Transaction::reward(Address("recipient".to_string()), 10.0);
        let block = Block::mined(3, "abc".to_string(), Vec::new(), reward, 42);

        let wire = serde_json::to_string(&block).unwrap();
        let received: Block = serde_json::from_str(&wire).unwrap();

        assert_eq!(received, block);
        assert_eq!(received.calculate_hash(), block.calculate_hash());
    }
}
