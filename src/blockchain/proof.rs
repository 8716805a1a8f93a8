use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use thiserror::Error;

use super::crypto::sha256_hex;
use super::transaction::{CanonicalTransaction, Transaction};

/// Number of leading `0` hex characters a valid proof hash carries
pub const DEFAULT_DIFFICULTY: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MiningError {
    #[error("Mining cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },
}

/// Proof-of-work puzzle over a block body and the previous block hash.
///
/// A nonce is valid when `sha256(canonical(body) ++ previous_hash ++ nonce)`
/// starts with `difficulty` zero hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofOfWork {
    difficulty: usize,
}

impl Default for ProofOfWork {
    fn default() -> Self {
        Self::new(DEFAULT_DIFFICULTY)
    }
}

impl ProofOfWork {
    pub fn new(difficulty: usize) -> Self {
        ProofOfWork { difficulty }
    }

    /// Searches nonces from 0 upward until one satisfies the target.
    ///
    /// `body` must not contain the reward. The loop is unbounded; it stops
    /// early only when `cancel` is set.
    pub fn solve(
        &self,
        body: &[Transaction],
        previous_hash: &str,
        cancel: &AtomicBool,
    ) -> Result<u64, MiningError> {
        let prefix = Self::prefix(body, previous_hash);
        let mut nonce = 0u64;

        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(MiningError::Cancelled { attempts: nonce });
            }

            if self.meets_target(&prefix, nonce) {
                debug!("Found proof {} for parent {}", nonce, previous_hash);
                return Ok(nonce);
            }

            nonce = nonce.wrapping_add(1);
        }
    }

    /// Checks a single nonce. Pure.
    pub fn verify(&self, body: &[Transaction], previous_hash: &str, nonce: u64) -> bool {
        self.meets_target(&Self::prefix(body, previous_hash), nonce)
    }

    fn prefix(body: &[Transaction], previous_hash: &str) -> String {
        let canonical: Vec<CanonicalTransaction<'_>> =
            body.iter().map(Transaction::canonical).collect();

        // Plain strings and numbers only; serialization cannot fail.
        let mut prefix = serde_json::to_string(&canonical).unwrap_or_default();
        prefix.push_str(previous_hash);
        prefix
    }

    fn meets_target(&self, prefix: &str, nonce: u64) -> bool {
        let guess = format!("{}{}", prefix, nonce);
        let hash = sha256_hex(guess.as_bytes());

        hash.bytes().take(self.difficulty).all(|b| b == b'0')
    }
}
