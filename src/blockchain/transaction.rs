use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::{Address, DigitalSignature, Wallet};

/// Reserved sender of the mining reward
pub const MINING_SENDER: &str = "MINING";

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("System error: {0}")]
    SystemError(String),
}

/// Represents a value transfer between two addresses.
///
/// Equality is structural over all four fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    sender: Address,
    recipient: Address,
    amount: f64,
    signature: DigitalSignature,
}

/// The signature-free form of a transaction, with a fixed key order:
/// `sender`, `recipient`, `amount`. Signing and proof-of-work both hash this.
#[derive(Serialize)]
pub(crate) struct CanonicalTransaction<'a> {
    sender: &'a str,
    recipient: &'a str,
    amount: f64,
}

/// Canonical form plus the signature, as committed to by the block hash
#[derive(Serialize)]
pub(crate) struct CanonicalSignedTransaction<'a> {
    sender: &'a str,
    recipient: &'a str,
    amount: f64,
    signature: &'a str,
}

impl Transaction {
    /// Creates a transaction carrying an existing signature
    ///
    /// # Arguments
    ///
    /// * `sender` - The address of the sender
    /// * `recipient` - The address of the recipient
    /// * `amount` - The amount to transfer, finite and non-negative
    /// * `signature` - The sender's signature over the canonical message
    pub fn new(
        sender: Address,
        recipient: Address,
        amount: f64,
        signature: DigitalSignature,
    ) -> Result<Self, TransactionError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(TransactionError::InvalidAmount(format!(
                "Amount must be a non-negative number: {}",
                amount
            )));
        }

        Ok(Transaction {
            sender,
            recipient,
            amount,
            signature,
        })
    }

    /// Creates and signs a transaction with `wallet` as the sender
    pub fn signed(wallet: &Wallet, recipient: Address, amount: f64) -> Result<Self, TransactionError> {
        let unsigned = Self::new(wallet.address().clone(), recipient, amount, DigitalSignature::default())?;
        let signature = wallet.sign(&unsigned.canonical_message()?);

        Ok(Transaction {
            signature,
            ..unsigned
        })
    }

    /// Creates the mining reward transaction
    ///
    /// # Arguments
    ///
    /// * `recipient` - The address of the miner
    /// * `amount` - The reward amount
    pub fn reward(recipient: Address, amount: f64) -> Self {
        Transaction {
            sender: Address(MINING_SENDER.to_string()),
            recipient,
            amount,
            signature: DigitalSignature::default(),
        }
    }

    pub fn sender(&self) -> &Address {
        &self.sender
    }

    pub fn recipient(&self) -> &Address {
        &self.recipient
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn signature(&self) -> &DigitalSignature {
        &self.signature
    }

    /// Checks if the transaction is a mining reward
    pub fn is_reward(&self) -> bool {
        self.sender.0 == MINING_SENDER
    }

    pub(crate) fn canonical(&self) -> CanonicalTransaction<'_> {
        CanonicalTransaction {
            sender: &self.sender.0,
            recipient: &self.recipient.0,
            amount: self.amount,
        }
    }

    pub(crate) fn canonical_signed(&self) -> CanonicalSignedTransaction<'_> {
        CanonicalSignedTransaction {
            sender: &self.sender.0,
            recipient: &self.recipient.0,
            amount: self.amount,
            signature: &self.signature.0,
        }
    }

    /// The bytes the sender signs
    pub fn canonical_message(&self) -> Result<Vec<u8>, TransactionError> {
        serde_json::to_vec(&self.canonical())
            .map_err(|e| TransactionError::SystemError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::{Ed25519Signer, Signer};

    #[test]
    fn test_new_transaction() {
        let sender_wallet = Wallet::new();
        let recipient_wallet = Wallet::new();

        let transaction = Transaction::new(
            sender_wallet.address().clone(),
            recipient_wallet.address().clone(),
            10.5,
            DigitalSignature::default(),
        )
        .unwrap();

        assert_eq!(transaction.sender(), sender_wallet.address());
        assert_eq!(transaction.recipient(), recipient_wallet.address());
        assert_eq!(transaction.amount(), 10.5);
        assert!(transaction.signature().is_empty());
        assert!(!transaction.is_reward());
    }

    #[test]
    fn test_rejects_negative_and_nan_amounts() {
        let sender = Address("a".to_string());
        let recipient = Address("b".to_string());

        assert!(Transaction::new(sender.clone(), recipient.clone(), -1.0, DigitalSignature::default()).is_err());
        assert!(Transaction::new(sender.clone(), recipient.clone(), f64::NAN, DigitalSignature::default()).is_err());
        assert!(Transaction::new(sender, recipient, 0.0, DigitalSignature::default()).is_ok());
    }

    #[test]
    fn test_sign_transaction() {
        let sender_wallet = Wallet::new();
        let recipient_wallet = Wallet::new();

        let transaction =
            Transaction::signed(&sender_wallet, recipient_wallet.address().clone(), 10.5).unwrap();

        assert!(!transaction.signature().is_empty());
        let message = transaction.canonical_message().unwrap();
        assert!(Ed25519Signer.verify(transaction.sender(), &message, transaction.signature()));
    }

    #[test]
    fn test_canonical_message_key_order() {
        let transaction = Transaction::new(
            Address("alice".to_string()),
            Address("bob".to_string()),
            2.5,
            DigitalSignature("sig".to_string()),
        )
        .unwrap();

        let message = String::from_utf8(transaction.canonical_message().unwrap()).unwrap();
        assert_eq!(message, r#"{"sender":"alice","recipient":"bob","amount":2.5}"#);
    }

    #[test]
    fn test_structural_equality() {
        let build = |signature: &str| {
            Transaction::new(
                Address("alice".to_string()),
                Address("bob".to_string()),
                1.0,
                DigitalSignature(signature.to_string()),
            )
            .unwrap()
        };

        assert_eq!(build("x"), build("x"));
        assert_ne!(build("x"), build("y"));
    }

    #[test]
    fn test_reward_transaction() {
        let miner_wallet = Wallet::new();

        let transaction = Transaction::reward(miner_wallet.address().clone(), 10.0);

        assert_eq!(transaction.sender().as_str(), MINING_SENDER);
        assert_eq!(transaction.recipient(), miner_wallet.address());
        assert_eq!(transaction.amount(), 10.0);
        assert!(transaction.signature().is_empty());
        assert!(transaction.is_reward());
    }
}
