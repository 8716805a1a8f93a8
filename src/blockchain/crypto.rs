use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),

    #[error("Wallet file error: {0}")]
    WalletFile(#[from] std::io::Error),
}

/// Returns the lowercase hex SHA-256 digest of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Represents a wallet address (public key in base58 format)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    /// Creates a new address from a public key
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        let bytes = public_key.as_bytes();
        let encoded = bs58::encode(bytes).into_string();
        Address(encoded)
    }

    /// Converts the address to a public key
    pub fn to_public_key(&self) -> Result<VerifyingKey, CryptoError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        VerifyingKey::from_bytes(&bytes.try_into().map_err(|_| {
            CryptoError::InvalidPublicKey("Invalid public key bytes".to_string())
        })?)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parses an address, accepting only base58 strings that decode to a valid
/// ed25519 public key
impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = Address(s.trim().to_string());
        address.to_public_key()?;
        Ok(address)
    }
}

/// Represents a digital signature, base58 encoded.
///
/// The empty signature is reserved for the mining reward.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    /// Creates a new digital signature from a signature
    pub fn from_signature(signature: &Signature) -> Self {
        let bytes = signature.to_bytes();
        let encoded = bs58::encode(bytes).into_string();
        DigitalSignature(encoded)
    }

    /// Converts the digital signature to a signature
    pub fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let signature_bytes: [u8; 64] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidSignature("Invalid signature length".to_string())
        })?;

        Ok(Signature::from_bytes(&signature_bytes))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Verifies signatures on behalf of the ledger.
///
/// The public key is the sender's address; the message is the canonical
/// transaction encoding.
pub trait Signer: Send + Sync {
    fn verify(&self, public_key: &Address, message: &[u8], signature: &DigitalSignature) -> bool;
}

/// ed25519 implementation of [`Signer`]
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Signer;

impl Signer for Ed25519Signer {
    fn verify(&self, public_key: &Address, message: &[u8], signature: &DigitalSignature) -> bool {
        let public_key = match public_key.to_public_key() {
            Ok(key) => key,
            Err(_) => return false,
        };

        verify_signature(message, signature, &public_key).unwrap_or(false)
    }
}

/// Represents a wallet with a keypair
#[derive(Debug, Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    address: Address,
}

impl Wallet {
    /// Creates a new wallet with a random keypair
    pub fn new() -> Self {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        Self::from_signing_key(signing_key)
    }

    /// Creates a wallet from an existing secret key
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_array: [u8; 32] = secret_key_bytes.try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey("Invalid private key length".to_string())
        })?;

        Ok(Self::from_signing_key(SigningKey::from_bytes(&bytes_array)))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = VerifyingKey::from(&signing_key);
        let address = Address::from_public_key(&verifying_key);

        Wallet {
            signing_key,
            verifying_key,
            address,
        }
    }

    /// Loads a wallet written by [`Wallet::save`].
    ///
    /// The file holds the address on the first line and the hex secret key
    /// on the second. A key that does not match the stored address is
    /// rejected.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CryptoError> {
        let contents = fs::read_to_string(path)?;
        let mut lines = contents.lines();

        let address = lines
            .next()
            .ok_or_else(|| CryptoError::InvalidPublicKey("Missing address line".to_string()))?;
        let secret_hex = lines
            .next()
            .ok_or_else(|| CryptoError::InvalidPrivateKey("Missing secret key line".to_string()))?;

        let secret = hex::decode(secret_hex.trim())
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;
        let wallet = Self::from_secret_key(&secret)?;

        if wallet.address.0 != address.trim() {
            return Err(CryptoError::InvalidPrivateKey(
                "Secret key does not match stored address".to_string(),
            ));
        }

        Ok(wallet)
    }

    /// Writes the keypair to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CryptoError> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = format!(
            "{}\n{}\n",
            self.address,
            hex::encode(self.export_secret_key())
        );
        fs::write(path, contents)?;
        Ok(())
    }

    /// Gets the wallet's address
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Gets the wallet's public key
    pub fn public_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Signs a message with the wallet's private key
    pub fn sign(&self, message: &[u8]) -> DigitalSignature {
        let signature = self.signing_key.sign(message);
        DigitalSignature::from_signature(&signature)
    }

    /// Exports the wallet's secret key as bytes
    pub fn export_secret_key(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Verifies a signature against a message and public key
pub fn verify_signature(
    message: &[u8],
    signature: &DigitalSignature,
    public_key: &VerifyingKey,
) -> Result<bool, CryptoError> {
    let signature = signature.to_signature()?;

    Ok(public_key.verify(message, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_wallet_creation() {
        let wallet = Wallet::new();
        assert!(!wallet.address.0.is_empty());
    }

    #[test]
    fn test_signing_and_verification() {
        let wallet = Wallet::new();
        let message = b"Hello, world!";

        let signature = wallet.sign(message);

        let result = verify_signature(message, &signature, wallet.public_key()).unwrap();
        assert!(result);

        // Verify with wrong message
        let wrong_message = b"Wrong message";
        let result = verify_signature(wrong_message, &signature, wallet.public_key()).unwrap();
        assert!(!result);
    }

    #[test]
    fn test_signer_rejects_foreign_key() {
        let wallet = Wallet::new();
        let other = Wallet::new();
        let signature = wallet.sign(b"payload");

        assert!(Ed25519Signer.verify(wallet.address(), b"payload", &signature));
        assert!(!Ed25519Signer.verify(other.address(), b"payload", &signature));
        assert!(!Ed25519Signer.verify(wallet.address(), b"payload", &DigitalSignature::default()));
        assert!(!Ed25519Signer.verify(&Address("MINING".to_string()), b"payload", &signature));
    }

    #[test]
    fn test_address_conversion() {
        let wallet = Wallet::new();
        let address = wallet.address();

        let public_key = address.to_public_key().unwrap();

        assert_eq!(public_key.as_bytes(), wallet.public_key().as_bytes());
        assert_eq!(&address.as_str().parse::<Address>().unwrap(), address);
    }

    #[test]
    fn test_undecodable_addresses_do_not_parse() {
        // Not base58
        assert!("not-an-address!".parse::<Address>().is_err());
        // Valid base58, wrong length for a public key
        assert!("bob".parse::<Address>().is_err());
        assert!("MINING".parse::<Address>().is_err());
    }

    #[test]
    fn test_wallet_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.txt");

        let wallet = Wallet::new();
        wallet.save(&path).unwrap();

        let loaded = Wallet::load(&path).unwrap();
        assert_eq!(loaded.address(), wallet.address());
        assert_eq!(loaded.export_secret_key(), wallet.export_secret_key());
    }

    #[test]
    fn test_wallet_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = Wallet::load(dir.path().join("absent.txt"));
        assert!(matches!(result, Err(CryptoError::WalletFile(_))));
    }
}
