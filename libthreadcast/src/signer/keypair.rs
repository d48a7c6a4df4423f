//! Ed25519 signer keys
//!
//! A signer key is generated locally, submitted for approval by its public
//! half only, and persisted encrypted. Once approved it signs casts on the
//! user's behalf.

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::{CredentialError, Result};

pub struct SignerKeypair {
    signing_key: SigningKey,
}

impl SignerKeypair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore from the 32-byte secret
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let secret: [u8; 32] = bytes.try_into().map_err(|_| {
            CredentialError::InvalidKeyMaterial(format!(
                "Signer key must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        let secret = Zeroizing::new(secret);
        Ok(Self {
            signing_key: SigningKey::from_bytes(&secret),
        })
    }

    /// Restore from hex, with or without a `0x` prefix
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let trimmed = hex_key.trim();
        let raw = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = Zeroizing::new(hex::decode(raw).map_err(|e| {
            CredentialError::InvalidKeyMaterial(format!("Invalid hex signer key: {}", e))
        })?);
        Self::from_bytes(&bytes)
    }

    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }

    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.signing_key.to_bytes()))
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// `0x`-prefixed lowercase hex of the public key
    pub fn public_key_hex(&self) -> String {
        format!("0x{}", hex::encode(self.public_key_bytes()))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}
