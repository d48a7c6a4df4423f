//! Encryption of credentials at rest
//!
//! Every access token, refresh token and signer private key is stored as
//! base64-encoded age ciphertext addressed to a single process-wide X25519
//! identity. The identity is read from the environment at startup.

use std::io::{Read, Write};
use std::iter;
use std::str::FromStr;

use age::secrecy::ExposeSecret as _;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::SecretString;
use zeroize::Zeroize;

use crate::config::secret_from_env;
use crate::error::{CredentialError, Result};

/// Symmetric-to-the-caller wrapper around an age identity
#[derive(Clone)]
pub struct TokenCipher {
    identity: age::x25519::Identity,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher")
            .field("recipient", &self.identity.to_public().to_string())
            .finish()
    }
}

impl TokenCipher {
    /// Parse an `AGE-SECRET-KEY-1...` identity
    pub fn from_secret(secret: &SecretString) -> Result<Self> {
        use secrecy::ExposeSecret;
        let identity = age::x25519::Identity::from_str(secret.expose_secret().trim())
            .map_err(|e| CredentialError::InvalidKey(e.to_string()))?;
        Ok(Self { identity })
    }

    /// Load the identity from the named environment variable
    pub fn from_env(var: &str) -> Result<Self> {
        let secret = secret_from_env(var).ok_or_else(|| CredentialError::KeyNotSet(var.to_string()))?;
        Self::from_secret(&secret)
    }

    /// Fresh random identity. Used by `tcast-creds keygen` and tests.
    pub fn generate() -> Self {
        Self {
            identity: age::x25519::Identity::generate(),
        }
    }

    /// The identity in its `AGE-SECRET-KEY-1...` form
    pub fn export_secret(&self) -> SecretString {
        SecretString::from(self.identity.to_string().expose_secret().clone())
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let recipient: Box<dyn age::Recipient + Send> = Box::new(self.identity.to_public());
        let encryptor = age::Encryptor::with_recipients(vec![recipient])
            .ok_or_else(|| CredentialError::Encryption("no recipients".to_string()))?;

        let mut encrypted = vec![];
        let mut writer = encryptor
            .wrap_output(&mut encrypted)
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;
        writer
            .write_all(plaintext.as_bytes())
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;
        writer
            .finish()
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;

        Ok(STANDARD.encode(encrypted))
    }

    /// Every failure mode (bad base64, wrong identity, truncated or tampered
    /// ciphertext, invalid UTF-8) is reported as `DecryptionFailed`.
    pub fn decrypt(&self, ciphertext: &str) -> Result<SecretString> {
        let data = STANDARD
            .decode(ciphertext.trim())
            .map_err(|_| CredentialError::DecryptionFailed)?;

        let decryptor = match age::Decryptor::new(&data[..]) {
            Ok(age::Decryptor::Recipients(d)) => d,
            _ => return Err(CredentialError::DecryptionFailed.into()),
        };

        let mut reader = decryptor
            .decrypt(iter::once(&self.identity as &dyn age::Identity))
            .map_err(|_| CredentialError::DecryptionFailed)?;

        let mut decrypted = vec![];
        if reader.read_to_end(&mut decrypted).is_err() {
            decrypted.zeroize();
            return Err(CredentialError::DecryptionFailed.into());
        }

        match String::from_utf8(decrypted) {
            Ok(plaintext) => Ok(SecretString::from(plaintext)),
            Err(e) => {
                e.into_bytes().zeroize();
                Err(CredentialError::DecryptionFailed.into())
            }
        }
    }

    /// Encrypt raw key bytes (signer private keys)
    pub fn encrypt_bytes(&self, bytes: &[u8]) -> Result<String> {
        let mut encoded = hex::encode(bytes);
        let result = self.encrypt(&encoded);
        encoded.zeroize();
        result
    }

    pub fn decrypt_bytes(&self, ciphertext: &str) -> Result<Vec<u8>> {
        use secrecy::ExposeSecret;
        let plaintext = self.decrypt(ciphertext)?;
        hex::decode(plaintext.expose_secret())
            .map_err(|_| CredentialError::DecryptionFailed.into())
    }
}
