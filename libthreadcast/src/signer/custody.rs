//! Application custody key and signed key request digests
//!
//! The application's custody key (secp256k1) vouches for every signer key it
//! requests. The signature covers the EIP-712 typed-data digest of
//! `SignedKeyRequest{requestFid, key, deadline}` under the key request
//! validator's domain, which is what the authority recovers the custody
//! address from. Every hash is keccak-256.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use zeroize::Zeroizing;

use crate::error::{CredentialError, Result, ThreadcastError};

pub const DOMAIN_NAME: &str = "Farcaster SignedKeyRequestValidator";
pub const DOMAIN_VERSION: &str = "1";
pub const DOMAIN_CHAIN_ID: u64 = 10;
pub const DOMAIN_VERIFYING_CONTRACT: &str = "0x00000000fc700472606ed4fa22623acf62c60553";

const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const SIGNED_KEY_REQUEST_TYPE: &str =
    "SignedKeyRequest(uint256 requestFid,bytes key,uint256 deadline)";

pub struct CustodySigner {
    signing_key: SigningKey,
}

impl CustodySigner {
    pub fn new(private_key: &[u8]) -> Result<Self> {
        if private_key.len() != 32 {
            return Err(CredentialError::InvalidKeyMaterial(
                "Custody key must be exactly 32 bytes".to_string(),
            )
            .into());
        }
        let signing_key = SigningKey::from_slice(private_key)
            .map_err(|e| CredentialError::InvalidKeyMaterial(format!("Invalid custody key: {}", e)))?;
        Ok(Self { signing_key })
    }

    /// Hex-encoded key, with or without `0x`
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let trimmed = hex_key.trim();
        let raw = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = Zeroizing::new(hex::decode(raw).map_err(|e| {
            CredentialError::InvalidKeyMaterial(format!("Invalid hex custody key: {}", e))
        })?);
        Self::new(&bytes)
    }

    /// Random key, for tests and local development
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Compressed SEC1 public key, hex-encoded
    pub fn public_key_hex(&self) -> String {
        let point = self.signing_key.verifying_key().to_encoded_point(true);
        hex::encode(point.as_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        *self.signing_key.verifying_key()
    }

    /// Sign the request digest. Returns `0x` + hex of `r || s || v`, with
    /// `v = 27 + recovery id`.
    pub fn sign_key_request(&self, request_fid: u64, key: &[u8], deadline: i64) -> Result<String> {
        let digest = key_request_digest(request_fid, key, deadline);
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(&digest)
            .map_err(|e| ThreadcastError::SignerRequestFailed(format!("Signing failed: {}", e)))?;

        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(27 + recovery_id.to_byte());
        Ok(format!("0x{}", hex::encode(bytes)))
    }
}

fn word_u64(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Domain separator for the signed key request validator
pub fn domain_separator() -> [u8; 32] {
    // 20-byte address, left-padded to a word
    let mut address = [0u8; 32];
    if let Ok(contract) = hex::decode(DOMAIN_VERIFYING_CONTRACT.trim_start_matches("0x")) {
        if contract.len() == 20 {
            address[12..].copy_from_slice(&contract);
        }
    }

    let mut hasher = Keccak256::new();
    hasher.update(keccak256(DOMAIN_TYPE.as_bytes()));
    hasher.update(keccak256(DOMAIN_NAME.as_bytes()));
    hasher.update(keccak256(DOMAIN_VERSION.as_bytes()));
    hasher.update(word_u64(DOMAIN_CHAIN_ID));
    hasher.update(address);
    hasher.finalize().into()
}

/// Digest signed by the custody key: `keccak256(0x1901 || domain || structHash)`
pub fn key_request_digest(request_fid: u64, key: &[u8], deadline: i64) -> [u8; 32] {
    // `bytes` members are hashed in place
    let mut struct_hasher = Keccak256::new();
    struct_hasher.update(keccak256(SIGNED_KEY_REQUEST_TYPE.as_bytes()));
    struct_hasher.update(word_u64(request_fid));
    struct_hasher.update(keccak256(key));
    struct_hasher.update(word_u64(deadline.max(0) as u64));
    let struct_hash: [u8; 32] = struct_hasher.finalize().into();

    let mut hasher = Keccak256::new();
    hasher.update([0x19, 0x01]);
    hasher.update(domain_separator());
    hasher.update(struct_hash);
    hasher.finalize().into()
}

/// Recover the custody public key from a signature produced by
/// [`CustodySigner::sign_key_request`]
pub fn recover_custody_key(
    request_fid: u64,
    key: &[u8],
    deadline: i64,
    signature_hex: &str,
) -> Option<VerifyingKey> {
    let bytes = hex::decode(signature_hex.trim_start_matches("0x")).ok()?;
    if bytes.len() != 65 {
        return None;
    }
    let signature = Signature::from_slice(&bytes[..64]).ok()?;
    let recovery_id = RecoveryId::from_byte(bytes[64].checked_sub(27)?)?;
    let digest = key_request_digest(request_fid, key, deadline);
    VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id).ok()
}
