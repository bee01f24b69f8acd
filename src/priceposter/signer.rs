//! Transaction signing capability
//!
//! Key custody lives outside the feeder; this only turns a hex secret into a
//! secp256k1 signer over SHA-256 sign bytes.

use ethers::core::k256::ecdsa::{signature::Signer, Signature, SigningKey};

use crate::error::SignError;

/// Signs transaction sign bytes on behalf of the feeder account
pub trait TxSigner: Send + Sync {
    /// Compressed secp256k1 public key
    fn public_key(&self) -> Vec<u8>;

    fn sign(&self, sign_bytes: &[u8]) -> Result<Vec<u8>, SignError>;
}

pub struct LocalKeySigner {
    key: SigningKey,
}

impl LocalKeySigner {
    /// Parse a 32-byte hex secret, with or without `0x`
    pub fn from_hex(secret: &str) -> Result<Self, SignError> {
        let secret = secret.trim();
        let bytes = hex::decode(secret.strip_prefix("0x").unwrap_or(secret))
            .map_err(|e| SignError::InvalidKey(e.to_string()))?;
        let key = SigningKey::from_slice(&bytes).map_err(|e| SignError::InvalidKey(e.to_string()))?;
        Ok(Self { key })
    }
}

impl TxSigner for LocalKeySigner {
    fn public_key(&self) -> Vec<u8> {
        self.key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }

    fn sign(&self, sign_bytes: &[u8]) -> Result<Vec<u8>, SignError> {
        let signature: Signature = self
            .key
            .try_sign(sign_bytes)
            .map_err(|e| SignError::Signing(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }
}
