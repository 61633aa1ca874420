//! Collaborator Interfaces
//!
//! The ledger never looks inside payloads. Sensitive bytes are encrypted by
//! an `EncryptionVault` before hashing, and raw identifiers are swapped for
//! opaque tokens by a `Tokenizer` before callers build an event.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{LedgerError, LedgerResult};

type HmacSha256 = Hmac<Sha256>;

#[async_trait]
pub trait EncryptionVault: Send + Sync {
    async fn encrypt(&self, tenant_id: &str, plaintext: &[u8]) -> LedgerResult<Vec<u8>>;

    /// Never called by the ledger itself; readers of `read_range` decrypt
    /// on their own side.
    async fn decrypt(&self, tenant_id: &str, ciphertext: &[u8]) -> LedgerResult<Vec<u8>>;
}

/// Identity vault for development and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughVault;

#[async_trait]
impl EncryptionVault for PassthroughVault {
    async fn encrypt(&self, _tenant_id: &str, plaintext: &[u8]) -> LedgerResult<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    async fn decrypt(&self, _tenant_id: &str, ciphertext: &[u8]) -> LedgerResult<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}

pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, tenant_id: &str, raw_value: &str, data_type: &str) -> LedgerResult<String>;
}

/// Deterministic tokenizer: `tok_<hex>` of an HMAC-SHA256 over tenant,
/// data type and value. The same input always maps to the same token within
/// a tenant, so tokens can still be joined on.
#[derive(Clone)]
pub struct DigestTokenizer {
    key: Vec<u8>,
}

impl DigestTokenizer {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }
}

impl Tokenizer for DigestTokenizer {
    fn tokenize(&self, tenant_id: &str, raw_value: &str, data_type: &str) -> LedgerResult<String> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| LedgerError::VaultError(e.to_string()))?;
        for part in [tenant_id.as_bytes(), data_type.as_bytes(), raw_value.as_bytes()] {
            mac.update(&(part.len() as u64).to_be_bytes());
            mac.update(part);
        }
        let digest = mac.finalize().into_bytes();
        Ok(format!("tok_{}", hex::encode(&digest[..16])))
    }
}
