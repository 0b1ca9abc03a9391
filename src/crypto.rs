//! Content encryption (§4.3 stage contract): an `EncryptionProvider` trait and
//! an AES-256-GCM default implementation.
//!
//! Nonces are derived deterministically from `(content_id, chunk_index)`
//! rather than drawn from an RNG, so re-running the encrypt stage after a
//! retry produces byte-identical ciphertext instead of a fresh one — the
//! pipeline stage contract requires idempotent retries.

use crate::error::{CdeError, Result};
use crate::types::{ChunkIndex, ContentId};
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use zeroize::{Zeroize, ZeroizeOnDrop};

const NONCE_DOMAIN: &[u8] = b"cde-chunk-nonce-v1";

/// Symmetric key wrapper that zeroes its bytes on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive a key deterministically from content bytes (content-addressed
    /// default; callers MAY supply their own externally-managed key instead).
    pub fn derive_from_content(content: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"cde-content-key-v1");
        hasher.update(content);
        Self(*hasher.finalize().as_bytes())
    }

    pub fn random() -> Self {
        use rand::RngCore;
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self(key)
    }
}

/// Derive the deterministic per-chunk nonce: `blake3(domain || content_id ||
/// chunk_index)` truncated to the 12 bytes AES-GCM requires.
pub fn derive_nonce(content_id: &ContentId, chunk_index: ChunkIndex) -> [u8; 12] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(NONCE_DOMAIN);
    hasher.update(content_id.as_bytes());
    hasher.update(&chunk_index.to_le_bytes());
    let hash = hasher.finalize();
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&hash.as_bytes()[..12]);
    nonce
}

/// AEAD provider abstraction so the pipeline isn't tied to a single cipher.
pub trait EncryptionProvider: Send + Sync {
    fn encrypt_chunk(
        &self,
        content_id: &ContentId,
        chunk_index: ChunkIndex,
        key: &EncryptionKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>>;

    fn decrypt_chunk(
        &self,
        content_id: &ContentId,
        chunk_index: ChunkIndex,
        key: &EncryptionKey,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>>;
}

/// Default provider: AES-256-GCM with the deterministic nonce above.
#[derive(Debug, Default)]
pub struct AesGcmProvider;

impl EncryptionProvider for AesGcmProvider {
    fn encrypt_chunk(
        &self,
        content_id: &ContentId,
        chunk_index: ChunkIndex,
        key: &EncryptionKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        let nonce_bytes = derive_nonce(content_id, chunk_index);
        let nonce = Nonce::from_slice(&nonce_bytes);

        cipher.encrypt(nonce, plaintext).map_err(|_| CdeError::CryptoFailure {
            content_id: *content_id,
            message: "AES-256-GCM encryption failed".to_string(),
        })
    }

    fn decrypt_chunk(
        &self,
        content_id: &ContentId,
        chunk_index: ChunkIndex,
        key: &EncryptionKey,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        let nonce_bytes = derive_nonce(content_id, chunk_index);
        let nonce = Nonce::from_slice(&nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CdeError::DecryptFailure {
                content_id: *content_id,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let provider = AesGcmProvider;
        let cid = ContentId::new([7u8; 16]);
        let key = EncryptionKey::derive_from_content(b"hello world");
        let plaintext = b"the quick brown fox";

        let ciphertext = provider.encrypt_chunk(&cid, 3, &key, plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);

        let decrypted = provider.decrypt_chunk(&cid, 3, &key, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn nonce_is_deterministic_per_content_and_chunk() {
        let cid = ContentId::new([1u8; 16]);
        assert_eq!(derive_nonce(&cid, 5), derive_nonce(&cid, 5));
        assert_ne!(derive_nonce(&cid, 5), derive_nonce(&cid, 6));
    }

    #[test]
    fn re_encrypting_same_chunk_is_idempotent() {
        let provider = AesGcmProvider;
        let cid = ContentId::new([2u8; 16]);
        let key = EncryptionKey::derive_from_content(b"x");
        let a = provider.encrypt_chunk(&cid, 0, &key, b"payload").unwrap();
        let b = provider.encrypt_chunk(&cid, 0, &key, b"payload").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let provider = AesGcmProvider;
        let cid = ContentId::new([3u8; 16]);
        let key = EncryptionKey::derive_from_content(b"a");
        let other_key = EncryptionKey::derive_from_content(b"b");
        let ciphertext = provider.encrypt_chunk(&cid, 0, &key, b"data").unwrap();
        assert!(provider.decrypt_chunk(&cid, 0, &other_key, &ciphertext).is_err());
    }
}
