//! Short-TTL encrypted credential cache.
//!
//! Values are sealed under two independently derived AES-256-GCM keys, so
//! compromise of one derivation secret alone does not expose cached
//! credentials. Lookups are content-addressed under two SHA-256 hashed
//! keys (one per secret); reads recompute both and prefer the newer entry
//! when both resolve. An in-process bounded tier fronts an optional
//! distributed store.

use std::sync::Arc;
use std::time::Duration;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ApiKey;

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// A sealed cache entry: ciphertext plus the write timestamp used to pick
/// the newer of two encodings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedEntry {
    /// `nonce2 || enc_k2(nonce1 || enc_k1(plaintext))`
    pub ciphertext: Vec<u8>,
    /// Milliseconds since the epoch at seal time.
    pub stored_at: i64,
    /// Milliseconds since the epoch when this entry expires.
    pub expires_at: i64,
}

impl SealedEntry {
    fn expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }
}

/// Distributed backing store for sealed entries.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<SealedEntry>;
    async fn put(&self, key: &str, entry: SealedEntry, ttl: Duration);
}

/// Two-key-hashed, double-encrypted cache.
pub struct SecureKeyCache {
    key_primary: [u8; 32],
    key_secondary: [u8; 32],
    ttl: Duration,
    max_entries: usize,
    local: DashMap<String, SealedEntry>,
    store: Option<Arc<dyn CacheStore>>,
}

impl SecureKeyCache {
    pub fn new(
        secret_primary: &ApiKey,
        secret_secondary: &ApiKey,
        max_entries: usize,
        ttl: Duration,
        store: Option<Arc<dyn CacheStore>>,
    ) -> Self {
        Self {
            key_primary: derive_key(secret_primary.expose_secret()),
            key_secondary: derive_key(secret_secondary.expose_secret()),
            ttl,
            max_entries,
            local: DashMap::new(),
            store,
        }
    }

    /// Fetch and decrypt a value, consulting the in-process tier first and
    /// falling back to the distributed store. Both hashed keys are checked;
    /// the newest decryptable entry wins.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let hashes = self.hashed_keys(key);
        let now = now_ms();

        let mut candidates: Vec<SealedEntry> = Vec::new();
        for hashed in &hashes {
            if let Some(entry) = self.local.get(hashed) {
                if entry.expired(now) {
                    drop(entry);
                    self.local.remove(hashed);
                } else {
                    candidates.push(entry.value().clone());
                }
            }
        }
        if candidates.is_empty() {
            if let Some(store) = &self.store {
                for hashed in &hashes {
                    if let Some(entry) = store.get(hashed).await {
                        if !entry.expired(now) {
                            candidates.push(entry);
                        }
                    }
                }
            }
        }

        candidates.sort_by_key(|entry| std::cmp::Reverse(entry.stored_at));
        for entry in candidates {
            if let Some(plaintext) = self.unseal(&entry) {
                if let Ok(value) = serde_json::from_slice(&plaintext) {
                    return Some(value);
                }
            }
        }
        None
    }

    /// Seal and store a value under both hashed keys, in both tiers.
    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) {
        let Ok(plaintext) = serde_json::to_vec(value) else {
            return;
        };
        let Some(entry) = self.seal(&plaintext) else {
            tracing::warn!("Failed to seal cache entry, skipping write");
            return;
        };

        for hashed in self.hashed_keys(key) {
            self.insert_local(hashed.clone(), entry.clone());
            if let Some(store) = &self.store {
                store.put(&hashed, entry.clone(), self.ttl).await;
            }
        }
    }

    /// Both content-addressed lookup keys for a logical key.
    fn hashed_keys(&self, key: &str) -> [String; 2] {
        [
            hashed_lookup_key(&self.key_primary, key),
            hashed_lookup_key(&self.key_secondary, key),
        ]
    }

    fn insert_local(&self, hashed: String, entry: SealedEntry) {
        let now = now_ms();
        if self.local.len() >= self.max_entries {
            self.local.retain(|_, e| !e.expired(now));
        }
        if self.local.len() >= self.max_entries {
            // Still full after purging: evict the oldest entry.
            let oldest = self
                .local
                .iter()
                .min_by_key(|e| e.stored_at)
                .map(|e| e.key().clone());
            if let Some(oldest) = oldest {
                self.local.remove(&oldest);
            }
        }
        self.local.insert(hashed, entry);
    }

    fn seal(&self, plaintext: &[u8]) -> Option<SealedEntry> {
        let inner = encrypt(&self.key_primary, plaintext)?;
        let outer = encrypt(&self.key_secondary, &inner)?;
        let now = now_ms();
        Some(SealedEntry {
            ciphertext: outer,
            stored_at: now,
            expires_at: now + self.ttl.as_millis() as i64,
        })
    }

    fn unseal(&self, entry: &SealedEntry) -> Option<Vec<u8>> {
        let inner = decrypt(&self.key_secondary, &entry.ciphertext)?;
        decrypt(&self.key_primary, &inner)
    }
}

/// Derive an AES-256 key from a secret.
fn derive_key(secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

/// Hex SHA-256 of derivation-key material concatenated with the logical key.
fn hashed_lookup_key(key: &[u8; 32], logical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(logical.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Option<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher.encrypt(&nonce, plaintext).ok()?;
    let mut out = nonce.to_vec();
    out.extend_from_slice(&ciphertext);
    Some(out)
}

fn decrypt(key: &[u8; 32], sealed: &[u8]) -> Option<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return None;
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(&sealed[..NONCE_LEN]);
    cipher.decrypt(nonce, &sealed[NONCE_LEN..]).ok()
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
