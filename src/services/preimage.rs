use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Fresh (preimage, payment_hash) pair for a new HODL invoice.
pub fn generate_preimage_pair() -> ([u8; 32], [u8; 32]) {
    let mut preimage = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut preimage);
    let hash: [u8; 32] = Sha256::digest(preimage).into();
    (preimage, hash)
}

#[derive(Debug, Clone)]
struct PreimageEntry {
    preimage: String,
    expires_at: Instant,
}

/// Payment-hash → preimage map with per-entry expiry. All access goes
/// through the mutex; the transfer-monitor heartbeat sweeps expired
/// entries.
pub struct PreimageCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, PreimageEntry>>,
}

impl PreimageCache {
    pub fn new(ttl: Duration) -> Self {
        PreimageCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, payment_hash: &str, preimage_hex: &str) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            payment_hash.to_string(),
            PreimageEntry {
                preimage: preimage_hex.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub async fn get(&self, payment_hash: &str) -> Option<String> {
        let entries = self.entries.lock().await;
        entries.get(payment_hash).and_then(|e| {
            if e.expires_at > Instant::now() {
                Some(e.preimage.clone())
            } else {
                None
            }
        })
    }

    /// Returns the cached preimage, deriving a deterministic-looking
    /// one from the hash plus fresh entropy when none is cached. A
    /// derived preimage cannot release a real HODL invoice; it only
    /// lets internal settlements carry a preimage field.
    pub async fn get_or_generate(&self, payment_hash: &str) -> String {
        let mut entries = self.entries.lock().await;
        if let Some(e) = entries.get(payment_hash) {
            if e.expires_at > Instant::now() {
                return e.preimage.clone();
            }
        }

        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let mut hasher = Sha256::new();
        hasher.update(payment_hash.as_bytes());
        hasher.update(salt);
        hasher.update(chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0).to_be_bytes());
        let preimage = hex::encode(hasher.finalize());

        entries.insert(
            payment_hash.to_string(),
            PreimageEntry {
                preimage: preimage.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        preimage
    }

    /// Drops expired entries; returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// script_key hex → payment_hash, populated while watching accepted
/// HTLCs and consumed by the heartbeat rescan.
#[derive(Default)]
pub struct ScriptKeyIndex {
    entries: Mutex<HashMap<String, String>>,
}

impl ScriptKeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, script_key: &str, payment_hash: &str) {
        let mut entries = self.entries.lock().await;
        entries.insert(script_key.to_string(), payment_hash.to_string());
    }

    pub async fn get(&self, script_key: &str) -> Option<String> {
        self.entries.lock().await.get(script_key).cloned()
    }

    pub async fn remove(&self, script_key: &str) -> Option<String> {
        self.entries.lock().await.remove(script_key)
    }

    /// Snapshot of all tracked payment hashes.
    pub async fn payment_hashes(&self) -> Vec<String> {
        self.entries.lock().await.values().cloned().collect()
    }
}
