//! Embedding function contract, deterministic default, and TTL cache.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Embedding function contract: deterministic text → fixed-dim vector.
pub type EmbeddingFn = Arc<dyn Fn(&str) -> Vec<f32> + Send + Sync>;

/// Default embedding dimension, matching common sentence-transformer models.
pub const DEFAULT_EMBEDDING_DIM: usize = 384;

/// Deterministic hash-derived unit vector.
///
/// Stands in for a real embedding model in tests and offline runs; identical
/// text always maps to the identical vector.
pub fn hash_embedding(text: &str, dim: usize) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    let hex: Vec<u8> = digest
        .iter()
        .flat_map(|byte| [byte >> 4, byte & 0x0f])
        .collect();

    let mut embedding: Vec<f32> = (0..dim)
        .map(|i| hex[i % hex.len()] as f32 / 8.0 - 1.0)
        .collect();

    let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut embedding {
            *x /= norm;
        }
    }
    embedding
}

/// The default embedding function at [`DEFAULT_EMBEDDING_DIM`].
pub fn default_embedding_fn() -> EmbeddingFn {
    Arc::new(|text| hash_embedding(text, DEFAULT_EMBEDDING_DIM))
}

struct CacheSlot {
    value: Vec<f32>,
    /// None means no expiry.
    expires_at: Option<DateTime<Utc>>,
}

/// TTL map for embeddings; expired entries are evicted lazily on access.
pub struct EmbeddingCache {
    slots: RwLock<HashMap<String, CacheSlot>>,
    default_ttl_secs: i64,
}

impl EmbeddingCache {
    /// Cache with a default TTL in seconds; negative means entries never
    /// expire.
    pub fn new(default_ttl_secs: i64) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            default_ttl_secs,
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        let expired = {
            let slots = self.slots.read().expect("cache lock");
            match slots.get(key) {
                None => return None,
                Some(slot) => match slot.expires_at {
                    Some(expiry) if Utc::now() > expiry => true,
                    _ => return Some(slot.value.clone()),
                },
            }
        };
        if expired {
            self.slots.write().expect("cache lock").remove(key);
        }
        None
    }

    /// Insert with an optional per-entry TTL override; `ttl_secs < 0` means
    /// no expiry.
    pub fn set(&self, key: impl Into<String>, value: Vec<f32>, ttl_secs: Option<i64>) {
        let ttl = ttl_secs.unwrap_or(self.default_ttl_secs);
        let expires_at = if ttl < 0 {
            None
        } else {
            Some(Utc::now() + Duration::seconds(ttl))
        };
        self.slots
            .write()
            .expect("cache lock")
            .insert(key.into(), CacheSlot { value, expires_at });
    }

    pub fn clear(&self) {
        self.slots.write().expect("cache lock").clear();
    }

    pub fn len(&self) -> usize {
        self.slots.read().expect("cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_embedding_deterministic() {
        let a = hash_embedding("hello world", 384);
        let b = hash_embedding("hello world", 384);
        let c = hash_embedding("different", 384);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 384);
    }

    #[test]
    fn test_hash_embedding_normalized() {
        let emb = hash_embedding("some text", 128);
        let norm: f32 = emb.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_cache_get_set() {
        let cache = EmbeddingCache::new(3600);
        assert!(cache.get("k").is_none());

        cache.set("k", vec![1.0, 2.0], None);
        assert_eq!(cache.get("k"), Some(vec![1.0, 2.0]));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_expiry() {
        let cache = EmbeddingCache::new(3600);
        cache.set("gone", vec![1.0], Some(-10));
        // Negative TTL means no expiry
        assert!(cache.get("gone").is_some());

        cache.set("expired", vec![1.0], Some(0));
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(cache.get("expired").is_none());
        // Lazy eviction removed the slot
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_clear() {
        let cache = EmbeddingCache::default();
        cache.set("a", vec![1.0], None);
        cache.clear();
        assert!(cache.is_empty());
    }
}
