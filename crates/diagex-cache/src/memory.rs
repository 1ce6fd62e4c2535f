//! In-memory cache implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::{Cache, CacheBucket};

type Entries = HashMap<String, (String, Vec<u8>)>;

/// Process-local [`Cache`].
///
/// Buckets with the same name share storage, so a bucket handle opened twice
/// sees the same entries. Cloning the cache shares storage as well.
#[derive(Clone, Default)]
pub struct MemoryCache {
    buckets: Arc<Mutex<HashMap<String, Arc<Mutex<Entries>>>>>,
}

impl MemoryCache {
    /// Create an empty in-memory cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for MemoryCache {
    fn bucket(&self, name: &str) -> Box<dyn CacheBucket> {
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entries = buckets.entry(name.to_owned()).or_default();
        Box::new(MemoryCacheBucket {
            entries: Arc::clone(entries),
        })
    }
}

struct MemoryCacheBucket {
    entries: Arc<Mutex<Entries>>,
}

impl CacheBucket for MemoryCacheBucket {
    fn get(&self, key: &str, etag: &str) -> Option<Vec<u8>> {
        let entries = self.entries.lock().ok()?;
        let (stored_etag, value) = entries.get(key)?;
        if !etag.is_empty() && stored_etag != etag {
            return None;
        }
        Some(value.clone())
    }

    fn set(&self, key: &str, etag: &str, value: &[u8]) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_owned(), (etag.to_owned(), value.to_vec()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_bucket_etag_validation() {
        let cache = MemoryCache::new();
        let bucket = cache.bucket("analysis");

        bucket.set("/a.md", "100-5", b"first");
        assert_eq!(bucket.get("/a.md", "100-5"), Some(b"first".to_vec()));
        assert_eq!(bucket.get("/a.md", "101-5"), None);
        assert_eq!(bucket.get("/a.md", ""), Some(b"first".to_vec()));

        bucket.set("/a.md", "101-5", b"second");
        assert_eq!(bucket.get("/a.md", "100-5"), None);
        assert_eq!(bucket.get("/a.md", "101-5"), Some(b"second".to_vec()));
    }

    #[test]
    fn test_memory_buckets_share_storage_by_name() {
        let cache = MemoryCache::new();
        cache.bucket("analysis").set("k", "e", b"v");

        assert_eq!(cache.bucket("analysis").get("k", "e"), Some(b"v".to_vec()));
        assert_eq!(cache.bucket("other").get("k", "e"), None);

        let cloned = cache.clone();
        assert_eq!(cloned.bucket("analysis").get("k", "e"), Some(b"v".to_vec()));
    }
}
