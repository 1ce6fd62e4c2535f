//! Typed convenience methods for [`CacheBucket`].

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::CacheBucket;

/// JSON access on top of any [`CacheBucket`].
///
/// Kept as an extension trait so [`CacheBucket`] stays object-safe and free
/// of serde; a blanket impl makes it available on `Box<dyn CacheBucket>`.
pub trait CacheBucketExt: CacheBucket {
    /// Retrieve and deserialize a JSON value.
    ///
    /// Returns `None` on cache miss, etag mismatch, or a payload that no longer
    /// deserializes (e.g. written by an older build).
    fn get_json<T: DeserializeOwned>(&self, key: &str, etag: &str) -> Option<T> {
        let bytes = self.get(key, etag)?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(key, error = %e, "discarding undecodable cache entry");
                None
            }
        }
    }

    /// Serialize a value as JSON and store it. Serialization failures are ignored.
    fn set_json<T: Serialize>(&self, key: &str, etag: &str, value: &T) {
        if let Ok(bytes) = serde_json::to_vec(value) {
            self.set(key, etag, &bytes);
        }
    }
}

impl<B: CacheBucket + ?Sized> CacheBucketExt for B {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cache, MemoryCache};

    #[test]
    fn test_json_round_trip_through_boxed_bucket() {
        let bucket = MemoryCache::new().bucket("analysis");
        bucket.set_json("k", "e", &vec![1u32, 2, 3]);

        let value: Option<Vec<u32>> = bucket.get_json("k", "e");
        assert_eq!(value, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_undecodable_entry_is_a_miss() {
        let bucket = MemoryCache::new().bucket("analysis");
        bucket.set("k", "e", b"not json");

        let value: Option<Vec<u32>> = bucket.get_json("k", "e");
        assert_eq!(value, None);
    }
}
