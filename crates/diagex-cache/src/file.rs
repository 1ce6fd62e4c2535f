//! File-based cache implementation.
//!
//! [`FileCache`] persists entries across runs so that a second scan of an
//! unchanged tree can skip re-analysis. Keys are arbitrary strings (absolute
//! source paths in practice), so each key is hashed with SHA-256 and the entry
//! lives at `{root}/{bucket}/{hash[..2]}/{hash}`. An entry file holds a small
//! header followed by the payload:
//!
//! ```text
//! [etag_len: u32 LE][etag bytes][data bytes]
//! ```
//!
//! The header is read first; the payload is only read when the etag matches.
//!
//! A `VERSION` file in the root guards the on-disk layout: when it is missing
//! or differs from the version passed to [`FileCache::new`], the directory is
//! wiped and recreated.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::{Cache, CacheBucket};

/// File-based [`Cache`] rooted at a directory on disk.
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    /// Open the cache at `root`, wiping it if its `VERSION` differs from `version`.
    ///
    /// Failures are logged and never fatal; a broken cache behaves like a
    /// cache that always misses.
    #[must_use]
    pub fn new(root: PathBuf, version: &str) -> Self {
        validate_version(&root, version);
        Self { root }
    }
}

impl Cache for FileCache {
    fn bucket(&self, name: &str) -> Box<dyn CacheBucket> {
        Box::new(FileCacheBucket {
            dir: self.root.join(name),
        })
    }
}

struct FileCacheBucket {
    dir: PathBuf,
}

impl FileCacheBucket {
    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.dir.join(&digest[..2]).join(digest)
    }
}

impl CacheBucket for FileCacheBucket {
    fn get(&self, key: &str, etag: &str) -> Option<Vec<u8>> {
        let mut file = File::open(self.entry_path(key)).ok()?;

        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf).ok()?;
        let etag_len = u32::from_le_bytes(len_buf) as usize;

        let mut stored_etag = vec![0u8; etag_len];
        file.read_exact(&mut stored_etag).ok()?;

        if !etag.is_empty() && stored_etag != etag.as_bytes() {
            return None;
        }

        let mut data = Vec::new();
        file.read_to_end(&mut data).ok()?;
        Some(data)
    }

    fn set(&self, key: &str, etag: &str, value: &[u8]) {
        let path = self.entry_path(key);
        let Some(parent) = path.parent() else {
            return;
        };
        if let Err(e) = fs::create_dir_all(parent) {
            tracing::debug!(dir = %parent.display(), error = %e, "cache bucket not writable");
            return;
        }

        let etag_bytes = etag.as_bytes();
        let Ok(etag_len) = u32::try_from(etag_bytes.len()) else {
            return;
        };
        let mut buf = Vec::with_capacity(4 + etag_bytes.len() + value.len());
        buf.extend_from_slice(&etag_len.to_le_bytes());
        buf.extend_from_slice(etag_bytes);
        buf.extend_from_slice(value);

        if let Err(e) = fs::write(&path, &buf) {
            tracing::debug!(path = %path.display(), error = %e, "failed to write cache entry");
        }
    }
}

fn validate_version(root: &Path, version: &str) {
    let version_file = root.join("VERSION");

    match fs::read_to_string(&version_file) {
        Ok(stored) if stored == version => {
            tracing::debug!(version, "cache version matches");
            return;
        }
        Ok(stored) => {
            tracing::info!(stored, current = version, "cache version changed, wiping cache");
        }
        Err(_) => {
            tracing::info!(root = %root.display(), "initializing cache directory");
        }
    }

    if root.exists()
        && let Err(e) = fs::remove_dir_all(root)
    {
        tracing::warn!("failed to remove cache directory: {e}");
    }
    if let Err(e) = fs::create_dir_all(root) {
        tracing::warn!("failed to create cache directory: {e}");
        return;
    }
    if let Err(e) = fs::write(&version_file, version) {
        tracing::warn!("failed to write cache VERSION file: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_path_keys_round_trip_with_etag() {
        let tmp = TempDir::new().unwrap();
        let cache = FileCache::new(tmp.path().join("cache"), "1");
        let bucket = cache.bucket("analysis");

        bucket.set("/home/user/docs/arch.md", "1700-120", b"[1,2]");

        assert_eq!(
            bucket.get("/home/user/docs/arch.md", "1700-120"),
            Some(b"[1,2]".to_vec())
        );
        assert_eq!(bucket.get("/home/user/docs/arch.md", "1701-120"), None);
        assert_eq!(bucket.get("/home/user/docs/other.md", "1700-120"), None);
    }

    #[test]
    fn test_entries_are_hashed_under_bucket_dir() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("cache");
        let cache = FileCache::new(root.clone(), "1");
        cache.bucket("analysis").set("../../escape", "e", b"x");

        // Nothing is written outside the bucket directory.
        assert!(!tmp.path().join("escape").exists());
        let shards: Vec<_> = fs::read_dir(root.join("analysis")).unwrap().collect();
        assert_eq!(shards.len(), 1);
    }

    #[test]
    fn test_entries_survive_reopen_with_same_version() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("cache");

        FileCache::new(root.clone(), "1")
            .bucket("analysis")
            .set("k", "e", b"kept");

        let reopened = FileCache::new(root, "1");
        assert_eq!(reopened.bucket("analysis").get("k", "e"), Some(b"kept".to_vec()));
    }

    #[test]
    fn test_version_change_wipes_entries() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("cache");

        FileCache::new(root.clone(), "1")
            .bucket("analysis")
            .set("k", "e", b"stale");

        let upgraded = FileCache::new(root.clone(), "2");
        assert_eq!(upgraded.bucket("analysis").get("k", "e"), None);
        assert_eq!(fs::read_to_string(root.join("VERSION")).unwrap(), "2");
    }
}
